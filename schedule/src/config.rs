//! GPU mapping configuration.
//!
//! Provides typed configuration with bon builders and `TESSERA_*`
//! environment variable fallbacks, plus the textual per-kernel size
//! overrides
//!
//! ```text
//! { kernel[0] -> tile[32,32]; kernel[0] -> block[16,8]; kernel[1] -> grid[64] }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bon::bon;
use itertools::Itertools;
use snafu::ensure;
use tessera_ir::KernelId;
use tracing::warn;

use crate::error::*;

// ============================================================================
// ON-CHIP MEMORY BUDGET
// ============================================================================

/// Shared memory available to the promoted groups of one kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryBudget {
    Unlimited,
    Bytes(usize),
}

impl Default for MemoryBudget {
    fn default() -> Self {
        Self::Bytes(8192)
    }
}

impl MemoryBudget {
    pub fn bytes(&self) -> Option<usize> {
        match self {
            Self::Unlimited => None,
            Self::Bytes(n) => Some(*n),
        }
    }
}

impl FromStr for MemoryBudget {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "unlimited" | "none" | "-1" => Ok(Self::Unlimited),
            n => n.parse().map(Self::Bytes),
        }
    }
}

// ============================================================================
// KERNEL SIZES
// ============================================================================

/// Tile, grid and block sizes of one kernel. A missing entry means the
/// defaults apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KernelSizes {
    pub tile: Option<Vec<i64>>,
    pub grid: Option<Vec<i64>>,
    pub block: Option<Vec<i64>>,
}

impl KernelSizes {
    fn entries(&self) -> impl Iterator<Item = (&'static str, &Vec<i64>)> {
        [("tile", &self.tile), ("grid", &self.grid), ("block", &self.block)]
            .into_iter()
            .filter_map(|(kind, sizes)| sizes.as_ref().map(|s| (kind, s)))
    }
}

/// Per-kernel size overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SizeOverrides {
    kernels: BTreeMap<KernelId, KernelSizes>,
}

impl SizeOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: KernelId) -> Option<&KernelSizes> {
        self.kernels.get(&id)
    }

    pub fn tile(mut self, id: KernelId, sizes: Vec<i64>) -> Self {
        self.kernels.entry(id).or_default().tile = Some(sizes);
        self
    }

    pub fn grid(mut self, id: KernelId, sizes: Vec<i64>) -> Self {
        self.kernels.entry(id).or_default().grid = Some(sizes);
        self
    }

    pub fn block(mut self, id: KernelId, sizes: Vec<i64>) -> Self {
        self.kernels.entry(id).or_default().block = Some(sizes);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }

    pub(crate) fn insert(&mut self, id: KernelId, sizes: KernelSizes) {
        self.kernels.insert(id, sizes);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&KernelId, &KernelSizes)> {
        self.kernels.iter()
    }

    fn parse_entry(input: &str, entry: &str) -> Result<(KernelId, &'static str, Vec<i64>)> {
        let invalid = |reason: &str| InvalidSizesSnafu { input, reason: format!("{reason} in {entry:?}") };

        let (lhs, rhs) = entry.split_once("->").ok_or_else(|| invalid("missing \"->\"").build())?;
        let id = lhs
            .trim()
            .strip_prefix("kernel[")
            .and_then(|rest| rest.strip_suffix(']'))
            .and_then(|n| n.trim().parse::<usize>().ok())
            .ok_or_else(|| invalid("expected kernel[<id>]").build())?;

        let rhs = rhs.trim();
        let open = rhs.find('[').ok_or_else(|| invalid("expected <kind>[...]").build())?;
        let kind = match rhs[..open].trim() {
            "tile" => "tile",
            "grid" => "grid",
            "block" => "block",
            _ => return invalid("unknown size kind").fail(),
        };
        let list = rhs[open + 1..].strip_suffix(']').ok_or_else(|| invalid("unterminated size list").build())?;
        let sizes = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<i64>().ok().filter(|v| *v > 0))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| invalid("sizes must be positive integers").build())?;
        ensure!(!sizes.is_empty(), InvalidSizesSnafu { input, reason: format!("empty size list in {entry:?}") });
        Ok((KernelId(id), kind, sizes))
    }
}

impl FromStr for SizeOverrides {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        let body = input
            .trim()
            .strip_prefix('{')
            .and_then(|rest| rest.strip_suffix('}'))
            .ok_or_else(|| InvalidSizesSnafu { input, reason: "expected { ... }" }.build())?;

        let mut overrides = Self::new();
        for entry in body.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let (id, kind, sizes) = Self::parse_entry(input, entry)?;
            overrides = match kind {
                "tile" => overrides.tile(id, sizes),
                "grid" => overrides.grid(id, sizes),
                _ => overrides.block(id, sizes),
            };
        }
        Ok(overrides)
    }
}

impl fmt::Display for SizeOverrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self
            .kernels
            .iter()
            .flat_map(|(id, sizes)| {
                sizes.entries().map(move |(kind, values)| format!("{id} -> {kind}[{}]", values.iter().join(",")))
            })
            .join("; ");
        if entries.is_empty() { f.write_str("{ }") } else { write!(f, "{{ {entries} }}") }
    }
}

/// Sizes each kernel actually used, in the override syntax.
pub type UsedSizes = SizeOverrides;

// ============================================================================
// DUMPS
// ============================================================================

/// Diagnostic dumps emitted at `info` level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DumpOptions {
    pub schedule: bool,
    pub schedule_constraints: bool,
    pub sizes: bool,
}

impl DumpOptions {
    /// # Environment Variables
    ///
    /// * `TESSERA_DUMP_SCHEDULE=1`
    /// * `TESSERA_DUMP_SCHEDULE_CONSTRAINTS=1`
    /// * `TESSERA_DUMP_SIZES=1`
    pub fn from_env() -> Self {
        Self {
            schedule: env_flag("TESSERA_DUMP_SCHEDULE"),
            schedule_constraints: env_flag("TESSERA_DUMP_SCHEDULE_CONSTRAINTS"),
            sizes: env_flag("TESSERA_DUMP_SIZES"),
        }
    }
}

// ============================================================================
// GPU OPTIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuOptions {
    /// Default tile size of every tiled band member.
    pub tile_size: i64,
    pub shared_memory: MemoryBudget,
    /// Map loops to ids block-cyclically (`true`) or by quotient.
    pub wrap: bool,
    /// Quotient loops step by the id count instead of by one.
    pub scale_tile_loops: bool,
    /// Address device arrays through one flattened offset.
    pub linearize_device_arrays: bool,
    /// Allow forced privatization of scalars whose live ranges stay within
    /// one iteration of the shared loops.
    pub live_range_reordering: bool,
    pub sizes: SizeOverrides,
    pub dump: DumpOptions,
}

#[bon]
impl GpuOptions {
    #[builder]
    pub fn builder(
        #[builder(default = 32)] tile_size: i64,
        #[builder(default)] shared_memory: MemoryBudget,
        #[builder(default = true)] wrap: bool,
        #[builder(default = true)] scale_tile_loops: bool,
        #[builder(default = true)] linearize_device_arrays: bool,
        #[builder(default = false)] live_range_reordering: bool,
        #[builder(default)] sizes: SizeOverrides,
        #[builder(default)] dump: DumpOptions,
    ) -> Self {
        Self {
            tile_size,
            shared_memory,
            wrap,
            scale_tile_loops,
            linearize_device_arrays,
            live_range_reordering,
            sizes,
            dump,
        }
    }
}

impl Default for GpuOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl GpuOptions {
    /// Options from environment variables, falling back to the defaults.
    ///
    /// # Environment Variables
    ///
    /// * `TESSERA_TILE_SIZE=N`
    /// * `TESSERA_SHARED_MEMORY=N` or `unlimited`
    /// * `TESSERA_NO_WRAP=1`
    /// * `TESSERA_NO_SCALE_TILE_LOOPS=1`
    /// * `TESSERA_NO_LINEARIZE=1`
    /// * `TESSERA_LIVE_RANGE_REORDERING=1`
    /// * `TESSERA_SIZES="{ kernel[0] -> tile[16] }"`
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let tile_size = std::env::var("TESSERA_TILE_SIZE")
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(defaults.tile_size);

        let shared_memory = std::env::var("TESSERA_SHARED_MEMORY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.shared_memory);

        let sizes = match std::env::var("TESSERA_SIZES") {
            Ok(text) => text.parse().unwrap_or_else(|err| {
                warn!(%err, "ignoring TESSERA_SIZES");
                SizeOverrides::default()
            }),
            Err(_) => SizeOverrides::default(),
        };

        Self::builder()
            .tile_size(tile_size)
            .shared_memory(shared_memory)
            .wrap(!env_flag("TESSERA_NO_WRAP"))
            .scale_tile_loops(!env_flag("TESSERA_NO_SCALE_TILE_LOOPS"))
            .linearize_device_arrays(!env_flag("TESSERA_NO_LINEARIZE"))
            .live_range_reordering(env_flag("TESSERA_LIVE_RANGE_REORDERING"))
            .sizes(sizes)
            .dump(DumpOptions::from_env())
            .build()
    }

    /// Tile sizes of a band with `members` members for kernel `id`.
    pub fn tile_sizes(&self, id: KernelId, members: usize) -> Vec<i64> {
        match self.sizes.get(id).and_then(|s| s.tile.as_ref()) {
            Some(sizes) => sizes.iter().copied().take(members).collect(),
            None => vec![self.tile_size; members],
        }
    }

    /// Grid sizes for `n` parallel tile members, at most two.
    pub fn grid_sizes(&self, id: KernelId, n: usize) -> Vec<i64> {
        let defaults: &[i64] = match n.min(2) {
            0 => &[],
            1 => &[32768],
            _ => &[256, 256],
        };
        Self::with_overrides(defaults, self.sizes.get(id).and_then(|s| s.grid.as_deref()))
    }

    /// Block sizes for `n` parallel point members, at most three.
    pub fn block_sizes(&self, id: KernelId, n: usize) -> Vec<i64> {
        let defaults: &[i64] = match n.min(3) {
            0 => &[],
            1 => &[512],
            2 => &[32, 16],
            _ => &[32, 4, 4],
        };
        Self::with_overrides(defaults, self.sizes.get(id).and_then(|s| s.block.as_deref()))
    }

    /// Overrides replace defaults position-wise and may shorten the list.
    fn with_overrides(defaults: &[i64], overrides: Option<&[i64]>) -> Vec<i64> {
        match overrides {
            None => defaults.to_vec(),
            Some(values) => defaults.iter().zip(values).map(|(_, v)| *v).collect(),
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| v != "0" && !v.is_empty())
}
