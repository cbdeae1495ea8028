//! Copy and synchronization schedule of a kernel.
//!
//! Every operation sits at a `level` of the kernel's tile loops (after
//! `level` of them, `0..=n` for `n` tile loops) and has an `order` among
//! the operations at that level. Order 0 is the next tile loop, or the
//! computation itself at the innermost level. With `s` groups in the
//! kernel and `k` counting promoted groups:
//!
//! | operation                   | level  | order      |
//! |-----------------------------|--------|------------|
//! | read into group `k`         | copy   | `-2 - k`   |
//! | sync before shared reads    | `n`    | `-1`       |
//! | computation                 | `n`    | `0`        |
//! | write from private `k`      | copy   | `1 + k`    |
//! | sync after the computation  | `n`    | `1 + s`    |
//! | write from shared `k`       | copy   | `s + 2 + k`|
//! | sync after writes           | copy   | `2s + 2`   |
//!
//! The sync after writes is left out at level 0 and, for private groups,
//! at the innermost level, where the sync after the computation covers it.

use std::fmt;

use tessera_ir::{KernelId, Scop};
use tracing::{debug, instrument};

use crate::dataflow::{Direction, TaggedSets, any_instances, retained_accesses};
use crate::error::*;
use crate::kernel::Kernel;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpKind {
    /// The kernel's statements.
    Compute,
    /// Copy of group `group` of local array `array`.
    Copy { direction: Direction, array: usize, group: usize },
    Sync,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOp {
    pub kind: OpKind,
    pub level: usize,
    pub order: i64,
    /// Instances whose accesses a copy serves.
    pub retained: TaggedSets,
}

impl CopyOp {
    fn compute(level: usize) -> Self {
        Self { kind: OpKind::Compute, level, order: 0, retained: TaggedSets::new() }
    }

    fn sync(level: usize, order: i64) -> Self {
        Self { kind: OpKind::Sync, level, order, retained: TaggedSets::new() }
    }

    pub fn is_sync(&self) -> bool {
        self.kind == OpKind::Sync
    }
}

impl fmt::Display for CopyOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            OpKind::Compute => write!(f, "compute")?,
            OpKind::Copy { direction, array, group } => write!(f, "{direction} {array}.{group}")?,
            OpKind::Sync => write!(f, "sync")?,
        }
        write!(f, " @ ({}, {})", self.level, self.order)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopySchedule {
    pub kernel: KernelId,
    /// Number of tile loops inside the kernel.
    pub tile_len: usize,
    /// Operations sorted by level, then order.
    pub ops: Vec<CopyOp>,
}

impl CopySchedule {
    /// Operations placed directly at `level`, in order.
    pub fn at_level(&self, level: usize) -> impl Iterator<Item = &CopyOp> {
        self.ops.iter().filter(move |op| op.level == level)
    }

    /// Some operation sits strictly inside tile loop `level`.
    pub fn has_deeper(&self, level: usize) -> bool {
        self.ops.iter().any(|op| op.level > level)
    }

    pub fn syncs(&self) -> impl Iterator<Item = &CopyOp> {
        self.ops.iter().filter(|op| op.is_sync())
    }

    pub fn copies(&self, direction: Direction) -> impl Iterator<Item = &CopyOp> {
        self.ops.iter().filter(move |op| matches!(op.kind, OpKind::Copy { direction: d, .. } if d == direction))
    }
}

#[instrument(skip_all, fields(kernel.id = %kernel.id))]
pub fn build_copy_schedule(scop: &Scop, kernel: &Kernel) -> Result<CopySchedule> {
    let n = kernel.tile_len();
    let s = kernel.arrays.iter().map(|a| a.groups.len()).sum::<usize>() as i64;

    let mut ops = vec![CopyOp::compute(n)];
    let mut k = 0i64;
    for (a, local) in kernel.arrays.iter().enumerate() {
        for (g, group) in local.groups.iter().enumerate() {
            if !group.is_promoted() {
                continue;
            }
            let pos = group.copy_level(kernel);

            let writes = retained_accesses(kernel, scop, group, Direction::Write)?;
            if any_instances(&writes) {
                let order = if group.is_private() { 1 + k } else { s + 2 + k };
                ops.push(CopyOp {
                    kind: OpKind::Copy { direction: Direction::Write, array: a, group: g },
                    level: pos,
                    order,
                    retained: writes,
                });
                if pos != 0 && !(pos == n && group.is_private()) {
                    ops.push(CopyOp::sync(pos, 2 * s + 2));
                }
            }

            let reads = retained_accesses(kernel, scop, group, Direction::Read)?;
            if any_instances(&reads) {
                ops.push(CopyOp {
                    kind: OpKind::Copy { direction: Direction::Read, array: a, group: g },
                    level: pos,
                    order: -2 - k,
                    retained: reads,
                });
                if !group.is_private() {
                    ops.push(CopyOp::sync(n, -1));
                }
            }
            k += 1;
        }
    }
    ops.push(CopyOp::sync(n, 1 + s));

    ops.sort_by_key(|op| (op.level, op.order));
    ops.dedup_by(|a, b| a.is_sync() && b.is_sync() && a.level == b.level && a.order == b.order);

    let schedule = CopySchedule { kernel: kernel.id, tile_len: n, ops };
    debug!(
        kernel.id = %kernel.id,
        ops = %schedule.ops.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "),
        "copy schedule"
    );
    Ok(schedule)
}
