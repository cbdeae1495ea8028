//! Persistent schedule trees.
//!
//! Nodes are immutable and shared through [`Arc`]. Every transformation
//! rebuilds the path from the root to the changed node and shares the
//! untouched subtrees, so a tree handed to one pass is never observed
//! changing by another. Rebuilding with identical children returns the
//! original node, which keeps pointer identity meaningful for no-op
//! passes.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Write as _};
use std::sync::Arc;

use itertools::Itertools;
use snafu::ensure;
use tessera_poly::{LinExpr, Polyhedron, Var};

use crate::error::*;
use crate::instance::InstanceSet;
use crate::scop::StmtId;

// ============================================================================
// BAND MEMBERS
// ============================================================================

/// Code generation hint for the loop of one band member.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum LoopType {
    #[default]
    Default,
    /// Generate a single loop, never split into separate pieces.
    Atomic,
    /// Fully unroll the loop.
    Unroll,
}

/// How a member's value is derived from its affine schedule `e`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    /// `e`
    Plain,
    /// `floor(e / size)`
    Tile { size: i64 },
    /// `e - size * floor(e / size)`
    Point { size: i64 },
}

/// One dimension of a band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BandMember {
    /// Affine schedule `e` of every statement reaching the band.
    pub schedule: BTreeMap<StmtId, LinExpr>,
    pub kind: MemberKind,
    /// Parallel: no dependence is carried by this member.
    pub coincident: bool,
    pub loop_type: LoopType,
}

impl BandMember {
    pub fn new(schedule: impl IntoIterator<Item = (StmtId, LinExpr)>) -> Self {
        Self {
            schedule: schedule.into_iter().collect(),
            kind: MemberKind::Plain,
            coincident: false,
            loop_type: LoopType::Default,
        }
    }

    pub fn coincident(mut self, coincident: bool) -> Self {
        self.coincident = coincident;
        self
    }

    pub fn with_loop_type(mut self, loop_type: LoopType) -> Self {
        self.loop_type = loop_type;
        self
    }

    pub fn value(&self, stmt: &StmtId) -> Option<&LinExpr> {
        self.schedule.get(stmt)
    }

    /// Tile and point members for tile size `size`.
    pub fn tiled(&self, size: i64) -> (BandMember, BandMember) {
        let tile = Self { kind: MemberKind::Tile { size }, ..self.clone() };
        let point = Self { kind: MemberKind::Point { size }, loop_type: LoopType::Default, ..self.clone() };
        (tile, point)
    }
}

// ============================================================================
// BANDS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Band {
    pub members: Vec<BandMember>,
    /// Members may be freely interchanged.
    pub permutable: bool,
}

impl Band {
    pub fn new(members: Vec<BandMember>, permutable: bool) -> Self {
        Self { members, permutable }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Number of leading coincident members.
    pub fn n_coincident(&self) -> usize {
        self.members.iter().take_while(|m| m.coincident).count()
    }

    /// Split into the first `at` members and the rest.
    pub fn split(&self, at: usize) -> Result<(Band, Band)> {
        ensure!(at <= self.members.len(), InvalidSplitSnafu { at, members: self.members.len() });
        let (outer, inner) = self.members.split_at(at);
        Ok((Band::new(outer.to_vec(), self.permutable), Band::new(inner.to_vec(), self.permutable)))
    }

    /// Tile band and point band for the given sizes, one per member.
    pub fn tile(&self, sizes: &[i64]) -> (Band, Band) {
        let (tiles, points): (Vec<_>, Vec<_>) = self.members.iter().zip(sizes).map(|(m, &size)| m.tiled(size)).unzip();
        (Band::new(tiles, self.permutable), Band::new(points, self.permutable))
    }

    /// Same band with every member set to `loop_type`.
    pub fn with_loop_type(&self, loop_type: LoopType) -> Band {
        Band::new(self.members.iter().map(|m| m.clone().with_loop_type(loop_type)).collect(), self.permutable)
    }

    pub fn statements(&self) -> BTreeSet<StmtId> {
        self.members.iter().flat_map(|m| m.schedule.keys().cloned()).collect()
    }
}

// ============================================================================
// MARKS AND FILTERS
// ============================================================================

/// Sequence number of a device kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[display("kernel[{_0}]")]
pub struct KernelId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mark {
    /// Root of a carved kernel.
    Kernel(KernelId),
    /// Start of the part of a kernel mapped to threads.
    Thread,
}

/// Filter equating identifiers to band member values modulo sizes:
/// `ids[k] = value(members[k]) mod sizes[k]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdFilter {
    pub ids: Vec<Var>,
    pub sizes: Vec<i64>,
    pub members: Vec<BandMember>,
}

impl IdFilter {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Instances(InstanceSet),
    Modulo(IdFilter),
}

// ============================================================================
// NODES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleNode {
    /// Root: the instances scheduled by the tree.
    Domain { domain: InstanceSet, child: Arc<ScheduleNode> },
    Filter { filter: Filter, child: Arc<ScheduleNode> },
    Band { band: Band, child: Arc<ScheduleNode> },
    /// Children execute in order; each child is a filter.
    Sequence { children: Vec<Arc<ScheduleNode>> },
    /// Children execute in any order; each child is a filter.
    Set { children: Vec<Arc<ScheduleNode>> },
    Mark { mark: Mark, child: Arc<ScheduleNode> },
    /// Introduces identifiers with their bounds.
    Context { context: Polyhedron, child: Arc<ScheduleNode> },
    /// The subtree only executes where `guard` holds.
    Guard { guard: Polyhedron, child: Arc<ScheduleNode> },
    Leaf,
}

impl ScheduleNode {
    pub fn leaf() -> Arc<Self> {
        Arc::new(Self::Leaf)
    }

    pub fn domain(domain: InstanceSet, child: Arc<Self>) -> Arc<Self> {
        Arc::new(Self::Domain { domain, child })
    }

    pub fn filter(filter: Filter, child: Arc<Self>) -> Arc<Self> {
        Arc::new(Self::Filter { filter, child })
    }

    /// Filter keeping every instance of the listed statements.
    pub fn filter_statements(stmts: impl IntoIterator<Item = StmtId>, child: Arc<Self>) -> Arc<Self> {
        Self::filter(Filter::Instances(InstanceSet::universe_of(stmts)), child)
    }

    /// Band node; an empty band is elided.
    pub fn band(band: Band, child: Arc<Self>) -> Arc<Self> {
        if band.is_empty() {
            return child;
        }
        Arc::new(Self::Band { band, child })
    }

    pub fn sequence(children: Vec<Arc<Self>>) -> Arc<Self> {
        Arc::new(Self::Sequence { children })
    }

    pub fn set(children: Vec<Arc<Self>>) -> Arc<Self> {
        Arc::new(Self::Set { children })
    }

    pub fn mark(mark: Mark, child: Arc<Self>) -> Arc<Self> {
        Arc::new(Self::Mark { mark, child })
    }

    pub fn context(context: Polyhedron, child: Arc<Self>) -> Arc<Self> {
        Arc::new(Self::Context { context, child })
    }

    pub fn guard(guard: Polyhedron, child: Arc<Self>) -> Arc<Self> {
        Arc::new(Self::Guard { guard, child })
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Domain { .. } => "domain",
            Self::Filter { .. } => "filter",
            Self::Band { .. } => "band",
            Self::Sequence { .. } => "sequence",
            Self::Set { .. } => "set",
            Self::Mark { .. } => "mark",
            Self::Context { .. } => "context",
            Self::Guard { .. } => "guard",
            Self::Leaf => "leaf",
        }
    }

    /// The single child of a non-list node.
    pub fn child(&self) -> Option<&Arc<ScheduleNode>> {
        match self {
            Self::Domain { child, .. }
            | Self::Filter { child, .. }
            | Self::Band { child, .. }
            | Self::Mark { child, .. }
            | Self::Context { child, .. }
            | Self::Guard { child, .. } => Some(child),
            Self::Sequence { .. } | Self::Set { .. } | Self::Leaf => None,
        }
    }

    pub fn children(&self) -> &[Arc<ScheduleNode>] {
        match self {
            Self::Sequence { children } | Self::Set { children } => children,
            _ => std::slice::from_ref(match self.child() {
                Some(child) => child,
                None => return &[],
            }),
        }
    }

    /// `node` with its single child replaced; `node` itself when the child
    /// is unchanged.
    pub fn with_child(node: &Arc<Self>, child: Arc<Self>) -> Arc<Self> {
        if node.child().is_some_and(|c| Arc::ptr_eq(c, &child)) {
            return node.clone();
        }
        Arc::new(match node.as_ref() {
            Self::Domain { domain, .. } => Self::Domain { domain: domain.clone(), child },
            Self::Filter { filter, .. } => Self::Filter { filter: filter.clone(), child },
            Self::Band { band, .. } => Self::Band { band: band.clone(), child },
            Self::Mark { mark, .. } => Self::Mark { mark: *mark, child },
            Self::Context { context, .. } => Self::Context { context: context.clone(), child },
            Self::Guard { guard, .. } => Self::Guard { guard: guard.clone(), child },
            Self::Sequence { .. } | Self::Set { .. } | Self::Leaf => return node.clone(),
        })
    }

    /// List node with its children replaced; `node` itself when every
    /// child is unchanged.
    pub fn with_children(node: &Arc<Self>, children: Vec<Arc<Self>>) -> Arc<Self> {
        let old = node.children();
        if old.len() == children.len() && old.iter().zip(&children).all(|(a, b)| Arc::ptr_eq(a, b)) {
            return node.clone();
        }
        match node.as_ref() {
            Self::Sequence { .. } => Self::sequence(children),
            Self::Set { .. } => Self::set(children),
            _ => match children.into_iter().next() {
                Some(child) => Self::with_child(node, child),
                None => node.clone(),
            },
        }
    }

    /// Kernel marks in the tree, in pre-order.
    pub fn kernel_ids(&self) -> Vec<KernelId> {
        let mut out = Vec::new();
        self.visit(&mut |node| {
            if let Self::Mark { mark: Mark::Kernel(id), .. } = node {
                out.push(*id);
            }
        });
        out
    }

    /// Subtree rooted at the mark of kernel `id`.
    pub fn find_kernel(self: &Arc<Self>, id: KernelId) -> Option<Arc<Self>> {
        if let Self::Mark { mark: Mark::Kernel(k), .. } = self.as_ref()
            && *k == id
        {
            return Some(self.clone());
        }
        self.children().iter().find_map(|c| c.find_kernel(id))
    }

    /// Pre-order visit.
    pub fn visit(&self, f: &mut impl FnMut(&ScheduleNode)) {
        f(self);
        for child in self.children() {
            child.visit(f);
        }
    }

    /// Flattened schedule of every statement: band member values along its
    /// path, with the child position inserted at every sequence or set.
    /// Tiled members contribute their underlying affine value.
    pub fn flat_schedule(&self, domain: &InstanceSet) -> BTreeMap<StmtId, Vec<LinExpr>> {
        let mut out = BTreeMap::new();
        let active: BTreeSet<StmtId> = domain.statements().cloned().collect();
        self.flatten_into(&active, Vec::new(), &mut out);
        out
    }

    fn flatten_into(
        &self,
        active: &BTreeSet<StmtId>,
        prefix: Vec<BTreeMap<StmtId, LinExpr>>,
        out: &mut BTreeMap<StmtId, Vec<LinExpr>>,
    ) {
        match self {
            Self::Leaf => {
                for stmt in active {
                    let row = prefix.iter().map(|dim| dim.get(stmt).cloned().unwrap_or_default()).collect();
                    out.insert(stmt.clone(), row);
                }
            }
            Self::Filter { filter: Filter::Instances(set), child } => {
                let narrowed = active.iter().filter(|s| set.contains_stmt(s)).cloned().collect();
                child.flatten_into(&narrowed, prefix, out);
            }
            Self::Band { band, child } => {
                let mut prefix = prefix;
                prefix.extend(band.members.iter().map(|m| m.schedule.clone()));
                child.flatten_into(active, prefix, out);
            }
            Self::Sequence { children } | Self::Set { children } => {
                for (pos, c) in children.iter().enumerate() {
                    let mut prefix = prefix.clone();
                    prefix.push(active.iter().map(|s| (s.clone(), LinExpr::constant(pos as i64))).collect());
                    c.flatten_into(active, prefix, out);
                }
            }
            _ => {
                if let Some(child) = self.child() {
                    child.flatten_into(active, prefix, out);
                }
            }
        }
    }

    fn dump(&self, depth: usize, out: &mut String) -> fmt::Result {
        let pad = "  ".repeat(depth);
        match self {
            Self::Domain { domain, .. } => writeln!(out, "{pad}domain: {domain}")?,
            Self::Filter { filter: Filter::Instances(set), .. } => writeln!(out, "{pad}filter: {set}")?,
            Self::Filter { filter: Filter::Modulo(f), .. } => writeln!(
                out,
                "{pad}filter: {}",
                f.ids.iter().zip(&f.sizes).map(|(id, size)| format!("{id} = value mod {size}")).join(", ")
            )?,
            Self::Band { band, .. } => {
                let members = band
                    .members
                    .iter()
                    .map(|m| {
                        let values = m.schedule.iter().map(|(s, e)| format!("{s}: {e}")).join(", ");
                        let kind = match m.kind {
                            MemberKind::Plain => String::new(),
                            MemberKind::Tile { size } => format!(" tile {size}"),
                            MemberKind::Point { size } => format!(" point {size}"),
                        };
                        let coincident = if m.coincident { " coincident" } else { "" };
                        let loop_type = match m.loop_type {
                            LoopType::Default => String::new(),
                            other => format!(" {other}"),
                        };
                        format!("[{values}]{kind}{coincident}{loop_type}")
                    })
                    .join(" ");
                let permutable = if band.permutable { " permutable" } else { "" };
                writeln!(out, "{pad}band:{permutable} {members}")?
            }
            Self::Sequence { .. } => writeln!(out, "{pad}sequence")?,
            Self::Set { .. } => writeln!(out, "{pad}set")?,
            Self::Mark { mark: Mark::Kernel(id), .. } => writeln!(out, "{pad}mark: {id}")?,
            Self::Mark { mark: Mark::Thread, .. } => writeln!(out, "{pad}mark: thread")?,
            Self::Context { context, .. } => writeln!(out, "{pad}context: {context}")?,
            Self::Guard { guard, .. } => writeln!(out, "{pad}guard: {guard}")?,
            Self::Leaf => writeln!(out, "{pad}leaf")?,
        }
        for child in self.children() {
            child.dump(depth + 1, out)?;
        }
        Ok(())
    }
}

impl fmt::Display for ScheduleNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.dump(0, &mut out)?;
        f.write_str(&out)
    }
}
