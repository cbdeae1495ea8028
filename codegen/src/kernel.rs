//! Kernel body generation.
//!
//! Walks the carved subtree below a kernel mark. Tile and point members
//! become loops over the `s.k` and `p.k` coordinates, distributed over
//! block and thread ids as the id filters above them say; untiled members
//! become plain loops over `d.j`. Copies and barriers are spliced in
//! around the tile loop at their level, and around the computation below
//! the thread mark.

use std::sync::Arc;

use snafu::{OptionExt, ResultExt};
use tessera_ir::{AstExpr, AstNode, BandMember, Filter, Mark, MemberKind, ScheduleNode, Scop};
use tessera_poly::{BoundKind, Polyhedron, Set, Var};
use tessera_schedule::{ArrayInfo, CopyOp, CopySchedule, Coords, GpuOptions, Kernel, OpKind, coords};
use tracing::{debug, instrument};

use crate::access::{statement_annotation, statement_call};
use crate::error::*;
use crate::invert::invert_iterators;
use crate::scan::{Mapping, Scope, Style, id_name, loop_name};

/// Coordinates a statement instance is scanned over inside a kernel.
fn body_coords() -> Coords {
    Coords { tiles: true, points: true, deeper: true, ..Default::default() }
}

pub struct KernelGen<'a> {
    pub scop: &'a Scop,
    pub options: &'a GpuOptions,
    pub arrays: &'a [ArrayInfo],
    pub kernel: &'a Kernel,
    pub copies: &'a CopySchedule,
    /// Next untiled member, in pre-order.
    deeper: usize,
    /// Tiled members with the id and id count they are distributed over.
    distributed: Vec<(BandMember, Var, i64)>,
}

impl<'a> KernelGen<'a> {
    pub fn new(
        scop: &'a Scop,
        options: &'a GpuOptions,
        arrays: &'a [ArrayInfo],
        kernel: &'a Kernel,
        copies: &'a CopySchedule,
    ) -> Self {
        Self { scop, options, arrays, kernel, copies, deeper: 0, distributed: Vec::new() }
    }

    /// Body of the kernel marked at `node`, entered from the host `scope`.
    #[instrument(skip_all, fields(kernel.id = %self.kernel.id))]
    pub fn generate(&mut self, node: &Arc<ScheduleNode>, host: &Scope) -> Result<AstNode> {
        let mut scope = Scope { stmts: Default::default(), ..host.clone() };
        for stmt in &self.kernel.stmts {
            let Some(instances) = host.stmts.get(stmt) else {
                continue;
            };
            let relation = self.kernel.relation(self.scop, stmt, body_coords()).context(ScheduleSnafu)?;
            scope.stmts.insert(stmt.clone(), instances.intersect_poly(&relation));
        }
        let body = self.walk(node, &scope, 0)?;
        debug!(kernel.id = %self.kernel.id, deeper = self.deeper, "generated kernel body");
        Ok(body)
    }

    fn walk(&mut self, node: &Arc<ScheduleNode>, scope: &Scope, level: usize) -> Result<AstNode> {
        match node.as_ref() {
            ScheduleNode::Mark { mark: Mark::Kernel(_), child } => self.walk(child, scope, level),
            ScheduleNode::Mark { mark: Mark::Thread, child } => {
                self.around(level, scope, |generator, scope| generator.walk(child, scope, level))
            }
            ScheduleNode::Context { context, child } => {
                let scope = self.with_ids(scope, context);
                self.walk(child, &scope, level)
            }
            ScheduleNode::Filter { filter: Filter::Modulo(ids), child } => {
                for ((id, size), member) in ids.ids.iter().zip(&ids.sizes).zip(&ids.members) {
                    self.distributed.push((member.clone(), id.clone(), *size));
                }
                self.walk(child, scope, level)
            }
            ScheduleNode::Filter { filter: Filter::Instances(filter), child } => {
                let narrowed = scope.narrow(filter);
                if narrowed.stmts.is_empty() {
                    self.skip(&[], child);
                    return Ok(AstNode::block(vec![]));
                }
                self.walk(child, &narrowed, level)
            }
            ScheduleNode::Band { band, child } => self.members(&band.members, child, scope, level),
            ScheduleNode::Sequence { children } | ScheduleNode::Set { children } => {
                let nodes = children.iter().map(|c| self.walk(c, scope, level)).collect::<Result<Vec<_>>>()?;
                Ok(AstNode::block(nodes))
            }
            ScheduleNode::Guard { guard, child } => {
                let body = self.walk(child, scope, level)?;
                Ok(AstNode::guarded(scope.condition(&Set::from_poly(guard.clone())), body))
            }
            ScheduleNode::Leaf => self.statements(scope),
            ScheduleNode::Domain { .. } => tessera_ir::error::UnsupportedNodeSnafu { kind: "domain", location: "inside a kernel" }
                .fail()
                .context(IrSnafu),
        }
    }

    /// Scope with the block and thread ids bounded by `context`. An id
    /// pinned to one value is spelled as that value.
    fn with_ids(&self, scope: &Scope, context: &Polyhedron) -> Scope {
        let mut scope = scope.clone();
        scope.assume(context.constraints().iter().cloned());
        for id in self.kernel.block_ids().into_iter().chain(self.kernel.thread_ids()) {
            let bounds = scope.known.bounds(&id, &Default::default());
            let lo = bounds.lower.iter().filter_map(|b| b.value(BoundKind::Lower)).max();
            let hi = bounds.upper.iter().filter_map(|b| b.value(BoundKind::Upper)).min();
            let name = match (lo, hi) {
                (Some(lo), Some(hi)) if lo == hi => AstExpr::Int(lo),
                _ => AstExpr::Id(id_name(&id)),
            };
            scope.introduce(id, name);
        }
        scope
    }

    fn mapping(&self, member: &BandMember, scaled: bool) -> Mapping {
        let found = self.distributed.iter().find(|(m, _, _)| m.kind == member.kind && m.schedule == member.schedule);
        match found {
            Some((_, id, size)) => {
                let style = if self.options.wrap { Style::Wrap } else { Style::Quotient { scaled } };
                Mapping::Cyclic { id: id.clone(), size: *size, style }
            }
            None => Mapping::Plain,
        }
    }

    fn tiled_index(&self, member: &BandMember) -> Result<usize> {
        self.kernel
            .tile
            .iter()
            .position(|m| m.schedule == member.schedule)
            .context(ForeignMemberSnafu { id: self.kernel.id })
    }

    fn members(&mut self, members: &[BandMember], child: &Arc<ScheduleNode>, scope: &Scope, level: usize) -> Result<AstNode> {
        let Some((member, rest)) = members.split_first() else {
            return self.walk(child, scope, level);
        };
        match member.kind {
            MemberKind::Tile { .. } => {
                let k = self.tiled_index(member)?;
                let coord = coords::tile(k);
                let name = loop_name(self.kernel.tile_first() + k);
                let mapping = self.mapping(member, self.options.scale_tile_loops);
                self.around(level, scope, |generator, scope| {
                    let Some((header, inner)) = scope.enter(&scope.instances(), &coord, name, mapping)? else {
                        generator.skip(rest, child);
                        return Ok(AstNode::block(vec![]));
                    };
                    let body = generator.members(rest, child, &inner, level + 1)?;
                    Ok(header.wrap(body, member.loop_type))
                })
            }
            MemberKind::Point { .. } => {
                let k = self.tiled_index(member)?;
                let name = loop_name(self.kernel.shared_len() + k);
                let mapping = self.mapping(member, false);
                self.nested(&coords::point(k), name, mapping, member, rest, child, scope, level)
            }
            MemberKind::Plain => {
                let j = self.deeper;
                self.deeper += 1;
                let name = loop_name(self.kernel.shared_len() + self.kernel.tile_len() + j);
                self.nested(&coords::deeper(j), name, Mapping::Plain, member, rest, child, scope, level)
            }
        }
    }

    fn nested(
        &mut self,
        coord: &Var,
        name: Var,
        mapping: Mapping,
        member: &BandMember,
        rest: &[BandMember],
        child: &Arc<ScheduleNode>,
        scope: &Scope,
        level: usize,
    ) -> Result<AstNode> {
        let Some((header, inner)) = scope.enter(&scope.instances(), coord, name, mapping)? else {
            self.skip(rest, child);
            return Ok(AstNode::block(vec![]));
        };
        let body = self.members(rest, child, &inner, level)?;
        Ok(header.wrap(body, member.loop_type))
    }

    /// Account for the untiled members of a subtree that generates nothing.
    fn skip(&mut self, members: &[BandMember], child: &Arc<ScheduleNode>) {
        let mut count = members.iter().filter(|m| m.kind == MemberKind::Plain).count();
        child.visit(&mut |n| {
            if let ScheduleNode::Band { band, .. } = n {
                count += band.members.iter().filter(|m| m.kind == MemberKind::Plain).count();
            }
        });
        self.deeper += count;
    }

    /// Operations at `level` ordered before and after `inner`.
    fn around(
        &mut self,
        level: usize,
        scope: &Scope,
        inner: impl FnOnce(&mut Self, &Scope) -> Result<AstNode>,
    ) -> Result<AstNode> {
        let copies = self.copies;
        let mut nodes = Vec::new();
        for op in copies.at_level(level).filter(|op| op.order < 0) {
            nodes.push(self.operation(op, scope)?);
        }
        nodes.push(inner(self, scope)?);
        for op in copies.at_level(level).filter(|op| op.order > 0) {
            nodes.push(self.operation(op, scope)?);
        }
        Ok(AstNode::block(nodes))
    }

    fn operation(&self, op: &CopyOp, scope: &Scope) -> Result<AstNode> {
        match op.kind {
            OpKind::Sync => Ok(AstNode::sync()),
            OpKind::Copy { direction, array, group } => self.copy(direction, array, group, &op.retained, scope),
            OpKind::Compute => Ok(AstNode::block(vec![])),
        }
    }

    /// One user node per statement still executing.
    fn statements(&self, scope: &Scope) -> Result<AstNode> {
        let mut nodes = Vec::with_capacity(scope.stmts.len());
        for (id, instances) in &scope.stmts {
            let stmt = self.scop.statement(id).context(IrSnafu)?;
            let relation = self.kernel.relation(self.scop, id, body_coords()).context(ScheduleSnafu)?;
            let iterators = invert_iterators(stmt, &relation)?;
            let annotation = statement_annotation(self.kernel, self.arrays, stmt, &iterators, scope)?;
            let user = AstNode::User { expr: statement_call(stmt, &iterators, scope), annotation };
            nodes.push(AstNode::guarded(scope.condition(instances), user));
        }
        Ok(AstNode::block(nodes))
    }
}
