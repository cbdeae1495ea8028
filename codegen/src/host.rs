//! Host tree generation: loops around kernel launches.

use std::sync::Arc;

use snafu::{OptionExt, ResultExt};
use tessera_ir::error::{MissingScheduleSnafu, UnsupportedNodeSnafu};
use tessera_ir::{AstExpr, AstNode, BandMember, Filter, KernelId, Mark, ScheduleNode, Scop};
use tessera_poly::{Constraint, Set, SymBound};
use tessera_schedule::{GpuOptions, GpuSchedule, KernelVar, coords};
use tracing::{debug, trace};

use crate::error::*;
use crate::kernel::KernelGen;
use crate::scan::{Mapping, Scope, id_name, loop_name};

/// What a printer needs to declare and launch one kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelInfo {
    pub id: KernelId,
    pub tile_sizes: Vec<i64>,
    /// Launch sizes in terms of the parameters and the enclosing host loops.
    pub grid: Vec<AstExpr>,
    pub block: Vec<AstExpr>,
    pub block_ids: Vec<String>,
    pub thread_ids: Vec<String>,
    /// On-chip variables to declare.
    pub vars: Vec<KernelVar>,
    /// Global arrays the kernel accesses.
    pub arrays: Vec<String>,
}

pub struct HostGen<'a> {
    scop: &'a Scop,
    options: &'a GpuOptions,
    schedule: &'a GpuSchedule,
    pub kernels: Vec<KernelInfo>,
}

impl<'a> HostGen<'a> {
    pub fn new(scop: &'a Scop, options: &'a GpuOptions, schedule: &'a GpuSchedule) -> Self {
        Self { scop, options, schedule, kernels: Vec::new() }
    }

    pub fn generate(&mut self) -> Result<AstNode> {
        let scope = Scope::new(self.scop.param_set(), self.scop.context.clone());
        let schedule = self.schedule;
        self.walk(&schedule.tree, &scope, 0)
    }

    fn walk(&mut self, node: &Arc<ScheduleNode>, scope: &Scope, depth: usize) -> Result<AstNode> {
        match node.as_ref() {
            ScheduleNode::Domain { domain, child } => {
                let mut scope = scope.clone();
                scope.stmts = domain
                    .iter()
                    .map(|(stmt, set)| (stmt.clone(), set.intersect_poly(&self.scop.context)))
                    .filter(|(_, set)| !set.is_empty())
                    .collect();
                self.walk(child, &scope, depth)
            }
            ScheduleNode::Filter { filter: Filter::Instances(filter), child } => {
                let narrowed = scope.narrow(filter);
                if narrowed.stmts.is_empty() {
                    return Ok(AstNode::block(vec![]));
                }
                self.walk(child, &narrowed, depth)
            }
            ScheduleNode::Band { band, child } => self.members(&band.members, child, scope, depth),
            ScheduleNode::Sequence { children } | ScheduleNode::Set { children } => {
                let nodes = children.iter().map(|c| self.walk(c, scope, depth)).collect::<Result<Vec<_>>>()?;
                Ok(AstNode::block(nodes))
            }
            ScheduleNode::Guard { guard, child } => {
                let body = self.walk(child, scope, depth)?;
                Ok(AstNode::guarded(scope.condition(&Set::from_poly(guard.clone())), body))
            }
            ScheduleNode::Context { context, child } => {
                let mut scope = scope.clone();
                scope.assume(context.constraints().iter().cloned());
                self.walk(child, &scope, depth)
            }
            ScheduleNode::Mark { mark: Mark::Kernel(id), .. } => self.launch(*id, node, scope),
            ScheduleNode::Leaf if scope.stmts.is_empty() => Ok(AstNode::block(vec![])),
            ScheduleNode::Leaf => UnsupportedNodeSnafu { kind: "leaf", location: "outside a kernel" }.fail().context(IrSnafu),
            ScheduleNode::Filter { filter: Filter::Modulo(_), .. } => {
                UnsupportedNodeSnafu { kind: "id filter", location: "outside a kernel" }.fail().context(IrSnafu)
            }
            ScheduleNode::Mark { mark: Mark::Thread, .. } => {
                UnsupportedNodeSnafu { kind: "thread mark", location: "outside a kernel" }.fail().context(IrSnafu)
            }
        }
    }

    fn members(&mut self, members: &[BandMember], child: &Arc<ScheduleNode>, scope: &Scope, depth: usize) -> Result<AstNode> {
        let Some((member, rest)) = members.split_first() else {
            return self.walk(child, scope, depth);
        };
        let coord = coords::host(depth);
        let mut pinned = scope.clone();
        for (stmt, set) in &mut pinned.stmts {
            let value = member.value(stmt).context(MissingScheduleSnafu { stmt: stmt.clone(), member: depth }).context(IrSnafu)?;
            *set = set.with(&Constraint::eq(coord.clone(), value.clone()));
        }
        let Some((header, inner)) = pinned.enter(&pinned.instances(), &coord, loop_name(depth), Mapping::Plain)? else {
            return Ok(AstNode::block(vec![]));
        };
        let body = self.members(rest, child, &inner, depth + 1)?;
        Ok(header.wrap(body, member.loop_type))
    }

    fn launch(&mut self, id: KernelId, node: &Arc<ScheduleNode>, scope: &Scope) -> Result<AstNode> {
        let (kernel, copies) = self.schedule.kernel(id).context(MissingKernelSnafu { id })?;
        let body = KernelGen::new(self.scop, self.options, &self.schedule.arrays, kernel, copies).generate(node, scope)?;

        let sizes = |dims: &[SymBound], fallback: &[i64]| -> Vec<AstExpr> {
            dims.iter().zip(fallback).map(|(dim, size)| scope.bound_expr(dim).unwrap_or(AstExpr::Int(*size))).collect()
        };
        let grid = sizes(&kernel.grid_dim, &kernel.grid_sizes);
        let block = sizes(&kernel.block_dim, &kernel.block_sizes);
        trace!(kernel.id = %id, grid = ?grid, block = ?block, "launch");

        self.kernels.push(KernelInfo {
            id,
            tile_sizes: kernel.tile_sizes.clone(),
            grid: grid.clone(),
            block: block.clone(),
            block_ids: kernel.block_ids().iter().map(|v| id_name(v).to_string()).collect(),
            thread_ids: kernel.thread_ids().iter().map(|v| id_name(v).to_string()).collect(),
            vars: kernel.vars.clone(),
            arrays: kernel.arrays.iter().map(|a| a.name.clone()).collect(),
        });
        debug!(kernel.id = %id, vars = kernel.vars.len(), "launched kernel");
        Ok(AstNode::Kernel { id, grid, block, body: Box::new(body) })
    }
}
