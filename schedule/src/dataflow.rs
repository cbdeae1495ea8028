//! Dataflow queries: which accesses of a group must go through global
//! memory, and which array elements move between host and device.

use std::collections::{BTreeMap, BTreeSet};

use snafu::ResultExt;
use tessera_ir::{RefTag, Scop, StmtId};
use tessera_poly::{Constraint, Polyhedron, Set, Var};
use tracing::{debug, instrument, trace};

use crate::array::ArrayInfo;
use crate::context::GenContext;
use crate::coords;
use crate::diagnostic::Diagnostic;
use crate::error::*;
use crate::group::RefGroup;
use crate::kernel::{Coords, Kernel};

/// Direction of a copy between global and on-chip memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    /// Global to on-chip, before the accesses.
    Read,
    /// On-chip to global, after the accesses.
    Write,
}

/// Statement instances per reference, over the statement iterators and
/// parameters.
pub type TaggedSets = BTreeMap<RefTag, Set>;

/// Whether any reference keeps an instance that may exist.
pub fn any_instances(sets: &TaggedSets) -> bool {
    sets.values().any(|s| !s.is_empty())
}

// ============================================================================
// LOCAL ACCESS REMOVAL
// ============================================================================

/// Schedule coordinates fixed for one copy of `group`.
fn copy_coords(kernel: &Kernel, group: &RefGroup) -> Vec<Var> {
    let tile_dims = group.copy_level(kernel).min(kernel.tile_len());
    kernel.host_vars().into_iter().chain((0..tile_dims).map(coords::tile)).collect()
}

/// Pair relation of a dependence: source instances with primed sink
/// instances, tied to their kernel coordinates.
fn kernel_pairs(kernel: &Kernel, scop: &Scop, source: &StmtId, sink: &StmtId, relation: &Polyhedron) -> Result<Polyhedron> {
    let source_rel = kernel.relation(scop, source, Coords::per_block())?;
    let sink_rel = kernel.primed_relation(scop, sink, Coords::per_block())?;
    Ok(relation.intersect(&source_rel).intersect(&sink_rel))
}

/// Pairs executed in the same iteration of every coordinate in `fixed`.
fn same_iteration(pairs: &Polyhedron, fixed: &[Var]) -> Polyhedron {
    pairs.clone().with_all(fixed.iter().map(|v| Constraint::eq(v.clone(), coords::other(v))))
}

/// Pairs executed in different iterations of some coordinate in `fixed`:
/// equal on a prefix, then ordered one way or the other.
fn across_iterations(pairs: &Polyhedron, fixed: &[Var]) -> Set {
    let mut result = Set::empty();
    for (j, var) in fixed.iter().enumerate() {
        let prefix = same_iteration(pairs, &fixed[..j]);
        let other = coords::other(var);
        result.add_part(prefix.clone().with(Constraint::lt(var.clone(), other.clone())));
        result.add_part(prefix.with(Constraint::gt(var.clone(), other)));
    }
    result
}

/// Instances of one side of a pair set, unprimed when it is the sink.
fn side_instances(scop: &Scop, pairs: &Set, tag: &RefTag, sink: bool) -> Result<Set> {
    let stmt = scop.statement(&tag.stmt).context(IrSnafu)?;
    let mut keep: BTreeSet<Var> = scop.param_set();
    if sink {
        keep.extend(stmt.iterators.iter().map(Var::primed));
        let primed: BTreeMap<Var, Var> = stmt.iterators.iter().map(|v| (v.primed(), v.clone())).collect();
        let mut instances = Set::empty();
        for part in pairs.project_onto(&keep).parts() {
            instances.add_part(part.rename(|v| primed.get(v).cloned()));
        }
        Ok(instances)
    } else {
        keep.extend(stmt.iterators.iter().cloned());
        Ok(pairs.project_onto(&keep))
    }
}

/// Accesses of `group` in `direction` that must be copied: reads of values
/// produced outside the iteration of the copy level or live into the scop,
/// writes of values consumed outside it or live out of the scop.
///
/// When no dataflow stays within one iteration, every reference that takes
/// part in some dataflow or live range keeps all its instances.
#[instrument(skip_all, fields(kernel.id = %kernel.id, array = %group.array, group = group.nr, direction = %direction))]
pub fn retained_accesses(kernel: &Kernel, scop: &Scop, group: &RefGroup, direction: Direction) -> Result<TaggedSets> {
    let read = direction == Direction::Read;
    let mut refs = Vec::new();
    for tag in &group.refs {
        let (_, reference) = scop.reference(tag).context(IrSnafu)?;
        if (read && reference.read) || (!read && reference.write) {
            refs.push(tag.clone());
        }
    }
    if refs.is_empty() {
        return Ok(TaggedSets::new());
    }

    let fixed = copy_coords(kernel, group);
    let mut any_local = false;
    let mut external: BTreeMap<RefTag, Set> = BTreeMap::new();

    for dep in &scop.deps.flow {
        let mine = if read { &dep.sink } else { &dep.source };
        let inside = kernel.stmts.contains(&dep.source.stmt) && kernel.stmts.contains(&dep.sink.stmt);
        let both_in_group = group.refs.contains(&dep.source) && group.refs.contains(&dep.sink);

        let pairs = if inside && both_in_group {
            let pairs = kernel_pairs(kernel, scop, &dep.source.stmt, &dep.sink.stmt, &dep.relation)?;
            any_local |= !same_iteration(&pairs, &fixed).is_empty();
            across_iterations(&pairs, &fixed)
        } else {
            Set::from_poly(dep.relation.intersect(&scop.context))
        };

        if refs.contains(mine) {
            let instances = side_instances(scop, &pairs, mine, read)?;
            let entry = external.entry(mine.clone()).or_insert_with(Set::empty);
            *entry = entry.union(&instances);
        }
    }

    let live = if read { &scop.deps.live_in } else { &scop.deps.live_out };
    for tagged in live.iter().filter(|t| refs.contains(&t.tag)) {
        let entry = external.entry(tagged.tag.clone()).or_insert_with(Set::empty);
        *entry = entry.union(&Set::from_poly(tagged.instances.intersect(&scop.context)));
    }

    let mut retained = TaggedSets::new();
    for tag in refs {
        let Some(instances) = external.remove(&tag) else { continue };
        let stmt = scop.statement(&tag.stmt).context(IrSnafu)?;
        let domain = stmt.domain.intersect(&scop.context);
        let kept = if any_local { instances.intersect_poly(&domain) } else { Set::from_poly(domain) };
        trace!(reference = %tag, instances = ?kept, "retained accesses");
        retained.insert(tag, kept);
    }
    Ok(retained)
}

// ============================================================================
// HOST TRANSFERS
// ============================================================================

/// Elements of one array moved between host and device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayTransfer {
    pub array: String,
    /// Elements over the array dimensions and parameters.
    pub elements: Set,
}

/// Arrays whose contents may be observed after the scop.
pub fn compute_may_persist(arrays: &[ArrayInfo]) -> BTreeSet<String> {
    arrays.iter().filter(|a| a.may_persist()).map(|a| a.name.clone()).collect()
}

/// Data copied to the device before the first kernel and back after the
/// last one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transfers {
    pub copy_in: Vec<ArrayTransfer>,
    pub copy_out: Vec<ArrayTransfer>,
}

#[instrument(skip_all)]
pub fn compute_copy_in_and_out(ctx: &mut GenContext<'_>, arrays: &[ArrayInfo]) -> Result<Transfers> {
    let scop = ctx.scop;
    let persist = compute_may_persist(arrays);

    let mut live_in: BTreeMap<&str, Set> = BTreeMap::new();
    for tagged in &scop.deps.live_in {
        let (stmt, reference) = scop.reference(&tagged.tag).context(IrSnafu)?;
        let Some(array) = arrays.iter().find(|a| a.name == reference.array) else { continue };
        if array.declared_local {
            ctx.report(Diagnostic::PossiblyUninitialized { array: array.name.clone(), reference: tagged.tag.clone() });
            continue;
        }
        let image = scop.access_image(stmt, reference, &tagged.instances.intersect(&scop.context));
        let entry = live_in.entry(array.name.as_str()).or_insert_with(Set::empty);
        entry.add_part(image);
    }

    let mut transfers = Transfers::default();
    for array in arrays {
        let written = scop.references_to(&array.name).any(|(_, r)| r.write);
        let copied_out = written && persist.contains(&array.name);

        let mut copy_in = live_in.remove(array.name.as_str()).unwrap_or_else(Set::empty);
        if copied_out {
            // Elements not certainly overwritten keep their host value.
            let mut must_write = Set::empty();
            for (stmt, reference) in scop.references_to(&array.name).filter(|(_, r)| r.write && r.exact_write) {
                must_write.add_part(scop.access_image(stmt, reference, &scop.context));
            }
            copy_in = copy_in.union(&array.extent.subtract(&must_write));
            transfers.copy_out.push(ArrayTransfer { array: array.name.clone(), elements: array.extent.clone() });
        }
        let copy_in = copy_in.coalesce();
        if !copy_in.is_empty() {
            transfers.copy_in.push(ArrayTransfer { array: array.name.clone(), elements: copy_in });
        }
    }
    debug!(copy_in = transfers.copy_in.len(), copy_out = transfers.copy_out.len(), "host transfers");
    Ok(transfers)
}
