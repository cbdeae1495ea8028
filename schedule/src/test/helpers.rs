//! Scop builders shared by the mapping tests.

use std::sync::Arc;

use tessera_ir::{
    ArrayDecl, Band, BandMember, Dependences, ElementType, InstanceSet, RefTag, Reference, ScheduleNode, Scop,
    Statement, StmtId, TaggedInstances,
};
use tessera_poly::{Constraint, LinExpr, Polyhedron, Var};

use crate::config::{GpuOptions, MemoryBudget};

/// `lo <= var < hi` for every entry.
pub fn box_domain(ranges: &[(&str, i64, i64)]) -> Polyhedron {
    Polyhedron::from_constraints(
        ranges.iter().flat_map(|&(v, lo, hi)| [Constraint::ge(LinExpr::var(v), lo), Constraint::lt(LinExpr::var(v), hi)]),
    )
}

pub fn array(name: &str, sizes: &[i64]) -> ArrayDecl {
    let sizes: Vec<LinExpr> = sizes.iter().map(|&s| LinExpr::constant(s)).collect();
    ArrayDecl::builder().name(name).n_index(sizes.len()).extent(ArrayDecl::box_extent(&sizes)).build()
}

pub fn scalar(name: &str) -> ArrayDecl {
    ArrayDecl::builder().name(name).element(ElementType::F64).build()
}

pub fn member(stmt: &str, value: &str, coincident: bool) -> BandMember {
    BandMember::new([(StmtId::new(stmt), LinExpr::var(value))]).coincident(coincident)
}

/// Domain root over every statement with the given subtree below it.
pub fn rooted(statements: &[Statement], child: Arc<ScheduleNode>) -> Arc<ScheduleNode> {
    ScheduleNode::domain(InstanceSet::from_statements(statements), child)
}

pub fn band(members: Vec<BandMember>, permutable: bool, child: Arc<ScheduleNode>) -> Arc<ScheduleNode> {
    ScheduleNode::band(Band::new(members, permutable), child)
}

/// Every reference of `stmt` with the given ids as live-in (reads) or
/// live-out (writes) over the whole domain.
pub fn live(stmt: &Statement, reads: &[&str], writes: &[&str]) -> Dependences {
    let tagged = |ids: &[&str]| {
        ids.iter().map(|id| TaggedInstances::new(RefTag::new(stmt.id.clone(), *id), stmt.domain.clone())).collect()
    };
    Dependences { live_in: tagged(reads), live_out: tagged(writes), ..Default::default() }
}

/// `for i in 0..10: A[i] = f(A[i])` in one parallel band.
pub fn scop_a10() -> Scop {
    let stmt = Statement::new("S", vec![Var::new("i")], box_domain(&[("i", 0, 10)]))
        .with_ref(Reference::read("r0", "A", vec![LinExpr::var("i")]))
        .with_ref(Reference::write("w0", "A", vec![LinExpr::var("i")]));
    let deps = live(&stmt, &["r0"], &["w0"]);
    let tree = rooted(std::slice::from_ref(&stmt), band(vec![member("S", "i", true)], true, ScheduleNode::leaf()));
    Scop::builder().arrays(vec![array("A", &[10])]).statements(vec![stmt]).deps(deps).schedule(tree).build().unwrap()
}

/// `for i in 0..100: sum = A[i]`: a scalar written by every iteration.
pub fn scop_scalar_writer() -> Scop {
    let stmt = Statement::new("S", vec![Var::new("i")], box_domain(&[("i", 0, 100)]))
        .with_ref(Reference::read("r0", "A", vec![LinExpr::var("i")]))
        .with_ref(Reference::write("w0", "sum", vec![]));
    let deps = live(&stmt, &["r0"], &["w0"]);
    let tree = rooted(std::slice::from_ref(&stmt), band(vec![member("S", "i", true)], true, ScheduleNode::leaf()));
    Scop::builder()
        .arrays(vec![array("A", &[100]), scalar("sum")])
        .statements(vec![stmt])
        .deps(deps)
        .schedule(tree)
        .build()
        .unwrap()
}

/// `for i in 0..32, j in 0..8: C[i] = C[i] + A[i][j]` with `i` parallel.
pub fn scop_row_sum() -> Scop {
    let (i, j) = (LinExpr::var("i"), LinExpr::var("j"));
    let stmt = Statement::new("S", vec![Var::new("i"), Var::new("j")], box_domain(&[("i", 0, 32), ("j", 0, 8)]))
        .with_ref(Reference::read("r0", "C", vec![i.clone()]))
        .with_ref(Reference::read("r1", "A", vec![i.clone(), j]))
        .with_ref(Reference::write("w0", "C", vec![i]));
    let deps = live(&stmt, &["r0", "r1"], &["w0"]);
    let tree = rooted(
        std::slice::from_ref(&stmt),
        band(vec![member("S", "i", true), member("S", "j", false)], true, ScheduleNode::leaf()),
    );
    Scop::builder()
        .arrays(vec![array("A", &[32, 8]), array("C", &[32])])
        .statements(vec![stmt])
        .deps(deps)
        .schedule(tree)
        .build()
        .unwrap()
}

/// `for i in 0..64: C[i] = A[i] + B[i]`.
pub fn scop_vector_add() -> Scop {
    let i = LinExpr::var("i");
    let stmt = Statement::new("S", vec![Var::new("i")], box_domain(&[("i", 0, 64)]))
        .with_ref(Reference::read("r0", "A", vec![i.clone()]))
        .with_ref(Reference::read("r1", "B", vec![i.clone()]))
        .with_ref(Reference::write("w0", "C", vec![i]));
    let deps = live(&stmt, &["r0", "r1"], &["w0"]);
    let tree = rooted(std::slice::from_ref(&stmt), band(vec![member("S", "i", true)], true, ScheduleNode::leaf()));
    Scop::builder()
        .arrays(vec![array("A", &[64]), array("B", &[64]), array("C", &[64])])
        .statements(vec![stmt])
        .deps(deps)
        .schedule(tree)
        .build()
        .unwrap()
}

/// `for i in lo..hi: B[i] = A[i]` over arrays of `hi` elements.
pub fn scop_offset_range(lo: i64, hi: i64) -> Scop {
    let i = LinExpr::var("i");
    let stmt = Statement::new("S", vec![Var::new("i")], box_domain(&[("i", lo, hi)]))
        .with_ref(Reference::read("r0", "A", vec![i.clone()]))
        .with_ref(Reference::write("w0", "B", vec![i]));
    let deps = live(&stmt, &["r0"], &["w0"]);
    let tree = rooted(std::slice::from_ref(&stmt), band(vec![member("S", "i", true)], true, ScheduleNode::leaf()));
    Scop::builder()
        .arrays(vec![array("A", &[hi]), array("B", &[hi])])
        .statements(vec![stmt])
        .deps(deps)
        .schedule(tree)
        .build()
        .unwrap()
}

/// One kernel tiled by `tile` with a single block of `block` threads.
pub fn options(tile: i64, block: i64) -> GpuOptions {
    GpuOptions::builder()
        .tile_size(tile)
        .sizes(format!("{{ kernel[0] -> grid[1]; kernel[0] -> block[{block}] }}").parse().unwrap())
        .build()
}

pub fn options_with_budget(tile: i64, block: i64, bytes: usize) -> GpuOptions {
    GpuOptions { shared_memory: MemoryBudget::Bytes(bytes), ..options(tile, block) }
}
