//! Scops and lookups shared by the code generation tests.

use std::sync::Arc;

use tessera_ir::{
    Annotation, ArrayDecl, AstNode, Band, BandMember, Dependences, ElementType, InstanceSet, RefTag, Reference,
    ScheduleNode, Scop, Statement, StmtId, TaggedInstances,
};
use tessera_poly::{Constraint, LinExpr, Polyhedron, Var};
use tessera_schedule::{GpuOptions, MemoryBudget};

use crate::program::{GpuProgram, Outcome, generate_gpu};

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

pub fn member(stmt: &str, value: &str, coincident: bool) -> BandMember {
    BandMember::new([(StmtId::new(stmt), LinExpr::var(value))]).coincident(coincident)
}

fn single(stmt: Statement, arrays: Vec<ArrayDecl>, members: Vec<BandMember>, reads: &[&str], writes: &[&str]) -> Scop {
    let tagged = |ids: &[&str]| {
        ids.iter().map(|id| TaggedInstances::new(RefTag::new(stmt.id.clone(), *id), stmt.domain.clone())).collect()
    };
    let deps = Dependences { live_in: tagged(reads), live_out: tagged(writes), ..Default::default() };
    let tree: Arc<ScheduleNode> = ScheduleNode::domain(
        InstanceSet::from_statements(std::slice::from_ref(&stmt)),
        ScheduleNode::band(Band::new(members, true), ScheduleNode::leaf()),
    );
    Scop::builder().arrays(arrays).statements(vec![stmt]).deps(deps).schedule(tree).build().unwrap()
}

/// `for i in 0..10: A[i] = f(A[i])` in one parallel band.
pub fn scop_a10() -> Scop {
    let stmt = Statement::new("S", vec![Var::new("i")], box_domain(&[("i", 0, 10)]))
        .with_ref(Reference::read("r0", "A", vec![LinExpr::var("i")]))
        .with_ref(Reference::write("w0", "A", vec![LinExpr::var("i")]));
    single(stmt, vec![array("A", &[10])], vec![member("S", "i", true)], &["r0"], &["w0"])
}

/// `for i in 0..100: sum = A[i]`.
pub fn scop_scalar_writer() -> Scop {
    let stmt = Statement::new("S", vec![Var::new("i")], box_domain(&[("i", 0, 100)]))
        .with_ref(Reference::read("r0", "A", vec![LinExpr::var("i")]))
        .with_ref(Reference::write("w0", "sum", vec![]));
    let sum = ArrayDecl::builder().name("sum").element(ElementType::F64).build();
    single(stmt, vec![array("A", &[100]), sum], vec![member("S", "i", true)], &["r0"], &["w0"])
}

/// `for i in 0..32, j in 0..8: C[i] = C[i] + A[i][j]` with `i` parallel.
pub fn scop_row_sum() -> Scop {
    let (i, j) = (LinExpr::var("i"), LinExpr::var("j"));
    let stmt = Statement::new("S", vec![Var::new("i"), Var::new("j")], box_domain(&[("i", 0, 32), ("j", 0, 8)]))
        .with_ref(Reference::read("r0", "C", vec![i.clone()]))
        .with_ref(Reference::read("r1", "A", vec![i.clone(), j]))
        .with_ref(Reference::write("w0", "C", vec![i]));
    single(
        stmt,
        vec![array("A", &[32, 8]), array("C", &[32])],
        vec![member("S", "i", true), member("S", "j", false)],
        &["r0", "r1"],
        &["w0"],
    )
}

/// `for i in 0..64: C[i] = A[i] + B[i]`.
pub fn scop_vector_add() -> Scop {
    let i = LinExpr::var("i");
    let stmt = Statement::new("S", vec![Var::new("i")], box_domain(&[("i", 0, 64)]))
        .with_ref(Reference::read("r0", "A", vec![i.clone()]))
        .with_ref(Reference::read("r1", "B", vec![i.clone()]))
        .with_ref(Reference::write("w0", "C", vec![i]));
    single(
        stmt,
        vec![array("A", &[64]), array("B", &[64]), array("C", &[64])],
        vec![member("S", "i", true)],
        &["r0", "r1"],
        &["w0"],
    )
}

/// `for i in 0..10: A[i] = A[i - 1]`, a band with no parallel member.
pub fn scop_recurrence() -> Scop {
    let i = LinExpr::var("i");
    let stmt = Statement::new("S", vec![Var::new("i")], box_domain(&[("i", 1, 10)]))
        .with_ref(Reference::read("r0", "A", vec![i.clone() - 1]))
        .with_ref(Reference::write("w0", "A", vec![i]));
    single(stmt, vec![array("A", &[10])], vec![member("S", "i", false)], &["r0"], &["w0"])
}

/// `for i in 0..8, j in 0..4: B[i] = A[i][j]` scheduled over `i` only.
pub fn scop_unscheduled_iterator() -> Scop {
    let (i, j) = (LinExpr::var("i"), LinExpr::var("j"));
    let stmt = Statement::new("S", vec![Var::new("i"), Var::new("j")], box_domain(&[("i", 0, 8), ("j", 0, 4)]))
        .with_ref(Reference::read("r0", "A", vec![i.clone(), j]))
        .with_ref(Reference::write("w0", "B", vec![i]));
    single(stmt, vec![array("A", &[8, 4]), array("B", &[8])], vec![member("S", "i", true)], &["r0"], &["w0"])
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

pub fn device(scop: &Scop, options: &GpuOptions) -> GpuProgram {
    match generate_gpu(scop, options).unwrap() {
        Outcome::Device(program) => program,
        Outcome::NoParallelism { .. } => panic!("expected a device program"),
    }
}

/// Copy annotations as `(read, array, local, global index, local index)`.
pub fn copies(tree: &AstNode) -> Vec<(bool, String, String, String, String)> {
    tree.annotations()
        .into_iter()
        .filter_map(|a| match a {
            Annotation::Copy { read, array, local, global_index, local_index } => {
                Some((*read, array.clone(), local.clone(), global_index.to_string(), local_index.to_string()))
            }
            _ => None,
        })
        .collect()
}

/// One letter per user node in program order: `r`ead, `w`rite, `s`ync,
/// `S`tatement.
pub fn shape(tree: &AstNode) -> String {
    tree.annotations()
        .into_iter()
        .map(|a| match a {
            Annotation::Copy { read: true, .. } => 'r',
            Annotation::Copy { read: false, .. } => 'w',
            Annotation::Sync => 's',
            Annotation::Statement { .. } => 'S',
        })
        .collect()
}

/// Rewritten references of the statement user nodes, by reference id.
pub fn statement_refs(tree: &AstNode) -> std::collections::BTreeMap<String, String> {
    tree.annotations()
        .into_iter()
        .filter_map(|a| match a {
            Annotation::Statement { ref2expr, .. } => Some(ref2expr),
            _ => None,
        })
        .flat_map(|refs| refs.iter().map(|(id, expr)| (id.to_string(), expr.to_string())))
        .collect()
}

/// Copy annotations of `array` found below a loop.
pub fn copies_in_loops(tree: &AstNode, array: &str) -> usize {
    let mut count = 0;
    tree.visit(&mut |node| {
        if let AstNode::For { body, .. } = node {
            count += body
                .annotations()
                .iter()
                .filter(|a| matches!(a, Annotation::Copy { array: name, .. } if name == array))
                .count();
        }
    });
    count
}
