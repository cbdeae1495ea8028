use std::collections::BTreeSet;
use std::sync::Arc;

use tessera_ir::{
    Filter, IdFilter, KernelId, LoopType, Mark, MemberKind, Reference, ScheduleNode, Scop, Statement,
};
use tessera_poly::{LinExpr, SymBound, Var};

use crate::carve::{carve_kernels, kernel_subtree, unroll_point_members};
use crate::config::GpuOptions;
use crate::context::GenContext;
use crate::error::Error;
use crate::test::helpers::*;

fn nested_scop(outer_permutable: bool) -> Scop {
    let stmt = Statement::new("S", vec![Var::new("i"), Var::new("j")], box_domain(&[("i", 0, 4), ("j", 0, 16)]))
        .with_ref(Reference::write("w0", "A", vec![LinExpr::var("i"), LinExpr::var("j")]));
    let deps = live(&stmt, &[], &["w0"]);
    let inner = band(vec![member("S", "j", true)], true, ScheduleNode::leaf());
    let tree = rooted(std::slice::from_ref(&stmt), band(vec![member("S", "i", false)], outer_permutable, inner));
    Scop::builder().arrays(vec![array("A", &[4, 16])]).statements(vec![stmt]).deps(deps).schedule(tree).build().unwrap()
}

fn loop_types(tree: &ScheduleNode) -> Vec<(MemberKind, LoopType)> {
    let mut out = Vec::new();
    tree.visit(&mut |node| {
        if let ScheduleNode::Band { band, .. } = node {
            out.extend(band.members.iter().map(|m| (m.kind, m.loop_type)));
        }
    });
    out
}

#[test]
fn test_single_parallel_loop_becomes_one_kernel() {
    let scop = scop_a10();
    let options = options(32, 32);
    let mut ctx = GenContext::new(&scop, &options);
    let carving = carve_kernels(&mut ctx, &scop.schedule).unwrap();

    assert!(carving.parallel);
    assert_eq!(carving.prefix_len, 0);
    assert_eq!(carving.kernels.len(), 1);
    assert_eq!(carving.tree.kernel_ids(), vec![KernelId(0)]);

    let kernel = &carving.kernels[0];
    assert_eq!(kernel.tile_sizes, vec![32]);
    assert_eq!(kernel.grid_sizes, vec![1]);
    assert_eq!(kernel.block_sizes, vec![32]);
    assert_eq!(kernel.tile_len(), 1);
    assert_eq!(kernel.space_name(), "S");
}

#[test]
fn test_effective_sizes_never_exceed_configured() {
    let scop = scop_a10();
    let options = options(32, 32);
    let mut ctx = GenContext::new(&scop, &options);
    let carving = carve_kernels(&mut ctx, &scop.schedule).unwrap();
    let kernel = &carving.kernels[0];

    // Ten iterations fit in one block of ten threads.
    assert_eq!(kernel.grid_dim.iter().map(SymBound::as_constant).collect::<Vec<_>>(), vec![Some(1)]);
    assert_eq!(kernel.block_dim.iter().map(SymBound::as_constant).collect::<Vec<_>>(), vec![Some(10)]);
}

#[test]
fn test_effective_block_size_capped_by_tile() {
    let scop = scop_vector_add();
    let options = GpuOptions::builder()
        .tile_size(16)
        .sizes("{ kernel[0] -> grid[2]; kernel[0] -> block[64] }".parse().unwrap())
        .build();
    let mut ctx = GenContext::new(&scop, &options);
    let carving = carve_kernels(&mut ctx, &scop.schedule).unwrap();
    let kernel = &carving.kernels[0];

    assert_eq!(kernel.grid_dim[0].as_constant(), Some(2));
    assert_eq!(kernel.block_dim[0].as_constant(), Some(16));
}

#[test]
fn test_effective_block_size_counts_later_tiles() {
    // The first tile only holds points 25..32, later tiles start at point 0.
    let scop = scop_offset_range(25, 100);
    let options = GpuOptions::builder()
        .tile_size(32)
        .sizes("{ kernel[0] -> grid[4]; kernel[0] -> block[20] }".parse().unwrap())
        .build();
    let mut ctx = GenContext::new(&scop, &options);
    let carving = carve_kernels(&mut ctx, &scop.schedule).unwrap();
    let kernel = &carving.kernels[0];

    assert_eq!(kernel.grid_dim[0].as_constant(), Some(4));
    assert_eq!(kernel.block_dim[0].as_constant(), Some(20));
}

#[test]
fn test_effective_block_size_within_first_tile() {
    let scop = scop_offset_range(36, 40);
    let options = GpuOptions::builder()
        .tile_size(32)
        .sizes("{ kernel[0] -> grid[4]; kernel[0] -> block[20] }".parse().unwrap())
        .build();
    let mut ctx = GenContext::new(&scop, &options);
    let carving = carve_kernels(&mut ctx, &scop.schedule).unwrap();
    let kernel = &carving.kernels[0];

    // Points 4..8 of tile 1 run on threads 4..8 of block 1.
    assert_eq!(kernel.grid_dim[0].as_constant(), Some(2));
    assert_eq!(kernel.block_dim[0].as_constant(), Some(8));
}

#[test]
fn test_used_sizes_are_recorded() {
    let scop = scop_a10();
    let options = options(32, 32);
    let mut ctx = GenContext::new(&scop, &options);
    carve_kernels(&mut ctx, &scop.schedule).unwrap();
    assert_eq!(ctx.used_sizes().to_string(), "{ kernel[0] -> tile[32]; kernel[0] -> grid[1]; kernel[0] -> block[32] }");
}

#[test]
fn test_carving_a_carved_tree_is_a_no_op() {
    let scop = scop_a10();
    let options = options(32, 32);
    let mut ctx = GenContext::new(&scop, &options);
    let first = carve_kernels(&mut ctx, &scop.schedule).unwrap();
    let second = carve_kernels(&mut ctx, &first.tree).unwrap();

    assert!(Arc::ptr_eq(&first.tree, &second.tree));
    assert!(second.kernels.is_empty());
    assert!(second.parallel);
}

#[test]
fn test_enclosing_band_becomes_atomic() {
    let scop = nested_scop(false);
    let options = options(32, 32);
    let mut ctx = GenContext::new(&scop, &options);
    let carving = carve_kernels(&mut ctx, &scop.schedule).unwrap();

    let kernel = &carving.kernels[0];
    assert_eq!(kernel.tile_first(), 1);
    assert_eq!(carving.prefix_len, 1);

    let ScheduleNode::Domain { child, .. } = carving.tree.as_ref() else { panic!("expected domain root") };
    let ScheduleNode::Band { band, child } = child.as_ref() else { panic!("expected host band") };
    assert!(band.members.iter().all(|m| m.loop_type == LoopType::Atomic));
    assert!(matches!(child.as_ref(), ScheduleNode::Guard { .. }));
}

#[test]
fn test_permutable_band_without_parallel_member_is_host() {
    let scop = nested_scop(true);
    let options = options(32, 32);
    let mut ctx = GenContext::new(&scop, &options);
    let carving = carve_kernels(&mut ctx, &scop.schedule).unwrap();
    assert_eq!(carving.kernels[0].host.len(), 1);
    assert_eq!(carving.kernels[0].tile.len(), 1);
}

#[test]
fn test_leaf_without_band_is_zero_dimensional_kernel() {
    let stmt = Statement::new("S", vec![], Default::default()).with_ref(Reference::write("w0", "x", vec![]));
    let scop = Scop::builder().arrays(vec![scalar("x")]).statements(vec![stmt]).build().unwrap();
    let options = GpuOptions::default();
    let mut ctx = GenContext::new(&scop, &options);
    let carving = carve_kernels(&mut ctx, &scop.schedule).unwrap();

    assert!(!carving.parallel);
    assert_eq!(carving.kernels.len(), 1);
    let kernel = &carving.kernels[0];
    assert!(!kernel.parallel);
    assert_eq!(kernel.tile_len(), 0);
    assert!(kernel.grid_dim.is_empty() && kernel.block_dim.is_empty());
    assert!(ctx.used_sizes().get(KernelId(0)).is_some_and(|s| s.tile.is_none()));
}

#[test]
fn test_modulo_filter_outside_kernel_is_rejected() {
    let scop = scop_a10();
    let filter = Filter::Modulo(IdFilter { ids: vec![Var::new("b")], sizes: vec![4], members: vec![member("S", "i", true)] });
    let tree = ScheduleNode::filter(filter, ScheduleNode::leaf());
    let options = GpuOptions::default();
    let mut ctx = GenContext::new(&scop, &options);
    let err = carve_kernels(&mut ctx, &tree).unwrap_err();
    assert!(matches!(err, Error::Ir { .. }), "{err}");
}

#[test]
fn test_kernel_subtree_lookup() {
    let scop = scop_a10();
    let options = options(32, 32);
    let mut ctx = GenContext::new(&scop, &options);
    let carving = carve_kernels(&mut ctx, &scop.schedule).unwrap();

    let subtree = kernel_subtree(&carving.tree, KernelId(0)).unwrap();
    assert!(matches!(subtree.as_ref(), ScheduleNode::Mark { mark: Mark::Kernel(KernelId(0)), .. }));
    assert!(matches!(kernel_subtree(&carving.tree, KernelId(7)), Err(Error::KernelNotFound { .. })));
}

#[test]
fn test_unrolled_point_members_move_innermost() {
    let scop = scop_row_sum();
    let options = options(32, 32);
    let mut ctx = GenContext::new(&scop, &options);
    let carving = carve_kernels(&mut ctx, &scop.schedule).unwrap();

    let unrolled = unroll_point_members(&carving.tree, KernelId(0), &BTreeSet::from([1])).unwrap();
    let types = loop_types(&unrolled);
    let points: Vec<LoopType> =
        types.iter().filter(|(kind, _)| matches!(kind, MemberKind::Point { .. })).map(|(_, t)| *t).collect();
    assert_eq!(points, vec![LoopType::Default, LoopType::Unroll]);

    let unchanged = unroll_point_members(&carving.tree, KernelId(0), &BTreeSet::new()).unwrap();
    assert!(Arc::ptr_eq(&unchanged, &carving.tree));
}
