use tessera_ir::AstNode;
use tessera_schedule::GpuOptions;

use crate::test::helpers::*;

#[test]
fn test_in_place_update_goes_through_shared_memory() {
    let program = device(&scop_a10(), &options(32, 32));

    assert_eq!(shape(&program.tree), "rsSsw");
    assert_eq!(
        copies(&program.tree),
        vec![
            (true, "A".to_string(), "shared_A".to_string(), "A[t0]".to_string(), "shared_A[t0]".to_string()),
            (false, "A".to_string(), "shared_A".to_string(), "A[t0]".to_string(), "shared_A[t0]".to_string()),
        ]
    );

    let refs = statement_refs(&program.tree);
    assert_eq!(refs["r0"], "shared_A[t0]");
    assert_eq!(refs["w0"], "shared_A[t0]");
}

#[test]
fn test_single_block_needs_no_tile_loop() {
    let program = device(&scop_a10(), &options(32, 32));
    let mut loops = 0;
    program.tree.visit(&mut |node| {
        if matches!(node, AstNode::For { .. }) {
            loops += 1;
        }
    });
    assert_eq!(loops, 0, "{}", program.tree);
}

#[test]
fn test_kernel_info() {
    let program = device(&scop_a10(), &options(32, 32));
    assert_eq!(program.kernels.len(), 1);
    assert_eq!(program.tree.kernels().len(), 1);

    let info = &program.kernels[0];
    assert_eq!(info.block_ids, vec!["b0"]);
    assert_eq!(info.thread_ids, vec!["t0"]);
    assert_eq!(info.grid.iter().map(ToString::to_string).collect::<Vec<_>>(), vec!["1"]);
    assert_eq!(info.block.iter().map(ToString::to_string).collect::<Vec<_>>(), vec!["10"]);
    assert_eq!(info.vars.iter().map(|v| v.name.as_str()).collect::<Vec<_>>(), vec!["shared_A"]);
    assert_eq!(info.arrays, vec!["A"]);
}

#[test]
fn test_scalar_written_once_after_the_loop() {
    let program = device(&scop_scalar_writer(), &options(32, 32));

    let writes: Vec<_> = copies(&program.tree).into_iter().filter(|(read, ..)| !read).collect();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].1, "sum");
    assert_eq!(copies_in_loops(&program.tree, "sum"), 0, "{}", program.tree);
}

#[test]
fn test_unpromoted_arrays_stay_global() {
    let program = device(&scop_vector_add(), &options_with_budget(64, 64, 300));

    assert!(copies(&program.tree).iter().all(|(_, array, ..)| array == "A"));
    let refs = statement_refs(&program.tree);
    assert!(refs["r0"].starts_with("shared_A["), "{refs:?}");
    assert!(refs["r1"].starts_with("B["), "{refs:?}");
    assert!(refs["w0"].starts_with("C["), "{refs:?}");
}

#[test]
fn test_global_access_is_linearized() {
    let program = device(&scop_row_sum(), &options_with_budget(32, 32, 64));

    let access = &statement_refs(&program.tree)["r1"];
    assert!(access.starts_with("A["), "{access}");
    assert_eq!(access.matches('[').count(), 1, "{access}");
    assert!(access.contains("* 8 +"), "{access}");
}

#[test]
fn test_global_access_keeps_dimensions() {
    let options = GpuOptions { linearize_device_arrays: false, ..options_with_budget(32, 32, 64) };
    let program = device(&scop_row_sum(), &options);

    let access = &statement_refs(&program.tree)["r1"];
    assert!(access.starts_with("A["), "{access}");
    assert_eq!(access.matches('[').count(), 2, "{access}");
}

#[test]
fn test_private_accumulator() {
    let program = device(&scop_row_sum(), &options(32, 32));

    let refs = statement_refs(&program.tree);
    assert!(refs["r0"].starts_with("private_C["), "{refs:?}");
    assert_eq!(refs["r0"], refs["w0"]);
    assert!(refs["r1"].starts_with("shared_A["), "{refs:?}");
}
