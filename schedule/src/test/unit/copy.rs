use tessera_ir::Scop;

use crate::array::extract_array_info;
use crate::carve::carve_kernels;
use crate::config::GpuOptions;
use crate::context::GenContext;
use crate::copy::{CopySchedule, OpKind, build_copy_schedule};
use crate::dataflow::Direction;
use crate::group::group_references;
use crate::kernel::Kernel;
use crate::test::helpers::*;

fn copy_schedule(scop: &Scop, options: &GpuOptions) -> (Kernel, CopySchedule) {
    let mut ctx = GenContext::new(scop, options);
    let arrays = extract_array_info(&mut ctx);
    let mut carving = carve_kernels(&mut ctx, &scop.schedule).unwrap();
    let mut kernel = carving.kernels.remove(0);
    group_references(&mut ctx, &mut kernel, &arrays).unwrap();
    let schedule = build_copy_schedule(scop, &kernel).unwrap();
    (kernel, schedule)
}

fn placement(schedule: &CopySchedule) -> Vec<(&'static str, usize, i64)> {
    schedule
        .ops
        .iter()
        .map(|op| {
            let kind = match &op.kind {
                OpKind::Compute => "compute",
                OpKind::Copy { direction: Direction::Read, .. } => "read",
                OpKind::Copy { direction: Direction::Write, .. } => "write",
                OpKind::Sync => "sync",
            };
            (kind, op.level, op.order)
        })
        .collect()
}

#[test]
fn test_single_shared_group_placement() {
    let scop = scop_a10();
    let (_, schedule) = copy_schedule(&scop, &options(32, 32));

    assert_eq!(schedule.tile_len, 1);
    assert_eq!(
        placement(&schedule),
        vec![("read", 0, -2), ("write", 0, 3), ("sync", 1, -1), ("compute", 1, 0), ("sync", 1, 2)]
    );
    // One barrier before the computation and one after it.
    assert_eq!(schedule.syncs().count(), 2);
    assert!(schedule.has_deeper(0));
    assert!(!schedule.has_deeper(1));
}

#[test]
fn test_reduction_scalar_copied_out_once() {
    let scop = scop_scalar_writer();
    let (kernel, schedule) = copy_schedule(&scop, &options(32, 32));

    let sum = kernel.arrays.iter().position(|a| a.name == "sum").unwrap();
    let sum_ops: Vec<_> = schedule
        .ops
        .iter()
        .filter(|op| matches!(op.kind, OpKind::Copy { array, .. } if array == sum))
        .collect();
    assert_eq!(sum_ops.len(), 1);
    assert!(matches!(sum_ops[0].kind, OpKind::Copy { direction: Direction::Write, .. }));
    // Outside the tile loop, after it.
    assert_eq!(sum_ops[0].level, 0);
    assert!(sum_ops[0].order > 0);
}

#[test]
fn test_private_write_needs_no_barrier_after() {
    let scop = scop_row_sum();
    let (kernel, schedule) = copy_schedule(&scop, &options(32, 32));
    let n = kernel.tile_len();
    let s = kernel.arrays.iter().map(|a| a.groups.len()).sum::<usize>() as i64;

    let c = kernel.arrays.iter().position(|a| a.name == "C").unwrap();
    let writes: Vec<_> = schedule.copies(Direction::Write).collect();
    assert_eq!(writes.len(), 1);
    assert!(matches!(writes[0].kind, OpKind::Copy { array, .. } if array == c));
    assert_eq!(writes[0].level, n);
    assert!(writes[0].order < 1 + s);
    assert!(schedule.syncs().all(|op| op.order != 2 * s + 2));
}

#[test]
fn test_syncs_are_deduplicated_and_sorted() {
    let scop = scop_vector_add();
    let options = GpuOptions { shared_memory: crate::config::MemoryBudget::Unlimited, ..options(64, 64) };
    let (_, schedule) = copy_schedule(&scop, &options);

    let keys: Vec<(usize, i64)> = schedule.ops.iter().map(|op| (op.level, op.order)).collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
    // Two shared reads share the barrier before the computation.
    assert_eq!(schedule.syncs().filter(|op| op.order == -1).count(), 1);
    assert_eq!(schedule.copies(Direction::Read).count(), 2);
    assert_eq!(schedule.copies(Direction::Write).count(), 1);
}
