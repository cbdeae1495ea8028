use tessera_ir::KernelId;

use crate::dataflow::Direction;
use crate::diagnostic::Diagnostic;
use crate::pipeline::schedule_gpu;
use crate::test::helpers::*;

#[test]
fn test_single_parallel_loop() {
    let scop = scop_a10();
    let mapped = schedule_gpu(&scop, &options(32, 32)).unwrap();

    assert!(mapped.parallel);
    assert_eq!(mapped.kernels.len(), 1);
    assert_eq!(mapped.copy_schedules.len(), 1);
    assert_eq!(mapped.used_sizes.to_string(), "{ kernel[0] -> tile[32]; kernel[0] -> grid[1]; kernel[0] -> block[32] }");
    assert_eq!(mapped.tree.kernel_ids(), vec![KernelId(0)]);
    assert!(mapped.diagnostics.is_empty());

    let (kernel, copies) = mapped.kernel(KernelId(0)).unwrap();
    assert_eq!(kernel.id, KernelId(0));
    assert_eq!(copies.copies(Direction::Read).count(), 1);
    assert_eq!(copies.copies(Direction::Write).count(), 1);
    assert!(mapped.kernel(KernelId(1)).is_none());
}

#[test]
fn test_budget_diagnostics_reach_the_result() {
    let scop = scop_vector_add();
    let mapped = schedule_gpu(&scop, &options_with_budget(64, 64, 300)).unwrap();

    let exceeded: Vec<_> = mapped
        .diagnostics
        .iter()
        .filter_map(|d| match d {
            Diagnostic::SharedBudgetExceeded { array, .. } => Some(array.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(exceeded, ["B", "C"]);
}

#[test]
fn test_rerun_is_deterministic() {
    let scop = scop_row_sum();
    let options = options(32, 32);
    let first = schedule_gpu(&scop, &options).unwrap();
    let second = schedule_gpu(&scop, &options).unwrap();

    assert_eq!(first.used_sizes, second.used_sizes);
    assert_eq!(first.copy_schedules, second.copy_schedules);
    assert_eq!(first.tree.to_string(), second.tree.to_string());
}
