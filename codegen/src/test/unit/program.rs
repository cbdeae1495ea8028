use tessera_poly::Var;
use tessera_schedule::Diagnostic;

use crate::error::Error;
use crate::program::{Outcome, generate_gpu};
use crate::test::helpers::*;

#[test]
fn test_sequential_band_is_left_alone() {
    let outcome = generate_gpu(&scop_recurrence(), &options(32, 32)).unwrap();
    assert!(matches!(outcome, Outcome::NoParallelism { .. }));
    assert!(outcome.program().is_none());
}

#[test]
fn test_used_sizes() {
    let program = device(&scop_a10(), &options(32, 32));
    assert_eq!(program.used_sizes.to_string(), "{ kernel[0] -> tile[32]; kernel[0] -> grid[1]; kernel[0] -> block[32] }");
}

#[test]
fn test_budget_diagnostics_reach_the_caller() {
    let program = device(&scop_vector_add(), &options_with_budget(64, 64, 300));
    let exceeded: Vec<_> = program
        .diagnostics
        .iter()
        .filter_map(|d| match d {
            Diagnostic::SharedBudgetExceeded { array, .. } => Some(array.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(exceeded, vec!["B", "C"]);
}

#[test]
fn test_unscheduled_iterator_is_an_error() {
    let err = generate_gpu(&scop_unscheduled_iterator(), &options(32, 32)).unwrap_err();
    assert!(matches!(err, Error::NonInvertibleSchedule { ref iterator, .. } if *iterator == Var::new("j")), "{err}");
}

#[test]
fn test_generation_is_deterministic() {
    let first = device(&scop_row_sum(), &options(32, 32));
    let second = device(&scop_row_sum(), &options(32, 32));
    assert_eq!(first.tree.to_string(), second.tree.to_string());
    assert_eq!(first.kernels, second.kernels);
}
