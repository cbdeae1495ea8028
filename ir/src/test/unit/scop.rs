use tessera_poly::{Constraint, LinExpr, Polyhedron, Var};

use crate::error::Error;
use crate::{ArrayDecl, Dependence, Dependences, RefTag, Reference, Scop, ScheduleNode, Statement, StmtId};

fn loop_domain(i: &str, n: i64) -> Polyhedron {
    Polyhedron::from_constraints([Constraint::ge(LinExpr::var(i), 0), Constraint::lt(LinExpr::var(i), n)])
}

fn array_a() -> ArrayDecl {
    ArrayDecl::builder().name("A").n_index(1).extent(ArrayDecl::box_extent(&[LinExpr::constant(10)])).build()
}

fn copy_stmt() -> Statement {
    Statement::new("S", vec![Var::new("i")], loop_domain("i", 10))
        .with_ref(Reference::read("r0", "A", vec![LinExpr::var("i")]))
        .with_ref(Reference::write("w0", "A", vec![LinExpr::var("i")]))
}

#[test]
fn test_default_schedule_is_statement_sequence() {
    let scop = Scop::builder().arrays(vec![array_a()]).statements(vec![copy_stmt()]).build().unwrap();
    let ScheduleNode::Domain { child, .. } = scop.schedule.as_ref() else { panic!("expected domain root") };
    let ScheduleNode::Sequence { children } = child.as_ref() else { panic!("expected sequence") };
    assert_eq!(children.len(), 1);
    assert!(matches!(children[0].as_ref(), ScheduleNode::Filter { .. }));
}

#[test]
fn test_index_arity_is_checked() {
    let stmt = Statement::new("S", vec![Var::new("i")], loop_domain("i", 10))
        .with_ref(Reference::read("r0", "A", vec![LinExpr::var("i"), LinExpr::var("i")]));
    let err = Scop::builder().arrays(vec![array_a()]).statements(vec![stmt]).build().unwrap_err();
    assert!(matches!(err, Error::IndexArity { got: 2, expected: 1, .. }), "{err}");
}

#[test]
fn test_unknown_array_is_rejected() {
    let stmt = Statement::new("S", vec![Var::new("i")], loop_domain("i", 10))
        .with_ref(Reference::read("r0", "B", vec![LinExpr::var("i")]));
    let err = Scop::builder().arrays(vec![array_a()]).statements(vec![stmt]).build().unwrap_err();
    assert!(matches!(err, Error::ArrayNotFound { ref name } if name == "B"));
}

#[test]
fn test_dependence_on_unknown_reference_is_rejected() {
    let deps = Dependences {
        flow: vec![Dependence::new(RefTag::new("S", "w0"), RefTag::new("S", "nope"), Polyhedron::universe())],
        ..Default::default()
    };
    let err = Scop::builder().arrays(vec![array_a()]).statements(vec![copy_stmt()]).deps(deps).build().unwrap_err();
    assert!(matches!(err, Error::ReferenceNotFound { .. }), "{err}");
}

#[test]
fn test_access_image_is_accessed_range() {
    let scop = Scop::builder().arrays(vec![array_a()]).statements(vec![copy_stmt()]).build().unwrap();
    let (stmt, reference) = scop.reference(&RefTag::new("S", "r0")).unwrap();
    let image = scop.access_image(stmt, reference, &Polyhedron::universe());
    let a0 = ArrayDecl::dim(0);
    let bounds = image.bounds(&a0, &Default::default());
    assert_eq!(bounds.constant_width(), Some((LinExpr::constant(0), 9)));
}

#[test]
fn test_lookup_errors() {
    let scop = Scop::builder().arrays(vec![array_a()]).statements(vec![copy_stmt()]).build().unwrap();
    assert!(matches!(scop.statement(&StmtId::new("T")), Err(Error::StatementNotFound { .. })));
    assert_eq!(scop.references_to("A").count(), 2);
    assert_eq!(scop.arrays_accessed_by([&StmtId::new("S")]).len(), 1);
}

#[test]
fn test_effective_order_removes_independences() {
    let i = LinExpr::var("i");
    let ip = LinExpr::var("i'");
    let order = Polyhedron::from_constraints([Constraint::lt(i.clone(), ip.clone())]);
    let all = Dependence::new(RefTag::new("S", "w0"), RefTag::new("S", "r0"), order.clone());
    let ind = Dependence::new(RefTag::new("S", "w0"), RefTag::new("S", "r0"), order);
    let deps = Dependences { order: vec![all], independences: vec![ind], ..Default::default() };
    assert!(deps.effective_order().is_empty());
}
