use snafu::Snafu;

use crate::scop::{RefId, StmtId};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// A tree or dependence names a statement the scop does not declare.
    #[snafu(display("statement {stmt} not found"))]
    StatementNotFound { stmt: StmtId },

    /// A reference targets an array the scop does not declare.
    #[snafu(display("array {name} not found"))]
    ArrayNotFound { name: String },

    #[snafu(display("reference {reference} not found in statement {stmt}"))]
    ReferenceNotFound { stmt: StmtId, reference: RefId },

    /// Index expression count differs from the array dimensionality.
    #[snafu(display(
        "reference {reference} of {stmt} has {got} index expressions but array {array} has {expected} dimensions"
    ))]
    IndexArity { stmt: StmtId, reference: RefId, array: String, got: usize, expected: usize },

    /// A band member does not define a value for a statement reaching it.
    #[snafu(display("band member {member} has no schedule for statement {stmt}"))]
    MissingSchedule { stmt: StmtId, member: usize },

    #[snafu(display("cannot split band of {members} members at {at}"))]
    InvalidSplit { at: usize, members: usize },

    #[snafu(display("unexpected {kind} node {location}"))]
    UnsupportedNode { kind: &'static str, location: &'static str },
}
