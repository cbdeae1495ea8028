//! Intermediate representation shared by the tessera GPU backend.
//!
//! The front end hands over a [`Scop`]; the scheduling passes rewrite its
//! [`ScheduleNode`] tree; code generation produces an annotated [`AstNode`]
//! tree for a printer.
//!
//! # Module Organization
//!
//! - [`scop`] - Arrays, statements, references and dependences
//! - [`instance`] - Per-statement instance sets
//! - [`schedule_tree`] - Persistent schedule trees with kernel and thread marks
//! - [`ast`] - Annotated output trees and their expressions
//! - [`error`] - Error types and result handling

pub mod ast;
pub mod error;
pub mod instance;
pub mod schedule_tree;
pub mod scop;

#[cfg(test)]
pub mod test;

pub use ast::{Annotation, AstExpr, AstNode, AstOp};
pub use error::{Error, Result};
pub use instance::InstanceSet;
pub use schedule_tree::{Band, BandMember, Filter, IdFilter, KernelId, LoopType, Mark, MemberKind, ScheduleNode};
pub use scop::{
    ArrayDecl, Dependence, Dependences, ElementType, RefId, RefTag, Reference, Scop, Statement, StmtId,
    TaggedInstances,
};
