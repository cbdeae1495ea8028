//! Integer sets and affine expressions for the tessera GPU backend.
//!
//! This crate is the small polyhedral algebra layer the kernel-synthesis
//! pipeline is written against. It is deliberately narrow: everything is a
//! conjunction of affine constraints over named integer variables, and
//! projection is Fourier–Motzkin with integer tightening.
//!
//! # Module Organization
//!
//! - [`var`] - Interned variable names and fresh-name generation
//! - [`expr`] - Affine expressions ([`LinExpr`])
//! - [`constraint`] - Equalities and inequalities over affine expressions
//! - [`polyhedron`] - Conjunctions of constraints, projection, emptiness, gist
//! - [`set`] - Finite unions of polyhedra and set difference
//! - [`bound`] - Symbolic lower/upper bounds extracted from polyhedra
//! - [`arith`] - Integer helpers (floor/ceil division, gcd)
//!
//! # Exactness
//!
//! Eliminating a variable is exact when it is defined by an equality with a
//! unit coefficient, or when every Fourier–Motzkin pair has a unit
//! coefficient. Otherwise the result is the rational shadow, which contains
//! every integer point of the true projection. [`Polyhedron::is_empty`]
//! therefore answers "proved empty".

pub mod arith;
pub mod bound;
pub mod constraint;
pub mod expr;
pub mod polyhedron;
pub mod set;
pub mod var;


pub use bound::{Bound, BoundKind, SymBound, VarBounds};
pub use constraint::{Constraint, ConstraintKind};
pub use expr::LinExpr;
pub use polyhedron::Polyhedron;
pub use set::Set;
pub use var::{Var, VarGen};
