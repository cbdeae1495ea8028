//! Annotated host and kernel trees for tessera.
//!
//! Takes the mapping produced by [`tessera_schedule::schedule_gpu`] and
//! scans it into an [`tessera_ir::AstNode`] tree: host loops around kernel
//! launches, and kernel bodies with tile loops, copies, barriers and
//! statements whose references already point at global or on-chip
//! memory. Printing the tree is left to the caller.
//!
//! # Module Organization
//!
//! - [`scan`] - Loop headers and guards from instance sets
//! - [`invert`] - Statement iterators in terms of the loop coordinates
//! - [`access`] - Reference rewriting and global array accesses
//! - [`kernel`] - Kernel bodies
//! - [`copies`] - Copies between global memory and on-chip tiles
//! - [`host`] - Host loops and kernel launches
//! - [`program`] - The [`generate_gpu`] driver
//!
//! # Usage
//!
//! ```ignore
//! use tessera_codegen::{Outcome, generate_gpu};
//!
//! match generate_gpu(&scop, &GpuOptions::from_env())? {
//!     Outcome::Device(program) => print(&program.tree),
//!     Outcome::NoParallelism { .. } => keep_sequential(),
//! }
//! ```

pub mod access;
pub mod copies;
pub mod error;
pub mod host;
pub mod invert;
pub mod kernel;
pub mod program;
pub mod scan;

#[cfg(test)]
pub mod test;

pub use error::{Error, Result};
pub use host::KernelInfo;
pub use program::{GpuProgram, Outcome, generate_gpu};
