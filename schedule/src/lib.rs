//! GPU mapping stages for tessera.
//!
//! Turns a scheduled [`tessera_ir::Scop`] into carved device kernels with
//! reference groups, on-chip tiles and copy/sync schedules, ready for
//! code generation.
//!
//! # Module Organization
//!
//! - [`array`] - Array bounds, classification and reference collection
//! - [`carve`] - Band selection, tiling and kernel carving
//! - [`group`] - Reference grouping, tile placement and the memory budget
//! - [`tile`] - Bounding tiles and their index maps
//! - [`dataflow`] - Retained accesses and host transfers
//! - [`copy`] - Copy and synchronization placement inside a kernel
//! - [`pipeline`] - The [`schedule_gpu`] driver
//! - [`config`] - Options, memory budget and per-kernel size overrides
//! - [`context`] - Explicit state threaded through the stages
//! - [`diagnostic`] - Recoverable conditions reported to the caller
//!
//! # Coordinates
//!
//! Kernel relations name their schedule coordinates through [`coords`]:
//! `h.j` host members, `s.k` tiles, `p.k` points, `b.k`/`t.k` block and
//! thread ids. Names with a `.` never collide with front-end variables.

pub mod array;
pub mod carve;
pub mod config;
pub mod context;
pub mod coords;
pub mod copy;
pub mod dataflow;
pub mod diagnostic;
pub mod error;
pub mod group;
pub mod kernel;
pub mod pipeline;
pub mod tile;

#[cfg(test)]
pub mod test;

pub use array::ArrayInfo;
pub use carve::{Carving, carve_kernels, kernel_subtree};
pub use config::{DumpOptions, GpuOptions, KernelSizes, MemoryBudget, SizeOverrides, UsedSizes};
pub use context::GenContext;
pub use copy::{CopyOp, CopySchedule, OpKind};
pub use dataflow::{ArrayTransfer, Direction, TaggedSets, Transfers};
pub use diagnostic::Diagnostic;
pub use error::{Error, Result};
pub use group::{KernelVar, LocalArrayInfo, RefGroup};
pub use kernel::{Coords, Kernel};
pub use pipeline::{GpuSchedule, schedule_gpu};
pub use tile::{ArrayTile, TileBound, TileKind};
