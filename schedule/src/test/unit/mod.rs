pub mod carve;
pub mod copy;
pub mod pipeline;
