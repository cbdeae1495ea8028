pub mod invert;
pub mod kernel;
pub mod program;
