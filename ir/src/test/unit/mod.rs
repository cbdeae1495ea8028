pub mod ast;
pub mod scop;
