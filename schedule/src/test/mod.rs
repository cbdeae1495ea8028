pub mod helpers;
pub mod unit;
