//! Report output.

pub mod generator;

pub use generator::{write_outputs, WrittenReport};
