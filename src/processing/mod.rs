pub mod color;
pub mod stats;
