pub mod color;
pub mod projection;
pub mod stats;
