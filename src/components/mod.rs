//! Ready-made components for demos and tests.

pub mod counter;
pub mod ram;

pub use counter::BinaryCounter;
pub use ram::StaticRam;
