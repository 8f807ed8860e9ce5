pub mod revolving;

pub use revolving::{RevolvingBuffers, Segment};
