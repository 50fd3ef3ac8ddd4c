pub mod stub;
pub mod synthetic;

pub use stub::StubInference;
pub use synthetic::{SyntheticInference, SyntheticScene};
