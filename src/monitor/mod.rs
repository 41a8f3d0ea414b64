pub mod sampler;
pub mod scheduler;
pub mod warning;
