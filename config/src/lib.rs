//! Configuration shared by the extract-load engine and its binary.
//!
//! Holds the Postgres endpoint descriptors, the pipeline configuration and the loader that
//! builds it from environment variables with local defaults.

mod environment;
mod load;
pub mod shared;

pub use environment::*;
pub use load::*;
