mod base;
mod connection;
mod pipeline;

pub use base::*;
pub use connection::*;
pub use pipeline::*;
