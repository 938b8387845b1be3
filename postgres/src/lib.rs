pub mod schema;
#[cfg(feature = "tokio")]
pub mod tokio;
pub mod watermarks;
