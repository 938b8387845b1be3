//! Row model shared by sources and destinations.

mod cell;
mod row;

pub use cell::*;
pub use row::*;

/// Point in time up to which a table has been replicated.
pub type Watermark = chrono::DateTime<chrono::Utc>;
