//! Incremental extract-load of Postgres tables.
//!
//! Rows changed since the last run are read from a [`source::Source`] and upserted into a
//! [`destination::Destination`], after which a per-table watermark is advanced. The
//! [`pipeline::Pipeline`] drives this for an ordered set of tables and summarizes the run in a
//! [`report::RunReport`].

pub mod clients;
pub mod concurrency;
pub mod conversions;
pub mod destination;
pub mod error;
#[cfg(feature = "failpoints")]
pub mod failpoints;
#[macro_use]
mod macros;
pub mod pipeline;
pub mod report;
pub mod source;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
