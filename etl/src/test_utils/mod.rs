//! Utilities for testing pipelines.
//!
//! - [`database`] creates throwaway source and target databases on a local Postgres.
//! - [`fixtures`] describes the `products` and `orders` tables used across tests.
//! - [`test_source_wrapper`] and [`test_destination_wrapper`] record calls made by a
//!   [`crate::pipeline::Pipeline`] and inject failures for chosen tables.
//! - [`failpoints`] configures fail points for the duration of a test.

pub mod database;
pub mod failpoints;
pub mod fixtures;
pub mod test_destination_wrapper;
pub mod test_source_wrapper;
