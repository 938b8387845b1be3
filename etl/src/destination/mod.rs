//! Destinations receiving extracted rows.
//!
//! This module provides the [`Destination`] trait together with the Postgres [`postgres::Loader`]
//! and an in-memory implementation used by tests.

mod base;
pub mod memory;
pub mod postgres;

pub use base::*;
