//! XUnit report handling.
//!
//! `document` owns the XML tree; `aggregator` merges reports.

pub mod aggregator;
pub mod document;

pub use aggregator::{AggregateOptions, XunitAggregator};
