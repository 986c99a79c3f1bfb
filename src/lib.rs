//! Southern California traffic scraper and commute analyzer.
//!
//! The pipeline runs static topology, then ingest and normalization, then
//! the reading store, then commute aggregation. Fetching, archiving and
//! configuration are the plumbing around it.

pub mod analyzers;
pub mod archive;
pub mod config;
pub mod error;
pub mod fetch;
pub mod ingest;
pub mod model;
pub mod output;
pub mod parser;
pub mod payload;
pub mod routes;
pub mod stats;
pub mod store;
pub mod topology;
