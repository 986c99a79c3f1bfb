//! Commute aggregation and reporting.
//!
//! This module buckets a route's reading history by local time of day,
//! computes speed and implied travel-time statistics per bucket, ranks
//! departure times, and writes the reports locally or to S3. `recent`
//! answers the short-window questions: what is slow, what just happened.

pub mod aggregate;
pub mod analyzer;
pub mod grade;
pub mod recent;
pub mod types;
pub mod utility;
pub mod writetos3;
