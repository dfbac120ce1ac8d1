//! Core pipeline orchestration for PriceWatch.
//!
//! This crate ties together page fetching, extraction, and the product store
//! into the end-to-end workflows: registering a product page, refreshing
//! products that are due, and the periodic scheduler.

pub mod pipeline;
pub mod refresh;

pub use pipeline::{ProductPage, ProductTracker, ProgressReporter, SilentProgress};
pub use refresh::{RefreshCursor, RefreshFailure, RefreshOutcome, RefreshPolicy, refresh_window};
