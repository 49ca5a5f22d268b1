//! Ready-made [`Fetcher`](crate::Fetcher) implementations.
//!
//! Provider-specific field mapping lives with the caller; these fetchers
//! only move bytes and classify failures.

pub mod http;

pub use http::HttpFetcher;
