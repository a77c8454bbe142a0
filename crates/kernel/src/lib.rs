//! Excursion kernel library.
//!
//! Tour, review and user storage with composable retrieval, lifecycle
//! hooks and derived rating summaries. The `excursion` binary serves it
//! over HTTP.

pub mod aggregate;
pub mod auth;
pub mod config;
pub mod content;
pub mod db;
pub mod error;
pub mod executor;
pub mod hooks;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod query;
pub mod routes;
pub mod state;
pub mod store;
