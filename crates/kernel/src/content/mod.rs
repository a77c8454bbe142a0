//! Content services.
//!
//! This module provides:
//! - EntityKind: the tour, review and user collections
//! - DocumentService: retrieval and mutation with hook and aggregate handling
//! - Tour analytics and the top-5-cheap preset
//! - AccountService: signup, login and token authentication

mod account_service;
mod analytics;
mod document_service;
mod entity;

pub use account_service::{AccountService, Session};
pub use analytics::{TOP_FIVE_CHEAP, monthly_plan_pipeline, top_five_cheap, tour_stats_pipeline};
pub use document_service::{DocumentService, RawParams};
pub use entity::{EntityKind, REVIEWS, TOURS, USERS};
