//! course-manager - An instructor-facing API for e-learning course management
//!
//! This crate lets instructors build courses out of ordered modules and content:
//! - Subjects, courses and modules with per-parent ordering
//! - Polymorphic content items (text, file, image, video)
//! - Swappable object storage for uploads (local filesystem, GCS)
//! - redb embedded database for records (ACID, MVCC, crash-safe)
//! - REST API with bearer-token sessions and Django-style permissions

pub mod api;
pub mod auth;
pub mod config;
pub mod forms;
pub mod object_store;
pub mod storage;
#[cfg(test)]
pub mod testutil;

use std::sync::Arc;

use config::Config;
use storage::Database;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub object_store: Arc<dyn object_store::ObjectStore>,
}
