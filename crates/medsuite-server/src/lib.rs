//! MedSuite notification service.
//!
//! - HTTP API: `/health/`, in-app notifications, logout, event ingest
//! - background event consumer (stream fan-out into in-app notifications)
//! - background reminder scheduler (email/SMS entries for the delivery worker)

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod observability;
pub mod server;
pub mod sources;

pub use config::AppConfig;
pub use server::{AppState, Backends, MedsuiteServer, ServerBuilder, Workers, build_app};
