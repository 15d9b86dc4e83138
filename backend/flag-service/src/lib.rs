//! Flag Service
//!
//! Feature-flag evaluation and distribution: deterministic bucketing and
//! targeting, a Redis read-through cache with cross-instance invalidation,
//! an append-only audit trail, and real-time push of flag state to
//! subscribed clients.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod listener;
pub mod middleware;
pub mod models;
pub mod services;
pub mod state;
pub mod validators;
pub mod websocket;

pub use config::Config;
pub use error::{AppError, Result};
