//! Core types and shared functionality for shellcache.
//!
//! This crate provides:
//! - Request/response model with explicit body duplication
//! - Multi-generation response cache with SQLite backend
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;
pub mod http;

pub use cache::{Cache, CacheDb};
pub use config::{AppConfig, ConfigError};
pub use error::Error;
pub use http::{Request, Response};
