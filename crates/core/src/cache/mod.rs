//! SQLite-backed store of named cache generations.
//!
//! This module provides the persistent request/response store using SQLite
//! with async access via tokio-rusqlite. It supports:
//!
//! - Any number of named generations, created on first open
//! - Per-generation entries keyed by a SHA-256 of request identity
//! - Whole-generation deletion (entries cascade)
//! - Automatic schema migrations
//! - WAL mode for concurrent access

pub mod connection;
pub mod entries;
pub mod hash;
pub mod migrations;
pub mod storage;

pub use crate::Error;

pub use connection::CacheDb;
pub use entries::Cache;
