//! Network side of shellcache.
//!
//! This crate provides the [`Network`] seam the worker fetches through, its
//! reqwest-backed implementation, and origin scoping for request URLs.

pub mod fetch;

pub use fetch::{FetchClient, FetchConfig, Network, Scope, UrlError, resolve};
