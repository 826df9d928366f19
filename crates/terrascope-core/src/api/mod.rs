//! REST API client module for the Terrascope survey service.
//!
//! This module provides the `ApiClient` for all backend communication.
//! Authentication is bearer-token based; the client wraps every request in
//! the session interceptors: a pre-flight expiry check on the way out, and
//! the refresh-once-then-replay recovery on authorization failures.

pub mod client;
pub mod error;

pub use client::ApiClient;
pub use error::ApiError;
