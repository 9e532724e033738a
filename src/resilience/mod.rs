//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Dial upstream responder:
//!     → timeouts.rs (enforce connect deadline)
//!     → On failure: surfaced as 502, never retried
//! ```
//!
//! # Design Decisions
//! - Upstream connections are single-use, so there is nothing to retry against
//! - A request body may already be partially streamed when a failure occurs

pub mod timeouts;
