//! FastCGI protocol engine (responder role only).
//!
//! # Data Flow
//! ```text
//! Params + request body
//!     → params.rs (name-value encoding, split into ≤65500-byte chunks)
//!     → record.rs (8-byte header + content + padding)
//!     → client.rs (BeginRequest, Params*, Stdin* on one connection)
//!     ← record.rs (Stdout/Stderr until EndRequest)
//!     ← reply.rs (status line, headers, optional chunked body)
//! ```
//!
//! # Design Decisions
//! - A client owns one connection for one request; nothing is pooled
//! - EndRequest is end-of-stream, not an error
//! - Oversized parameters are truncated rather than rejected

pub mod client;
pub mod error;
pub mod params;
pub mod record;
pub mod reply;
pub mod transport;

pub use client::{FcgiClient, ReplyStream};
pub use error::FcgiError;
pub use params::Params;
pub use reply::UpstreamResponse;
pub use transport::{Transport, UpstreamStream};
