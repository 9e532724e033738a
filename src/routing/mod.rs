//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path)
//!     → registry.rs (exact host lookup, default fallback)
//!     → candidates.rs (index expansion, root-confined path mapping)
//!     → Return: first servable file, or nothing (404)
//!
//! Registry Compilation (at startup):
//!     VhostConfig[]
//!     → One VirtualHost per entry, indexed by every alias
//!     → Freeze as immutable VhostRegistry
//! ```
//!
//! # Design Decisions
//! - Registry built at startup, immutable at runtime
//! - Exact host matching; no wildcards
//! - A miss is reported, then routed to the default host

pub mod candidates;
pub mod registry;

pub use candidates::{first_existing, Resolved};
pub use registry::{Upstream, VhostLookup, VhostRegistry, VirtualHost};
