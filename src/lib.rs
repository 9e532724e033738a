//! HTTP gateway serving static files per virtual host and forwarding
//! configured extensions to a FastCGI responder.

// Core subsystems
pub mod config;
pub mod fastcgi;
pub mod http;
pub mod net;
pub mod routing;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::GatewayConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
