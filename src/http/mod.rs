//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (accept loop, connection task, request ID span)
//!     → request.rs (request line, headers, fixed-length body)
//!     → routing (vhost lookup, default fallback)
//!     → dispatch.rs (static file or FastCGI responder, own task)
//!     → response.rs (gzip, status line, headers, body)
//!     → Send to client, close
//! ```

pub mod dispatch;
pub mod request;
pub mod response;
pub mod server;
pub mod status;

pub use dispatch::{spawn_dispatch, DispatchContext, DispatchError, DispatchHandle, Outcome};
pub use request::{parse_request, Request, RequestError, RequestLimits};
pub use response::{write_response, Response};
pub use server::{HttpServer, X_REQUEST_ID};
