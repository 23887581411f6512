//! HTTP client subsystem.
//!
//! # Data Flow
//! ```text
//! caller
//!     → client.rs (resolve URL, default headers, build context)
//!     → plugins pipeline (before hooks)
//!     → retry loop → transport.rs (hyper, direct or via proxy)
//!     → response.rs (buffered response)
//!     → plugins pipeline (after / error hooks)
//!     → caller, or error.rs taxonomy
//! ```

pub mod blocking;
pub mod client;
pub mod error;
pub mod request;
pub mod response;
pub mod transport;

pub use blocking::BlockingClient;
pub use client::{Client, ClientBuilder};
pub use error::{ClientError, ClientResult, ErrorClass, ErrorKind};
pub use request::{HttpRequest, RequestContext, X_REQUEST_ID};
pub use response::HttpResponse;
pub use transport::{HyperTransport, Transport};
