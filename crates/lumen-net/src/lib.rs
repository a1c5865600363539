//! lumen Networking
//!
//! Blocking transport for remote resources. The photo pipeline runs its
//! fetch stage on dedicated worker threads, so the transport surface is
//! deliberately synchronous: open a locator, get back a readable body
//! stream plus the declared content length (when the server sent one).

mod transport;

pub use transport::{FetchStream, HttpTransport, Transport, TransportConfig};
pub use url::Url;

/// Network error
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("HTTP error: {status}")]
    HttpError { status: u16 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}
