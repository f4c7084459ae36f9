//! Session coordination for shared real-time documents
//! Connection registry, color allocation, editor slots, and the
//! first-access initialization handshake
use thiserror::Error;

mod palette;
pub use palette::*;

mod registry;
pub use registry::*;

mod slots;
pub use slots::*;

mod init;
pub use init::*;

mod protocol;
pub use protocol::*;

mod stateless;
pub use stateless::*;

mod engine;
pub use engine::*;

mod store;
pub use store::*;

mod coordinator;
pub use coordinator::*;

#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    #[error("content conversion failed: {0}")]
    Conversion(String),

    #[error("document store error: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, CoordinationError>;

/// Document identifier, taken verbatim from the connection URL path.
pub type DocumentId = String;

/// User identifier, taken from the connection's query parameters.
pub type UserId = String;
