pub mod codec;
pub mod header;
pub mod name;
pub mod types;

pub use codec::{Answer, Query};
pub use types::{QType, RCode};

/// Wire-level parse failures. These never carry upstream/network context;
/// see `crate::error::DnsError` for the taxonomy the rest of the system uses.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("malformed packet: {0}")]
    Malformed(String),
    #[error("packet has no question")]
    EmptyQuestion,
    #[error("query name invalid: {0}")]
    NameTooLong(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
