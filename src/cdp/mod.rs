pub mod client;
pub mod error;
pub mod transport;
pub mod types;

pub use client::{CdpClient, CdpConfig, CdpSession};
pub use error::CdpError;
pub use types::{CdpCommand, CdpEvent, MessageKind, RawCdpMessage};
