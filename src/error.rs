//! Error types for the LE ACL facade.
//!
//! Every failure an RPC can report is a [`FacadeError`]; transports map it
//! onto their own status type through [`FacadeError::status_code`].

use smol_str::SmolStr;
use thiserror::Error;

use crate::hci::address::AddressParseError;

/// RPC status codes surfaced to the remote harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
   InvalidArgument,
   ResourceExhausted,
   DeadlineExceeded,
   Aborted,
   Unavailable,
   FailedPrecondition,
   Internal,
}

/// Main error type for the facade.
#[derive(Error, Debug)]
pub enum FacadeError {
   #[error("Invalid address: {0}")]
   InvalidAddress(#[from] AddressParseError),

   #[error("Invalid address type: {0}")]
   InvalidAddressType(u32),

   #[error("Invalid handle: {0:#06x}")]
   UnknownHandle(u16),

   #[error("Only one outstanding connection request is supported")]
   OutstandingRequest,

   #[error("Stream {0} is already being driven")]
   StreamBusy(SmolStr),

   #[error("Send on {0:#06x} timed out")]
   RequestTimeout(u16),

   #[error("Connection {0:#06x} closed before the packet was pulled")]
   ConnectionClosed(u16),

   #[error("Facade service has been shut down")]
   ServiceStopped,

   #[error("Facade module already started")]
   AlreadyStarted,

   #[error("Facade module not started")]
   NotStarted,

   #[error("I/O error: {0}")]
   Io(#[from] std::io::Error),

   #[error("Could not determine config directory")]
   ConfigDirNotFound,

   #[error("TOML parsing error: {0}")]
   TomlParse(#[from] toml::de::Error),

   #[error("TOML serialization error: {0}")]
   TomlSerialize(#[from] toml::ser::Error),
}

impl FacadeError {
   /// The status a transport should report for this error.
   pub const fn status_code(&self) -> StatusCode {
      match self {
         Self::InvalidAddress(_) | Self::InvalidAddressType(_) | Self::UnknownHandle(_) => {
            StatusCode::InvalidArgument
         },
         Self::OutstandingRequest | Self::StreamBusy(_) => StatusCode::ResourceExhausted,
         Self::RequestTimeout(_) => StatusCode::DeadlineExceeded,
         Self::ConnectionClosed(_) => StatusCode::Aborted,
         Self::ServiceStopped => StatusCode::Unavailable,
         Self::AlreadyStarted | Self::NotStarted => StatusCode::FailedPrecondition,
         Self::Io(_) | Self::ConfigDirNotFound | Self::TomlParse(_) | Self::TomlSerialize(_) => {
            StatusCode::Internal
         },
      }
   }
}

/// Convenience type alias for Results with `FacadeError`.
pub type Result<T> = std::result::Result<T, FacadeError>;
