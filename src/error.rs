use crate::util::BufferError;
use std::{fmt, io};

#[derive(Debug)]
pub enum Error {
  /// The client connected with a protocol version we don't support. The play
  /// status sent back before closing depends on which side is outdated.
  ProtocolMismatch { client: i32, server: i32 },
  /// The login chain was valid, but the client was not authenticated to XBOX
  /// Live.
  NotAuthenticated,
  /// The login request could not be verified or decoded.
  InvalidLoginChain(String),
  InvalidIdentityData(String),
  InvalidClientData(String),
  /// The client requested a chunk other than the one we expected next.
  PackChunkMisordered { expected: u32, got: u32 },
  /// The client requested a chunk of a pack other than the one being sent.
  UnexpectedPack { expected: String, got: String },
  /// The client requested a pack that we never offered.
  UnknownPack(String),
  /// The client sent a resource pack response we don't recognize.
  UnknownPackResponse(u8),
  Buffer(BufferError),
  /// An inbound batch was structurally invalid.
  Decode(&'static str),
  /// A batch failed to decrypt, or its checksum didn't match.
  Encryption(&'static str),
  /// The read deadline passed before a packet arrived. The connection is
  /// still usable after this.
  Timeout,
  /// The connection was closed, either by us or by the other side.
  Closed,
  IO(io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      Self::ProtocolMismatch { client, server } => {
        write!(f, "client protocol {client} does not match server protocol {server}")
      }
      Self::NotAuthenticated => write!(f, "connection was not authenticated to XBOX Live"),
      Self::InvalidLoginChain(reason) => write!(f, "error verifying login request: {reason}"),
      Self::InvalidIdentityData(reason) => write!(f, "invalid identity data: {reason}"),
      Self::InvalidClientData(reason) => write!(f, "invalid client data: {reason}"),
      Self::PackChunkMisordered { expected, got } => {
        write!(f, "chunk request had unexpected index: expected {expected}, but got {got}")
      }
      Self::UnexpectedPack { expected, got } => {
        write!(f, "chunk request had unexpected UUID: expected {expected}, but got {got}")
      }
      Self::UnknownPack(id) => write!(f, "client requested unknown pack {id}"),
      Self::UnknownPackResponse(v) => write!(f, "unknown resource pack client response {v}"),
      Self::Buffer(e) => write!(f, "{e}"),
      Self::Decode(reason) => write!(f, "error decoding batch: {reason}"),
      Self::Encryption(reason) => write!(f, "encryption error: {reason}"),
      Self::Timeout => write!(f, "read timeout"),
      Self::Closed => write!(f, "connection closed"),
      Self::IO(e) => write!(f, "{e}"),
    }
  }
}

impl std::error::Error for Error {}

impl From<BufferError> for Error {
  fn from(e: BufferError) -> Self { Error::Buffer(e) }
}
impl From<io::Error> for Error {
  fn from(e: io::Error) -> Self { Error::IO(e) }
}

impl Error {
  pub fn io_kind(&self) -> Option<io::ErrorKind> {
    match self {
      Self::IO(e) => Some(e.kind()),
      _ => None,
    }
  }

  /// Returns true if this error means the connection is dead. Timeouts leave
  /// the connection open, everything else is fatal.
  pub fn is_fatal(&self) -> bool { !matches!(self, Self::Timeout) }
}
