//! The connection core of a Minecraft Bedrock Edition server. This crate
//! takes an accepted transport connection (RakNet shaped: ordered, discrete
//! messages) and turns it into a stream of typed packets, driving the login
//! sequence up to the point where the game protocol takes over.
//!
//! The three moving parts are the batch codec ([`codec`]), the login state
//! machine inside [`conn`], and the key agreement in [`crypto`]. They are
//! tightly coupled on purpose: the state machine decides when the codec
//! switches from plaintext to encrypted batches, using the key the agreement
//! produced.

#[macro_use]
extern crate log;

pub mod codec;
pub mod conn;
pub mod crypto;
mod error;
pub mod login;
pub mod packet;
pub mod resource;
pub mod transport;
pub mod util;

pub use conn::{Conn, ConnConfig};
pub use error::{Error, Result};
pub use transport::Transport;

/// The protocol version this server speaks. Clients must match it exactly;
/// there is no version range support.
pub const CURRENT_PROTOCOL: i32 = 390;
