//! The login request is a chain of signed JWTs produced by the client (and,
//! for authenticated clients, by the XBOX Live servers). Verifying and
//! decoding that chain is someone else's job; this module holds the seam and
//! the structural checks we run on whatever comes back. Mojang can change the
//! data, and a custom client can fiddle with it, so we can never be too sure.

use crate::{Error, Result};
use p384::PublicKey;
use serde_derive::Deserialize;
use uuid::Uuid;

/// The result of verifying a login request's signature chain.
#[derive(Debug, Clone)]
pub struct Verified {
  /// The identity public key the client signed its chain with. This is the
  /// key we run ECDH against when enabling encryption.
  pub public_key: PublicKey,
  /// True if the chain is rooted in the XBOX Live CA. Unauthenticated clients
  /// produce a self-signed chain.
  pub xbox_auth:  bool,
}

/// Verifies and decodes login request chains. Implementations own all JWT
/// parsing and signature checking; the connection only consumes the results.
pub trait Verifier: Send + Sync {
  /// Verifies the signature chain of a login request. Fails with
  /// [`Error::InvalidLoginChain`] if the chain is malformed or any signature
  /// is invalid.
  fn verify(&self, request: &[u8]) -> Result<Verified>;

  /// Decodes the identity and client data claims carried in the chain. The
  /// returned data has not been validated yet.
  fn decode(&self, request: &[u8]) -> Result<(IdentityData, ClientData)>;
}

/// Identity data decoded from the final JWT of the login chain. Field names
/// mirror the JSON claims.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdentityData {
  /// The XBOX Live user ID. Empty for unauthenticated clients, a decimal
  /// number otherwise.
  #[serde(rename = "XUID", default)]
  pub xuid:         String,
  /// UUID of the player. Unique per player, and stable across name changes.
  #[serde(rename = "identity")]
  pub identity:     String,
  #[serde(rename = "displayName")]
  pub display_name: String,
  #[serde(rename = "titleId", default)]
  pub title_id:     String,
}

impl IdentityData {
  /// Checks that all required fields are present and well formed.
  pub fn validate(&self) -> Result<()> {
    if !self.xuid.is_empty() && self.xuid.parse::<u64>().is_err() {
      return Err(Error::InvalidIdentityData(format!("XUID `{}` is not numeric", self.xuid)));
    }
    if Uuid::parse_str(&self.identity).is_err() {
      return Err(Error::InvalidIdentityData(format!("UUID `{}` is invalid", self.identity)));
    }
    if self.display_name.is_empty() || self.display_name.len() > 32 {
      return Err(Error::InvalidIdentityData(format!(
        "display name `{}` has an invalid length",
        self.display_name
      )));
    }
    Ok(())
  }
}

/// Client data decoded from the self-signed JWT of the login chain. Only the
/// fields the connection cares about; the rest of the claim is dropped by the
/// verifier.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientData {
  /// The OS the client plays on. 1 is android, 7 is windows, and so on.
  #[serde(rename = "DeviceOS")]
  pub device_os:     i32,
  #[serde(rename = "DeviceId", default)]
  pub device_id:     String,
  /// The game version of the client, such as `1.14.60`.
  #[serde(rename = "GameVersion")]
  pub game_version:  String,
  #[serde(rename = "LanguageCode", default)]
  pub language_code: String,
  #[serde(rename = "SkinId", default)]
  pub skin_id:       String,
}

impl ClientData {
  /// Checks that all required fields are present and well formed.
  pub fn validate(&self) -> Result<()> {
    if !(1..=15).contains(&self.device_os) {
      return Err(Error::InvalidClientData(format!("device OS {} is out of range", self.device_os)));
    }
    if self.game_version.is_empty()
      || !self.game_version.chars().all(|c| c.is_ascii_digit() || c == '.')
    {
      return Err(Error::InvalidClientData(format!(
        "game version `{}` is invalid",
        self.game_version
      )));
    }
    if self.skin_id.is_empty() {
      return Err(Error::InvalidClientData("skin ID is empty".into()));
    }
    Ok(())
  }
}
