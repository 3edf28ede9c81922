//! Key agreement for the encrypted half of a session. The server proves its
//! key and delivers the salt through a signed JWT, then both sides derive the
//! same AES key from an ECDH exchange on P-384.

use p384::{
  ecdh,
  ecdsa::{signature::Signer, Signature, SigningKey},
  pkcs8::EncodePublicKey,
  PublicKey, SecretKey,
};
use serde_derive::Serialize;
use sha2::{Digest, Sha256};

/// Derives the symmetric batch key: SHA-256(salt || x), where x is the big
/// endian X coordinate of the client public key multiplied by our private
/// scalar. Both sides compute the same value with the roles swapped.
pub fn shared_key(private: &SecretKey, remote_public: &PublicKey, salt: &[u8; 16]) -> [u8; 32] {
  let shared = ecdh::diffie_hellman(private.to_nonzero_scalar(), remote_public.as_affine());
  let mut hasher = Sha256::new();
  hasher.update(salt);
  hasher.update(shared.raw_secret_bytes());
  hasher.finalize().into()
}

#[derive(Serialize)]
struct Header {
  alg: &'static str,
  x5u: String,
}

#[derive(Serialize)]
struct Claims {
  salt: String,
}

fn segment(json: &str) -> String { base64::encode_config(json, base64::URL_SAFE_NO_PAD) }

/// Builds the ES384 signed JWT for the server to client handshake. The header
/// carries our public key (base64 of the DER SubjectPublicKeyInfo) in `x5u`,
/// and the payload carries the base64url salt the client needs for key
/// derivation.
pub fn handshake_jwt(private: &SecretKey, salt: &[u8; 16]) -> String {
  let der = private.public_key().to_public_key_der().expect("P-384 keys always encode");
  let header = Header { alg: "ES384", x5u: base64::encode(der.as_bytes()) };
  let claims = Claims { salt: base64::encode_config(salt, base64::URL_SAFE_NO_PAD) };

  let mut jwt = segment(&serde_json::to_string(&header).unwrap());
  jwt.push('.');
  jwt.push_str(&segment(&serde_json::to_string(&claims).unwrap()));

  let sig: Signature = SigningKey::from(private).sign(jwt.as_bytes());
  jwt.push('.');
  jwt.push_str(&base64::encode_config(sig.to_vec(), base64::URL_SAFE_NO_PAD));
  jwt
}

#[cfg(test)]
mod tests {
  use super::*;
  use p384::{
    ecdsa::{signature::Verifier, VerifyingKey},
    pkcs8::DecodePublicKey,
  };
  use rand::rngs::OsRng;

  #[test]
  fn shared_key_is_symmetric() {
    let server = SecretKey::random(&mut OsRng);
    let client = SecretKey::random(&mut OsRng);
    let salt = [3; 16];

    let a = shared_key(&server, &client.public_key(), &salt);
    let b = shared_key(&client, &server.public_key(), &salt);
    assert_eq!(a, b);

    // A different salt must give a different key.
    let c = shared_key(&server, &client.public_key(), &[4; 16]);
    assert_ne!(a, c);
  }

  #[test]
  fn jwt_carries_key_and_salt() {
    let key = SecretKey::random(&mut OsRng);
    let salt = [9; 16];
    let jwt = handshake_jwt(&key, &salt);

    let parts: Vec<&str> = jwt.split('.').collect();
    assert_eq!(parts.len(), 3);

    let header: serde_json::Value =
      serde_json::from_slice(&base64::decode_config(parts[0], base64::URL_SAFE_NO_PAD).unwrap())
        .unwrap();
    assert_eq!(header["alg"], "ES384");
    let der = base64::decode(header["x5u"].as_str().unwrap()).unwrap();
    assert_eq!(PublicKey::from_public_key_der(&der).unwrap(), key.public_key());

    let claims: serde_json::Value =
      serde_json::from_slice(&base64::decode_config(parts[1], base64::URL_SAFE_NO_PAD).unwrap())
        .unwrap();
    let got_salt =
      base64::decode_config(claims["salt"].as_str().unwrap(), base64::URL_SAFE_NO_PAD).unwrap();
    assert_eq!(got_salt, salt);
  }

  #[test]
  fn jwt_signature_verifies() {
    let key = SecretKey::random(&mut OsRng);
    let jwt = handshake_jwt(&key, &[0; 16]);

    let dot = jwt.rfind('.').unwrap();
    let (msg, sig) = (&jwt[..dot], &jwt[dot + 1..]);
    let sig_bytes = base64::decode_config(sig, base64::URL_SAFE_NO_PAD).unwrap();
    let sig = Signature::from_slice(&sig_bytes).unwrap();
    VerifyingKey::from(SigningKey::from(&key)).verify(msg.as_bytes(), &sig).unwrap();
  }
}
