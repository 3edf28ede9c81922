//! Converts between frames and batches. A batch is the transport unit: one or
//! more length prefixed frames, deflated, and (once the handshake enables it)
//! encrypted with a trailing checksum.

use crate::{util::Buffer, Error, Result};
use aes::Aes256;
use ctr::{
  cipher::{KeyIvInit, StreamCipher},
  Ctr128BE,
};
use miniz_oxide::{deflate::compress_to_vec, inflate::decompress_to_vec_with_limit};
use sha2::{Digest, Sha256};

/// The constant first byte of every batch.
pub const BATCH_HEADER: u8 = 0xfe;

/// The largest decompressed size we'll accept for a single inbound batch.
/// This is about 2 mb, the same bound vanilla uses for packets.
const MAX_BATCH_SIZE: usize = 0x1fffff;

type Aes256Ctr = Ctr128BE<Aes256>;

/// One direction of the symmetric cipher. The keystream runs continuously
/// across batches, and the counter advances once per batch.
struct Crypt {
  cipher:  Aes256Ctr,
  counter: u64,
  key:     [u8; 32],
}

impl Crypt {
  fn new(key: [u8; 32]) -> Self {
    // The IV is the first half of the key. Both sides derive the same key, so
    // both ends of each direction agree on the keystream.
    let iv: [u8; 16] = key[..16].try_into().unwrap();
    Crypt { cipher: Aes256Ctr::new(&key.into(), &iv.into()), counter: 0, key }
  }

  /// The batch checksum: SHA-256 over the batch counter, the deflated
  /// payload, and the shared key, truncated to 8 bytes.
  fn checksum(&self, payload: &[u8]) -> [u8; 8] {
    let mut hasher = Sha256::new();
    hasher.update(self.counter.to_le_bytes());
    hasher.update(payload);
    hasher.update(self.key);
    hasher.finalize()[..8].try_into().unwrap()
  }
}

/// Turns lists of serialised frames into outbound batches.
pub struct Encoder {
  crypt: Option<Crypt>,
}

impl Encoder {
  pub fn new() -> Self { Encoder { crypt: None } }

  /// Switches this encoder from plaintext to encrypted batches. Does nothing
  /// if encryption is already enabled; it cannot be disabled again.
  pub fn enable_encryption(&mut self, key: [u8; 32]) {
    if self.crypt.is_none() {
      self.crypt = Some(Crypt::new(key));
    }
  }

  pub fn encrypted(&self) -> bool { self.crypt.is_some() }

  /// Encodes the given frames as a single batch.
  pub fn encode(&mut self, frames: &[Vec<u8>]) -> Vec<u8> {
    let mut buf = Buffer::new(Vec::with_capacity(64));
    for frame in frames {
      buf.write_varuint(frame.len() as u32);
      buf.write_buf(frame);
    }
    let mut payload = compress_to_vec(&buf.into_inner(), 6);
    if let Some(c) = &mut self.crypt {
      let sum = c.checksum(&payload);
      payload.extend_from_slice(&sum);
      c.cipher.apply_keystream(&mut payload);
      c.counter += 1;
    }
    let mut batch = Vec::with_capacity(payload.len() + 1);
    batch.push(BATCH_HEADER);
    batch.extend_from_slice(&payload);
    batch
  }
}

impl Default for Encoder {
  fn default() -> Self { Encoder::new() }
}

/// Turns inbound batches back into lists of raw frame payloads.
pub struct Decoder {
  crypt: Option<Crypt>,
}

impl Decoder {
  pub fn new() -> Self { Decoder { crypt: None } }

  /// Switches this decoder to expect encrypted batches. Does nothing if
  /// encryption is already enabled; it cannot be disabled again.
  pub fn enable_encryption(&mut self, key: [u8; 32]) {
    if self.crypt.is_none() {
      self.crypt = Some(Crypt::new(key));
    }
  }

  pub fn encrypted(&self) -> bool { self.crypt.is_some() }

  /// Decodes one batch into its frames. An invalid checksum, invalid deflate
  /// data or a bad header means the connection is broken, and the caller
  /// should terminate it.
  pub fn decode(&mut self, batch: &[u8]) -> Result<Vec<Vec<u8>>> {
    match batch.first() {
      Some(&BATCH_HEADER) => {}
      _ => return Err(Error::Decode("invalid batch header")),
    }
    let mut payload = batch[1..].to_vec();
    if let Some(c) = &mut self.crypt {
      if payload.len() < 8 {
        return Err(Error::Encryption("batch is too short to hold a checksum"));
      }
      c.cipher.apply_keystream(&mut payload);
      let sum = payload.split_off(payload.len() - 8);
      if sum != c.checksum(&payload) {
        return Err(Error::Encryption("batch checksum mismatch"));
      }
      c.counter += 1;
    }
    let data = decompress_to_vec_with_limit(&payload, MAX_BATCH_SIZE)
      .map_err(|_| Error::Decode("invalid deflate data"))?;

    let mut buf = Buffer::new(data);
    let mut frames = vec![];
    while buf.remaining() > 0 {
      let len = buf.read_varuint()? as usize;
      frames.push(buf.read_buf(len)?);
    }
    Ok(frames)
  }
}

impl Default for Decoder {
  fn default() -> Self { Decoder::new() }
}
