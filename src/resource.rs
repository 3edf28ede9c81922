//! Resource packs are streamed to the client in fixed size chunks, one pack
//! at a time. The queue tracks which packs the client asked for and how far
//! into the current pack we are.

use crate::{packet::Packet, Error, Result};
use std::{collections::VecDeque, io, sync::Arc};

/// The size of a single chunk of data from a resource pack: 512 kB or 0.5 MB.
pub const CHUNK_SIZE: u64 = 1024 * 512;

/// A pack the server offers to joining clients. The connection never touches
/// pack contents beyond random access reads, so the archive format and where
/// the bytes live is up to the implementation.
pub trait ResourcePack: Send + Sync {
  /// The UUID of the pack, as offered to the client.
  fn uuid(&self) -> &str;
  /// The version string of the pack, such as `1.0.0`.
  fn version(&self) -> &str;
  /// The total size of the pack in bytes.
  fn len(&self) -> u64;
  fn is_empty(&self) -> bool { self.len() == 0 }
  fn has_scripts(&self) -> bool;
  fn has_behaviours(&self) -> bool;
  /// SHA-256 of the pack contents, sent ahead of the chunks so the client can
  /// check the download.
  fn content_hash(&self) -> [u8; 32];
  /// Reads bytes at the given offset into `dst`. Returns the number of bytes
  /// read, which is less than `dst.len()` only at the end of the pack.
  fn read_at(&self, dst: &mut [u8], offset: u64) -> io::Result<usize>;
}

/// A chunk read out of the current pack.
pub struct Chunk {
  pub data:   Vec<u8>,
  pub offset: u64,
  /// True if this chunk reaches the end of the current pack.
  pub eof:    bool,
}

/// The queue of packs a client still has to download. Packs are streamed in
/// sequence rather than in parallel, as it's less prone to packet loss.
pub struct PackQueue {
  packs:          Vec<Arc<dyn ResourcePack>>,
  queue:          VecDeque<Arc<dyn ResourcePack>>,
  current:        Option<Arc<dyn ResourcePack>>,
  current_offset: u64,
}

impl PackQueue {
  pub fn new(packs: Vec<Arc<dyn ResourcePack>>) -> Self {
    PackQueue { packs, queue: VecDeque::new(), current: None, current_offset: 0 }
  }

  /// Builds the download queue from the IDs the client requested, in the
  /// client's order. The wire IDs may carry a `_version` suffix. Fails if any
  /// ID names a pack we never offered.
  pub fn request(&mut self, ids: &[String]) -> Result<()> {
    for id in ids {
      let uuid = id.split('_').next().unwrap_or(id);
      match self.packs.iter().find(|p| p.uuid() == uuid) {
        Some(pack) => self.queue.push_back(pack.clone()),
        None => return Err(Error::UnknownPack(id.clone())),
      }
    }
    Ok(())
  }

  /// Moves the cursor to the next queued pack and returns the data info
  /// packet describing it. Returns None once the queue is empty.
  pub fn next_pack(&mut self) -> Option<Packet> {
    let pack = self.queue.pop_front()?;
    self.current_offset = 0;
    let info = Packet::ResourcePackDataInfo {
      uuid:        pack.uuid().into(),
      chunk_size:  CHUNK_SIZE as u32,
      chunk_count: pack.len().div_ceil(CHUNK_SIZE) as u32,
      size:        pack.len(),
      hash:        pack.content_hash().to_vec(),
    };
    self.current = Some(pack);
    Some(info)
  }

  /// The pack currently being streamed.
  pub fn current(&self) -> Option<&Arc<dyn ResourcePack>> { self.current.as_ref() }

  /// The byte offset the next chunk will be read from. Always a multiple of
  /// [`CHUNK_SIZE`] while a pack is being streamed.
  pub fn current_offset(&self) -> u64 { self.current_offset }

  /// The chunk index the client is expected to request next.
  pub fn expected_index(&self) -> u32 { (self.current_offset / CHUNK_SIZE) as u32 }

  /// Reads the chunk at the cursor, without advancing it. The final chunk is
  /// truncated to the bytes that remain.
  pub fn read_chunk(&self) -> io::Result<Chunk> {
    let pack = self
      .current
      .as_ref()
      .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no pack is being streamed"))?;
    let mut data = vec![0; CHUNK_SIZE as usize];
    let n = pack.read_at(&mut data, self.current_offset)?;
    data.truncate(n);
    Ok(Chunk {
      data,
      offset: self.current_offset,
      eof: self.current_offset + n as u64 >= pack.len(),
    })
  }

  /// Moves the cursor past the chunk that was just transmitted.
  pub fn advance_chunk(&mut self) { self.current_offset += CHUNK_SIZE; }

  /// Returns true once every requested pack has been fully streamed.
  pub fn all_downloaded(&self) -> bool {
    self.queue.is_empty()
      && self.current.as_ref().map_or(true, |p| self.current_offset >= p.len())
  }
}
