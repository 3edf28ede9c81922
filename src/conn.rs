//! A single client connection. This wires the transport to the codec, drives
//! the login sequence, and exposes a socket shaped surface (read, write,
//! close, deadlines) plus typed packet reads and writes.

use crate::{
  codec::{Decoder, Encoder},
  crypto,
  login::Verifier,
  packet::{id, PackEntry, PackResponse, Packet, StackEntry, Status},
  resource::{PackQueue, ResourcePack},
  transport::Transport,
  Error, Result, CURRENT_PROTOCOL,
};
use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use p384::{PublicKey, SecretKey};
use parking_lot::Mutex;
use rand::{rngs::OsRng, RngCore};
use std::{
  io,
  net::SocketAddr,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  },
  thread,
  time::{Duration, Instant},
};

/// Where we are in the login sequence. The server drives this forward one
/// packet at a time; the client is never allowed to skip ahead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeState {
  AwaitLogin,
  AwaitClientHandshake,
  AwaitPackResponse,
  SendingPacks,
  AwaitPackCompletion,
  LoggedIn,
  Closed,
}

impl HandshakeState {
  /// The only packet ID accepted in this state. Anything else that arrives
  /// before login is discarded without a state change.
  fn expected_id(&self) -> Option<u32> {
    Some(match self {
      Self::AwaitLogin => id::LOGIN,
      Self::AwaitClientHandshake => id::CLIENT_TO_SERVER_HANDSHAKE,
      Self::AwaitPackResponse | Self::AwaitPackCompletion => id::RESOURCE_PACK_CLIENT_RESPONSE,
      Self::SendingPacks => id::RESOURCE_PACK_CHUNK_REQUEST,
      Self::LoggedIn | Self::Closed => return None,
    })
  }
}

struct Handshake {
  state:      HandshakeState,
  logged_in:  bool,
  pack_queue: Option<PackQueue>,
}

/// The outbound half of a connection. The flush worker owns a handle to this
/// rather than to the whole [`Conn`], so the worker and the connection don't
/// keep each other alive.
struct SendHalf {
  transport: Arc<dyn Transport>,
  encoder:   Mutex<Encoder>,
  buffered:  Mutex<Vec<Vec<u8>>>,
}

impl SendHalf {
  /// Encodes everything buffered as one batch and hands it to the transport.
  /// A no-op if nothing is buffered. The encoder lock is held across the
  /// buffer swap so concurrent flushes can't reorder batches.
  fn flush(&self) -> Result<()> {
    let mut encoder = self.encoder.lock();
    let frames = {
      let mut buf = self.buffered.lock();
      if buf.is_empty() {
        return Ok(());
      }
      std::mem::take(&mut *buf)
    };
    let batch = encoder.encode(&frames);
    self.transport.send(&batch)?;
    Ok(())
  }
}

/// Per connection options, set by the listener that accepted it.
pub struct ConnConfig {
  /// Each client will be asked to download these packs upon joining.
  pub resource_packs:         Vec<Arc<dyn ResourcePack>>,
  /// If true, clients that refuse the texture packs can only leave.
  pub texture_packs_required: bool,
  /// Verifies and decodes login request chains.
  pub verifier:               Arc<dyn Verifier>,
}

/// A Minecraft Bedrock Edition connection over some [`Transport`]. All
/// methods are safe to call from multiple threads simultaneously.
///
/// `read_packet` must not be called until the login sequence has finished
/// (`logged_in` returns true); before that the connection consumes its own
/// inbound queue to drive the handshake.
pub struct Conn {
  send:    Arc<SendHalf>,
  decoder: Mutex<Decoder>,

  /// Serialised frames coming in from the other side of the connection.
  packets:    Receiver<Vec<u8>>,
  packets_tx: Sender<Vec<u8>>,

  read_deadline: Mutex<Option<Instant>>,

  closed:   AtomicBool,
  close_tx: Mutex<Option<Sender<()>>>,
  close_rx: Receiver<()>,

  /// Our key for this connection. Every connection gets a fresh one.
  private_key: SecretKey,
  /// Random bytes mixed into key derivation, delivered to the client through
  /// the handshake JWT.
  salt:        [u8; 16],

  handshake: Mutex<Handshake>,

  resource_packs:         Vec<Arc<dyn ResourcePack>>,
  texture_packs_required: bool,
  verifier:               Arc<dyn Verifier>,
}

impl Conn {
  /// Creates a connection over an accepted transport and starts its workers:
  /// a reader that decodes inbound batches, and a flush task that sends
  /// buffered packets each 20th of a second. Both exit once the connection is
  /// closed.
  pub fn new(transport: Arc<dyn Transport>, config: ConnConfig) -> Arc<Conn> {
    let (packets_tx, packets) = bounded(32);
    let (close_tx, close_rx) = bounded(1);
    let mut salt = [0; 16];
    OsRng.fill_bytes(&mut salt);

    let send = Arc::new(SendHalf {
      transport: transport.clone(),
      encoder:   Mutex::new(Encoder::new()),
      buffered:  Mutex::new(vec![]),
    });
    let conn = Arc::new(Conn {
      send: send.clone(),
      decoder: Mutex::new(Decoder::new()),
      packets,
      packets_tx,
      read_deadline: Mutex::new(None),
      closed: AtomicBool::new(false),
      close_tx: Mutex::new(Some(close_tx)),
      close_rx: close_rx.clone(),
      private_key: SecretKey::random(&mut OsRng),
      salt,
      handshake: Mutex::new(Handshake {
        state:      HandshakeState::AwaitLogin,
        logged_in:  false,
        pack_queue: None,
      }),
      resource_packs: config.resource_packs,
      texture_packs_required: config.texture_packs_required,
      verifier: config.verifier,
    });

    thread::spawn(move || {
      let ticker = tick(Duration::from_millis(50));
      loop {
        select! {
          recv(ticker) -> _ => {
            if let Err(e) = send.flush() {
              error!("error flushing batch: {}", e);
              // The transport is dead; closing it lets the reader shut the
              // rest of the connection down.
              let _ = send.transport.close();
              return;
            }
          }
          recv(close_rx) -> _ => return,
        }
      }
    });

    let reader = conn.clone();
    thread::spawn(move || loop {
      let batch = match reader.send.transport.recv() {
        Ok(b) => b,
        Err(_) => {
          let _ = reader.close();
          return;
        }
      };
      if let Err(e) = reader.handle_batch(&batch) {
        if e.is_fatal() {
          if !reader.closed.load(Ordering::SeqCst) {
            error!("error handling batch from {}: {}", reader.remote_addr(), e);
          }
          let _ = reader.close();
          return;
        }
      }
      if reader.closed.load(Ordering::SeqCst) {
        return;
      }
    });

    conn
  }

  /// Encodes the packet and writes it to the connection. The data is buffered
  /// until the next 20th of a second, after which it is flushed as part of a
  /// batch.
  pub fn write_packet(&self, pk: &Packet) -> Result<()> {
    self.write(&pk.serialize())?;
    Ok(())
  }

  /// Writes a serialised frame to the connection. Like `write_packet`, the
  /// data is buffered until the next flush. The returned count is the length
  /// of `b`: the frame is accepted in full or not at all.
  pub fn write(&self, b: &[u8]) -> Result<usize> {
    self.send.buffered.lock().push(b.to_vec());
    Ok(b.len())
  }

  /// Reads a typed packet from the connection. IDs we haven't implemented
  /// come back as [`Packet::Unknown`] carrying the raw payload. Respects the
  /// read deadline, and fails with [`Error::Closed`] once the connection is
  /// closed.
  pub fn read_packet(&self) -> Result<Packet> {
    Packet::deserialize(self.next_frame()?)
  }

  /// Reads a raw frame into the byte slice passed, provided the slice is big
  /// enough to carry the full frame. It is recommended to use `read_packet`
  /// rather than `read` in cases where reading is done directly.
  pub fn read(&self, b: &mut [u8]) -> Result<usize> {
    let frame = self.next_frame()?;
    if b.len() < frame.len() {
      return Err(Error::Decode("frame is larger than the read buffer"));
    }
    b[..frame.len()].copy_from_slice(&frame);
    Ok(frame.len())
  }

  fn next_frame(&self) -> Result<Vec<u8>> {
    if self.closed.load(Ordering::SeqCst) {
      return Err(Error::Closed);
    }
    let deadline = *self.read_deadline.lock();
    match deadline {
      Some(t) => select! {
        recv(self.packets) -> frame => frame.map_err(|_| Error::Closed),
        recv(self.close_rx) -> _ => Err(Error::Closed),
        default(t.saturating_duration_since(Instant::now())) => Err(Error::Timeout),
      },
      None => select! {
        recv(self.packets) -> frame => frame.map_err(|_| Error::Closed),
        recv(self.close_rx) -> _ => Err(Error::Closed),
      },
    }
  }

  /// Flushes everything written since the last flush to the transport as a
  /// single batch. Packets are normally flushed on a timer; this only needs
  /// to be called to get something out right away.
  pub fn flush(&self) -> Result<()> { self.send.flush() }

  /// Closes the connection and its underlying transport. Anything still
  /// buffered is flushed first. Close is idempotent; only the first call does
  /// anything.
  pub fn close(&self) -> Result<()> {
    if self.closed.swap(true, Ordering::SeqCst) {
      return Ok(());
    }
    self.handshake.lock().state = HandshakeState::Closed;
    let _ = self.flush();
    // Dropping the sender is the broadcast: every select on the close channel
    // wakes up, now and forever.
    self.close_tx.lock().take();
    self.send.transport.close()?;
    Ok(())
  }

  /// Writes a disconnect packet with the given message, then closes the
  /// connection.
  pub fn disconnect(&self, message: &str) -> Result<()> {
    self.write_packet(&Packet::Disconnect { hide_screen: false, message: message.into() })?;
    self.close()
  }

  /// Returns true once the entire login sequence has completed.
  pub fn logged_in(&self) -> bool { self.handshake.lock().logged_in }

  pub fn local_addr(&self) -> SocketAddr { self.send.transport.local_addr() }
  pub fn remote_addr(&self) -> SocketAddr { self.send.transport.remote_addr() }

  /// Sets the deadline shared by `read` and `read_packet`. `None` clears the
  /// deadline, making reads block until data or close. A later call replaces
  /// the deadline from an earlier one.
  pub fn set_read_deadline(&self, deadline: Option<Instant>) -> Result<()> {
    if let Some(t) = deadline {
      if t < Instant::now() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "deadline has already passed").into());
      }
    }
    *self.read_deadline.lock() = deadline;
    Ok(())
  }

  /// Writes are buffered and never block on the transport, so a write
  /// deadline has nothing to bound. Accepted for interface compatibility.
  pub fn set_write_deadline(&self, _deadline: Option<Instant>) -> Result<()> { Ok(()) }

  /// Sets both deadlines at once. Equivalent to `set_read_deadline`, as the
  /// write deadline has no effect.
  pub fn set_deadline(&self, deadline: Option<Instant>) -> Result<()> {
    self.set_read_deadline(deadline)
  }

  fn handle_batch(&self, batch: &[u8]) -> Result<()> {
    let frames = self.decoder.lock().decode(batch)?;
    for frame in frames {
      self.handle_incoming(frame)?;
    }
    Ok(())
  }

  /// Handles an incoming serialised frame. The frame always lands on the
  /// inbound queue; before login it is also dequeued right here and run
  /// through the handshake.
  fn handle_incoming(&self, frame: Vec<u8>) -> Result<()> {
    select! {
      send(self.packets_tx, frame) -> res => res.map_err(|_| Error::Closed)?,
      recv(self.close_rx) -> _ => return Err(Error::Closed),
    }
    if self.logged_in() {
      return Ok(());
    }

    let pk = self.read_packet()?;
    let expected = self.handshake.lock().state.expected_id();
    if Some(pk.id()) != expected {
      // Not the packet we expected next in the login sequence. It might be
      // something like a movement that was simply sent too early, so we just
      // ignore it.
      debug!("discarding packet {:#x} sent during the login sequence", pk.id());
      return Ok(());
    }
    match pk {
      Packet::Login { client_protocol, connection_request } => {
        self.handle_login(client_protocol, &connection_request)
      }
      Packet::ClientToServerHandshake => self.handle_client_to_server_handshake(),
      Packet::ResourcePackClientResponse { response, packs_to_download } => {
        self.handle_pack_response(response, &packs_to_download)
      }
      Packet::ResourcePackChunkRequest { uuid, chunk_index } => {
        self.handle_chunk_request(&uuid, chunk_index)
      }
      _ => Ok(()),
    }
  }

  /// Handles an incoming login packet: checks the protocol version, verifies
  /// and decodes the login chain, and kicks off encryption.
  fn handle_login(&self, client_protocol: i32, request: &[u8]) -> Result<()> {
    self.handshake.lock().state = HandshakeState::AwaitClientHandshake;

    if client_protocol != CURRENT_PROTOCOL {
      // An older client gets told it is outdated; a newer one that we are.
      let status = if client_protocol < CURRENT_PROTOCOL {
        Status::LoginFailedClient
      } else {
        Status::LoginFailedServer
      };
      let _ = self.write_packet(&Packet::PlayStatus { status });
      let _ = self.close();
      return Err(Error::ProtocolMismatch { client: client_protocol, server: CURRENT_PROTOCOL });
    }

    let verified = self.verifier.verify(request)?;
    if !verified.xbox_auth {
      return Err(Error::NotAuthenticated);
    }
    let (identity, client_data) = self.verifier.decode(request)?;
    identity.validate()?;
    client_data.validate()?;
    info!("player {} is joining from {}", identity.display_name, self.remote_addr());

    self.enable_encryption(&verified.public_key)
  }

  /// Sends the unencrypted handshake JWT, then switches both halves of the
  /// codec to encrypted batches. The very next batch in either direction is
  /// encrypted.
  fn enable_encryption(&self, client_public: &PublicKey) -> Result<()> {
    let jwt = crypto::handshake_jwt(&self.private_key, &self.salt);
    self.write_packet(&Packet::ServerToClientHandshake { jwt })?;
    // Flush immediately, as we enable encryption right after this.
    self.flush()?;

    let key = crypto::shared_key(&self.private_key, client_public, &self.salt);
    self.send.encoder.lock().enable_encryption(key);
    self.decoder.lock().enable_encryption(key);
    Ok(())
  }

  fn handle_client_to_server_handshake(&self) -> Result<()> {
    self.handshake.lock().state = HandshakeState::AwaitPackResponse;

    self.write_packet(&Packet::PlayStatus { status: Status::LoginSuccess })?;

    let mut has_scripts = false;
    let mut behaviour_packs = vec![];
    let mut texture_packs = vec![];
    for pack in &self.resource_packs {
      let entry = PackEntry {
        uuid:        pack.uuid().into(),
        version:     pack.version().into(),
        size:        pack.len(),
        has_scripts: pack.has_scripts(),
      };
      if pack.has_scripts() {
        has_scripts = true;
      }
      if pack.has_behaviours() {
        behaviour_packs.push(entry);
      } else {
        texture_packs.push(entry);
      }
    }
    self.write_packet(&Packet::ResourcePacksInfo {
      texture_pack_required: self.texture_packs_required,
      has_scripts,
      behaviour_packs,
      texture_packs,
    })
  }

  fn handle_pack_response(&self, response: PackResponse, ids: &[String]) -> Result<()> {
    match response {
      PackResponse::Refused => self.close(),
      PackResponse::SendPacks => {
        let mut queue = PackQueue::new(self.resource_packs.clone());
        queue.request(ids)?;
        // Packs are downloaded in sequence rather than in parallel, as it's
        // less prone to packet loss.
        let info = match queue.next_pack() {
          Some(info) => info,
          None => return Err(Error::Decode("client requested to download no packs")),
        };
        {
          let mut hs = self.handshake.lock();
          hs.pack_queue = Some(queue);
          hs.state = HandshakeState::SendingPacks;
        }
        self.write_packet(&info)
      }
      PackResponse::AllPacksDownloaded => {
        self.handshake.lock().state = HandshakeState::AwaitPackCompletion;

        let mut behaviour_packs = vec![];
        let mut texture_packs = vec![];
        for pack in &self.resource_packs {
          let entry = StackEntry { uuid: pack.uuid().into(), version: pack.version().into() };
          if pack.has_behaviours() {
            behaviour_packs.push(entry);
          } else {
            texture_packs.push(entry);
          }
        }
        self.write_packet(&Packet::ResourcePackStack {
          texture_pack_required: self.texture_packs_required,
          behaviour_packs,
          texture_packs,
        })
      }
      PackResponse::Completed => {
        // This is as far as the connection can take the login sequence. The
        // packet that follows is StartGame, which is the world's business.
        let mut hs = self.handshake.lock();
        hs.logged_in = true;
        hs.state = HandshakeState::LoggedIn;
        drop(hs);
        info!("client {} has finished logging in", self.remote_addr());
        Ok(())
      }
      PackResponse::None => Err(Error::UnknownPackResponse(response as u8)),
    }
  }

  /// Handles a request for one chunk of the pack currently being downloaded.
  /// The client must request chunks strictly in order, and only for the pack
  /// we announced last.
  fn handle_chunk_request(&self, uuid: &str, chunk_index: u32) -> Result<()> {
    let mut guard = self.handshake.lock();
    let hs = &mut *guard;
    let queue =
      hs.pack_queue.as_mut().ok_or(Error::Decode("chunk request without a pack queue"))?;

    {
      let current =
        queue.current().ok_or(Error::Decode("chunk request without a current pack"))?;
      if current.uuid() != uuid {
        return Err(Error::UnexpectedPack { expected: current.uuid().into(), got: uuid.into() });
      }
    }
    if chunk_index != queue.expected_index() {
      return Err(Error::PackChunkMisordered { expected: queue.expected_index(), got: chunk_index });
    }

    let chunk = queue.read_chunk()?;
    let eof = chunk.eof;
    self.write_packet(&Packet::ResourcePackChunkData {
      uuid:        uuid.into(),
      chunk_index,
      data_offset: chunk.offset,
      data:        chunk.data,
    })?;
    queue.advance_chunk();

    if eof {
      if queue.all_downloaded() {
        // Every queued pack is done; the next thing the client sends is an
        // AllPacksDownloaded response.
        hs.state = HandshakeState::AwaitPackResponse;
      } else {
        let info = queue.next_pack().ok_or(Error::Decode("pack queue ran dry"))?;
        self.write_packet(&info)?;
      }
    }
    Ok(())
  }
}
