//! Test doubles for driving a connection from the client side: an in-memory
//! transport pipe, an in-memory resource pack, a stub chain verifier, and a
//! minimal client that speaks just enough of the protocol to log in.

use bedrock_conn::{
  codec::{Decoder, Encoder},
  crypto,
  login::{ClientData, IdentityData, Verified, Verifier},
  packet::Packet,
  resource::ResourcePack,
  Conn, ConnConfig, Result, Transport,
};
use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender};
use p384::{pkcs8::DecodePublicKey, PublicKey, SecretKey};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::{
  collections::VecDeque,
  io,
  net::SocketAddr,
  sync::Arc,
  time::{Duration, Instant},
};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// One end of an in-memory transport. Both ends preserve message boundaries,
/// like the RakNet layer the crate expects underneath it.
pub struct Pipe {
  tx:       Mutex<Option<Sender<Vec<u8>>>>,
  pub rx:   Receiver<Vec<u8>>,
  close_tx: Mutex<Option<Sender<()>>>,
  close_rx: Receiver<()>,
  local:    SocketAddr,
  remote:   SocketAddr,
}

pub fn pipe() -> (Pipe, Pipe) {
  let server: SocketAddr = "127.0.0.1:19132".parse().unwrap();
  let client: SocketAddr = "127.0.0.1:51234".parse().unwrap();
  let (a_tx, a_rx) = bounded(64);
  let (b_tx, b_rx) = bounded(64);
  let end = |tx, rx, local, remote| {
    let (close_tx, close_rx) = bounded(1);
    Pipe {
      tx: Mutex::new(Some(tx)),
      rx,
      close_tx: Mutex::new(Some(close_tx)),
      close_rx,
      local,
      remote,
    }
  };
  (end(a_tx, b_rx, server, client), end(b_tx, a_rx, client, server))
}

impl Transport for Pipe {
  fn send(&self, batch: &[u8]) -> io::Result<()> {
    match &*self.tx.lock() {
      Some(tx) => tx
        .send(batch.to_vec())
        .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer is gone")),
      None => Err(io::Error::new(io::ErrorKind::NotConnected, "transport is closed")),
    }
  }

  fn recv(&self) -> io::Result<Vec<u8>> {
    select! {
      recv(self.rx) -> msg => {
        msg.map_err(|_| io::Error::new(io::ErrorKind::ConnectionAborted, "peer is gone"))
      }
      recv(self.close_rx) -> _ => {
        Err(io::Error::new(io::ErrorKind::NotConnected, "transport is closed"))
      }
    }
  }

  fn local_addr(&self) -> SocketAddr { self.local }
  fn remote_addr(&self) -> SocketAddr { self.remote }

  fn close(&self) -> io::Result<()> {
    self.tx.lock().take();
    self.close_tx.lock().take();
    Ok(())
  }
}

/// A resource pack held entirely in memory.
pub struct MemoryPack {
  pub uuid:       String,
  pub version:    String,
  pub data:       Vec<u8>,
  pub behaviours: bool,
}

impl MemoryPack {
  pub fn new(uuid: &str, len: usize) -> Arc<dyn ResourcePack> {
    Arc::new(MemoryPack {
      uuid:       uuid.into(),
      version:    "1.0.0".into(),
      data:       (0..len).map(|i| i as u8).collect(),
      behaviours: false,
    })
  }
}

impl ResourcePack for MemoryPack {
  fn uuid(&self) -> &str { &self.uuid }
  fn version(&self) -> &str { &self.version }
  fn len(&self) -> u64 { self.data.len() as u64 }
  fn has_scripts(&self) -> bool { false }
  fn has_behaviours(&self) -> bool { self.behaviours }
  fn content_hash(&self) -> [u8; 32] { Sha256::digest(&self.data).into() }
  fn read_at(&self, dst: &mut [u8], offset: u64) -> io::Result<usize> {
    let start = (offset as usize).min(self.data.len());
    let end = (start + dst.len()).min(self.data.len());
    dst[..end - start].copy_from_slice(&self.data[start..end]);
    Ok(end - start)
  }
}

/// A verifier that trusts whatever it is given. The public key handed back is
/// fixed at construction, so tests control both halves of the key agreement.
pub struct StubVerifier {
  pub public_key: PublicKey,
  pub xbox_auth:  bool,
}

impl Verifier for StubVerifier {
  fn verify(&self, _request: &[u8]) -> Result<Verified> {
    Ok(Verified { public_key: self.public_key.clone(), xbox_auth: self.xbox_auth })
  }

  fn decode(&self, _request: &[u8]) -> Result<(IdentityData, ClientData)> {
    Ok((
      IdentityData {
        xuid:         "2535400000000000".into(),
        identity:     "8f50d145-20e4-4266-b59f-014a3b273fbb".into(),
        display_name: "Steve".into(),
        title_id:     String::new(),
      },
      ClientData {
        device_os:     7,
        device_id:     "device".into(),
        game_version:  "1.14.60".into(),
        language_code: "en_US".into(),
        skin_id:       "skin".into(),
      },
    ))
  }
}

/// The client side of a connection under test. Owns its own codec pair, so it
/// sees exactly what a real client would see on the wire.
pub struct Client {
  transport: Pipe,
  enc:       Encoder,
  dec:       Decoder,
  secret:    SecretKey,
  queued:    VecDeque<Packet>,
}

impl Client {
  pub fn new(transport: Pipe, secret: SecretKey) -> Client {
    Client { transport, enc: Encoder::new(), dec: Decoder::new(), secret, queued: VecDeque::new() }
  }

  /// The raw inbound batch channel, for tests that assert on batches rather
  /// than packets.
  pub fn rx(&self) -> &Receiver<Vec<u8>> { &self.transport.rx }

  pub fn send(&mut self, pk: &Packet) {
    let batch = self.enc.encode(&[pk.serialize()]);
    self.transport.send(&batch).expect("server hung up");
  }

  /// Receives the next packet, decoding batches as they come in. Panics if
  /// nothing arrives in time.
  pub fn recv(&mut self) -> Packet {
    while self.queued.is_empty() {
      let batch = self.transport.rx.recv_timeout(RECV_TIMEOUT).expect("expected a batch");
      for frame in self.dec.decode(&batch).expect("bad batch from server") {
        self.queued.push_back(Packet::deserialize(frame).expect("bad frame from server"));
      }
    }
    self.queued.pop_front().unwrap()
  }

  /// Asserts that the server closes the transport, draining (and discarding)
  /// anything it still sends first.
  pub fn expect_closed(&mut self) {
    loop {
      match self.transport.rx.recv_timeout(RECV_TIMEOUT) {
        Ok(_) => continue,
        Err(RecvTimeoutError::Disconnected) => return,
        Err(RecvTimeoutError::Timeout) => panic!("server did not close the connection"),
      }
    }
  }

  /// Asserts the server closes the transport without sending anything at all.
  pub fn expect_closed_silently(&mut self) {
    assert!(self.queued.is_empty(), "unexpected queued packets: {:?}", self.queued);
    match self.transport.rx.recv_timeout(RECV_TIMEOUT) {
      Ok(batch) => panic!("expected silence, got a batch of {} bytes", batch.len()),
      Err(RecvTimeoutError::Disconnected) => {}
      Err(RecvTimeoutError::Timeout) => panic!("server did not close the connection"),
    }
  }

  /// Runs the login half of the handshake: sends the login, consumes the
  /// server handshake JWT, derives the shared key the same way the server
  /// does, and switches this client's codec to encrypted batches.
  pub fn login(&mut self, protocol: i32) {
    self.send(&Packet::Login { client_protocol: protocol, connection_request: b"chain".to_vec() });

    let jwt = match self.recv() {
      Packet::ServerToClientHandshake { jwt } => jwt,
      p => panic!("expected a handshake, got {p:?}"),
    };
    let parts: Vec<&str> = jwt.split('.').collect();
    let header: serde_json::Value =
      serde_json::from_slice(&base64::decode_config(parts[0], base64::URL_SAFE_NO_PAD).unwrap())
        .unwrap();
    let claims: serde_json::Value =
      serde_json::from_slice(&base64::decode_config(parts[1], base64::URL_SAFE_NO_PAD).unwrap())
        .unwrap();
    let der = base64::decode(header["x5u"].as_str().unwrap()).unwrap();
    let server_public = PublicKey::from_public_key_der(&der).unwrap();
    let salt: [u8; 16] =
      base64::decode_config(claims["salt"].as_str().unwrap(), base64::URL_SAFE_NO_PAD)
        .unwrap()
        .try_into()
        .unwrap();

    let key = crypto::shared_key(&self.secret, &server_public, &salt);
    self.enc.enable_encryption(key);
    self.dec.enable_encryption(key);

    self.send(&Packet::ClientToServerHandshake);
  }
}

/// Spins up a connection over an in-memory pipe, returning the server side
/// and a client driving the other end.
pub fn new_conn(packs: Vec<Arc<dyn ResourcePack>>, xbox_auth: bool) -> (Arc<Conn>, Client) {
  let (server_end, client_end) = pipe();
  let secret = SecretKey::random(&mut OsRng);
  let verifier = Arc::new(StubVerifier { public_key: secret.public_key(), xbox_auth });
  let conn = Conn::new(
    Arc::new(server_end),
    ConnConfig { resource_packs: packs, texture_packs_required: false, verifier },
  );
  (conn, Client::new(client_end, secret))
}

/// Polls until the connection reports a completed login.
pub fn wait_logged_in(conn: &Conn) {
  let deadline = Instant::now() + RECV_TIMEOUT;
  while !conn.logged_in() {
    assert!(Instant::now() < deadline, "login never completed");
    std::thread::sleep(Duration::from_millis(10));
  }
}
