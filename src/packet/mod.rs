//! The packets of the login sequence. Everything past the login sequence is
//! decoded as [`Packet::Unknown`], and is left for the caller to interpret.

use crate::{
  resource::CHUNK_SIZE,
  util::{Buffer, Mode::Reading},
  Result,
};
use std::io;

fn invalid_data(msg: String) -> io::Error { io::Error::new(io::ErrorKind::InvalidData, msg) }

/// Numeric packet IDs, as they appear on the wire in the frame header.
pub mod id {
  pub const LOGIN: u32 = 0x01;
  pub const PLAY_STATUS: u32 = 0x02;
  pub const SERVER_TO_CLIENT_HANDSHAKE: u32 = 0x03;
  pub const CLIENT_TO_SERVER_HANDSHAKE: u32 = 0x04;
  pub const DISCONNECT: u32 = 0x05;
  pub const RESOURCE_PACKS_INFO: u32 = 0x06;
  pub const RESOURCE_PACK_STACK: u32 = 0x07;
  pub const RESOURCE_PACK_CLIENT_RESPONSE: u32 = 0x08;
  pub const RESOURCE_PACK_DATA_INFO: u32 = 0x52;
  pub const RESOURCE_PACK_CHUNK_DATA: u32 = 0x53;
  pub const RESOURCE_PACK_CHUNK_REQUEST: u32 = 0x54;
}

/// The status code sent in a [`Packet::PlayStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Status {
  LoginSuccess = 0,
  LoginFailedClient = 1,
  LoginFailedServer = 2,
  PlayerSpawn = 3,
  LoginFailedInvalidTenant = 4,
  LoginFailedVanillaEdu = 5,
  LoginFailedEduVanilla = 6,
  LoginFailedServerFull = 7,
}

impl Status {
  pub fn from_i32(v: i32) -> Option<Self> {
    Some(match v {
      0 => Self::LoginSuccess,
      1 => Self::LoginFailedClient,
      2 => Self::LoginFailedServer,
      3 => Self::PlayerSpawn,
      4 => Self::LoginFailedInvalidTenant,
      5 => Self::LoginFailedVanillaEdu,
      6 => Self::LoginFailedEduVanilla,
      7 => Self::LoginFailedServerFull,
      _ => return None,
    })
  }
}

/// The response code sent in a [`Packet::ResourcePackClientResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PackResponse {
  None = 0,
  Refused = 1,
  SendPacks = 2,
  AllPacksDownloaded = 3,
  Completed = 4,
}

impl PackResponse {
  pub fn from_u8(v: u8) -> Option<Self> {
    Some(match v {
      0 => Self::None,
      1 => Self::Refused,
      2 => Self::SendPacks,
      3 => Self::AllPacksDownloaded,
      4 => Self::Completed,
      _ => return None,
    })
  }
}

/// A pack listed in a [`Packet::ResourcePacksInfo`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackEntry {
  pub uuid:        String,
  pub version:     String,
  pub size:        u64,
  pub has_scripts: bool,
}

/// A pack listed in a [`Packet::ResourcePackStack`]. The stack only names the
/// packs, as the client already has their contents by this point.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackEntry {
  pub uuid:    String,
  pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
  Login {
    client_protocol:    i32,
    connection_request: Vec<u8>,
  },
  PlayStatus {
    status: Status,
  },
  ServerToClientHandshake {
    jwt: String,
  },
  ClientToServerHandshake,
  Disconnect {
    hide_screen: bool,
    message:     String,
  },
  ResourcePacksInfo {
    texture_pack_required: bool,
    has_scripts:           bool,
    behaviour_packs:       Vec<PackEntry>,
    texture_packs:         Vec<PackEntry>,
  },
  ResourcePackStack {
    texture_pack_required: bool,
    behaviour_packs:       Vec<StackEntry>,
    texture_packs:         Vec<StackEntry>,
  },
  ResourcePackClientResponse {
    response:          PackResponse,
    packs_to_download: Vec<String>,
  },
  ResourcePackDataInfo {
    uuid:        String,
    chunk_size:  u32,
    chunk_count: u32,
    size:        u64,
    hash:        Vec<u8>,
  },
  ResourcePackChunkData {
    uuid:        String,
    chunk_index: u32,
    data_offset: u64,
    data:        Vec<u8>,
  },
  ResourcePackChunkRequest {
    uuid:        String,
    chunk_index: u32,
  },
  /// Any packet with an ID we haven't implemented. The payload is the raw
  /// packet body, without the frame header.
  Unknown {
    id:      u32,
    payload: Vec<u8>,
  },
}

// The longest string we'll accept for a pack UUID or version.
const MAX_PACK_ID_LEN: u64 = 128;
// Login chains are large, but anything past this is malicious.
const MAX_CHAIN_LEN: usize = 1024 * 1024;

impl Packet {
  /// Returns the numeric ID of this packet, as used in the frame header.
  pub fn id(&self) -> u32 {
    match self {
      Self::Login { .. } => id::LOGIN,
      Self::PlayStatus { .. } => id::PLAY_STATUS,
      Self::ServerToClientHandshake { .. } => id::SERVER_TO_CLIENT_HANDSHAKE,
      Self::ClientToServerHandshake => id::CLIENT_TO_SERVER_HANDSHAKE,
      Self::Disconnect { .. } => id::DISCONNECT,
      Self::ResourcePacksInfo { .. } => id::RESOURCE_PACKS_INFO,
      Self::ResourcePackStack { .. } => id::RESOURCE_PACK_STACK,
      Self::ResourcePackClientResponse { .. } => id::RESOURCE_PACK_CLIENT_RESPONSE,
      Self::ResourcePackDataInfo { .. } => id::RESOURCE_PACK_DATA_INFO,
      Self::ResourcePackChunkData { .. } => id::RESOURCE_PACK_CHUNK_DATA,
      Self::ResourcePackChunkRequest { .. } => id::RESOURCE_PACK_CHUNK_REQUEST,
      Self::Unknown { id, .. } => *id,
    }
  }

  /// Returns a default value of the packet registered for the given ID. IDs we
  /// haven't implemented produce an [`Packet::Unknown`] with an empty payload.
  pub fn from_id(id: u32) -> Packet {
    match id {
      id::LOGIN => Packet::Login { client_protocol: 0, connection_request: vec![] },
      id::PLAY_STATUS => Packet::PlayStatus { status: Status::LoginSuccess },
      id::SERVER_TO_CLIENT_HANDSHAKE => Packet::ServerToClientHandshake { jwt: String::new() },
      id::CLIENT_TO_SERVER_HANDSHAKE => Packet::ClientToServerHandshake,
      id::DISCONNECT => Packet::Disconnect { hide_screen: false, message: String::new() },
      id::RESOURCE_PACKS_INFO => Packet::ResourcePacksInfo {
        texture_pack_required: false,
        has_scripts:           false,
        behaviour_packs:       vec![],
        texture_packs:         vec![],
      },
      id::RESOURCE_PACK_STACK => Packet::ResourcePackStack {
        texture_pack_required: false,
        behaviour_packs:       vec![],
        texture_packs:         vec![],
      },
      id::RESOURCE_PACK_CLIENT_RESPONSE => Packet::ResourcePackClientResponse {
        response:          PackResponse::None,
        packs_to_download: vec![],
      },
      id::RESOURCE_PACK_DATA_INFO => Packet::ResourcePackDataInfo {
        uuid:        String::new(),
        chunk_size:  0,
        chunk_count: 0,
        size:        0,
        hash:        vec![],
      },
      id::RESOURCE_PACK_CHUNK_DATA => Packet::ResourcePackChunkData {
        uuid:        String::new(),
        chunk_index: 0,
        data_offset: 0,
        data:        vec![],
      },
      id::RESOURCE_PACK_CHUNK_REQUEST => {
        Packet::ResourcePackChunkRequest { uuid: String::new(), chunk_index: 0 }
      }
      _ => Packet::Unknown { id, payload: vec![] },
    }
  }

  /// Writes the packet body (everything after the frame header) to `buf`.
  pub fn marshal(&self, buf: &mut Buffer<Vec<u8>>) {
    match self {
      Self::Login { client_protocol, connection_request } => {
        buf.write_i32_be(*client_protocol);
        buf.write_byte_arr(connection_request);
      }
      Self::PlayStatus { status } => buf.write_i32_be(*status as i32),
      Self::ServerToClientHandshake { jwt } => buf.write_str(jwt),
      Self::ClientToServerHandshake => {}
      Self::Disconnect { hide_screen, message } => {
        buf.write_bool(*hide_screen);
        if !hide_screen {
          buf.write_str(message);
        }
      }
      Self::ResourcePacksInfo { texture_pack_required, has_scripts, behaviour_packs, texture_packs } => {
        buf.write_bool(*texture_pack_required);
        buf.write_bool(*has_scripts);
        for list in [behaviour_packs, texture_packs] {
          buf.write_u16(list.len() as u16);
          for e in list {
            buf.write_str(&e.uuid);
            buf.write_str(&e.version);
            buf.write_u64(e.size);
            buf.write_bool(e.has_scripts);
          }
        }
      }
      Self::ResourcePackStack { texture_pack_required, behaviour_packs, texture_packs } => {
        buf.write_bool(*texture_pack_required);
        for list in [behaviour_packs, texture_packs] {
          buf.write_varuint(list.len() as u32);
          for e in list {
            buf.write_str(&e.uuid);
            buf.write_str(&e.version);
          }
        }
      }
      Self::ResourcePackClientResponse { response, packs_to_download } => {
        buf.write_u8(*response as u8);
        buf.write_u16(packs_to_download.len() as u16);
        for id in packs_to_download {
          buf.write_str(id);
        }
      }
      Self::ResourcePackDataInfo { uuid, chunk_size, chunk_count, size, hash } => {
        buf.write_str(uuid);
        buf.write_u32(*chunk_size);
        buf.write_u32(*chunk_count);
        buf.write_u64(*size);
        buf.write_byte_arr(hash);
      }
      Self::ResourcePackChunkData { uuid, chunk_index, data_offset, data } => {
        buf.write_str(uuid);
        buf.write_u32(*chunk_index);
        buf.write_u64(*data_offset);
        buf.write_byte_arr(data);
      }
      Self::ResourcePackChunkRequest { uuid, chunk_index } => {
        buf.write_str(uuid);
        buf.write_u32(*chunk_index);
      }
      Self::Unknown { payload, .. } => buf.write_buf(payload),
    }
  }

  /// Reads the packet body from `buf`, replacing every field of self. Self
  /// should be the value returned from [`Packet::from_id`] for the frame's
  /// header ID.
  pub fn unmarshal(&mut self, buf: &mut Buffer<Vec<u8>>) -> Result<()> {
    match self {
      Self::Login { client_protocol, connection_request } => {
        *client_protocol = buf.read_i32_be()?;
        *connection_request = buf.read_byte_arr_max(MAX_CHAIN_LEN)?;
      }
      Self::PlayStatus { status } => {
        let v = buf.read_i32_be()?;
        *status = Status::from_i32(v)
          .ok_or_else(|| buf.err(invalid_data(format!("unknown play status {v}")), Reading))?;
      }
      Self::ServerToClientHandshake { jwt } => *jwt = buf.read_str(u64::MAX)?,
      Self::ClientToServerHandshake => {}
      Self::Disconnect { hide_screen, message } => {
        *hide_screen = buf.read_bool()?;
        if !*hide_screen {
          *message = buf.read_str(1024)?;
        }
      }
      Self::ResourcePacksInfo { texture_pack_required, has_scripts, behaviour_packs, texture_packs } => {
        *texture_pack_required = buf.read_bool()?;
        *has_scripts = buf.read_bool()?;
        for list in [behaviour_packs, texture_packs] {
          let len = buf.read_u16()?;
          for _ in 0..len {
            list.push(PackEntry {
              uuid:        buf.read_str(MAX_PACK_ID_LEN)?,
              version:     buf.read_str(MAX_PACK_ID_LEN)?,
              size:        buf.read_u64()?,
              has_scripts: buf.read_bool()?,
            });
          }
        }
      }
      Self::ResourcePackStack { texture_pack_required, behaviour_packs, texture_packs } => {
        *texture_pack_required = buf.read_bool()?;
        for list in [behaviour_packs, texture_packs] {
          let len = buf.read_varuint()?;
          for _ in 0..len {
            list.push(StackEntry {
              uuid:    buf.read_str(MAX_PACK_ID_LEN)?,
              version: buf.read_str(MAX_PACK_ID_LEN)?,
            });
          }
        }
      }
      Self::ResourcePackClientResponse { response, packs_to_download } => {
        let v = buf.read_u8()?;
        *response = PackResponse::from_u8(v)
          .ok_or_else(|| buf.err(invalid_data(format!("unknown pack response {v}")), Reading))?;
        let len = buf.read_u16()?;
        for _ in 0..len {
          packs_to_download.push(buf.read_str(MAX_PACK_ID_LEN)?);
        }
      }
      Self::ResourcePackDataInfo { uuid, chunk_size, chunk_count, size, hash } => {
        *uuid = buf.read_str(MAX_PACK_ID_LEN)?;
        *chunk_size = buf.read_u32()?;
        *chunk_count = buf.read_u32()?;
        *size = buf.read_u64()?;
        *hash = buf.read_byte_arr_max(64)?;
      }
      Self::ResourcePackChunkData { uuid, chunk_index, data_offset, data } => {
        *uuid = buf.read_str(MAX_PACK_ID_LEN)?;
        *chunk_index = buf.read_u32()?;
        *data_offset = buf.read_u64()?;
        *data = buf.read_byte_arr_max(CHUNK_SIZE as usize)?;
      }
      Self::ResourcePackChunkRequest { uuid, chunk_index } => {
        *uuid = buf.read_str(MAX_PACK_ID_LEN)?;
        *chunk_index = buf.read_u32()?;
      }
      Self::Unknown { payload, .. } => *payload = buf.read_all(),
    }
    Ok(())
  }

  /// Produces the wire form of this packet: the varuint frame header followed
  /// by the packet body.
  pub fn serialize(&self) -> Vec<u8> {
    let mut buf = Buffer::new(Vec::with_capacity(64));
    buf.write_varuint(self.id());
    self.marshal(&mut buf);
    buf.into_inner()
  }

  /// Parses a single frame: reads the varuint header, looks the ID up in the
  /// registry, and unmarshals the body.
  pub fn deserialize(frame: Vec<u8>) -> Result<Packet> {
    let mut buf = Buffer::new(frame);
    let id = buf.read_varuint()?;
    let mut pk = Packet::from_id(id);
    pk.unmarshal(&mut buf)?;
    Ok(pk)
  }
}
