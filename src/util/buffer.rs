use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};

use std::{
  error::Error,
  fmt, io,
  io::{Cursor, Read, Write},
  string::FromUtf8Error,
};

pub type Result<T> = std::result::Result<T, BufferError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
  Reading,
  Writing,
}

use Mode::Reading;

#[derive(Debug)]
pub struct BufferError {
  err:  BufferErrorKind,
  pos:  u64,
  mode: Mode,
}

impl fmt::Display for BufferError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    if self.mode == Mode::Reading {
      write!(f, "error while reading from buffer at index {}: {}", self.pos, self.err)
    } else {
      write!(f, "error while writing to buffer at index {}: {}", self.pos, self.err)
    }
  }
}

#[derive(Debug)]
pub enum BufferErrorKind {
  VarUint,
  IO(io::Error),
  FromUtf8Error(FromUtf8Error),
  StringTooLong { len: u64, max: u64 },
  ArrayTooLong { len: u64, max: u64 },
}

impl fmt::Display for BufferErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      Self::VarUint => write!(f, "varuint is too long"),
      Self::IO(e) => write!(f, "{}", e),
      Self::FromUtf8Error(e) => write!(f, "{}", e),
      Self::StringTooLong { len, max } => {
        write!(f, "string is `{}` bytes, longer than max `{}`", len, max)
      }
      Self::ArrayTooLong { len, max } => {
        write!(f, "array is `{}` elements, longer than max `{}`", len, max)
      }
    }
  }
}

impl Error for BufferError {}

impl From<io::Error> for BufferErrorKind {
  fn from(e: io::Error) -> Self { BufferErrorKind::IO(e) }
}
impl From<FromUtf8Error> for BufferErrorKind {
  fn from(e: FromUtf8Error) -> Self { BufferErrorKind::FromUtf8Error(e) }
}

/// A wrapper around a byte slice or vec, which we use to read and write
/// everything in a packet. Multi-byte integers are little endian, as that is
/// what the Bedrock protocol uses almost everywhere. The handful of big endian
/// fields get their own functions.
#[derive(Debug)]
pub struct Buffer<T> {
  data: Cursor<T>,
}

macro_rules! add_read {
  ($fn: ident, $ty: ty) => {
    pub fn $fn(&mut self) -> Result<$ty> {
      self.data.$fn::<LittleEndian>().map_err(|e| self.err(e, Reading))
    }
  };
}
// The same as add_read(), but with no type parameter
macro_rules! add_read_byte {
  ($fn: ident, $ty: ty) => {
    pub fn $fn(&mut self) -> Result<$ty> { self.data.$fn().map_err(|e| self.err(e, Reading)) }
  };
}

macro_rules! add_write {
  ($fn: ident, $ty: ty) => {
    pub fn $fn(&mut self, v: $ty) {
      self.data.$fn::<LittleEndian>(v).expect("could not write to buffer")
    }
  };
}
// The same as add_write(), but with no type parameter
macro_rules! add_write_byte {
  ($fn: ident, $ty: ty) => {
    pub fn $fn(&mut self, v: $ty) { self.data.$fn(v).expect("could not write to buffer") }
  };
}

impl<T> Buffer<T> {
  pub fn new(data: T) -> Self { Buffer { data: Cursor::new(data) } }

  pub fn err(&self, e: impl Into<BufferErrorKind>, mode: Mode) -> BufferError {
    BufferError { err: e.into(), pos: self.data.position(), mode }
  }

  pub fn into_inner(self) -> T { self.data.into_inner() }
}

impl<T> Buffer<T>
where
  T: AsRef<[u8]>,
{
  pub fn len(&self) -> usize { self.data.get_ref().as_ref().len() }
  pub fn is_empty(&self) -> bool { self.len() == 0 }
  pub fn index(&self) -> usize { self.data.position() as usize }
  pub fn remaining(&self) -> usize { self.len() - self.index() }

  pub fn read_bool(&mut self) -> Result<bool> { Ok(self.read_u8()? != 0) }
  add_read_byte!(read_u8, u8);
  add_read!(read_u16, u16);
  add_read!(read_u32, u32);
  add_read!(read_u64, u64);
  add_read_byte!(read_i8, i8);
  add_read!(read_i16, i16);
  add_read!(read_i32, i32);
  add_read!(read_i64, i64);

  /// Reads a big endian i32. The login and play status packets use big endian
  /// for the protocol version and status fields.
  pub fn read_i32_be(&mut self) -> Result<i32> {
    self.data.read_i32::<BigEndian>().map_err(|e| self.err(e, Reading))
  }

  /// Reads the rest of the buffer. This cannot fail, as it will just return an
  /// empty vec if there is nothing left.
  pub fn read_all(&mut self) -> Vec<u8> {
    let mut buf = vec![];
    match self.data.read_to_end(&mut buf) {
      Ok(_) => buf,
      Err(e) => panic!("failed to read all: {:?}", e),
    }
  }

  pub fn read_buf(&mut self, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0; len];
    self.data.read_exact(&mut buf).map_err(|e| self.err(e, Reading))?;
    Ok(buf)
  }

  /// Reads an unsigned LEB128 varint, up to 5 bytes.
  pub fn read_varuint(&mut self) -> Result<u32> {
    let mut res: u32 = 0;
    for i in 0..5 {
      let read = self.read_u8()?;
      if i == 4 && read & 0b10000000 != 0 {
        return Err(self.err(BufferErrorKind::VarUint, Reading));
      }

      let v = read & 0b01111111;
      res |= (v as u32) << (7 * i);

      if read & 0b10000000 == 0 {
        break;
      }
    }
    Ok(res)
  }

  /// Reads a string. If the length is longer than the given maximum, this will
  /// fail, and return an error.
  pub fn read_str(&mut self, max_len: u64) -> Result<String> {
    let len = self.read_varuint()? as u64;
    if len > max_len {
      return Err(self.err(BufferErrorKind::StringTooLong { len, max: max_len }, Reading));
    }
    let vec = self.read_buf(len as usize)?;
    String::from_utf8(vec).map_err(|e| self.err(e, Reading))
  }

  /// Reads a varuint length prefixed byte array. Fails if the length is
  /// greater than `max`.
  pub fn read_byte_arr_max(&mut self, max: usize) -> Result<Vec<u8>> {
    let len = self.read_varuint()? as usize;
    if len > max {
      return Err(
        self.err(BufferErrorKind::ArrayTooLong { len: len as u64, max: max as u64 }, Reading),
      );
    }
    self.read_buf(len)
  }
}

impl<T> Buffer<T>
where
  Cursor<T>: io::Write,
{
  pub fn write_bool(&mut self, v: bool) {
    if v {
      self.write_u8(1);
    } else {
      self.write_u8(0);
    }
  }
  add_write_byte!(write_u8, u8);
  add_write!(write_u16, u16);
  add_write!(write_u32, u32);
  add_write!(write_u64, u64);
  add_write_byte!(write_i8, i8);
  add_write!(write_i16, i16);
  add_write!(write_i32, i32);
  add_write!(write_i64, i64);

  /// Writes a big endian i32. See [`read_i32_be`](Self::read_i32_be).
  pub fn write_i32_be(&mut self, v: i32) {
    self.data.write_i32::<BigEndian>(v).expect("could not write to buffer")
  }

  /// This doesn't return a result, as the only thing that could go wrong is an
  /// oom error, which isn't even returned as an error.
  pub fn write_buf(&mut self, v: &[u8]) { self.data.write_all(v).unwrap(); }

  /// Writes an unsigned LEB128 varint.
  pub fn write_varuint(&mut self, v: u32) {
    let mut val = v;
    loop {
      let mut b: u8 = val as u8 & 0b01111111;
      val >>= 7;
      if val != 0 {
        b |= 0b10000000;
      }
      self.write_u8(b);
      if val == 0 {
        break;
      }
    }
  }

  pub fn write_str(&mut self, v: &str) {
    self.write_varuint(v.len() as u32);
    self.write_buf(v.as_bytes());
  }

  pub fn write_byte_arr(&mut self, v: &[u8]) {
    self.write_varuint(v.len() as u32);
    self.write_buf(v);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  pub fn read_varuint() {
    let mut buf = Buffer::new(vec![1]);
    assert_eq!(1, buf.read_varuint().unwrap());

    let mut buf = Buffer::new(vec![127]);
    assert_eq!(127, buf.read_varuint().unwrap());

    let mut buf = Buffer::new(vec![128, 2]);
    assert_eq!(256, buf.read_varuint().unwrap());

    let mut buf = Buffer::new(vec![255, 255, 255, 255, 15]);
    assert_eq!(u32::MAX, buf.read_varuint().unwrap());

    let mut buf = Buffer::new(vec![255, 255, 255, 255, 255]);
    assert!(buf.read_varuint().is_err());
  }

  #[test]
  pub fn write_varuint() {
    let mut buf = Buffer::new(vec![]);
    buf.write_varuint(1);
    assert_eq!(vec![1], buf.into_inner());

    let mut buf = Buffer::new(vec![]);
    buf.write_varuint(127);
    assert_eq!(vec![127], buf.into_inner());

    let mut buf = Buffer::new(vec![]);
    buf.write_varuint(256);
    assert_eq!(vec![128, 2], buf.into_inner());

    let mut buf = Buffer::new(vec![]);
    buf.write_varuint(u32::MAX);
    assert_eq!(vec![255, 255, 255, 255, 15], buf.into_inner());
  }

  #[test]
  pub fn strings() {
    let mut buf = Buffer::new(vec![]);
    buf.write_str("hello");
    let mut buf = Buffer::new(buf.into_inner());
    assert_eq!("hello", buf.read_str(32).unwrap());

    let mut buf = Buffer::new(vec![]);
    buf.write_str("too long for the limit");
    let mut buf = Buffer::new(buf.into_inner());
    assert!(buf.read_str(4).is_err());
  }

  #[test]
  pub fn little_endian() {
    let mut buf = Buffer::new(vec![]);
    buf.write_u32(0x01020304);
    buf.write_i32_be(0x01020304);
    let data = buf.into_inner();
    assert_eq!(data, vec![4, 3, 2, 1, 1, 2, 3, 4]);
  }
}
