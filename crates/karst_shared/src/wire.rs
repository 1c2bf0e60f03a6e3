use bytes::{Buf, BufMut, Bytes, BytesMut};
use glam::Vec3;
use thiserror::Error;

use crate::coords::ChunkPos;

/// Width of the opcode header preceding every payload.
pub const OPCODE_WIDTH: usize = 2;

/// All multi-byte fields travel big-endian. String fields are a u16 length
/// prefix followed by UTF-8 bytes; raw byte fields use a u32 prefix.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("packet truncated reading {field}: {needed} byte(s) missing")]
    Truncated { field: &'static str, needed: usize },
    #[error("string field is not valid utf-8")]
    InvalidUtf8,
    #[error("packet shorter than the opcode header")]
    MissingOpcode,
}

/// A decoded inbound or fully built outbound packet: opcode plus an
/// immutable payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub opcode: u16,
    payload: Bytes,
}

impl Packet {
    pub fn from_bytes(mut data: Bytes) -> Result<Self, WireError> {
        if data.len() < OPCODE_WIDTH {
            return Err(WireError::MissingOpcode);
        }
        let opcode = data.get_u16();
        Ok(Self {
            opcode,
            payload: data,
        })
    }

    /// Serializes header + payload for the transport. Cheap: the payload
    /// is reference-counted and not copied on clone.
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(OPCODE_WIDTH + self.payload.len());
        out.put_u16(self.opcode);
        out.put_slice(&self.payload);
        out.freeze()
    }

    pub fn reader(&self) -> PacketReader {
        PacketReader {
            buf: self.payload.clone(),
        }
    }

    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

/// Builds an outbound packet field by field.
///
/// Writing is infallible: field-width violations (a string longer than its
/// u16 prefix, a chunk coordinate outside i16) are programmer errors on the
/// sending side and assert rather than return.
pub struct PacketWriter {
    opcode: u16,
    buf: BytesMut,
}

impl PacketWriter {
    pub fn new(opcode: u16) -> Self {
        Self {
            opcode,
            buf: BytesMut::with_capacity(64),
        }
    }

    pub fn finish(self) -> Packet {
        Packet {
            opcode: self.opcode,
            payload: self.buf.freeze(),
        }
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.put_u16(v);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.put_u64(v);
    }

    pub fn write_s16(&mut self, v: i16) {
        self.buf.put_i16(v);
    }

    pub fn write_s32(&mut self, v: i32) {
        self.buf.put_i32(v);
    }

    pub fn write_f32(&mut self, v: f32) {
        self.buf.put_f32(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.put_u8(u8::from(v));
    }

    pub fn write_string(&mut self, s: &str) {
        assert!(
            s.len() <= u16::MAX as usize,
            "string field of {} bytes exceeds the u16 length prefix",
            s.len()
        );
        self.buf.put_u16(s.len() as u16);
        self.buf.put_slice(s.as_bytes());
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        assert!(
            data.len() <= u32::MAX as usize,
            "byte field exceeds the u32 length prefix"
        );
        self.buf.put_u32(data.len() as u32);
        self.buf.put_slice(data);
    }

    pub fn write_v3s16(&mut self, pos: ChunkPos) {
        let clamped = |v: i32| {
            assert!(
                i32::from(i16::MIN) <= v && v <= i32::from(i16::MAX),
                "chunk coordinate {pos} outside v3s16 range"
            );
            v as i16
        };
        self.buf.put_i16(clamped(pos.x));
        self.buf.put_i16(clamped(pos.y));
        self.buf.put_i16(clamped(pos.z));
    }

    pub fn write_v3f(&mut self, v: Vec3) {
        self.buf.put_f32(v.x);
        self.buf.put_f32(v.y);
        self.buf.put_f32(v.z);
    }
}

/// Reads an inbound payload field by field, failing on truncation instead
/// of panicking: inbound bytes are untrusted.
pub struct PacketReader {
    buf: Bytes,
}

impl PacketReader {
    fn need(&self, field: &'static str, width: usize) -> Result<(), WireError> {
        if self.buf.remaining() < width {
            Err(WireError::Truncated {
                field,
                needed: width - self.buf.remaining(),
            })
        } else {
            Ok(())
        }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        self.need("u8", 1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_u16(&mut self) -> Result<u16, WireError> {
        self.need("u16", 2)?;
        Ok(self.buf.get_u16())
    }

    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        self.need("u32", 4)?;
        Ok(self.buf.get_u32())
    }

    pub fn read_u64(&mut self) -> Result<u64, WireError> {
        self.need("u64", 8)?;
        Ok(self.buf.get_u64())
    }

    pub fn read_s16(&mut self) -> Result<i16, WireError> {
        self.need("s16", 2)?;
        Ok(self.buf.get_i16())
    }

    pub fn read_s32(&mut self) -> Result<i32, WireError> {
        self.need("s32", 4)?;
        Ok(self.buf.get_i32())
    }

    pub fn read_f32(&mut self) -> Result<f32, WireError> {
        self.need("f32", 4)?;
        Ok(self.buf.get_f32())
    }

    pub fn read_bool(&mut self) -> Result<bool, WireError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_string(&mut self) -> Result<String, WireError> {
        let len = usize::from(self.read_u16()?);
        self.need("string body", len)?;
        let raw = self.buf.split_to(len);
        String::from_utf8(raw.to_vec()).map_err(|_| WireError::InvalidUtf8)
    }

    pub fn read_bytes(&mut self) -> Result<Bytes, WireError> {
        let len = self.read_u32()? as usize;
        self.need("byte body", len)?;
        Ok(self.buf.split_to(len))
    }

    pub fn read_v3s16(&mut self) -> Result<ChunkPos, WireError> {
        self.need("v3s16", 6)?;
        let x = i32::from(self.buf.get_i16());
        let y = i32::from(self.buf.get_i16());
        let z = i32::from(self.buf.get_i16());
        Ok(ChunkPos::new(x, y, z))
    }

    pub fn read_v3f(&mut self) -> Result<Vec3, WireError> {
        self.need("v3f", 12)?;
        let x = self.buf.get_f32();
        let y = self.buf.get_f32();
        let z = self.buf.get_f32();
        Ok(Vec3::new(x, y, z))
    }
}
