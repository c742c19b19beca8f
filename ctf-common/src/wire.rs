//! Byte-level codec for contained loaders.
//!
//! Bit layouts are fixed by compatibility with the existing client (see
//! spec.md §6); this module only provides the little-endian primitive
//! read/write helpers the loader encoders/decoders in [`crate::loaders`]
//! are built from. Mirrors the write/read pair convention of a classic
//! message buffer: one append-only writer, one cursor-tracking reader
//! that returns `Err` instead of silently truncating.

use crate::error::{WireError, WireResult};
use crate::math::Vec3;

pub const MAX_WIRE_STRING: usize = 2048;

/// Append-only little-endian byte writer. Used to build a contained
/// loader's payload before it is handed to the Transport collaborator.
#[derive(Debug, Default, Clone)]
pub struct PacketWriter {
    pub data: Vec<u8>,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn write_byte(&mut self, v: u8) {
        self.data.push(v);
    }

    pub fn write_short(&mut self, v: i16) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_long(&mut self, v: i32) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_float(&mut self, v: f32) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_string(&mut self, s: &str) {
        self.data.extend_from_slice(s.as_bytes());
        self.data.push(0);
    }

    pub fn write_pos(&mut self, pos: Vec3) {
        self.write_float(pos[0]);
        self.write_float(pos[1]);
        self.write_float(pos[2]);
    }

    pub fn write_color(&mut self, rgb: (u8, u8, u8)) {
        self.write_byte(rgb.0);
        self.write_byte(rgb.1);
        self.write_byte(rgb.2);
    }
}

/// Cursor-tracking reader over a received datagram's contained-loader
/// payload. Every read advances `readcount`; reads past the end of the
/// buffer return [`WireError::Truncated`] rather than panicking, so a
/// malformed or truncated datagram never takes down the event loop.
#[derive(Debug)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pub readcount: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, readcount: 0 }
    }

    fn take(&mut self, n: usize) -> WireResult<&'a [u8]> {
        let end = self.readcount + n;
        if end > self.data.len() {
            return Err(WireError::Truncated { needed: end - self.data.len() });
        }
        let slice = &self.data[self.readcount..end];
        self.readcount = end;
        Ok(slice)
    }

    pub fn read_byte(&mut self) -> WireResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_short(&mut self) -> WireResult<i16> {
        let b = self.take(2)?;
        Ok(i16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_long(&mut self) -> WireResult<i32> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_float(&mut self) -> WireResult<f32> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_string(&mut self) -> WireResult<String> {
        let start = self.readcount;
        loop {
            if self.readcount >= self.data.len() {
                return Err(WireError::Truncated { needed: 1 });
            }
            if self.readcount - start > MAX_WIRE_STRING {
                return Err(WireError::StringTooLong(self.readcount - start));
            }
            let b = self.data[self.readcount];
            self.readcount += 1;
            if b == 0 {
                break;
            }
        }
        Ok(String::from_utf8_lossy(&self.data[start..self.readcount - 1]).into_owned())
    }

    pub fn read_pos(&mut self) -> WireResult<Vec3> {
        Ok([self.read_float()?, self.read_float()?, self.read_float()?])
    }

    pub fn read_color(&mut self) -> WireResult<(u8, u8, u8)> {
        Ok((self.read_byte()?, self.read_byte()?, self.read_byte()?))
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.readcount
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_primitives() {
        let mut w = PacketWriter::new();
        w.write_byte(7);
        w.write_short(-300);
        w.write_long(123456);
        w.write_float(3.5);
        w.write_string("hello");
        w.write_pos([1.0, 2.0, 3.0]);

        let mut r = PacketReader::new(&w.data);
        assert_eq!(r.read_byte().unwrap(), 7);
        assert_eq!(r.read_short().unwrap(), -300);
        assert_eq!(r.read_long().unwrap(), 123456);
        assert_eq!(r.read_float().unwrap(), 3.5);
        assert_eq!(r.read_string().unwrap(), "hello");
        assert_eq!(r.read_pos().unwrap(), [1.0, 2.0, 3.0]);
    }

    #[test]
    fn truncated_read_errors_instead_of_panicking() {
        let data = [1u8, 2];
        let mut r = PacketReader::new(&data);
        assert!(r.read_long().is_err());
    }
}
