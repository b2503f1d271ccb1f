use uuid::Uuid;

use crate::error::ProtocolError;

/// Helper for building binary payloads
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_uuid(&mut self, value: &Uuid) {
        self.buf.extend_from_slice(value.as_bytes());
    }

    pub fn write_string(&mut self, s: &str) -> Result<(), ProtocolError> {
        let len = u16::try_from(s.len()).map_err(|_| ProtocolError::PayloadTooLarge(s.len()))?;
        self.write_u16(len);
        self.buf.extend_from_slice(s.as_bytes());
        Ok(())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn position(&self) -> usize {
        self.buf.len()
    }

    pub fn reserve_u16(&mut self) -> usize {
        let pos = self.buf.len();
        self.buf.extend_from_slice(&[0u8; 2]);
        pos
    }

    /// Back-fills a length reserved with [`Writer::reserve_u16`].
    pub fn patch_len_at(&mut self, pos: usize, len: usize) -> Result<(), ProtocolError> {
        let value = u16::try_from(len).map_err(|_| ProtocolError::PayloadTooLarge(len))?;
        let bytes = value.to_be_bytes();
        self.buf[pos] = bytes[0];
        self.buf[pos + 1] = bytes[1];
        Ok(())
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}
