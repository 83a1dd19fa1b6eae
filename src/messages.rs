//! Matter UDP message codec.
//!
//! Frames carry an 8 byte header followed by the payload:
//! `[flags:u8][session_id:u16 LE][security_flags:u8][message_counter:u32 LE]`.
//! Commissioning traffic uses session id 0. No checksum or authentication
//! tag exists at this layer; integrity belongs to the secure-session layer
//! behind [SecurityProvider](crate::commissioning::SecurityProvider).

use anyhow::Result;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use core::fmt;
use std::io::Read;

use crate::error::BridgeError;

pub const HEADER_LEN: usize = 8;

pub struct Message {
    pub flags: u8,
    pub session_id: u16,
    pub security_flags: u8,
    pub message_counter: u32,
    pub payload: Vec<u8>,
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("flags", &self.flags)
            .field("session_id", &self.session_id)
            .field("security_flags", &self.security_flags)
            .field("message_counter", &self.message_counter)
            .field("payload", &hex::encode(&self.payload))
            .finish()
    }
}

impl Message {
    pub fn decode(data: &[u8]) -> Result<Self, BridgeError> {
        if data.len() < HEADER_LEN {
            return Err(BridgeError::FrameTooShort { len: data.len() });
        }
        let mut cursor = std::io::Cursor::new(data);
        // reads cannot fail past the length check above
        let flags = cursor.read_u8().unwrap_or_default();
        let session_id = cursor.read_u16::<LittleEndian>().unwrap_or_default();
        let security_flags = cursor.read_u8().unwrap_or_default();
        let message_counter = cursor.read_u32::<LittleEndian>().unwrap_or_default();
        let mut payload = Vec::new();
        cursor.read_to_end(&mut payload).unwrap_or_default();
        Ok(Self {
            flags,
            session_id,
            security_flags,
            message_counter,
            payload,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.write_u8(self.flags)?;
        out.write_u16::<LittleEndian>(self.session_id)?;
        out.write_u8(self.security_flags)?;
        out.write_u32::<LittleEndian>(self.message_counter)?;
        out.extend_from_slice(&self.payload);
        Ok(out)
    }
}
