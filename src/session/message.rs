//! The one handshake message the object core decodes itself

use anyhow::{bail, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::objects::ObjectId;

pub const SELECT_CHARACTER_OPCODE: u32 = 0xB509_8D76;

/// Client request to enter the world as a persisted character
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectCharacter {
    pub character_id: ObjectId,
}

impl SelectCharacter {
    const OPERANDS: u16 = 2;

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.remaining() < 14 {
            bail!("SelectCharacter too short: {} bytes", buf.remaining());
        }
        let _operands = buf.get_u16_le();
        let opcode = buf.get_u32_le();
        if opcode != SELECT_CHARACTER_OPCODE {
            bail!("unexpected opcode {:#010x}", opcode);
        }
        Ok(Self {
            character_id: buf.get_u64_le(),
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(14);
        out.put_u16_le(Self::OPERANDS);
        out.put_u32_le(SELECT_CHARACTER_OPCODE);
        out.put_u64_le(self.character_id);
        out.freeze()
    }
}
