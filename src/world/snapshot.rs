//! Binary world snapshot files

use std::path::Path;

use anyhow::{bail, Context, Result};
use bytes::{Buf, BufMut, BytesMut};

use crate::objects::{ObjectId, Point3D, Quaternion};

const SNAPSHOT_MAGIC: &[u8; 4] = b"WSNP";
const SNAPSHOT_VERSION: u32 = 1;
const RECORD_LEN: usize = 8 + 8 + 4 + 4 + 12 + 16;

/// One placement from a snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRecord {
    pub id: ObjectId,
    /// 0 = world root
    pub parent_id: ObjectId,
    pub name_id: u32,
    pub cell_number: u32,
    pub position: Point3D,
    pub orientation: Quaternion,
}

/// A planet's baseline placements: a name table plus records referencing it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorldSnapshot {
    pub names: Vec<String>,
    pub records: Vec<SnapshotRecord>,
}

impl WorldSnapshot {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("reading snapshot {}", path.display()))?;
        Self::decode(&data).with_context(|| format!("decoding {}", path.display()))
    }

    pub fn name(&self, name_id: u32) -> Option<&str> {
        self.names.get(name_id as usize).map(String::as_str)
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.remaining() < 12 || &buf[..4] != SNAPSHOT_MAGIC {
            bail!("missing snapshot header");
        }
        buf.advance(4);
        let version = buf.get_u32_le();
        if version != SNAPSHOT_VERSION {
            bail!("unsupported snapshot version {}", version);
        }

        let name_count = buf.get_u32_le();
        let mut names = Vec::with_capacity(name_count.min(4096) as usize);
        for index in 0..name_count {
            if buf.remaining() < 2 {
                bail!("truncated name {}", index);
            }
            let len = buf.get_u16_le() as usize;
            if buf.remaining() < len {
                bail!("truncated name {}", index);
            }
            let name = std::str::from_utf8(&buf[..len])
                .with_context(|| format!("name {}", index))?
                .to_string();
            buf.advance(len);
            names.push(name);
        }

        if buf.remaining() < 4 {
            bail!("missing record count");
        }
        let record_count = buf.get_u32_le() as usize;
        if buf.remaining() < record_count * RECORD_LEN {
            bail!(
                "truncated records: {} declared, {} bytes left",
                record_count,
                buf.remaining()
            );
        }

        let mut records = Vec::with_capacity(record_count);
        for _ in 0..record_count {
            records.push(SnapshotRecord {
                id: buf.get_u64_le(),
                parent_id: buf.get_u64_le(),
                name_id: buf.get_u32_le(),
                cell_number: buf.get_u32_le(),
                position: Point3D::new(buf.get_f32_le(), buf.get_f32_le(), buf.get_f32_le()),
                orientation: Quaternion::new(
                    buf.get_f32_le(),
                    buf.get_f32_le(),
                    buf.get_f32_le(),
                    buf.get_f32_le(),
                ),
            });
        }
        Ok(Self { names, records })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = BytesMut::new();
        out.put_slice(SNAPSHOT_MAGIC);
        out.put_u32_le(SNAPSHOT_VERSION);
        out.put_u32_le(self.names.len() as u32);
        for name in &self.names {
            out.put_u16_le(name.len() as u16);
            out.put_slice(name.as_bytes());
        }
        out.put_u32_le(self.records.len() as u32);
        for record in &self.records {
            out.put_u64_le(record.id);
            out.put_u64_le(record.parent_id);
            out.put_u32_le(record.name_id);
            out.put_u32_le(record.cell_number);
            out.put_f32_le(record.position.x);
            out.put_f32_le(record.position.y);
            out.put_f32_le(record.position.z);
            out.put_f32_le(record.orientation.w);
            out.put_f32_le(record.orientation.x);
            out.put_f32_le(record.orientation.y);
            out.put_f32_le(record.orientation.z);
        }
        out.to_vec()
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.encode())
            .with_context(|| format!("writing snapshot {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> WorldSnapshot {
        WorldSnapshot {
            names: vec![
                "object/building/shared_hut.iff".to_string(),
                "object/cell/shared_cell.iff".to_string(),
            ],
            records: vec![
                SnapshotRecord {
                    id: 9001,
                    parent_id: 0,
                    name_id: 0,
                    cell_number: 0,
                    position: Point3D::new(10.0, 0.0, -5.0),
                    orientation: Quaternion::IDENTITY,
                },
                SnapshotRecord {
                    id: 9002,
                    parent_id: 9001,
                    name_id: 1,
                    cell_number: 1,
                    position: Point3D::ORIGIN,
                    orientation: Quaternion::IDENTITY,
                },
            ],
        }
    }

    #[test]
    fn test_decode_encoded() {
        let snapshot = sample();
        let decoded = WorldSnapshot::decode(&snapshot.encode()).unwrap();
        assert_eq!(decoded, snapshot);
        assert_eq!(decoded.name(1), Some("object/cell/shared_cell.iff"));
        assert_eq!(decoded.name(7), None);
    }

    #[test]
    fn test_rejects_bad_header_and_truncation() {
        assert!(WorldSnapshot::decode(b"WSNQ\x01\0\0\0\0\0\0\0").is_err());

        let mut bytes = sample().encode();
        bytes[4] = 2;
        assert!(WorldSnapshot::decode(&bytes).is_err());

        let bytes = sample().encode();
        assert!(WorldSnapshot::decode(&bytes[..bytes.len() - 1]).is_err());
    }
}
