//! Template classification and the CRC-indexed template table

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use super::path::validate_template_path;

/// Concrete object variant selected by template namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Creature,
    Player,
    Tangible,
    Weapon,
    Building,
    Cell,
    Static,
    Guild,
    Group,
    Waypoint,
    Mission,
}

impl ObjectKind {
    /// Variants that carry tangible state (and may respawn)
    pub fn is_tangible(self) -> bool {
        matches!(
            self,
            ObjectKind::Creature | ObjectKind::Tangible | ObjectKind::Weapon
        )
    }
}

/// Namespace prefixes and the variant each selects
const PREFIXES: &[(&str, ObjectKind)] = &[
    ("object/creature", ObjectKind::Creature),
    ("object/mobile", ObjectKind::Creature),
    ("object/player", ObjectKind::Player),
    ("object/tangible", ObjectKind::Tangible),
    ("object/weapon", ObjectKind::Weapon),
    ("object/building", ObjectKind::Building),
    ("object/static/worldbuilding/structures", ObjectKind::Building),
    ("object/static/structure", ObjectKind::Building),
    ("object/cell", ObjectKind::Cell),
    ("object/static", ObjectKind::Static),
    ("object/guild", ObjectKind::Guild),
    ("object/group", ObjectKind::Group),
    ("object/waypoint", ObjectKind::Waypoint),
    ("object/mission", ObjectKind::Mission),
];

/// Classify a template by its namespace prefix. The longest matching prefix wins.
pub fn classify(template: &str) -> Option<ObjectKind> {
    PREFIXES
        .iter()
        .filter(|(prefix, _)| template.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, kind)| *kind)
}

/// CRC used to index templates
pub fn template_crc(template: &str) -> u32 {
    crc32fast::hash(template.as_bytes())
}

/// One entry of the template table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateInfo {
    pub name: String,
    pub crc: u32,
    /// Interior cell count from portal data, including the index-0 exterior cell
    pub portal_cells: Option<u32>,
}

const TABLE_MAGIC: &[u8; 4] = b"TCRC";

/// CRC-indexed table of every template the server knows about
#[derive(Debug, Default, Clone)]
pub struct TemplateTable {
    by_crc: HashMap<u32, TemplateInfo>,
}

impl TemplateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a template. Invalid paths are rejected.
    pub fn insert(&mut self, name: &str, portal_cells: Option<u32>) -> Result<u32> {
        let name = validate_template_path(name)?;
        let crc = template_crc(&name);
        self.by_crc.insert(
            crc,
            TemplateInfo {
                name,
                crc,
                portal_cells: portal_cells.filter(|&n| n > 0),
            },
        );
        Ok(crc)
    }

    pub fn is_valid_crc(&self, crc: u32) -> bool {
        self.by_crc.contains_key(&crc)
    }

    pub fn template_for_crc(&self, crc: u32) -> Option<&str> {
        self.by_crc.get(&crc).map(|t| t.name.as_str())
    }

    pub fn get(&self, template: &str) -> Option<&TemplateInfo> {
        self.by_crc
            .get(&template_crc(template))
            .filter(|t| t.name == template)
    }

    pub fn len(&self) -> usize {
        self.by_crc.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_crc.is_empty()
    }

    /// Load a binary table from disk
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("reading template table {}", path.display()))?;
        Self::decode(&data).with_context(|| format!("decoding {}", path.display()))
    }

    /// Decode the binary table format
    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.remaining() < 8 || &buf[..4] != TABLE_MAGIC {
            bail!("missing template table header");
        }
        buf.advance(4);
        let count = buf.get_u32_le();

        let mut table = Self::new();
        for index in 0..count {
            if buf.remaining() < 8 {
                bail!("truncated template record {}", index);
            }
            let crc = buf.get_u32_le();
            let cells = buf.get_u16_le();
            let len = buf.get_u16_le() as usize;
            if buf.remaining() < len {
                bail!("truncated template name in record {}", index);
            }
            let name = std::str::from_utf8(&buf[..len])
                .with_context(|| format!("template name in record {}", index))?
                .to_string();
            buf.advance(len);

            table.by_crc.insert(
                crc,
                TemplateInfo {
                    name,
                    crc,
                    portal_cells: (cells > 0).then_some(cells as u32),
                },
            );
        }
        Ok(table)
    }

    /// Encode into the binary table format, ordered by CRC
    pub fn encode(&self) -> Vec<u8> {
        let mut entries: Vec<&TemplateInfo> = self.by_crc.values().collect();
        entries.sort_by_key(|t| t.crc);

        let mut out = BytesMut::new();
        out.put_slice(TABLE_MAGIC);
        out.put_u32_le(entries.len() as u32);
        for entry in entries {
            out.put_u32_le(entry.crc);
            out.put_u16_le(entry.portal_cells.unwrap_or(0) as u16);
            out.put_u16_le(entry.name.len() as u16);
            out.put_slice(entry.name.as_bytes());
        }
        out.to_vec()
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.encode())
            .with_context(|| format!("writing template table {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_prefixes() {
        assert_eq!(
            classify("object/creature/npc/shared_guard.iff"),
            Some(ObjectKind::Creature)
        );
        assert_eq!(
            classify("object/mobile/shared_bantha.iff"),
            Some(ObjectKind::Creature)
        );
        assert_eq!(classify("object/cell/shared_cell.iff"), Some(ObjectKind::Cell));
        assert_eq!(
            classify("object/player/shared_player.iff"),
            Some(ObjectKind::Player)
        );
        assert_eq!(classify("object/group/shared_group_object.iff"), Some(ObjectKind::Group));
        assert_eq!(classify("object/intangible/shared_thing.iff"), None);
        assert_eq!(classify("misc/shared_thing.iff"), None);
    }

    #[test]
    fn test_classify_longest_prefix_wins() {
        assert_eq!(
            classify("object/static/structure/naboo/shared_wall.iff"),
            Some(ObjectKind::Building)
        );
        assert_eq!(
            classify("object/static/worldbuilding/structures/shared_hut.iff"),
            Some(ObjectKind::Building)
        );
        assert_eq!(
            classify("object/static/worldbuilding/flora/shared_tree.iff"),
            Some(ObjectKind::Static)
        );
    }

    #[test]
    fn test_tangible_kinds() {
        assert!(ObjectKind::Tangible.is_tangible());
        assert!(ObjectKind::Weapon.is_tangible());
        assert!(ObjectKind::Creature.is_tangible());
        assert!(!ObjectKind::Cell.is_tangible());
        assert!(!ObjectKind::Building.is_tangible());
    }

    #[test]
    fn test_table_lookup() {
        let mut table = TemplateTable::new();
        let crc = table
            .insert("object/building/shared_hut.iff", Some(4))
            .unwrap();
        table.insert("object/cell/shared_cell.iff", None).unwrap();

        assert!(table.is_valid_crc(crc));
        assert_eq!(table.template_for_crc(crc), Some("object/building/shared_hut.iff"));
        assert_eq!(
            table.get("object/building/shared_hut.iff").unwrap().portal_cells,
            Some(4)
        );
        assert!(table.get("object/building/shared_other.iff").is_none());
        assert!(!table.is_valid_crc(template_crc("object/building/shared_other.iff")));
        assert!(table.insert("not/a/template", None).is_err());
    }

    #[test]
    fn test_binary_format() {
        let mut table = TemplateTable::new();
        table.insert("object/building/shared_hut.iff", Some(3)).unwrap();
        table.insert("object/static/shared_rock.iff", None).unwrap();

        let decoded = TemplateTable::decode(&table.encode()).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(
            decoded.get("object/building/shared_hut.iff").unwrap().portal_cells,
            Some(3)
        );
        assert_eq!(
            decoded.get("object/static/shared_rock.iff").unwrap().portal_cells,
            None
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(TemplateTable::decode(b"NOPE\0\0\0\0").is_err());

        let mut table = TemplateTable::new();
        table.insert("object/static/shared_rock.iff", None).unwrap();
        let bytes = table.encode();
        assert!(TemplateTable::decode(&bytes[..bytes.len() - 3]).is_err());
    }
}
