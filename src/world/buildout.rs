//! Buildout area index and placement rows

use anyhow::Result;

use super::datatable::Datatable;
use crate::error::{ObjectError, ObjectResult};
use crate::objects::{ObjectId, Point3D, Quaternion};

/// Radius above which an object is visible from further away
pub const BIG_SPAWN_RADIUS: f32 = 256.0;

/// An area listed in a planet's buildout index
#[derive(Debug, Clone, PartialEq)]
pub struct BuildoutArea {
    pub name: String,
    /// World-space origin added to every area-local position
    pub x1: f32,
    pub z1: f32,
}

impl BuildoutArea {
    pub fn offset(&self, local: Point3D) -> Point3D {
        Point3D::new(local.x + self.x1, local.y, local.z + self.z1)
    }
}

/// Read `area_name, x1, z1` rows; unreadable rows are returned as errors
pub fn read_areas(table: &Datatable) -> Vec<Result<BuildoutArea>> {
    (0..table.row_count())
        .map(|row| {
            Ok(BuildoutArea {
                name: table.get_str(row, 0)?.to_string(),
                x1: table.get_float(row, 1)?,
                z1: table.get_float(row, 2)?,
            })
        })
        .collect()
}

/// Column layout of an area table, selected only by column count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Static placements without object or container ids
    Compact,
    /// Ids, containers and object type
    Full,
}

impl Layout {
    pub fn detect(columns: usize) -> ObjectResult<Self> {
        match columns {
            11 => Ok(Layout::Compact),
            14 => Ok(Layout::Full),
            columns => Err(ObjectError::UnsupportedLayout { columns }),
        }
    }
}

/// One placement row
#[derive(Debug, Clone, PartialEq)]
pub struct BuildoutRow {
    pub object_id: ObjectId,
    pub container_id: ObjectId,
    pub object_type: i64,
    pub template_crc: u32,
    pub cell_index: u32,
    pub position: Point3D,
    pub orientation: Quaternion,
    pub radius: f32,
    pub portal_crc: u32,
}

impl BuildoutRow {
    pub fn parse(table: &Datatable, row: usize, layout: Layout) -> Result<Self> {
        // Ids and CRCs are stored as signed 32/64-bit values
        let int = |column: usize| table.get_int(row, column);
        let float = |column: usize| table.get_float(row, column);

        let (object_id, container_id, object_type, base) = match layout {
            Layout::Compact => (0, 0, 0, 0),
            Layout::Full => (int(0)? as u64, int(1)? as u64, int(2)?, 3),
        };

        Ok(Self {
            object_id,
            container_id,
            object_type,
            template_crc: int(base)? as u32,
            cell_index: int(base + 1)? as u32,
            position: Point3D::new(float(base + 2)?, float(base + 3)?, float(base + 4)?),
            orientation: Quaternion::new(
                float(base + 5)?,
                float(base + 6)?,
                float(base + 7)?,
                float(base + 8)?,
            ),
            radius: float(base + 9)?,
            portal_crc: int(base + 10)? as u32,
        })
    }

    pub fn is_root(&self) -> bool {
        self.object_id != 0 && self.container_id == 0
    }

    pub fn is_contained(&self) -> bool {
        self.container_id != 0
    }

    pub fn has_portal(&self) -> bool {
        self.portal_crc != 0
    }

    pub fn big_spawn_range(&self) -> bool {
        self.radius > BIG_SPAWN_RADIUS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = "objid\tcontainer\ttype\tcrc\tcell\tpx\tpy\tpz\tqw\tqx\tqy\tqz\tradius\tportal\n\
                        1001\t0\t0\t0x1A2B3C4D\t0\t1\t2\t3\t1\t0\t0\t0\t300\t-1\n\
                        1002\t1001\t0\t-1\t2\t0.5\t0\t-0.5\t1\t0\t0\t0\t0\t0\n";

    const COMPACT: &str = "crc\tcell\tpx\tpy\tpz\tqw\tqx\tqy\tqz\tradius\tportal\n\
                           42\t0\t10\t0\t20\t1\t0\t0\t0\t8\t0\n";

    #[test]
    fn test_layout_by_column_count() {
        assert_eq!(Layout::detect(11).unwrap(), Layout::Compact);
        assert_eq!(Layout::detect(14).unwrap(), Layout::Full);
        assert!(matches!(
            Layout::detect(12),
            Err(ObjectError::UnsupportedLayout { columns: 12 })
        ));
    }

    #[test]
    fn test_parse_full_rows() {
        let table = Datatable::parse(FULL.as_bytes()).unwrap();
        let layout = Layout::detect(table.column_count()).unwrap();

        let root = BuildoutRow::parse(&table, 0, layout).unwrap();
        assert!(root.is_root());
        assert_eq!(root.template_crc, 0x1A2B_3C4D);
        assert_eq!(root.position, Point3D::new(1.0, 2.0, 3.0));
        assert!(root.big_spawn_range());
        assert!(root.has_portal());
        assert_eq!(root.portal_crc, u32::MAX);

        let contained = BuildoutRow::parse(&table, 1, layout).unwrap();
        assert!(contained.is_contained());
        assert!(!contained.is_root());
        assert_eq!(contained.container_id, 1001);
        assert_eq!(contained.cell_index, 2);
        assert_eq!(contained.template_crc, u32::MAX);
        assert!(!contained.has_portal());
    }

    #[test]
    fn test_parse_compact_rows() {
        let table = Datatable::parse(COMPACT.as_bytes()).unwrap();
        let row = BuildoutRow::parse(&table, 0, Layout::Compact).unwrap();
        assert_eq!(row.object_id, 0);
        assert!(!row.is_root());
        assert!(!row.is_contained());
        assert_eq!(row.template_crc, 42);
        assert_eq!(row.position, Point3D::new(10.0, 0.0, 20.0));
    }

    #[test]
    fn test_area_offset() {
        let table = Datatable::parse("area\tx1\tz1\nbestine\t-1000\t500\nbroken\n".as_bytes()).unwrap();
        let areas = read_areas(&table);
        assert_eq!(areas.len(), 2);
        let area = areas[0].as_ref().unwrap();
        assert_eq!(area.name, "bestine");
        assert_eq!(
            area.offset(Point3D::new(10.0, 5.0, 10.0)),
            Point3D::new(-990.0, 5.0, 510.0)
        );
        assert!(areas[1].is_err());
    }
}
