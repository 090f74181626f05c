//! Tab-separated datatables with a header row

use std::io::Read;
use std::path::Path;

use anyhow::{anyhow, Context, Result};

#[derive(Debug, Clone, Default)]
pub struct Datatable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Datatable {
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("opening datatable {}", path.display()))?;
        Self::parse(file).with_context(|| format!("parsing {}", path.display()))
    }

    /// Parse a table. Rows may be shorter than the header; reading a
    /// missing cell is an error at access time.
    pub fn parse<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .comment(Some(b'#'))
            .from_reader(reader);

        let columns = reader
            .headers()?
            .iter()
            .map(str::to_string)
            .collect::<Vec<_>>();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            if record.iter().all(str::is_empty) {
                continue;
            }
            rows.push(record.iter().map(str::to_string).collect());
        }
        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn get_str(&self, row: usize, column: usize) -> Result<&str> {
        self.rows
            .get(row)
            .ok_or_else(|| anyhow!("row {} out of range", row))?
            .get(column)
            .map(String::as_str)
            .ok_or_else(|| anyhow!("row {} has no column {}", row, column))
    }

    /// Decimal or `0x` hexadecimal integer
    pub fn get_int(&self, row: usize, column: usize) -> Result<i64> {
        let raw = self.get_str(row, column)?;
        parse_int(raw).with_context(|| format!("row {} column {}: {:?}", row, column, raw))
    }

    pub fn get_float(&self, row: usize, column: usize) -> Result<f32> {
        let raw = self.get_str(row, column)?;
        raw.parse::<f32>()
            .with_context(|| format!("row {} column {}: {:?}", row, column, raw))
    }
}

fn parse_int(raw: &str) -> Result<i64> {
    let (negative, digits) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };
    let value = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        // Hex cells are raw 32/64-bit patterns, not signed magnitudes
        Some(hex) => u64::from_str_radix(hex, 16)? as i64,
        None => digits.parse::<i64>()?,
    };
    Ok(if negative { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;

    const AREAS: &str = "area_name\tx1\tz1\n\
                         mos_eisley\t3000\t-4800\n\
                         \n\
                         anchorhead\t0x10\t-16.5\n";

    #[test]
    fn test_parse_with_header() {
        let table = Datatable::parse(AREAS.as_bytes()).unwrap();
        assert_eq!(table.columns(), ["area_name", "x1", "z1"]);
        assert_eq!(table.column_count(), 3);
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.get_str(0, 0).unwrap(), "mos_eisley");
        assert_eq!(table.get_int(0, 2).unwrap(), -4800);
        assert_eq!(table.get_int(1, 1).unwrap(), 16);
        assert_eq!(table.get_float(1, 2).unwrap(), -16.5);
    }

    #[test]
    fn test_missing_cells_error() {
        let table = Datatable::parse("a\tb\n1\n".as_bytes()).unwrap();
        assert_eq!(table.get_int(0, 0).unwrap(), 1);
        assert!(table.get_str(0, 1).is_err());
        assert!(table.get_str(5, 0).is_err());
    }

    #[test]
    fn test_parse_int_forms() {
        assert_eq!(parse_int("42").unwrap(), 42);
        assert_eq!(parse_int("-7").unwrap(), -7);
        assert_eq!(parse_int("0xFFFFFFFF").unwrap(), 0xFFFF_FFFF);
        assert_eq!(parse_int("0X1a").unwrap(), 26);
        assert!(parse_int("twelve").is_err());
        assert!(parse_int("1.5").is_err());
    }
}
