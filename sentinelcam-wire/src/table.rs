//! Columnar table encoding for tabular data-access payloads (`idx`, `evt`).
//!
//! The source serves these as pickled pandas tables. For a language-neutral
//! wire format we define our own columnar layout instead of leaning on CBOR's
//! generic struct encoding: a header listing column names and element types,
//! followed by one length-prefixed block per column. Timestamps are encoded
//! as 64-bit nanoseconds since the Unix epoch; strings are length-prefixed
//! UTF-8, one length per row.

use serde::{Deserialize, Serialize};

use crate::WireError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    I64,
    F64,
    Str,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ColumnData {
    I64(Vec<i64>),
    F64(Vec<f64>),
    Str(Vec<String>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::I64(v) => v.len(),
            ColumnData::F64(v) => v.len(),
            ColumnData::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn column_type(&self) -> ColumnType {
        match self {
            ColumnData::I64(_) => ColumnType::I64,
            ColumnData::F64(_) => ColumnType::F64,
            ColumnData::Str(_) => ColumnType::Str,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<Column>,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Self {
        Table { columns }
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map(|c| c.data.len()).unwrap_or(0)
    }
}

pub fn encode_table(table: &Table) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend((table.columns.len() as u32).to_le_bytes());
    for col in &table.columns {
        let name_bytes = col.name.as_bytes();
        out.extend((name_bytes.len() as u16).to_le_bytes());
        out.extend(name_bytes);
        out.push(match col.data.column_type() {
            ColumnType::I64 => 0u8,
            ColumnType::F64 => 1u8,
            ColumnType::Str => 2u8,
        });
        out.extend((col.data.len() as u32).to_le_bytes());

        let mut block = Vec::new();
        match &col.data {
            ColumnData::I64(v) => {
                for x in v {
                    block.extend(x.to_le_bytes());
                }
            }
            ColumnData::F64(v) => {
                for x in v {
                    block.extend(x.to_le_bytes());
                }
            }
            ColumnData::Str(v) => {
                for s in v {
                    let bytes = s.as_bytes();
                    block.extend((bytes.len() as u32).to_le_bytes());
                    block.extend(bytes);
                }
            }
        }
        out.extend((block.len() as u32).to_le_bytes());
        out.extend(block);
    }
    out
}

pub fn decode_table(bytes: &[u8]) -> Result<Table, WireError> {
    let mut cursor = Cursor { bytes, pos: 0 };
    let num_columns = cursor.read_u32()? as usize;
    let mut columns = Vec::with_capacity(num_columns);
    for _ in 0..num_columns {
        let name_len = cursor.read_u16()? as usize;
        let name = String::from_utf8(cursor.read_bytes(name_len)?.to_vec())
            .map_err(|_| WireError::BadTable("column name is not valid UTF-8".into()))?;
        let dtype = match cursor.read_u8()? {
            0 => ColumnType::I64,
            1 => ColumnType::F64,
            2 => ColumnType::Str,
            other => return Err(WireError::BadTable(format!("unknown column type tag {other}"))),
        };
        let n_rows = cursor.read_u32()? as usize;
        let block_len = cursor.read_u32()? as usize;
        let block = cursor.read_bytes(block_len)?;
        let data = decode_block(dtype, n_rows, block)?;
        columns.push(Column { name, data });
    }
    Ok(Table { columns })
}

fn decode_block(dtype: ColumnType, n_rows: usize, block: &[u8]) -> Result<ColumnData, WireError> {
    let mut cursor = Cursor {
        bytes: block,
        pos: 0,
    };
    match dtype {
        ColumnType::I64 => {
            let mut v = Vec::with_capacity(n_rows);
            for _ in 0..n_rows {
                v.push(i64::from_le_bytes(cursor.read_bytes(8)?.try_into().unwrap()));
            }
            Ok(ColumnData::I64(v))
        }
        ColumnType::F64 => {
            let mut v = Vec::with_capacity(n_rows);
            for _ in 0..n_rows {
                v.push(f64::from_le_bytes(cursor.read_bytes(8)?.try_into().unwrap()));
            }
            Ok(ColumnData::F64(v))
        }
        ColumnType::Str => {
            let mut v = Vec::with_capacity(n_rows);
            for _ in 0..n_rows {
                let len = cursor.read_u32()? as usize;
                let s = String::from_utf8(cursor.read_bytes(len)?.to_vec())
                    .map_err(|_| WireError::BadTable("string cell is not valid UTF-8".into()))?;
                v.push(s);
            }
            Ok(ColumnData::Str(v))
        }
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.pos + n > self.bytes.len() {
            return Err(WireError::BadTable("unexpected end of table encoding".into()));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, WireError> {
        Ok(u16::from_le_bytes(self.read_bytes(2)?.try_into().unwrap()))
    }

    fn read_u32(&mut self) -> Result<u32, WireError> {
        Ok(u32::from_le_bytes(self.read_bytes(4)?.try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_mixed_columns() {
        let table = Table::new(vec![
            Column {
                name: "timestamp".into(),
                data: ColumnData::I64(vec![1_700_000_000_000_000_000, 1_700_000_001_000_000_000]),
            },
            Column {
                name: "elapsed".into(),
                data: ColumnData::F64(vec![0.0, 1.0]),
            },
            Column {
                name: "classname".into(),
                data: ColumnData::Str(vec!["person".into(), "car".into()]),
            },
        ]);
        let bytes = encode_table(&table);
        let decoded = decode_table(&bytes).unwrap();
        assert_eq!(decoded, table);
    }

    #[test]
    fn round_trips_empty_table() {
        let table = Table::new(vec![Column {
            name: "classname".into(),
            data: ColumnData::Str(vec![]),
        }]);
        let bytes = encode_table(&table);
        let decoded = decode_table(&bytes).unwrap();
        assert_eq!(decoded.num_rows(), 0);
        assert_eq!(decoded, table);
    }

    #[test]
    fn truncated_encoding_is_an_error_not_a_panic() {
        let table = Table::new(vec![Column {
            name: "x".into(),
            data: ColumnData::I64(vec![1, 2, 3]),
        }]);
        let bytes = encode_table(&table);
        let truncated = &bytes[..bytes.len() - 3];
        assert!(decode_table(truncated).is_err());
    }
}
