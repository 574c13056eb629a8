//! Low-level decoder for the BioLogic `.mpr` modular binary container.
//!
//! An `.mpr` file is a fixed magic followed by a sequence of modules, each
//! introduced by the ASCII marker `MODULE` and a fixed-size header:
//!
//! ```text
//! offset  size  field
//! 0       10    short name  (e.g. "VMP data  ")
//! 10      25    long name
//! 35      4     payload length (u32 LE)
//! 39      4     module version (u32 LE)
//! 43      8     date "MM/DD/YY" (ASCII)
//! ```
//!
//! The data module payload starts with the row count (u32 LE) and column
//! count (u8), followed by the column id list (u8 per id for module
//! version 0, u16 LE from version 1 on) and the row-major data matrix.
//! Each column id selects both the column's name and its binary width
//! through a closed id table; flag columns are single bytes packing
//! status bits.

use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{NaiveDate, NaiveDateTime};
use std::io::Cursor;

/// File magic. Everything before the first module is padding.
const MAGIC: &[u8] = b"BIO-LOGIC MODULAR FILE\x1a";
/// Offset of the first module marker.
const HEADER_LEN: usize = 52;
/// Module marker.
const MODULE_MARKER: &[u8] = b"MODULE";

/// Binary width/interpretation of one data column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    /// IEEE f64
    Float64,
    /// IEEE f32
    Float32,
    /// u16 (range/index columns)
    Uint16,
    /// Packed status byte
    Flags,
}

/// Closed column id table: id → (source column name, kind).
///
/// Ids not listed here make the file undecodable; failing loudly beats
/// silently misaligning every subsequent row.
const COLUMN_IDS: &[(u16, &str, ColumnKind)] = &[
    (1, "mode", ColumnKind::Flags),
    (2, "ox/red", ColumnKind::Flags),
    (3, "error", ColumnKind::Flags),
    (4, "time/s", ColumnKind::Float64),
    (5, "control/V/mA", ColumnKind::Float32),
    (6, "Ewe/V", ColumnKind::Float32),
    (7, "dq/mA.h", ColumnKind::Float64),
    (8, "I/mA", ColumnKind::Float32),
    (9, "Ece/V", ColumnKind::Float32),
    (11, "<I>/mA", ColumnKind::Float64),
    (13, "(Q-Qo)/mA.h", ColumnKind::Float64),
    (16, "Analog IN 1/V", ColumnKind::Float32),
    (19, "control/V", ColumnKind::Float32),
    (20, "control/mA", ColumnKind::Float32),
    (21, "control changes", ColumnKind::Flags),
    (23, "dQ/mA.h", ColumnKind::Float64),
    (24, "cycle number", ColumnKind::Float64),
    (31, "Ns changes", ColumnKind::Flags),
    (32, "freq/Hz", ColumnKind::Float32),
    (33, "|Ewe|/V", ColumnKind::Float32),
    (34, "|I|/A", ColumnKind::Float32),
    (35, "Phase(Z)/deg", ColumnKind::Float32),
    (36, "|Z|/Ohm", ColumnKind::Float32),
    (37, "Re(Z)/Ohm", ColumnKind::Float32),
    (38, "-Im(Z)/Ohm", ColumnKind::Float32),
    (39, "I Range", ColumnKind::Uint16),
    (65, "flags2", ColumnKind::Flags),
    (70, "P/W", ColumnKind::Float32),
    (74, "|Energy|/W.h", ColumnKind::Float64),
    (131, "Ns", ColumnKind::Uint16),
];

fn column_for_id(id: u16) -> Option<(&'static str, ColumnKind)> {
    COLUMN_IDS.iter().find(|(i, _, _)| *i == id).map(|(_, name, kind)| (*name, *kind))
}

/// Decoder failure, turned into a `ParseError` by the caller.
#[derive(Debug, thiserror::Error)]
pub enum MprError {
    /// Magic mismatch
    #[error("not a BIO-LOGIC modular file")]
    BadMagic,
    /// Truncated module or payload
    #[error("truncated file: {0}")]
    Truncated(String),
    /// Column id outside the closed table
    #[error("unknown column id {0}")]
    UnknownColumnId(u16),
    /// The container holds no data module
    #[error("no VMP data module")]
    NoDataModule,
}

/// One decoded module (header plus raw payload).
struct Module<'a> {
    short_name: String,
    version: u32,
    date: &'a [u8],
    payload: &'a [u8],
}

/// Decoded contents of an `.mpr` file: column dictionary in file order
/// plus the acquisition date from the data module header.
pub struct MprContents {
    /// `(source column name, values)` in file order; flag and u16 columns
    /// are widened to f64
    pub columns: Vec<(String, Vec<f64>)>,
    /// Acquisition timestamp (date resolution)
    pub timestamp: Option<NaiveDateTime>,
}

/// Decode the modular container.
pub fn decode(bytes: &[u8]) -> Result<MprContents, MprError> {
    if bytes.len() < HEADER_LEN || !bytes.starts_with(MAGIC) {
        return Err(MprError::BadMagic);
    }

    let modules = read_modules(&bytes[HEADER_LEN..])?;
    let data_module = modules
        .iter()
        .find(|m| m.short_name.starts_with("VMP data"))
        .ok_or(MprError::NoDataModule)?;

    let columns = decode_data_module(data_module)?;
    let timestamp = parse_module_date(data_module.date);
    Ok(MprContents { columns, timestamp })
}

fn read_modules(mut rest: &[u8]) -> Result<Vec<Module<'_>>, MprError> {
    let mut modules = Vec::new();
    while !rest.is_empty() {
        if rest.len() < MODULE_MARKER.len() || &rest[..MODULE_MARKER.len()] != MODULE_MARKER {
            return Err(MprError::Truncated("expected MODULE marker".to_string()));
        }
        rest = &rest[MODULE_MARKER.len()..];
        if rest.len() < 51 {
            return Err(MprError::Truncated("module header".to_string()));
        }
        let short_name = String::from_utf8_lossy(&rest[..10]).trim_end().to_string();
        let mut cursor = Cursor::new(&rest[35..43]);
        let length = cursor.read_u32::<LittleEndian>().expect("slice length checked") as usize;
        let version = cursor.read_u32::<LittleEndian>().expect("slice length checked");
        let date = &rest[43..51];
        rest = &rest[51..];
        if rest.len() < length {
            return Err(MprError::Truncated(format!("module '{short_name}' payload")));
        }
        let (payload, tail) = rest.split_at(length);
        modules.push(Module { short_name, version, date, payload });
        rest = tail;
    }
    Ok(modules)
}

fn decode_data_module(module: &Module<'_>) -> Result<Vec<(String, Vec<f64>)>, MprError> {
    let mut cursor = Cursor::new(module.payload);
    let n_rows = cursor
        .read_u32::<LittleEndian>()
        .map_err(|_| MprError::Truncated("row count".to_string()))? as usize;
    let n_cols = cursor
        .read_u8()
        .map_err(|_| MprError::Truncated("column count".to_string()))? as usize;

    let mut kinds = Vec::with_capacity(n_cols);
    let mut names = Vec::with_capacity(n_cols);
    for _ in 0..n_cols {
        let id = if module.version == 0 {
            cursor.read_u8().map_err(|_| MprError::Truncated("column ids".to_string()))? as u16
        } else {
            cursor
                .read_u16::<LittleEndian>()
                .map_err(|_| MprError::Truncated("column ids".to_string()))?
        };
        let (name, kind) = column_for_id(id).ok_or(MprError::UnknownColumnId(id))?;
        names.push(name.to_string());
        kinds.push(kind);
    }

    let mut columns: Vec<Vec<f64>> = vec![Vec::with_capacity(n_rows); n_cols];
    for row in 0..n_rows {
        for (kind, col) in kinds.iter().zip(columns.iter_mut()) {
            let value = read_cell(&mut cursor, *kind)
                .map_err(|_| MprError::Truncated(format!("data row {row}")))?;
            col.push(value);
        }
    }

    Ok(names.into_iter().zip(columns).collect())
}

fn read_cell(cursor: &mut Cursor<&[u8]>, kind: ColumnKind) -> std::io::Result<f64> {
    Ok(match kind {
        ColumnKind::Float64 => cursor.read_f64::<LittleEndian>()?,
        ColumnKind::Float32 => cursor.read_f32::<LittleEndian>()? as f64,
        ColumnKind::Uint16 => cursor.read_u16::<LittleEndian>()? as f64,
        ColumnKind::Flags => cursor.read_u8()? as f64,
    })
}

/// Module header dates are "MM/DD/YY"; midnight is used as the time of day.
fn parse_module_date(date: &[u8]) -> Option<NaiveDateTime> {
    let text = std::str::from_utf8(date).ok()?.trim();
    NaiveDate::parse_from_str(text, "%m/%d/%y").ok()?.and_hms_opt(0, 0, 0)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_data_module() {
        let bytes = encode::build_mpr(
            &[
                (4, vec![0.0, 1.0, 2.0]),
                (6, vec![0.5, 0.6, 0.7]),
                (11, vec![1.0, 2.0, 3.0]),
            ],
            "06/13/24",
        );
        let contents = decode(&bytes).unwrap();
        assert_eq!(contents.columns.len(), 3);
        assert_eq!(contents.columns[0].0, "time/s");
        assert_eq!(contents.columns[0].1, vec![0.0, 1.0, 2.0]);
        assert_eq!(contents.columns[2].0, "<I>/mA");
        assert_eq!(
            contents.timestamp,
            NaiveDate::from_ymd_opt(2024, 6, 13).unwrap().and_hms_opt(0, 0, 0)
        );
    }

    #[test]
    fn float32_columns_round_within_precision() {
        let bytes = encode::build_mpr(&[(6, vec![0.123_456])], "01/01/24");
        let contents = decode(&bytes).unwrap();
        assert!((contents.columns[0].1[0] - 0.123_456).abs() < 1e-6);
    }

    #[test]
    fn bad_magic_rejected() {
        assert!(matches!(decode(b"not an mpr file at all"), Err(MprError::BadMagic)));
    }

    #[test]
    fn unknown_column_id_rejected() {
        let mut bytes = encode::build_mpr(&[(4, vec![0.0])], "01/01/24");
        // Patch the column id (first two bytes after row count + col count).
        let id_offset = HEADER_LEN + MODULE_MARKER.len() + 51 + 5;
        bytes[id_offset] = 0xFF;
        bytes[id_offset + 1] = 0x00;
        assert!(matches!(decode(&bytes), Err(MprError::UnknownColumnId(255))));
    }

    #[test]
    fn truncated_payload_rejected() {
        let bytes = encode::build_mpr(&[(4, vec![0.0, 1.0])], "01/01/24");
        assert!(matches!(decode(&bytes[..bytes.len() - 4]), Err(MprError::Truncated(_))));
    }
}
