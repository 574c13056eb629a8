//! # Gamry `.DTA` Parser
//!
//! Gamry Instruments write a text format: a free-form header of
//! `KEY<TAB>VALUE` pairs followed by one or more `CURVE TABLE` blocks.
//! Each block is laid out as
//!
//! ```text
//! CURVE1  TABLE   <n>
//! 	Pt	T	Vf	Im	...      ← column headers
//! 	#	s	V vs. Ref.	A	...  ← units row
//! 	0	0.1	0.5	1e-5	...      ← data rows
//! ```
//!
//! All curve blocks are concatenated in order; when a block has no
//! `Cycle` column one is synthesized from the numeric suffix of its
//! marker (`CURVE3` → cycle 3), so multi-cycle CVs keep their cycle
//! structure.

use std::collections::HashMap;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::dataset::{EchemDataset, SourceFormat};
use crate::parsers::{standardize_columns, ParseError};
use crate::schema::{Technique, GAMRY_COLUMN_MAP};

/// Header TAG values mapped to technique abbreviations.
const TAG_TO_TECHNIQUE: &[(&str, Technique)] = &[
    ("CV", Technique::CV),
    ("LSV", Technique::LSV),
    ("CHRONOA", Technique::CA),
    ("CHRONOP", Technique::CP),
    ("CORPOT", Technique::OCP),
    ("EISPOT", Technique::PEIS),
    ("EISGALV", Technique::GEIS),
];

/// Filename fragments tried in order when the header has no usable TAG.
/// `lsv` must precede `cv` so `my_lsv.dta` is not matched as CV.
const FILENAME_PATTERNS: &[(&str, Technique)] = &[
    ("lsv", Technique::LSV),
    ("cv", Technique::CV),
    ("eis", Technique::PEIS),
    ("ca", Technique::CA),
    ("cp", Technique::CP),
    ("ocv", Technique::OCV),
    ("ocp", Technique::OCP),
];

/// Header keys worth carrying into the dataset's user metadata.
const RETAINED_HEADER_KEYS: &[&str] = &["TITLE", "DATE", "TIME", "NOTES", "TAG"];

static CURVE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\w*CURVE)(\d*)\s+TABLE").expect("static regex"));
static CURVE_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^Z?OCV?CURVE").expect("static regex"));

/// Read a Gamry `.DTA` file into a canonical dataset.
pub fn read_gamry_file(path: &Path, filename: Option<&str>) -> Result<EchemDataset, ParseError> {
    let filename = filename
        .map(str::to_string)
        .or_else(|| path.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| path.display().to_string());

    let raw = std::fs::read(path).map_err(|e| ParseError::io(&filename, e))?;
    let text = String::from_utf8_lossy(&raw);
    let lines: Vec<&str> = text.lines().collect();

    let header = parse_header(&lines);
    let markers = find_curve_markers(&lines);
    if markers.is_empty() {
        return Err(ParseError::MissingMarker {
            file: filename,
            detail: "no CURVE TABLE marker found".to_string(),
        });
    }

    // Read every curve block; blocks that turn out to be empty are skipped,
    // matching how instruments emit trailing empty OCVCURVE sections.
    let mut curves = Vec::new();
    for (i, (line_idx, curve_num)) in markers.iter().enumerate() {
        let end = markers.get(i + 1).map(|(next, _)| *next).unwrap_or(lines.len());
        if let Some(curve) = read_curve(&lines, *line_idx, *curve_num, end) {
            curves.push(curve);
        }
    }
    if curves.is_empty() {
        return Err(ParseError::NoData {
            file: filename,
            detail: "all CURVE blocks were empty".to_string(),
        });
    }

    let combined = concat_curves(curves, &filename)?;
    let table = standardize_columns(combined, GAMRY_COLUMN_MAP, &filename)?;

    let technique = technique_from_header(&header)
        .or_else(|| technique_from_gamry_filename(&filename));

    let mut user_metadata = HashMap::new();
    for key in RETAINED_HEADER_KEYS {
        if let Some(value) = header.get(*key) {
            user_metadata.insert(key.to_string(), value.clone());
        }
    }

    let cycles = table.cycles();
    let label = gamry_label(&filename);
    Ok(EchemDataset {
        original_filename: Some(filename.clone()),
        filename,
        table,
        technique,
        label,
        timestamp: None,
        cycles,
        source_format: Some(SourceFormat::Gamry),
        file_hash: None,
        user_metadata,
    })
}

/// `KEY<TAB>VALUE` pairs from the header, up to the first curve marker.
fn parse_header(lines: &[&str]) -> HashMap<String, String> {
    let mut header = HashMap::new();
    for line in lines {
        let stripped = line.trim();
        if stripped.starts_with("CURVE") || CURVE_LINE.is_match(stripped) {
            break;
        }
        if let Some((key, rest)) = line.split_once('\t') {
            let key = key.trim();
            let value = rest.split('\t').next().unwrap_or("").trim();
            if !key.is_empty() && !value.is_empty() && !key.starts_with('#') {
                header.insert(key.to_string(), value.to_string());
            }
        }
    }
    header
}

fn technique_from_header(header: &HashMap<String, String>) -> Option<Technique> {
    let tag = header.get("TAG")?.to_ascii_uppercase();
    TAG_TO_TECHNIQUE
        .iter()
        .find(|(t, _)| *t == tag)
        .map(|(_, technique)| *technique)
        .or_else(|| Technique::parse(&tag))
}

fn technique_from_gamry_filename(filename: &str) -> Option<Technique> {
    let lower = filename.to_ascii_lowercase();
    FILENAME_PATTERNS
        .iter()
        .find(|(pattern, _)| lower.contains(pattern))
        .map(|(_, technique)| *technique)
}

/// Label: filename with the extension removed and any leading `<n>_`
/// sequence number dropped.
fn gamry_label(filename: &str) -> String {
    static LEADING_SEQ: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+_").expect("static regex"));
    let base = filename.trim_end_matches(".DTA").trim_end_matches(".dta");
    LEADING_SEQ.replace(base, "").into_owned()
}

/// All `*CURVE<n> TABLE` markers with their optional numeric suffix.
fn find_curve_markers(lines: &[&str]) -> Vec<(usize, Option<i64>)> {
    let mut markers = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let stripped = line.trim();
        if !(stripped.contains("CURVE") && stripped.contains("TABLE")) {
            continue;
        }
        if let Some(caps) = CURVE_MARKER.captures(stripped) {
            let num = caps.get(2).and_then(|m| m.as_str().parse::<i64>().ok());
            markers.push((i, num));
        }
    }
    markers
}

/// One curve block as `(name, values)` pairs, or `None` when it holds no
/// complete data row.
///
/// Layout relative to the marker line L: headers at L+1, units at L+2,
/// data from L+3 until the block end. Rows with fewer fields than the
/// header width are discarded; unparsable fields become NaN.
fn read_curve(
    lines: &[&str],
    marker_line: usize,
    curve_num: Option<i64>,
    end_line: usize,
) -> Option<Vec<(String, Vec<f64>)>> {
    let header_line = lines.get(marker_line + 1)?;
    let names: Vec<String> = header_line
        .trim()
        .split('\t')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect();
    if names.is_empty() {
        return None;
    }

    let data_start = marker_line + 3;
    let mut columns: Vec<Vec<f64>> = vec![Vec::new(); names.len()];
    for line in lines.iter().take(end_line.min(lines.len())).skip(data_start) {
        let stripped = line.trim();
        if stripped.is_empty() {
            continue;
        }
        if CURVE_LINE.is_match(stripped) {
            break;
        }
        let parts: Vec<&str> = stripped.split('\t').collect();
        if parts.len() < names.len() {
            continue;
        }
        for (col, part) in columns.iter_mut().zip(parts.iter()) {
            col.push(part.trim().parse::<f64>().unwrap_or(f64::NAN));
        }
    }

    if columns[0].is_empty() {
        return None;
    }

    let n_rows = columns[0].len();
    let mut curve: Vec<(String, Vec<f64>)> =
        names.into_iter().zip(columns).collect();
    if !curve.iter().any(|(name, _)| name == "Cycle") {
        curve.push(("Cycle".to_string(), vec![curve_num.unwrap_or(0) as f64; n_rows]));
    }
    Some(curve)
}

/// Concatenate curve blocks in order. Blocks must agree on column names.
fn concat_curves(
    mut curves: Vec<Vec<(String, Vec<f64>)>>,
    file: &str,
) -> Result<Vec<(String, Vec<f64>)>, ParseError> {
    let mut combined = curves.remove(0);
    for curve in curves {
        if curve.len() != combined.len()
            || curve.iter().zip(combined.iter()).any(|((a, _), (b, _))| a != b)
        {
            return Err(ParseError::InvalidFormat {
                file: file.to_string(),
                detail: "curve blocks disagree on columns".to_string(),
            });
        }
        for ((_, dst), (_, src)) in combined.iter_mut().zip(curve) {
            dst.extend(src);
        }
    }
    Ok(combined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_dta(content: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::Builder::new().suffix(".dta").tempfile().unwrap();
        tmp.write_all(content.as_bytes()).unwrap();
        tmp
    }

    const TWO_CURVE_CV: &str = "EXPLAIN\n\
TAG\tCV\n\
TITLE\tLABEL\tTest sweep\n\
CURVE1\tTABLE\t3\n\
\tPt\tT\tVf\tIm\n\
\t#\ts\tV vs. Ref.\tA\n\
\t0\t0.0\t0.10\t0.001\n\
\t1\t0.1\t0.20\t0.002\n\
\t2\t0.2\t0.30\t0.003\n\
CURVE2\tTABLE\t3\n\
\tPt\tT\tVf\tIm\n\
\t#\ts\tV vs. Ref.\tA\n\
\t0\t0.3\t0.10\t0.004\n\
\t1\t0.4\t0.20\t0.005\n\
\t2\t0.5\t0.30\t0.006\n";

    #[test]
    fn multi_curve_synthesizes_cycles() {
        let tmp = write_dta(TWO_CURVE_CV);
        let ds = read_gamry_file(tmp.path(), Some("test_cv.dta")).unwrap();
        assert_eq!(ds.technique, Some(Technique::CV));
        assert_eq!(ds.table.n_rows(), 6);
        assert_eq!(
            ds.table.column("cycle").unwrap(),
            &[1.0, 1.0, 1.0, 2.0, 2.0, 2.0]
        );
        assert_eq!(ds.cycles, vec![1, 2]);
        assert_eq!(ds.source_format, Some(SourceFormat::Gamry));
        // Pt is unmapped and kept; T/Vf/Im become canonical.
        assert!(ds.table.has_column("time_s"));
        assert!(ds.table.has_column("potential_V"));
        assert!(ds.table.has_column("current_A"));
        assert!(ds.table.has_column("Pt"));
    }

    #[test]
    fn header_tag_wins_over_filename() {
        let content = TWO_CURVE_CV.replace("TAG\tCV", "TAG\tCHRONOA");
        let tmp = write_dta(&content);
        let ds = read_gamry_file(tmp.path(), Some("something_lsv.dta")).unwrap();
        assert_eq!(ds.technique, Some(Technique::CA));
        assert_eq!(ds.user_metadata.get("TAG").map(String::as_str), Some("CHRONOA"));
    }

    #[test]
    fn filename_fallback_prefers_lsv_over_cv() {
        let content = TWO_CURVE_CV.replace("TAG\tCV\n", "");
        let tmp = write_dta(&content);
        let ds = read_gamry_file(tmp.path(), Some("sample_lsv_01.dta")).unwrap();
        assert_eq!(ds.technique, Some(Technique::LSV));
    }

    #[test]
    fn short_rows_are_discarded() {
        let content = "TAG\tCV\n\
CURVE\tTABLE\t2\n\
\tT\tVf\tIm\n\
\ts\tV\tA\n\
\t0.0\t0.1\t0.001\n\
\t0.1\t0.2\n\
\t0.2\t0.3\t0.003\n";
        let tmp = write_dta(content);
        let ds = read_gamry_file(tmp.path(), Some("cv.dta")).unwrap();
        assert_eq!(ds.table.n_rows(), 2);
        // No numeric suffix on the marker: synthesized cycle is 0.
        assert_eq!(ds.cycles, vec![0]);
    }

    #[test]
    fn missing_markers_error() {
        let tmp = write_dta("TAG\tCV\nNOTES\tno curves here\n");
        let err = read_gamry_file(tmp.path(), Some("cv.dta")).unwrap_err();
        assert!(matches!(err, ParseError::MissingMarker { .. }));
    }

    #[test]
    fn label_drops_leading_sequence_number() {
        assert_eq!(gamry_label("03_sample_cv.DTA"), "sample_cv");
        assert_eq!(gamry_label("plain.dta"), "plain");
    }
}
