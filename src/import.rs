//! CSV import for the two supported plate layouts.
//!
//! * Legacy: a header row with `from_block`, `well` and the seven field
//!   names, one row per well.
//! * Layout: positional grids introduced by `Block <n>` rows, each followed by
//!   row-letter rows holding twelve base strains.
//!
//! The format is detected from the content. Plates whose wells are all empty
//! are dropped from the result.

use crate::types::{COLUMNS, Field, Plate, WellId, WellMetadata};
use csv::ReaderBuilder;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Header cell that marks the legacy format.
pub const LEGACY_MARKER: &str = "from_block";

/// Prefix of a block marker row in the layout format.
pub const BLOCK_MARKER: &str = "Block";

/// Field value written for every field of an all-blank well.
pub const EMPTY_SENTINEL: &str = "empty";

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Unrecognized format: expected a 'from_block' header or 'Block <n>' rows")]
    UnrecognizedFormat,
    #[error("No usable plates found in {0} file")]
    NoUsablePlates(CsvFormat),
}

/// Detected input layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CsvFormat {
    Legacy,
    Layout,
}

impl fmt::Display for CsvFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CsvFormat::Legacy => write!(f, "legacy"),
            CsvFormat::Layout => write!(f, "layout"),
        }
    }
}

/// Fully parsed result of one import.
#[derive(Debug, Clone)]
pub struct ImportOutcome {
    pub format: CsvFormat,
    pub plates: Vec<Plate>,
    /// Rows ignored because they lacked a usable plate or well id.
    pub skipped_rows: usize,
    /// Ids of plates dropped because every well was empty.
    pub dropped_empty: Vec<u32>,
}

/// Read CSV text into rows of cells. Rows may have differing lengths.
pub fn read_grid(text: &str) -> Result<Vec<Vec<String>>, csv::Error> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record?;
        rows.push(record.iter().map(|s| s.to_string()).collect());
    }
    Ok(rows)
}

/// Decide which layout a grid uses.
pub fn detect_format(rows: &[Vec<String>]) -> Option<CsvFormat> {
    let first = rows.first()?;
    if first.iter().any(|cell| cell.contains(LEGACY_MARKER)) {
        return Some(CsvFormat::Legacy);
    }
    let has_block = rows.iter().any(|row| {
        row.first()
            .is_some_and(|cell| cell.trim().starts_with(BLOCK_MARKER))
    });
    has_block.then_some(CsvFormat::Layout)
}

/// Parse CSV text into plates.
pub fn import_csv(text: &str) -> Result<ImportOutcome, ImportError> {
    let rows = read_grid(text)?;
    import_grid(&rows)
}

/// Parse an already-split grid into plates.
pub fn import_grid(rows: &[Vec<String>]) -> Result<ImportOutcome, ImportError> {
    let format = detect_format(rows).ok_or_else(|| {
        warn!("import rejected: unrecognized format");
        ImportError::UnrecognizedFormat
    })?;

    let (parsed, skipped_rows) = match format {
        CsvFormat::Legacy => parse_legacy(rows),
        CsvFormat::Layout => parse_layout(rows),
    };

    let mut plates = Vec::new();
    let mut dropped_empty = Vec::new();
    for plate in parsed {
        if plate.is_empty() {
            warn!(plate = plate.id, "dropping plate with no data");
            dropped_empty.push(plate.id);
        } else {
            plates.push(plate);
        }
    }

    if plates.is_empty() {
        warn!(%format, "import produced no usable plates");
        return Err(ImportError::NoUsablePlates(format));
    }

    info!(%format, plates = plates.len(), skipped_rows, "imported plates");
    Ok(ImportOutcome {
        format,
        plates,
        skipped_rows,
        dropped_empty,
    })
}

fn cell(row: &[String], index: Option<usize>) -> &str {
    index.and_then(|i| row.get(i)).map(String::as_str).unwrap_or("")
}

fn parse_plate_id(s: &str) -> Option<u32> {
    s.trim().parse::<u32>().ok().filter(|&id| id > 0)
}

fn parse_legacy(rows: &[Vec<String>]) -> (Vec<Plate>, usize) {
    let Some((header, data)) = rows.split_first() else {
        return (Vec::new(), 0);
    };
    let column = |name: &str| header.iter().position(|h| h.trim() == name);
    let block_col = column(LEGACY_MARKER);
    let well_col = column("well");
    let field_cols: Vec<(Field, Option<usize>)> =
        Field::ALL.iter().map(|&f| (f, column(f.name()))).collect();

    let mut plates: BTreeMap<u32, Plate> = BTreeMap::new();
    let mut skipped = 0;

    for (line, row) in data.iter().enumerate() {
        let plate_id = parse_plate_id(cell(row, block_col));
        let well = cell(row, well_col).parse::<WellId>().ok();
        let (Some(plate_id), Some(well)) = (plate_id, well) else {
            debug!(row = line + 2, "skipping row without plate or well id");
            skipped += 1;
            continue;
        };

        let sentinel = field_cols
            .iter()
            .all(|&(_, col)| cell(row, col) == EMPTY_SENTINEL);
        let mut meta = WellMetadata::default();
        if !sentinel {
            for &(field, col) in &field_cols {
                meta.set(field, cell(row, col));
            }
        }

        plates
            .entry(plate_id)
            .or_insert_with(|| Plate::new(plate_id))
            .metadata
            .insert(well, meta);
    }

    (plates.into_values().collect(), skipped)
}

fn parse_layout(rows: &[Vec<String>]) -> (Vec<Plate>, usize) {
    let mut plates: Vec<Plate> = Vec::new();
    let mut current: Option<usize> = None;
    let mut skipped = 0;

    for (line, row) in rows.iter().enumerate() {
        let first = row.first().map(|c| c.trim()).unwrap_or("");

        if let Some(rest) = first.strip_prefix(BLOCK_MARKER) {
            current = match parse_plate_id(rest) {
                // a repeated block number continues the plate it named first
                Some(id) => Some(match plates.iter().position(|p| p.id == id) {
                    Some(index) => {
                        debug!(row = line + 1, plate = id, "merging repeated block");
                        index
                    }
                    None => {
                        plates.push(Plate::new(id));
                        plates.len() - 1
                    }
                }),
                None => {
                    warn!(row = line + 1, marker = first, "ignoring block with invalid number");
                    None
                }
            };
            continue;
        }

        let Some(row_index) = WellId::row_index(first) else {
            continue;
        };
        let plate = match current {
            Some(index) => &mut plates[index],
            None => {
                debug!(row = line + 1, "skipping grid row outside a block");
                skipped += 1;
                continue;
            }
        };
        for (i, value) in row.iter().skip(1).take(COLUMNS as usize).enumerate() {
            let Some(well) = WellId::new(row_index, i as u8 + 1) else {
                continue;
            };
            if let Some(meta) = plate.metadata.get_mut(&well) {
                meta.set(Field::BaseStrain, value.trim());
            }
        }
    }

    (plates, skipped)
}
