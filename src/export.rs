//! Canonical CSV export.
//!
//! Output has one header line and one line per (plate, well) in plate order,
//! then row-major well order. A well whose seven fields are all empty is
//! written as the `empty` sentinel in every field column.
//!
//! Values are written without quoting, so a value containing a comma or a
//! line break cannot round-trip. `lint` reports such values.

use crate::import::EMPTY_SENTINEL;
use crate::types::{Field, Plate, WellId};
use csv::{QuoteStyle, Terminator, WriterBuilder};
use thiserror::Error;
use tracing::info;

/// Header line of the canonical format.
pub const EXPORT_HEADER: [&str; 9] = [
    "from_block",
    "well",
    "base_strain",
    "receptor",
    "anchor",
    "nanobody",
    "negsel",
    "dilution",
    "notes",
];

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Export produced invalid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Serialize plates to the canonical CSV text.
pub fn export_csv(plates: &[Plate]) -> Result<String, ExportError> {
    let mut wtr = WriterBuilder::new()
        .quote_style(QuoteStyle::Never)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    wtr.write_record(EXPORT_HEADER)?;

    for plate in plates {
        let block = plate.id.to_string();
        for well in WellId::all() {
            let meta = plate.well(well).cloned().unwrap_or_default();
            let name = well.to_string();
            let mut record: Vec<&str> = vec![block.as_str(), name.as_str()];
            if meta.is_empty() {
                record.extend([EMPTY_SENTINEL; 7]);
            } else {
                record.extend(Field::ALL.iter().map(|&f| meta.get(f)));
            }
            wtr.write_record(&record)?;
        }
    }

    let bytes = wtr.into_inner().map_err(|e| e.into_error())?;
    info!(plates = plates.len(), "exported plates");
    Ok(String::from_utf8(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::import_csv;

    fn well(s: &str) -> WellId {
        s.parse().unwrap()
    }

    #[test]
    fn test_header_and_line_count() {
        let text = export_csv(&[Plate::new(1), Plate::new(2)]).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "from_block,well,base_strain,receptor,anchor,nanobody,negsel,dilution,notes"
        );
        assert_eq!(lines.len(), 1 + 2 * 96);
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn test_empty_wells_use_sentinel() {
        let text = export_csv(&[Plate::new(1)]).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[1], "1,A1,empty,empty,empty,empty,empty,empty,empty");
        assert_eq!(lines[96], "1,H12,empty,empty,empty,empty,empty,empty,empty");
    }

    #[test]
    fn test_partial_wells_written_verbatim() {
        let mut plate = Plate::new(3);
        let meta = plate.metadata.get_mut(&well("A2")).unwrap();
        meta.base_strain = "S1".to_string();
        meta.notes = "two words".to_string();
        let text = export_csv(&[plate]).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[2], "3,A2,S1,,,,,,two words");
    }

    #[test]
    fn test_well_order_is_row_major() {
        let text = export_csv(&[Plate::new(1)]).unwrap();
        let wells: Vec<&str> = text
            .lines()
            .skip(1)
            .map(|l| l.split(',').nth(1).unwrap())
            .collect();
        assert_eq!(&wells[..3], &["A1", "A2", "A3"]);
        assert_eq!(wells[12], "B1");
    }

    #[test]
    fn test_delimiter_is_not_escaped() {
        let mut plate = Plate::new(1);
        plate.metadata.get_mut(&well("A1")).unwrap().notes = "a,b".to_string();
        let text = export_csv(&[plate]).unwrap();
        assert_eq!(text.lines().nth(1).unwrap(), "1,A1,,,,,,,a,b");
    }

    #[test]
    fn test_round_trip_through_import() {
        let mut plate = Plate::new(1);
        let meta = plate.metadata.get_mut(&well("D5")).unwrap();
        meta.base_strain = "S5".to_string();
        meta.dilution = "1:4".to_string();
        let text = export_csv(std::slice::from_ref(&plate)).unwrap();
        let outcome = import_csv(&text).unwrap();
        assert_eq!(outcome.plates, vec![plate]);
    }
}
