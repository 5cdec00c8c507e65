//! Reference table loading and the strain join.
//!
//! A reference CSV starts with a title row that is discarded. The second row
//! holds the headers, and every later row is a record keyed by those
//! headers. Wells are matched to records through `Strain_Name`.

use crate::import::read_grid;
use crate::types::{Field, Plate, WellId};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Join key column.
pub const STRAIN_NAME: &str = "Strain_Name";

/// Reference columns copied into well fields by the join.
pub const CONSTRUCT_COLUMNS: [(&str, Field); 3] = [
    ("Construct_1", Field::Negsel),
    ("Construct_2", Field::Anchor),
    ("Construct_3", Field::Receptor),
];

#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Reference data needs a title row and a header row, found {0} row(s)")]
    InsufficientRows(usize),
    #[error("Reference header has no '{0}' column")]
    MissingColumn(String),
}

/// One record of the reference table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReferenceRow {
    values: HashMap<String, String>,
}

impl ReferenceRow {
    /// Value for a header, or the empty string when absent.
    pub fn get(&self, header: &str) -> &str {
        self.values.get(header).map(String::as_str).unwrap_or("")
    }

    pub fn strain_name(&self) -> &str {
        self.get(STRAIN_NAME)
    }
}

/// Parsed reference records in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReferenceTable {
    pub headers: Vec<String>,
    pub rows: Vec<ReferenceRow>,
}

impl ReferenceTable {
    /// Parse reference CSV text.
    pub fn from_csv(text: &str) -> Result<Self, ReferenceError> {
        let grid = read_grid(text)?;
        Self::from_grid(&grid)
    }

    /// Build a table from raw rows: title, header, then data.
    pub fn from_grid(grid: &[Vec<String>]) -> Result<Self, ReferenceError> {
        if grid.len() < 2 {
            warn!(rows = grid.len(), "not enough reference rows to load");
            return Err(ReferenceError::InsufficientRows(grid.len()));
        }

        let headers = normalize_headers(&grid[1]);
        if !headers.iter().any(|h| h == STRAIN_NAME) {
            warn!("reference header lacks {}", STRAIN_NAME);
            return Err(ReferenceError::MissingColumn(STRAIN_NAME.to_string()));
        }

        let rows: Vec<ReferenceRow> = grid[2..]
            .iter()
            .filter(|row| row.iter().any(|cell| !cell.trim().is_empty()))
            .map(|row| ReferenceRow {
                values: headers
                    .iter()
                    .enumerate()
                    .map(|(i, h)| (h.clone(), row.get(i).cloned().unwrap_or_default()))
                    .collect(),
            })
            .collect();

        info!(rows = rows.len(), columns = headers.len(), "loaded reference table");
        Ok(Self { headers, rows })
    }

    /// First record whose `Strain_Name` equals `strain` exactly.
    pub fn find(&self, strain: &str) -> Option<&ReferenceRow> {
        self.rows.iter().find(|r| r.strain_name() == strain)
    }

    /// Strain names that occur on more than one record, in file order.
    pub fn duplicate_strains(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        let mut reported = HashSet::new();
        let mut duplicates = Vec::new();
        for name in self.rows.iter().map(ReferenceRow::strain_name) {
            if !seen.insert(name) && reported.insert(name) {
                duplicates.push(name);
            }
        }
        duplicates
    }
}

/// Trim headers, join internal whitespace with `_`, and make every header
/// unique by suffixing repeats with `_1`, `_2`, ...
pub fn normalize_headers(raw: &[String]) -> Vec<String> {
    let mut taken: HashSet<String> = HashSet::new();
    let mut headers = Vec::with_capacity(raw.len());

    for (i, cell) in raw.iter().enumerate() {
        let mut base = cell.split_whitespace().collect::<Vec<_>>().join("_");
        if base.is_empty() {
            base = format!("Column_{}", i + 1);
        }
        let mut name = base.clone();
        let mut n = 1;
        while taken.contains(&name) {
            name = format!("{}_{}", base, n);
            n += 1;
        }
        taken.insert(name.clone());
        headers.push(name);
    }
    headers
}

/// A well whose strain had no reference record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnmatchedWell {
    pub plate: u32,
    pub well: WellId,
    pub strain: String,
}

/// Outcome of a join over one or more plates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JoinReport {
    pub updated: usize,
    pub skipped_empty: usize,
    pub unmatched: Vec<UnmatchedWell>,
}

impl JoinReport {
    fn merge(&mut self, other: JoinReport) {
        self.updated += other.updated;
        self.skipped_empty += other.skipped_empty;
        self.unmatched.extend(other.unmatched);
    }
}

/// Backfill `negsel`, `anchor` and `receptor` of every well from the
/// reference record matching its `base_strain`. No other field is touched.
pub fn resolve_strains(plate: &mut Plate, table: &ReferenceTable) -> JoinReport {
    let mut index: HashMap<&str, &ReferenceRow> = HashMap::new();
    for row in &table.rows {
        index.entry(row.strain_name()).or_insert(row);
    }

    let mut report = JoinReport::default();
    for (well, meta) in plate.metadata.iter_mut() {
        if meta.base_strain.is_empty() {
            report.skipped_empty += 1;
            continue;
        }
        match index.get(meta.base_strain.as_str()) {
            Some(row) => {
                for (column, field) in CONSTRUCT_COLUMNS {
                    meta.set(field, row.get(column));
                }
                report.updated += 1;
            }
            None => {
                warn!(
                    plate = plate.id,
                    well = %well,
                    strain = %meta.base_strain,
                    "strain not found in reference table"
                );
                report.unmatched.push(UnmatchedWell {
                    plate: plate.id,
                    well: *well,
                    strain: meta.base_strain.clone(),
                });
            }
        }
    }
    debug!(plate = plate.id, skipped = report.skipped_empty, "wells without strain skipped");
    report
}

/// Run [`resolve_strains`] over several plates and combine the reports.
pub fn resolve_all(plates: &mut [Plate], table: &ReferenceTable) -> JoinReport {
    let mut report = JoinReport::default();
    for plate in plates {
        report.merge(resolve_strains(plate, table));
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WellMetadata;

    fn grid(rows: &[&[&str]]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    fn table() -> ReferenceTable {
        ReferenceTable::from_grid(&grid(&[
            &["Strain collection 2024"],
            &["Strain Name", "Construct_1", "Construct_2", "Construct_3"],
            &["S1", "N", "A", "R"],
            &["S1", "N2", "A2", "R2"],
            &["S2", "n", "a"],
        ]))
        .unwrap()
    }

    fn well(s: &str) -> WellId {
        s.parse().unwrap()
    }

    #[test]
    fn test_normalize_headers() {
        let raw: Vec<String> = ["  Strain  Name ", "Note", "Note", "", "Note_1", "Note"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            normalize_headers(&raw),
            vec!["Strain_Name", "Note", "Note_1", "Column_4", "Note_1_1", "Note_2"]
        );
    }

    #[test]
    fn test_from_grid_pads_and_discards_empty_rows() {
        let table = ReferenceTable::from_grid(&grid(&[
            &["title"],
            &["Strain_Name", "Construct_1", "Construct_2"],
            &["S1"],
            &["", " ", ""],
            &["S2", "x", "y", "overflow"],
        ]))
        .unwrap();
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].get("Construct_2"), "");
        assert_eq!(table.rows[1].get("Construct_2"), "y");
    }

    #[test]
    fn test_from_grid_requires_two_rows() {
        assert!(matches!(
            ReferenceTable::from_grid(&grid(&[&["only a title"]])),
            Err(ReferenceError::InsufficientRows(1))
        ));
        assert!(matches!(
            ReferenceTable::from_grid(&[]),
            Err(ReferenceError::InsufficientRows(0))
        ));
    }

    #[test]
    fn test_from_grid_requires_strain_column() {
        assert!(matches!(
            ReferenceTable::from_grid(&grid(&[&["t"], &["Name", "Construct_1"]])),
            Err(ReferenceError::MissingColumn(_))
        ));
    }

    #[test]
    fn test_from_csv_with_title_row() {
        let text = "Strains,,\nStrain_Name,Construct_1,Construct_2,Construct_3\nS9,a,b,c\n";
        let table = ReferenceTable::from_csv(text).unwrap();
        assert_eq!(table.find("S9").unwrap().get("Construct_3"), "c");
    }

    #[test]
    fn test_find_first_match_wins() {
        let table = table();
        assert_eq!(table.find("S1").unwrap().get("Construct_1"), "N");
        assert!(table.find("s1").is_none());
        assert!(table.find(" S1").is_none());
        assert_eq!(table.duplicate_strains(), vec!["S1"]);
    }

    #[test]
    fn test_join_sets_three_fields() {
        let mut plate = Plate::new(1);
        let meta = plate.metadata.get_mut(&well("A1")).unwrap();
        meta.base_strain = "S1".to_string();
        meta.nanobody = "nb".to_string();
        meta.dilution = "1:2".to_string();
        meta.notes = "keep".to_string();

        let report = resolve_strains(&mut plate, &table());
        assert_eq!(report.updated, 1);
        assert_eq!(report.skipped_empty, 95);
        assert!(report.unmatched.is_empty());

        let meta = &plate.metadata[&well("A1")];
        assert_eq!(meta.negsel, "N");
        assert_eq!(meta.anchor, "A");
        assert_eq!(meta.receptor, "R");
        assert_eq!(meta.base_strain, "S1");
        assert_eq!(meta.nanobody, "nb");
        assert_eq!(meta.dilution, "1:2");
        assert_eq!(meta.notes, "keep");
    }

    #[test]
    fn test_join_missing_construct_writes_empty() {
        let mut plate = Plate::new(1);
        let meta = plate.metadata.get_mut(&well("B1")).unwrap();
        meta.base_strain = "S2".to_string();
        meta.receptor = "old".to_string();
        resolve_strains(&mut plate, &table());
        assert_eq!(plate.metadata[&well("B1")].receptor, "");
        assert_eq!(plate.metadata[&well("B1")].anchor, "a");
    }

    #[test]
    fn test_join_unmatched_leaves_well_unchanged() {
        let mut plate = Plate::new(4);
        let meta = plate.metadata.get_mut(&well("C3")).unwrap();
        *meta = WellMetadata {
            base_strain: "Unknown".to_string(),
            receptor: "r".to_string(),
            ..Default::default()
        };
        let before = plate.clone();
        let report = resolve_strains(&mut plate, &table());
        assert_eq!(plate, before);
        assert_eq!(
            report.unmatched,
            vec![UnmatchedWell {
                plate: 4,
                well: well("C3"),
                strain: "Unknown".to_string()
            }]
        );
    }

    #[test]
    fn test_resolve_all_merges_reports() {
        let mut plates = vec![Plate::new(1), Plate::new(2)];
        for plate in &mut plates {
            plate.metadata.get_mut(&well("A1")).unwrap().base_strain = "S1".to_string();
        }
        let report = resolve_all(&mut plates, &table());
        assert_eq!(report.updated, 2);
        assert_eq!(plates[1].metadata[&well("A1")].negsel, "N");
    }
}
