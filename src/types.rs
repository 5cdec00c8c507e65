//! Core types for plates, wells, and their metadata.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Row letters of a 96-well plate, top to bottom.
pub const ROW_LETTERS: [char; 8] = ['A', 'B', 'C', 'D', 'E', 'F', 'G', 'H'];

/// Number of columns on a plate.
pub const COLUMNS: u8 = 12;

/// Number of wells on a plate.
pub const WELL_COUNT: usize = 96;

/// Identifier of one well, e.g. `A1` or `H12`.
///
/// Ordering is row-major (A1..A12, B1..B12, ..., H12), which is also the
/// order wells are exported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WellId {
    row: u8,
    column: u8,
}

impl WellId {
    /// Build a well id from a zero-based row and a one-based column.
    pub fn new(row: u8, column: u8) -> Option<Self> {
        if (row as usize) < ROW_LETTERS.len() && (1..=COLUMNS).contains(&column) {
            Some(Self { row, column })
        } else {
            None
        }
    }

    /// All 96 wells in row-major order.
    pub fn all() -> impl Iterator<Item = WellId> {
        (0..ROW_LETTERS.len() as u8)
            .flat_map(|row| (1..=COLUMNS).map(move |column| WellId { row, column }))
    }

    pub fn row(&self) -> u8 {
        self.row
    }

    pub fn column(&self) -> u8 {
        self.column
    }

    pub fn row_letter(&self) -> char {
        ROW_LETTERS[self.row as usize]
    }

    /// Zero-based row index for a row letter.
    pub fn row_index(letter: &str) -> Option<u8> {
        let mut chars = letter.chars();
        let c = chars.next()?;
        if chars.next().is_some() {
            return None;
        }
        ROW_LETTERS.iter().position(|&l| l == c).map(|i| i as u8)
    }
}

impl fmt::Display for WellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.row_letter(), self.column)
    }
}

impl FromStr for WellId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || format!("Invalid well id: '{}'", s);
        let (letter, digits) = s.split_at_checked(1).ok_or_else(invalid)?;
        let row = WellId::row_index(letter).ok_or_else(invalid)?;
        let all_digits = digits.bytes().all(|b| b.is_ascii_digit());
        if digits.is_empty() || digits.starts_with('0') || !all_digits {
            return Err(invalid());
        }
        let column: u8 = digits.parse().map_err(|_| invalid())?;
        WellId::new(row, column).ok_or_else(invalid)
    }
}

impl TryFrom<String> for WellId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WellId> for String {
    fn from(well: WellId) -> Self {
        well.to_string()
    }
}

/// One of the seven metadata fields carried by every well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    BaseStrain,
    Receptor,
    Anchor,
    Nanobody,
    Negsel,
    Dilution,
    Notes,
}

impl Field {
    /// All fields in export column order.
    pub const ALL: [Field; 7] = [
        Field::BaseStrain,
        Field::Receptor,
        Field::Anchor,
        Field::Nanobody,
        Field::Negsel,
        Field::Dilution,
        Field::Notes,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Field::BaseStrain => "base_strain",
            Field::Receptor => "receptor",
            Field::Anchor => "anchor",
            Field::Nanobody => "nanobody",
            Field::Negsel => "negsel",
            Field::Dilution => "dilution",
            Field::Notes => "notes",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Field {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Field::ALL
            .into_iter()
            .find(|f| f.name() == wanted)
            .ok_or_else(|| {
                format!(
                    "Invalid field: {}. Must be one of {}",
                    s,
                    Field::ALL.map(|f| f.name()).join(", ")
                )
            })
    }
}

/// Metadata of a single well. Fields are never absent, only empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WellMetadata {
    pub base_strain: String,
    pub receptor: String,
    pub anchor: String,
    pub nanobody: String,
    pub negsel: String,
    pub dilution: String,
    pub notes: String,
}

impl WellMetadata {
    pub fn get(&self, field: Field) -> &str {
        match field {
            Field::BaseStrain => &self.base_strain,
            Field::Receptor => &self.receptor,
            Field::Anchor => &self.anchor,
            Field::Nanobody => &self.nanobody,
            Field::Negsel => &self.negsel,
            Field::Dilution => &self.dilution,
            Field::Notes => &self.notes,
        }
    }

    pub fn set(&mut self, field: Field, value: impl Into<String>) {
        let slot = match field {
            Field::BaseStrain => &mut self.base_strain,
            Field::Receptor => &mut self.receptor,
            Field::Anchor => &mut self.anchor,
            Field::Nanobody => &mut self.nanobody,
            Field::Negsel => &mut self.negsel,
            Field::Dilution => &mut self.dilution,
            Field::Notes => &mut self.notes,
        };
        *slot = value.into();
    }

    /// True when all seven fields are the empty string.
    pub fn is_empty(&self) -> bool {
        Field::ALL.iter().all(|&f| self.get(f).is_empty())
    }
}

/// Well id to metadata map of one plate.
pub type WellMap = BTreeMap<WellId, WellMetadata>;

/// One 96-well plate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plate {
    pub id: u32,
    pub metadata: WellMap,
}

impl Plate {
    /// A plate with all 96 wells at their default metadata.
    pub fn new(id: u32) -> Self {
        Self {
            id,
            metadata: default_wells(),
        }
    }

    /// Metadata for a well. Every valid well is present on a complete plate.
    pub fn well(&self, well: WellId) -> Option<&WellMetadata> {
        self.metadata.get(&well)
    }

    /// Exactly the 96 canonical wells are present.
    pub fn is_complete(&self) -> bool {
        self.metadata.len() == WELL_COUNT
    }

    /// True when every well is default.
    pub fn is_empty(&self) -> bool {
        self.metadata.values().all(WellMetadata::is_empty)
    }
}

/// The canonical 96-entry map with default metadata.
pub fn default_wells() -> WellMap {
    WellId::all().map(|w| (w, WellMetadata::default())).collect()
}
