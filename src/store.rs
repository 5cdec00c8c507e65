//! Ordered plate collection and its structural operations.
//!
//! Every structural operation (add, duplicate, delete, move) renumbers plate
//! ids to `1..=len` in sequence order as its last step.

use crate::types::Plate;
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlateError {
    #[error("{0}")]
    InvalidOperation(String),
    #[error("Plate index {index} out of range (collection has {len} plates)")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("Plate {id} has {wells} wells, expected 96")]
    IncompletePlate { id: u32, wells: usize },
    #[error("Plate id {0} appears more than once")]
    DuplicateId(u32),
}

/// Owns the ordered plates. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlateStore {
    plates: Vec<Plate>,
}

impl Default for PlateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PlateStore {
    /// A store holding one default plate with id 1.
    pub fn new() -> Self {
        Self {
            plates: vec![Plate::new(1)],
        }
    }

    /// Build a store from existing plates, keeping their ids.
    pub fn from_plates(plates: Vec<Plate>) -> Result<Self, PlateError> {
        let mut store = Self::new();
        store.replace_all(plates)?;
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.plates.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.plates.is_empty()
    }

    pub fn all(&self) -> &[Plate] {
        &self.plates
    }

    pub fn get(&self, index: usize) -> Result<&Plate, PlateError> {
        self.plates.get(index).ok_or(PlateError::IndexOutOfRange {
            index,
            len: self.plates.len(),
        })
    }

    /// Replace the plate at `index` with a complete plate.
    pub fn replace(&mut self, index: usize, plate: Plate) -> Result<(), PlateError> {
        self.check_index(index)?;
        check_complete(&plate)?;
        self.plates[index] = plate;
        Ok(())
    }

    /// Replace the whole collection. Rejected if `plates` is empty, any
    /// plate is incomplete, or two plates share an id; the current
    /// collection is then left untouched.
    pub fn replace_all(&mut self, plates: Vec<Plate>) -> Result<(), PlateError> {
        if plates.is_empty() {
            return Err(PlateError::InvalidOperation(
                "Cannot replace the collection with zero plates".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for plate in &plates {
            check_complete(plate)?;
            if !seen.insert(plate.id) {
                warn!(plate = plate.id, "refused collection with repeated plate id");
                return Err(PlateError::DuplicateId(plate.id));
            }
        }
        self.plates = plates;
        Ok(())
    }

    /// Insert a default plate after `index`. Returns the new active index.
    pub fn add_after(&mut self, index: usize) -> Result<usize, PlateError> {
        self.check_index(index)?;
        self.plates.insert(index + 1, Plate::new(0));
        self.renumber();
        debug!(index = index + 1, "added plate");
        Ok(index + 1)
    }

    /// Insert an independent copy of the plate at `index` right after it.
    /// Returns the new active index.
    pub fn duplicate_after(&mut self, index: usize) -> Result<usize, PlateError> {
        let copy = self.get(index)?.clone();
        self.plates.insert(index + 1, copy);
        self.renumber();
        debug!(source = index, index = index + 1, "duplicated plate");
        Ok(index + 1)
    }

    /// Remove the plate at `index`. The last remaining plate cannot be
    /// deleted. Returns the new active index.
    pub fn delete_at(&mut self, index: usize) -> Result<usize, PlateError> {
        if self.plates.len() == 1 {
            warn!("refused to delete the only plate");
            return Err(PlateError::InvalidOperation(
                "Cannot delete the only plate".to_string(),
            ));
        }
        self.check_index(index)?;
        self.plates.remove(index);
        self.renumber();
        debug!(index, "deleted plate");
        Ok(index.saturating_sub(1))
    }

    /// Move the plate at `from` to position `to`, shifting the others.
    /// Returns the new active index.
    pub fn move_to(&mut self, from: usize, to: usize) -> Result<usize, PlateError> {
        let len = self.plates.len();
        if len == 1 {
            warn!("refused to move the only plate");
            return Err(PlateError::InvalidOperation(
                "Cannot move the only plate".to_string(),
            ));
        }
        if to >= len || from >= len {
            warn!(from, to, len, "refused out-of-range move");
            return Err(PlateError::InvalidOperation(format!(
                "Cannot move plate {} to position {}; positions run from 1 to {}",
                from + 1,
                to + 1,
                len
            )));
        }
        let plate = self.plates.remove(from);
        self.plates.insert(to, plate);
        self.renumber();
        debug!(from, to, "moved plate");
        Ok(to)
    }

    fn renumber(&mut self) {
        for (i, plate) in self.plates.iter_mut().enumerate() {
            plate.id = (i + 1) as u32;
        }
    }

    fn check_index(&self, index: usize) -> Result<(), PlateError> {
        if index < self.plates.len() {
            Ok(())
        } else {
            Err(PlateError::IndexOutOfRange {
                index,
                len: self.plates.len(),
            })
        }
    }
}

fn check_complete(plate: &Plate) -> Result<(), PlateError> {
    if plate.is_complete() {
        Ok(())
    } else {
        Err(PlateError::IncompletePlate {
            id: plate.id,
            wells: plate.metadata.len(),
        })
    }
}
