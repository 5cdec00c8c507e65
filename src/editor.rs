//! Field-level edits on a single plate.

use crate::types::{Field, Plate, WellId, WellMetadata};
use std::collections::BTreeSet;

/// Set of selected wells on the active plate.
pub type Selection = BTreeSet<WellId>;

/// Set `field` to `value` on every selected well, leaving other fields alone.
/// An empty selection is a no-op. Returns the number of wells written.
pub fn apply_bulk_update(
    plate: &mut Plate,
    selection: &Selection,
    field: Field,
    value: &str,
) -> usize {
    let mut written = 0;
    for well in selection {
        if let Some(meta) = plate.metadata.get_mut(well) {
            meta.set(field, value);
            written += 1;
        }
    }
    written
}

/// Reset every well of the plate to default metadata.
///
/// This clears all seven fields of every well, not only the field currently
/// on display.
pub fn clear_all_fields(plate: &mut Plate) {
    for meta in plate.metadata.values_mut() {
        *meta = WellMetadata::default();
    }
}

/// Parse a whitespace or comma separated selection.
///
/// Accepts single wells (`B4`), rectangles given by two opposite corners in
/// any order (`A1:C4`), and `all`.
pub fn parse_selection(input: &str) -> Result<Selection, String> {
    let mut selection = Selection::new();
    for token in input
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
    {
        if token.eq_ignore_ascii_case("all") {
            selection.extend(WellId::all());
        } else if let Some((start, end)) = token.split_once(':') {
            let start: WellId = start.parse()?;
            let end: WellId = end.parse()?;
            selection.extend(rectangle(start, end));
        } else {
            selection.insert(token.parse()?);
        }
    }
    Ok(selection)
}

/// Wells inside the rectangle spanned by two corners.
pub fn rectangle(a: WellId, b: WellId) -> impl Iterator<Item = WellId> {
    let rows = a.row().min(b.row())..=a.row().max(b.row());
    let columns = a.column().min(b.column())..=a.column().max(b.column());
    WellId::all().filter(move |w| rows.contains(&w.row()) && columns.contains(&w.column()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn well(s: &str) -> WellId {
        s.parse().unwrap()
    }

    fn filled_plate() -> Plate {
        let mut plate = Plate::new(1);
        for meta in plate.metadata.values_mut() {
            for field in Field::ALL {
                meta.set(field, format!("{}-x", field));
            }
        }
        plate
    }

    #[test]
    fn test_bulk_update_empty_selection_is_noop() {
        let mut plate = filled_plate();
        let before = plate.clone();
        let written = apply_bulk_update(&mut plate, &Selection::new(), Field::Anchor, "new");
        assert_eq!(written, 0);
        assert_eq!(plate, before);
    }

    #[test]
    fn test_bulk_update_touches_only_target_field_and_wells() {
        let mut plate = filled_plate();
        let before = plate.clone();
        let selection: Selection = [well("A1"), well("H12")].into_iter().collect();
        let written = apply_bulk_update(&mut plate, &selection, Field::Dilution, "1:100");
        assert_eq!(written, 2);

        for (id, meta) in &plate.metadata {
            let old = &before.metadata[id];
            for field in Field::ALL {
                if selection.contains(id) && field == Field::Dilution {
                    assert_eq!(meta.get(field), "1:100");
                } else {
                    assert_eq!(meta.get(field), old.get(field), "{} {}", id, field);
                }
            }
        }
    }

    #[test]
    fn test_bulk_update_can_write_empty_value() {
        let mut plate = filled_plate();
        let selection: Selection = [well("B2")].into_iter().collect();
        apply_bulk_update(&mut plate, &selection, Field::Notes, "");
        assert_eq!(plate.metadata[&well("B2")].notes, "");
        assert_eq!(plate.metadata[&well("B2")].anchor, "anchor-x");
    }

    #[test]
    fn test_clear_all_fields_resets_whole_record() {
        let mut plate = filled_plate();
        clear_all_fields(&mut plate);
        assert!(plate.is_empty());
        assert!(plate.is_complete());
        assert_eq!(plate.id, 1);
    }

    #[test]
    fn test_clear_all_fields_idempotent() {
        let mut once = filled_plate();
        clear_all_fields(&mut once);
        let mut twice = once.clone();
        clear_all_fields(&mut twice);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_parse_selection_tokens_and_ranges() {
        let selection = parse_selection("A1, C3:B2 H12").unwrap();
        let names: Vec<String> = selection.iter().map(|w| w.to_string()).collect();
        assert_eq!(names, vec!["A1", "B2", "B3", "C2", "C3", "H12"]);
    }

    #[test]
    fn test_parse_selection_all() {
        assert_eq!(parse_selection("all").unwrap().len(), 96);
    }

    #[test]
    fn test_parse_selection_rejects_bad_well() {
        assert!(parse_selection("A1 Z9").is_err());
        assert!(parse_selection("A1:Q2").is_err());
    }
}
