//! Per-plate, per-field reports.
//!
//! A batch walks every (plate, field) pair. For each pair the session makes
//! the plate active and the field displayed, hands the view to a
//! [`RenderSurface`] for one rendering turn, then captures the artifact.

use crate::types::{COLUMNS, Field, Plate, ROW_LETTERS, WellId};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tera::{Context, Tera};
use thiserror::Error;
use tracing::warn;

const PLATE_TEMPLATE: &str = include_str!("templates/plate.html");

/// Fill colors for well values.
pub const PALETTE: [&str; 12] = [
    "#8dd3c7", "#ffffb3", "#bebada", "#fb8072", "#80b1d3", "#fdb462", "#b3de69", "#fccde5",
    "#d9d9d9", "#bc80bd", "#ccebc5", "#ffed6f",
];

/// Fill color for wells with no value.
pub const EMPTY_COLOR: &str = "#ffffff";

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Template error: {0}")]
    Template(#[from] tera::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stable color for a well value. Equal values always get the same color.
pub fn palette_color(value: &str) -> &'static str {
    if value.is_empty() {
        return EMPTY_COLOR;
    }
    let digest = Sha256::digest(value.as_bytes());
    PALETTE[digest[0] as usize % PALETTE.len()]
}

/// What a surface is asked to draw during one rendering turn.
#[derive(Debug, Clone, Copy)]
pub struct PlateView<'a> {
    pub plate: &'a Plate,
    pub field: Field,
}

/// A captured report for one (plate, field) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub plate: u32,
    pub field: Field,
    pub file_name: String,
    pub contents: String,
}

/// The rendering side of a report batch.
pub trait RenderSurface {
    /// Draw the view. Called once per (plate, field) pair.
    fn present(&mut self, view: &PlateView<'_>);

    /// Take whatever the last `present` produced, if anything.
    fn capture(&mut self) -> Option<Artifact>;
}

/// Result of a report batch.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub artifacts: Vec<Artifact>,
    /// Pairs for which the surface produced nothing.
    pub skipped: Vec<(u32, Field)>,
}

/// Write artifacts into `dir`, creating it if needed.
pub fn write_artifacts(dir: &Path, artifacts: &[Artifact]) -> Result<Vec<PathBuf>, RenderError> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        let path = dir.join(&artifact.file_name);
        fs::write(&path, &artifact.contents)?;
        written.push(path);
    }
    Ok(written)
}

#[derive(Debug, Serialize)]
struct TemplateCell {
    well: String,
    value: String,
    color: &'static str,
}

#[derive(Debug, Serialize)]
struct TemplateRow {
    letter: char,
    cells: Vec<TemplateCell>,
}

#[derive(Debug, Serialize)]
struct LegendEntry {
    value: String,
    color: &'static str,
    count: usize,
}

/// Renders each view as a standalone HTML page.
pub struct HtmlSurface {
    tera: Tera,
    title: String,
    pending: Option<Artifact>,
}

impl HtmlSurface {
    pub fn new(title: impl Into<String>) -> Result<Self, RenderError> {
        let mut tera = Tera::default();
        tera.add_raw_template("plate.html", PLATE_TEMPLATE)?;
        Ok(Self {
            tera,
            title: title.into(),
            pending: None,
        })
    }

    fn render(&self, view: &PlateView<'_>) -> Result<String, tera::Error> {
        let mut legend: BTreeMap<&str, usize> = BTreeMap::new();
        let rows: Vec<TemplateRow> = (0..ROW_LETTERS.len() as u8)
            .map(|row| TemplateRow {
                letter: ROW_LETTERS[row as usize],
                cells: (1..=COLUMNS)
                    .filter_map(|column| WellId::new(row, column))
                    .map(|well| {
                        let value = view.plate.well(well).map(|m| m.get(view.field)).unwrap_or("");
                        if !value.is_empty() {
                            *legend.entry(value).or_default() += 1;
                        }
                        TemplateCell {
                            well: well.to_string(),
                            value: value.to_string(),
                            color: palette_color(value),
                        }
                    })
                    .collect(),
            })
            .collect();

        let legend: Vec<LegendEntry> = legend
            .into_iter()
            .map(|(value, count)| LegendEntry {
                value: value.to_string(),
                color: palette_color(value),
                count,
            })
            .collect();

        let mut context = Context::new();
        context.insert("title", &self.title);
        context.insert("plate_id", &view.plate.id);
        context.insert("field", view.field.name());
        context.insert("columns", &(1..=COLUMNS).collect::<Vec<_>>());
        context.insert("rows", &rows);
        context.insert("legend", &legend);
        context.insert(
            "generated_at",
            &chrono::Utc::now().format("%Y-%m-%d %H:%M UTC").to_string(),
        );
        self.tera.render("plate.html", &context)
    }
}

impl RenderSurface for HtmlSurface {
    fn present(&mut self, view: &PlateView<'_>) {
        self.pending = match self.render(view) {
            Ok(contents) => Some(Artifact {
                plate: view.plate.id,
                field: view.field,
                file_name: format!("plate-{}-{}.html", view.plate.id, view.field),
                contents,
            }),
            Err(e) => {
                warn!(
                    plate = view.plate.id,
                    field = %view.field,
                    error = %e,
                    "failed to render plate"
                );
                None
            }
        };
    }

    fn capture(&mut self) -> Option<Artifact> {
        self.pending.take()
    }
}

/// Plain-text 8 x 12 grid of one field. Empty wells show as `.`.
pub fn render_text_grid(plate: &Plate, field: Field) -> String {
    let value = |well: WellId| {
        let v = plate.well(well).map(|m| m.get(field)).unwrap_or("");
        if v.is_empty() { "." } else { v }
    };
    let width = WellId::all()
        .map(|w| value(w).chars().count())
        .max()
        .unwrap_or(1)
        .clamp(2, 12);

    let mut out = format!("Plate {} [{}]\n ", plate.id, field);
    for column in 1..=COLUMNS {
        out.push_str(&format!(" {:>width$}", column, width = width));
    }
    out.push('\n');
    for (row, letter) in ROW_LETTERS.iter().enumerate() {
        out.push(*letter);
        for column in 1..=COLUMNS {
            let cell: String = WellId::new(row as u8, column)
                .map(value)
                .unwrap_or(".")
                .chars()
                .take(width)
                .collect();
            out.push_str(&format!(" {:>width$}", cell, width = width));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn well(s: &str) -> WellId {
        s.parse().unwrap()
    }

    #[test]
    fn test_palette_color_is_deterministic() {
        assert_eq!(palette_color("S1"), palette_color("S1"));
        assert_eq!(palette_color(""), EMPTY_COLOR);
        assert!(PALETTE.contains(&palette_color("anything")));
    }

    #[test]
    fn test_html_surface_renders_grid() {
        let mut plate = Plate::new(2);
        plate.metadata.get_mut(&well("B3")).unwrap().anchor = "Anc<1>".to_string();
        let mut surface = HtmlSurface::new("Screen").unwrap();
        surface.present(&PlateView {
            plate: &plate,
            field: Field::Anchor,
        });
        let artifact = surface.capture().unwrap();
        assert_eq!(artifact.file_name, "plate-2-anchor.html");
        assert!(artifact.contents.contains("<!DOCTYPE html>"));
        assert!(artifact.contents.contains("Plate 2"));
        assert!(artifact.contents.contains("Anc&lt;1&gt;"));
        assert!(artifact.contents.contains(palette_color("Anc<1>")));
        assert!(surface.capture().is_none());
    }

    #[test]
    fn test_text_grid_layout() {
        let mut plate = Plate::new(1);
        plate.metadata.get_mut(&well("A1")).unwrap().base_strain = "S1".to_string();
        let grid = render_text_grid(&plate, Field::BaseStrain);
        let lines: Vec<&str> = grid.lines().collect();
        assert_eq!(lines[0], "Plate 1 [base_strain]");
        assert_eq!(lines.len(), 10);
        assert!(lines[2].starts_with("A S1  ."));
        assert!(lines[9].starts_with('H'));
    }

    #[test]
    fn test_write_artifacts() {
        let dir = tempfile::TempDir::new().unwrap();
        let artifacts = vec![Artifact {
            plate: 1,
            field: Field::Notes,
            file_name: "plate-1-notes.html".to_string(),
            contents: "x".to_string(),
        }];
        let paths = write_artifacts(&dir.path().join("out"), &artifacts).unwrap();
        assert_eq!(fs::read_to_string(&paths[0]).unwrap(), "x");
    }
}
