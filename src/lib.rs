//! Platemeta - metadata engine for 96-well sample plates.
//!
//! This library models an ordered collection of plates, each carrying seven
//! metadata fields per well, and provides the structural and bulk edits,
//! the two-format CSV import, the canonical CSV export, and the reference
//! table join used to backfill construct fields from a strain list.

pub mod config;
pub mod editor;
pub mod export;
pub mod import;
pub mod lint;
pub mod reference;
pub mod report;
pub mod session;
pub mod store;
pub mod types;

pub use config::{Config, load_config};
pub use editor::{Selection, apply_bulk_update, clear_all_fields, parse_selection};
pub use export::{EXPORT_HEADER, ExportError, export_csv};
pub use import::{CsvFormat, ImportError, ImportOutcome, detect_format, import_csv, read_grid};
pub use lint::{LintReport, LintSeverity, lint_plates};
pub use reference::{
    JoinReport, ReferenceError, ReferenceRow, ReferenceTable, resolve_all, resolve_strains,
};
pub use report::{Artifact, BatchReport, HtmlSurface, PlateView, RenderSurface, palette_color};
pub use session::{Command, JoinScope, ScriptReport, Session, SessionError};
pub use store::{PlateError, PlateStore};
pub use types::{Field, Plate, WellId, WellMetadata};
