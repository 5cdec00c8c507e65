//! In-memory editing session.
//!
//! A session owns the plate collection, remembers which plate is active,
//! which field is on display and which wells are selected, and holds the
//! most recently loaded reference table. Nothing is persisted; a session
//! only leaves data behind through `export`.

use crate::config::Config;
use crate::editor::{Selection, apply_bulk_update, clear_all_fields, parse_selection};
use crate::export::{ExportError, export_csv};
use crate::import::{ImportError, ImportOutcome, import_csv};
use crate::reference::{JoinReport, ReferenceError, ReferenceTable, resolve_all, resolve_strains};
use crate::report::{
    BatchReport, HtmlSurface, PlateView, RenderError, RenderSurface, render_text_grid,
    write_artifacts,
};
use crate::store::{PlateError, PlateStore};
use crate::types::{Field, Plate};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Plate(#[from] PlateError),
    #[error(transparent)]
    Import(#[from] ImportError),
    #[error(transparent)]
    Reference(#[from] ReferenceError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("Cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("No reference table loaded")]
    NoReference,
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    #[error("Usage: {0}")]
    Usage(String),
}

/// Which plates a join covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinScope {
    Current,
    All,
}

impl FromStr for JoinScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "current" => Ok(JoinScope::Current),
            "all" => Ok(JoinScope::All),
            _ => Err(format!("Invalid join scope: {}. Must be current or all", s)),
        }
    }
}

/// One line of a session script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    New,
    Import(PathBuf),
    Export(PathBuf),
    Reference(PathBuf),
    Add,
    Duplicate,
    Delete,
    /// Move the active plate to a zero-based position.
    Move(usize),
    /// Activate the plate at a zero-based position.
    Plate(usize),
    Field(Field),
    Select(Selection),
    Deselect,
    Set(Field, String),
    Clear,
    Join(JoinScope),
    Show,
    Render(PathBuf),
}

fn usage(text: &str) -> SessionError {
    SessionError::Usage(text.to_string())
}

/// Parse a one-based position into a zero-based index.
fn parse_position(s: &str, text: &str) -> Result<usize, SessionError> {
    match s.trim().parse::<usize>() {
        Ok(n) if n >= 1 => Ok(n - 1),
        _ => Err(usage(text)),
    }
}

fn parse_path(s: &str, text: &str) -> Result<PathBuf, SessionError> {
    let s = s.trim();
    if s.is_empty() {
        Err(usage(text))
    } else {
        Ok(PathBuf::from(s))
    }
}

impl FromStr for Command {
    type Err = SessionError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (verb, rest) = line
            .split_once(char::is_whitespace)
            .map(|(v, r)| (v, r.trim()))
            .unwrap_or((line, ""));

        let no_args = |cmd: Command| {
            if rest.is_empty() {
                Ok(cmd)
            } else {
                Err(SessionError::Usage(verb.to_string()))
            }
        };

        match verb.to_lowercase().as_str() {
            "new" => no_args(Command::New),
            "import" => Ok(Command::Import(parse_path(rest, "import <path>")?)),
            "export" => Ok(Command::Export(parse_path(rest, "export <path>")?)),
            "reference" => Ok(Command::Reference(parse_path(rest, "reference <path>")?)),
            "add" => no_args(Command::Add),
            "duplicate" => no_args(Command::Duplicate),
            "delete" => no_args(Command::Delete),
            "move" => Ok(Command::Move(parse_position(rest, "move <position>")?)),
            "plate" => Ok(Command::Plate(parse_position(rest, "plate <position>")?)),
            "field" => Ok(Command::Field(rest.parse::<Field>().map_err(SessionError::Usage)?)),
            "select" => {
                if rest.is_empty() {
                    return Err(usage("select <wells|ranges|all>"));
                }
                Ok(Command::Select(parse_selection(rest).map_err(SessionError::Usage)?))
            }
            "deselect" => no_args(Command::Deselect),
            "set" => {
                let (field, value) = rest
                    .split_once(char::is_whitespace)
                    .unwrap_or((rest, ""));
                if field.is_empty() {
                    return Err(usage("set <field> [value]"));
                }
                let field = field.parse::<Field>().map_err(SessionError::Usage)?;
                Ok(Command::Set(field, value.trim().to_string()))
            }
            "clear" => no_args(Command::Clear),
            "join" => {
                let scope = if rest.is_empty() {
                    JoinScope::Current
                } else {
                    rest.parse::<JoinScope>().map_err(SessionError::Usage)?
                };
                Ok(Command::Join(scope))
            }
            "show" => no_args(Command::Show),
            "render" => Ok(Command::Render(parse_path(rest, "render <dir>")?)),
            _ => Err(SessionError::UnknownCommand(verb.to_string())),
        }
    }
}

/// Outcome of one script line.
#[derive(Debug, Clone, Serialize)]
pub struct ScriptLine {
    pub line: usize,
    pub command: String,
    pub ok: bool,
    pub message: String,
}

/// Outcome of a whole script.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScriptReport {
    pub lines: Vec<ScriptLine>,
    /// True when a strict run stopped at a failing line.
    pub aborted: bool,
}

impl ScriptReport {
    pub fn failures(&self) -> usize {
        self.lines.iter().filter(|l| !l.ok).count()
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    store: PlateStore,
    active: usize,
    field: Field,
    selection: Selection,
    reference: Option<ReferenceTable>,
    base_dir: PathBuf,
    config: Config,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// A session with one default plate.
    pub fn new() -> Self {
        Self {
            store: PlateStore::new(),
            active: 0,
            field: Field::BaseStrain,
            selection: Selection::new(),
            reference: None,
            base_dir: PathBuf::from("."),
            config: Config::default(),
        }
    }

    /// Resolve relative paths in commands against `dir`.
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &PlateStore {
        &self.store
    }

    pub fn plates(&self) -> &[Plate] {
        self.store.all()
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn active_plate(&self) -> &Plate {
        &self.store.all()[self.active]
    }

    pub fn display_field(&self) -> Field {
        self.field
    }

    pub fn set_display_field(&mut self, field: Field) {
        self.field = field;
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn select(&mut self, wells: Selection) {
        self.selection.extend(wells);
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    pub fn reference(&self) -> Option<&ReferenceTable> {
        self.reference.as_ref()
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_relative() {
            self.base_dir.join(path)
        } else {
            path.to_path_buf()
        }
    }

    fn set_active(&mut self, index: usize) {
        if index != self.active {
            self.selection.clear();
        }
        self.active = index;
    }

    /// Drop all plates and start again with one default plate.
    pub fn reset(&mut self) {
        self.store = PlateStore::new();
        self.active = 0;
        self.selection.clear();
    }

    pub fn activate(&mut self, index: usize) -> Result<(), SessionError> {
        self.store.get(index)?;
        self.set_active(index);
        Ok(())
    }

    pub fn add_plate(&mut self) -> Result<usize, SessionError> {
        let index = self.store.add_after(self.active)?;
        self.set_active(index);
        Ok(index)
    }

    pub fn duplicate_plate(&mut self) -> Result<usize, SessionError> {
        let index = self.store.duplicate_after(self.active)?;
        self.set_active(index);
        Ok(index)
    }

    pub fn delete_plate(&mut self) -> Result<usize, SessionError> {
        let index = self.store.delete_at(self.active)?;
        self.selection.clear();
        self.active = index;
        Ok(index)
    }

    pub fn move_plate(&mut self, to: usize) -> Result<usize, SessionError> {
        let index = self.store.move_to(self.active, to)?;
        self.active = index;
        Ok(index)
    }

    /// Write `value` into `field` of every selected well of the active plate,
    /// then clear the selection.
    pub fn bulk_update(&mut self, field: Field, value: &str) -> Result<usize, SessionError> {
        if self.selection.is_empty() {
            return Ok(0);
        }
        let mut plate = self.active_plate().clone();
        let written = apply_bulk_update(&mut plate, &self.selection, field, value);
        self.store.replace(self.active, plate)?;
        self.selection.clear();
        Ok(written)
    }

    /// Reset every well of the active plate.
    pub fn clear_plate(&mut self) -> Result<(), SessionError> {
        let mut plate = self.active_plate().clone();
        clear_all_fields(&mut plate);
        self.store.replace(self.active, plate)?;
        Ok(())
    }

    /// Parse CSV text and, if it yields plates, replace the collection.
    pub fn import_text(&mut self, text: &str) -> Result<ImportOutcome, SessionError> {
        let outcome = import_csv(text)?;
        self.store.replace_all(outcome.plates.clone())?;
        self.active = 0;
        self.selection.clear();
        Ok(outcome)
    }

    pub fn import_file(&mut self, path: &Path) -> Result<ImportOutcome, SessionError> {
        let text = self.read(path)?;
        self.import_text(&text)
    }

    /// Replace the reference table. On failure the previous table is kept.
    pub fn load_reference_text(&mut self, text: &str) -> Result<&ReferenceTable, SessionError> {
        let table = ReferenceTable::from_csv(text)?;
        Ok(self.reference.insert(table))
    }

    pub fn load_reference_file(&mut self, path: &Path) -> Result<&ReferenceTable, SessionError> {
        let text = self.read(path)?;
        self.load_reference_text(&text)
    }

    /// Backfill construct fields from the reference table.
    pub fn join(&mut self, scope: JoinScope) -> Result<JoinReport, SessionError> {
        let table = self.reference.as_ref().ok_or(SessionError::NoReference)?;
        let report = match scope {
            JoinScope::Current => {
                let mut plate = self.store.get(self.active)?.clone();
                let report = resolve_strains(&mut plate, table);
                self.store.replace(self.active, plate)?;
                report
            }
            JoinScope::All => {
                let mut plates = self.store.all().to_vec();
                let report = resolve_all(&mut plates, table);
                self.store.replace_all(plates)?;
                report
            }
        };
        info!(
            updated = report.updated,
            unmatched = report.unmatched.len(),
            "joined reference table"
        );
        Ok(report)
    }

    pub fn export_text(&self) -> Result<String, SessionError> {
        Ok(export_csv(self.store.all())?)
    }

    pub fn export_file(&self, path: &Path) -> Result<PathBuf, SessionError> {
        let path = self.resolve(path);
        let text = self.export_text()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| SessionError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&path, text).map_err(|source| SessionError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// Produce one artifact per (plate, field) pair.
    ///
    /// For each pair the plate becomes active and the field displayed, the
    /// surface gets one rendering turn, and its capture is collected. A pair
    /// the surface produces nothing for is skipped. The active plate and
    /// displayed field are restored afterwards. Holding `&mut self` keeps a
    /// second batch from starting while one is running.
    pub fn render_batch(
        &mut self,
        surface: &mut dyn RenderSurface,
        fields: &[Field],
    ) -> BatchReport {
        let (saved_active, saved_field) = (self.active, self.field);
        let mut report = BatchReport::default();

        for index in 0..self.store.len() {
            for &field in fields {
                self.active = index;
                self.field = field;
                let plate = &self.store.all()[index];
                surface.present(&PlateView { plate, field });
                match surface.capture() {
                    Some(artifact) => report.artifacts.push(artifact),
                    None => {
                        warn!(plate = plate.id, %field, "no artifact captured, skipping");
                        report.skipped.push((plate.id, field));
                    }
                }
            }
        }

        self.active = saved_active;
        self.field = saved_field;
        report
    }

    /// Render HTML reports for the configured fields into `dir`.
    pub fn render_to_dir(
        &mut self,
        dir: &Path,
    ) -> Result<(BatchReport, Vec<PathBuf>), SessionError> {
        let dir = self.resolve(dir);
        let mut surface = HtmlSurface::new(self.config.title.clone())?;
        let fields = self.config.report_fields.clone();
        let report = self.render_batch(&mut surface, &fields);
        let written = write_artifacts(&dir, &report.artifacts)?;
        Ok((report, written))
    }

    fn read(&self, path: &Path) -> Result<String, SessionError> {
        let path = self.resolve(path);
        fs::read_to_string(&path).map_err(|source| SessionError::Io { path, source })
    }

    /// Execute one command and describe what happened.
    pub fn apply(&mut self, command: Command) -> Result<String, SessionError> {
        let message = match command {
            Command::New => {
                self.reset();
                "Started a new collection with 1 plate".to_string()
            }
            Command::Import(path) => {
                let outcome = self.import_file(&path)?;
                format!(
                    "Imported {} plate(s) from {} ({} format, {} row(s) skipped)",
                    outcome.plates.len(),
                    path.display(),
                    outcome.format,
                    outcome.skipped_rows
                )
            }
            Command::Export(path) => {
                let written = self.export_file(&path)?;
                format!("Exported {} plate(s) to {}", self.store.len(), written.display())
            }
            Command::Reference(path) => {
                let table = self.load_reference_file(&path)?;
                format!("Loaded {} reference row(s)", table.rows.len())
            }
            Command::Add => {
                let index = self.add_plate()?;
                format!("Added plate {} ({} plates)", index + 1, self.store.len())
            }
            Command::Duplicate => {
                let index = self.duplicate_plate()?;
                format!("Duplicated into plate {} ({} plates)", index + 1, self.store.len())
            }
            Command::Delete => {
                let index = self.delete_plate()?;
                format!(
                    "Deleted plate; plate {} is active ({} plates)",
                    index + 1,
                    self.store.len()
                )
            }
            Command::Move(to) => {
                let index = self.move_plate(to)?;
                format!("Moved plate to position {}", index + 1)
            }
            Command::Plate(index) => {
                self.activate(index)?;
                format!("Plate {} is active", index + 1)
            }
            Command::Field(field) => {
                self.set_display_field(field);
                format!("Displaying {}", field)
            }
            Command::Select(wells) => {
                self.select(wells);
                format!("{} well(s) selected", self.selection.len())
            }
            Command::Deselect => {
                self.clear_selection();
                "Selection cleared".to_string()
            }
            Command::Set(field, value) => {
                let written = self.bulk_update(field, &value)?;
                format!("Set {} on {} well(s)", field, written)
            }
            Command::Clear => {
                self.clear_plate()?;
                format!("Cleared all fields of plate {}", self.active + 1)
            }
            Command::Join(scope) => {
                let report = self.join(scope)?;
                format!(
                    "Joined {} well(s), {} unmatched, {} without strain",
                    report.updated,
                    report.unmatched.len(),
                    report.skipped_empty
                )
            }
            Command::Show => render_text_grid(self.active_plate(), self.field),
            Command::Render(dir) => {
                let (report, written) = self.render_to_dir(&dir)?;
                format!(
                    "Rendered {} report(s), {} skipped",
                    written.len(),
                    report.skipped.len()
                )
            }
        };
        Ok(message)
    }

    /// Run a script: one command per line, blank lines and `#` comments
    /// ignored. Failing lines are reported; with `strict` the run stops at
    /// the first failure.
    pub fn run_script(&mut self, script: &str, strict: bool) -> ScriptReport {
        let mut report = ScriptReport::default();
        for (i, raw) in script.lines().enumerate() {
            let text = raw.trim();
            if text.is_empty() || text.starts_with('#') {
                continue;
            }
            let result = text.parse::<Command>().and_then(|cmd| self.apply(cmd));
            let ok = result.is_ok();
            let message = match result {
                Ok(message) => message,
                Err(e) => {
                    warn!(line = i + 1, command = text, error = %e, "command failed");
                    e.to_string()
                }
            };
            report.lines.push(ScriptLine {
                line: i + 1,
                command: text.to_string(),
                ok,
                message,
            });
            if !ok && strict {
                report.aborted = true;
                break;
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Artifact;
    use crate::types::WellId;
    use tempfile::TempDir;

    fn well(s: &str) -> WellId {
        s.parse().unwrap()
    }

    const REFERENCE: &str =
        "Strain list\nStrain_Name,Construct_1,Construct_2,Construct_3\nS1,N,A,R\n";

    #[test]
    fn test_parse_commands() {
        assert_eq!("add".parse::<Command>().unwrap(), Command::Add);
        assert_eq!("move 3".parse::<Command>().unwrap(), Command::Move(2));
        assert_eq!(
            "set notes  hello world ".parse::<Command>().unwrap(),
            Command::Set(Field::Notes, "hello world".to_string())
        );
        assert_eq!(
            "set notes".parse::<Command>().unwrap(),
            Command::Set(Field::Notes, String::new())
        );
        assert_eq!(
            "join all".parse::<Command>().unwrap(),
            Command::Join(JoinScope::All)
        );
        assert_eq!(
            "join".parse::<Command>().unwrap(),
            Command::Join(JoinScope::Current)
        );
        assert!(matches!(
            "frobnicate".parse::<Command>(),
            Err(SessionError::UnknownCommand(_))
        ));
        assert!(matches!("move 0".parse::<Command>(), Err(SessionError::Usage(_))));
        assert!(matches!("add 2".parse::<Command>(), Err(SessionError::Usage(_))));
        assert!(matches!("select".parse::<Command>(), Err(SessionError::Usage(_))));
    }

    #[test]
    fn test_structural_ops_track_active_plate() {
        let mut session = Session::new();
        assert_eq!(session.add_plate().unwrap(), 1);
        assert_eq!(session.duplicate_plate().unwrap(), 2);
        assert_eq!(session.store().len(), 3);
        assert_eq!(session.move_plate(0).unwrap(), 0);
        assert_eq!(session.delete_plate().unwrap(), 0);
        let ids: Vec<u32> = session.plates().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_bulk_update_clears_selection() {
        let mut session = Session::new();
        session.select(parse_selection("A1:A3").unwrap());
        assert_eq!(session.bulk_update(Field::Nanobody, "Nb7").unwrap(), 3);
        assert!(session.selection().is_empty());
        assert_eq!(session.active_plate().metadata[&well("A3")].nanobody, "Nb7");
        assert_eq!(session.active_plate().metadata[&well("A4")].nanobody, "");
        assert_eq!(session.bulk_update(Field::Nanobody, "x").unwrap(), 0);
    }

    #[test]
    fn test_switching_plate_clears_selection() {
        let mut session = Session::new();
        session.select(parse_selection("B2").unwrap());
        session.add_plate().unwrap();
        assert!(session.selection().is_empty());
    }

    #[test]
    fn test_failed_import_keeps_collection() {
        let mut session = Session::new();
        session.add_plate().unwrap();
        let before = session.store().clone();
        assert!(session.import_text("nothing,useful\n").is_err());
        assert!(session.import_text("from_block,well,base_strain\n1,A1,\n").is_err());
        assert_eq!(session.store(), &before);
        assert_eq!(session.active_index(), 1);
    }

    #[test]
    fn test_import_resets_active_index() {
        let mut session = Session::new();
        session.add_plate().unwrap();
        session
            .import_text("from_block,well,base_strain\n4,A1,S\n")
            .unwrap();
        assert_eq!(session.active_index(), 0);
        assert_eq!(session.active_plate().id, 4);
    }

    #[test]
    fn test_failed_reference_load_keeps_previous_table() {
        let mut session = Session::new();
        session.load_reference_text(REFERENCE).unwrap();
        assert!(session.load_reference_text("only title\n").is_err());
        assert_eq!(session.reference().unwrap().rows.len(), 1);
    }

    #[test]
    fn test_join_without_reference() {
        let mut session = Session::new();
        assert!(matches!(
            session.join(JoinScope::All),
            Err(SessionError::NoReference)
        ));
    }

    #[test]
    fn test_join_current_only_touches_active_plate() {
        let mut session = Session::new();
        session.select(parse_selection("A1").unwrap());
        session.bulk_update(Field::BaseStrain, "S1").unwrap();
        session.duplicate_plate().unwrap();
        session.load_reference_text(REFERENCE).unwrap();

        let report = session.join(JoinScope::Current).unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(session.plates()[1].metadata[&well("A1")].negsel, "N");
        assert_eq!(session.plates()[0].metadata[&well("A1")].negsel, "");

        session.join(JoinScope::All).unwrap();
        assert_eq!(session.plates()[0].metadata[&well("A1")].receptor, "R");
    }

    struct FlakySurface {
        presented: Vec<(u32, Field)>,
        pending: Option<Artifact>,
    }

    impl RenderSurface for FlakySurface {
        fn present(&mut self, view: &PlateView<'_>) {
            self.presented.push((view.plate.id, view.field));
            self.pending = (view.field != Field::Notes).then(|| Artifact {
                plate: view.plate.id,
                field: view.field,
                file_name: format!("{}-{}", view.plate.id, view.field),
                contents: String::new(),
            });
        }

        fn capture(&mut self) -> Option<Artifact> {
            self.pending.take()
        }
    }

    #[test]
    fn test_render_batch_order_and_skips() {
        let mut session = Session::new();
        session.add_plate().unwrap();
        session.set_display_field(Field::Dilution);
        session.activate(0).unwrap();

        let mut surface = FlakySurface {
            presented: Vec::new(),
            pending: None,
        };
        let report = session.render_batch(&mut surface, &[Field::BaseStrain, Field::Notes]);
        assert_eq!(
            surface.presented,
            vec![
                (1, Field::BaseStrain),
                (1, Field::Notes),
                (2, Field::BaseStrain),
                (2, Field::Notes)
            ]
        );
        assert_eq!(report.artifacts.len(), 2);
        assert_eq!(report.skipped, vec![(1, Field::Notes), (2, Field::Notes)]);
        assert_eq!(session.active_index(), 0);
        assert_eq!(session.display_field(), Field::Dilution);
    }

    #[test]
    fn test_run_script_end_to_end() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("ref.csv"), REFERENCE).unwrap();
        let script = "\
# build two plates
select A1 B2
set base_strain S1
duplicate
delete
delete
join
export out/plates.csv
";
        let mut session = Session::new().with_base_dir(dir.path());
        session.load_reference_file(Path::new("ref.csv")).unwrap();
        let report = session.run_script(script, false);
        assert_eq!(report.failures(), 1);
        assert!(!report.lines[4].ok);
        assert!(report.lines[4].message.contains("only plate"));
        assert!(!report.aborted);

        let exported = fs::read_to_string(dir.path().join("out/plates.csv")).unwrap();
        assert!(exported.contains("1,A1,S1,R,A,,N,,"));
        assert!(exported.contains("1,B2,S1,R,A,,N,,"));
    }

    #[test]
    fn test_run_script_strict_stops() {
        let mut session = Session::new();
        let report = session.run_script("delete\nadd\n", true);
        assert!(report.aborted);
        assert_eq!(report.lines.len(), 1);
        assert_eq!(session.store().len(), 1);
    }
}
