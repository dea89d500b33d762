//! The whole operation as one manual transaction:
//! snapshot, attempt, restore on failure.
//!
//! ```text
//! Loaded -> Located -> Bounded -> Planned -> Applied -> Verified
//!              \_________\__________\__________\______-> RolledBack
//! ```
//!
//! A failure before a backup exists, or a failed restore, ends in `Failed`.
//! Verification never triggers a rollback.

use crate::backup::{BackupError, BackupManager, BackupRecord};
use crate::config::{Recipe, ValidationError};
use crate::document::{AtomicWriter, DocumentError, DocumentWriter, SourceDocument};
use crate::edit::{AppliedEdit, EditError, InsertionOutcome};
use crate::locate::{BoundaryScanner, FunctionSpan, LocateError, PatternLocator, StructuralLocator};
use crate::plan::{build_plan, Anchors, InsertionPlanner};
use crate::verify::{VerificationReport, Verifier};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Loaded,
    Located,
    Bounded,
    Planned,
    Applied,
    Verified,
    RolledBack,
    Failed,
}

/// The step that was being attempted when a run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Load,
    Backup,
    Locate,
    Bound,
    Plan,
    Apply,
    Commit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Load => "load",
            Stage::Backup => "backup",
            Stage::Locate => "locate",
            Stage::Bound => "bound",
            Stage::Plan => "plan",
            Stage::Apply => "apply",
            Stage::Commit => "commit",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum PatchError {
    #[error("invalid recipe: {0}")]
    InvalidRecipe(#[from] ValidationError),

    #[error(transparent)]
    Load(#[from] DocumentError),

    #[error(transparent)]
    Locate(#[from] LocateError),

    #[error("backup failed: {0}")]
    BackupFailed(#[source] BackupError),

    #[error(transparent)]
    Edit(#[from] EditError),

    #[error("failed to write {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// What happened to the original file after a failure.
#[derive(Debug)]
pub enum Rollback {
    /// Failure happened before any backup existed; nothing was touched
    NoBackup,
    Restored(BackupRecord),
    RestoreFailed {
        record: BackupRecord,
        error: BackupError,
    },
}

#[derive(Debug)]
pub struct PatchFailure {
    pub stage: Stage,
    pub error: PatchError,
    pub rollback: Rollback,
}

impl PatchFailure {
    pub fn final_state(&self) -> State {
        match self.rollback {
            Rollback::Restored(_) => State::RolledBack,
            Rollback::NoBackup | Rollback::RestoreFailed { .. } => State::Failed,
        }
    }
}

impl fmt::Display for PatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} stage failed: {}", self.stage, self.error)?;
        match &self.rollback {
            Rollback::NoBackup => Ok(()),
            Rollback::Restored(record) => {
                write!(f, " (restored from {})", record.backup_path.display())
            }
            Rollback::RestoreFailed { record, error } => write!(
                f,
                " (restore from {} also failed: {})",
                record.backup_path.display(),
                error
            ),
        }
    }
}

impl std::error::Error for PatchFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Pure result of locating, bounding, planning and applying in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prepared {
    pub span: FunctionSpan,
    pub declaration_anchor: Option<usize>,
    pub anchors: Anchors,
    pub edit: AppliedEdit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchReport {
    pub path: PathBuf,
    pub backup: BackupRecord,
    pub insertions: Vec<InsertionOutcome>,
    /// Whether the file was rewritten
    pub changed: bool,
    pub verification: VerificationReport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "PatchOutcome distinguishes full from partial success"]
pub enum PatchOutcome {
    /// Every insertion applied or already present, and every marker verified
    Success(PatchReport),
    /// The write went through but at least one marker is missing
    PartialSuccess(PatchReport),
}

impl PatchOutcome {
    pub fn report(&self) -> &PatchReport {
        match self {
            PatchOutcome::Success(report) | PatchOutcome::PartialSuccess(report) => report,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PatchOutcome::Success(_))
    }
}

pub struct Patcher<W: DocumentWriter = AtomicWriter> {
    recipe: Recipe,
    locator: PatternLocator,
    scanner: BoundaryScanner,
    backups: BackupManager,
    writer: W,
}

impl Patcher<AtomicWriter> {
    /// Validate `recipe` and compile its patterns.
    ///
    /// A recipe whose insertion text does not contain its own marker is
    /// rejected, since a second run could not see the first.
    pub fn new(recipe: Recipe) -> Result<Self, PatchError> {
        recipe.validate()?;
        let locator = PatternLocator::new(&recipe)?;
        Ok(Self {
            recipe,
            locator,
            scanner: BoundaryScanner::default(),
            backups: BackupManager::default(),
            writer: AtomicWriter,
        })
    }
}

impl<W: DocumentWriter> Patcher<W> {
    pub fn with_writer<V: DocumentWriter>(self, writer: V) -> Patcher<V> {
        Patcher {
            recipe: self.recipe,
            locator: self.locator,
            scanner: self.scanner,
            backups: self.backups,
            writer,
        }
    }

    pub fn with_backups(mut self, backups: BackupManager) -> Self {
        self.backups = backups;
        self
    }

    pub fn recipe(&self) -> &Recipe {
        &self.recipe
    }

    /// Locate, bound, plan and apply against `doc` without touching disk.
    pub fn prepare(&self, doc: &SourceDocument) -> Result<Prepared, (Stage, PatchError)> {
        let text = doc.text();

        let start = self
            .locator
            .function_start(text)
            .map_err(|e| (Stage::Locate, PatchError::from(e)))?;
        let declaration_anchor = if self.recipe.declaration.is_some() {
            let anchor = self.locator.declaration_anchor(text);
            if anchor.is_none() {
                warn!("declaration anchor not found; skipping forward declaration");
            }
            anchor
        } else {
            None
        };
        info!(state = ?State::Located, start, "located function");

        let span = self
            .scanner
            .span(text, start)
            .map_err(|e| (Stage::Bound, PatchError::from(e)))?;
        info!(state = ?State::Bounded, start = span.start, end = span.end, "bounded function");

        let anchors = InsertionPlanner::new(&self.locator)
            .anchors(text, span)
            .map_err(|e| (Stage::Plan, PatchError::from(e)))?;
        let plan = build_plan(&self.recipe, span, declaration_anchor, anchors);
        info!(state = ?State::Planned, guard_form = anchors.guard_form, "planned insertions");

        let edit = plan.apply(text).map_err(|e| (Stage::Apply, PatchError::from(e)))?;
        info!(state = ?State::Applied, changed = edit.changed(), "applied plan in memory");

        Ok(Prepared {
            span,
            declaration_anchor,
            anchors,
            edit,
        })
    }

    /// Run the full transaction against the file at `path`.
    pub fn run(&self, path: &Path) -> Result<PatchOutcome, PatchFailure> {
        let doc = SourceDocument::load(path).map_err(|e| PatchFailure {
            stage: Stage::Load,
            error: e.into(),
            rollback: Rollback::NoBackup,
        })?;
        info!(state = ?State::Loaded, path = %path.display(), bytes = doc.text().len(), "loaded");

        let backup = self.backups.snapshot(path).map_err(|e| PatchFailure {
            stage: Stage::Backup,
            error: PatchError::BackupFailed(e),
            rollback: Rollback::NoBackup,
        })?;

        let (insertions, changed) = match self.attempt(doc) {
            Ok(done) => done,
            Err((stage, error)) => {
                warn!(%stage, %error, "patch failed");
                let rollback = match self.backups.restore(&backup) {
                    Ok(()) => Rollback::Restored(backup),
                    Err(error) => Rollback::RestoreFailed {
                        record: backup,
                        error,
                    },
                };
                return Err(PatchFailure {
                    stage,
                    error,
                    rollback,
                });
            }
        };

        let verification = Verifier::new(self.recipe.verify.clone()).verify_file(path);
        let report = PatchReport {
            path: path.to_path_buf(),
            backup,
            insertions,
            changed,
            verification,
        };

        if report.verification.all_present() {
            info!(state = ?State::Verified, "all markers present");
            Ok(PatchOutcome::Success(report))
        } else {
            warn!(
                missing = report.verification.missing().count(),
                "verification found missing markers"
            );
            Ok(PatchOutcome::PartialSuccess(report))
        }
    }

    fn attempt(
        &self,
        doc: SourceDocument,
    ) -> Result<(Vec<InsertionOutcome>, bool), (Stage, PatchError)> {
        let prepared = self.prepare(&doc)?;
        let AppliedEdit { text, outcomes } = prepared.edit;

        if text == doc.text() {
            info!("already patched; leaving file untouched");
            return Ok((outcomes, false));
        }

        let path = doc.path().to_path_buf();
        doc.commit(text, &self.writer).map_err(|source| {
            (
                Stage::Commit,
                PatchError::WriteFailed {
                    path: path.clone(),
                    source,
                },
            )
        })?;
        info!(path = %path.display(), "wrote patched file");

        Ok((outcomes, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const SOURCE: &str = "\
EXPORT_SYMBOL_NS(vfs_mkdir, ANDROID_GKI_VFS_EXPORT_ONLY);

int do_mkdirat(int dfd, struct filename *name, umode_t mode)
{
\tunsigned int lookup_flags = LOOKUP_DIRECTORY;
\tif (IS_ERR(dentry))
\t\tgoto out_putname;
out_putname:
\treturn 0;
}
";

    #[test]
    fn test_prepare_is_pure() {
        let patcher = Patcher::new(Recipe::mkdirat()).unwrap();
        let doc = SourceDocument::from_text("namei.c", SOURCE);
        let prepared = patcher.prepare(&doc).unwrap();
        assert!(prepared.edit.changed());
        assert_eq!(doc.text(), SOURCE);
        assert_eq!(prepared.edit.outcomes.len(), 3);
    }

    #[test]
    fn test_prepare_reports_stage() {
        let patcher = Patcher::new(Recipe::mkdirat()).unwrap();

        let doc = SourceDocument::from_text("namei.c", "int other(void) { }");
        let (stage, _) = patcher.prepare(&doc).unwrap_err();
        assert_eq!(stage, Stage::Locate);

        let unterminated = SOURCE.trim_end().trim_end_matches('}');
        let doc = SourceDocument::from_text("namei.c", unterminated);
        let (stage, error) = patcher.prepare(&doc).unwrap_err();
        assert_eq!(stage, Stage::Bound);
        assert!(matches!(
            error,
            PatchError::Locate(LocateError::UnterminatedFunction { .. })
        ));
    }

    #[test]
    fn test_recipe_marker_outside_text_is_rejected() {
        let mut recipe = Recipe::mkdirat();
        recipe.state_variable.marker = "fmac_state".to_string();

        let err = Patcher::new(recipe).err().unwrap();
        assert!(matches!(err, PatchError::InvalidRecipe(_)));
        assert!(err.to_string().contains("state_variable marker 'fmac_state'"));
    }

    #[test]
    fn test_recipe_with_bad_pattern_is_rejected() {
        let mut recipe = Recipe::mkdirat();
        recipe.function.signature = "int do_mkdirat(".to_string();
        assert!(matches!(
            Patcher::new(recipe),
            Err(PatchError::InvalidRecipe(_))
        ));
    }

    #[test]
    fn test_load_failure_has_no_backup() {
        let dir = tempfile::tempdir().unwrap();
        let patcher = Patcher::new(Recipe::mkdirat()).unwrap();
        let failure = patcher.run(&dir.path().join("absent.c")).unwrap_err();
        assert_eq!(failure.stage, Stage::Load);
        assert_eq!(failure.final_state(), State::Failed);
        assert!(!dir.path().join("absent.c.backup").exists());
    }

    #[test]
    fn test_unchanged_file_is_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("namei.c");
        fs::write(&path, SOURCE).unwrap();

        let patcher = Patcher::new(Recipe::mkdirat()).unwrap();
        let first = patcher.run(&path).unwrap();
        assert!(first.report().changed);

        let old = filetime::FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(&path, old).unwrap();

        let second = patcher.run(&path).unwrap();
        assert!(second.is_success());
        assert!(!second.report().changed);
        let meta = fs::metadata(&path).unwrap();
        assert_eq!(filetime::FileTime::from_last_modification_time(&meta), old);
    }

    #[test]
    fn test_failure_display_mentions_stage_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("namei.c");
        fs::write(&path, "int nothing_here;\n").unwrap();

        let failure = Patcher::new(Recipe::mkdirat())
            .unwrap()
            .run(&path)
            .unwrap_err();
        let message = failure.to_string();
        assert!(message.starts_with("locate stage failed: function signature not found"));
        assert!(message.contains("restored from"));
        assert_eq!(failure.final_state(), State::RolledBack);
    }
}
