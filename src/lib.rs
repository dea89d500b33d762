//! FMAC Patcher: idempotent insertion of the FMAC mkdirat check into a
//! kernel source file.
//!
//! Locates `do_mkdirat` in `fs/namei.c` by signature, bounds its body by
//! balanced braces, and inserts a state variable and a call to
//! `fmac_check_mkdirat` (plus a top-level forward declaration) without
//! touching anything else in the file.
//!
//! # Architecture
//!
//! Every step up to the write is a pure function of the original text:
//! [`PatternLocator`] finds the function and anchors, [`BoundaryScanner`]
//! bounds the body, [`InsertionPlanner`] computes insertion offsets, and
//! [`EditPlan::apply`] resolves offset drift and produces the new text.
//! Only [`Patcher::run`] touches disk, as a single transaction.
//!
//! # Safety
//!
//! - A byte-identical backup is taken before any write; no backup, no write
//! - Any failure after the backup restores the original byte-for-byte
//! - Atomic file writes (tempfile + fsync + rename)
//! - Idempotent: re-running on a patched file produces identical output
//!
//! # Example
//!
//! ```no_run
//! use fmac_patcher::{Patcher, PatchOutcome, Recipe};
//! use std::path::Path;
//!
//! let patcher = Patcher::new(Recipe::mkdirat()).expect("built-in recipe is valid");
//!
//! match patcher.run(Path::new("linux/fs/namei.c")) {
//!     Ok(PatchOutcome::Success(report)) => println!("patched: {:?}", report.insertions),
//!     Ok(PatchOutcome::PartialSuccess(report)) => {
//!         eprintln!("missing markers: {:?}", report.verification.missing().collect::<Vec<_>>())
//!     }
//!     Err(failure) => eprintln!("{failure}"),
//! }
//! ```

pub mod backup;
pub mod config;
pub mod document;
pub mod edit;
pub mod locate;
pub mod patcher;
pub mod plan;
pub mod verify;

// Re-exports
pub use backup::{BackupError, BackupManager, BackupRecord};
pub use config::{load_from_path, load_from_str, ConfigError, Recipe, VerifyMarker};
pub use document::{atomic_write, AtomicWriter, DocumentError, DocumentWriter, SourceDocument};
pub use edit::{
    AppliedEdit, EditError, EditPlan, Insertion, InsertionKind, InsertionOutcome, MarkerScope,
};
pub use locate::{
    BoundaryScanner, FunctionSpan, LocateError, PatternLocator, StructuralLocator, Target,
};
pub use patcher::{
    PatchError, PatchFailure, PatchOutcome, PatchReport, Patcher, Prepared, Rollback, Stage,
    State,
};
pub use plan::{build_plan, Anchors, InsertionPlanner};
pub use verify::{MarkerStatus, VerificationReport, Verifier};
