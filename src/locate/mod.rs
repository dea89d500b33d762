//! Structural location over raw text.
//!
//! Nothing here parses the host language. Targets are found by pattern
//! matching ([`PatternLocator`]) and function bodies are bounded by balanced
//! delimiter counting ([`BoundaryScanner`]). The planner only talks to the
//! [`StructuralLocator`] trait, so the matching strategy can change without
//! touching planning or application.

pub mod boundary;
pub mod errors;
pub mod pattern;

pub use boundary::{BoundaryScanner, FunctionSpan};
pub use errors::LocateError;
pub use pattern::PatternLocator;

use std::fmt;
use std::ops::Range;

/// Something the locator knows how to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// Declaration signature of the function being patched, up to its body opener
    Function,
    /// Top-level statement after which the forward declaration goes
    DeclarationAnchor,
    /// Local variable declaration inside the function body
    StateVariable,
    /// Conditional error check inside the function body; `0` is the primary form
    Guard(usize),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Function => write!(f, "function signature"),
            Target::DeclarationAnchor => write!(f, "declaration anchor"),
            Target::StateVariable => write!(f, "state variable declaration"),
            Target::Guard(0) => write!(f, "primary guard"),
            Target::Guard(n) => write!(f, "alternate guard #{n}"),
        }
    }
}

/// Pattern-level lookup of targets within a document.
pub trait StructuralLocator {
    /// First match of `target` inside `scope`, as absolute byte offsets.
    ///
    /// Returns `None` when the target does not occur in scope or the locator
    /// has no pattern for it.
    fn locate(&self, target: Target, text: &str, scope: Range<usize>) -> Option<Range<usize>>;

    /// Number of guard forms, primary first.
    fn guard_forms(&self) -> usize;

    /// Start offset of the target function's signature.
    fn function_start(&self, text: &str) -> Result<usize, LocateError> {
        self.locate(Target::Function, text, 0..text.len())
            .map(|m| m.start)
            .ok_or_else(|| LocateError::NotFound {
                target: Target::Function.to_string(),
            })
    }

    /// Offset just past the top-level declaration anchor, if present.
    fn declaration_anchor(&self, text: &str) -> Option<usize> {
        self.locate(Target::DeclarationAnchor, text, 0..text.len())
            .map(|m| m.end)
    }
}
