use crate::locate::FunctionSpan;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info};

/// Which part of the patch an insertion belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InsertionKind {
    Declaration,
    StateVariable,
    Check,
}

impl fmt::Display for InsertionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsertionKind::Declaration => write!(f, "forward declaration"),
            InsertionKind::StateVariable => write!(f, "state variable"),
            InsertionKind::Check => write!(f, "security check"),
        }
    }
}

/// Where a marker is looked up before inserting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerScope {
    Document,
    Function(FunctionSpan),
}

/// A single insertion against the original, unmodified text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insertion {
    pub kind: InsertionKind,
    /// Byte offset in the original text
    pub offset: usize,
    pub text: String,
    /// Skip the insertion when this is already present in `scope`
    pub marker: String,
    pub scope: MarkerScope,
}

impl Insertion {
    pub fn new(
        kind: InsertionKind,
        offset: usize,
        text: impl Into<String>,
        marker: impl Into<String>,
        scope: MarkerScope,
    ) -> Self {
        Self {
            kind,
            offset,
            text: text.into(),
            marker: marker.into(),
            scope,
        }
    }

    fn already_present(&self, original: &str) -> bool {
        let haystack = match self.scope {
            MarkerScope::Document => original,
            MarkerScope::Function(span) => &original[span.range()],
        };
        haystack.contains(&self.marker)
    }

    fn validate(&self, original: &str) -> Result<(), EditError> {
        if self.offset > original.len() {
            return Err(EditError::InvalidOffset {
                kind: self.kind,
                offset: self.offset,
                file_len: original.len(),
            });
        }
        if !original.is_char_boundary(self.offset) {
            return Err(EditError::NotCharBoundary {
                kind: self.kind,
                offset: self.offset,
            });
        }
        if let MarkerScope::Function(span) = self.scope {
            if span.end > original.len() || span.start > span.end {
                return Err(EditError::InvalidOffset {
                    kind: self.kind,
                    offset: span.end,
                    file_len: original.len(),
                });
            }
            for bound in [span.start, span.end] {
                if !original.is_char_boundary(bound) {
                    return Err(EditError::NotCharBoundary {
                        kind: self.kind,
                        offset: bound,
                    });
                }
            }
            if !span.contains(self.offset) {
                return Err(EditError::OutsideFunction {
                    kind: self.kind,
                    offset: self.offset,
                    span_start: span.start,
                    span_end: span.end,
                });
            }
        }
        Ok(())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EditError {
    #[error("{kind} offset {offset} is past the end of a {file_len}-byte document")]
    InvalidOffset {
        kind: InsertionKind,
        offset: usize,
        file_len: usize,
    },

    #[error("{kind} offset {offset} is not on a character boundary")]
    NotCharBoundary { kind: InsertionKind, offset: usize },

    #[error("{kind} offset {offset} lies outside the function span [{span_start}, {span_end})")]
    OutsideFunction {
        kind: InsertionKind,
        offset: usize,
        span_start: usize,
        span_end: usize,
    },
}

/// What happened to one insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertionOutcome {
    Applied {
        kind: InsertionKind,
        /// Offset in the original text
        offset: usize,
        /// Offset in the new text, after drift from earlier insertions
        resolved_offset: usize,
        bytes: usize,
    },
    AlreadyPresent {
        kind: InsertionKind,
        marker: String,
    },
}

impl InsertionOutcome {
    pub fn kind(&self) -> InsertionKind {
        match self {
            InsertionOutcome::Applied { kind, .. } | InsertionOutcome::AlreadyPresent { kind, .. } => {
                *kind
            }
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, InsertionOutcome::Applied { .. })
    }
}

/// Ordered insertions: at most one top-level declaration, then in-function
/// insertions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[must_use = "EditPlan does nothing until apply() is called"]
pub struct EditPlan {
    declaration: Option<Insertion>,
    insertions: Vec<Insertion>,
}

/// New text plus per-insertion outcomes, in processing order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedEdit {
    pub text: String,
    pub outcomes: Vec<InsertionOutcome>,
}

impl AppliedEdit {
    pub fn changed(&self) -> bool {
        self.outcomes.iter().any(InsertionOutcome::is_applied)
    }

    pub fn outcome(&self, kind: InsertionKind) -> Option<&InsertionOutcome> {
        self.outcomes.iter().find(|o| o.kind() == kind)
    }
}

impl EditPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_declaration(mut self, insertion: Insertion) -> Self {
        self.declaration = Some(insertion);
        self
    }

    pub fn push(&mut self, insertion: Insertion) {
        self.insertions.push(insertion);
    }

    pub fn declaration(&self) -> Option<&Insertion> {
        self.declaration.as_ref()
    }

    /// Declaration first, then in-function insertions by position.
    pub fn ordered(&self) -> Vec<&Insertion> {
        let mut body: Vec<&Insertion> = self.insertions.iter().collect();
        body.sort_by_key(|ins| ins.offset);
        self.declaration.iter().chain(body).collect()
    }

    /// Apply the plan to `original`, producing the new text.
    ///
    /// Markers are checked against the original text, so the result does not
    /// depend on the order insertions are listed in. Each applied insertion
    /// lands at its original offset shifted by the bytes already inserted
    /// before it; insertions sharing an offset keep processing order.
    pub fn apply(&self, original: &str) -> Result<AppliedEdit, EditError> {
        let ordered = self.ordered();
        for insertion in &ordered {
            insertion.validate(original)?;
        }

        let mut outcomes = Vec::with_capacity(ordered.len());
        let mut accepted: Vec<(usize, &Insertion)> = Vec::new();

        for (seq, insertion) in ordered.iter().enumerate() {
            if insertion.already_present(original) {
                info!(kind = %insertion.kind, marker = %insertion.marker, "already present, skipping");
                outcomes.push(InsertionOutcome::AlreadyPresent {
                    kind: insertion.kind,
                    marker: insertion.marker.clone(),
                });
            } else {
                accepted.push((seq, *insertion));
                outcomes.push(InsertionOutcome::Applied {
                    kind: insertion.kind,
                    offset: insertion.offset,
                    resolved_offset: insertion.offset,
                    bytes: insertion.text.len(),
                });
            }
        }

        accepted.sort_by_key(|(seq, ins)| (ins.offset, *seq));

        let added: usize = accepted.iter().map(|(_, ins)| ins.text.len()).sum();
        let mut text = String::with_capacity(original.len() + added);
        let mut cursor = 0;
        let mut drift = 0;

        for (seq, insertion) in &accepted {
            text.push_str(&original[cursor..insertion.offset]);
            text.push_str(&insertion.text);
            cursor = insertion.offset;

            let resolved = insertion.offset + drift;
            if let Some(InsertionOutcome::Applied {
                resolved_offset, ..
            }) = outcomes.get_mut(*seq)
            {
                *resolved_offset = resolved;
            }
            debug!(kind = %insertion.kind, offset = insertion.offset, resolved, "inserted");
            info!(kind = %insertion.kind, bytes = insertion.text.len(), "inserted");
            drift += insertion.text.len();
        }
        text.push_str(&original[cursor..]);

        Ok(AppliedEdit { text, outcomes })
    }
}
