use regex::Regex;
use serde::Deserialize;
use std::fmt;

/// Everything the engine needs to know about one patch: where the function
/// is, where each insertion goes, what to insert, and which markers prove an
/// insertion is already there.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Recipe {
    #[serde(default)]
    pub meta: Metadata,
    pub function: FunctionTarget,
    #[serde(default)]
    pub declaration: Option<AnchoredInsert>,
    pub state_variable: AnchoredInsert,
    pub check: GuardedInsert,
    #[serde(default)]
    pub verify: Vec<VerifyMarker>,
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct FunctionTarget {
    /// Regex matching the signature through the body opener
    pub signature: String,
}

/// Text inserted right after the end of an anchor match.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct AnchoredInsert {
    pub anchor: String,
    pub text: String,
    pub marker: String,
}

/// Text inserted after the first guard form that matches.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct GuardedInsert {
    /// Primary form first, alternates after
    pub guards: Vec<String>,
    pub text: String,
    pub marker: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct VerifyMarker {
    pub label: String,
    pub marker: String,
}

impl VerifyMarker {
    pub fn new(label: impl Into<String>, marker: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            marker: marker.into(),
        }
    }
}

const MKDIRAT_DECLARATION: &str = "int fmac_check_mkdirat(const char __user *pathname);";

impl Recipe {
    /// Linux 5.15 `fs/namei.c`: gate `do_mkdirat` on `fmac_check_mkdirat`.
    pub fn mkdirat() -> Self {
        Self {
            meta: Metadata {
                name: "mkdirat-5.15".to_string(),
                description: Some(
                    "Insert the FMAC mkdirat check into do_mkdirat (Linux 5.15 fs/namei.c)"
                        .to_string(),
                ),
            },
            function: FunctionTarget {
                signature: r"int\s+do_mkdirat\s*\([^)]+\)\s*\{".to_string(),
            },
            declaration: Some(AnchoredInsert {
                anchor: r"EXPORT_SYMBOL_NS\s*\(\s*vfs_mkdir\s*,\s*ANDROID_GKI_VFS_EXPORT_ONLY\s*\)\s*;"
                    .to_string(),
                text: format!("\n\n{MKDIRAT_DECLARATION}"),
                marker: "fmac_check_mkdirat".to_string(),
            }),
            state_variable: AnchoredInsert {
                anchor: r"unsigned int lookup_flags\s*=\s*LOOKUP_DIRECTORY;".to_string(),
                text: "\n\tint fmac_status;".to_string(),
                marker: "fmac_status".to_string(),
            },
            check: GuardedInsert {
                guards: vec![
                    r"if\s*\(\s*IS_ERR\s*\(\s*dentry\s*\)\s*\)\s*goto\s+out_putname;".to_string(),
                    r"if\s*\(\s*IS_ERR\s*\(\s*dentry\s*\)\s*\)\s*return\s+PTR_ERR\s*\(\s*dentry\s*\);"
                        .to_string(),
                ],
                text: "\n\tfmac_status = fmac_check_mkdirat(name->name);\n\tif (fmac_status) {\n\t\treturn fmac_status;\n\t}\n"
                    .to_string(),
                marker: "fmac_check_mkdirat".to_string(),
            },
            verify: vec![
                VerifyMarker::new("forward declaration", MKDIRAT_DECLARATION),
                VerifyMarker::new("state variable", "int fmac_status;"),
                VerifyMarker::new("security check call", "fmac_check_mkdirat(name->name)"),
            ],
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        check_pattern(&mut issues, "function.signature", &self.function.signature);

        if let Some(decl) = &self.declaration {
            check_pattern(&mut issues, "declaration.anchor", &decl.anchor);
            check_insert(&mut issues, "declaration", &decl.text, &decl.marker);
        }

        check_pattern(
            &mut issues,
            "state_variable.anchor",
            &self.state_variable.anchor,
        );
        check_insert(
            &mut issues,
            "state_variable",
            &self.state_variable.text,
            &self.state_variable.marker,
        );

        if self.check.guards.is_empty() {
            issues.push(ValidationIssue::MissingField {
                field: "check.guards".to_string(),
            });
        }
        for (idx, guard) in self.check.guards.iter().enumerate() {
            check_pattern(&mut issues, &format!("check.guards[{idx}]"), guard);
        }
        check_insert(&mut issues, "check", &self.check.text, &self.check.marker);

        for (idx, item) in self.verify.iter().enumerate() {
            if item.label.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    field: format!("verify[{idx}].label"),
                });
            }
            if item.marker.is_empty() {
                issues.push(ValidationIssue::MissingField {
                    field: format!("verify[{idx}].marker"),
                });
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }
}

impl Default for Recipe {
    fn default() -> Self {
        Self::mkdirat()
    }
}

fn check_pattern(issues: &mut Vec<ValidationIssue>, field: &str, pattern: &str) {
    if pattern.trim().is_empty() {
        issues.push(ValidationIssue::MissingField {
            field: field.to_string(),
        });
        return;
    }
    if let Err(e) = Regex::new(pattern) {
        issues.push(ValidationIssue::InvalidPattern {
            field: field.to_string(),
            message: e.to_string(),
        });
    }
}

fn check_insert(issues: &mut Vec<ValidationIssue>, section: &str, text: &str, marker: &str) {
    if text.trim().is_empty() {
        issues.push(ValidationIssue::MissingField {
            field: format!("{section}.text"),
        });
    }
    if marker.is_empty() {
        issues.push(ValidationIssue::MissingField {
            field: format!("{section}.marker"),
        });
    } else if !text.contains(marker) {
        issues.push(ValidationIssue::MarkerNotInText {
            section: section.to_string(),
            marker: marker.to_string(),
        });
    }
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    MissingField { field: String },
    InvalidPattern { field: String, message: String },
    MarkerNotInText { section: String, marker: String },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::MissingField { field } => {
                write!(f, "recipe missing required field '{field}'")
            }
            ValidationIssue::InvalidPattern { field, message } => {
                write!(f, "recipe field '{field}' is not a valid pattern: {message}")
            }
            ValidationIssue::MarkerNotInText { section, marker } => write!(
                f,
                "{section} marker '{marker}' does not occur in its inserted text; re-running would duplicate it"
            ),
        }
    }
}
