use crate::config::VerifyMarker;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Presence of one marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerStatus {
    pub label: String,
    pub marker: String,
    pub present: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    pub path: PathBuf,
    /// `false` when the file could not be read; every marker is then absent
    pub readable: bool,
    pub markers: Vec<MarkerStatus>,
}

impl VerificationReport {
    pub fn all_present(&self) -> bool {
        self.readable && self.markers.iter().all(|m| m.present)
    }

    pub fn missing(&self) -> impl Iterator<Item = &MarkerStatus> {
        self.markers.iter().filter(|m| !m.present)
    }

    /// Presence by label.
    pub fn status(&self, label: &str) -> Option<bool> {
        self.markers
            .iter()
            .find(|m| m.label == label)
            .map(|m| m.present)
    }
}

/// Read-only post-write check. Never fails and never touches the file.
#[derive(Debug, Clone, Default)]
pub struct Verifier {
    checks: Vec<VerifyMarker>,
}

impl Verifier {
    pub fn new(checks: Vec<VerifyMarker>) -> Self {
        Self { checks }
    }

    pub fn verify_file(&self, path: &Path) -> VerificationReport {
        match fs::read_to_string(path) {
            Ok(text) => VerificationReport {
                path: path.to_path_buf(),
                readable: true,
                markers: self.verify_text(&text),
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read file for verification");
                VerificationReport {
                    path: path.to_path_buf(),
                    readable: false,
                    markers: self
                        .checks
                        .iter()
                        .map(|check| MarkerStatus {
                            label: check.label.clone(),
                            marker: check.marker.clone(),
                            present: false,
                        })
                        .collect(),
                }
            }
        }
    }

    pub fn verify_text(&self, text: &str) -> Vec<MarkerStatus> {
        self.checks
            .iter()
            .map(|check| {
                let present = text.contains(&check.marker);
                info!(label = %check.label, present, "verified marker");
                MarkerStatus {
                    label: check.label.clone(),
                    marker: check.marker.clone(),
                    present,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Recipe;

    #[test]
    fn test_reports_each_marker() {
        let verifier = Verifier::new(Recipe::mkdirat().verify);
        let statuses = verifier.verify_text("\tint fmac_status;\n");
        let present: Vec<_> = statuses.iter().map(|s| (s.label.as_str(), s.present)).collect();
        assert_eq!(
            present,
            vec![
                ("forward declaration", false),
                ("state variable", true),
                ("security check call", false),
            ]
        );
    }

    #[test]
    fn test_unreadable_file_is_reported_not_raised() {
        let verifier = Verifier::new(Recipe::mkdirat().verify);
        let report = verifier.verify_file(Path::new("/nonexistent/namei.c"));
        assert!(!report.readable);
        assert!(!report.all_present());
        assert_eq!(report.missing().count(), 3);
        assert_eq!(report.status("state variable"), Some(false));
        assert_eq!(report.status("no such label"), None);
    }

    #[test]
    fn test_verify_does_not_modify_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("namei.c");
        fs::write(&path, "int fmac_status;").unwrap();
        let before = fs::metadata(&path).unwrap().modified().unwrap();

        let report = Verifier::new(Recipe::mkdirat().verify).verify_file(&path);
        assert_eq!(report.status("state variable"), Some(true));
        assert_eq!(fs::read_to_string(&path).unwrap(), "int fmac_status;");
        assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), before);
    }
}
