//! Reading recipes from TOML.

use crate::config::schema::{Recipe, ValidationError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A recipe that could not be turned into a usable [`Recipe`].
///
/// `path` is `None` when the recipe came from a string.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read recipe {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("recipe{} is not valid TOML: {source}", origin(.path))]
    Toml {
        path: Option<PathBuf>,
        #[source]
        source: toml_edit::de::Error,
    },

    #[error("recipe{} failed validation: {source}", origin(.path))]
    Validation {
        path: Option<PathBuf>,
        #[source]
        source: ValidationError,
    },
}

fn origin(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| format!(" {}", p.display()))
        .unwrap_or_default()
}

/// Deserialize and validate; every issue is reported, not just the first.
fn parse(input: &str, path: Option<&Path>) -> Result<Recipe, ConfigError> {
    let path = path.map(Path::to_path_buf);
    let recipe: Recipe = toml_edit::de::from_str(input).map_err(|source| ConfigError::Toml {
        path: path.clone(),
        source,
    })?;
    recipe
        .validate()
        .map_err(|source| ConfigError::Validation { path, source })?;
    Ok(recipe)
}

pub fn load_from_str(input: &str) -> Result<Recipe, ConfigError> {
    parse(input, None)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<Recipe, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&contents, Some(path))
}
