pub mod loader;
pub mod schema;

pub use loader::{load_from_path, load_from_str, ConfigError};
pub use schema::{
    AnchoredInsert, FunctionTarget, GuardedInsert, Metadata, Recipe, ValidationError,
    ValidationIssue, VerifyMarker,
};
