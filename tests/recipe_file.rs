//! The shipped recipe file must describe the same patch as the built-in one.

use fmac_patcher::{load_from_path, load_from_str, ConfigError, Patcher, Recipe};
use std::path::PathBuf;

fn shipped_recipe() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("recipes/mkdirat-5.15.toml")
}

#[test]
fn test_shipped_recipe_matches_builtin() {
    let recipe = load_from_path(shipped_recipe()).unwrap();
    assert_eq!(recipe, Recipe::mkdirat());
}

#[test]
fn test_shipped_recipe_compiles() {
    let recipe = load_from_path(shipped_recipe()).unwrap();
    assert!(Patcher::new(recipe).is_ok());
}

#[test]
fn test_recipe_with_bad_guard_is_rejected() {
    let shipped = std::fs::read_to_string(shipped_recipe()).unwrap();
    let broken = shipped.replace(
        r"'if\s*\(\s*IS_ERR\s*\(\s*dentry\s*\)\s*\)\s*goto\s+out_putname;'",
        "'if (IS_ERR(dentry'",
    );
    assert_ne!(broken, shipped);

    let err = load_from_str(&broken).unwrap_err();
    assert!(matches!(err, ConfigError::Validation { .. }));
    assert!(err.to_string().contains("check.guards[0]"));
}
