use crate::config::Recipe;
use crate::locate::errors::LocateError;
use crate::locate::{StructuralLocator, Target};
use regex::Regex;
use std::ops::Range;
use tracing::{debug, warn};

/// Regex-backed [`StructuralLocator`] compiled from a [`Recipe`].
#[derive(Debug, Clone)]
pub struct PatternLocator {
    function: Regex,
    declaration: Option<Regex>,
    state_variable: Regex,
    guards: Vec<Regex>,
}

impl PatternLocator {
    /// Compile every pattern in the recipe.
    pub fn new(recipe: &Recipe) -> Result<Self, LocateError> {
        let function = compile(Target::Function, &recipe.function.signature)?;
        let declaration = recipe
            .declaration
            .as_ref()
            .map(|decl| compile(Target::DeclarationAnchor, &decl.anchor))
            .transpose()?;
        let state_variable = compile(Target::StateVariable, &recipe.state_variable.anchor)?;
        let guards = recipe
            .check
            .guards
            .iter()
            .enumerate()
            .map(|(idx, pattern)| compile(Target::Guard(idx), pattern))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            function,
            declaration,
            state_variable,
            guards,
        })
    }

    fn pattern(&self, target: Target) -> Option<&Regex> {
        match target {
            Target::Function => Some(&self.function),
            Target::DeclarationAnchor => self.declaration.as_ref(),
            Target::StateVariable => Some(&self.state_variable),
            Target::Guard(idx) => self.guards.get(idx),
        }
    }
}

impl StructuralLocator for PatternLocator {
    fn locate(&self, target: Target, text: &str, scope: Range<usize>) -> Option<Range<usize>> {
        let regex = self.pattern(target)?;
        let haystack = text.get(scope.clone())?;

        let mut matches = regex.find_iter(haystack);
        let first = matches.next()?;
        if matches.next().is_some() {
            warn!(%target, "pattern matched more than once; using the first match");
        }

        let found = scope.start + first.start()..scope.start + first.end();
        debug!(%target, start = found.start, end = found.end, "located");
        Some(found)
    }

    fn guard_forms(&self) -> usize {
        self.guards.len()
    }
}

/// Compile a single pattern, tagging failures with the target it was for.
pub fn compile(target: Target, pattern: &str) -> Result<Regex, LocateError> {
    Regex::new(pattern).map_err(|e| LocateError::InvalidPattern {
        target: target.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAMEI: &str = "\
int vfs_mkdir(struct inode *dir)
{
\treturn 0;
}
EXPORT_SYMBOL_NS(vfs_mkdir, ANDROID_GKI_VFS_EXPORT_ONLY);

int do_mkdirat(int dfd, struct filename *name, umode_t mode)
{
\tunsigned int lookup_flags = LOOKUP_DIRECTORY;
\treturn 0;
}
";

    fn locator() -> PatternLocator {
        PatternLocator::new(&Recipe::mkdirat()).unwrap()
    }

    #[test]
    fn test_function_start() {
        let start = locator().function_start(NAMEI).unwrap();
        assert_eq!(start, NAMEI.find("int do_mkdirat").unwrap());
    }

    #[test]
    fn test_function_start_not_found() {
        let err = locator()
            .function_start("int do_rmdir(int dfd) { }")
            .unwrap_err();
        assert_eq!(
            err,
            LocateError::NotFound {
                target: "function signature".to_string()
            }
        );
    }

    #[test]
    fn test_signature_must_reach_body_opener() {
        // A prototype has no body opener and must not match
        let text = "int do_mkdirat(int dfd, struct filename *name, umode_t mode);";
        assert!(locator().function_start(text).is_err());
    }

    #[test]
    fn test_declaration_anchor_is_end_of_export() {
        let anchor = locator().declaration_anchor(NAMEI).unwrap();
        assert!(NAMEI[..anchor].ends_with("ANDROID_GKI_VFS_EXPORT_ONLY);"));
    }

    #[test]
    fn test_declaration_anchor_absent() {
        let text = NAMEI.replace("EXPORT_SYMBOL_NS", "EXPORT_SYMBOL");
        assert_eq!(locator().declaration_anchor(&text), None);
    }

    #[test]
    fn test_locate_respects_scope() {
        let loc = locator();
        let start = NAMEI.find("int do_mkdirat").unwrap();
        assert!(loc
            .locate(Target::StateVariable, NAMEI, start..NAMEI.len())
            .is_some());
        assert!(loc.locate(Target::StateVariable, NAMEI, 0..start).is_none());
    }

    #[test]
    fn test_unknown_guard_form() {
        let loc = locator();
        assert_eq!(loc.guard_forms(), 2);
        assert!(loc.locate(Target::Guard(5), NAMEI, 0..NAMEI.len()).is_none());
    }

    #[test]
    fn test_invalid_pattern() {
        let mut recipe = Recipe::mkdirat();
        recipe.check.guards.push("if (unclosed".to_string());
        let err = PatternLocator::new(&recipe).unwrap_err();
        assert!(matches!(
            err,
            LocateError::InvalidPattern { ref target, .. } if target == "alternate guard #2"
        ));
    }
}
