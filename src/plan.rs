//! Anchor computation inside a located function, and assembly of the
//! [`EditPlan`] from a [`Recipe`].
//!
//! Anchors are absolute offsets into the original text. Drift introduced by
//! earlier insertions is resolved by [`EditPlan::apply`], not here.

use crate::config::Recipe;
use crate::edit::{EditPlan, Insertion, InsertionKind, MarkerScope};
use crate::locate::{FunctionSpan, LocateError, StructuralLocator, Target};
use tracing::debug;

/// Insertion offsets inside the function body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anchors {
    /// Just past the state variable's declaration statement
    pub state_variable: usize,
    /// Just past the guard statement
    pub check: usize,
    /// Which guard form matched; `0` is the primary form
    pub guard_form: usize,
}

pub struct InsertionPlanner<'a, L: StructuralLocator + ?Sized> {
    locator: &'a L,
}

impl<'a, L: StructuralLocator + ?Sized> InsertionPlanner<'a, L> {
    pub fn new(locator: &'a L) -> Self {
        Self { locator }
    }

    /// Find both anchors within `span`.
    pub fn anchors(&self, text: &str, span: FunctionSpan) -> Result<Anchors, LocateError> {
        let state_variable = self
            .locator
            .locate(Target::StateVariable, text, span.range())
            .map(|m| m.end)
            .ok_or_else(|| LocateError::NotFound {
                target: Target::StateVariable.to_string(),
            })?;

        let (guard_form, check) = (0..self.locator.guard_forms())
            .find_map(|form| {
                self.locator
                    .locate(Target::Guard(form), text, span.range())
                    .map(|m| (form, m.end))
            })
            .ok_or_else(|| LocateError::NotFound {
                target: format!(
                    "guard statement ({} form(s) tried)",
                    self.locator.guard_forms()
                ),
            })?;

        if guard_form > 0 {
            debug!(guard_form, "primary guard absent, using alternate form");
        }

        Ok(Anchors {
            state_variable,
            check,
            guard_form,
        })
    }
}

/// Turn anchors into the ordered insertions the recipe asks for.
///
/// The declaration is included only when the recipe has one and its anchor
/// was found.
pub fn build_plan(
    recipe: &Recipe,
    span: FunctionSpan,
    declaration_anchor: Option<usize>,
    anchors: Anchors,
) -> EditPlan {
    let mut plan = EditPlan::new();

    if let (Some(decl), Some(offset)) = (&recipe.declaration, declaration_anchor) {
        plan = plan.with_declaration(Insertion::new(
            InsertionKind::Declaration,
            offset,
            decl.text.clone(),
            decl.marker.clone(),
            MarkerScope::Document,
        ));
    }

    plan.push(Insertion::new(
        InsertionKind::StateVariable,
        anchors.state_variable,
        recipe.state_variable.text.clone(),
        recipe.state_variable.marker.clone(),
        MarkerScope::Function(span),
    ));
    plan.push(Insertion::new(
        InsertionKind::Check,
        anchors.check,
        recipe.check.text.clone(),
        recipe.check.marker.clone(),
        MarkerScope::Function(span),
    ));

    plan
}
