//! Built-in Macro Recipes
//!
//! The closed set of fixed keystroke loops the macro runner can drive.

use crate::keys::{KeyCode, KeyToken, MappedStep};
use serde::Serialize;

/// One recipe keystroke and the pause after it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecipeStep {
    pub key: KeyCode,
    pub delay_ms: u32,
}

const fn step(key: KeyCode, delay_ms: u32) -> RecipeStep {
    RecipeStep { key, delay_ms }
}

/// A compile-time keystroke recipe
#[derive(Debug, PartialEq, Eq)]
pub struct MacroRecipe {
    /// Identifier used by the control plane
    pub id: &'static str,
    /// Display name used in notifications
    pub name: &'static str,
    /// Key the user presses in-game to begin (informational only)
    pub start_key: KeyCode,
    pub steps: &'static [RecipeStep],
}

impl MacroRecipe {
    /// Steps in the shape the playback executor consumes
    pub fn mapped_steps(&self) -> Vec<MappedStep> {
        self.steps
            .iter()
            .map(|s| MappedStep {
                key: KeyToken::Simple(s.key),
                delay_ms: s.delay_ms,
            })
            .collect()
    }

    /// Sum of all step delays for one pass
    pub fn cycle_ms(&self) -> u64 {
        self.steps.iter().map(|s| u64::from(s.delay_ms)).sum()
    }
}

pub static RECIPES: &[MacroRecipe] = &[
    MacroRecipe {
        id: "mode-A-entry",
        name: "Mode A (entry)",
        start_key: KeyCode::O,
        steps: &[
            step(KeyCode::O, 3000),
            step(KeyCode::Enter, 1000),
            step(KeyCode::Enter, 1000),
            step(KeyCode::Esc, 1000),
            step(KeyCode::D, 0),
            step(KeyCode::X, 0),
            step(KeyCode::Digit5, 0),
        ],
    },
    MacroRecipe {
        id: "mode-A-party",
        name: "Mode A (party)",
        start_key: KeyCode::X,
        steps: &[step(KeyCode::X, 1000), step(KeyCode::D, 1000)],
    },
    MacroRecipe {
        id: "mode-B-entry",
        name: "Mode B (entry)",
        start_key: KeyCode::O,
        steps: &[
            step(KeyCode::O, 3000),
            step(KeyCode::Enter, 1000),
            step(KeyCode::Enter, 1000),
            step(KeyCode::Esc, 1000),
            step(KeyCode::D, 0),
        ],
    },
    MacroRecipe {
        id: "mode-B-party",
        name: "Mode B (party)",
        start_key: KeyCode::X,
        steps: &[step(KeyCode::X, 1000), step(KeyCode::D, 1000)],
    },
];

/// Look up a recipe by id (case-insensitive)
pub fn find(id: &str) -> Option<&'static MacroRecipe> {
    let id = id.trim();
    RECIPES.iter().find(|r| r.id.eq_ignore_ascii_case(id))
}

/// Recipe summary for listings
#[derive(Debug, Clone, Serialize)]
pub struct RecipeInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub start_key: &'static str,
    pub sequence: String,
}

pub fn list() -> Vec<RecipeInfo> {
    RECIPES
        .iter()
        .map(|r| RecipeInfo {
            id: r.id,
            name: r.name,
            start_key: r.start_key.name(),
            sequence: crate::keys::format_sequence(&r.mapped_steps()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_recipes() {
        assert_eq!(find("mode-A-entry").unwrap().steps.len(), 7);
        assert_eq!(find("MODE-b-party").unwrap().id, "mode-B-party");
        assert!(find("mode-C").is_none());
    }

    #[test]
    fn test_entry_recipe_shape() {
        let recipe = find("mode-B-entry").unwrap();
        assert_eq!(recipe.cycle_ms(), 6000);
        assert_eq!(
            crate::keys::format_sequence(&recipe.mapped_steps()),
            "o(3000), enter(1000), enter(1000), esc(1000), d(0)"
        );
    }

    #[test]
    fn test_recipe_ids_unique() {
        let infos = list();
        assert_eq!(infos.len(), 4);
        for (i, a) in infos.iter().enumerate() {
            assert!(infos[i + 1..].iter().all(|b| b.id != a.id));
        }
    }
}
