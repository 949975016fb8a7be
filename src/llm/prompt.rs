//! Versioned classification prompts
//!
//! The system prompt is selected by model family and an active prompt
//! version, then populated with the loaded taxonomy and a fixed few-shot
//! block. Session context attaches to the user message.

use std::collections::BTreeMap;

use crate::taxonomy::IntentCatalog;

/// Prompt version shipped with this build.
pub const ACTIVE_PROMPT_VERSION: &str = "v2";

const BASE_INSTRUCTIONS_V1: &str = "You classify e-commerce customer messages. \
Respond with JSON only: {\"action_code\": string, \"confidence\": number, \
\"entities\": object, \"reasoning\": string}.";

const BASE_INSTRUCTIONS_V2: &str = "You are an intent classifier for an e-commerce assistant. \
Choose exactly one action code from the list below. Respond with a single JSON object and \
nothing else: {\"action_code\": string, \"confidence\": number between 0 and 1, \
\"entities\": {\"product_type\"?, \"category\"?, \"brand\"?, \"color\"?, \"size\"?, \
\"price_range\"?: {\"min\"?, \"max\"?, \"currency\"?}}, \"reasoning\": string}. \
If no code fits, use \"UNCLEAR\".";

const FEW_SHOT: &str = r#"Examples:
User: add these sneakers to my basket
{"action_code": "ADD_TO_CART", "confidence": 0.97, "entities": {"product_type": "sneakers"}, "reasoning": "explicit add-to-cart request"}
User: wheres my stuff i ordered last week
{"action_code": "TRACK_ORDER", "confidence": 0.9, "entities": {}, "reasoning": "asks about a placed order's whereabouts"}
User: do you have this in blue under 50 dollars
{"action_code": "CHECK_AVAILABILITY", "confidence": 0.82, "entities": {"color": "blue", "price_range": {"max": 50, "currency": "USD"}}, "reasoning": "availability question with constraints"}"#;

/// Prompt builder over versioned templates.
pub struct PromptLibrary {
    versions: BTreeMap<String, &'static str>,
    active_version: String,
}

impl PromptLibrary {
    /// Library with the shipped versions and the current active one.
    pub fn new() -> Self {
        let versions = BTreeMap::from([
            ("v1".to_string(), BASE_INSTRUCTIONS_V1),
            ("v2".to_string(), BASE_INSTRUCTIONS_V2),
        ]);
        Self {
            versions,
            active_version: ACTIVE_PROMPT_VERSION.to_string(),
        }
    }

    /// Currently active version tag.
    pub fn active_version(&self) -> &str {
        &self.active_version
    }

    /// Select a different version; unknown tags keep the current one.
    pub fn set_active_version(&mut self, version: &str) -> bool {
        if self.versions.contains_key(version) {
            self.active_version = version.to_string();
            true
        } else {
            false
        }
    }

    /// Build the system prompt for `model`: instructions, the code list, and
    /// the few-shot block.
    pub fn system_prompt(&self, model: &str, catalog: &IntentCatalog) -> String {
        let instructions = self
            .versions
            .get(&self.active_version)
            .copied()
            .unwrap_or(BASE_INSTRUCTIONS_V2);

        let mut codes = String::new();
        for definition in catalog.definitions() {
            codes.push_str(&format!(
                "- {} ({}): {}\n",
                definition.code, definition.category, definition.description
            ));
        }

        // Compact models get the terse instruction set.
        let instructions = if model.contains("mini") || model.contains("small") {
            BASE_INSTRUCTIONS_V1
        } else {
            instructions
        };

        format!("{instructions}\n\nAction codes:\n{codes}\n{FEW_SHOT}")
    }

    /// Build the user message with recent session context attached.
    pub fn user_message(&self, query: &str, context: &[String]) -> String {
        if context.is_empty() {
            return query.to_string();
        }
        let mut message = String::from("Recent conversation:\n");
        for turn in context {
            message.push_str(&format!("- {turn}\n"));
        }
        message.push_str(&format!("\nCurrent message: {query}"));
        message
    }
}

impl Default for PromptLibrary {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::seed_catalog;

    #[test]
    fn test_system_prompt_lists_all_codes() {
        let library = PromptLibrary::new();
        let prompt = library.system_prompt("large-model", &seed_catalog());
        assert!(prompt.contains("ADD_TO_CART"));
        assert!(prompt.contains("TRACK_ORDER"));
        assert!(prompt.contains("action_code"));
    }

    #[test]
    fn test_compact_model_gets_terse_prompt() {
        let library = PromptLibrary::new();
        let prompt = library.system_prompt("tiny-mini", &seed_catalog());
        assert!(prompt.starts_with(BASE_INSTRUCTIONS_V1));
    }

    #[test]
    fn test_version_switching() {
        let mut library = PromptLibrary::new();
        assert!(library.set_active_version("v1"));
        assert!(!library.set_active_version("v99"));
        assert_eq!(library.active_version(), "v1");
    }

    #[test]
    fn test_user_message_includes_context() {
        let library = PromptLibrary::new();
        let message = library.user_message("and the blue one?", &["find red shoes".to_string()]);
        assert!(message.contains("find red shoes"));
        assert!(message.contains("and the blue one?"));
    }
}
