//! Catalog of the Groq models offered to users
//!
//! The catalog is advisory: initiation accepts any model name unless strict
//! model checking is enabled, in which case names outside this list are
//! rejected up front.

use serde::Serialize;

/// Model definition with metadata
#[derive(Debug, Clone, Serialize)]
pub struct ModelDef {
    /// Identifier sent to the completion API (e.g. "llama3-8b-8192")
    pub id: &'static str,
    /// Organisation that published the weights
    pub owned_by: &'static str,
    /// Human-readable description
    pub description: &'static str,
    /// Context window size in tokens
    pub context_window: usize,
}

/// Get all supported model definitions
pub fn all_models() -> &'static [ModelDef] {
    &[
        ModelDef {
            id: "gemma-7b-it",
            owned_by: "Google",
            description: "Gemma 7B instruction tuned",
            context_window: 8_192,
        },
        ModelDef {
            id: "gemma2-9b-it",
            owned_by: "Google",
            description: "Gemma 2 9B instruction tuned",
            context_window: 8_192,
        },
        ModelDef {
            id: "llama3-8b-8192",
            owned_by: "Meta",
            description: "Llama 3 8B (fast, default)",
            context_window: 8_192,
        },
        ModelDef {
            id: "llama3-groq-70b-8192-tool-use-preview",
            owned_by: "Groq",
            description: "Llama 3 70B fine-tuned for tool use (preview)",
            context_window: 8_192,
        },
        ModelDef {
            id: "llava-v1.5-7b-4096-preview",
            owned_by: "Haotian Liu",
            description: "LLaVA 1.5 7B vision model (preview)",
            context_window: 4_096,
        },
        ModelDef {
            id: "whisper-large-v3",
            owned_by: "OpenAI",
            description: "Whisper large v3 speech model",
            context_window: 448,
        },
        ModelDef {
            id: "mixtral-8x7b-32768",
            owned_by: "Mistral AI",
            description: "Mixtral 8x7B mixture of experts",
            context_window: 32_768,
        },
    ]
}

/// Look up a model by its API identifier
pub fn find_model(id: &str) -> Option<&'static ModelDef> {
    all_models().iter().find(|m| m.id == id)
}

/// Check whether a model identifier is in the catalog
pub fn is_supported(id: &str) -> bool {
    find_model(id).is_some()
}
