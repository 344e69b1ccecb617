/// A model offered in the picker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelInfo {
    pub id: &'static str,
    pub display_name: &'static str,
    /// Emits a separate reasoning channel when asked for `reasoning_format`.
    pub reasoning: bool,
}

pub const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";

const CATALOG: &[ModelInfo] = &[
    ModelInfo {
        id: "llama-3.3-70b-versatile",
        display_name: "Llama 3.3 70B Versatile",
        reasoning: false,
    },
    ModelInfo {
        id: "llama-3.1-8b-instant",
        display_name: "Llama 3.1 8B Instant",
        reasoning: false,
    },
    ModelInfo {
        id: "gemma2-9b-it",
        display_name: "Gemma 2 9B",
        reasoning: false,
    },
    ModelInfo {
        id: "mixtral-8x7b-32768",
        display_name: "Mixtral 8x7B",
        reasoning: false,
    },
    ModelInfo {
        id: "deepseek-r1-distill-llama-70b",
        display_name: "DeepSeek R1 Distill Llama 70B",
        reasoning: true,
    },
    ModelInfo {
        id: "qwen-qwq-32b",
        display_name: "Qwen QwQ 32B",
        reasoning: true,
    },
];

pub fn all() -> &'static [ModelInfo] {
    CATALOG
}

pub fn find(id: &str) -> Option<&'static ModelInfo> {
    CATALOG.iter().find(|m| m.id == id)
}

pub fn display_name(id: &str) -> &str {
    find(id).map(|m| m.display_name).unwrap_or(id)
}

/// Unknown ids are matched by family name so newly listed models still work.
pub fn supports_reasoning(id: &str) -> bool {
    match find(id) {
        Some(model) => model.reasoning,
        None => {
            let id = id.to_lowercase();
            id.contains("deepseek-r1") || id.contains("qwq") || id.contains("qwen3")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_model_is_listed() {
        assert!(find(DEFAULT_MODEL).is_some());
    }

    #[test]
    fn reasoning_detection() {
        assert!(supports_reasoning("qwen-qwq-32b"));
        assert!(supports_reasoning("deepseek-r1-distill-qwen-32b"));
        assert!(!supports_reasoning("llama-3.1-8b-instant"));
        assert!(!supports_reasoning("some-new-model"));
    }

    #[test]
    fn display_name_falls_back_to_id() {
        assert_eq!(display_name("gemma2-9b-it"), "Gemma 2 9B");
        assert_eq!(display_name("custom"), "custom");
    }
}
