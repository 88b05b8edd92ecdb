/// Model catalog: the selectable model variants and their metadata.
///
/// Weight caching is keyed on the file name, so every entry must point at a
/// unique `path`.
use std::collections::HashMap;

use edgechat_core::{Backend, ModelSpec, PromptStyle, Sampling};

/// Id of the built-in default model.
pub const DEFAULT_MODEL_ID: &str = "gemma3-1b-it-gpu";

/// The catalog of known models, looked up by id.
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    models: HashMap<String, ModelSpec>,
    default_id: Option<String>,
}

impl ModelCatalog {
    pub fn new() -> Self {
        let mut catalog = Self::default();
        catalog.register_defaults();
        catalog
    }

    fn register_defaults(&mut self) {
        self.register(ModelSpec {
            id: DEFAULT_MODEL_ID.into(),
            display_name: "Gemma 3 1B IT (int4, GPU)".into(),
            path: "/data/local/tmp/gemma3-1b-it-int4.task".into(),
            url: "https://huggingface.co/litert-community/Gemma3-1B-IT/resolve/main/gemma3-1b-it-int4.task"
                .into(),
            license_url: "https://huggingface.co/litert-community/Gemma3-1B-IT".into(),
            needs_auth: true,
            preferred_backend: Some(Backend::Gpu),
            prompt_style: PromptStyle::Gemma,
            sampling: Sampling {
                temperature: 1.0,
                top_k: 64,
                top_p: 0.95,
            },
            context_tokens: 1024,
            engine_model: "gemma3:1b".into(),
        });
        self.default_id = Some(DEFAULT_MODEL_ID.into());
    }

    /// Add or replace a model in the catalog.
    pub fn register(&mut self, spec: ModelSpec) {
        self.models.insert(spec.id.clone(), spec);
    }

    /// Make `id` the default model. Returns false if it is not registered.
    pub fn set_default(&mut self, id: &str) -> bool {
        if self.models.contains_key(id) {
            self.default_id = Some(id.to_string());
            true
        } else {
            false
        }
    }

    /// All models, sorted by display name.
    pub fn list(&self) -> Vec<&ModelSpec> {
        let mut entries: Vec<&ModelSpec> = self.models.values().collect();
        entries.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        entries
    }

    pub fn default_model(&self) -> Option<&ModelSpec> {
        self.default_id.as_deref().and_then(|id| self.models.get(id))
    }

    pub fn get(&self, id: &str) -> Option<&ModelSpec> {
        self.models.get(id)
    }
}
