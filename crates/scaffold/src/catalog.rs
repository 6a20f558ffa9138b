//! Template catalog.

use std::collections::BTreeMap;

use code_play_core::{Error, Result};

/// Built-in templates: short id → scaffolding tool template.
const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
    ("vanilla", "vanilla-ts"),
    ("vue", "vue-ts"),
    ("react", "react-ts"),
    ("preact", "preact-ts"),
    ("lit", "lit-ts"),
    ("svelte", "svelte-ts"),
    ("solid", "solid-ts"),
    ("qwik", "qwik-ts"),
];

/// Maps template ids to the names the scaffolding tool understands.
///
/// Both the short id (`react`) and the tool name (`react-ts`) are accepted.
#[derive(Debug, Clone)]
pub struct TemplateCatalog {
    templates: BTreeMap<String, String>,
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        Self {
            templates: BUILTIN_TEMPLATES
                .iter()
                .map(|(id, tool)| (id.to_string(), tool.to_string()))
                .collect(),
        }
    }
}

impl TemplateCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a template.
    pub fn with_template(mut self, id: &str, tool_template: &str) -> Self {
        self.templates
            .insert(id.to_string(), tool_template.to_string());
        self
    }

    /// Tool template for `id`, or `NotFound`.
    pub fn resolve(&self, id: &str) -> Result<&str> {
        if let Some(tool) = self.templates.get(id) {
            return Ok(tool.as_str());
        }
        self.templates
            .values()
            .find(|tool| tool.as_str() == id)
            .map(String::as_str)
            .ok_or_else(|| Error::not_found(format!("template {}", id)))
    }

    /// Short template ids, sorted.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve() {
        let catalog = TemplateCatalog::new();
        assert_eq!(catalog.resolve("vanilla").unwrap(), "vanilla-ts");
        assert_eq!(catalog.resolve("vanilla-ts").unwrap(), "vanilla-ts");
        assert_eq!(catalog.resolve("qwik").unwrap(), "qwik-ts");
        assert!(matches!(catalog.resolve("angular"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_ids_sorted() {
        let catalog = TemplateCatalog::new();
        let ids: Vec<&str> = catalog.ids().collect();
        assert_eq!(ids.len(), 8);
        assert_eq!(ids[0], "lit");
    }
}
