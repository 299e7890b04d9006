use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::template::TemplateFieldKeys;

pub const DEFAULT_USER_AGENT: &str = "exercise-reconcile/0.1";
pub const DEFAULT_CATALOG_TABLE: &str = "exercises";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ReconcileConfig {
    #[serde(default)]
    pub catalog: CatalogSection,
    #[serde(default)]
    pub template: TemplateSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct CatalogSection {
    pub url: Option<String>,
    pub table: Option<String>,
    pub user_agent: Option<String>,
    #[serde(default)]
    pub columns: CatalogColumns,
}

/// Store column names, aliased onto the record fields in the `select` clause.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct CatalogColumns {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub media_url: String,
    pub thumbnail_url: String,
}

impl Default for CatalogColumns {
    fn default() -> Self {
        Self {
            id: "id".to_string(),
            name: "name".to_string(),
            display_name: "display_name".to_string(),
            media_url: "media_url".to_string(),
            thumbnail_url: "thumbnail_url".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct TemplateSection {
    pub path: Option<String>,
    pub id_key: Option<String>,
    pub name_key: Option<String>,
    pub media_key: Option<String>,
    pub thumbnail_key: Option<String>,
}

impl ReconcileConfig {
    /// Resolve the catalog endpoint: env CATALOG_URL > config > None.
    pub fn catalog_url(&self) -> Option<String> {
        env_override("CATALOG_URL").or_else(|| self.catalog.url.clone())
    }

    /// Resolve the catalog table: env CATALOG_TABLE > config > DEFAULT_CATALOG_TABLE.
    pub fn catalog_table(&self) -> String {
        env_override("CATALOG_TABLE")
            .or_else(|| self.catalog.table.clone())
            .unwrap_or_else(|| DEFAULT_CATALOG_TABLE.to_string())
    }

    /// Resolve user agent: env CATALOG_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        env_override("CATALOG_USER_AGENT")
            .or_else(|| self.catalog.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn template_keys(&self) -> TemplateFieldKeys {
        let defaults = TemplateFieldKeys::default();
        let section = &self.template;
        TemplateFieldKeys {
            id: section.id_key.clone().unwrap_or(defaults.id),
            name: section.name_key.clone().unwrap_or(defaults.name),
            media_url: section.media_key.clone().unwrap_or(defaults.media_url),
            thumbnail_url: section
                .thumbnail_key
                .clone()
                .unwrap_or(defaults.thumbnail_url),
        }
    }
}

/// Load and parse a ReconcileConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<ReconcileConfig> {
    if !config_path.exists() {
        return Ok(ReconcileConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: ReconcileConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn env_override(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_has_no_catalog_url() {
        let config = ReconcileConfig::default();
        assert!(config.catalog.url.is_none());
        assert!(config.template.path.is_none());
        assert_eq!(config.catalog.columns.media_url, "media_url");
    }

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/config.toml")).expect("load config");
        assert_eq!(config, ReconcileConfig::default());
    }

    #[test]
    fn load_config_parses_catalog_and_template_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[catalog]
url = "https://project.example.co/rest/v1"
table = "exercise_catalog"

[catalog.columns]
media_url = "gif_url"

[template]
path = "src/data/workoutTemplates.ts"
id_key = "id"
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(
            config.catalog.url.as_deref(),
            Some("https://project.example.co/rest/v1")
        );
        assert_eq!(config.catalog.table.as_deref(), Some("exercise_catalog"));
        assert_eq!(config.catalog.columns.media_url, "gif_url");
        assert_eq!(config.catalog.columns.thumbnail_url, "thumbnail_url");
        assert_eq!(
            config.template.path.as_deref(),
            Some("src/data/workoutTemplates.ts")
        );

        let keys = config.template_keys();
        assert_eq!(keys.id, "id");
        assert_eq!(keys.name, "name");
        assert_eq!(keys.media_url, "mediaUrl");
    }

    #[test]
    fn load_config_tolerates_unrelated_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[paths]\nproject_root = \"/foo\"\n").expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert!(config.catalog.url.is_none());
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[catalog\nurl = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn catalog_table_falls_back_to_config_then_default() {
        let mut config = ReconcileConfig::default();
        if env::var("CATALOG_TABLE").is_err() {
            assert_eq!(config.catalog_table(), DEFAULT_CATALOG_TABLE);
            config.catalog.table = Some("catalog_v2".to_string());
            assert_eq!(config.catalog_table(), "catalog_v2");
        }
    }
}
