//! Mail body templates
//!
//! Templates are Handlebars files in a single directory: `{name}.hbs` holds
//! the HTML body and an optional `{name}.txt.hbs` the plain-text
//! alternative. Templates are read on every render, so edits apply to the
//! next delivery without a restart. Missing values render as an empty
//! string.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use handlebars::{Handlebars, RenderError};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{
    error::{DeliveryError, PermanentError, SystemError},
    transport::MailBody,
};

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Template name '{0}' must be a plain file name")]
    InvalidName(String),

    #[error("Template '{0}' does not exist")]
    NotFound(String),

    #[error("Failed to render template '{name}': {source}")]
    Render {
        name: String,
        #[source]
        source: RenderError,
    },

    #[error("Failed to read template '{name}': {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// A broken or missing template never fixes itself between retries; a
/// failed read might.
impl From<TemplateError> for DeliveryError {
    fn from(error: TemplateError) -> Self {
        match error {
            TemplateError::InvalidName(name) => PermanentError::InvalidTemplate(name).into(),
            TemplateError::NotFound(name) => PermanentError::TemplateNotFound(name).into(),
            TemplateError::Render { name, source } => {
                PermanentError::InvalidTemplate(format!("{name}: {source}")).into()
            }
            TemplateError::Io { source, .. } => SystemError::Io(source).into(),
        }
    }
}

const HTML_EXTENSION: &str = "hbs";
const TEXT_EXTENSION: &str = "txt.hbs";

fn default_dir() -> PathBuf {
    PathBuf::from("templates")
}

/// Directory of mail templates
#[derive(Debug, Clone)]
pub struct TemplateStore {
    dir: PathBuf,
    html: Handlebars<'static>,
    text: Handlebars<'static>,
}

impl Default for TemplateStore {
    fn default() -> Self {
        Self::new(default_dir())
    }
}

impl<'de> Deserialize<'de> for TemplateStore {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct TemplateStoreHelper {
            #[serde(default = "default_dir")]
            dir: PathBuf,
        }

        let helper = TemplateStoreHelper::deserialize(deserializer)?;
        Ok(Self::new(helper.dir))
    }
}

impl TemplateStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let mut text = Handlebars::new();
        text.register_escape_fn(handlebars::no_escape);

        Self {
            dir: dir.into(),
            html: Handlebars::new(),
            text,
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Render template `name` with `data` into a mail body.
    ///
    /// # Errors
    /// [`TemplateError::InvalidName`] for names that are not plain file names,
    /// [`TemplateError::NotFound`] when the HTML template is missing,
    /// [`TemplateError::Render`] when either template does not compile or
    /// render.
    pub async fn render(
        &self,
        name: &str,
        data: &Map<String, Value>,
    ) -> Result<MailBody, TemplateError> {
        if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
            return Err(TemplateError::InvalidName(name.to_string()));
        }

        let Some(html_source) = self.read(name, HTML_EXTENSION).await? else {
            return Err(TemplateError::NotFound(name.to_string()));
        };
        let html = Self::render_with(&self.html, name, &html_source, data)?;

        let text = match self.read(name, TEXT_EXTENSION).await? {
            Some(source) => Some(Self::render_with(&self.text, name, &source, data)?),
            None => None,
        };

        Ok(MailBody { html, text })
    }

    async fn read(&self, name: &str, extension: &str) -> Result<Option<String>, TemplateError> {
        match tokio::fs::read_to_string(self.dir.join(format!("{name}.{extension}"))).await {
            Ok(source) => Ok(Some(source)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(TemplateError::Io {
                name: name.to_string(),
                source,
            }),
        }
    }

    fn render_with(
        registry: &Handlebars<'static>,
        name: &str,
        source: &str,
        data: &Map<String, Value>,
    ) -> Result<String, TemplateError> {
        registry
            .render_template(source, data)
            .map_err(|source| TemplateError::Render {
                name: name.to_string(),
                source,
            })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    fn data(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn store_with(templates: &[(&str, &str)]) -> (TempDir, TemplateStore) {
        let dir = TempDir::new().unwrap();
        for (file, source) in templates {
            std::fs::write(dir.path().join(file), source).unwrap();
        }
        let store = TemplateStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn test_render_variables_and_escaping() {
        let (_dir, store) = store_with(&[(
            "project-created.hbs",
            "<p>{{project.title}} by {{author}}</p>{{{raw}}}[{{missing}}]{{! note }}",
        )]);

        let body = store
            .render(
                "project-created",
                &data(json!({
                    "project": { "title": "Apollo & Co" },
                    "author": "<Ada>",
                    "raw": "<b>bold</b>",
                })),
            )
            .await
            .unwrap();

        assert_eq!(
            body.html,
            "<p>Apollo &amp; Co by &lt;Ada&gt;</p><b>bold</b>[]"
        );
        assert_eq!(body.text, None);
    }

    #[tokio::test]
    async fn test_block_helpers() {
        let (_dir, store) = store_with(&[(
            "roles.hbs",
            "{{#if admin}}ADMIN{{else}}USER{{/if}}|{{#each items}}[{{this}}]{{/each}}",
        )]);

        let body = store
            .render("roles", &data(json!({ "admin": false, "items": ["a", "b"] })))
            .await
            .unwrap();

        assert_eq!(body.html, "USER|[a][b]");
    }

    #[tokio::test]
    async fn test_text_alternative_is_not_escaped() {
        let (_dir, store) = store_with(&[
            ("welcome.hbs", "<p>Hi {{name}}</p>"),
            ("welcome.txt.hbs", "Hi {{name}}"),
        ]);

        let body = store
            .render("welcome", &data(json!({ "name": "Tom & Jerry" })))
            .await
            .unwrap();

        assert_eq!(body.html, "<p>Hi Tom &amp; Jerry</p>");
        assert_eq!(body.text.as_deref(), Some("Hi Tom & Jerry"));
    }

    #[tokio::test]
    async fn test_missing_and_broken_templates() {
        let (_dir, store) = store_with(&[("broken.hbs", "{{#if open}}never closed")]);

        assert!(matches!(
            store.render("missing", &Map::new()).await,
            Err(TemplateError::NotFound(name)) if name == "missing"
        ));
        assert!(matches!(
            store.render("broken", &Map::new()).await,
            Err(TemplateError::Render { name, .. }) if name == "broken"
        ));
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let store = TemplateStore::new("/srv/templates");

        for name in ["../secrets", "nested/name", "..", "a\\b", ""] {
            assert!(
                matches!(
                    store.render(name, &Map::new()).await,
                    Err(TemplateError::InvalidName(_))
                ),
                "{name} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_error_classification() {
        let (_dir, store) = store_with(&[("broken.hbs", "{{#each}}")]);
        let render = store.render("broken", &Map::new()).await.unwrap_err();
        assert!(DeliveryError::from(render).is_permanent());

        assert!(DeliveryError::from(TemplateError::NotFound("x".to_string())).is_permanent());
        assert!(DeliveryError::from(TemplateError::InvalidName("..".to_string())).is_permanent());

        let io = DeliveryError::from(TemplateError::Io {
            name: "welcome".to_string(),
            source: std::io::Error::from(ErrorKind::Interrupted),
        });
        assert!(io.is_system(), "{io}");
    }

    #[tokio::test]
    async fn test_unreadable_template_is_an_io_error() {
        // A directory where the template file should be cannot be read as text
        let (dir, store) = store_with(&[]);
        std::fs::create_dir(dir.path().join("welcome.hbs")).unwrap();

        assert!(matches!(
            store.render("welcome", &Map::new()).await,
            Err(TemplateError::Io { .. })
        ));
    }

    #[test]
    fn test_deserialize_defaults() {
        let store: TemplateStore = ron::from_str("()").unwrap();
        assert_eq!(store.dir(), Path::new("templates"));

        let store: TemplateStore = ron::from_str(r#"(dir: "/srv/mail")"#).unwrap();
        assert_eq!(store.dir(), Path::new("/srv/mail"));
    }
}
