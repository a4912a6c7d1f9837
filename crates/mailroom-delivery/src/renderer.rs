//! Template rendering seam

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Template error: {0}")]
    TemplateError(String),
}

/// A rendered message body
#[derive(Debug, Clone)]
pub struct RenderedEmail {
    pub html: String,
    pub text: Option<String>,
}

/// Renders a named template with substitution values
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(
        &self,
        template: &str,
        data: &serde_json::Value,
    ) -> Result<RenderedEmail, RenderError>;
}

/// Renderer over an in-memory template registry
///
/// Templates are HTML bodies with `{{key}}` placeholders filled from
/// top-level fields of the data object. Placeholders without a
/// matching field are left untouched.
#[derive(Default)]
pub struct TemplateRenderer {
    templates: HashMap<String, String>,
}

impl TemplateRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_template(mut self, name: &str, body: &str) -> Self {
        self.templates.insert(name.to_string(), body.to_string());
        self
    }

    pub fn register(&mut self, name: &str, body: &str) {
        self.templates.insert(name.to_string(), body.to_string());
    }

    fn substitute(body: &str, data: &serde_json::Value) -> String {
        let mut rendered = body.to_string();
        if let Some(fields) = data.as_object() {
            for (key, value) in fields {
                let placeholder = format!("{{{{{}}}}}", key);
                let replacement = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                rendered = rendered.replace(&placeholder, &replacement);
            }
        }
        rendered
    }
}

#[async_trait]
impl Renderer for TemplateRenderer {
    async fn render(
        &self,
        template: &str,
        data: &serde_json::Value,
    ) -> Result<RenderedEmail, RenderError> {
        let body = self
            .templates
            .get(template)
            .ok_or_else(|| RenderError::TemplateNotFound(template.to_string()))?;

        Ok(RenderedEmail {
            html: Self::substitute(body, data),
            text: None,
        })
    }
}

/// Mock renderer for testing
#[derive(Debug, Clone)]
pub struct MockRenderer {
    pub render_count: Arc<AtomicUsize>,
    pub should_fail_render: bool,
}

impl Default for MockRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRenderer {
    pub fn new() -> Self {
        Self {
            render_count: Arc::new(AtomicUsize::new(0)),
            should_fail_render: false,
        }
    }

    pub fn with_render_failure(mut self) -> Self {
        self.should_fail_render = true;
        self
    }

    pub fn render_call_count(&self) -> usize {
        self.render_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Renderer for MockRenderer {
    async fn render(
        &self,
        template: &str,
        data: &serde_json::Value,
    ) -> Result<RenderedEmail, RenderError> {
        self.render_count.fetch_add(1, Ordering::SeqCst);

        if self.should_fail_render {
            return Err(RenderError::TemplateNotFound(template.to_string()));
        }

        Ok(RenderedEmail {
            html: format!("<p>mock render of {} with {}</p>", template, data),
            text: None,
        })
    }
}
