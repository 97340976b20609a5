//! Generated-content collaborator.

use crate::error::SyncResult;
use async_trait::async_trait;

/// Produces app-facing configuration text from a prompt.
///
/// The engine treats the output as an opaque payload and never parses it.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Generates content for a prompt.
    async fn generate(&self, prompt: &str) -> SyncResult<String>;
}

/// Returns a fixed template with `{prompt}` substituted.
#[derive(Debug, Clone)]
pub struct TemplateGenerator {
    template: String,
}

impl TemplateGenerator {
    /// Creates a generator from a template containing `{prompt}`.
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }
}

#[async_trait]
impl ContentGenerator for TemplateGenerator {
    async fn generate(&self, prompt: &str) -> SyncResult<String> {
        Ok(self.template.replace("{prompt}", prompt))
    }
}
