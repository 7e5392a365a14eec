//! Prompt records.

use crate::error::CoreResult;
use crate::registry::RegistryItem;
use async_trait::async_trait;
use crossmcp_protocol::types::{GetPromptResult, Prompt};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Renders a prompt from argument values.
#[async_trait]
pub trait PromptRenderer: Send + Sync {
    /// Render the prompt messages.
    async fn render(&self, arguments: HashMap<String, String>) -> CoreResult<GetPromptResult>;
}

/// Normalized prompt registration.
#[derive(Clone)]
pub struct PromptRecord {
    /// The listed definition
    pub definition: Prompt,
    /// Message renderer
    pub renderer: Arc<dyn PromptRenderer>,
}

impl fmt::Debug for PromptRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromptRecord")
            .field("name", &self.definition.name)
            .finish()
    }
}

impl PromptRecord {
    /// Record from a definition and renderer.
    pub fn new(definition: Prompt, renderer: Arc<dyn PromptRenderer>) -> Self {
        Self {
            definition,
            renderer,
        }
    }

    /// Validate that all required arguments are present.
    pub fn check_arguments(&self, arguments: &HashMap<String, String>) -> CoreResult<()> {
        if let Some(declared) = &self.definition.arguments {
            for arg in declared {
                if arg.required == Some(true) && !arguments.contains_key(&arg.name) {
                    return Err(crate::error::CoreError::execution(format!(
                        "prompt '{}' requires argument '{}'",
                        self.definition.name, arg.name
                    )));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RegistryItem for PromptRecord {
    fn name(&self) -> &str {
        &self.definition.name
    }
}
