//! The generation call seam.

use super::prompt::{build_batch_prompt, parse_batch_response};
use crate::client::{ChatClient, Message};
use crate::models::{DraftItem, GenerationConfig, Result};
use serde_json::Value;
use std::future::Future;
use tracing::debug;

/// Produces candidate records for a batch of draft items.
///
/// Output entries are matched to `items` by position. Returning fewer
/// entries than items is allowed; unmatched items count as failures.
pub trait RecordGenerator {
    fn generate_batch(&self, items: &[DraftItem]) -> impl Future<Output = Result<Vec<Value>>> + Send;
}

/// Generator backed by a chat completions endpoint.
pub struct ApiGenerator {
    client: ChatClient,
    model: String,
    max_tokens: u32,
    temperature: f64,
}

impl ApiGenerator {
    pub fn new(client: ChatClient, model: impl Into<String>, max_tokens: u32, temperature: f64) -> Self {
        Self {
            client,
            model: model.into(),
            max_tokens,
            temperature,
        }
    }

    pub fn from_config(client: ChatClient, config: &GenerationConfig) -> Self {
        Self::new(client, config.model.clone(), config.max_tokens, config.temperature)
    }

    pub fn client(&self) -> &ChatClient {
        &self.client
    }
}

impl RecordGenerator for ApiGenerator {
    async fn generate_batch(&self, items: &[DraftItem]) -> Result<Vec<Value>> {
        let prompt = build_batch_prompt(items)?;
        let response = self
            .client
            .complete(
                &self.model,
                &[Message::user(prompt)],
                self.max_tokens,
                self.temperature,
            )
            .await?;

        debug!(
            model = %response.model,
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            duration_ms = response.duration.as_millis() as u64,
            "Batch completion received"
        );

        parse_batch_response(&response.content)
    }
}
