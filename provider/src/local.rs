use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use stratum_models::{ExtractionContext, ExtractionResult};

use crate::error::{ProviderError, ProviderResult};
use crate::{Embedder, Extractor};

/// Embedder/extractor backed by a self-hosted model server, reached over
/// plain HTTP the way the platform's chunker service talks to its
/// embedding sidecar (`chunker/src/services/embedding_client.rs`).
pub struct LocalProvider {
    base_url: String,
    client: Client,
    embedding_model: String,
    dims: usize,
}

impl LocalProvider {
    pub fn new(base_url: String, embedding_model: String, dims: usize) -> Self {
        Self {
            base_url,
            client: Client::new(),
            embedding_model,
            dims,
        }
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    inputs: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl Embedder for LocalProvider {
    async fn embed(&self, texts: &[String]) -> ProviderResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/embed", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&EmbedRequest {
                model: &self.embedding_model,
                inputs: texts,
            })
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("local embed request: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Unavailable(format!("local provider {status}: {body}")));
        }

        let parsed: EmbedResponse = response.json().await.map_err(|e| {
            ProviderError::Unavailable(format!("local embed response decode: {e}"))
        })?;
        Ok(parsed.embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        &self.embedding_model
    }
}

#[derive(Serialize)]
struct ExtractRequest<'a> {
    chunk_text: &'a str,
    context: &'a ExtractionContext,
}

#[async_trait]
impl Extractor for LocalProvider {
    async fn extract(&self, chunk_text: &str, context: &ExtractionContext) -> ProviderResult<ExtractionResult> {
        let url = format!("{}/extract", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&ExtractRequest { chunk_text, context })
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("local extract request: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            if status.is_client_error() {
                let body = response.text().await.unwrap_or_default();
                return Err(ProviderError::InvalidRequest(format!("local provider {status}: {body}")));
            }
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Unavailable(format!("local provider {status}: {body}")));
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("local extract response decode: {e}")))
    }
}
