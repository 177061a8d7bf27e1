use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client as OpenAiClient};
use async_trait::async_trait;
use serde::Deserialize;
use stratum_models::{ExtractedConcept, ExtractedRelationship, ExtractionContext, ExtractionResult};

use crate::error::{ProviderError, ProviderResult};
use crate::{Embedder, Extractor};

/// Embedder/extractor backed by a remote cloud LLM, following the same
/// `async_openai::Client` usage as the platform's embedding service
/// (`embedding/src/services/llm/openai.rs`).
pub struct CloudProvider {
    client: OpenAiClient<OpenAIConfig>,
    embedding_model: String,
    chat_model: String,
    dims: usize,
}

impl CloudProvider {
    pub fn new(api_key: String, embedding_model: String, dims: usize) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key);
        Self {
            client: OpenAiClient::with_config(config),
            embedding_model,
            chat_model: "gpt-4o-mini".to_string(),
            dims,
        }
    }

    pub fn with_chat_model(mut self, model: impl Into<String>) -> Self {
        self.chat_model = model.into();
        self
    }
}

#[async_trait]
impl Embedder for CloudProvider {
    async fn embed(&self, texts: &[String]) -> ProviderResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.embedding_model)
            .input(texts.to_vec())
            .build()
            .map_err(|e| ProviderError::InvalidRequest(e.to_string()))?;

        let response = self.client.embeddings().create(request).await.map_err(|e| {
            ProviderError::Unavailable(format!("openai embeddings: {e}"))
        })?;

        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        &self.embedding_model
    }
}

/// Shape the extractor asks the chat model to return — mirrors
/// `ExtractionResult` so the response deserializes directly.
#[derive(Debug, Deserialize)]
struct ExtractionResponse {
    #[serde(default)]
    concepts: Vec<ExtractedConceptResponse>,
    #[serde(default)]
    relationships: Vec<ExtractedRelationship>,
}

#[derive(Debug, Deserialize)]
struct ExtractedConceptResponse {
    label: String,
    #[serde(default)]
    search_terms: Vec<String>,
    #[serde(default)]
    description: Option<String>,
    quote: String,
}

fn extraction_prompt(chunk_text: &str, context: &ExtractionContext) -> String {
    let context_block = if context.recent_concepts.is_empty() {
        "none".to_string()
    } else {
        context
            .recent_concepts
            .iter()
            .map(|c| format!("- {} ({})", c.label, c.description.as_deref().unwrap_or("")))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "Extract concepts and typed relationships from the passage below. \
         Respond with strict JSON matching {{concepts: [{{label, search_terms, description, quote}}], \
         relationships: [{{from_label, to_label, relation_type, confidence}}]}}.\n\n\
         Previously extracted concepts in this ontology (for continuity):\n{context_block}\n\n\
         Passage:\n{chunk_text}"
    )
}

#[async_trait]
impl Extractor for CloudProvider {
    async fn extract(&self, chunk_text: &str, context: &ExtractionContext) -> ProviderResult<ExtractionResult> {
        use async_openai::types::{
            ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
            CreateChatCompletionRequestArgs, ResponseFormat,
        };

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.chat_model)
            .response_format(ResponseFormat::JsonObject)
            .messages(vec![
                ChatCompletionRequestSystemMessageArgs::default()
                    .content("You extract a knowledge graph of concepts and relationships from text.")
                    .build()
                    .map_err(|e| ProviderError::InvalidRequest(e.to_string()))?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(extraction_prompt(chunk_text, context))
                    .build()
                    .map_err(|e| ProviderError::InvalidRequest(e.to_string()))?
                    .into(),
            ])
            .build()
            .map_err(|e| ProviderError::InvalidRequest(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| ProviderError::Unavailable(format!("openai chat: {e}")))?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::Unavailable("empty chat completion".to_string()))?;

        let parsed: ExtractionResponse = serde_json::from_str(&content)?;

        Ok(ExtractionResult {
            concepts: parsed
                .concepts
                .into_iter()
                .map(|c| ExtractedConcept {
                    label: c.label,
                    search_terms: c.search_terms,
                    description: c.description,
                    quote: c.quote,
                })
                .collect(),
            relationships: parsed.relationships,
        })
    }
}
