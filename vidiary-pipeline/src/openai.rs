use std::path::Path;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use vidiary_core::Settings;
use vidiary_index::{EmbeddingModel, IndexError, IndexResult};

use crate::collab::{LanguageModel, SpeechRecognizer, TranscribedSpan};
use crate::retry::with_rate_limit_retry;
use crate::{PipelineError, PipelineResult};

/// OpenAI-compatible HTTP client covering the three model calls the
/// pipeline makes: chat summarization, audio transcription, and batch
/// embeddings. Rate limits surface as [`PipelineError::RateLimited`] with
/// the server message preserved, so the retry loop can honor advised
/// intervals.
pub struct OpenAiClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    chat_model: String,
    asr_model: String,
    embedding_model: String,
    embedding_max_retries: u32,
}

impl OpenAiClient {
    pub fn new(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        chat_model: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into(),
            api_key: api_key.into(),
            chat_model: chat_model.into(),
            asr_model: "whisper-1".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_max_retries: 3,
        }
    }

    pub fn from_settings(settings: &Settings) -> PipelineResult<Self> {
        let api_key = settings
            .llm_api_key
            .clone()
            .ok_or_else(|| PipelineError::llm("OPENAI_API_KEY is not configured"))?;
        Ok(Self {
            http: reqwest::Client::new(),
            api_base: settings.llm_api_base.clone(),
            api_key,
            chat_model: settings.llm_model.clone(),
            asr_model: settings.asr_model.clone(),
            embedding_model: settings.embedding_model.clone(),
            embedding_max_retries: settings.embedding_max_retries,
        })
    }

    pub fn with_asr_model(mut self, model: impl Into<String>) -> Self {
        self.asr_model = model.into();
        self
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    async fn check_status(response: reqwest::Response) -> PipelineResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(PipelineError::rate_limited(body));
        }
        Err(PipelineError::llm(format!("{status}: {body}")))
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    async fn summarize(&self, system_prompt: &str, user_prompt: &str) -> PipelineResult<String> {
        debug!(model = %self.chat_model, "requesting chat completion");
        let response = self
            .http
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.chat_model,
                "messages": [
                    {"role": "system", "content": system_prompt},
                    {"role": "user", "content": user_prompt},
                ],
                "temperature": 0.3,
                "max_tokens": 1000,
            }))
            .send()
            .await
            .map_err(|e| PipelineError::llm(format!("request failed: {e}")))?;

        let response = Self::check_status(response).await?;
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::llm(format!("unparseable response: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| PipelineError::llm("response carried no content"))
    }
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: Option<String>,
    #[serde(default)]
    segments: Vec<TranscriptionSegment>,
}

#[derive(Deserialize)]
struct TranscriptionSegment {
    start: f64,
    end: f64,
    text: String,
}

#[async_trait]
impl SpeechRecognizer for OpenAiClient {
    async fn transcribe(
        &self,
        audio_path: &Path,
        language: Option<&str>,
    ) -> PipelineResult<Vec<TranscribedSpan>> {
        let audio = tokio::fs::read(audio_path).await?;
        debug!(model = %self.asr_model, bytes = audio.len(), "requesting transcription");

        let file = Part::bytes(audio)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| PipelineError::llm(format!("invalid upload part: {e}")))?;
        let mut form = Form::new()
            .part("file", file)
            .text("model", self.asr_model.clone())
            .text("response_format", "verbose_json");
        if let Some(language) = language {
            form = form.text("language", language.to_string());
        }

        let response = self
            .http
            .post(format!("{}/audio/transcriptions", self.api_base))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| PipelineError::llm(format!("request failed: {e}")))?;

        let response = Self::check_status(response).await?;
        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::llm(format!("unparseable response: {e}")))?;

        if parsed.segments.is_empty() {
            // Some models only return the flat text
            return Ok(parsed
                .text
                .filter(|t| !t.trim().is_empty())
                .map(|text| {
                    vec![TranscribedSpan {
                        start: 0.0,
                        end: 0.0,
                        text,
                    }]
                })
                .unwrap_or_default());
        }

        Ok(parsed
            .segments
            .into_iter()
            .map(|segment| TranscribedSpan {
                start: segment.start,
                end: segment.end,
                text: segment.text.trim().to_string(),
            })
            .collect())
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

impl OpenAiClient {
    async fn embed_once(&self, texts: &[String]) -> PipelineResult<Vec<Vec<f32>>> {
        let response = self
            .http
            .post(format!("{}/embeddings", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.embedding_model,
                "input": texts,
            }))
            .send()
            .await
            .map_err(|e| PipelineError::llm(format!("request failed: {e}")))?;

        let response = Self::check_status(response).await?;
        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::llm(format!("unparseable response: {e}")))?;
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingModel for OpenAiClient {
    async fn embed(&self, texts: &[String]) -> IndexResult<Vec<Vec<f32>>> {
        with_rate_limit_retry(self.embedding_max_retries.max(1), || self.embed_once(texts))
            .await
            .map_err(|e| IndexError::embedding(e.to_string()))
    }
}
