// src/generator.rs
//
// Turns retrieved context chunks plus a user prompt into structured
// insights via the generation model. Two prompt shapes: a structured-JSON
// contract for analytical questions and a free-format contract when the
// prompt asks for a specific output style (html, a table, markdown).

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::services::LlmClient;
use crate::vector_store::QueryResult;

/// Prompt substrings that switch generation to the free-format contract.
const FORMAT_KEYWORDS: [&str; 6] = ["html", "markdown", "table", "list", "format as", "generate a"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightFormat {
    Json,
    Html,
    Markdown,
    Text,
}

/// Generated insights: either structured JSON or a raw document in the
/// format the prompt asked for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insights {
    pub format: InsightFormat,
    pub payload: Value,
}

pub struct InsightGenerator {
    llm: Arc<dyn LlmClient>,
    model_id: String,
    max_tokens: usize,
    temperature: f64,
}

impl InsightGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, model_id: &str, max_tokens: usize) -> Self {
        Self {
            llm,
            model_id: model_id.to_string(),
            max_tokens,
            // Insight extraction wants deterministic, grounded answers.
            temperature: 0.0,
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Generate insights for a prompt from the retrieved chunks.
    pub async fn generate(
        &self,
        prompt: &str,
        chunks: &[QueryResult],
    ) -> Result<Insights, PipelineError> {
        let context = build_context(chunks);
        let custom_format = wants_custom_format(prompt);

        let full_prompt = if custom_format {
            free_format_prompt(prompt, &context)
        } else {
            structured_prompt(prompt, &context)
        };

        debug!(
            model_id = %self.model_id,
            chunk_count = chunks.len(),
            custom_format,
            "Generating insights"
        );

        let request = self.build_request(&full_prompt);
        let response = self
            .llm
            .invoke(&self.model_id, request)
            .await
            .map_err(|e| PipelineError::Llm(e.to_string()))?;

        let text = completion_text(&response)
            .ok_or_else(|| PipelineError::Llm("empty model response".to_string()))?;

        let insights = if custom_format {
            wrap_raw(&text)
        } else {
            match extract_json(&text) {
                Some(payload) => Insights {
                    format: InsightFormat::Json,
                    payload: backfill(payload),
                },
                None => {
                    warn!("Model response carried no JSON object, returning raw");
                    wrap_raw(&text)
                }
            }
        };

        info!(format = ?insights.format, "Generated insights");
        Ok(insights)
    }

    /// Describe an image through the vision model. Returns the model's
    /// textual description.
    pub async fn analyze_image(
        &self,
        image_base64: &str,
        media_type: &str,
        instruction: &str,
    ) -> Result<String, PipelineError> {
        let request = json!({
            "anthropic_version": "bedrock-2023-05-31",
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "messages": [{
                "role": "user",
                "content": [
                    {
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": media_type,
                            "data": image_base64,
                        },
                    },
                    { "type": "text", "text": instruction },
                ],
            }],
        });

        let response = self
            .llm
            .invoke(&self.model_id, request)
            .await
            .map_err(|e| PipelineError::Llm(e.to_string()))?;

        completion_text(&response)
            .ok_or_else(|| PipelineError::Llm("empty vision response".to_string()))
    }

    /// Model-family specific request body. Claude models take a messages
    /// array; other families take a flat prompt.
    fn build_request(&self, prompt: &str) -> Value {
        if self.model_id.contains("claude") {
            json!({
                "anthropic_version": "bedrock-2023-05-31",
                "max_tokens": self.max_tokens,
                "temperature": self.temperature,
                "messages": [{
                    "role": "user",
                    "content": [{ "type": "text", "text": prompt }],
                }],
            })
        } else {
            json!({
                "prompt": prompt,
                "maxTokens": self.max_tokens,
                "temperature": self.temperature,
            })
        }
    }
}

/// Whether the prompt asks for a specific output format rather than a
/// structured analysis.
pub fn wants_custom_format(prompt: &str) -> bool {
    let lowered = prompt.to_lowercase();
    FORMAT_KEYWORDS.iter().any(|kw| lowered.contains(kw))
}

fn build_context(chunks: &[QueryResult]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| format!("Context Chunk {}:\n{}", i + 1, chunk.text_chunk))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

fn structured_prompt(prompt: &str, context: &str) -> String {
    format!(
        "You are a document analysis assistant. Answer the question using only \
         the provided document excerpts.\n\n{}\n\nQuestion: {}\n\n\
         Respond with a single JSON object with these fields:\n\
         - \"summary\": a concise summary relevant to the question\n\
         - \"keyPoints\": an array of the most important points\n\
         - \"entities\": an array of named entities mentioned\n\
         - \"answer\": a direct answer to the question\n\
         - \"confidence\": your confidence in the answer from 0.0 to 1.0\n\
         Return only the JSON object, no surrounding text.",
        context, prompt
    )
}

fn free_format_prompt(prompt: &str, context: &str) -> String {
    format!(
        "You are a document analysis assistant. Use only the provided document \
         excerpts.\n\n{}\n\nRequest: {}\n\n\
         Produce exactly the output the request asks for, in the requested \
         format, with no surrounding explanation.",
        context, prompt
    )
}

/// Completion text from either a Claude-shaped or flat-text response.
fn completion_text(response: &Value) -> Option<String> {
    if let Some(content) = response.get("content").and_then(Value::as_array) {
        let text: String = content
            .iter()
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("");
        if !text.trim().is_empty() {
            return Some(text);
        }
        return None;
    }
    response
        .get("completion")
        .or_else(|| response.get("outputText"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
}

/// The JSON object spanning the first '{' to the last '}' of the text,
/// if it parses. Models often wrap JSON in prose or code fences.
fn extract_json(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    let candidate = &text[start..=end];
    serde_json::from_str::<Value>(candidate)
        .ok()
        .filter(Value::is_object)
}

/// Fill in any structured fields the model omitted so consumers can rely
/// on the shape.
fn backfill(payload: Value) -> Value {
    let mut object = match payload {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("answer".to_string(), other);
            map
        }
    };

    object.entry("summary").or_insert_with(|| json!(""));
    object.entry("keyPoints").or_insert_with(|| json!([]));
    object.entry("entities").or_insert_with(|| json!([]));
    object.entry("answer").or_insert_with(|| json!(""));
    object.entry("confidence").or_insert_with(|| json!(0.5));
    object.entry("metadata").or_insert_with(|| json!({}));

    Value::Object(object)
}

/// Wrap a raw model response in the insights envelope, classifying its
/// format from the leading characters.
fn wrap_raw(text: &str) -> Insights {
    let trimmed = text.trim();
    let format = if trimmed.starts_with('<') {
        InsightFormat::Html
    } else if trimmed.contains("```") || trimmed.starts_with('#') {
        InsightFormat::Markdown
    } else {
        InsightFormat::Text
    };

    Insights {
        format,
        payload: json!({
            "summary": "",
            "keyPoints": [],
            "entities": [],
            "answer": trimmed,
            "rawResponse": trimmed,
            "confidence": 1.0,
            "metadata": {
                "format": format,
                "isRawResponse": true,
                "relevance": "custom",
            },
        }),
    }
}
