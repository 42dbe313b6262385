// src/extract.rs
//
// Document text extraction. PDFs go through the pdf-extract crate; pages
// with embedded images can be routed through the vision model for OCR.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::generator::InsightGenerator;

const OCR_INSTRUCTION: &str =
    "Extract all readable text from this image exactly as written. \
     Return only the extracted text.";

/// One extracted page. `images` holds raw bytes of embedded images that
/// plain text extraction could not read.
#[derive(Debug, Clone)]
pub struct PageText {
    pub page: usize,
    pub text: String,
    pub images: Vec<Vec<u8>>,
}

/// Per-format extraction seam. The bundled implementation handles PDFs;
/// other formats plug in behind the same trait.
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract_pages(&self, data: &[u8]) -> Result<Vec<PageText>, PipelineError>;
}

#[derive(Default)]
pub struct PdfTextExtractor;

impl PdfTextExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DocumentExtractor for PdfTextExtractor {
    async fn extract_pages(&self, data: &[u8]) -> Result<Vec<PageText>, PipelineError> {
        let text = pdf_extract::extract_text_from_mem(data)
            .map_err(|e| PipelineError::Validation(format!("unreadable PDF: {}", e)))?;

        // Page breaks come through as form feeds when the document has
        // them; otherwise the whole text is one page.
        let pages: Vec<PageText> = if text.contains('\u{c}') {
            text.split('\u{c}')
                .enumerate()
                .map(|(i, page_text)| PageText {
                    page: i + 1,
                    text: page_text.to_string(),
                    images: Vec::new(),
                })
                .collect()
        } else {
            vec![PageText {
                page: 1,
                text,
                images: Vec::new(),
            }]
        };

        info!(page_count = pages.len(), "Extracted PDF text");
        Ok(pages)
    }
}

/// Runs embedded images through the vision model and collects the text.
/// Per-image failures are logged and skipped so one bad image never sinks
/// a page.
pub struct OcrProcessor {
    generator: Arc<InsightGenerator>,
}

impl OcrProcessor {
    pub fn new(generator: Arc<InsightGenerator>) -> Self {
        Self { generator }
    }

    pub async fn process_images(&self, images: &[Vec<u8>]) -> String {
        let mut texts = Vec::new();

        for (i, image) in images.iter().enumerate() {
            let encoded = STANDARD.encode(image);
            match self
                .generator
                .analyze_image(&encoded, media_type(image), OCR_INSTRUCTION)
                .await
            {
                Ok(text) if !text.trim().is_empty() => {
                    debug!(image = i, chars = text.len(), "OCR extracted text");
                    texts.push(text);
                }
                Ok(_) => debug!(image = i, "OCR found no text"),
                Err(e) => warn!(image = i, error = %e, "OCR failed, skipping image"),
            }
        }

        texts.join("\n\n")
    }
}

/// Sniff the media type from magic bytes, defaulting to PNG.
fn media_type(data: &[u8]) -> &'static str {
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if data.starts_with(b"GIF8") {
        "image/gif"
    } else if data.len() > 11 && &data[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "image/png"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{LlmClient, LlmError};
    use serde_json::{json, Value};

    struct OcrLlm;

    #[async_trait]
    impl LlmClient for OcrLlm {
        async fn invoke(&self, _model_id: &str, request: Value) -> Result<Value, LlmError> {
            // Vision requests carry an image block.
            let blocks = request["messages"][0]["content"].as_array().unwrap();
            assert_eq!(blocks[0]["type"], "image");
            let media = blocks[0]["source"]["media_type"].as_str().unwrap();
            Ok(json!({
                "content": [{ "type": "text", "text": format!("text from {}", media) }]
            }))
        }
    }

    struct FailingLlm;

    #[async_trait]
    impl LlmClient for FailingLlm {
        async fn invoke(&self, _model_id: &str, _request: Value) -> Result<Value, LlmError> {
            Err(LlmError::Transport("down".to_string()))
        }
    }

    #[test]
    fn media_type_sniffing() {
        assert_eq!(media_type(&[0xFF, 0xD8, 0xFF, 0xE0]), "image/jpeg");
        assert_eq!(media_type(b"GIF89a"), "image/gif");
        assert_eq!(media_type(&[0x89, 0x50, 0x4E, 0x47]), "image/png");
    }

    #[tokio::test]
    async fn ocr_joins_image_texts() {
        let generator = Arc::new(InsightGenerator::new(
            Arc::new(OcrLlm),
            "anthropic.claude-3-sonnet",
            4096,
        ));
        let ocr = OcrProcessor::new(generator);

        let images = vec![vec![0xFF, 0xD8, 0xFF, 0xE0], vec![0x89, 0x50, 0x4E, 0x47]];
        let text = ocr.process_images(&images).await;
        assert_eq!(text, "text from image/jpeg\n\ntext from image/png");
    }

    #[tokio::test]
    async fn ocr_failures_are_skipped() {
        let generator = Arc::new(InsightGenerator::new(
            Arc::new(FailingLlm),
            "anthropic.claude-3-sonnet",
            4096,
        ));
        let ocr = OcrProcessor::new(generator);

        let text = ocr.process_images(&[vec![1, 2, 3]]).await;
        assert!(text.is_empty());
    }
}
