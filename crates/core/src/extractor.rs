use crate::error::ExtractionError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use lopdf::Document;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

/// Raw document bytes in, plain text out.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_text(&self, source_name: &str, bytes: &[u8])
        -> Result<String, ExtractionError>;
}

#[async_trait]
impl<T: TextExtractor + ?Sized> TextExtractor for Box<T> {
    async fn extract_text(
        &self,
        source_name: &str,
        bytes: &[u8],
    ) -> Result<String, ExtractionError> {
        (**self).extract_text(source_name, bytes).await
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl LopdfExtractor {
    pub fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<PageText>, ExtractionError> {
        let document =
            Document::load_mem(bytes).map_err(|error| ExtractionError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| ExtractionError::PdfParse(error.to_string()))?;

            if !text.trim().is_empty() {
                pages.push(PageText {
                    number: page_no,
                    text,
                });
            }
        }

        Ok(pages)
    }
}

#[async_trait]
impl TextExtractor for LopdfExtractor {
    async fn extract_text(
        &self,
        _source_name: &str,
        bytes: &[u8],
    ) -> Result<String, ExtractionError> {
        // Image-only PDFs parse fine but carry no text layer; they come back
        // empty rather than as an error.
        let pages = self.extract_pages(bytes)?;
        Ok(join_pages(&pages))
    }
}

fn join_pages(pages: &[PageText]) -> String {
    pages
        .iter()
        .map(|page| page.text.trim())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[derive(Debug, Clone)]
pub struct OcrEndpointConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
}

impl OcrEndpointConfig {
    /// Reads `LLM_OCR_ENDPOINT` / `LLM_OCR_API_KEY`; `None` when no endpoint is set.
    pub fn from_env() -> Option<Self> {
        let endpoint = std::env::var("LLM_OCR_ENDPOINT").ok()?;
        let endpoint = endpoint.trim().to_string();
        if endpoint.is_empty() {
            return None;
        }

        let api_key = std::env::var("LLM_OCR_API_KEY")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|key| !key.is_empty());

        Some(Self { endpoint, api_key })
    }
}

#[derive(Debug, Clone, Serialize)]
struct LlmOcrRequest {
    pdf_base64: String,
    source_path: String,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOcrResponse {
    pages: Option<Vec<LlmOcrPage>>,
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOcrPage {
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    text: Option<String>,
}

/// Falls back to a multimodal OCR endpoint when the primary extractor cannot
/// parse a document (scanned letters, broken xref tables).
pub struct OcrFallbackExtractor<P> {
    primary: P,
    ocr: Option<OcrEndpointConfig>,
    client: Client,
}

impl<P: TextExtractor> OcrFallbackExtractor<P> {
    pub fn new(primary: P, ocr: Option<OcrEndpointConfig>) -> Self {
        Self {
            primary,
            ocr,
            client: Client::new(),
        }
    }

    async fn extract_with_ocr(
        &self,
        config: &OcrEndpointConfig,
        source_name: &str,
        bytes: &[u8],
    ) -> Result<String, ExtractionError> {
        let payload = LlmOcrRequest {
            pdf_base64: STANDARD.encode(bytes),
            source_path: source_name.to_string(),
        };

        let mut request = self.client.post(&config.endpoint).json(&payload);
        if let Some(api_key) = &config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ExtractionError::OcrFailed(format!(
                "multimodal OCR request to {} returned {}",
                config.endpoint,
                response.status()
            )));
        }

        let payload: LlmOcrResponse = response.json().await?;
        let pages = payload_to_pages(&payload, source_name)?;
        Ok(join_pages(&pages))
    }
}

#[async_trait]
impl<P: TextExtractor> TextExtractor for OcrFallbackExtractor<P> {
    async fn extract_text(
        &self,
        source_name: &str,
        bytes: &[u8],
    ) -> Result<String, ExtractionError> {
        match self.primary.extract_text(source_name, bytes).await {
            Ok(text) if !text.trim().is_empty() => Ok(text),
            Ok(blank) => match &self.ocr {
                None => Ok(blank),
                Some(config) => match self.extract_with_ocr(config, source_name, bytes).await {
                    Ok(text) => Ok(text),
                    Err(ocr_error) => {
                        warn!(document = source_name, error = %ocr_error, "OCR of text-less pdf failed");
                        Ok(blank)
                    }
                },
            },
            Err(ExtractionError::PdfParse(parse_error)) => match &self.ocr {
                None => Err(ExtractionError::PdfParse(parse_error)),
                Some(config) => self
                    .extract_with_ocr(config, source_name, bytes)
                    .await
                    .map_err(|ocr_error| {
                        ExtractionError::PdfParse(format!(
                            "{parse_error}; multimodal OCR fallback failed: {ocr_error}"
                        ))
                    }),
            },
            Err(error) => Err(error),
        }
    }
}

fn payload_to_pages(
    payload: &LlmOcrResponse,
    source_name: &str,
) -> Result<Vec<PageText>, ExtractionError> {
    if let Some(listed) = &payload.pages {
        let listed = listed
            .iter()
            .filter_map(|page| {
                let text = page.text.as_deref().map(str::trim).unwrap_or_default();
                if text.is_empty() {
                    None
                } else {
                    Some(PageText {
                        number: page.page.unwrap_or(1),
                        text: text.to_string(),
                    })
                }
            })
            .collect::<Vec<_>>();

        if !listed.is_empty() {
            return Ok(listed);
        }
    }

    if let Some(raw_text) = &payload.text {
        let pages = raw_text
            .split('\u{000c}')
            .enumerate()
            .filter_map(|(index, chunk)| {
                let normalized = chunk.trim();
                if normalized.is_empty() {
                    None
                } else {
                    Some(PageText {
                        number: (index + 1) as u32,
                        text: normalized.to_string(),
                    })
                }
            })
            .collect::<Vec<_>>();

        if !pages.is_empty() {
            return Ok(pages);
        }
    }

    Err(ExtractionError::OcrFailed(format!(
        "multimodal OCR response was empty for {source_name}"
    )))
}
