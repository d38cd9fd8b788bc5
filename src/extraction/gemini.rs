//! Gemini-powered invoice extraction
//!
//! Calls the Gemini vision model to turn invoice text and images into
//! structured records. Uses a long-lived reqwest::Client for connection
//! pooling. All failures are absorbed into `Extraction::failed` so the
//! workflow engine never sees an extraction exception.

use crate::error::WorkflowError;
use crate::models::{Attachment, ChatMessage, InvoiceRecord, MessageRole};
use crate::Result;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, warn};

use super::{Extraction, ExtractionService};

/// Reusable Gemini extraction client (connection-pooled)
pub struct GeminiExtractor {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiExtractor {
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            api_key,
            base_url: "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent".to_string(),
        }
    }

    /// Build the extraction prompt with the existing records as
    /// reconciliation context
    fn build_prompt(
        message_log: &[ChatMessage],
        existing: &[InvoiceRecord],
        attachment_count: usize,
    ) -> String {
        let latest = message_log
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        let existing_json =
            serde_json::to_string_pretty(existing).unwrap_or_else(|_| "[]".to_string());

        let merge_instructions = if attachment_count > 0 {
            format!(
                "{} invoice document(s) are attached. Extract one record per \
                 attached invoice and return ONLY the newly extracted records \
                 in \"invoices\" (do not repeat previously accepted records).",
                attachment_count
            )
        } else if existing.is_empty() {
            "Extract the invoice record(s) described in the user message and \
             return them in \"invoices\"."
                .to_string()
        } else {
            "PREVIOUSLY ACCEPTED RECORDS are listed below. Decide whether the \
             user message is a targeted correction (e.g. \"change/fix/update \
             X to Y\") or a new submission. For a correction, return the FULL \
             array with the same length, altering only the mentioned field(s) \
             on the targeted record and copying every other value unchanged. \
             For a new submission, return the FULL array with the new record \
             appended. Never drop a previously accepted record."
                .to_string()
        };

        format!(
            r#"You are an expert invoice extraction engine for an expense
reimbursement system.

{merge}

PREVIOUSLY ACCEPTED RECORDS:
{existing}

LATEST USER MESSAGE:
{latest}

Field requirements per record:
- tax_id, company_name, vendor_name: strings ("" when not found)
- invoice_date: YYYY-MM-DD ("" when not found)
- total_amount: number only (0 when not found)
- items: free-text description of the purchased items
- invoice_number: string or null
- currency: 3-letter code, default "USD"

Rules:
- Return ONLY valid JSON
- No explanation text
- JSON format:

{{
  "invoices": [
    {{
      "tax_id": "...",
      "company_name": "...",
      "vendor_name": "...",
      "invoice_date": "YYYY-MM-DD",
      "total_amount": 0.00,
      "items": "...",
      "invoice_number": null,
      "currency": "USD"
    }}
  ]
}}
"#,
            merge = merge_instructions,
            existing = existing_json,
            latest = latest,
        )
    }

    async fn call_api(&self, prompt: String, attachments: &[Attachment]) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(WorkflowError::ExtractionError(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let url = format!("{}?key={}", self.base_url, self.api_key);

        let mut parts = vec![Part::text(prompt)];
        for attachment in attachments {
            parts.push(Part::inline(
                attachment.mime_type.clone(),
                BASE64.encode(&attachment.data),
            ));
        }

        let request = GeminiRequest {
            contents: vec![Content { parts }],
            generation_config: GenerationConfig {
                temperature: 0.1,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 2048,
            },
        };

        info!(attachment_count = attachments.len(), "Calling Gemini API");

        let response = self.client.post(&url).json(&request).send().await.map_err(|e| {
            error!("Gemini API request failed: {}", e);
            WorkflowError::ExtractionError(format!("Gemini API error: {}", e))
        })?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Gemini API error response: {}", error_text);
            return Err(WorkflowError::ExtractionError(format!(
                "Gemini API error: {}",
                error_text
            )));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            WorkflowError::ExtractionError(format!("Gemini parse error: {}", e))
        })?;

        let text = gemini_response
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.clone())
            .ok_or_else(|| {
                WorkflowError::ExtractionError("Empty response from Gemini".to_string())
            })?;

        Ok(text)
    }
}

#[async_trait]
impl ExtractionService for GeminiExtractor {
    async fn extract(
        &self,
        message_log: &[ChatMessage],
        existing: &[InvoiceRecord],
        attachments: &[Attachment],
    ) -> Extraction {
        let prompt = Self::build_prompt(message_log, existing, attachments.len());

        let response = match self.call_api(prompt, attachments).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Extraction call failed: {}", e);
                return Extraction::failed(e.to_string());
            }
        };

        match parse_invoice_response(&response) {
            Ok(invoices) => Extraction::ok(invoices),
            Err(e) => {
                warn!("Extraction output unparseable: {}", e);
                Extraction::failed(format!("Unparseable extraction output: {}", e))
            }
        }
    }
}

/// Parse the invoice array out of the model reply (fenced block or bare
/// JSON object)
fn parse_invoice_response(response: &str) -> Result<Vec<InvoiceRecord>> {
    let cleaned = match response.find("```json") {
        Some(start) => {
            let after_fence = &response[start + 7..];
            match after_fence.find("```") {
                Some(end) => after_fence[..end].trim(),
                None => after_fence.trim(),
            }
        }
        None => {
            let start = response.find('{').ok_or_else(|| {
                WorkflowError::ExtractionError("No JSON object in response".to_string())
            })?;
            let end = response.rfind('}').ok_or_else(|| {
                WorkflowError::ExtractionError("Unterminated JSON object".to_string())
            })?;
            response[start..=end].trim()
        }
    };

    let json: serde_json::Value = serde_json::from_str(cleaned).map_err(|e| {
        WorkflowError::ExtractionError(format!("Invalid extraction JSON: {}", e))
    })?;

    let invoices_json = json
        .get("invoices")
        .ok_or_else(|| WorkflowError::ExtractionError("No invoices key in response".to_string()))?
        .clone();

    let invoices: Vec<InvoiceRecord> = serde_json::from_value(invoices_json).map_err(|e| {
        WorkflowError::ExtractionError(format!("Invoice records malformed: {}", e))
    })?;

    Ok(invoices)
}

//
// ================= Wire Types =================
//

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(rename = "inline_data", skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

impl Part {
    fn text(text: String) -> Self {
        Self {
            text: Some(text),
            inline_data: None,
        }
    }

    fn inline(mime_type: String, data: String) -> Self {
        Self {
            text: None,
            inline_data: Some(InlineData { mime_type, data }),
        }
    }
}

#[derive(Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}
