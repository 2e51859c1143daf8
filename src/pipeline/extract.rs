//! Structured extraction: tables and OCR through a vision model.
//!
//! Every request is schema-constrained: the service is told to reply with
//! `application/json` matching a schema from [`crate::prompts`], and the
//! reply still goes through [`crate::pipeline::repair`] because models do
//! not always comply.
//!
//! ## Credential resolution
//!
//! 1. A backend injected via [`ConversionConfig::backend`] is used as-is.
//! 2. Otherwise an HTTP backend is built from [`ConversionConfig::api_key`].
//! 3. Otherwise from the first non-empty variable in
//!    [`ConversionConfig::api_key_vars`].
//!
//! If none applies the job fails with [`DocMorphError::MissingCredential`]
//! before any request is sent.

use crate::config::ConversionConfig;
use crate::error::DocMorphError;
use crate::pipeline::repair::parse_repaired;
use crate::prompts::{
    ocr_schema, table_schema, OCR_INSTRUCTION, TABLE_INSTRUCTION, TABLE_SYSTEM_INSTRUCTION,
};
use crate::types::{BoundingBox, EncodedImage, ExtractedTable, OcrBlock};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Which model tier a table request uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Accuracy {
    /// Fast model; one image per request.
    #[default]
    Fast,
    /// Accurate model; whole documents.
    High,
}

/// How a list of images is split into requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestBatching {
    /// All images in a single request.
    AllImages,
    /// One request per image, sent sequentially.
    PerImage,
}

/// Tables are extracted from every page at once so the model can merge
/// tables that span pages.
pub const TABLE_BATCHING: RequestBatching = RequestBatching::AllImages;

/// OCR boxes are per image, so each page is its own request.
pub const OCR_BATCHING: RequestBatching = RequestBatching::PerImage;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// One schema-constrained generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub model: String,
    pub system_instruction: Option<String>,
    pub images: Vec<EncodedImage>,
    pub instruction: String,
    pub response_schema: Value,
}

/// A remote vision model that answers [`GenerationRequest`]s with raw text.
#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<String, DocMorphError>;
}

// ── Response shapes ──────────────────────────────────────────────────────

/// The shape a reply is parsed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionTask {
    Tables,
    Ocr,
}

/// A parsed reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionPayload {
    Tables(Vec<ExtractedTable>),
    Ocr(Vec<OcrBlock>),
}

#[derive(Deserialize)]
struct OcrEnvelope {
    #[serde(default)]
    blocks: Vec<WireBlock>,
}

#[derive(Deserialize)]
struct WireBlock {
    #[serde(default)]
    text: Value,
    #[serde(default)]
    box_2d: Vec<f64>,
}

impl ExtractionTask {
    /// Text substituted for an empty reply.
    pub fn empty_shape(self) -> &'static str {
        match self {
            ExtractionTask::Tables => "[]",
            ExtractionTask::Ocr => "{}",
        }
    }

    /// Run the repair chain and parse into this task's shape.
    pub fn parse(self, raw: &str) -> Result<ExtractionPayload, DocMorphError> {
        match self {
            ExtractionTask::Tables => {
                let tables: Vec<ExtractedTable> = parse_repaired(raw, self.empty_shape())?;
                Ok(ExtractionPayload::Tables(tables))
            }
            ExtractionTask::Ocr => {
                let envelope: OcrEnvelope = parse_repaired(raw, self.empty_shape())?;
                let mut blocks = Vec::with_capacity(envelope.blocks.len());
                for block in envelope.blocks {
                    let text = match block.text {
                        Value::String(s) => s,
                        Value::Null => continue,
                        other => other.to_string(),
                    };
                    let [a, b, c, d] = match block.box_2d[..] {
                        [a, b, c, d, ..] => [a, b, c, d],
                        _ => {
                            warn!("Dropping OCR block without a 4-value box: {:?}", text);
                            continue;
                        }
                    };
                    if text.trim().is_empty() {
                        continue;
                    }
                    blocks.push(OcrBlock {
                        text,
                        bbox: BoundingBox::from_wire([a, b, c, d]),
                    });
                }
                Ok(ExtractionPayload::Ocr(blocks))
            }
        }
    }
}

// ── Client ───────────────────────────────────────────────────────────────

/// Issues table and OCR requests against a resolved backend.
#[derive(Clone)]
pub struct ExtractionClient {
    backend: Arc<dyn ExtractionBackend>,
    fast_model: String,
    accurate_model: String,
    request_timeout_secs: u64,
}

impl fmt::Debug for ExtractionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionClient")
            .field("backend", &"<dyn ExtractionBackend>")
            .field("fast_model", &self.fast_model)
            .field("accurate_model", &self.accurate_model)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl ExtractionClient {
    pub fn new(
        backend: Arc<dyn ExtractionBackend>,
        fast_model: impl Into<String>,
        accurate_model: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            fast_model: fast_model.into(),
            accurate_model: accurate_model.into(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }

    /// Per-request deadline for the sequential OCR loop.
    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// Resolve a backend from the config. No network I/O happens here.
    pub fn from_config(config: &ConversionConfig) -> Result<Self, DocMorphError> {
        let backend = resolve_backend(config)?;
        Ok(Self::new(
            backend,
            config.fast_model.clone(),
            config.accurate_model.clone(),
        )
        .with_request_timeout(config.api_timeout_secs))
    }

    fn model_for(&self, accuracy: Accuracy) -> &str {
        match accuracy {
            Accuracy::Fast => &self.fast_model,
            Accuracy::High => &self.accurate_model,
        }
    }

    /// Extract tables from `images` in a single request.
    pub async fn extract_tables(
        &self,
        images: &[EncodedImage],
        accuracy: Accuracy,
    ) -> Result<Vec<ExtractedTable>, DocMorphError> {
        let model = self.model_for(accuracy).to_string();
        info!(
            "Extracting tables from {} image(s) with {}",
            images.len(),
            model
        );
        let start = Instant::now();
        let raw = self
            .backend
            .generate(GenerationRequest {
                model,
                system_instruction: Some(TABLE_SYSTEM_INSTRUCTION.to_string()),
                images: images.to_vec(),
                instruction: TABLE_INSTRUCTION.to_string(),
                response_schema: table_schema(),
            })
            .await?;
        debug!(
            "Table response: {} chars in {:?}",
            raw.len(),
            start.elapsed()
        );

        match ExtractionTask::Tables.parse(&raw)? {
            ExtractionPayload::Tables(tables) => Ok(tables),
            ExtractionPayload::Ocr(_) => Err(DocMorphError::Internal(
                "table request parsed as OCR".into(),
            )),
        }
    }

    /// OCR one image with the fast model.
    pub async fn ocr_image(&self, image: &EncodedImage) -> Result<Vec<OcrBlock>, DocMorphError> {
        let start = Instant::now();
        let raw = self
            .backend
            .generate(GenerationRequest {
                model: self.fast_model.clone(),
                system_instruction: None,
                images: vec![image.clone()],
                instruction: OCR_INSTRUCTION.to_string(),
                response_schema: ocr_schema(),
            })
            .await?;
        match ExtractionTask::Ocr.parse(&raw)? {
            ExtractionPayload::Ocr(blocks) => {
                debug!("OCR: {} block(s) in {:?}", blocks.len(), start.elapsed());
                Ok(blocks)
            }
            ExtractionPayload::Tables(_) => Err(DocMorphError::Internal(
                "OCR request parsed as tables".into(),
            )),
        }
    }

    /// OCR each image in turn; one block list per image, in input order.
    ///
    /// `on_image(index, total)` is called before each request. Each request
    /// fails with [`DocMorphError::Timeout`] after the client's deadline.
    pub async fn ocr(
        &self,
        images: &[EncodedImage],
        on_image: &(dyn Fn(usize, usize) + Send + Sync),
    ) -> Result<Vec<Vec<OcrBlock>>, DocMorphError> {
        let secs = self.request_timeout_secs;
        let mut out = Vec::with_capacity(images.len());
        for (i, image) in images.iter().enumerate() {
            on_image(i, images.len());
            let blocks = tokio::time::timeout(Duration::from_secs(secs), self.ocr_image(image))
                .await
                .map_err(|_| DocMorphError::Timeout {
                    stage: "OCR request".into(),
                    secs,
                })??;
            debug!("Image {}: {} OCR block(s)", i + 1, blocks.len());
            out.push(blocks);
        }
        Ok(out)
    }
}

/// Pick the backend for a job: injected, explicit key, then environment.
pub fn resolve_backend(config: &ConversionConfig) -> Result<Arc<dyn ExtractionBackend>, DocMorphError> {
    if let Some(backend) = &config.backend {
        debug!("Using injected extraction backend");
        return Ok(Arc::clone(backend));
    }

    let key = config
        .api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .or_else(|| {
            config.api_key_vars.iter().find_map(|var| {
                std::env::var(var)
                    .ok()
                    .filter(|v| !v.trim().is_empty())
                    .inspect(|_| debug!("Using API key from {}", var))
            })
        })
        .ok_or_else(|| DocMorphError::MissingCredential {
            vars: config.api_key_vars.join(", "),
        })?;

    let backend = GeminiBackend::new(&config.endpoint, key, config.api_timeout_secs)?;
    Ok(Arc::new(backend))
}

// ── HTTP backend ─────────────────────────────────────────────────────────

/// `generateContent` REST client.
pub struct GeminiBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    timeout_secs: u64,
}

impl fmt::Debug for GeminiBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiBackend")
            .field("endpoint", &self.endpoint)
            .field("timeout_secs", &self.timeout_secs)
            .finish_non_exhaustive()
    }
}

impl GeminiBackend {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, DocMorphError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| DocMorphError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            timeout_secs,
        })
    }

    fn url(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, model)
    }

    fn body(request: &GenerationRequest) -> Value {
        let mut parts: Vec<Value> = request
            .images
            .iter()
            .map(|img| {
                json!({
                    "inlineData": {
                        "mimeType": img.mime_type,
                        "data": img.to_base64(),
                    }
                })
            })
            .collect();
        parts.push(json!({ "text": request.instruction }));

        let mut body = json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": request.response_schema,
            }
        });
        if let Some(system) = &request.system_instruction {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }
        body
    }

    fn network_err(&self, e: reqwest::Error) -> DocMorphError {
        let message = if e.is_timeout() {
            format!("request timed out after {}s", self.timeout_secs)
        } else {
            e.to_string()
        };
        DocMorphError::NetworkOrAi { message }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

/// Pull `error.message` out of an error body, else the body itself.
fn upstream_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.chars().take(500).collect())
}

#[async_trait]
impl ExtractionBackend for GeminiBackend {
    async fn generate(&self, request: GenerationRequest) -> Result<String, DocMorphError> {
        let url = self.url(&request.model);
        debug!(
            "POST {} ({} image(s))",
            url,
            request.images.len()
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::body(&request))
            .send()
            .await
            .map_err(|e| self.network_err(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.network_err(e))?;
        if !status.is_success() {
            return Err(DocMorphError::NetworkOrAi {
                message: format!("HTTP {}: {}", status.as_u16(), upstream_message(&body)),
            });
        }

        let parsed: GenerateResponse =
            serde_json::from_str(&body).map_err(|e| DocMorphError::NetworkOrAi {
                message: format!("unexpected response envelope: {e}"),
            })?;

        let Some(candidate) = parsed.candidates.into_iter().next() else {
            let reason = parsed
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .unwrap_or_else(|| "no candidates returned".into());
            return Err(DocMorphError::NetworkOrAi {
                message: format!("request blocked: {reason}"),
            });
        };

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CellValue;
    use std::sync::Mutex;

    struct Canned {
        reply: String,
        seen: Mutex<Vec<GenerationRequest>>,
    }

    impl Canned {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ExtractionBackend for Canned {
        async fn generate(&self, request: GenerationRequest) -> Result<String, DocMorphError> {
            self.seen.lock().unwrap().push(request);
            Ok(self.reply.clone())
        }
    }

    fn img() -> EncodedImage {
        EncodedImage::new(vec![0xFF, 0xD8, 0xFF], "image/jpeg")
    }

    #[tokio::test]
    async fn tables_use_accurate_model_when_asked() {
        let backend = Canned::new(r#"[{"sheetName":"Q1","headers":["a"],"rows":[["1"]]}]"#);
        let client = ExtractionClient::new(backend.clone(), "fast", "pro");
        let tables = client
            .extract_tables(&[img(), img()], Accuracy::High)
            .await
            .unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].rows[0][0], CellValue::Text("1".into()));

        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen.len(), 1, "all images go in one request");
        assert_eq!(seen[0].model, "pro");
        assert_eq!(seen[0].images.len(), 2);
        assert!(seen[0].system_instruction.is_some());
    }

    #[tokio::test]
    async fn ocr_sends_one_request_per_image() {
        let backend = Canned::new(r#"{"blocks":[{"text":"Hi","box_2d":[10,20,30,40]}]}"#);
        let client = ExtractionClient::new(backend.clone(), "fast", "pro");
        let calls = Mutex::new(Vec::new());
        let pages = client
            .ocr(&[img(), img(), img()], &|i, total| calls.lock().unwrap().push((i, total)))
            .await
            .unwrap();
        assert_eq!(pages.len(), 3);
        assert_eq!(*calls.lock().unwrap(), vec![(0, 3), (1, 3), (2, 3)]);
        assert_eq!(pages[2][0].text, "Hi");
        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|r| r.model == "fast" && r.images.len() == 1));
    }

    struct Stalled;

    #[async_trait]
    impl ExtractionBackend for Stalled {
        async fn generate(&self, _request: GenerationRequest) -> Result<String, DocMorphError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_ocr_request_times_out() {
        let client = ExtractionClient::new(Arc::new(Stalled), "fast", "pro").with_request_timeout(7);
        let err = client.ocr(&[img()], &|_, _| {}).await.unwrap_err();
        assert!(matches!(err, DocMorphError::Timeout { secs: 7, .. }));
    }

    #[test]
    fn ocr_parse_drops_bad_boxes_and_clamps() {
        let raw = r#"{"blocks":[
            {"text":"ok","box_2d":[900,0,100,2000]},
            {"text":"short","box_2d":[1,2]},
            {"text":"   ","box_2d":[1,2,3,4]}
        ]}"#;
        let ExtractionPayload::Ocr(blocks) = ExtractionTask::Ocr.parse(raw).unwrap() else {
            panic!("wrong shape");
        };
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].bbox.ymin, 100.0);
        assert_eq!(blocks[0].bbox.xmax, 1000.0);
    }

    #[test]
    fn empty_reply_is_empty_payload() {
        assert_eq!(
            ExtractionTask::Tables.parse("").unwrap(),
            ExtractionPayload::Tables(vec![])
        );
        assert_eq!(
            ExtractionTask::Ocr.parse("").unwrap(),
            ExtractionPayload::Ocr(vec![])
        );
    }

    #[test]
    fn missing_credential_is_reported_without_io() {
        let config = ConversionConfig::builder()
            .api_key_vars(["DOCMORPH_TEST_SURELY_UNSET_KEY"])
            .build()
            .unwrap();
        let err = resolve_backend(&config).err().unwrap();
        match err {
            DocMorphError::MissingCredential { vars } => {
                assert_eq!(vars, "DOCMORPH_TEST_SURELY_UNSET_KEY")
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn injected_backend_bypasses_key_lookup() {
        let config = ConversionConfig::builder()
            .api_key_vars(["DOCMORPH_TEST_SURELY_UNSET_KEY"])
            .backend(Canned::new("[]"))
            .build()
            .unwrap();
        assert!(resolve_backend(&config).is_ok());
    }

    #[test]
    fn request_body_layout() {
        let req = GenerationRequest {
            model: "m".into(),
            system_instruction: Some("sys".into()),
            images: vec![img()],
            instruction: "do it".into(),
            response_schema: json!({"type": "ARRAY"}),
        };
        let body = GeminiBackend::body(&req);
        let parts = body["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["inlineData"]["mimeType"], "image/jpeg");
        assert_eq!(parts[0]["inlineData"]["data"], "/9j/");
        assert_eq!(parts[1]["text"], "do it");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "sys");
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
    }

    #[test]
    fn upstream_message_prefers_error_field() {
        assert_eq!(
            upstream_message(r#"{"error":{"code":403,"message":"API key not valid"}}"#),
            "API key not valid"
        );
        assert_eq!(upstream_message("Bad Gateway"), "Bad Gateway");
    }
}
