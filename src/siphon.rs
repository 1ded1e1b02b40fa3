//! Siphon: content ingestion.
//!
//! A [`SiphonRequest`] names a source (uploaded bytes, a server-local path,
//! or a URL). [`SiphonService::process`] loads the bytes, resolves their
//! content type, and runs the requested [`ActionType`]:
//!
//! | Action | Payload |
//! |--------|---------|
//! | `parse` | [`SourceInfo`] only |
//! | `extract` | [`ProcessedContent`]: text plus paragraph chunks |
//! | `enrich` | `extract` plus a summary from the generation backend |
//!
//! Content type resolution order: explicit `content_type`, then the HTTP
//! `Content-Type` header (ignored when it is `application/octet-stream`),
//! then the source's file extension, then `text/plain`.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::Engine;
use headwater_api::conduit::{ConduitOptions, GenerationParams, GenerationRequest};
use headwater_api::error::GenerationError;
use headwater_api::siphon::{
    ActionType, ProcessedContent, SiphonPayload, SiphonRequest, SiphonResponse, SourceInfo,
    SourceOrigin, SourceType,
};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::chunk::chunk_text;
use crate::config::SiphonConfig;
use crate::extract::{extract_text, ExtractError};
use crate::generation::cache::BoundedCache;
use crate::generation::GenerationDispatch;

/// Characters of extracted text sent to the model for `enrich`.
const SUMMARY_INPUT_CHARS: usize = 12_000;
const SUMMARY_MAX_TOKENS: u32 = 256;
const OCTET_STREAM: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum SiphonError {
    #[error("unsupported content type: {0}")]
    Unsupported(String),

    #[error("failed to fetch source: {0}")]
    Fetch(String),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("invalid siphon request: {0}")]
    InvalidRequest(String),

    #[error("source is {size} bytes, limit is {limit}")]
    TooLarge { size: u64, limit: u64 },

    #[error("summary generation failed: {0}")]
    Summary(#[source] GenerationError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Raw bytes plus whatever content type the transport reported.
struct Loaded {
    bytes: Vec<u8>,
    header_content_type: Option<String>,
}

pub struct SiphonService {
    config: SiphonConfig,
    http: reqwest::Client,
    dispatch: GenerationDispatch,
    cache: BoundedCache<SiphonPayload>,
}

impl SiphonService {
    pub fn new(config: SiphonConfig, dispatch: GenerationDispatch) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .build()
            .context("Failed to build siphon HTTP client")?;
        let cache = BoundedCache::new(config.cache_max_entries);
        Ok(Self {
            config,
            http,
            dispatch,
            cache,
        })
    }

    pub fn config(&self) -> &SiphonConfig {
        &self.config
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    #[instrument(skip_all, fields(source = %request.source, origin = ?request.origin, action = request.params.action.as_str()))]
    pub async fn process(&self, request: SiphonRequest) -> Result<SiphonResponse, SiphonError> {
        let action = request.params.action;
        if action == ActionType::Enrich && self.config.summary_model.is_none() {
            return Err(SiphonError::InvalidRequest(
                "enrich requires [siphon].summary_model to be configured".to_string(),
            ));
        }

        let loaded = self.load(&request).await?;
        self.check_size(loaded.bytes.len() as u64)?;

        let content_type = resolve_content_type(
            request.content_type.as_deref(),
            loaded.header_content_type.as_deref(),
            &request,
        );
        let source_type = SourceType::from_content_type(&content_type)
            .ok_or_else(|| SiphonError::Unsupported(content_type.clone()))?;
        let hash = hex::encode(Sha256::digest(&loaded.bytes));

        let cache_key = format!("{}:{}:{}", hash, action.as_str(), content_type);
        if request.params.use_cache {
            if let Some(mut payload) = self.cache.get(&cache_key) {
                debug!(hash = %hash, "siphon cache hit");
                payload.set_original_source(&request.source);
                return Ok(payload.into());
            }
        }

        let info = SourceInfo {
            source_type,
            content_type,
            hash,
            size_bytes: loaded.bytes.len() as u64,
            original_source: request.source.clone(),
        };

        let mut payload = match action {
            ActionType::Parse => SiphonPayload::SourceInfo(info),
            ActionType::Extract => {
                SiphonPayload::ProcessedContent(self.extract(info, loaded.bytes).await?)
            }
            ActionType::Enrich => {
                let mut content = self.extract(info, loaded.bytes).await?;
                content.summary = Some(self.summarize(&content.text, request.params.use_cache).await?);
                SiphonPayload::ProcessedContent(content)
            }
        };

        if request.params.use_cache {
            self.cache.insert(cache_key, payload.clone());
        }
        payload.set_original_source(&request.source);

        info!(source_type = ?source_type, "processed source");
        Ok(payload.into())
    }

    async fn load(&self, request: &SiphonRequest) -> Result<Loaded, SiphonError> {
        match (request.origin, &request.data) {
            (_, Some(data)) => {
                // Base64 inflates by 4/3; reject before decoding.
                self.check_size((data.len() as u64).saturating_mul(3) / 4)?;
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(data.trim())
                    .map_err(|e| SiphonError::InvalidRequest(format!("data is not valid base64: {}", e)))?;
                Ok(Loaded {
                    bytes,
                    header_content_type: None,
                })
            }
            (SourceOrigin::FilePath, None) => self.read_local(&request.source).await,
            (SourceOrigin::Url, None) => self.fetch(&request.source).await,
        }
    }

    async fn read_local(&self, path: &str) -> Result<Loaded, SiphonError> {
        if !self.config.allow_local_paths {
            return Err(SiphonError::InvalidRequest(
                "file_path sources must include base64 data; local paths are disabled".to_string(),
            ));
        }
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| SiphonError::InvalidRequest(format!("{}: {}", path, e)))?;
        self.check_size(metadata.len())?;
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| SiphonError::InvalidRequest(format!("{}: {}", path, e)))?;
        Ok(Loaded {
            bytes,
            header_content_type: None,
        })
    }

    async fn fetch(&self, url: &str) -> Result<Loaded, SiphonError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| SiphonError::InvalidRequest(format!("invalid URL '{}': {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SiphonError::InvalidRequest(format!(
                "unsupported URL scheme: {}",
                parsed.scheme()
            )));
        }

        let mut resp = self
            .http
            .get(parsed)
            .send()
            .await
            .map_err(|e| SiphonError::Fetch(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SiphonError::Fetch(format!("{} returned {}", url, status)));
        }
        if let Some(len) = resp.content_length() {
            self.check_size(len)?;
        }
        let header_content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        // Content-Length may be absent (chunked) or wrong; cap what is read.
        let mut bytes = Vec::new();
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| SiphonError::Fetch(e.to_string()))?
        {
            self.check_size((bytes.len() + chunk.len()) as u64)?;
            bytes.extend_from_slice(&chunk);
        }
        Ok(Loaded {
            bytes,
            header_content_type,
        })
    }

    fn check_size(&self, size: u64) -> Result<(), SiphonError> {
        let limit = self.config.max_bytes as u64;
        if size > limit {
            return Err(SiphonError::TooLarge { size, limit });
        }
        Ok(())
    }

    async fn extract(&self, info: SourceInfo, bytes: Vec<u8>) -> Result<ProcessedContent, SiphonError> {
        let source_type = info.source_type;
        let max_tokens = self.config.chunk_max_tokens;
        let (text, chunks) = tokio::task::spawn_blocking(move || {
            extract_text(&bytes, source_type).map(|text| {
                let chunks = chunk_text(&text, max_tokens);
                (text, chunks)
            })
        })
        .await
        .map_err(|e| SiphonError::Internal(format!("extraction task failed: {}", e)))??;

        Ok(ProcessedContent {
            source: info,
            text,
            chunks,
            summary: None,
        })
    }

    async fn summarize(&self, text: &str, use_cache: bool) -> Result<String, SiphonError> {
        let model = self.config.summary_model.clone().ok_or_else(|| {
            SiphonError::InvalidRequest("no summary model configured".to_string())
        })?;
        let mut params = GenerationParams::new(model);
        params.max_tokens = Some(SUMMARY_MAX_TOKENS);
        params.system = Some("You write concise, factual summaries of documents.".to_string());
        let options = ConduitOptions {
            project_name: "siphon".to_string(),
            use_cache,
            ..ConduitOptions::default()
        };

        let prompt = format!(
            "Summarize the following document in a few sentences.\n\n{}",
            truncate_chars(text, SUMMARY_INPUT_CHARS)
        );
        let response = self
            .dispatch
            .generate(GenerationRequest::from_prompt(&prompt, &params, &options))
            .await
            .map_err(SiphonError::Summary)?;
        Ok(response.content().trim().to_string())
    }
}

fn resolve_content_type(
    explicit: Option<&str>,
    header: Option<&str>,
    request: &SiphonRequest,
) -> String {
    if let Some(ct) = explicit.filter(|ct| !ct.trim().is_empty()) {
        return ct.trim().to_string();
    }
    if let Some(ct) = header.filter(|ct| !ct.starts_with(OCTET_STREAM)) {
        return ct.to_string();
    }
    source_extension(request)
        .and_then(|ext| SourceType::content_type_for_extension(&ext))
        .unwrap_or("text/plain")
        .to_string()
}

fn source_extension(request: &SiphonRequest) -> Option<String> {
    let path = match request.origin {
        SourceOrigin::Url => reqwest::Url::parse(&request.source)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| request.source.clone()),
        SourceOrigin::FilePath => request.source.clone(),
    };
    Path::new(&path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_string)
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
