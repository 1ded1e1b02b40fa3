//! Siphon ingestion wire types (`POST /siphon/process`).

use serde::{Deserialize, Serialize};

/// Where `SiphonRequest::source` points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceOrigin {
    FilePath,
    Url,
}

/// How far through the pipeline to go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Identify the source only.
    Parse,
    /// Identify, extract text, and chunk.
    #[default]
    Extract,
    /// Extract plus a generated summary.
    Enrich,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Parse => "parse",
            ActionType::Extract => "extract",
            ActionType::Enrich => "enrich",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiphonParams {
    #[serde(default)]
    pub action: ActionType,
    #[serde(default)]
    pub use_cache: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiphonRequest {
    /// File name/path or URL, echoed back in the response.
    pub source: String,
    pub origin: SourceOrigin,
    #[serde(default)]
    pub params: SiphonParams,
    /// Base64 file contents for uploads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Overrides header and extension detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl SiphonRequest {
    pub fn url(url: impl Into<String>, action: ActionType) -> Self {
        Self {
            source: url.into(),
            origin: SourceOrigin::Url,
            params: SiphonParams {
                action,
                use_cache: false,
            },
            data: None,
            content_type: None,
        }
    }

    /// An uploaded file; `data` is the base64 encoding of its bytes.
    pub fn upload(name: impl Into<String>, data: String, action: ActionType) -> Self {
        Self {
            source: name.into(),
            origin: SourceOrigin::FilePath,
            params: SiphonParams {
                action,
                use_cache: false,
            },
            data: Some(data),
            content_type: None,
        }
    }
}

/// Detected document family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Text,
    Markdown,
    Html,
    Json,
    Csv,
    Pdf,
    Docx,
    Pptx,
    Xlsx,
}

impl SourceType {
    /// Map a MIME type (parameters ignored) to a source type.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        let ty = match mime.as_str() {
            "text/plain" => SourceType::Text,
            "text/markdown" | "text/x-markdown" => SourceType::Markdown,
            "text/html" | "application/xhtml+xml" => SourceType::Html,
            "application/json" => SourceType::Json,
            "text/csv" => SourceType::Csv,
            "application/pdf" => SourceType::Pdf,
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                SourceType::Docx
            }
            "application/vnd.openxmlformats-officedocument.presentationml.presentation" => {
                SourceType::Pptx
            }
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => {
                SourceType::Xlsx
            }
            _ => return None,
        };
        Some(ty)
    }

    /// MIME type implied by a file extension.
    pub fn content_type_for_extension(ext: &str) -> Option<&'static str> {
        let mime = match ext.to_ascii_lowercase().as_str() {
            "txt" | "text" | "log" => "text/plain",
            "md" | "markdown" => "text/markdown",
            "html" | "htm" => "text/html",
            "json" => "application/json",
            "csv" => "text/csv",
            "pdf" => "application/pdf",
            "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
            "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            _ => return None,
        };
        Some(mime)
    }
}

/// Identity of an ingested source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub source_type: SourceType,
    pub content_type: String,
    /// SHA-256 of the raw bytes, hex encoded.
    pub hash: String,
    pub size_bytes: u64,
    /// The `source` string the caller sent.
    pub original_source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentChunk {
    pub index: usize,
    pub text: String,
    pub token_estimate: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedContent {
    pub source: SourceInfo,
    pub text: String,
    pub chunks: Vec<ContentChunk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SiphonPayload {
    SourceInfo(SourceInfo),
    ProcessedContent(ProcessedContent),
}

impl SiphonPayload {
    pub fn source_info(&self) -> &SourceInfo {
        match self {
            SiphonPayload::SourceInfo(info) => info,
            SiphonPayload::ProcessedContent(content) => &content.source,
        }
    }

    /// Overwrite the reported source with the caller's original string.
    pub fn set_original_source(&mut self, source: &str) {
        let info = match self {
            SiphonPayload::SourceInfo(info) => info,
            SiphonPayload::ProcessedContent(content) => &mut content.source,
        };
        info.original_source = source.to_string();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiphonResponse {
    pub source_type: SourceType,
    pub payload: SiphonPayload,
}

impl From<SiphonPayload> for SiphonResponse {
    fn from(payload: SiphonPayload) -> Self {
        Self {
            source_type: payload.source_info().source_type,
            payload,
        }
    }
}
