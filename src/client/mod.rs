//! HTTP client for a Headwater server.
//!
//! [`HeadwaterClient`] is async (`reqwest::Client`); [`blocking::HeadwaterClient`]
//! has the same surface for synchronous callers. Both group endpoints into
//! sub-APIs that mirror the server's route prefixes:
//!
//! ```rust,no_run
//! use headwater::client::HeadwaterClient;
//! use headwater_api::conduit::{BatchRequest, GenerationParams};
//!
//! # async fn example() -> Result<(), headwater::client::ClientError> {
//! let client = HeadwaterClient::from_env()?;
//! let batch = BatchRequest::from_prompts(
//!     vec!["Name a river".into(), "Name a lake".into()],
//!     GenerationParams::new("llama3.1:latest"),
//! );
//! let response = client.conduit().batch(&batch).await?;
//! println!("{} succeeded", response.succeeded());
//! # Ok(())
//! # }
//! ```
//!
//! Non-2xx responses are decoded from the server's error envelope into
//! [`ClientError::Server`].

pub mod blocking;

use std::time::Duration;

use headwater_api::conduit::{
    BatchRequest, BatchResponse, GenerationRequest, GenerationResponse, TokenizationRequest,
    TokenizationResponse,
};
use headwater_api::embeddings::{
    AddDocumentsRequest, AddDocumentsResponse, CollectionRecord, CreateCollectionRequest,
    CreateCollectionResponse, DeleteCollectionRequest, DeleteCollectionResponse,
    EmbeddingsRequest, EmbeddingsResponse, GetCollectionRequest, ListCollectionsResponse,
    QueryCollectionRequest, QueryCollectionResponse, QuickEmbeddingRequest,
    QuickEmbeddingResponse,
};
use headwater_api::error::ErrorBody;
use headwater_api::siphon::{SiphonRequest, SiphonResponse};
use headwater_api::status::{PingResponse, RouteInfo, StatusResponse};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Environment variable holding the server's base URL.
pub const URL_ENV: &str = "HEADWATER_URL";
pub const DEFAULT_URL: &str = "http://localhost:8080";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status} ({code}): {message}")]
    Server {
        status: u16,
        code: String,
        message: String,
    },

    #[error("invalid response body: {0}")]
    Decode(String),
}

impl ClientError {
    /// The error envelope's code, for server errors.
    pub fn code(&self) -> Option<&str> {
        match self {
            ClientError::Server { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// `HEADWATER_URL` if set, otherwise [`DEFAULT_URL`].
pub fn default_base_url() -> String {
    std::env::var(URL_ENV)
        .ok()
        .filter(|url| !url.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_URL.to_string())
}

pub(crate) fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

/// Turn a status and body into the typed result both clients return.
pub(crate) fn decode_response<T: DeserializeOwned>(
    status: StatusCode,
    body: &str,
) -> Result<T, ClientError> {
    if !status.is_success() {
        return Err(match serde_json::from_str::<ErrorBody>(body) {
            Ok(envelope) => ClientError::Server {
                status: status.as_u16(),
                code: envelope.error.code,
                message: envelope.error.message,
            },
            Err(_) => ClientError::Server {
                status: status.as_u16(),
                code: "unknown".to_string(),
                message: body.trim().to_string(),
            },
        });
    }
    serde_json::from_str(body).map_err(|e| ClientError::Decode(e.to_string()))
}

#[derive(Clone)]
pub struct HeadwaterClient {
    http: reqwest::Client,
    base_url: String,
}

impl HeadwaterClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self::with_client(http, base_url))
    }

    /// Use `HEADWATER_URL` or the default URL.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::new(&default_base_url())
    }

    pub fn with_client(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: normalize_base_url(base_url),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn conduit(&self) -> ConduitApi<'_> {
        ConduitApi { client: self }
    }

    pub fn embeddings(&self) -> EmbeddingsApi<'_> {
        EmbeddingsApi { client: self }
    }

    pub fn siphon(&self) -> SiphonApi<'_> {
        SiphonApi { client: self }
    }

    pub async fn ping(&self) -> Result<PingResponse, ClientError> {
        self.get("/ping").await
    }

    pub async fn status(&self) -> Result<StatusResponse, ClientError> {
        self.get("/status").await
    }

    pub async fn list_routes(&self) -> Result<Vec<RouteInfo>, ClientError> {
        self.get("/routes").await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.send::<(), T>(Method::GET, path, None).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        self.send(Method::POST, path, Some(body)).await
    }

    async fn send<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, ClientError> {
        let mut request = self.http.request(method, format!("{}{}", self.base_url, path));
        if let Some(body) = body {
            request = request.json(body);
        }
        let resp = request.send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        decode_response(status, &text)
    }
}

/// `/conduit/*`: generation and tokenization.
pub struct ConduitApi<'a> {
    client: &'a HeadwaterClient,
}

impl ConduitApi<'_> {
    pub async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, ClientError> {
        self.client.post("/conduit/generate", request).await
    }

    pub async fn batch(&self, request: &BatchRequest) -> Result<BatchResponse, ClientError> {
        self.client.post("/conduit/batch", request).await
    }

    pub async fn tokenize(
        &self,
        request: &TokenizationRequest,
    ) -> Result<TokenizationResponse, ClientError> {
        self.client.post("/conduit/tokenize", request).await
    }
}

/// `/conduit/embeddings/*`: embeddings and collections.
pub struct EmbeddingsApi<'a> {
    client: &'a HeadwaterClient,
}

impl EmbeddingsApi<'_> {
    pub async fn generate(
        &self,
        request: &EmbeddingsRequest,
    ) -> Result<EmbeddingsResponse, ClientError> {
        self.client.post("/conduit/embeddings", request).await
    }

    pub async fn list_models(&self) -> Result<Vec<String>, ClientError> {
        self.client.get("/conduit/embeddings/models").await
    }

    pub async fn quick(
        &self,
        request: &QuickEmbeddingRequest,
    ) -> Result<QuickEmbeddingResponse, ClientError> {
        self.client.post("/conduit/embeddings/quick", request).await
    }

    pub async fn list_collections(&self) -> Result<Vec<CollectionRecord>, ClientError> {
        let resp: ListCollectionsResponse =
            self.client.get("/conduit/embeddings/collections").await?;
        Ok(resp.collections)
    }

    pub async fn get_collection(&self, name: &str) -> Result<CollectionRecord, ClientError> {
        let request = GetCollectionRequest {
            collection_name: name.to_string(),
        };
        self.client
            .post("/conduit/embeddings/collections/get", &request)
            .await
    }

    pub async fn create_collection(
        &self,
        request: &CreateCollectionRequest,
    ) -> Result<CreateCollectionResponse, ClientError> {
        self.client
            .post("/conduit/embeddings/collections", request)
            .await
    }

    pub async fn delete_collection(
        &self,
        name: &str,
    ) -> Result<DeleteCollectionResponse, ClientError> {
        let request = DeleteCollectionRequest {
            collection_name: name.to_string(),
        };
        self.client
            .send(Method::DELETE, "/conduit/embeddings/collections", Some(&request))
            .await
    }

    pub async fn add_documents(
        &self,
        request: &AddDocumentsRequest,
    ) -> Result<AddDocumentsResponse, ClientError> {
        self.client
            .post("/conduit/embeddings/collections/add", request)
            .await
    }

    pub async fn query_collection(
        &self,
        request: &QueryCollectionRequest,
    ) -> Result<QueryCollectionResponse, ClientError> {
        self.client
            .post("/conduit/embeddings/collections/query", request)
            .await
    }
}

/// `/siphon/*`: content ingestion.
pub struct SiphonApi<'a> {
    client: &'a HeadwaterClient,
}

impl SiphonApi<'_> {
    pub async fn process(&self, request: &SiphonRequest) -> Result<SiphonResponse, ClientError> {
        self.client.post("/siphon/process", request).await
    }
}
