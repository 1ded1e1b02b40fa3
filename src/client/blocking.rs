//! Synchronous twin of [`super::HeadwaterClient`].
//!
//! Must not be used from inside an async runtime; `reqwest::blocking`
//! panics there.

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
use headwater_api::siphon::{SiphonRequest, SiphonResponse};
use headwater_api::status::{PingResponse, RouteInfo, StatusResponse};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{decode_response, default_base_url, normalize_base_url, ClientError, CONNECT_TIMEOUT};

pub struct HeadwaterClient {
    http: reqwest::blocking::Client,
    base_url: String,
}

impl HeadwaterClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let http = reqwest::blocking::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(None::<std::time::Duration>)
            .build()?;
        Ok(Self {
            http,
            base_url: normalize_base_url(base_url),
        })
    }

    pub fn from_env() -> Result<Self, ClientError> {
        Self::new(&default_base_url())
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

    pub fn ping(&self) -> Result<PingResponse, ClientError> {
        self.get("/ping")
    }

    pub fn status(&self) -> Result<StatusResponse, ClientError> {
        self.get("/status")
    }

    pub fn list_routes(&self) -> Result<Vec<RouteInfo>, ClientError> {
        self.get("/routes")
    }

    fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.send::<(), T>(Method::GET, path, None)
    }

    fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        self.send(Method::POST, path, Some(body))
    }

    fn send<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, ClientError> {
        let mut request = self.http.request(method, format!("{}{}", self.base_url, path));
        if let Some(body) = body {
            request = request.json(body);
        }
        let resp = request.send()?;
        let status = resp.status();
        let text = resp.text()?;
        decode_response(status, &text)
    }
}

pub struct ConduitApi<'a> {
    client: &'a HeadwaterClient,
}

impl ConduitApi<'_> {
    pub fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, ClientError> {
        self.client.post("/conduit/generate", request)
    }

    pub fn batch(&self, request: &BatchRequest) -> Result<BatchResponse, ClientError> {
        self.client.post("/conduit/batch", request)
    }

    pub fn tokenize(
        &self,
        request: &TokenizationRequest,
    ) -> Result<TokenizationResponse, ClientError> {
        self.client.post("/conduit/tokenize", request)
    }
}

pub struct EmbeddingsApi<'a> {
    client: &'a HeadwaterClient,
}

impl EmbeddingsApi<'_> {
    pub fn generate(&self, request: &EmbeddingsRequest) -> Result<EmbeddingsResponse, ClientError> {
        self.client.post("/conduit/embeddings", request)
    }

    pub fn list_models(&self) -> Result<Vec<String>, ClientError> {
        self.client.get("/conduit/embeddings/models")
    }

    pub fn quick(
        &self,
        request: &QuickEmbeddingRequest,
    ) -> Result<QuickEmbeddingResponse, ClientError> {
        self.client.post("/conduit/embeddings/quick", request)
    }

    pub fn list_collections(&self) -> Result<Vec<CollectionRecord>, ClientError> {
        let resp: ListCollectionsResponse = self.client.get("/conduit/embeddings/collections")?;
        Ok(resp.collections)
    }

    pub fn get_collection(&self, name: &str) -> Result<CollectionRecord, ClientError> {
        let request = GetCollectionRequest {
            collection_name: name.to_string(),
        };
        self.client.post("/conduit/embeddings/collections/get", &request)
    }

    pub fn create_collection(
        &self,
        request: &CreateCollectionRequest,
    ) -> Result<CreateCollectionResponse, ClientError> {
        self.client.post("/conduit/embeddings/collections", request)
    }

    pub fn delete_collection(&self, name: &str) -> Result<DeleteCollectionResponse, ClientError> {
        let request = DeleteCollectionRequest {
            collection_name: name.to_string(),
        };
        self.client
            .send(Method::DELETE, "/conduit/embeddings/collections", Some(&request))
    }

    pub fn add_documents(
        &self,
        request: &AddDocumentsRequest,
    ) -> Result<AddDocumentsResponse, ClientError> {
        self.client.post("/conduit/embeddings/collections/add", request)
    }

    pub fn query_collection(
        &self,
        request: &QueryCollectionRequest,
    ) -> Result<QueryCollectionResponse, ClientError> {
        self.client.post("/conduit/embeddings/collections/query", request)
    }
}

pub struct SiphonApi<'a> {
    client: &'a HeadwaterClient,
}

impl SiphonApi<'_> {
    pub fn process(&self, request: &SiphonRequest) -> Result<SiphonResponse, ClientError> {
        self.client.post("/siphon/process", request)
    }
}
