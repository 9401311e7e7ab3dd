//! # HTTP Server Module
//!
//! Assembles the axum application: root and health documents, the admin/registration routes,
//! and a fallback that hands every other request to the dispatcher.
//!
//! ## Rust Concepts Used
//!
//! - `Arc<T>` for sharing the registry, dispatcher and clients across handlers
//! - `FromRef` so sub-routers and extractors can take just the part of the state they need
//! - Tower layers for tracing and the body size limit
//! - `tokio::net::TcpListener` + `axum::serve` with graceful shutdown

use crate::admin;
use crate::auth::IdentityClient;
use crate::core::config::GatewayConfig;
use crate::core::error::{set_mask_internal_errors, GatewayError, GatewayResult};
use crate::dispatcher::{
    ApplicationKey, Dispatcher, EndpointCache, InboundRequest, ProxyExecutor, UploadedFile,
};
use crate::registry::loader::load_microservices;
use crate::registry::service::MicroserviceRegistry;
use crate::store::{InMemoryStore, RegistrationStore};
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, FromRef, FromRequest, Multipart, Request, State},
    http::{header::CONTENT_TYPE, HeaderMap},
    response::{Json, Response},
    routing::get,
    Router as AxumRouter,
};
use serde_json::{json, Map, Value};
use std::future::Future;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, instrument, warn};

/// Shared state handed to every handler
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<GatewayConfig>,
    pub registry: Arc<MicroserviceRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub proxy: Arc<ProxyExecutor>,
    pub identity: Arc<IdentityClient>,
}

impl FromRef<ServerState> for Arc<MicroserviceRegistry> {
    fn from_ref(state: &ServerState) -> Self {
        state.registry.clone()
    }
}

impl FromRef<ServerState> for Arc<IdentityClient> {
    fn from_ref(state: &ServerState) -> Self {
        state.identity.clone()
    }
}

/// The gateway: state plus the application built on it
pub struct GatewayServer {
    state: ServerState,
}

impl GatewayServer {
    /// Build a gateway backed by the in-memory registration store
    pub fn new(config: GatewayConfig) -> GatewayResult<Self> {
        Self::with_store(config, Arc::new(InMemoryStore::new()))
    }

    /// Build a gateway on top of the given registration store
    pub fn with_store(config: GatewayConfig, store: Arc<dyn RegistrationStore>) -> GatewayResult<Self> {
        set_mask_internal_errors(config.is_production());

        let client = reqwest::Client::builder().build()?;
        let cache = Arc::new(EndpointCache::new());

        let registry = Arc::new(MicroserviceRegistry::new(
            store,
            cache.clone(),
            client.clone(),
            &config.registry,
        ));
        let dispatcher = Arc::new(Dispatcher::new(cache, client.clone(), config.dispatcher.clone()));
        let proxy = Arc::new(ProxyExecutor::new(client.clone(), config.dispatcher.proxy_timeout));
        let identity = Arc::new(IdentityClient::new(client, &config.identity));

        Ok(Self {
            state: ServerState {
                config: Arc::new(config),
                registry,
                dispatcher,
                proxy,
                identity,
            },
        })
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    /// Register boot-time microservices and load the dispatch cache
    pub async fn bootstrap(&self) -> GatewayResult<()> {
        match &self.state.config.registry.microservices_dir {
            Some(dir) => {
                load_microservices(&self.state.registry, dir, &self.state.config.registry.local_url).await?;
            }
            None => {
                self.state.registry.reload().await?;
            }
        }
        Ok(())
    }

    /// The axum application
    pub fn app(&self) -> AxumRouter {
        AxumRouter::new()
            .route("/", get(root))
            .route("/health", get(health))
            .merge(admin::routes::<ServerState>())
            .fallback(dispatch)
            .layer(DefaultBodyLimit::max(self.state.config.server.max_request_size))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Serve until `shutdown` resolves
    #[instrument(skip_all)]
    pub async fn serve<F>(self, shutdown: F) -> GatewayResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = format!(
            "{}:{}",
            self.state.config.server.bind_address, self.state.config.server.http_port
        );
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| GatewayError::internal(format!("Failed to bind gateway server to {}: {}", addr, e)))?;

        info!("Gateway HTTP server listening on {}", addr);

        axum::serve(listener, self.app())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| GatewayError::internal(format!("Gateway server error: {}", e)))
    }
}

async fn root(State(state): State<ServerState>) -> Json<Value> {
    Json(json!({
        "name": state.config.root.name,
        "url": state.config.root.url,
    }))
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Route any other request through the dispatcher and proxy it
#[instrument(skip(state, request), fields(method = %request.method(), path = %request.uri().path()))]
async fn dispatch(State(state): State<ServerState>, request: Request) -> GatewayResult<Response> {
    let path = request.uri().path();
    let method = request.method().as_str().to_uppercase();
    // unmatched routes are not found whatever the body holds
    if state.dispatcher.cache().find_endpoint(path, &method).is_none() {
        return Err(GatewayError::endpoint_not_found(path));
    }

    let inbound = read_inbound(&state, request).await?;
    let outbound = state.dispatcher.build_outbound_request(inbound).await?;
    state.proxy.execute(outbound).await
}

fn content_type(headers: &HeaderMap) -> String {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Split an axum request into the parts the dispatcher needs
async fn read_inbound(state: &ServerState, request: Request) -> GatewayResult<InboundRequest> {
    let method = request.method().as_str().to_uppercase();
    let path = request.uri().path().to_string();
    let query: Vec<(String, String)> = request
        .uri()
        .query()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();
    let headers = request.headers().clone();
    let app_key = request.extensions().get::<ApplicationKey>().map(|key| key.0.clone());
    let content_type = content_type(&headers);

    let (fields, files) = if content_type.starts_with("multipart/form-data") {
        read_multipart(state, request).await?
    } else {
        let limit = state.config.server.max_request_size;
        (read_fields(&content_type, request.into_body(), limit).await?, Vec::new())
    };

    Ok(InboundRequest {
        method,
        path,
        query,
        headers,
        fields,
        files,
        app_key,
    })
}

/// Parse JSON or urlencoded bodies into a field map; other bodies carry no fields
async fn read_fields(content_type: &str, body: Body, limit: usize) -> GatewayResult<Map<String, Value>> {
    let bytes = axum::body::to_bytes(body, limit)
        .await
        .map_err(|e| GatewayError::validation("body", format!("Failed to read body: {}", e)))?;

    if bytes.is_empty() {
        return Ok(Map::new());
    }

    if content_type.contains("json") {
        return match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(GatewayError::validation("body", "JSON body must be an object")),
            Err(e) => Err(GatewayError::validation("body", format!("Invalid JSON: {}", e))),
        };
    }

    if content_type.starts_with("application/x-www-form-urlencoded") {
        return Ok(url::form_urlencoded::parse(&bytes)
            .into_owned()
            .map(|(k, v)| (k, Value::String(v)))
            .collect());
    }

    debug!(content_type, "Body is neither JSON nor a form, not forwarding it");
    Ok(Map::new())
}

/// Read multipart text fields into a map and spool file parts to temporary files
async fn read_multipart(
    state: &ServerState,
    request: Request,
) -> GatewayResult<(Map<String, Value>, Vec<UploadedFile>)> {
    let mut multipart = Multipart::from_request(request, state)
        .await
        .map_err(|e| GatewayError::validation("body", e.body_text()))?;

    let mut fields = Map::new();
    let mut files = Vec::new();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| GatewayError::validation("body", e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();

        match field.file_name().map(str::to_string) {
            Some(file_name) => {
                let content_type = field.content_type().map(str::to_string);
                let path = tempfile::NamedTempFile::new()?.into_temp_path();
                let mut spool = tokio::fs::File::create(&path).await?;
                let mut size = 0u64;

                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|e| GatewayError::validation(name.clone(), e.body_text()))?
                {
                    size += chunk.len() as u64;
                    spool.write_all(&chunk).await?;
                }
                spool.flush().await?;

                debug!(field = %name, file_name = %file_name, size, "Spooled uploaded file");
                files.push(UploadedFile {
                    field: name,
                    file_name,
                    content_type,
                    size,
                    path: Arc::new(path),
                });
            }
            None => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| GatewayError::validation(name.clone(), e.body_text()))?;
                if fields.insert(name.clone(), Value::String(text)).is_some() {
                    warn!(field = %name, "Repeated multipart field, keeping the last value");
                }
            }
        }
    }

    Ok((fields, files))
}
