//! reqwest-backed [`Transport`].
//!
//! Every started exchange is a tokio task. The terminal sink lives in a
//! shared table next to the task's abort handle, so whichever of completion
//! and cancellation removes the entry first decides whether the sink runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::{stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH};
use reqwest::{Body, Certificate, Client, RequestBuilder, StatusCode};
use tokio::runtime::{Handle, Runtime};
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use skein_core::{
    Bytes, Credentials, HttpRequest, Method, Outcome, Progress, ProgressSink, Response, TerminalSink,
    Transport, TransportHandle,
};

use crate::config::TransportConfig;
use crate::error::{Error, Result};

struct Exchange {
    sink: TerminalSink,
    abort: Option<AbortHandle>,
}

type Exchanges = Arc<Mutex<HashMap<u64, Exchange>>>;

/// Request bodies are streamed in chunks of this size so upload progress
/// can be reported.
const UPLOAD_CHUNK_SIZE: usize = 16 * 1024;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Production transport using an async reqwest client.
///
/// # Example
///
/// ```ignore
/// use skein_http::{ReqwestTransport, TransportConfig};
/// use skein_core::Manager;
///
/// let transport = ReqwestTransport::new(TransportConfig::default())?;
/// let manager = Manager::new(transport)?;
/// ```
pub struct ReqwestTransport {
    client: Client,
    handle: Handle,
    /// Present when the transport owns its runtime.
    runtime: Option<Runtime>,
    exchanges: Exchanges,
    next_id: AtomicU64,
}

impl ReqwestTransport {
    /// Create a transport running on its own multi-threaded runtime.
    pub fn new(config: TransportConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("skein-http")
            .build()
            .map_err(Error::Runtime)?;
        let handle = runtime.handle().clone();
        Ok(Self::assemble(build_client(&config)?, handle, Some(runtime)))
    }

    /// Create with the default configuration.
    pub fn with_default_config() -> Result<Self> {
        Self::new(TransportConfig::default())
    }

    /// Create a transport spawning onto an existing runtime.
    pub fn with_handle(config: TransportConfig, handle: Handle) -> Result<Self> {
        Ok(Self::assemble(build_client(&config)?, handle, None))
    }

    fn assemble(client: Client, handle: Handle, runtime: Option<Runtime>) -> Self {
        Self {
            client,
            handle,
            runtime,
            exchanges: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of exchanges started and not yet finished or cancelled.
    pub fn in_flight(&self) -> usize {
        lock(&self.exchanges).len()
    }
}

impl Transport for ReqwestTransport {
    fn start(
        &self,
        request: HttpRequest,
        on_progress: ProgressSink,
        on_terminal: TerminalSink,
    ) -> Option<TransportHandle> {
        if request.url.is_none() {
            warn!("refusing to start exchange without URL");
            return None;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.exchanges).insert(
            id,
            Exchange {
                sink: on_terminal,
                abort: None,
            },
        );

        let client = self.client.clone();
        let exchanges = Arc::clone(&self.exchanges);
        debug!(id, method = %request.method, url = ?request.url.as_ref().map(|u| u.as_str()), "starting exchange");

        let task = self.handle.spawn(async move {
            let outcome: Outcome = perform(&client, &request, &on_progress)
                .await
                .map_err(|e| {
                    warn!(id, error = %e, "exchange failed");
                    e.into()
                });

            let exchange = lock(&exchanges).remove(&id);
            if let Some(exchange) = exchange {
                (exchange.sink)(outcome);
            }
        });

        if let Some(exchange) = lock(&self.exchanges).get_mut(&id) {
            exchange.abort = Some(task.abort_handle());
        }
        Some(TransportHandle(id))
    }

    fn cancel(&self, handle: TransportHandle) {
        let exchange = lock(&self.exchanges).remove(&handle.0);
        if let Some(exchange) = exchange {
            if let Some(abort) = exchange.abort {
                abort.abort();
            }
            debug!(%handle, "exchange cancelled");
        }
    }
}

impl Drop for ReqwestTransport {
    fn drop(&mut self) {
        for (_, exchange) in lock(&self.exchanges).drain() {
            if let Some(abort) = exchange.abort {
                abort.abort();
            }
        }
        // Dropping a runtime blocks, which panics inside async contexts.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

fn build_client(config: &TransportConfig) -> Result<Client> {
    let mut builder = Client::builder().timeout(config.timeout);

    if let Some(user_agent) = &config.user_agent {
        builder = builder.user_agent(user_agent.as_str());
    }

    if config.accept_invalid_certs {
        warn!("TLS certificate verification is disabled");
        builder = builder.danger_accept_invalid_certs(true);
    }

    for path in &config.root_certificates {
        let pem = std::fs::read(path).map_err(|source| Error::CertificateFile {
            path: path.clone(),
            source,
        })?;
        let certificate = Certificate::from_pem(&pem).map_err(|source| Error::Certificate {
            path: path.clone(),
            source,
        })?;
        builder = builder.add_root_certificate(certificate);
    }

    Ok(builder.build()?)
}

async fn perform(
    client: &Client,
    request: &HttpRequest,
    on_progress: &ProgressSink,
) -> Result<Response> {
    let response = prepare(client, request, None, on_progress)?.send().await?;

    // Answer a Basic challenge once, unless the caller already sent credentials.
    let response = match &request.credentials {
        Some(credentials)
            if response.status() == StatusCode::UNAUTHORIZED
                && request.header("Authorization").is_none() =>
        {
            debug!(user = %credentials.user, "answering authentication challenge");
            prepare(client, request, Some(credentials), on_progress)?
                .send()
                .await?
        }
        _ => response,
    };

    read_response(response, on_progress).await
}

fn prepare(
    client: &Client,
    request: &HttpRequest,
    credentials: Option<&Credentials>,
    on_progress: &ProgressSink,
) -> Result<RequestBuilder> {
    let url = request.url.clone().ok_or(Error::MissingUrl)?;

    let mut headers = HeaderMap::new();
    for (name, value) in &request.headers {
        headers.insert(
            HeaderName::try_from(name.as_str())?,
            HeaderValue::try_from(value.as_str())?,
        );
    }

    let mut builder = client
        .request(http_method(request.method), url)
        .headers(headers);

    if let Some(timeout) = request.timeout {
        builder = builder.timeout(timeout);
    }

    if let Some(credentials) = credentials {
        builder = builder.basic_auth(&credentials.user, Some(&credentials.password));
    }

    match &request.body {
        Some(body) if !body.is_empty() => {
            builder = builder
                .header(CONTENT_LENGTH, body.len())
                .body(upload_body(body.clone(), on_progress));
        }
        Some(body) => builder = builder.body(body.clone()),
        None => {}
    }

    Ok(builder)
}

/// Stream `body` to the server, reporting upload progress per chunk.
fn upload_body(body: Bytes, on_progress: &ProgressSink) -> Body {
    let total = body.len() as u64;
    let chunks: Vec<Bytes> = (0..body.len())
        .step_by(UPLOAD_CHUNK_SIZE)
        .map(|start| body.slice(start..body.len().min(start + UPLOAD_CHUNK_SIZE)))
        .collect();

    let on_progress = Arc::clone(on_progress);
    let mut sent = 0u64;
    let chunks = stream::iter(chunks).map(move |chunk| {
        sent += chunk.len() as u64;
        on_progress(Progress::upload(sent, Some(total)));
        Ok::<_, std::io::Error>(chunk)
    });
    Body::wrap_stream(chunks)
}

async fn read_response(
    mut response: reqwest::Response,
    on_progress: &ProgressSink,
) -> Result<Response> {
    let status = response.status().as_u16();
    let headers: BTreeMap<String, String> = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.to_string(), v.to_string()))
        })
        .collect();
    let expected = response.content_length();

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        body.extend_from_slice(&chunk);
        on_progress(Progress::download(body.len() as u64, expected));
    }

    Ok(Response::new(status, headers, body))
}

fn http_method(method: Method) -> http::Method {
    match method {
        Method::GET => http::Method::GET,
        Method::POST => http::Method::POST,
        Method::PUT => http::Method::PUT,
        Method::DELETE => http::Method::DELETE,
        Method::PATCH => http::Method::PATCH,
        Method::HEAD => http::Method::HEAD,
        Method::OPTIONS => http::Method::OPTIONS,
    }
}
