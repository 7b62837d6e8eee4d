//! HTTP API server implementation

use axum::{
    body::{Body, Bytes},
    extract::{multipart::MultipartRejection, rejection::JsonRejection, DefaultBodyLimit, Multipart, Path, State},
    http::{
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
        HeaderName, HeaderValue,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempPath;
use tokio::io::AsyncReadExt;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use utoipa::{OpenApi, ToSchema};

use crate::core::config::ServerConfig;
use crate::core::errors::TranslateError;
use crate::core::models::translated_file_name;
use crate::core::registry::ModelRegistry;
use crate::core::service::TranslationService;

/// Multipart field carrying the uploaded file
const UPLOAD_FIELD: &str = "file";

const INLINE_FAILURE: &str = "Translation failed";
const FILE_FAILURE: &str = "File translation failed";

const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Machine-readable error kind on every error response
pub const ERROR_KIND_HEADER: HeaderName = HeaderName::from_static("x-error-kind");
/// Set on file responses whose input was cut to the token limit
pub const TRUNCATED_HEADER: HeaderName = HeaderName::from_static("x-input-truncated");

/// Application state
#[derive(Clone)]
pub struct AppState {
    service: TranslationService,
    temp_dir: Arc<PathBuf>,
}

impl AppState {
    /// State serving `service`, staging files in `temp_dir`
    pub fn new(service: TranslationService, temp_dir: PathBuf) -> Self {
        Self {
            service,
            temp_dir: Arc::new(temp_dir),
        }
    }
}

/// Inline translation request
#[derive(Debug, Deserialize, ToSchema)]
pub struct TranslateRequest {
    /// Text to translate
    pub text: String,
}

/// Inline translation response
#[derive(Debug, Serialize, ToSchema)]
pub struct TranslateResponse {
    /// Translated text
    pub translation: String,
    /// Present (and true) only when the input was cut to the token limit
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

/// Error response
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Human readable reason
    pub error: String,
}

/// Multipart upload accepted by `/translate-file`
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct UploadForm {
    #[schema(value_type = String, format = Binary)]
    file: Vec<u8>,
}

/// Health check response
#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    status: String,
    service: String,
    version: String,
    available_pairs: Vec<String>,
}

/// Loaded pairs response
#[derive(Serialize, ToSchema)]
pub struct PairsResponse {
    pairs: Vec<PairInfo>,
}

/// One loaded pair with its codes
#[derive(Serialize, ToSchema)]
pub struct PairInfo {
    id: String,
    source: Option<String>,
    target: Option<String>,
}

/// OpenAPI document served at `/openapi.json`
#[derive(OpenApi)]
#[openapi(
    paths(health_check, list_pairs, translate_text, translate_file),
    components(schemas(
        TranslateRequest,
        TranslateResponse,
        ErrorResponse,
        UploadForm,
        HealthResponse,
        PairsResponse,
        PairInfo
    )),
    info(title = "Language Translation API", version = "1.0.0")
)]
pub struct ApiDoc;

/// Health check handler
#[utoipa::path(get, path = "/", responses((status = 200, body = HealthResponse)))]
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        available_pairs: state.service.registry().available_pairs(),
    })
}

/// Loaded language pairs
#[utoipa::path(get, path = "/pairs", responses((status = 200, body = PairsResponse)))]
async fn list_pairs(State(state): State<AppState>) -> Json<PairsResponse> {
    let pairs = state
        .service
        .registry()
        .pairs()
        .map(|pair| {
            let codes = pair.codes();
            PairInfo {
                id: pair.to_string(),
                source: codes.map(|(source, _)| source.to_string()),
                target: codes.map(|(_, target)| target.to_string()),
            }
        })
        .collect();

    Json(PairsResponse { pairs })
}

async fn openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Translate inline text.
///
/// Business failures come back as `{"error": ...}` with status 200.
#[utoipa::path(
    post,
    path = "/translate/{lang_pair}",
    params(("lang_pair" = String, Path, description = "Language pair identifier, e.g. en-fr")),
    request_body = TranslateRequest,
    responses(
        (status = 200, description = "Translation, or an in-band error object", body = TranslateResponse),
        (status = 422, description = "Body is not a valid request", body = ErrorResponse)
    )
)]
async fn translate_text(
    State(state): State<AppState>,
    Path(lang_pair): Path<String>,
    payload: Result<Json<TranslateRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            let err = TranslateError::decode(rejection.body_text());
            return with_status(error_response(&err, INLINE_FAILURE), rejection.status());
        }
    };

    match state.service.translate(&lang_pair, request.text).await {
        Ok(translation) => Json(TranslateResponse {
            translation: translation.text,
            truncated: translation.truncated,
        })
        .into_response(),
        Err(e) => {
            warn!("Translation for {} failed: {}", lang_pair, e);
            error_response(&e, INLINE_FAILURE)
        }
    }
}

/// Translate an uploaded text file and return the result as an attachment
#[utoipa::path(
    post,
    path = "/translate-file/{lang_pair}",
    params(("lang_pair" = String, Path, description = "Language pair identifier, e.g. en-fr")),
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Translated file, or an in-band error object", body = String, content_type = "text/plain"),
        (status = 400, description = "Request is not multipart", body = ErrorResponse)
    )
)]
async fn translate_file(
    State(state): State<AppState>,
    Path(lang_pair): Path<String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let multipart = match multipart {
        Ok(multipart) => multipart,
        Err(rejection) => {
            let err = TranslateError::decode(rejection.body_text());
            return with_status(error_response(&err, FILE_FAILURE), rejection.status());
        }
    };

    match translate_upload(&state, &lang_pair, multipart).await {
        Ok(response) => response,
        Err(e) => {
            warn!("File translation for {} failed: {}", lang_pair, e);
            error_response(&e, FILE_FAILURE)
        }
    }
}

async fn translate_upload(
    state: &AppState,
    lang_pair: &str,
    mut multipart: Multipart,
) -> Result<Response, TranslateError> {
    state.service.ensure_supported(lang_pair)?;

    let upload = read_upload(&mut multipart, state.service.max_file_size()).await?;
    state.service.check_upload_size(upload.size)?;
    debug!(
        "Received {:?} ({} bytes) for {}",
        upload.file_name, upload.size, lang_pair
    );

    let attachment_name = translated_file_name(upload.file_name.as_deref());
    let translation = state
        .service
        .translate_upload(lang_pair, upload.content)
        .await?;

    let body = write_output_file(&state.temp_dir, translation.text)
        .await
        .map_err(|e| TranslateError::generation(e.to_string()))?;

    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_str(&content_disposition(&attachment_name))
            .map_err(|e| TranslateError::generation(e.to_string()))?,
    );
    if translation.truncated {
        headers.insert(TRUNCATED_HEADER, HeaderValue::from_static("true"));
    }

    Ok(response)
}

struct Upload {
    file_name: Option<String>,
    /// Empty once `size` passes the limit
    content: Vec<u8>,
    size: usize,
}

/// Read the `file` field, buffering at most `limit` bytes.
///
/// Anything past the limit is drained so the client still gets a response.
async fn read_upload(multipart: &mut Multipart, limit: usize) -> Result<Upload, TranslateError> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| TranslateError::decode(e.body_text()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let file_name = field.file_name().map(str::to_string);
        let mut content = Vec::new();
        let mut size = 0usize;

        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| TranslateError::decode(e.body_text()))?
        {
            size = size.saturating_add(chunk.len());
            if size <= limit {
                content.extend_from_slice(&chunk);
            } else if !content.is_empty() {
                content = Vec::new();
            }
        }

        return Ok(Upload {
            file_name,
            content,
            size,
        });
    }

    Err(TranslateError::decode(format!(
        "no `{}` field in upload",
        UPLOAD_FIELD
    )))
}

/// Write `text` to a fresh `.txt` file in `temp_dir` and stream it back.
///
/// The file lives as long as the body: it is removed once the stream ends or
/// the body is dropped (client gone, error further up).
async fn write_output_file(temp_dir: &std::path::Path, text: String) -> std::io::Result<Body> {
    let temp_dir = temp_dir.to_path_buf();
    let (file, path) = tokio::task::spawn_blocking(move || -> std::io::Result<_> {
        let mut tmp = tempfile::Builder::new()
            .prefix("translated_")
            .suffix(".txt")
            .tempfile_in(&temp_dir)?;
        tmp.write_all(text.as_bytes())?;
        tmp.flush()?;
        let reader = tmp.reopen()?;
        Ok((reader, tmp.into_temp_path()))
    })
    .await
    .map_err(std::io::Error::other)??;

    debug!("Wrote translation to {}", path.display());
    Ok(temp_file_body(tokio::fs::File::from_std(file), path))
}

fn temp_file_body(file: tokio::fs::File, path: TempPath) -> Body {
    let stream = futures::stream::try_unfold((file, path), |(mut file, path)| async move {
        let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
        let read = file.read(&mut buf).await?;
        if read == 0 {
            debug!("Removing {}", path.display());
            return Ok::<_, std::io::Error>(None);
        }
        buf.truncate(read);
        Ok(Some((Bytes::from(buf), (file, path))))
    });

    Body::from_stream(stream)
}

/// `attachment` disposition; non-ASCII names go in the RFC 5987 `filename*` form
fn content_disposition(file_name: &str) -> String {
    let is_plain = file_name
        .chars()
        .all(|c| c.is_ascii_graphic() || c == ' ')
        && !file_name.contains(['"', '\\']);
    if is_plain {
        return format!("attachment; filename=\"{}\"", file_name);
    }

    let encoded: String = file_name
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{:02X}", b),
        })
        .collect();
    format!("attachment; filename*=utf-8''{}", encoded)
}

fn error_response(err: &TranslateError, failure_label: &str) -> Response {
    let mut response = Json(ErrorResponse {
        error: err.user_message(failure_label),
    })
    .into_response();
    response
        .headers_mut()
        .insert(ERROR_KIND_HEADER, HeaderValue::from_static(err.kind()));
    response
}

fn with_status(mut response: Response, status: axum::http::StatusCode) -> Response {
    *response.status_mut() = status;
    response
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .expose_headers([CONTENT_DISPOSITION, ERROR_KIND_HEADER, TRUNCATED_HEADER]);

    if origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(AllowOrigin::mirror_request());
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    layer.allow_origin(AllowOrigin::list(origins))
}

/// Build the router
pub fn create_router(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/pairs", get(list_pairs))
        .route("/openapi.json", get(openapi_spec))
        .route("/translate/:lang_pair", post(translate_text))
        .route(
            "/translate-file/:lang_pair",
            post(translate_file).layer(DefaultBodyLimit::disable()),
        )
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP server
pub async fn run_server(
    config: &ServerConfig,
    registry: ModelRegistry,
    host: &str,
    port: u16,
) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.temp_dir)?;

    let service = TranslationService::from_config(Arc::new(registry), config);
    if service.registry().is_empty() {
        warn!("No language pairs loaded, every request will be rejected");
    }

    let state = AppState::new(service, config.temp_dir.clone());
    let app = create_router(state, &config.cors_origins);

    // Bind address
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
