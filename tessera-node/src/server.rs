use crate::config::Config;
use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use futures_util::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tessera_core::transport::http::{OBJ_HDR_HEADER, decode_hdr};
use tessera_core::{
    Bucket, BufferPool, ContentRegistry, HttpTransport, LocalTarget, Mountpath, Mountpaths,
    ObjReader, Provider, PutObjectParams, RecvHandlers, RecvType, Result, Target, TesseraError,
    XactBase, XactBckCopy, XactCleanup, XactKind, XactRegistry, XactResilver,
};
use tokio_util::io::{ReaderStream, StreamReader};
use tower_http::trace::TraceLayer;

/// Request header carrying the expected SHA-256 of an uploaded object.
pub const CHECKSUM_HEADER: &str = "x-tessera-checksum";

pub struct ServerState {
    pub target: Arc<dyn Target>,
    pub handlers: Arc<RecvHandlers>,
    pub xactions: Arc<XactRegistry>,
    pub config: Config,
}

#[derive(Debug, Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

struct ApiError(TesseraError);

impl From<TesseraError> for ApiError {
    fn from(error: TesseraError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            e if e.is_out_of_space() => StatusCode::INSUFFICIENT_STORAGE,
            e if e.is_not_found() => StatusCode::NOT_FOUND,
            TesseraError::NoRecvHandler(_) => StatusCode::NOT_FOUND,
            TesseraError::InvalidRequest(_)
            | TesseraError::InvalidFqn { .. }
            | TesseraError::HashMismatch { .. }
            | TesseraError::Serialization(_) => StatusCode::BAD_REQUEST,
            TesseraError::ObjectExists(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("request failed: {}", self.0);
        }
        let resp = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(self.0.to_string()),
        };
        (status, Json(resp)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Default, Deserialize)]
struct BucketQuery {
    #[serde(default)]
    namespace: Option<String>,
}

#[derive(Debug, Serialize)]
struct ObjectResponse {
    bucket: String,
    name: String,
    size: u64,
    checksum: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CopyBucketRequest {
    from: String,
    to: String,
    /// Shared job id, so that every node of the cluster receives under the same name.
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BucketRequest {
    bucket: String,
}

#[derive(Debug, Serialize)]
struct StartedResponse {
    id: String,
    kind: XactKind,
}

/// Builds the local target from configuration, creating mountpath roots as needed.
pub fn build_target(config: &Config) -> Result<(Arc<LocalTarget>, Arc<RecvHandlers>)> {
    let mountpaths = Arc::new(Mountpaths::new());
    for path in &config.node.mountpaths {
        std::fs::create_dir_all(path)?;
        mountpaths.add(Mountpath::new(path.clone())?.with_capacity(config.capacity))?;
    }

    let transport = Arc::new(HttpTransport::new(Duration::from_secs(
        config.transport.timeout_secs,
    ))?);
    let handlers = Arc::clone(transport.handlers());

    let target = LocalTarget::new(
        config.smap()?,
        mountpaths,
        Arc::new(ContentRegistry::with_defaults()?),
        BufferPool::new(config.memsys),
        transport,
    );
    Ok((Arc::new(target), handlers))
}

pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/v1/objects/:provider/:bucket/*obj",
            get(get_object).put(put_object).delete(delete_object),
        )
        .route("/v1/transport/:trname", put(recv_object))
        .route("/v1/xactions", get(list_xactions))
        .route("/v1/xactions/copy-bucket", post(start_copy_bucket))
        .route("/v1/xactions/resilver", post(start_resilver))
        .route("/v1/xactions/cleanup", post(start_cleanup))
        .route("/v1/xactions/:id", get(get_xaction).delete(abort_xaction))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(config: Config) -> Result<()> {
    let (target, handlers) = build_target(&config)?;
    let bind_addr = config.node.bind_addr.clone();

    let state = Arc::new(ServerState {
        target,
        handlers,
        xactions: Arc::new(XactRegistry::new()),
        config,
    });
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn parse_bucket(provider: &str, name: &str, query: &BucketQuery) -> Result<Bucket> {
    let provider = Provider::parse(provider).ok_or_else(|| {
        TesseraError::InvalidRequest(format!("unknown provider: {}", provider))
    })?;
    let bucket = Bucket::new(name, provider)?;
    match &query.namespace {
        Some(ns) => bucket.with_namespace(ns.as_str()),
        None => Ok(bucket),
    }
}

fn body_reader(body: Body) -> ObjReader {
    let stream = body
        .into_data_stream()
        .map_err(std::io::Error::other);
    Box::new(StreamReader::new(stream))
}

async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let running = state
        .xactions
        .list()
        .iter()
        .filter(|snap| !snap.state.is_terminal())
        .count();

    let response = serde_json::json!({
        "node_id": state.target.node().node_id,
        "mountpaths": state.target.mountpaths().len(),
        "peers": state.target.smap().nodes().len() - 1,
        "running_xactions": running,
    });

    (StatusCode::OK, Json(response))
}

async fn get_object(
    State(state): State<Arc<ServerState>>,
    Path((provider, bucket, obj)): Path<(String, String, String)>,
    Query(query): Query<BucketQuery>,
) -> ApiResult<Response> {
    let bucket = parse_bucket(&provider, &bucket, &query)?;
    let mut lom = state.target.lom(bucket, &obj)?;
    lom.load().await?;
    let size = lom.size();

    let (mut writer, reader) = tokio::io::duplex(state.config.memsys.buf_size);
    let target = Arc::clone(&state.target);
    tokio::spawn(async move {
        // a failure here truncates the body short of its content-length
        if let Err(e) = target.get_object(&mut lom, &mut writer).await {
            tracing::warn!("streaming {} failed: {}", lom, e);
        }
    });

    let body = Body::from_stream(ReaderStream::new(reader));
    Ok((StatusCode::OK, [(header::CONTENT_LENGTH, size.to_string())], body).into_response())
}

async fn put_object(
    State(state): State<Arc<ServerState>>,
    Path((provider, bucket, obj)): Path<(String, String, String)>,
    Query(query): Query<BucketQuery>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<Response> {
    let bucket = parse_bucket(&provider, &bucket, &query)?;
    let checksum = headers
        .get(CHECKSUM_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let mut lom = state.target.lom(bucket, &obj)?;
    state
        .target
        .put_object(
            &mut lom,
            PutObjectParams {
                reader: body_reader(body),
                recv_type: RecvType::Regular,
                checksum,
            },
        )
        .await?;

    let resp = ObjectResponse {
        bucket: lom.bucket().to_string(),
        name: lom.obj_name().to_string(),
        size: lom.size(),
        checksum: lom.checksum().map(str::to_string),
    };
    Ok((StatusCode::CREATED, ApiResponse::ok(resp)).into_response())
}

async fn delete_object(
    State(state): State<Arc<ServerState>>,
    Path((provider, bucket, obj)): Path<(String, String, String)>,
    Query(query): Query<BucketQuery>,
) -> ApiResult<StatusCode> {
    let bucket = parse_bucket(&provider, &bucket, &query)?;
    let lom = state.target.lom(bucket, &obj)?;
    if lom.bucket().is_remote() {
        state.target.evict_object(&lom).await?;
    } else {
        state.target.delete_object(&lom).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn recv_object(
    State(state): State<Arc<ServerState>>,
    Path(trname): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<StatusCode> {
    let raw = headers
        .get(OBJ_HDR_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            TesseraError::InvalidRequest(format!("missing {} header", OBJ_HDR_HEADER))
        })?;
    let hdr = decode_hdr(raw)?;
    state.handlers.dispatch(&trname, hdr, body_reader(body)).await?;
    Ok(StatusCode::OK)
}

async fn list_xactions(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    ApiResponse::ok(state.xactions.list())
}

async fn get_xaction(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let xact = state.xactions.get(&id)?;
    Ok(ApiResponse::ok(xact.snap()).into_response())
}

async fn abort_xaction(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let aborted = state.xactions.abort(&id)?;
    Ok(ApiResponse::ok(serde_json::json!({ "id": id, "aborted": aborted })).into_response())
}

async fn start_copy_bucket(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<CopyBucketRequest>,
) -> ApiResult<Response> {
    let from: Bucket = req.from.parse()?;
    let to: Bucket = req.to.parse()?;
    let job = match req.id {
        Some(id) => {
            let base = Arc::new(XactBase::with_id(
                id,
                XactKind::CopyBucket,
                vec![from.clone(), to.clone()],
            ));
            XactBckCopy::with_base(state.target.clone(), base, from, to, state.config.xaction)?
        }
        None => XactBckCopy::new(state.target.clone(), from, to, state.config.xaction)?,
    };

    let base = job.base().clone();
    state.xactions.add(base.clone())?;
    tokio::spawn(async move {
        if let Err(e) = job.run().await {
            tracing::warn!("copy-bucket job failed: {}", e);
        }
    });
    Ok(started(&base))
}

async fn start_resilver(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<BucketRequest>,
) -> ApiResult<Response> {
    let bucket: Bucket = req.bucket.parse()?;
    let job = XactResilver::new(state.target.clone(), bucket, state.config.xaction)?;
    let base = job.base().clone();
    state.xactions.add(base.clone())?;
    tokio::spawn(async move {
        if let Err(e) = job.run().await {
            tracing::warn!("resilver job failed: {}", e);
        }
    });
    Ok(started(&base))
}

async fn start_cleanup(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<BucketRequest>,
) -> ApiResult<Response> {
    let bucket: Bucket = req.bucket.parse()?;
    let job = XactCleanup::new(state.target.clone(), bucket, state.config.xaction)?;
    let base = job.base().clone();
    state.xactions.add(base.clone())?;
    tokio::spawn(async move {
        if let Err(e) = job.run().await {
            tracing::warn!("cleanup job failed: {}", e);
        }
    });
    Ok(started(&base))
}

fn started(base: &XactBase) -> Response {
    let resp = StartedResponse {
        id: base.id().to_string(),
        kind: base.kind(),
    };
    (StatusCode::ACCEPTED, ApiResponse::ok(resp)).into_response()
}
