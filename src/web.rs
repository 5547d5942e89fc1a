use crate::{
    records::{Record, RecordKind},
    worker::{queue, Job, Worker},
};
use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::{signal, sync::RwLock};

#[derive(Clone)]
pub(crate) struct SharedState {
    pub(crate) worker: Arc<RwLock<Worker>>,
}

async fn start_app(worker: Worker) {
    let worker = Arc::new(RwLock::new(worker));

    let signal = shutdown_signal(worker.clone());
    let shared_state = Arc::new(SharedState {
        worker: worker.clone(),
    });

    async fn shutdown_signal(worker: Arc<RwLock<Worker>>) {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        tokio::select! {
            _ = ctrl_c => {
                let mut worker = worker.write().await;
                worker.shutdown();

                log::warn!("waiting for queue to stop");
                worker.wait_task_queue_finish();
            },
            _ = terminate => {},
        }
    }

    let router = app_router(shared_state);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await.unwrap();
    log::info!("listening on 0.0.0.0:8080");
    axum::serve(listener, router)
        .with_graceful_shutdown(signal)
        .await
        .unwrap();
}

pub(crate) fn app_router(state: Arc<SharedState>) -> Router {
    Router::new()
        .route("/api/jobs", post(enqueue_job))
        .route("/api/task_queue", get(task_queue))
        .route("/api/records/search", post(search_records))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(state)
}

pub fn start_daemon(worker: Worker) {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(async { start_app(worker).await });
}

// Wraps `anyhow::Error` so handlers can use `?`.
#[derive(Debug)]
struct HttpError(anyhow::Error);

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        log::error!("{:?}", self.0);
        (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            json!({"error": self.0.to_string()}).to_string(),
        )
            .into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

async fn enqueue_job(
    State(state): State<Arc<SharedState>>,
    Json(job): Json<Job>,
) -> impl IntoResponse {
    log::debug!("job payload: {job:?}");

    let worker = state.worker.read().await;
    match worker.enqueue(job) {
        Ok(()) => (
            axum::http::StatusCode::ACCEPTED,
            json!({"queued": true}).to_string(),
        ),
        Err(err) => {
            log::error!("{err}");
            (
                axum::http::StatusCode::SERVICE_UNAVAILABLE,
                json!({"error": err.to_string()}).to_string(),
            )
        }
    }
}

async fn task_queue(State(state): State<Arc<SharedState>>) -> Json<queue::QueueDump> {
    let worker = state.worker.read().await;
    Json(queue::read_queue_dump(worker.dump_store().as_ref()))
}

#[derive(Debug, Clone, Deserialize)]
struct SearchRecordsRequest {
    #[serde(rename = "type", default)]
    kind: RecordKind,
    key: String,
}

async fn search_records(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<SearchRecordsRequest>,
) -> Result<Json<Vec<Record>>, HttpError> {
    let worker = state.worker.read().await;
    let record = worker.store.find_by_key(payload.kind, &payload.key)?;
    Ok(Json(record.into_iter().collect()))
}
