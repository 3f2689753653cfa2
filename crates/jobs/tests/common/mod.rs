//! Fake job store served over real HTTP for client tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use wardrobe_jobs::api::JobStoreApi;
use wardrobe_jobs::client::HttpJobClient;

/// Shared state of the fake store.
#[derive(Default)]
pub struct FakeStore {
    pub jobs: HashMap<String, Value>,
    pub triggers: HashMap<String, u32>,
    /// Status code returned by every trigger call, when set.
    pub trigger_status: Option<StatusCode>,
    /// Error text returned (with 422) by every create call, when set.
    pub reject_create: Option<String>,
    /// Reads left before a triggered job flips to `succeeded`.
    pub reads_until_done: u32,
    next_id: u32,
}

pub type Shared = Arc<Mutex<FakeStore>>;

async fn create_job(State(store): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut store = store.lock().unwrap();
    if let Some(error) = store.reject_create.clone() {
        return (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({ "error": error }))).into_response();
    }
    store.next_id += 1;
    let id = format!("job-{}", store.next_id);
    store.jobs.insert(
        id.clone(),
        json!({
            "id": id,
            "type": body["type"],
            "status": "queued",
            "input": body["input"],
        }),
    );
    (StatusCode::CREATED, Json(json!({ "id": id, "status": "queued" }))).into_response()
}

async fn trigger_job(State(store): State<Shared>, Path(id): Path<String>) -> StatusCode {
    let mut store = store.lock().unwrap();
    if let Some(status) = store.trigger_status {
        return status;
    }
    if !store.jobs.contains_key(&id) {
        return StatusCode::NOT_FOUND;
    }
    *store.triggers.entry(id.clone()).or_default() += 1;
    if let Some(job) = store.jobs.get_mut(&id) {
        if job["status"] == "queued" {
            job["status"] = json!("running");
        }
    }
    StatusCode::ACCEPTED
}

async fn get_job(State(store): State<Shared>, Path(id): Path<String>) -> Response {
    let mut store = store.lock().unwrap();
    let remaining = store.reads_until_done;
    let Some(job) = store.jobs.get_mut(&id) else {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "job not found" }))).into_response();
    };
    if job["status"] != "queued" && remaining == 0 {
        job["status"] = json!("succeeded");
        job["result"] = json!({ "image_id": format!("img-{id}") });
    }
    let body = job.clone();
    store.reads_until_done = remaining.saturating_sub(1);
    Json(body).into_response()
}

/// Start the fake store on an ephemeral port. Returns its base URL.
pub async fn spawn_store(store: Shared) -> String {
    let app = Router::new()
        .route("/jobs", post(create_job))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/trigger", post(trigger_job))
        .with_state(store);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// HTTP job client pointed at `base_url` with short timeouts.
pub fn client_for(base_url: &str) -> HttpJobClient {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap();
    HttpJobClient::new(JobStoreApi::new(
        http,
        format!("{base_url}/"),
        Duration::from_secs(2),
    ))
}
