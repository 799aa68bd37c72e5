#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use gather_face_backend::api::embed::{EmbedClient, RetryPolicy};
use gather_face_backend::db::{self, writer, DbPool};
use gather_face_backend::models::face::EmbeddingStatus;
use gather_face_backend::notify::MemorySink;
use gather_face_backend::pipeline::PipelineContext;
use gather_face_backend::stats::Stats;
use gather_face_backend::utils::config::ClusterParams;
use rusqlite::Connection;
use tempfile::TempDir;

/// Create a temporary SQLite database for testing
pub fn setup_test_db() -> (TempDir, PathBuf, Connection) {
    let tmp = TempDir::new().unwrap();
    let db_dir = tmp.path().join("db");
    std::fs::create_dir_all(&db_dir).unwrap();
    let db_path = db_dir.join("gather.db");
    let conn = db::open_or_create(&db_path).unwrap();
    (tmp, db_path, conn)
}

pub fn setup_test_pool() -> (TempDir, DbPool) {
    let tmp = TempDir::new().unwrap();
    let db_dir = tmp.path().join("db");
    std::fs::create_dir_all(&db_dir).unwrap();
    let pool = db::create_pool(db_dir.join("gather.db"), 5).unwrap();
    (tmp, pool)
}

pub struct Fixture {
    pub owner_id: i64,
    pub event_id: i64,
}

/// One owner + one event, the smallest world the pipeline operates in.
pub fn seed_event(conn: &Connection) -> Fixture {
    let owner_id = writer::insert_user(conn, "owner").unwrap();
    let event_id = writer::insert_event(conn, "summer-party", owner_id).unwrap();
    Fixture { owner_id, event_id }
}

pub fn seed_media(conn: &Connection, event_id: i64, uploaded_by: Option<i64>) -> i64 {
    writer::insert_media(conn, Some(event_id), "https://cdn.example/p.jpg", None, uploaded_by)
        .unwrap()
}

/// A completed face embedding at the given index.
pub fn seed_embedding(conn: &Connection, media_id: i64, index: i64, embedding: &[f32]) -> i64 {
    let id = writer::insert_face_embedding(
        conn,
        media_id,
        index,
        embedding,
        None,
        EmbeddingStatus::Pending,
    )
    .unwrap();
    writer::mark_media_embeddings_completed(conn, media_id).unwrap();
    id
}

pub fn seed_enrolled_user(conn: &Connection, username: &str, reference: &[f32]) -> i64 {
    let user_id = writer::insert_user(conn, username).unwrap();
    writer::insert_reference_embedding(conn, user_id, "center", reference).unwrap();
    user_id
}

pub fn make_context(pool: DbPool, embed_base_url: &str) -> (Arc<PipelineContext>, Arc<MemorySink>) {
    make_context_with_retries(pool, embed_base_url, 3)
}

pub fn make_context_with_retries(
    pool: DbPool,
    embed_base_url: &str,
    embed_retries: u32,
) -> (Arc<PipelineContext>, Arc<MemorySink>) {
    let embed = EmbedClient::new(
        embed_base_url,
        Duration::from_secs(5),
        RetryPolicy { max_attempts: embed_retries, base_delay: Duration::from_millis(10) },
    )
    .unwrap();
    let sink = Arc::new(MemorySink::new());
    let ctx = Arc::new(PipelineContext {
        pool,
        embed: Arc::new(embed),
        params: ClusterParams::default(),
        sink: sink.clone(),
        stats: Arc::new(Stats::new()),
    });
    (ctx, sink)
}

/// Wait for a condition to become true
pub async fn wait_for_condition<F>(mut condition: F, max_attempts: usize, delay_ms: u64) -> bool
where
    F: FnMut() -> bool,
{
    use tokio::time::sleep;
    for _ in 0..max_attempts {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(delay_ms)).await;
    }
    false
}

/// A vector with the requested cosine similarity to the x axis, handy for
/// building embeddings at exact distances from `[1, 0, 0]`.
pub fn unit_at_similarity(sim: f32) -> Vec<f32> {
    vec![sim, (1.0 - sim * sim).max(0.0).sqrt(), 0.0]
}

pub mod mock_embed {
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone)]
    struct MockState {
        calls: Arc<AtomicUsize>,
        fail_first: usize,
        response: Arc<serde_json::Value>,
    }

    async fn embed_handler(State(state): State<MockState>) -> Response {
        let call = state.calls.fetch_add(1, Ordering::SeqCst);
        if call < state.fail_first {
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        } else {
            Json((*state.response).clone()).into_response()
        }
    }

    async fn image_handler() -> Vec<u8> {
        // Payload bytes are opaque to the pipeline; a tiny JPEG marker will do.
        vec![0xFF, 0xD8, 0xFF, 0xD9]
    }

    /// Spawn a mock embedding service. Returns its base URL, an image URL it
    /// serves, and the request counter for the /embed route.
    pub async fn serve(
        response: serde_json::Value,
        fail_first: usize,
    ) -> (String, String, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let state = MockState { calls: calls.clone(), fail_first, response: Arc::new(response) };
        let app = Router::new()
            .route("/embed", post(embed_handler))
            .route("/image.jpg", get(image_handler))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), format!("http://{addr}/image.jpg"), calls)
    }

    pub fn faces_json(embeddings: &[Vec<f32>]) -> serde_json::Value {
        serde_json::Value::Array(
            embeddings
                .iter()
                .map(|e| {
                    serde_json::json!({
                        "embedding": e,
                        "facial_area": { "x": 10.0, "y": 12.0, "w": 64.0, "h": 64.0 }
                    })
                })
                .collect(),
        )
    }
}
