use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaRow {
    pub id: i64,
    pub event_id: Option<i64>,
    pub external_url: String,
    pub filename: Option<String>,
    pub uploaded_by_id: Option<i64>,
    pub face_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRow {
    pub id: i64,
    pub name: String,
    pub created_by_id: i64,
}

/// An enrolled user's reference embeddings, one per captured angle.
#[derive(Debug, Clone)]
pub struct UserReference {
    pub user_id: i64,
    pub embeddings: Vec<Vec<f32>>,
}
