use serde::{Deserialize, Serialize};

/// Background processing state of a stored face embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl EmbeddingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingStatus::Pending => "pending",
            EmbeddingStatus::Processing => "processing",
            EmbeddingStatus::Completed => "completed",
            EmbeddingStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(EmbeddingStatus::Pending),
            "processing" => Some(EmbeddingStatus::Processing),
            "completed" => Some(EmbeddingStatus::Completed),
            "failed" => Some(EmbeddingStatus::Failed),
            _ => None,
        }
    }
}

/// Face bounding box as reported by the embedding service, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FacialArea {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceEmbeddingRow {
    pub id: i64,
    pub media_id: i64,
    pub embedding_index: i64,
    pub embedding: Vec<f32>,
    pub facial_area: Option<FacialArea>,
    pub status: EmbeddingStatus,
    pub cluster_id: Option<i64>,
    pub tag: Option<String>,
}

/// One candidate identity within one event. An unset `user_id` means the
/// cluster is still an unknown person.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceClusterRow {
    pub id: i64,
    pub event_id: Option<i64>,
    pub centroid: Vec<f32>,
    pub label: Option<String>,
    pub user_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceMatchRow {
    pub id: i64,
    pub event_id: i64,
    pub media_id: i64,
    pub embedding_index: i64,
    pub matched_user_id: Option<i64>,
    pub distance: Option<f64>,
    pub is_participant: bool,
}
