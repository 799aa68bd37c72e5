use anyhow::Result;
use rusqlite::{params, Connection};

use crate::db::encode_embedding;
use crate::models::face::EmbeddingStatus;

pub fn insert_user(conn: &Connection, username: &str) -> Result<i64> {
    let created_at = chrono::Utc::now().timestamp();
    conn.execute(
        "INSERT INTO users (username, created_at) VALUES (?1, ?2)",
        params![username, created_at],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_event(conn: &Connection, name: &str, created_by_id: i64) -> Result<i64> {
    let created_at = chrono::Utc::now().timestamp();
    conn.execute(
        "INSERT INTO events (name, created_by_id, created_at) VALUES (?1, ?2, ?3)",
        params![name, created_by_id, created_at],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn add_event_participant(
    conn: &Connection,
    event_id: i64,
    user_id: i64,
    status: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO event_participants (event_id, user_id, status) VALUES (?1, ?2, ?3)
         ON CONFLICT(event_id, user_id) DO UPDATE SET status = excluded.status",
        params![event_id, user_id, status],
    )?;
    Ok(())
}

pub fn insert_media(
    conn: &Connection,
    event_id: Option<i64>,
    external_url: &str,
    filename: Option<&str>,
    uploaded_by_id: Option<i64>,
) -> Result<i64> {
    let created_at = chrono::Utc::now().timestamp();
    conn.execute(
        "INSERT INTO media (event_id, external_url, filename, uploaded_by_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![event_id, external_url, filename, uploaded_by_id, created_at],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn set_media_face_count(conn: &Connection, media_id: i64, face_count: i64) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE media SET face_count = ?1 WHERE id = ?2",
        params![face_count, media_id],
    )?;
    Ok(updated > 0)
}

/// Inserts one detected face. Duplicate (media, index) pairs are ignored so a
/// re-run extraction never doubles rows.
pub fn insert_face_embedding(
    conn: &Connection,
    media_id: i64,
    embedding_index: i64,
    embedding: &[f32],
    facial_area_json: Option<&str>,
    status: EmbeddingStatus,
) -> Result<i64> {
    let now = chrono::Utc::now().timestamp();
    conn.execute(
        "INSERT INTO face_embeddings (media_id, embedding_index, embedding_blob, facial_area, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
         ON CONFLICT(media_id, embedding_index) DO NOTHING",
        params![
            media_id,
            embedding_index,
            encode_embedding(embedding),
            facial_area_json,
            status.as_str(),
            now
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn mark_media_embeddings_completed(conn: &Connection, media_id: i64) -> Result<usize> {
    let now = chrono::Utc::now().timestamp();
    let updated = conn.execute(
        "UPDATE face_embeddings SET status = 'completed', updated_at = ?1
         WHERE media_id = ?2 AND status = 'pending'",
        params![now, media_id],
    )?;
    Ok(updated)
}

pub fn mark_media_embeddings_failed(conn: &Connection, media_id: i64) -> Result<usize> {
    let now = chrono::Utc::now().timestamp();
    let updated = conn.execute(
        "UPDATE face_embeddings SET status = 'failed', updated_at = ?1
         WHERE media_id = ?2 AND status IN ('pending', 'processing')",
        params![now, media_id],
    )?;
    Ok(updated)
}

pub fn insert_cluster(conn: &Connection, event_id: Option<i64>, centroid: &[f32]) -> Result<i64> {
    let now = chrono::Utc::now().timestamp();
    conn.execute(
        "INSERT INTO face_clusters (event_id, centroid_blob, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?3)",
        params![event_id, encode_embedding(centroid), now],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_cluster_centroid(conn: &Connection, cluster_id: i64, centroid: &[f32]) -> Result<bool> {
    let now = chrono::Utc::now().timestamp();
    let updated = conn.execute(
        "UPDATE face_clusters SET centroid_blob = ?1, updated_at = ?2 WHERE id = ?3",
        params![encode_embedding(centroid), now, cluster_id],
    )?;
    Ok(updated > 0)
}

pub fn set_cluster_user(conn: &Connection, cluster_id: i64, user_id: Option<i64>) -> Result<bool> {
    let now = chrono::Utc::now().timestamp();
    let updated = conn.execute(
        "UPDATE face_clusters SET user_id = ?1, updated_at = ?2 WHERE id = ?3",
        params![user_id, now, cluster_id],
    )?;
    Ok(updated > 0)
}

pub fn set_cluster_label(conn: &Connection, cluster_id: i64, label: Option<&str>) -> Result<bool> {
    let now = chrono::Utc::now().timestamp();
    let updated = conn.execute(
        "UPDATE face_clusters SET label = ?1, updated_at = ?2 WHERE id = ?3",
        params![label, now, cluster_id],
    )?;
    Ok(updated > 0)
}

pub fn assign_embedding_cluster(
    conn: &Connection,
    embedding_id: i64,
    cluster_id: Option<i64>,
) -> Result<bool> {
    let now = chrono::Utc::now().timestamp();
    let updated = conn.execute(
        "UPDATE face_embeddings SET cluster_id = ?1, updated_at = ?2 WHERE id = ?3",
        params![cluster_id, now, embedding_id],
    )?;
    Ok(updated > 0)
}

pub fn reassign_cluster_members(
    conn: &Connection,
    from_cluster_id: i64,
    to_cluster_id: i64,
) -> Result<usize> {
    let now = chrono::Utc::now().timestamp();
    let updated = conn.execute(
        "UPDATE face_embeddings SET cluster_id = ?1, updated_at = ?2 WHERE cluster_id = ?3",
        params![to_cluster_id, now, from_cluster_id],
    )?;
    Ok(updated)
}

pub fn delete_cluster(conn: &Connection, cluster_id: i64) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM face_clusters WHERE id = ?1", params![cluster_id])?;
    Ok(deleted > 0)
}

/// One ledger row per detected face, matched or not. The UNIQUE constraint
/// keeps re-processing from duplicating the ledger.
pub fn insert_face_match(
    conn: &Connection,
    event_id: i64,
    media_id: i64,
    embedding_index: i64,
    matched_user_id: Option<i64>,
    distance: Option<f64>,
    is_participant: bool,
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    conn.execute(
        "INSERT INTO face_matches (event_id, media_id, embedding_index, matched_user_id, distance, is_participant, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
         ON CONFLICT(media_id, embedding_index) DO NOTHING",
        params![
            event_id,
            media_id,
            embedding_index,
            matched_user_id,
            distance,
            is_participant as i64,
            now
        ],
    )?;
    Ok(())
}

pub fn update_face_match(
    conn: &Connection,
    match_id: i64,
    matched_user_id: i64,
    distance: f64,
    is_participant: bool,
) -> Result<bool> {
    let now = chrono::Utc::now().timestamp();
    let updated = conn.execute(
        "UPDATE face_matches SET matched_user_id = ?1, distance = ?2, is_participant = ?3, updated_at = ?4
         WHERE id = ?5",
        params![matched_user_id, distance, is_participant as i64, now, match_id],
    )?;
    Ok(updated > 0)
}

pub fn insert_reference_embedding(
    conn: &Connection,
    user_id: i64,
    angle: &str,
    embedding: &[f32],
) -> Result<i64> {
    let created_at = chrono::Utc::now().timestamp();
    conn.execute(
        "INSERT INTO reference_embeddings (user_id, angle, embedding_blob, status, created_at)
         VALUES (?1, ?2, ?3, 'completed', ?4)
         ON CONFLICT(user_id, angle) DO UPDATE SET embedding_blob = excluded.embedding_blob, status = excluded.status",
        params![user_id, angle, encode_embedding(embedding), created_at],
    )?;
    Ok(conn.last_insert_rowid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::apply_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn face_embedding_insert_is_idempotent_per_index() {
        let conn = test_conn();
        let owner = insert_user(&conn, "ana").unwrap();
        let event = insert_event(&conn, "launch", owner).unwrap();
        let media = insert_media(&conn, Some(event), "https://cdn/x.jpg", None, Some(owner)).unwrap();

        insert_face_embedding(&conn, media, 0, &[1.0, 0.0], None, EmbeddingStatus::Pending).unwrap();
        insert_face_embedding(&conn, media, 0, &[0.0, 1.0], None, EmbeddingStatus::Pending).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM face_embeddings WHERE media_id = ?1",
                params![media],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn pending_rows_flip_to_completed() {
        let conn = test_conn();
        let owner = insert_user(&conn, "ben").unwrap();
        let event = insert_event(&conn, "demo", owner).unwrap();
        let media = insert_media(&conn, Some(event), "https://cdn/y.jpg", None, Some(owner)).unwrap();

        insert_face_embedding(&conn, media, 0, &[1.0], None, EmbeddingStatus::Pending).unwrap();
        insert_face_embedding(&conn, media, 1, &[2.0], None, EmbeddingStatus::Pending).unwrap();
        assert_eq!(mark_media_embeddings_completed(&conn, media).unwrap(), 2);
        assert_eq!(mark_media_embeddings_completed(&conn, media).unwrap(), 0);
    }
}
