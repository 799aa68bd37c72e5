use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::decode_embedding_blob;
use crate::models::face::{EmbeddingStatus, FaceClusterRow, FaceEmbeddingRow, FaceMatchRow, FacialArea};
use crate::models::media::{MediaRow, UserReference};

fn embedding_row(row: &Row<'_>) -> rusqlite::Result<(i64, i64, i64, Vec<u8>, Option<String>, String, Option<i64>, Option<String>)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn decode_face_embedding(
    raw: (i64, i64, i64, Vec<u8>, Option<String>, String, Option<i64>, Option<String>),
) -> Result<FaceEmbeddingRow> {
    let (id, media_id, embedding_index, blob, area_json, status, cluster_id, tag) = raw;
    let facial_area: Option<FacialArea> = match area_json {
        Some(s) => serde_json::from_str(&s).ok(),
        None => None,
    };
    Ok(FaceEmbeddingRow {
        id,
        media_id,
        embedding_index,
        embedding: decode_embedding_blob(&blob)?,
        facial_area,
        status: EmbeddingStatus::parse(&status).unwrap_or(EmbeddingStatus::Failed),
        cluster_id,
        tag,
    })
}

const EMBEDDING_COLS: &str =
    "id, media_id, embedding_index, embedding_blob, facial_area, status, cluster_id, tag";

pub fn get_media(conn: &Connection, media_id: i64) -> Result<Option<MediaRow>> {
    conn.query_row(
        "SELECT id, event_id, external_url, filename, uploaded_by_id, face_count FROM media WHERE id = ?1",
        params![media_id],
        |row| {
            Ok(MediaRow {
                id: row.get(0)?,
                event_id: row.get(1)?,
                external_url: row.get(2)?,
                filename: row.get(3)?,
                uploaded_by_id: row.get(4)?,
                face_count: row.get(5)?,
            })
        },
    )
    .optional()
    .map_err(Into::into)
}

pub fn get_event_owner(conn: &Connection, event_id: i64) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT created_by_id FROM events WHERE id = ?1",
        params![event_id],
        |row| row.get(0),
    )
    .optional()
    .map_err(Into::into)
}

pub fn is_approved_participant(conn: &Connection, event_id: i64, user_id: i64) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM event_participants WHERE event_id = ?1 AND user_id = ?2 AND status = 'approved'",
            params![event_id, user_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn get_approved_event_ids(conn: &Connection, user_id: i64) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT event_id FROM event_participants WHERE user_id = ?1 AND status = 'approved' ORDER BY event_id",
    )?;
    let rows = stmt.query_map(params![user_id], |row| row.get(0))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Completed embeddings of one media item that no cluster has claimed yet,
/// in stable id order.
pub fn get_unclustered_media_embeddings(
    conn: &Connection,
    media_id: i64,
) -> Result<Vec<FaceEmbeddingRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {EMBEDDING_COLS} FROM face_embeddings
         WHERE media_id = ?1 AND status = 'completed' AND cluster_id IS NULL
         ORDER BY id"
    ))?;
    let rows = stmt.query_map(params![media_id], embedding_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(decode_face_embedding(row?)?);
    }
    Ok(out)
}

pub fn get_media_embeddings(conn: &Connection, media_id: i64) -> Result<Vec<FaceEmbeddingRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {EMBEDDING_COLS} FROM face_embeddings
         WHERE media_id = ?1 AND status = 'completed'
         ORDER BY embedding_index"
    ))?;
    let rows = stmt.query_map(params![media_id], embedding_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(decode_face_embedding(row?)?);
    }
    Ok(out)
}

pub fn get_face_embedding_by_index(
    conn: &Connection,
    media_id: i64,
    embedding_index: i64,
) -> Result<Option<Vec<f32>>> {
    let blob: Option<Vec<u8>> = conn
        .query_row(
            "SELECT embedding_blob FROM face_embeddings
             WHERE media_id = ?1 AND embedding_index = ?2 AND status = 'completed'",
            params![media_id, embedding_index],
            |row| row.get(0),
        )
        .optional()?;
    match blob {
        Some(b) => Ok(Some(decode_embedding_blob(&b)?)),
        None => Ok(None),
    }
}

/// Event-photo embeddings that never got a cluster, for the backfill pass.
/// Reference embeddings live in their own table and are never scanned here.
pub fn get_unclustered_event_embeddings(
    conn: &Connection,
    event_id: i64,
) -> Result<Vec<FaceEmbeddingRow>> {
    let mut stmt = conn.prepare(
        "SELECT fe.id, fe.media_id, fe.embedding_index, fe.embedding_blob, fe.facial_area, fe.status, fe.cluster_id, fe.tag
         FROM face_embeddings fe
         JOIN media m ON m.id = fe.media_id
         WHERE m.event_id = ?1 AND fe.status = 'completed' AND fe.cluster_id IS NULL
         ORDER BY fe.id",
    )?;
    let rows = stmt.query_map(params![event_id], embedding_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(decode_face_embedding(row?)?);
    }
    Ok(out)
}

pub fn get_event_clusters(conn: &Connection, event_id: i64) -> Result<Vec<FaceClusterRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, event_id, centroid_blob, label, user_id FROM face_clusters
         WHERE event_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![event_id], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, Option<i64>>(1)?,
            row.get::<_, Vec<u8>>(2)?,
            row.get::<_, Option<String>>(3)?,
            row.get::<_, Option<i64>>(4)?,
        ))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (id, event_id, blob, label, user_id) = row?;
        out.push(FaceClusterRow {
            id,
            event_id,
            centroid: decode_embedding_blob(&blob)?,
            label,
            user_id,
        });
    }
    Ok(out)
}

pub fn get_cluster(conn: &Connection, cluster_id: i64) -> Result<Option<FaceClusterRow>> {
    let raw = conn
        .query_row(
            "SELECT id, event_id, centroid_blob, label, user_id FROM face_clusters WHERE id = ?1",
            params![cluster_id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                ))
            },
        )
        .optional()?;
    match raw {
        Some((id, event_id, blob, label, user_id)) => Ok(Some(FaceClusterRow {
            id,
            event_id,
            centroid: decode_embedding_blob(&blob)?,
            label,
            user_id,
        })),
        None => Ok(None),
    }
}

/// Member embeddings that feed a cluster centroid: completed, attached to
/// event media. Non-event media (profile pictures) never contributes.
pub fn get_cluster_member_embeddings(conn: &Connection, cluster_id: i64) -> Result<Vec<Vec<f32>>> {
    let mut stmt = conn.prepare(
        "SELECT fe.embedding_blob FROM face_embeddings fe
         JOIN media m ON m.id = fe.media_id
         WHERE fe.cluster_id = ?1 AND fe.status = 'completed' AND m.event_id IS NOT NULL
         ORDER BY fe.id",
    )?;
    let rows = stmt.query_map(params![cluster_id], |row| row.get::<_, Vec<u8>>(0))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(decode_embedding_blob(&row?)?);
    }
    Ok(out)
}

/// All enrolled users with their reference angle embeddings, grouped per user.
pub fn get_user_references(conn: &Connection) -> Result<Vec<UserReference>> {
    let mut stmt = conn.prepare(
        "SELECT user_id, embedding_blob FROM reference_embeddings
         WHERE status = 'completed'
         ORDER BY user_id, CASE angle WHEN 'center' THEN 0 WHEN 'left' THEN 1 WHEN 'right' THEN 2 ELSE 3 END",
    )?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)))?;
    let mut out: Vec<UserReference> = Vec::new();
    for row in rows {
        let (user_id, blob) = row?;
        let embedding = decode_embedding_blob(&blob)?;
        match out.last_mut() {
            Some(last) if last.user_id == user_id => last.embeddings.push(embedding),
            _ => out.push(UserReference { user_id, embeddings: vec![embedding] }),
        }
    }
    Ok(out)
}

/// The user's primary reference vector: the 'center' angle when present,
/// otherwise the first stored angle.
pub fn get_user_reference_embedding(conn: &Connection, user_id: i64) -> Result<Option<Vec<f32>>> {
    let blob: Option<Vec<u8>> = conn
        .query_row(
            "SELECT embedding_blob FROM reference_embeddings
             WHERE user_id = ?1 AND status = 'completed'
             ORDER BY CASE angle WHEN 'center' THEN 0 ELSE 1 END, id
             LIMIT 1",
            params![user_id],
            |row| row.get(0),
        )
        .optional()?;
    match blob {
        Some(b) => Ok(Some(decode_embedding_blob(&b)?)),
        None => Ok(None),
    }
}

#[derive(Debug, Clone)]
pub struct UnmatchedFace {
    pub match_id: i64,
    pub event_id: i64,
    pub media_id: i64,
    pub embedding_index: i64,
}

pub fn get_unmatched_faces(conn: &Connection, event_id: i64) -> Result<Vec<UnmatchedFace>> {
    let mut stmt = conn.prepare(
        "SELECT id, event_id, media_id, embedding_index FROM face_matches
         WHERE event_id = ?1 AND matched_user_id IS NULL
         ORDER BY id",
    )?;
    let rows = stmt.query_map(params![event_id], |row| {
        Ok(UnmatchedFace {
            match_id: row.get(0)?,
            event_id: row.get(1)?,
            media_id: row.get(2)?,
            embedding_index: row.get(3)?,
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn get_media_face_matches(conn: &Connection, media_id: i64) -> Result<Vec<FaceMatchRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, event_id, media_id, embedding_index, matched_user_id, distance, is_participant
         FROM face_matches WHERE media_id = ?1 ORDER BY embedding_index",
    )?;
    let rows = stmt.query_map(params![media_id], |row| {
        Ok(FaceMatchRow {
            id: row.get(0)?,
            event_id: row.get(1)?,
            media_id: row.get(2)?,
            embedding_index: row.get(3)?,
            matched_user_id: row.get(4)?,
            distance: row.get(5)?,
            is_participant: row.get::<_, i64>(6)? != 0,
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Events that own completed embeddings no cluster has claimed; input for
/// the recovery sweep.
pub fn get_events_with_unclustered_embeddings(conn: &Connection) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT m.event_id FROM face_embeddings fe
         JOIN media m ON m.id = fe.media_id
         WHERE m.event_id IS NOT NULL AND fe.status = 'completed' AND fe.cluster_id IS NULL
         ORDER BY m.event_id",
    )?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn count_event_clusters(conn: &Connection, event_id: i64) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM face_clusters WHERE event_id = ?1",
        params![event_id],
        |row| row.get(0),
    )
    .map_err(Into::into)
}

pub fn count_cluster_members(conn: &Connection, cluster_id: i64) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM face_embeddings WHERE cluster_id = ?1",
        params![cluster_id],
        |row| row.get(0),
    )
    .map_err(Into::into)
}
