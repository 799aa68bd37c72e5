use anyhow::Result;
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::db::{query, writer};
use crate::notify::{self, NotificationSink};
use crate::pipeline::similarity::{cosine_distance, cosine_similarity, is_valid_embedding};
use crate::utils::config::ClusterParams;

/// Try to name event clusters after enrolled users.
///
/// A user's score against a cluster is the mean similarity of the cluster
/// centroid across all of that user's reference angles, so a single odd
/// angle cannot push a wrong identity over the line. The threshold is
/// deliberately strict: an unknown cluster is a better outcome than a
/// misidentified one. Returns the number of clusters that changed identity.
pub fn match_clusters_to_users(
    conn: &Connection,
    event_id: i64,
    cluster_ids: &[i64],
    params: &ClusterParams,
    sink: &dyn NotificationSink,
) -> Result<usize> {
    if cluster_ids.is_empty() {
        return Ok(0);
    }

    let tx = conn.unchecked_transaction()?;

    let references = query::get_user_references(&tx)?;
    if references.is_empty() {
        debug!(event_id, "no enrolled users; skipping cluster identity matching");
        return Ok(0);
    }
    let owner = query::get_event_owner(&tx, event_id)?;

    let mut matched = 0usize;
    for &cluster_id in cluster_ids {
        let cluster = match query::get_cluster(&tx, cluster_id)? {
            Some(c) => c,
            None => continue, // merged away earlier in the run
        };
        if !is_valid_embedding(&cluster.centroid) {
            warn!(cluster_id, "cluster centroid is invalid; skipping identity matching");
            continue;
        }

        let mut best: Option<(i64, f32)> = None;
        for user in &references {
            let mut total = 0f32;
            let mut used = 0usize;
            for reference in &user.embeddings {
                if !is_valid_embedding(reference) {
                    continue;
                }
                total += cosine_similarity(&cluster.centroid, reference);
                used += 1;
            }
            if used == 0 {
                continue;
            }
            let score = total / used as f32;
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((user.user_id, score));
            }
        }

        if let Some((user_id, score)) = best {
            if score >= params.identity_threshold && cluster.user_id != Some(user_id) {
                writer::set_cluster_user(&tx, cluster_id, Some(user_id))?;
                matched += 1;
                info!(event_id, cluster_id, user_id, score = score as f64, "cluster matched to user");
                sink.notify(
                    user_id,
                    notify::CLUSTER_MATCHED_TO_USER,
                    json!({ "event_id": event_id, "cluster_id": cluster_id }),
                );
                if let Some(owner_id) = owner {
                    sink.notify(
                        owner_id,
                        notify::CLUSTER_USER_IDENTIFIED,
                        json!({ "event_id": event_id, "cluster_id": cluster_id, "user_id": user_id }),
                    );
                }
            }
        }
    }

    tx.commit()?;
    Ok(matched)
}

#[derive(Debug, Default, Clone)]
pub struct FaceMatchOutcome {
    pub total: usize,
    pub matched: usize,
}

/// Write the per-face match ledger for one media item: one row per detected
/// face, matched or not, annotated with whether the matched user is an
/// approved participant of the event. This is finer-grained and more
/// auditable than the cluster-level identity above.
pub fn record_face_matches(
    conn: &Connection,
    event_id: i64,
    media_id: i64,
    params: &ClusterParams,
    sink: &dyn NotificationSink,
) -> Result<FaceMatchOutcome> {
    let tx = conn.unchecked_transaction()?;

    let faces = query::get_media_embeddings(&tx, media_id)?;
    if faces.is_empty() {
        return Ok(FaceMatchOutcome::default());
    }

    // Primary reference per user: the query orders 'center' first.
    let references: Vec<(i64, Vec<f32>)> = query::get_user_references(&tx)?
        .into_iter()
        .filter_map(|mut user| {
            user.embeddings.retain(|e| is_valid_embedding(e));
            let first = user.embeddings.into_iter().next()?;
            Some((user.user_id, first))
        })
        .collect();

    let mut outcome = FaceMatchOutcome::default();
    let mut per_user: HashMap<i64, usize> = HashMap::new();

    for face in &faces {
        if !is_valid_embedding(&face.embedding) {
            warn!(embedding_id = face.id, "skipping invalid embedding during face matching");
            continue;
        }

        let mut best: Option<(i64, f32)> = None;
        for (user_id, reference) in &references {
            let distance = cosine_distance(&face.embedding, reference);
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((*user_id, distance));
            }
        }

        let (matched_user, distance) = match best {
            Some((user_id, distance)) if distance < params.face_match_distance => {
                (Some(user_id), Some(distance as f64))
            }
            Some((_, distance)) => (None, Some(distance as f64)),
            None => (None, None),
        };

        let is_participant = match matched_user {
            Some(user_id) => query::is_approved_participant(&tx, event_id, user_id)?,
            None => false,
        };

        writer::insert_face_match(
            &tx,
            event_id,
            media_id,
            face.embedding_index,
            matched_user,
            distance,
            is_participant,
        )?;
        outcome.total += 1;
        if let Some(user_id) = matched_user {
            outcome.matched += 1;
            *per_user.entry(user_id).or_default() += 1;
        }
    }

    tx.commit()?;

    for (user_id, count) in &per_user {
        sink.notify(
            *user_id,
            notify::FACE_MATCH_BATCH,
            json!({ "event_id": event_id, "media_id": media_id, "count": count }),
        );
    }
    if outcome.total > 0 {
        if let Some(owner_id) = query::get_event_owner(conn, event_id)? {
            sink.notify(
                owner_id,
                notify::FACE_MATCHING_COMPLETED,
                json!({
                    "event_id": event_id,
                    "media_id": media_id,
                    "total": outcome.total,
                    "matched": outcome.matched,
                }),
            );
        }
    }

    Ok(outcome)
}
