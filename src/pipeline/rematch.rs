use anyhow::Result;
use rusqlite::Connection;
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use tracing::info;

use crate::db::{query, writer};
use crate::notify::{self, NotificationSink};
use crate::pipeline::similarity::{cosine_distance, is_valid_embedding};
use crate::utils::config::ClusterParams;

#[derive(Debug, Default, Clone)]
pub struct RematchOutcome {
    pub matched: usize,
    pub media: usize,
}

/// Re-evaluate one event's unmatched faces against a user who just became
/// eligible (enrollment completed, participation approved). Mutates the
/// existing ledger rows in place; never creates rows, never touches
/// clusters.
pub fn rematch_user_in_event(
    conn: &Connection,
    user_id: i64,
    event_id: i64,
    params: &ClusterParams,
    sink: &dyn NotificationSink,
) -> Result<RematchOutcome> {
    let reference = match query::get_user_reference_embedding(conn, user_id)? {
        Some(r) if is_valid_embedding(&r) => r,
        _ => {
            info!(user_id, "no reference embedding for user; skipping retroactive match");
            return Ok(RematchOutcome::default());
        }
    };

    let tx = conn.unchecked_transaction()?;
    let outcome = rematch_against(&tx, user_id, event_id, &reference, params)?;
    tx.commit()?;

    if outcome.matched > 0 {
        sink.notify(
            user_id,
            notify::RETROACTIVE_MATCHES_FOUND,
            json!({
                "event_id": event_id,
                "matched_count": outcome.matched,
                "media_count": outcome.media,
            }),
        );
        info!(user_id, event_id, matched = outcome.matched, "retroactive matches found");
    } else {
        info!(user_id, event_id, "no retroactive matches found");
    }
    Ok(outcome)
}

/// Same as above across every event the user participates in as approved.
/// One summary notification for the whole sweep.
pub fn rematch_user_all_events(
    conn: &Connection,
    user_id: i64,
    params: &ClusterParams,
    sink: &dyn NotificationSink,
) -> Result<RematchOutcome> {
    let reference = match query::get_user_reference_embedding(conn, user_id)? {
        Some(r) if is_valid_embedding(&r) => r,
        _ => {
            info!(user_id, "no reference embedding for user; skipping retroactive match");
            return Ok(RematchOutcome::default());
        }
    };

    let event_ids = query::get_approved_event_ids(conn, user_id)?;
    if event_ids.is_empty() {
        info!(user_id, "user has no approved event participations");
        return Ok(RematchOutcome::default());
    }

    let tx = conn.unchecked_transaction()?;
    let mut total = RematchOutcome::default();
    let mut per_event: BTreeMap<i64, usize> = BTreeMap::new();
    for event_id in event_ids {
        let outcome = rematch_against(&tx, user_id, event_id, &reference, params)?;
        if outcome.matched > 0 {
            per_event.insert(event_id, outcome.matched);
        }
        total.matched += outcome.matched;
        total.media += outcome.media;
    }
    tx.commit()?;

    if total.matched > 0 {
        let events: Vec<_> = per_event
            .iter()
            .map(|(event_id, count)| json!({ "event_id": event_id, "match_count": count }))
            .collect();
        sink.notify(
            user_id,
            notify::RETROACTIVE_MATCHES_FOUND,
            json!({
                "matched_count": total.matched,
                "events_count": per_event.len(),
                "events": events,
            }),
        );
        info!(user_id, matched = total.matched, events = per_event.len(), "retroactive matches found");
    } else {
        info!(user_id, "no retroactive matches found");
    }
    Ok(total)
}

fn rematch_against(
    conn: &Connection,
    user_id: i64,
    event_id: i64,
    reference: &[f32],
    params: &ClusterParams,
) -> Result<RematchOutcome> {
    let mut outcome = RematchOutcome::default();
    let mut matched_media: HashSet<i64> = HashSet::new();

    for face in query::get_unmatched_faces(conn, event_id)? {
        let embedding =
            match query::get_face_embedding_by_index(conn, face.media_id, face.embedding_index)? {
                Some(e) if is_valid_embedding(&e) => e,
                _ => continue,
            };

        let distance = cosine_distance(reference, &embedding);
        if distance < params.face_match_distance {
            writer::update_face_match(conn, face.match_id, user_id, distance as f64, true)?;
            outcome.matched += 1;
            matched_media.insert(face.media_id);
        }
    }

    outcome.media = matched_media.len();
    Ok(outcome)
}
