use anyhow::Result;
use rusqlite::Connection;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::db::{query, writer};
use crate::pipeline::similarity::{
    cosine_similarity, cosine_similarity_batch, is_valid_embedding, mean_embedding,
};
use crate::utils::config::ClusterParams;

#[derive(Debug, Default, Clone)]
pub struct AssignOutcome {
    pub assigned: usize,
    pub clusters_created: usize,
    /// Clusters whose membership changed, including freshly created ones.
    pub touched_clusters: Vec<i64>,
}

/// Assign every completed, still-unclustered embedding of one media item to
/// an event cluster, creating clusters where nothing is similar enough.
///
/// Greedy and incremental: each embedding joins the best-scoring existing
/// centroid at or above `assign_threshold`, otherwise it seeds a new
/// cluster. Ties go to the first-enumerated cluster. Centroids of touched
/// clusters are recomputed once, after the whole media batch.
pub fn assign_media_embeddings(
    conn: &Connection,
    media_id: i64,
    event_id: i64,
    params: &ClusterParams,
) -> Result<AssignOutcome> {
    let tx = conn.unchecked_transaction()?;

    let embeddings = query::get_unclustered_media_embeddings(&tx, media_id)?;
    if embeddings.is_empty() {
        return Ok(AssignOutcome::default());
    }

    let mut cluster_ids: Vec<i64> = Vec::new();
    let mut centroids: Vec<Vec<f32>> = Vec::new();
    for cluster in query::get_event_clusters(&tx, event_id)? {
        cluster_ids.push(cluster.id);
        centroids.push(cluster.centroid);
    }

    let mut outcome = AssignOutcome::default();
    let mut touched: HashSet<i64> = HashSet::new();

    for embedding in &embeddings {
        if !is_valid_embedding(&embedding.embedding) {
            warn!(embedding_id = embedding.id, "skipping invalid embedding during assignment");
            continue;
        }

        let target = if centroids.is_empty() {
            None
        } else {
            let sims = cosine_similarity_batch(&embedding.embedding, &centroids);
            let mut best_idx = 0usize;
            let mut best_sim = sims[0];
            for (idx, sim) in sims.iter().enumerate().skip(1) {
                if *sim > best_sim {
                    best_sim = *sim;
                    best_idx = idx;
                }
            }
            (best_sim >= params.assign_threshold).then_some(best_idx)
        };

        let cluster_id = match target {
            Some(idx) => cluster_ids[idx],
            None => {
                let id = writer::insert_cluster(&tx, Some(event_id), &embedding.embedding)?;
                cluster_ids.push(id);
                centroids.push(embedding.embedding.clone());
                outcome.clusters_created += 1;
                id
            }
        };

        writer::assign_embedding_cluster(&tx, embedding.id, Some(cluster_id))?;
        touched.insert(cluster_id);
        outcome.assigned += 1;
    }

    let mut touched: Vec<i64> = touched.into_iter().collect();
    touched.sort_unstable();
    for &cluster_id in &touched {
        recompute_centroid(&tx, cluster_id)?;
    }
    outcome.touched_clusters = touched;

    tx.commit()?;
    debug!(
        media_id,
        event_id,
        assigned = outcome.assigned,
        created = outcome.clusters_created,
        "incremental clustering done"
    );
    Ok(outcome)
}

/// Rewrite the stored centroid as the mean of the cluster's valid,
/// event-media members. A cluster with no remaining valid members is left
/// untouched rather than zeroed.
fn recompute_centroid(conn: &Connection, cluster_id: i64) -> Result<()> {
    let members = query::get_cluster_member_embeddings(conn, cluster_id)?;
    match mean_embedding(&members) {
        Some(centroid) => {
            writer::update_cluster_centroid(conn, cluster_id, &centroid)?;
        }
        None => {
            debug!(cluster_id, "cluster has no valid members; leaving centroid as-is");
        }
    }
    Ok(())
}

#[derive(Debug, Default, Clone)]
pub struct MergeOutcome {
    pub merged: usize,
    pub remaining: usize,
    /// Clusters that absorbed another cluster this pass.
    pub survivors: Vec<i64>,
}

/// Fold near-duplicate clusters of one event into each other.
///
/// Single greedy pass over the upper triangle of the pairwise centroid
/// similarity matrix, in index order. The later cluster of a qualifying
/// pair is folded into the earlier one: members reassigned, identity
/// transferred when the survivor has none, the empty shell deleted. A
/// cluster merged away is ignored for the rest of the pass; survivors get
/// their centroids recomputed at the end.
pub fn merge_event_clusters(
    conn: &Connection,
    event_id: i64,
    params: &ClusterParams,
) -> Result<MergeOutcome> {
    let tx = conn.unchecked_transaction()?;

    let clusters: Vec<_> = query::get_event_clusters(&tx, event_id)?
        .into_iter()
        .filter(|c| is_valid_embedding(&c.centroid))
        .collect();

    let mut merged_away: HashSet<i64> = HashSet::new();
    let mut dirty: Vec<i64> = Vec::new();
    let mut merged = 0usize;

    for i in 0..clusters.len() {
        if merged_away.contains(&clusters[i].id) {
            continue;
        }
        for j in (i + 1)..clusters.len() {
            if merged_away.contains(&clusters[j].id) {
                continue;
            }
            let sim = cosine_similarity(&clusters[i].centroid, &clusters[j].centroid);
            if sim < params.merge_threshold {
                continue;
            }

            let moved = writer::reassign_cluster_members(&tx, clusters[j].id, clusters[i].id)?;
            if clusters[i].user_id.is_none() {
                if let Some(user_id) = clusters[j].user_id {
                    writer::set_cluster_user(&tx, clusters[i].id, Some(user_id))?;
                }
            }
            writer::delete_cluster(&tx, clusters[j].id)?;
            merged_away.insert(clusters[j].id);
            if !dirty.contains(&clusters[i].id) {
                dirty.push(clusters[i].id);
            }
            merged += 1;
            debug!(
                event_id,
                survivor = clusters[i].id,
                folded = clusters[j].id,
                similarity = sim as f64,
                members_moved = moved,
                "merged near-duplicate clusters"
            );
        }
    }

    for &cluster_id in &dirty {
        recompute_centroid(&tx, cluster_id)?;
    }

    let remaining = query::count_event_clusters(&tx, event_id)?;
    tx.commit()?;

    if merged > 0 {
        info!(event_id, merged, remaining, "cluster merge pass complete");
    }
    Ok(MergeOutcome { merged, remaining: remaining as usize, survivors: dirty })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;
    use crate::models::face::EmbeddingStatus;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::apply_schema(&conn).unwrap();
        conn
    }

    fn seed_event(conn: &Connection) -> i64 {
        let owner = writer::insert_user(conn, "owner").unwrap();
        writer::insert_event(conn, "party", owner).unwrap()
    }

    fn seed_face(conn: &Connection, event_id: i64, index: i64, embedding: &[f32]) -> i64 {
        let media =
            writer::insert_media(conn, Some(event_id), "https://cdn/m.jpg", None, None).unwrap();
        writer::insert_face_embedding(conn, media, index, embedding, None, EmbeddingStatus::Pending)
            .unwrap();
        writer::mark_media_embeddings_completed(conn, media).unwrap();
        media
    }

    #[test]
    fn first_embedding_seeds_a_cluster() {
        let conn = test_conn();
        let event = seed_event(&conn);
        let media = seed_face(&conn, event, 0, &[0.1, 0.2, 0.3]);

        let params = ClusterParams::default();
        let outcome = assign_media_embeddings(&conn, media, event, &params).unwrap();
        assert_eq!(outcome.clusters_created, 1);
        assert_eq!(outcome.assigned, 1);

        let clusters = query::get_event_clusters(&conn, event).unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].centroid, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn rerun_with_nothing_unclustered_is_a_no_op() {
        let conn = test_conn();
        let event = seed_event(&conn);
        let media = seed_face(&conn, event, 0, &[1.0, 0.0, 0.0]);
        let params = ClusterParams::default();

        assign_media_embeddings(&conn, media, event, &params).unwrap();
        let before = query::get_event_clusters(&conn, event).unwrap();

        let outcome = assign_media_embeddings(&conn, media, event, &params).unwrap();
        assert_eq!(outcome.assigned, 0);
        assert_eq!(outcome.clusters_created, 0);
        assert_eq!(query::get_event_clusters(&conn, event).unwrap()[0].centroid, before[0].centroid);
    }

    #[test]
    fn merge_is_idempotent_once_converged() {
        let conn = test_conn();
        let event = seed_event(&conn);
        let params = ClusterParams::default();

        writer::insert_cluster(&conn, Some(event), &[1.0, 0.0, 0.05]).unwrap();
        writer::insert_cluster(&conn, Some(event), &[1.0, 0.05, 0.0]).unwrap();

        let first = merge_event_clusters(&conn, event, &params).unwrap();
        assert_eq!(first.merged, 1);
        let second = merge_event_clusters(&conn, event, &params).unwrap();
        assert_eq!(second.merged, 0);
        assert_eq!(second.remaining, first.remaining);
    }

    #[test]
    fn distant_clusters_are_never_merged() {
        let conn = test_conn();
        let event = seed_event(&conn);
        let params = ClusterParams::default();

        writer::insert_cluster(&conn, Some(event), &[1.0, 0.0, 0.0]).unwrap();
        writer::insert_cluster(&conn, Some(event), &[0.0, 1.0, 0.0]).unwrap();

        let outcome = merge_event_clusters(&conn, event, &params).unwrap();
        assert_eq!(outcome.merged, 0);
        assert_eq!(outcome.remaining, 2);
    }
}
