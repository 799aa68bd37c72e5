use anyhow::Result;
use rusqlite::Connection;
use serde_json::json;
use tracing::{info, warn};

use crate::db::{query, writer};
use crate::notify::{self, NotificationSink};
use crate::pipeline::cluster::{self, MergeOutcome};
use crate::pipeline::similarity::{cosine_distance, is_valid_embedding, mean_embedding};
use crate::utils::config::ClusterParams;

#[derive(Debug, Default, Clone)]
pub struct ReclusterOutcome {
    pub scanned: usize,
    pub grouped: usize,
    pub clusters_created: usize,
    pub merged: usize,
}

/// Recovery path: density-group every event embedding that never received a
/// cluster (historical rows, or rows left behind by a crashed run).
///
/// DBSCAN over cosine distance. Points without a dense-enough neighborhood
/// stay unclustered instead of being forced into a group. Only event-photo
/// embeddings are scanned; reference embeddings live in their own table.
/// New groups are folded into pre-existing near-duplicates by an immediate
/// merge pass.
pub fn recluster_event(
    conn: &Connection,
    event_id: i64,
    params: &ClusterParams,
    sink: &dyn NotificationSink,
) -> Result<ReclusterOutcome> {
    let rows = query::get_unclustered_event_embeddings(conn, event_id)?;
    let mut outcome = ReclusterOutcome { scanned: rows.len(), ..Default::default() };

    let valid: Vec<_> = rows
        .into_iter()
        .filter(|row| {
            let ok = is_valid_embedding(&row.embedding);
            if !ok {
                warn!(embedding_id = row.id, "skipping invalid embedding during reclustering");
            }
            ok
        })
        .collect();
    if valid.is_empty() {
        return Ok(outcome);
    }

    let vectors: Vec<&[f32]> = valid.iter().map(|row| row.embedding.as_slice()).collect();
    let groups = dbscan(&vectors, params.recluster_eps, params.recluster_min_samples);
    if groups.is_empty() {
        return Ok(outcome);
    }

    let owner = query::get_event_owner(conn, event_id)?;
    let tx = conn.unchecked_transaction()?;
    for group in &groups {
        let members: Vec<Vec<f32>> =
            group.iter().map(|&idx| valid[idx].embedding.clone()).collect();
        let centroid = match mean_embedding(&members) {
            Some(c) => c,
            None => continue,
        };

        let cluster_id = writer::insert_cluster(&tx, Some(event_id), &centroid)?;
        let label = format!("Person {}", outcome.clusters_created + 1);
        writer::set_cluster_label(&tx, cluster_id, Some(&label))?;
        for &idx in group {
            writer::assign_embedding_cluster(&tx, valid[idx].id, Some(cluster_id))?;
        }
        outcome.clusters_created += 1;
        outcome.grouped += group.len();

        if let Some(owner_id) = owner {
            sink.notify(
                owner_id,
                notify::UNKNOWN_CLUSTER_CREATED,
                json!({ "event_id": event_id, "cluster_id": cluster_id, "size": group.len() }),
            );
        }
    }
    tx.commit()?;

    let MergeOutcome { merged, .. } = cluster::merge_event_clusters(conn, event_id, params)?;
    outcome.merged = merged;

    info!(
        event_id,
        scanned = outcome.scanned,
        grouped = outcome.grouped,
        created = outcome.clusters_created,
        merged,
        "batch reclustering complete"
    );
    Ok(outcome)
}

/// Plain DBSCAN in cosine-distance space. `min_samples` counts neighbors
/// excluding the point itself; points that never reach a dense neighborhood
/// are noise and stay out of every group.
pub fn dbscan(vectors: &[&[f32]], eps: f32, min_samples: usize) -> Vec<Vec<usize>> {
    if vectors.is_empty() {
        return vec![];
    }

    let mut visited = vec![false; vectors.len()];
    let mut clusters = Vec::new();

    for i in 0..vectors.len() {
        if visited[i] {
            continue;
        }
        visited[i] = true;
        let mut neighbors = find_neighbors(vectors, i, eps);
        if neighbors.len() < min_samples {
            continue;
        }

        let mut cluster = vec![i];
        let mut j = 0;
        while j < neighbors.len() {
            let neighbor_idx = neighbors[j];
            if !visited[neighbor_idx] {
                visited[neighbor_idx] = true;
                let neighbor_neighbors = find_neighbors(vectors, neighbor_idx, eps);
                if neighbor_neighbors.len() >= min_samples {
                    neighbors.extend(neighbor_neighbors);
                }
            }
            if !cluster.contains(&neighbor_idx) {
                cluster.push(neighbor_idx);
            }
            j += 1;
        }

        clusters.push(cluster);
    }

    clusters
}

fn find_neighbors(vectors: &[&[f32]], idx: usize, eps: f32) -> Vec<usize> {
    let embedding = vectors[idx];
    let mut neighbors = Vec::new();
    for (i, other) in vectors.iter().enumerate() {
        if i == idx {
            continue;
        }
        if cosine_distance(embedding, other) <= eps {
            neighbors.push(i);
        }
    }
    neighbors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dbscan_groups_dense_points_and_leaves_noise() {
        let a1 = [1.0f32, 0.0, 0.0];
        let a2 = [0.98f32, 0.05, 0.0];
        let a3 = [0.97f32, 0.0, 0.06];
        let b = [0.0f32, 1.0, 0.0];
        let vectors: Vec<&[f32]> = vec![&a1, &a2, &a3, &b];

        let clusters = dbscan(&vectors, 0.32, 2);
        assert_eq!(clusters.len(), 1);
        let mut members = clusters[0].clone();
        members.sort_unstable();
        assert_eq!(members, vec![0, 1, 2]);
    }

    #[test]
    fn dbscan_with_too_few_neighbors_yields_nothing() {
        let a = [1.0f32, 0.0];
        let b = [0.0f32, 1.0];
        let vectors: Vec<&[f32]> = vec![&a, &b];
        assert!(dbscan(&vectors, 0.32, 2).is_empty());
    }

    #[test]
    fn dbscan_empty_input() {
        assert!(dbscan(&[], 0.32, 2).is_empty());
    }
}
