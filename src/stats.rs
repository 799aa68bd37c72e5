use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Process-wide pipeline counters, updated by the worker tasks.
pub struct Stats {
    started: Instant,
    media_processed: AtomicU64,
    embeddings_stored: AtomicU64,
    embeddings_skipped: AtomicU64,
    clusters_created: AtomicU64,
    clusters_merged: AtomicU64,
    face_matches_recorded: AtomicU64,
    retro_matches_found: AtomicU64,
    jobs_failed: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub uptime_secs: u64,
    pub media_processed: u64,
    pub embeddings_stored: u64,
    pub embeddings_skipped: u64,
    pub clusters_created: u64,
    pub clusters_merged: u64,
    pub face_matches_recorded: u64,
    pub retro_matches_found: u64,
    pub jobs_failed: u64,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            media_processed: AtomicU64::new(0),
            embeddings_stored: AtomicU64::new(0),
            embeddings_skipped: AtomicU64::new(0),
            clusters_created: AtomicU64::new(0),
            clusters_merged: AtomicU64::new(0),
            face_matches_recorded: AtomicU64::new(0),
            retro_matches_found: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
        }
    }

    pub fn inc_media_processed(&self) { self.media_processed.fetch_add(1, Ordering::Relaxed); }
    pub fn inc_embeddings_stored(&self, n: u64) { self.embeddings_stored.fetch_add(n, Ordering::Relaxed); }
    pub fn inc_embeddings_skipped(&self, n: u64) { self.embeddings_skipped.fetch_add(n, Ordering::Relaxed); }
    pub fn inc_clusters_created(&self, n: u64) { self.clusters_created.fetch_add(n, Ordering::Relaxed); }
    pub fn inc_clusters_merged(&self, n: u64) { self.clusters_merged.fetch_add(n, Ordering::Relaxed); }
    pub fn inc_face_matches(&self, n: u64) { self.face_matches_recorded.fetch_add(n, Ordering::Relaxed); }
    pub fn inc_retro_matches(&self, n: u64) { self.retro_matches_found.fetch_add(n, Ordering::Relaxed); }
    pub fn inc_jobs_failed(&self) { self.jobs_failed.fetch_add(1, Ordering::Relaxed); }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uptime_secs: self.started.elapsed().as_secs(),
            media_processed: self.media_processed.load(Ordering::Relaxed),
            embeddings_stored: self.embeddings_stored.load(Ordering::Relaxed),
            embeddings_skipped: self.embeddings_skipped.load(Ordering::Relaxed),
            clusters_created: self.clusters_created.load(Ordering::Relaxed),
            clusters_merged: self.clusters_merged.load(Ordering::Relaxed),
            face_matches_recorded: self.face_matches_recorded.load(Ordering::Relaxed),
            retro_matches_found: self.retro_matches_found.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
        }
    }
}
