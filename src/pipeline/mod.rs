pub mod cluster;
pub mod identity;
pub mod recluster;
pub mod rematch;
pub mod similarity;

use anyhow::Result;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::api::embed::{EmbedClient, EmbedError};
use crate::db::{query, writer, DbPool};
use crate::models::face::EmbeddingStatus;
use crate::models::media::MediaRow;
use crate::notify::{self, NotificationSink};
use crate::pipeline::similarity::is_valid_embedding;
use crate::stats::Stats;
use crate::utils::config::ClusterParams;

/// The two entry points from the surrounding application.
#[derive(Debug, Clone)]
pub enum PipelineJob {
    MediaUploaded { media_id: i64, image_url: String },
    UserEnrolled { user_id: i64, event_id: Option<i64> },
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Embed(#[from] EmbedError),
    #[error("media {0} not found")]
    MissingMedia(i64),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    /// Data-integrity problems won't heal on retry; everything else might.
    fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Embed(e) => e.is_transient(),
            PipelineError::MissingMedia(_) => false,
            PipelineError::Other(_) => true,
        }
    }
}

/// Everything a worker task needs; cloned into each stage closure.
pub struct PipelineContext {
    pub pool: DbPool,
    pub embed: Arc<EmbedClient>,
    pub params: ClusterParams,
    pub sink: Arc<dyn NotificationSink>,
    pub stats: Arc<Stats>,
}

/// Handle exposed to the upload/enrollment layer. Enqueueing is
/// fire-and-forget relative to the caller's request handling.
#[derive(Clone)]
pub struct PipelineService {
    job_tx: mpsc::Sender<PipelineJob>,
}

impl PipelineService {
    pub fn start(
        ctx: Arc<PipelineContext>,
        workers: usize,
        task_retries: u32,
        task_retry_delay: Duration,
    ) -> Self {
        let (job_tx, job_rx) = mpsc::channel(4_096);
        start_workers(workers, job_rx, ctx, task_retries, task_retry_delay);
        Self { job_tx }
    }

    pub async fn on_media_uploaded(&self, media_id: i64, image_url: &str) -> bool {
        self.job_tx
            .send(PipelineJob::MediaUploaded { media_id, image_url: image_url.to_string() })
            .await
            .is_ok()
    }

    pub async fn on_user_enrolled_or_approved(&self, user_id: i64, event_id: Option<i64>) -> bool {
        self.job_tx.send(PipelineJob::UserEnrolled { user_id, event_id }).await.is_ok()
    }
}

/// Round-robin distributor feeding n worker tasks, each draining its own
/// queue so one slow job never starves the others.
pub fn start_workers(
    n: usize,
    mut rx: mpsc::Receiver<PipelineJob>,
    ctx: Arc<PipelineContext>,
    task_retries: u32,
    task_retry_delay: Duration,
) {
    let mut worker_txs = Vec::new();
    for _ in 0..n.max(1) {
        let (wt, wr) = mpsc::channel::<PipelineJob>(1_024);
        worker_txs.push(wt);
        let ctx = ctx.clone();
        tokio::spawn(async move {
            run_worker(wr, ctx, task_retries, task_retry_delay).await;
        });
    }

    tokio::spawn(async move {
        let mut idx = 0usize;
        while let Some(job) = rx.recv().await {
            let target = idx % worker_txs.len();
            if worker_txs[target].send(job).await.is_err() {
                break;
            }
            idx += 1;
        }
    });
}

async fn run_worker(
    mut rx: mpsc::Receiver<PipelineJob>,
    ctx: Arc<PipelineContext>,
    task_retries: u32,
    task_retry_delay: Duration,
) {
    while let Some(job) = rx.recv().await {
        let mut attempt = 0u32;
        loop {
            match run_job(&ctx, &job).await {
                Ok(()) => break,
                Err(e) if e.is_retryable() && attempt + 1 < task_retries.max(1) => {
                    attempt += 1;
                    warn!(attempt, "pipeline job failed: {e}; retrying");
                    tokio::time::sleep(task_retry_delay).await;
                }
                Err(e) => {
                    error!("pipeline job failed permanently: {e}");
                    ctx.stats.inc_jobs_failed();
                    if let PipelineJob::MediaUploaded { media_id, .. } = &job {
                        if let Err(fail_err) = fail_media_job(&ctx, *media_id).await {
                            error!(media_id, "could not mark media job failed: {fail_err}");
                        }
                    }
                    break;
                }
            }
        }
    }
}

async fn run_job(ctx: &Arc<PipelineContext>, job: &PipelineJob) -> Result<(), PipelineError> {
    match job {
        PipelineJob::MediaUploaded { media_id, image_url } => {
            process_media(ctx, *media_id, image_url).await
        }
        PipelineJob::UserEnrolled { user_id, event_id } => {
            process_enrollment(ctx, *user_id, *event_id).await.map_err(Into::into)
        }
    }
}

async fn with_conn<T, F>(pool: &DbPool, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&rusqlite::Connection) -> Result<T> + Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let conn = pool.get()?;
        f(&conn)
    })
    .await
    .map_err(|e| anyhow::anyhow!("blocking task panicked: {e}"))?
}

/// The full media path: extract → cluster → merge → identify. Each stage
/// commits on its own, so a crash between stages leaves recoverable state
/// (completed embeddings with no cluster are picked up by the sweep).
///
/// Two media of the same event processed concurrently may both spawn a
/// cluster for the same new person; cluster identity is only eventually
/// unique, after a later merge pass reconciles the duplicates.
pub async fn process_media(
    ctx: &Arc<PipelineContext>,
    media_id: i64,
    image_url: &str,
) -> Result<(), PipelineError> {
    let media = with_conn(&ctx.pool, move |conn| query::get_media(conn, media_id))
        .await?
        .ok_or(PipelineError::MissingMedia(media_id))?;

    let faces = match ctx.embed.embed_media(image_url).await {
        Ok(faces) => faces,
        Err(EmbedError::Service(message)) => {
            // The service reports undetectable faces as an application-level
            // error; for the pipeline that is a valid empty result.
            debug!(media_id, %message, "embed service found no usable faces");
            Vec::new()
        }
        Err(e) => return Err(e.into()),
    };

    let stored = with_conn(&ctx.pool, {
        let faces = faces.clone();
        move |conn| store_embeddings(conn, media_id, &faces)
    })
    .await?;
    ctx.stats.inc_embeddings_stored(stored.stored as u64);
    ctx.stats.inc_embeddings_skipped(stored.skipped as u64);

    if let Some(event_id) = media.event_id {
        let params = ctx.params;
        let sink = ctx.sink.clone();
        let outcome = with_conn(&ctx.pool, move |conn| {
            let assigned = cluster::assign_media_embeddings(conn, media_id, event_id, &params)?;
            let merge = cluster::merge_event_clusters(conn, event_id, &params)?;
            // Merge survivors count as touched too: an untouched cluster that
            // absorbed a touched one has a new centroid worth re-matching.
            let mut touched = assigned.touched_clusters.clone();
            for id in &merge.survivors {
                if !touched.contains(id) {
                    touched.push(*id);
                }
            }
            let identified = identity::match_clusters_to_users(
                conn,
                event_id,
                &touched,
                &params,
                sink.as_ref(),
            )?;
            let matches =
                identity::record_face_matches(conn, event_id, media_id, &params, sink.as_ref())?;
            Ok((assigned, merge, identified, matches))
        })
        .await?;

        let (assigned, merge, _identified, matches) = outcome;
        ctx.stats.inc_clusters_created(assigned.clusters_created as u64);
        ctx.stats.inc_clusters_merged(merge.merged as u64);
        ctx.stats.inc_face_matches(matches.total as u64);
    }

    ctx.stats.inc_media_processed();
    notify_uploader(&media, ctx, stored.stored);
    info!(
        media_id,
        faces = stored.stored,
        skipped = stored.skipped,
        "media embedding pipeline complete"
    );
    Ok(())
}

struct StoredEmbeddings {
    stored: i64,
    skipped: i64,
}

/// One transaction: rows in as pending, flipped to completed, face count
/// stamped on the media. Invalid vectors are counted and skipped, never
/// stored.
fn store_embeddings(
    conn: &rusqlite::Connection,
    media_id: i64,
    faces: &[crate::api::embed::FaceRecord],
) -> Result<StoredEmbeddings> {
    let tx = conn.unchecked_transaction()?;
    let mut stored = 0i64;
    let mut skipped = 0i64;

    for (index, face) in faces.iter().enumerate() {
        if !is_valid_embedding(&face.embedding) {
            warn!(media_id, index, "embed service returned invalid vector; skipping");
            skipped += 1;
            continue;
        }
        let area_json = match &face.facial_area {
            Some(area) => Some(serde_json::to_string(area)?),
            None => None,
        };
        writer::insert_face_embedding(
            &tx,
            media_id,
            index as i64,
            &face.embedding,
            area_json.as_deref(),
            EmbeddingStatus::Pending,
        )?;
        stored += 1;
    }

    writer::mark_media_embeddings_completed(&tx, media_id)?;
    writer::set_media_face_count(&tx, media_id, stored)?;
    tx.commit()?;
    Ok(StoredEmbeddings { stored, skipped })
}

fn notify_uploader(media: &MediaRow, ctx: &Arc<PipelineContext>, face_count: i64) {
    if let Some(uploader) = media.uploaded_by_id {
        ctx.sink.notify(
            uploader,
            notify::EMBEDDING_COMPLETED,
            json!({ "media_id": media.id, "face_count": face_count }),
        );
    }
}

/// Terminal failure path: flag whatever is still in flight for this media
/// and tell the uploader. The rows themselves stay behind for the sweep.
async fn fail_media_job(ctx: &Arc<PipelineContext>, media_id: i64) -> Result<()> {
    let sink = ctx.sink.clone();
    with_conn(&ctx.pool, move |conn| {
        writer::mark_media_embeddings_failed(conn, media_id)?;
        if let Some(media) = query::get_media(conn, media_id)? {
            if let Some(uploader) = media.uploaded_by_id {
                sink.notify(
                    uploader,
                    notify::EMBEDDING_FAILED,
                    json!({ "media_id": media_id }),
                );
            }
        }
        Ok(())
    })
    .await
}

pub async fn process_enrollment(
    ctx: &Arc<PipelineContext>,
    user_id: i64,
    event_id: Option<i64>,
) -> Result<()> {
    let params = ctx.params;
    let sink = ctx.sink.clone();
    let outcome = with_conn(&ctx.pool, move |conn| match event_id {
        Some(event_id) => {
            rematch::rematch_user_in_event(conn, user_id, event_id, &params, sink.as_ref())
        }
        None => rematch::rematch_user_all_events(conn, user_id, &params, sink.as_ref()),
    })
    .await?;
    ctx.stats.inc_retro_matches(outcome.matched as u64);
    Ok(())
}

/// Periodic repair pass: any event holding completed-but-unclustered
/// embeddings gets a batch recluster. Returns the number of events touched.
pub async fn recovery_sweep(ctx: &Arc<PipelineContext>) -> Result<usize> {
    let params = ctx.params;
    let sink = ctx.sink.clone();
    with_conn(&ctx.pool, move |conn| {
        let event_ids = query::get_events_with_unclustered_embeddings(conn)?;
        let count = event_ids.len();
        for event_id in event_ids {
            if let Err(e) = recluster::recluster_event(conn, event_id, &params, sink.as_ref()) {
                warn!(event_id, "recovery recluster failed: {e}");
            }
        }
        Ok(count)
    })
    .await
}
