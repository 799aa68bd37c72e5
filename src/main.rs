use std::sync::Arc;

use gather_face_backend::api::embed::{EmbedClient, RetryPolicy};
use gather_face_backend::notify::LogSink;
use gather_face_backend::pipeline::{self, PipelineContext, PipelineService};
use gather_face_backend::stats::Stats;
use gather_face_backend::utils::config::Config;
use gather_face_backend::utils::logging;
use gather_face_backend::db;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let cfg = Config::from_env();

    let db_dir = cfg.data.join("db");
    std::fs::create_dir_all(&db_dir)?;
    let db_path = db_dir.join("gather.db");
    let pool = db::create_pool(&db_path, 10)?;

    let embed = EmbedClient::new(
        &cfg.embed_api,
        cfg.embed_timeout,
        RetryPolicy { max_attempts: cfg.embed_retries, base_delay: cfg.embed_retry_delay },
    )?;

    let ctx = Arc::new(PipelineContext {
        pool,
        embed: Arc::new(embed),
        params: cfg.params,
        sink: Arc::new(LogSink),
        stats: Arc::new(Stats::new()),
    });

    let _service =
        PipelineService::start(ctx.clone(), cfg.face_threads, cfg.task_retries, cfg.task_retry_delay);
    info!(
        embed_api = %cfg.embed_api,
        workers = cfg.face_threads,
        "face pipeline worker started"
    );

    // Periodic repair pass for embeddings that never got clustered
    // (crashed runs, historical rows).
    {
        let ctx = ctx.clone();
        let interval = cfg.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match pipeline::recovery_sweep(&ctx).await {
                    Ok(0) => {}
                    Ok(events) => info!(events, "recovery sweep reclustered events"),
                    Err(e) => error!("recovery sweep failed: {e}"),
                }
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    let snapshot = ctx.stats.snapshot();
    info!(
        media = snapshot.media_processed,
        embeddings = snapshot.embeddings_stored,
        clusters = snapshot.clusters_created,
        "shutting down"
    );
    Ok(())
}
