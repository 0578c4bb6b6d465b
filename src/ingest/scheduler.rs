use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::feed;
use crate::ingest::breaker::CircuitRegistry;
use crate::ingest::capture::capture;
use crate::ingest::novelty::NoveltyFilter;
use crate::ingest::queue::HoldingQueue;
use crate::pipeline::runner::Newsroom;
use crate::storage::{Database, Source};

/// Tick cadences and sweep fan-out, resolved from configuration.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub sweep_interval: Duration,
    pub batch_interval: Duration,
    pub startup_delay: Duration,
    pub fetch_concurrency: usize,
}

impl PollerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            sweep_interval: Duration::from_secs(config.sweep_interval_secs),
            batch_interval: Duration::from_secs(config.batch_interval_secs),
            startup_delay: Duration::from_secs(config.startup_delay_secs),
            fetch_concurrency: config.fetch_concurrency,
        }
    }
}

enum SweepOutcome {
    Fetched { novel: usize },
    Skipped,
    Failed,
}

/// Fires fetch sweeps at short cadence and batch runs at long cadence, plus
/// immediate batches on breaking-news preemption.
pub struct Poller {
    db: Database,
    client: reqwest::Client,
    queue: Arc<HoldingQueue>,
    breakers: Arc<CircuitRegistry>,
    novelty: NoveltyFilter,
    newsroom: Arc<Newsroom>,
    config: PollerConfig,
    shutdown: CancellationToken,
}

impl Poller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Database,
        client: reqwest::Client,
        queue: Arc<HoldingQueue>,
        breakers: Arc<CircuitRegistry>,
        newsroom: Arc<Newsroom>,
        config: PollerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let novelty = NoveltyFilter::new(db.clone());
        Self {
            db,
            client,
            queue,
            breakers,
            novelty,
            newsroom,
            config,
            shutdown,
        }
    }

    /// Drive the tick loop until shutdown.
    ///
    /// The first sweep runs after the startup delay. Batch ticks and
    /// preemption signals both go through [`Newsroom::run_batch`], whose
    /// in-flight guard makes an overlapping trigger a skip, not a queue.
    /// Batches run on their own task so sweeps keep their cadence.
    pub async fn run(self, mut preempt_rx: mpsc::Receiver<()>) {
        tokio::select! {
            _ = tokio::time::sleep(self.config.startup_delay) => {}
            _ = self.shutdown.cancelled() => return,
        }

        let mut sweep_tick = tokio::time::interval(self.config.sweep_interval);
        sweep_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut batch_tick = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.batch_interval,
            self.config.batch_interval,
        );
        batch_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(
            sweep_secs = self.config.sweep_interval.as_secs(),
            batch_secs = self.config.batch_interval.as_secs(),
            "Poller started"
        );

        let mut preempt_open = true;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Poller shutting down");
                    return;
                }
                _ = sweep_tick.tick() => {
                    self.sweep().await;
                }
                _ = batch_tick.tick() => {
                    self.spawn_batch("interval");
                }
                signal = preempt_rx.recv(), if preempt_open => {
                    match signal {
                        Some(()) => self.spawn_batch("breaking-news"),
                        // Queue dropped; stop polling the closed channel
                        None => preempt_open = false,
                    }
                }
            }
        }
    }

    fn spawn_batch(&self, reason: &'static str) {
        let newsroom = Arc::clone(&self.newsroom);
        tokio::spawn(async move {
            tracing::info!(reason = reason, "Batch trigger");
            newsroom.run_batch().await;
        });
    }

    /// One pass across all active sources with bounded concurrency.
    pub async fn sweep(&self) {
        let sources = match self.db.get_active_sources().await {
            Ok(sources) => sources,
            Err(e) => {
                tracing::warn!(error = %e, "Sweep aborted: source listing failed");
                return;
            }
        };
        if sources.is_empty() {
            return;
        }

        let concurrency = self.config.fetch_concurrency.min(sources.len()).max(1);
        let outcomes: Vec<SweepOutcome> = stream::iter(sources)
            .map(|source| self.sweep_source(source))
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut fetched = 0;
        let mut skipped = 0;
        let mut failed = 0;
        let mut novel = 0;
        for outcome in outcomes {
            match outcome {
                SweepOutcome::Fetched { novel: n } => {
                    fetched += 1;
                    novel += n;
                }
                SweepOutcome::Skipped => skipped += 1,
                SweepOutcome::Failed => failed += 1,
            }
        }
        tracing::info!(
            fetched = fetched,
            skipped = skipped,
            failed = failed,
            novel = novel,
            queue = self.queue.size(),
            "Sweep complete"
        );
    }

    async fn sweep_source(&self, source: Source) -> SweepOutcome {
        if !self.breakers.admit(&source.id) {
            tracing::debug!(source = %source.id, "Skipped by circuit breaker");
            return SweepOutcome::Skipped;
        }

        let now_ms = Utc::now().timestamp_millis();
        match feed::fetch(&self.client, &source).await {
            Ok(items) => {
                self.breakers.record_success(&source.id);
                if let Err(e) = self.db.update_source_probe(&source.id, now_ms, None).await {
                    tracing::warn!(source = %source.id, error = %e, "Probe update failed");
                }

                let mut novel = Vec::new();
                for item in &items {
                    let Some(article) = capture(&source, item) else {
                        continue;
                    };
                    if self.novelty.is_new(&article).await {
                        novel.push(article);
                    }
                }
                let count = novel.len();
                tracing::debug!(source = %source.id, items = items.len(), novel = count, "Source fetched");
                self.queue.enqueue(novel);
                SweepOutcome::Fetched { novel: count }
            }
            Err(e) => {
                tracing::warn!(source = %source.id, error = %e, "Source fetch failed");
                self.breakers.record_failure(&source.id);
                if let Err(db_err) = self
                    .db
                    .update_source_probe(&source.id, now_ms, Some(&e.to_string()))
                    .await
                {
                    tracing::warn!(source = %source.id, error = %db_err, "Probe update failed");
                }
                SweepOutcome::Failed
            }
        }
    }
}
