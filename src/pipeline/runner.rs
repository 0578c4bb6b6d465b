use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Local, TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use crate::brief::prompt::PROMPT_VERSION;
use crate::brief::rewriter::{fallback_brief, BriefRewriter, RewriteError};
use crate::ingest::breaker::{CircuitRegistry, CircuitState};
use crate::ingest::queue::HoldingQueue;
use crate::pipeline::dedup::deduplicate;
use crate::pipeline::quota::{distribute, remaining_for, DAILY_ARTICLE_LIMIT};
use crate::storage::{Article, Brief, Category, Database, ProcessingLog};

/// Overall deadline on one batch, covering store and LLM work.
const BATCH_DEADLINE: Duration = Duration::from_secs(600);

/// Outcome of one batch. Always populated; failures accumulate in `errors`
/// instead of escaping the batch boundary.
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    pub success: bool,
    pub articles_processed: u32,
    pub briefs_generated: u32,
    pub errors: Vec<String>,
    pub categories_at_limit: Vec<Category>,
    pub processing_ms: u64,
    pub tokens_used: u64,
    pub cost: f64,
    pub model: String,
    pub prompt_version: String,
    pub timestamp_ms: i64,
}

impl ProcessingResult {
    fn to_log(&self) -> ProcessingLog {
        ProcessingLog {
            success: self.success,
            articles_processed: self.articles_processed,
            briefs_generated: self.briefs_generated,
            errors: self.errors.clone(),
            processing_ms: self.processing_ms,
            tokens_used: self.tokens_used,
            cost: self.cost,
            model: self.model.clone(),
            prompt_version: self.prompt_version.clone(),
            timestamp_ms: self.timestamp_ms,
        }
    }
}

/// Snapshot for the status control operation.
#[derive(Debug, Clone)]
pub struct Status {
    pub is_processing: bool,
    pub queue_size: usize,
    pub last_processed_ms: Option<i64>,
    pub circuit_snapshot: HashMap<String, CircuitState>,
}

#[derive(Debug, Clone)]
pub struct CategoryUsage {
    pub category: Category,
    pub count_today: u32,
    pub remaining: usize,
}

/// Snapshot for the daily-limits control operation.
#[derive(Debug, Clone)]
pub struct DailyLimits {
    pub total_today: u32,
    pub total_limit: usize,
    pub categories: Vec<CategoryUsage>,
}

/// Start of the current local day in epoch milliseconds.
pub(crate) fn local_midnight_ms() -> i64 {
    let now = Local::now();
    let Some(naive) = now.date_naive().and_hms_opt(0, 0, 0) else {
        return now.timestamp_millis();
    };
    match Local.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) | chrono::LocalResult::Ambiguous(dt, _) => {
            dt.timestamp_millis()
        }
        chrono::LocalResult::None => now.timestamp_millis(),
    }
}

/// The batch pipeline and its control surface.
///
/// Owns the explicit dependency graph (store, holding queue, breaker
/// registry, rewriter) assembled once at startup; there are no module-level
/// singletons.
pub struct Newsroom {
    db: Database,
    queue: Arc<HoldingQueue>,
    breakers: Arc<CircuitRegistry>,
    rewriter: BriefRewriter,
    shutdown: CancellationToken,
    is_processing: AtomicBool,
    last_processed_ms: AtomicI64,
}

impl Newsroom {
    pub fn new(
        db: Database,
        queue: Arc<HoldingQueue>,
        breakers: Arc<CircuitRegistry>,
        rewriter: BriefRewriter,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            db,
            queue,
            breakers,
            rewriter,
            shutdown,
            is_processing: AtomicBool::new(false),
            last_processed_ms: AtomicI64::new(0),
        }
    }

    /// Run one batch: drain → dedup → distribute → rewrite → persist → log.
    ///
    /// If a batch is already in flight the call returns a skipped result
    /// without queueing. No error escapes; everything lands in the returned
    /// result's error list, and the processing log is appended best-effort.
    pub async fn run_batch(&self) -> ProcessingResult {
        if self.is_processing.swap(true, Ordering::SeqCst) {
            tracing::info!("Batch already in flight, skipping trigger");
            return ProcessingResult {
                success: false,
                articles_processed: 0,
                briefs_generated: 0,
                errors: vec!["batch already in flight".to_string()],
                categories_at_limit: Vec::new(),
                processing_ms: 0,
                tokens_used: 0,
                cost: 0.0,
                model: self.rewriter.model().to_string(),
                prompt_version: PROMPT_VERSION.to_string(),
                timestamp_ms: Utc::now().timestamp_millis(),
            };
        }

        let token = self.shutdown.child_token();
        let deadline_token = token.clone();
        let result = tokio::select! {
            result = self.run_batch_inner(&token) => result,
            _ = tokio::time::sleep(BATCH_DEADLINE) => {
                deadline_token.cancel();
                tracing::error!("Batch exceeded its deadline, cancelling");
                // Give the inner future no further chances; report what we know
                ProcessingResult {
                    success: false,
                    articles_processed: 0,
                    briefs_generated: 0,
                    errors: vec!["batch deadline exceeded".to_string()],
                    categories_at_limit: Vec::new(),
                    processing_ms: BATCH_DEADLINE.as_millis() as u64,
                    tokens_used: 0,
                    cost: 0.0,
                    model: self.rewriter.model().to_string(),
                    prompt_version: PROMPT_VERSION.to_string(),
                    timestamp_ms: Utc::now().timestamp_millis(),
                }
            }
        };

        // Emission is best-effort: logging failure never reaches the caller
        if let Err(e) = self.db.append_processing_log(&result.to_log()).await {
            tracing::warn!(error = %e, "Failed to append processing log");
        }

        self.last_processed_ms
            .store(result.timestamp_ms, Ordering::SeqCst);
        self.is_processing.store(false, Ordering::SeqCst);

        tracing::info!(
            success = result.success,
            articles = result.articles_processed,
            briefs = result.briefs_generated,
            errors = result.errors.len(),
            elapsed_ms = result.processing_ms,
            "Batch complete"
        );
        result
    }

    async fn run_batch_inner(&self, token: &CancellationToken) -> ProcessingResult {
        let started = Instant::now();
        let mut errors: Vec<String> = Vec::new();

        let drained = self.queue.drain();
        tracing::info!(queued = drained.len(), "Batch started");

        let day_start = local_midnight_ms();
        let now_ms = Utc::now().timestamp_millis();

        // Day window: stored articles participate in dedup so new items
        // cluster against what already ran today
        let stored_today = match self.db.articles_in_window(day_start, now_ms + 1).await {
            Ok(articles) => articles,
            Err(e) => {
                errors.push(format!("day-window query failed: {}", e));
                Vec::new()
            }
        };
        let stored_ids: HashSet<String> = stored_today.iter().map(|a| a.id.clone()).collect();
        let mut already_today: HashMap<Category, u32> = HashMap::new();
        for article in &stored_today {
            *already_today.entry(article.category).or_insert(0) += 1;
        }

        // Stored rows come first so they win exact collisions and anchor
        // similarity clusters
        let mut dedup_input = stored_today;
        dedup_input.extend(drained.into_iter().map(|item| item.article));
        let outcome = deduplicate(dedup_input, now_ms);
        let fresh: Vec<Article> = outcome
            .unique
            .into_iter()
            .filter(|a| !stored_ids.contains(&a.id))
            .collect();

        let distribution = distribute(fresh, &already_today, now_ms);
        tracing::info!(
            selected = distribution.selected.len(),
            at_limit = ?distribution.categories_at_limit,
            "Distribution complete"
        );

        // Articles are persisted before any brief
        let (inserted, upsert_errors) = self.db.upsert_articles(&distribution.selected).await;
        errors.extend(upsert_errors);
        tracing::debug!(inserted = inserted, "Articles persisted");

        // Brief generation is serialised to bound LLM cost; in-flight work is
        // abandoned on cancellation, briefs already collected survive
        let mut briefs: Vec<Brief> = Vec::new();
        let mut rewritten_ids: Vec<String> = Vec::new();
        for article in &distribution.selected {
            if token.is_cancelled() {
                errors.push("batch cancelled before completing rewrites".to_string());
                break;
            }
            let rewrite_result = tokio::select! {
                _ = token.cancelled() => {
                    errors.push(format!("rewrite of {} abandoned on cancellation", article.id));
                    break;
                }
                result = self.rewriter.rewrite(article) => result,
            };
            match rewrite_result {
                Ok(brief) => {
                    briefs.push(brief);
                    rewritten_ids.push(article.id.clone());
                }
                Err(RewriteError::LlmUnavailable(e)) => {
                    errors.push(format!("llm call failed for {}: {}", article.id, e));
                    briefs.push(fallback_brief(article, self.rewriter.policy()));
                    rewritten_ids.push(article.id.clone());
                }
                Err(e) => {
                    errors.push(format!("rewrite failed for {}: {}", article.id, e));
                }
            }
        }

        let tokens_used: u64 = briefs.iter().map(|b| b.metadata.tokens).sum();
        let cost: f64 = briefs.iter().map(|b| b.metadata.cost).sum();

        let (briefs_stored, brief_errors) = self.db.upsert_briefs(&briefs).await;
        errors.extend(brief_errors);

        if let Err(e) = self.db.mark_brief_generated(&rewritten_ids).await {
            errors.push(format!("brief flag update failed: {}", e));
        }

        ProcessingResult {
            success: errors.is_empty(),
            articles_processed: distribution.selected.len() as u32,
            briefs_generated: briefs_stored as u32,
            errors,
            categories_at_limit: distribution.categories_at_limit,
            processing_ms: started.elapsed().as_millis() as u64,
            tokens_used,
            cost,
            model: self.rewriter.model().to_string(),
            prompt_version: PROMPT_VERSION.to_string(),
            timestamp_ms: now_ms,
        }
    }

    // ========================================================================
    // Control Surface
    // ========================================================================

    /// Manual trigger; identical semantics to a scheduled batch tick.
    pub async fn trigger_manual_batch(&self) -> ProcessingResult {
        tracing::info!("Manual batch trigger");
        self.run_batch().await
    }

    /// Administrative override clearing one source's circuit state.
    pub fn reset_circuit_breaker(&self, source_id: &str) {
        self.breakers.reset(source_id);
    }

    pub fn status(&self) -> Status {
        let last = self.last_processed_ms.load(Ordering::SeqCst);
        Status {
            is_processing: self.is_processing.load(Ordering::SeqCst),
            queue_size: self.queue.size(),
            last_processed_ms: (last > 0).then_some(last),
            circuit_snapshot: self.breakers.snapshot(),
        }
    }

    /// Totals and per-category counters for the current local day.
    pub async fn daily_limits_snapshot(&self) -> Result<DailyLimits, crate::storage::StorageError> {
        let day_start = local_midnight_ms();
        let now_ms = Utc::now().timestamp_millis();
        let counts = self
            .db
            .count_in_window_by_category(day_start, now_ms + 1)
            .await?;

        let categories = Category::ALL
            .iter()
            .map(|&category| {
                let count_today = counts.get(&category).copied().unwrap_or(0);
                CategoryUsage {
                    category,
                    count_today,
                    remaining: remaining_for(count_today),
                }
            })
            .collect();

        Ok(DailyLimits {
            total_today: counts.values().sum(),
            total_limit: DAILY_ARTICLE_LIMIT,
            categories,
        })
    }
}
