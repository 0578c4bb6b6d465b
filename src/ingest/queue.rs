use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use tokio::sync::mpsc;

use crate::pipeline::dedup::score_article;
use crate::pipeline::quota::DAILY_ARTICLE_LIMIT;
use crate::storage::{Article, Category};

/// Keywords that mark an item as breaking news, matched case-insensitively
/// against title and content.
const BREAKING_KEYWORDS: &[&str] = &[
    "breaking",
    "urgent",
    "alert",
    "crisis",
    "emergency",
    "attack",
    "disaster",
    "election",
    "resignation",
    "impeachment",
    "war",
    "conflict",
    "coup",
    "market crash",
    "economic crisis",
    "natural disaster",
];

/// Queue length ceiling; beyond it the lowest-scored items are dropped.
const MAX_QUEUE_LEN: usize = 10 * DAILY_ARTICLE_LIMIT;

/// A novel article waiting for the next batch.
#[derive(Debug, Clone)]
pub struct HoldingItem {
    pub article: Article,
    pub enqueued_ms: i64,
}

struct Inner {
    items: Vec<HoldingItem>,
    preempt_sent: bool,
}

/// FIFO of novel articles accumulated between batches.
///
/// Single-writer (the sweep task) / single-reader (the batch task); the lock
/// covers `drain` atomically. Enqueuing a breaking-news item emits one
/// preemption signal per batch interval.
pub struct HoldingQueue {
    inner: Mutex<Inner>,
    preempt_tx: mpsc::Sender<()>,
}

impl HoldingQueue {
    /// Build a queue and the receiver the scheduler listens on for
    /// breaking-news preemption.
    pub fn new() -> (Self, mpsc::Receiver<()>) {
        let (preempt_tx, preempt_rx) = mpsc::channel(1);
        (
            Self {
                inner: Mutex::new(Inner {
                    items: Vec::new(),
                    preempt_sent: false,
                }),
                preempt_tx,
            },
            preempt_rx,
        )
    }

    /// Append novel items, scanning them for breaking-news keywords.
    pub fn enqueue(&self, articles: Vec<Article>) {
        if articles.is_empty() {
            return;
        }
        let now_ms = Utc::now().timestamp_millis();
        let breaking = articles.iter().find(|a| is_breaking(a));
        if let Some(article) = breaking {
            tracing::info!(title = %article.title, "Breaking news detected in enqueue");
        }
        let has_breaking = breaking.is_some();

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.items.extend(articles.into_iter().map(|article| HoldingItem {
            article,
            enqueued_ms: now_ms,
        }));

        if inner.items.len() > MAX_QUEUE_LEN {
            let overflow = inner.items.len() - MAX_QUEUE_LEN;
            // Drop the lowest-scored items to bound memory
            inner
                .items
                .sort_by(|a, b| {
                    score_article(&b.article, now_ms)
                        .partial_cmp(&score_article(&a.article, now_ms))
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
            inner.items.truncate(MAX_QUEUE_LEN);
            tracing::warn!(dropped = overflow, "Holding queue over capacity, dropped lowest-scored items");
        }

        if has_breaking && !inner.preempt_sent {
            // At most one signal per batch; the flag resets on drain
            if self.preempt_tx.try_send(()).is_ok() {
                inner.preempt_sent = true;
            }
        }
    }

    /// Take everything currently held and reset the preemption latch.
    pub fn drain(&self) -> Vec<HoldingItem> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.preempt_sent = false;
        std::mem::take(&mut inner.items)
    }

    pub fn size(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).items.len()
    }

    pub fn by_category(&self) -> HashMap<Category, usize> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut counts = HashMap::new();
        for item in &inner.items {
            *counts.entry(item.article.category).or_insert(0) += 1;
        }
        counts
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.items.clear();
        inner.preempt_sent = false;
    }
}

fn is_breaking(article: &Article) -> bool {
    let title = article.title.to_lowercase();
    let content = article.content.to_lowercase();
    BREAKING_KEYWORDS
        .iter()
        .any(|k| title.contains(k) || content.contains(k))
}
