use std::collections::HashMap;

use crate::pipeline::dedup::score_article;
use crate::storage::{Article, Category};

/// Hard ceiling on articles admitted per local day across all categories.
pub const DAILY_ARTICLE_LIMIT: usize = 150;

/// Hard ceiling per category per local day.
pub const MAX_ARTICLES_PER_CATEGORY: usize = 50;

/// Target share of the daily limit per category (equal three-way split).
const CATEGORY_SPLIT: f64 = 1.0 / 3.0;

/// Outcome of quota distribution for one batch.
#[derive(Debug)]
pub struct Distribution {
    /// Articles selected for persistence and brief generation, ranked within
    /// category.
    pub selected: Vec<Article>,
    /// Categories whose cap cut candidates from this batch.
    pub categories_at_limit: Vec<Category>,
}

/// Per-category remaining room given what is already stored today.
pub fn remaining_for(category_count_today: u32) -> usize {
    let target = (DAILY_ARTICLE_LIMIT as f64 * CATEGORY_SPLIT).floor() as usize;
    let remaining = target.saturating_sub(category_count_today as usize);
    remaining.min(MAX_ARTICLES_PER_CATEGORY)
}

/// Select articles under the daily total and per-category caps.
///
/// Within each category candidates are ranked by [`score_article`] (ties:
/// earliest publish, then id) and the top `min(MAX_ARTICLES_PER_CATEGORY,
/// remaining)` survive. If the union still exceeds [`DAILY_ARTICLE_LIMIT`],
/// it is truncated round-robin across categories so the lowest-scored items
/// drop last-first.
pub fn distribute(
    unique: Vec<Article>,
    already_today: &HashMap<Category, u32>,
    now_ms: i64,
) -> Distribution {
    let mut per_category: HashMap<Category, Vec<Article>> = HashMap::new();
    for article in unique {
        per_category.entry(article.category).or_default().push(article);
    }

    let mut categories_at_limit = Vec::new();
    let mut ranked: HashMap<Category, Vec<Article>> = HashMap::new();

    for category in Category::ALL {
        let Some(mut candidates) = per_category.remove(&category) else {
            continue;
        };
        candidates.sort_by(|a, b| {
            score_article(b, now_ms)
                .partial_cmp(&score_article(a, now_ms))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.published_ms.cmp(&b.published_ms))
                .then_with(|| a.id.cmp(&b.id))
        });

        let already = already_today.get(&category).copied().unwrap_or(0);
        let cap = remaining_for(already);
        if candidates.len() > cap {
            tracing::info!(
                category = %category,
                candidates = candidates.len(),
                cap = cap,
                "Category quota reached, truncating"
            );
            categories_at_limit.push(category);
            candidates.truncate(cap);
        }
        if !candidates.is_empty() {
            ranked.insert(category, candidates);
        }
    }

    // Union cap: round-robin across categories, best-ranked first, so the
    // lowest-scored items are the ones that fall off.
    let total: usize = ranked.values().map(Vec::len).sum();
    let mut selected = Vec::with_capacity(total.min(DAILY_ARTICLE_LIMIT));
    if total > DAILY_ARTICLE_LIMIT {
        let mut cursors: HashMap<Category, usize> = HashMap::new();
        while selected.len() < DAILY_ARTICLE_LIMIT {
            let mut advanced = false;
            for category in Category::ALL {
                if selected.len() >= DAILY_ARTICLE_LIMIT {
                    break;
                }
                let Some(candidates) = ranked.get(&category) else {
                    continue;
                };
                let cursor = cursors.entry(category).or_insert(0);
                if *cursor < candidates.len() {
                    selected.push(candidates[*cursor].clone());
                    *cursor += 1;
                    advanced = true;
                }
            }
            if !advanced {
                break;
            }
        }
    } else {
        for category in Category::ALL {
            if let Some(candidates) = ranked.remove(&category) {
                selected.extend(candidates);
            }
        }
    }

    Distribution {
        selected,
        categories_at_limit,
    }
}
