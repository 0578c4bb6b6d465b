use std::collections::{HashMap, HashSet};

use sha2::{Digest, Sha256};

use crate::storage::Article;

/// Combined-similarity threshold above which two articles are the same story.
pub const DEDUP_SIMILARITY_THRESHOLD: f64 = 0.82;

/// Source ids whose articles carry extra weight in best-of-cluster selection.
const OFFICIAL_SOURCES: &[&str] = &[
    "white-house",
    "state-dept",
    "defense-dept",
    "federal-reserve",
    "un-news",
];

const TITLE_WEIGHT: f64 = 0.4;
const CONTENT_WEIGHT: f64 = 0.4;
const URL_WEIGHT: f64 = 0.2;

/// Result of one dedup invocation: the surviving articles plus the duplicate
/// grouping, keyed by surviving article id, for observability.
#[derive(Debug)]
pub struct DedupOutcome {
    pub unique: Vec<Article>,
    pub duplicates: HashMap<String, Vec<String>>,
}

/// Ranking score shared by best-of-cluster selection, quota ranking, and
/// holding-queue backpressure.
///
/// `min(len(content)/1000, 2.0) + 3·official + max(0, 5 − hours_since_publish)`
pub fn score_article(article: &Article, now_ms: i64) -> f64 {
    let length_score = (article.content.len() as f64 / 1000.0).min(2.0);
    let official_score = if OFFICIAL_SOURCES.contains(&article.source_id.as_str()) {
        3.0
    } else {
        0.0
    };
    let hours_since_publish = (now_ms - article.published_ms) as f64 / 3_600_000.0;
    let recency_score = (5.0 - hours_since_publish).max(0.0);
    length_score + official_score + recency_score
}

/// Jaccard similarity over whitespace-split lowercased word sets.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let set_a: HashSet<String> = a.split_whitespace().map(|w| w.to_lowercase()).collect();
    let set_b: HashSet<String> = b.split_whitespace().map(|w| w.to_lowercase()).collect();
    if set_a.is_empty() && set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    intersection as f64 / union as f64
}

/// Path-segment URL similarity.
///
/// 0 if hosts differ; 1 if both paths are empty; 0.5 if exactly one is; else
/// the shared segment count over the longer path.
pub fn url_similarity(a: &str, b: &str) -> Option<f64> {
    let url_a = url::Url::parse(a).ok()?;
    let url_b = url::Url::parse(b).ok()?;

    if url_a.host_str() != url_b.host_str() {
        return Some(0.0);
    }

    let segments_a: Vec<&str> = url_a
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();
    let segments_b: Vec<&str> = url_b
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    match (segments_a.is_empty(), segments_b.is_empty()) {
        (true, true) => Some(1.0),
        (true, false) | (false, true) => Some(0.5),
        (false, false) => {
            let set_a: HashSet<&str> = segments_a.iter().copied().collect();
            let common = segments_b.iter().filter(|s| set_a.contains(*s)).count();
            Some(common as f64 / segments_a.len().max(segments_b.len()) as f64)
        }
    }
}

/// Weighted combination of title, content, and URL similarity.
///
/// Factors missing on either side are skipped and the weights renormalised
/// over what remains, so the result stays in [0, 1].
pub fn weighted_similarity(a: &Article, b: &Article) -> f64 {
    let mut total = 0.0;
    let mut weight_sum = 0.0;

    if !a.title.is_empty() && !b.title.is_empty() {
        total += TITLE_WEIGHT * jaccard(&a.title, &b.title);
        weight_sum += TITLE_WEIGHT;
    }
    if !a.content.is_empty() && !b.content.is_empty() {
        total += CONTENT_WEIGHT * jaccard(&a.content, &b.content);
        weight_sum += CONTENT_WEIGHT;
    }
    if let Some(url_sim) = url_similarity(&a.url, &b.url) {
        total += URL_WEIGHT * url_sim;
        weight_sum += URL_WEIGHT;
    }

    if weight_sum == 0.0 {
        0.0
    } else {
        total / weight_sum
    }
}

fn exact_key(article: &Article) -> String {
    let title = article.title.to_lowercase();
    let url = article.url.to_lowercase();
    let content: String = article.content.to_lowercase().chars().take(100).collect();
    let digest = Sha256::digest(format!("{}{}{}", title, url, content).as_bytes());
    format!("{:x}", digest)
}

/// Similarity cache scoped to one dedup invocation, keyed by ordered id pair.
struct SimilarityCache {
    entries: HashMap<(String, String), f64>,
}

impl SimilarityCache {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    fn get_or_compute(&mut self, a: &Article, b: &Article) -> f64 {
        let key = if a.id <= b.id {
            (a.id.clone(), b.id.clone())
        } else {
            (b.id.clone(), a.id.clone())
        };
        *self
            .entries
            .entry(key)
            .or_insert_with(|| weighted_similarity(a, b))
    }
}

/// Deduplicate a batch.
///
/// The input is the drained holding queue prepended with the articles already
/// stored today, in that order, so stored rows win exact-key collisions and
/// anchor similarity clusters. Deterministic given input order:
///
/// 1. Exact pass on `sha256(lower(title) ∥ lower(url) ∥ first_100(lower(content)))`,
///    later collisions dropped.
/// 2. Pairwise weighted similarity; `a_j` (j > i) joins `a_i`'s cluster at
///    [`DEDUP_SIMILARITY_THRESHOLD`].
/// 3. Best-of-cluster by [`score_article`], ties broken by earliest publish,
///    then lexicographic id.
pub fn deduplicate(input: Vec<Article>, now_ms: i64) -> DedupOutcome {
    // Exact pass
    let mut seen_keys = HashSet::new();
    let mut exact_dropped: Vec<String> = Vec::new();
    let mut candidates: Vec<Article> = Vec::new();
    for article in input {
        if seen_keys.insert(exact_key(&article)) {
            candidates.push(article);
        } else {
            exact_dropped.push(article.id.clone());
        }
    }

    // Similarity pass: clusters[i] collects indices of candidates[i]'s group
    let mut cache = SimilarityCache::new();
    let mut cluster_of: Vec<Option<usize>> = vec![None; candidates.len()];
    let mut clusters: Vec<Vec<usize>> = Vec::new();

    for i in 0..candidates.len() {
        if cluster_of[i].is_some() {
            continue;
        }
        let cluster_idx = clusters.len();
        clusters.push(vec![i]);
        cluster_of[i] = Some(cluster_idx);

        for j in (i + 1)..candidates.len() {
            if cluster_of[j].is_some() {
                continue;
            }
            let similarity = cache.get_or_compute(&candidates[i], &candidates[j]);
            if similarity >= DEDUP_SIMILARITY_THRESHOLD {
                clusters[cluster_idx].push(j);
                cluster_of[j] = Some(cluster_idx);
            }
        }
    }

    // Best-of-cluster
    let mut unique = Vec::new();
    let mut duplicates: HashMap<String, Vec<String>> = HashMap::new();

    for cluster in &clusters {
        let winner = *cluster
            .iter()
            .min_by(|&&a, &&b| {
                let score_a = score_article(&candidates[a], now_ms);
                let score_b = score_article(&candidates[b], now_ms);
                score_b
                    .partial_cmp(&score_a)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| candidates[a].published_ms.cmp(&candidates[b].published_ms))
                    .then_with(|| candidates[a].id.cmp(&candidates[b].id))
            })
            .unwrap_or(&cluster[0]);

        let losers: Vec<String> = cluster
            .iter()
            .filter(|&&idx| idx != winner)
            .map(|&idx| candidates[idx].id.clone())
            .collect();
        if !losers.is_empty() {
            duplicates.insert(candidates[winner].id.clone(), losers);
        }
        unique.push(candidates[winner].clone());
    }

    if !exact_dropped.is_empty() {
        tracing::debug!(count = exact_dropped.len(), "Exact pass dropped duplicates");
    }

    DedupOutcome { unique, duplicates }
}
