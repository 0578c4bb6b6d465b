use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::feed::RawItem;
use crate::storage::{Article, Source};

/// Tolerance on feed-supplied publish timestamps. Anything further in the
/// future than capture + epsilon is treated as clock noise and clamped.
const PUBLISH_EPSILON_MS: i64 = 5 * 60 * 1000;

/// Fixed keyword dictionary for article tagging. Matched case-insensitively
/// against title + description at capture time.
const TAG_DICTIONARY: &[(&str, &[&str])] = &[
    (
        "politics",
        &["congress", "senate", "white house", "election", "legislation", "governor", "campaign"],
    ),
    (
        "economy",
        &["inflation", "interest rate", "federal reserve", "gdp", "jobs report", "unemployment", "tariff"],
    ),
    (
        "markets",
        &["stocks", "bonds", "wall street", "s&p", "nasdaq", "dow", "sell-off"],
    ),
    (
        "conflict",
        &["war", "military", "ceasefire", "strike", "troops", "missile", "offensive"],
    ),
    (
        "diplomacy",
        &["treaty", "summit", "sanctions", "embassy", "united nations", "nato", "bilateral"],
    ),
    (
        "health",
        &["outbreak", "vaccine", "hospital", "public health", "pandemic"],
    ),
    (
        "climate",
        &["climate", "emissions", "wildfire", "hurricane", "flood", "drought"],
    ),
    (
        "technology",
        &["artificial intelligence", "semiconductor", "cybersecurity", "data breach"],
    ),
    (
        "justice",
        &["court", "lawsuit", "indictment", "supreme court", "ruling", "verdict"],
    ),
    (
        "energy",
        &["oil", "opec", "natural gas", "renewable", "power grid", "pipeline"],
    ),
];

/// XOR-fold a SHA-256 digest down to 32 bits.
fn fold32(input: &str) -> u32 {
    let digest = Sha256::digest(input.as_bytes());
    let mut folded = 0u32;
    for chunk in digest.chunks_exact(4) {
        folded ^= u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    folded
}

/// Deterministic article identity from `(source_id, guid, url)`.
///
/// Each component is folded to 32 bits independently and the three words are
/// hex-concatenated, so equivalent items from a replayed feed collapse onto
/// the same id.
pub fn article_id(source_id: &str, guid: &str, url: &str) -> String {
    format!(
        "{:08x}{:08x}{:08x}",
        fold32(source_id),
        fold32(guid),
        fold32(url)
    )
}

/// Tags for an article: every dictionary entry with at least one keyword hit
/// in title or description.
pub fn derive_tags(title: &str, description: &str) -> Vec<String> {
    let haystack = format!("{} {}", title, description).to_lowercase();
    TAG_DICTIONARY
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| haystack.contains(k)))
        .map(|(tag, _)| tag.to_string())
        .collect()
}

/// Build an [`Article`] from one raw feed item.
///
/// Returns `None` for items without a link: an article's URL is its natural
/// key and nothing downstream can use an item without one. The category is
/// inherited from the source; publish timestamps ahead of capture are clamped.
pub fn capture(source: &Source, item: &RawItem) -> Option<Article> {
    if item.link.trim().is_empty() {
        tracing::debug!(source = %source.id, title = %item.title, "Dropping item without link");
        return None;
    }

    let captured_ms = Utc::now().timestamp_millis();
    let published_ms = if item.published_ms > captured_ms + PUBLISH_EPSILON_MS {
        captured_ms
    } else {
        item.published_ms
    };

    Some(Article {
        id: article_id(&source.id, &item.guid, &item.link),
        source_id: source.id.clone(),
        category: source.category,
        title: item.title.clone(),
        description: item.description.clone(),
        content: item.content.clone(),
        url: item.link.clone(),
        published_ms,
        captured_ms,
        tags: derive_tags(&item.title, &item.description),
        brief_generated: false,
    })
}
