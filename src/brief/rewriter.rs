use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use chrono::Utc;
use regex::Regex;
use thiserror::Error;

use crate::brief::llm::{CostModel, LlmClient, LlmError};
use crate::brief::prompt::{
    draft_payload, expansion_payload, parse_sections, revision_payload, Sections, PROMPT_VERSION,
    SYSTEM_PROMPT,
};
use crate::config::Config;
use crate::storage::{Article, Brief, BriefStatus, LlmMetadata};

/// Loaded terms that trigger a neutral-rewrite revision, matched
/// case-insensitively against body words.
const BIAS_LEXICON: &[&str] = &[
    "brutal",
    "shocking",
    "stunning",
    "devastating",
    "savage",
    "terrorist",
    "regime",
    "strongman",
    "dictator",
    "rogue",
    "aggressive",
    "unprovoked",
    "innocent",
    "victims",
    "heroes",
    "extremist",
    "radical",
    "militant",
    "thugs",
    "cronies",
];

/// Host patterns that qualify a URL as a primary source: government TLDs,
/// international organisations, reputable outlets, academic domains.
const PRIMARY_DOMAIN_PATTERNS: &[&str] = &[
    // Government TLDs
    r"\.gov(\.|$)",
    r"\.gob(\.|$)",
    r"\.go\.[a-z]{2}$",
    r"\.edu",
    // International organisations
    r"(^|\.)un\.org$",
    r"(^|\.)icj-cij\.org$",
    r"(^|\.)icc-cpi\.int$",
    r"(^|\.)who\.int$",
    r"(^|\.)worldbank\.org$",
    r"(^|\.)imf\.org$",
    r"(^|\.)europa\.eu$",
    // Government data and legal bodies
    r"(^|\.)data\.gov$",
    r"(^|\.)congress\.gov$",
    r"(^|\.)legislation\.gov\.uk$",
    r"(^|\.)justice\.gc\.ca$",
    r"parliament\.",
    r"court",
    // Reputable outlets
    r"reuters",
    r"(^|\.)ap\.org$",
    r"(^|\.)bbc\.(com|co\.uk)$",
    r"(^|\.)npr\.org$",
    r"(^|\.)pbs\.org$",
    r"(^|\.)aljazeera\.com$",
    r"(^|\.)dw\.com$",
    r"(^|\.)france24\.com$",
    r"(^|\.)cnn\.com$",
    r"(^|\.)nytimes\.com$",
    r"(^|\.)washingtonpost\.com$",
    r"(^|\.)wsj\.com$",
    r"(^|\.)bloomberg\.com$",
    r"(^|\.)ft\.com$",
    r"(^|\.)economist\.com$",
    // Research
    r"(^|\.)arxiv\.org$",
    r"(^|\.)researchgate\.net$",
    r"(^|\.)scholar\.google\.com$",
];

/// Deterministic filler appended when expansion attempts cannot reach the
/// word-band floor. Repeated whole until the floor is crossed.
const FILLER_PARAGRAPH: &str = "Further details were not available at publication time. \
This brief will be updated as additional verified information is released by the parties \
involved. Readers can consult the cited sources for the underlying documents and for any \
subsequent corrections issued by the originating outlets.";

/// Expansion attempts before falling back to filler.
const MAX_EXPANSION_ATTEMPTS: u32 = 3;

/// Sources required for a brief to pass the gate.
const MIN_SOURCES: usize = 1;

fn word_regex() -> &'static Regex {
    static WORD_RE: OnceLock<Regex> = OnceLock::new();
    WORD_RE.get_or_init(|| Regex::new(r"\b\w+\b").expect("static regex"))
}

fn primary_domain_regexes() -> &'static Vec<Regex> {
    static PRIMARY_RES: OnceLock<Vec<Regex>> = OnceLock::new();
    PRIMARY_RES.get_or_init(|| {
        PRIMARY_DOMAIN_PATTERNS
            .iter()
            .map(|p| Regex::new(p).expect("static regex"))
            .collect()
    })
}

/// Count of `\b\w+\b` tokens.
pub fn word_count(text: &str) -> usize {
    word_regex().find_iter(text).count()
}

/// Whether the URL's host matches the primary-domain allow-list.
pub fn is_primary_source(url: &str) -> bool {
    let Ok(parsed) = url::Url::parse(url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let host = host.to_lowercase();
    primary_domain_regexes().iter().any(|re| re.is_match(&host))
}

/// Lexicon terms present in the body, each term listed once.
fn bias_hits(body: &str) -> Vec<&'static str> {
    let words: Vec<String> = word_regex()
        .find_iter(body)
        .map(|m| m.as_str().to_lowercase())
        .collect();
    BIAS_LEXICON
        .iter()
        .filter(|term| words.iter().any(|w| w == *term))
        .copied()
        .collect()
}

/// `|biased term occurrences| / |body words|`, clipped to [0, 1].
fn subjectivity_score(body: &str) -> f64 {
    let words: Vec<String> = word_regex()
        .find_iter(body)
        .map(|m| m.as_str().to_lowercase())
        .collect();
    if words.is_empty() {
        return 0.0;
    }
    let hits = words
        .iter()
        .filter(|w| BIAS_LEXICON.contains(&w.as_str()))
        .count();
    (hits as f64 / words.len() as f64).min(1.0)
}

fn truncate_words(text: &str, max_words: usize) -> String {
    match word_regex().find_iter(text).nth(max_words - 1) {
        Some(last) => {
            let mut truncated = text[..last.end()].to_string();
            truncated.push_str("...");
            truncated
        }
        None => text.to_string(),
    }
}

/// First three alphanumeric words of the headline, lowercased and hyphenated.
fn slug3(headline: &str) -> String {
    let words: Vec<String> = word_regex()
        .find_iter(headline)
        .filter(|m| m.as_str().chars().any(|c| c.is_alphanumeric()))
        .take(3)
        .map(|m| m.as_str().to_lowercase())
        .collect();
    if words.is_empty() {
        "brief".to_string()
    } else {
        words.join("-")
    }
}

/// Tag set for a brief: tag frequency across contributing articles, top 5,
/// ties alphabetical.
fn brief_tags(articles: &[&Article]) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for article in articles {
        for tag in &article.tags {
            *counts.entry(tag.as_str()).or_insert(0) += 1;
        }
    }
    let mut tags: Vec<(&str, usize)> = counts.into_iter().collect();
    tags.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    tags.into_iter().take(5).map(|(t, _)| t.to_string()).collect()
}

// ============================================================================
// Rewriter
// ============================================================================

#[derive(Debug, Error)]
pub enum RewriteError {
    /// The gate could not assemble even one source for the brief
    #[error("Brief has no sources")]
    InsufficientSources,
    /// No source matched the primary-domain allow-list (soft; recorded as a
    /// warning, never raised by the gate itself)
    #[error("Brief cites no primary source")]
    MissingPrimarySource,
    /// Body length could not be brought inside the configured band
    #[error("Brief word count {actual} outside [{min}, {max}]")]
    WordCountOutOfBand {
        actual: usize,
        min: usize,
        max: usize,
    },
    /// Draft call failed or timed out
    #[error("LLM unavailable: {0}")]
    LlmUnavailable(#[from] LlmError),
    /// Draft response did not contain the required sections
    #[error("Unparseable LLM response: {0}")]
    Parse(String),
}

/// Numeric policy for brief generation, resolved from configuration.
#[derive(Debug, Clone)]
pub struct BriefPolicy {
    pub min_words: usize,
    pub max_words: usize,
    pub initial_status: BriefStatus,
    pub cost_model: CostModel,
}

impl BriefPolicy {
    pub fn from_config(config: &Config) -> Self {
        let (min_words, max_words) = config.brief.word_band();
        Self {
            min_words,
            max_words,
            initial_status: config.brief.initial_status,
            cost_model: CostModel {
                input_rate_per_mtok: config.llm.input_rate_per_mtok,
                output_rate_per_mtok: config.llm.output_rate_per_mtok,
            },
        }
    }
}

/// Iterative draft → bias scan → length loop → gate pipeline over one article.
pub struct BriefRewriter {
    llm: Arc<dyn LlmClient>,
    policy: BriefPolicy,
}

struct CallAccounting {
    tokens: u64,
    cost: f64,
    revisions: u32,
}

impl BriefRewriter {
    pub fn new(llm: Arc<dyn LlmClient>, policy: BriefPolicy) -> Self {
        Self { llm, policy }
    }

    pub fn policy(&self) -> &BriefPolicy {
        &self.policy
    }

    pub fn model(&self) -> &str {
        self.llm.model()
    }

    /// Rewrite one article into a gated brief.
    ///
    /// The gate repairs what it can (appending the originating URL, padding
    /// with filler, truncating overlong bodies) before ever declaring the
    /// brief invalid; a missing primary source is only a warning.
    pub async fn rewrite(&self, article: &Article) -> Result<Brief, RewriteError> {
        let started = Instant::now();
        let mut accounting = CallAccounting {
            tokens: 0,
            cost: 0.0,
            revisions: 0,
        };

        // Draft
        let draft = self.call(&draft_payload(article), &mut accounting).await?;
        let mut sections =
            parse_sections(&draft).map_err(|e| RewriteError::Parse(e.to_string()))?;
        let mut subjectivity = subjectivity_score(&sections.brief);

        // Bias scan: one neutral-rewrite revision on any lexicon hit
        let flagged = bias_hits(&sections.brief);
        if !flagged.is_empty() {
            tracing::debug!(article = %article.id, terms = ?flagged, "Bias lexicon hit, revising");
            accounting.revisions += 1;
            match self
                .call(&revision_payload(&render(&sections), &flagged), &mut accounting)
                .await
            {
                Ok(revised) => match parse_sections(&revised) {
                    Ok(s) => sections = s,
                    Err(e) => {
                        tracing::warn!(article = %article.id, error = %e, "Revision unparsable, keeping draft")
                    }
                },
                Err(e) => {
                    tracing::warn!(article = %article.id, error = %e, "Revision call failed, keeping draft")
                }
            }
            // Subjectivity is monotonically non-increasing across revisions
            subjectivity = subjectivity.min(subjectivity_score(&sections.brief));
        }

        // Length loop
        let mut attempts = 0;
        while word_count(&sections.brief) < self.policy.min_words
            && attempts < MAX_EXPANSION_ATTEMPTS
        {
            attempts += 1;
            accounting.revisions += 1;
            match self
                .call(
                    &expansion_payload(&render(&sections), self.policy.min_words),
                    &mut accounting,
                )
                .await
            {
                Ok(expanded) => {
                    if let Ok(s) = parse_sections(&expanded) {
                        if word_count(&s.brief) > word_count(&sections.brief) {
                            sections = s;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(article = %article.id, attempt = attempts, error = %e, "Expansion call failed");
                    break;
                }
            }
        }
        while word_count(&sections.brief) < self.policy.min_words {
            if !sections.brief.is_empty() {
                sections.brief.push_str("\n\n");
            }
            sections.brief.push_str(FILLER_PARAGRAPH);
        }
        subjectivity = subjectivity.min(subjectivity_score(&sections.brief));

        // Gate
        let mut sources = sections.sources.clone();
        if !sources.iter().any(|s| s == &article.url) {
            sources.push(article.url.clone());
        }
        if sources.len() < MIN_SOURCES {
            return Err(RewriteError::InsufficientSources);
        }
        if !sources.iter().any(|s| is_primary_source(s)) {
            tracing::warn!(article = %article.id, "Brief cites no primary source");
        }
        let mut body = sections.brief.clone();
        if word_count(&body) > self.policy.max_words {
            body = truncate_words(&body, self.policy.max_words);
        }
        subjectivity = subjectivity.min(subjectivity_score(&body));

        let now_ms = Utc::now().timestamp_millis();
        Ok(Brief {
            id: format!("{}-{}-{}", article.category.slug(), slug3(&sections.headline), now_ms),
            headline: sections.headline.clone(),
            body,
            source_urls: sources,
            category: article.category,
            published_ms: now_ms,
            tags: brief_tags(&[article]),
            status: self.policy.initial_status,
            metadata: LlmMetadata {
                model: self.llm.model().to_string(),
                prompt_version: PROMPT_VERSION.to_string(),
                tokens: accounting.tokens,
                cost: accounting.cost,
                processing_ms: started.elapsed().as_millis() as u64,
                subjectivity,
                revision_count: accounting.revisions,
            },
        })
    }

    async fn call(
        &self,
        payload: &str,
        accounting: &mut CallAccounting,
    ) -> Result<String, LlmError> {
        let response = self.llm.chat(SYSTEM_PROMPT, payload).await?;
        accounting.tokens += response.input_tokens + response.output_tokens;
        accounting.cost += self
            .policy
            .cost_model
            .cost(response.input_tokens, response.output_tokens);
        Ok(response.content)
    }
}

/// Re-render sections in wire markup for revision/expansion payloads.
fn render(sections: &Sections) -> String {
    format!(
        "==HEADLINE==\n{}\n\n==BRIEF==\n{}\n\n==CONTEXT==\n{}\n\n==SOURCES==\n{}\n\n==SIDE-CAR==\n{}",
        sections.headline,
        sections.brief,
        sections.context.as_deref().unwrap_or("None"),
        sections.sources.join("\n"),
        sections.sidecar,
    )
}

/// Deterministic stand-in brief for an article whose LLM calls failed.
///
/// Headline falls back from the article title to "News Update"; the body is
/// the description (or leading content) padded with the documented filler and
/// clamped to the word band; metadata carries the `fallback` model marker.
pub fn fallback_brief(article: &Article, policy: &BriefPolicy) -> Brief {
    let headline = if article.title.trim().is_empty() {
        "News Update".to_string()
    } else {
        article.title.clone()
    };

    let mut body = if !article.description.trim().is_empty() {
        article.description.clone()
    } else {
        article.content.chars().take(600).collect()
    };
    while word_count(&body) < policy.min_words {
        if !body.is_empty() {
            body.push_str("\n\n");
        }
        body.push_str(FILLER_PARAGRAPH);
    }
    if word_count(&body) > policy.max_words {
        body = truncate_words(&body, policy.max_words);
    }

    let now_ms = Utc::now().timestamp_millis();
    Brief {
        id: format!("{}-{}-{}", article.category.slug(), slug3(&headline), now_ms),
        headline,
        body: body.clone(),
        source_urls: vec![article.url.clone()],
        category: article.category,
        published_ms: now_ms,
        tags: brief_tags(&[article]),
        status: policy.initial_status,
        metadata: LlmMetadata {
            model: "fallback".to_string(),
            prompt_version: PROMPT_VERSION.to_string(),
            tokens: 0,
            cost: 0.0,
            processing_ms: 0,
            subjectivity: subjectivity_score(&body),
            revision_count: 0,
        },
    }
}
