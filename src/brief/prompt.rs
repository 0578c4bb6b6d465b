use serde_json::Value;

use crate::storage::Article;

/// Version stamp recorded on every brief and processing log.
pub const PROMPT_VERSION: &str = "v2";

/// Fact-checking journalist rubric. The five delimited sections are a hard
/// output contract; the parser below is the other half of it.
pub const SYSTEM_PROMPT: &str = "\
You are a fact-checking journalist producing neutral news briefs.

For the article you are given:
1. Parse the factual claims and verify them against the provided text.
2. When a law or statute is cited, name it with its year of enactment.
3. Situate the story in its five-to-ten-year timeline of prior events.
4. Cite at least one source, including a primary document where available \
(government publication, court filing, official statistics).
5. Note any material economic interests held by the actors involved.
6. Write a neutral brief within the configured word band. Avoid loaded \
labels unless they are legally designated terms.

Respond with exactly these sections, in this order:

==HEADLINE==
A neutral headline.

==BRIEF==
The brief body.

==CONTEXT==
One paragraph of historical context, or None.

==SOURCES==
One URL per line.

==SIDE-CAR==
A JSON object with any structured observations.";

/// Render the user message for a draft call.
pub fn draft_payload(article: &Article) -> String {
    format!(
        "Title: {}\n\nContent: {}\n\nSource: {}\nURL: {}",
        article.title,
        if article.content.is_empty() {
            &article.description
        } else {
            &article.content
        },
        article.source_id,
        article.url,
    )
}

/// Revision request after a bias-lexicon hit.
pub fn revision_payload(body: &str, flagged: &[&str]) -> String {
    format!(
        "The following brief uses loaded terms ({}). Rewrite it neutrally, \
         preserving all citations and the ==HEADLINE==/==BRIEF==/==CONTEXT==/\
         ==SOURCES==/==SIDE-CAR== section markup.\n\n{}",
        flagged.join(", "),
        body,
    )
}

/// Expansion request when the body came in under the word band.
pub fn expansion_payload(body: &str, min_words: usize) -> String {
    format!(
        "The following brief is too short. Expand it to at least {} words with \
         additional factual detail, preserving all citations and the \
         ==HEADLINE==/==BRIEF==/==CONTEXT==/==SOURCES==/==SIDE-CAR== section \
         markup.\n\n{}",
        min_words, body,
    )
}

/// Punctuation stripped off the tail of extracted URLs.
const URL_TRAILING: &[char] = &[')', ',', '.', ';', ':', '"', '\''];

/// The five sections of a rewrite response.
#[derive(Debug, Clone, PartialEq)]
pub struct Sections {
    pub headline: String,
    pub brief: String,
    pub context: Option<String>,
    pub sources: Vec<String>,
    pub sidecar: Value,
}

#[derive(Debug, thiserror::Error)]
#[error("Missing section {0} in LLM response")]
pub struct MissingSection(&'static str);

/// Parse the delimited sectional format.
///
/// Tolerant by design: a missing or unparsable SIDE-CAR defaults to `{}`,
/// a CONTEXT of `None` (case-insensitive) maps to null, and trailing
/// punctuation is stripped from extracted URLs. HEADLINE and BRIEF are the
/// only sections whose absence is an error.
pub fn parse_sections(content: &str) -> Result<Sections, MissingSection> {
    let headline = section(content, "==HEADLINE==").ok_or(MissingSection("HEADLINE"))?;
    let brief = section(content, "==BRIEF==").ok_or(MissingSection("BRIEF"))?;
    if headline.is_empty() {
        return Err(MissingSection("HEADLINE"));
    }
    if brief.is_empty() {
        return Err(MissingSection("BRIEF"));
    }

    let context = section(content, "==CONTEXT==").and_then(|text| {
        if text.eq_ignore_ascii_case("none") || text.is_empty() {
            None
        } else {
            Some(text)
        }
    });

    let sources = section(content, "==SOURCES==")
        .map(|text| extract_urls(&text))
        .unwrap_or_default();

    let sidecar = section(content, "==SIDE-CAR==")
        .and_then(|text| serde_json::from_str(&text).ok())
        .unwrap_or_else(|| Value::Object(Default::default()));

    Ok(Sections {
        headline,
        brief,
        context,
        sources,
        sidecar,
    })
}

/// Text between `marker` and the next `==`-prefixed delimiter, trimmed.
fn section(content: &str, marker: &str) -> Option<String> {
    let start = content.find(marker)? + marker.len();
    let rest = &content[start..];
    let end = rest.find("\n==").unwrap_or(rest.len());
    Some(rest[..end].trim().to_string())
}

fn extract_urls(text: &str) -> Vec<String> {
    text.split_whitespace()
        .filter(|token| token.starts_with("http://") || token.starts_with("https://"))
        .map(|token| token.trim_end_matches(URL_TRAILING).to_string())
        .filter(|url| !url.is_empty())
        .collect()
}
