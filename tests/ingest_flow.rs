//! Ingest-path integration tests: sweep → novelty → holding queue, circuit
//! breaker behaviour across sweeps, and the control surface.
//!
//! Each test owns an in-memory SQLite database and wiremock servers.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use distill::brief::{BriefPolicy, BriefRewriter, HttpLlmClient};
use distill::config::Config;
use distill::ingest::scheduler::PollerConfig;
use distill::ingest::{CircuitRegistry, HoldingQueue, Poller};
use distill::pipeline::Newsroom;
use distill::storage::{Category, Database, SourceSeed};

const FEED_BODY: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <item><guid>g1</guid><title>Senate passes appropriations measure</title>
        <description>The chamber voted on the annual bill.</description>
        <link>https://example.com/appropriations</link></item>
</channel></rss>"#;

struct Stack {
    db: Database,
    queue: Arc<HoldingQueue>,
    breakers: Arc<CircuitRegistry>,
    newsroom: Arc<Newsroom>,
    poller: Poller,
}

async fn build_stack(feed_url: &str, llm_base_url: &str) -> Stack {
    let db = Database::open(":memory:").await.unwrap();
    db.sync_sources(&[SourceSeed {
        id: "wire".to_string(),
        name: "Wire".to_string(),
        url: feed_url.to_string(),
        category: Category::UsNational,
        active: true,
    }])
    .await
    .unwrap();

    let mut config = Config::default();
    config.llm.base_url = llm_base_url.to_string();

    let client = reqwest::Client::new();
    let (queue, preempt_rx) = HoldingQueue::new();
    drop(preempt_rx);
    let queue = Arc::new(queue);
    let breakers = Arc::new(CircuitRegistry::new());
    let shutdown = CancellationToken::new();

    let llm = HttpLlmClient::new(client.clone(), &config.llm);
    let rewriter = BriefRewriter::new(Arc::new(llm), BriefPolicy::from_config(&config));
    let newsroom = Arc::new(Newsroom::new(
        db.clone(),
        Arc::clone(&queue),
        Arc::clone(&breakers),
        rewriter,
        shutdown.clone(),
    ));

    let poller = Poller::new(
        db.clone(),
        client,
        Arc::clone(&queue),
        Arc::clone(&breakers),
        Arc::clone(&newsroom),
        PollerConfig {
            sweep_interval: Duration::from_secs(30),
            batch_interval: Duration::from_secs(1800),
            startup_delay: Duration::from_secs(0),
            fetch_concurrency: 8,
        },
        shutdown,
    );

    Stack {
        db,
        queue,
        breakers,
        newsroom,
        poller,
    }
}

async fn mock_llm_server() -> MockServer {
    let body = vec!["word"; 200].join(" ");
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": format!(
                "==HEADLINE==\nNeutral Headline\n\n==BRIEF==\n{}\n\n==CONTEXT==\nNone\n\n\
                 ==SOURCES==\nhttps://www.congress.gov/bill\n\n==SIDE-CAR==\n{{}}", body
            )}}],
            "usage": {"prompt_tokens": 100, "completion_tokens": 100}
        })))
        .mount(&server)
        .await;
    server
}

// ============================================================================
// Novelty across batches
// ============================================================================

#[tokio::test]
async fn test_items_stored_by_a_batch_are_not_reingested() {
    let feed_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(FEED_BODY))
        .mount(&feed_server)
        .await;
    let llm_server = mock_llm_server().await;

    let stack = build_stack(&format!("{}/feed", feed_server.uri()), &llm_server.uri()).await;

    // First sweep captures the item; the batch persists it
    stack.poller.sweep().await;
    assert_eq!(stack.queue.size(), 1);
    let result = stack.newsroom.trigger_manual_batch().await;
    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.articles_processed, 1);

    // The same feed page on the next sweep yields nothing novel: the URL is
    // now in the store
    stack.poller.sweep().await;
    assert_eq!(stack.queue.size(), 0);

    let result = stack.newsroom.trigger_manual_batch().await;
    assert_eq!(result.articles_processed, 0);
}

#[tokio::test]
async fn test_probe_success_clears_previous_error() {
    let feed_server = MockServer::start().await;
    // First request fails terminally, the rest succeed
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(1)
        .mount(&feed_server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(FEED_BODY))
        .mount(&feed_server)
        .await;
    let llm_server = mock_llm_server().await;

    let stack = build_stack(&format!("{}/feed", feed_server.uri()), &llm_server.uri()).await;

    stack.poller.sweep().await;
    let source = stack.db.get_source("wire").await.unwrap().unwrap();
    assert!(source.last_error.is_some());

    stack.poller.sweep().await;
    let source = stack.db.get_source("wire").await.unwrap().unwrap();
    assert!(source.last_error.is_none());
    assert!(source.last_checked_ms.is_some());
}

// ============================================================================
// Circuit breaker control surface
// ============================================================================

#[tokio::test]
async fn test_breaker_reset_readmits_source() {
    let feed_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&feed_server)
        .await;
    let llm_server = mock_llm_server().await;

    let stack = build_stack(&format!("{}/feed", feed_server.uri()), &llm_server.uri()).await;

    for _ in 0..5 {
        stack.poller.sweep().await;
    }
    assert!(stack.breakers.snapshot().get("wire").unwrap().open);
    assert!(!stack.breakers.admit("wire"));

    // Administrative reset clears the state; the next sweep fetches again
    stack.newsroom.reset_circuit_breaker("wire");
    assert!(stack.breakers.snapshot().is_empty());
    assert!(stack.breakers.admit("wire"));

    stack.poller.sweep().await;
    // The probe failed once more, so a fresh entry exists but is not yet open
    let snapshot = stack.breakers.snapshot();
    let state = snapshot.get("wire").unwrap();
    assert_eq!(state.failures, 1);
    assert!(!state.open);
}

// ============================================================================
// Status surface
// ============================================================================

#[tokio::test]
async fn test_status_reflects_queue_and_batches() {
    let feed_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(FEED_BODY))
        .mount(&feed_server)
        .await;
    let llm_server = mock_llm_server().await;

    let stack = build_stack(&format!("{}/feed", feed_server.uri()), &llm_server.uri()).await;

    let status = stack.newsroom.status();
    assert!(!status.is_processing);
    assert_eq!(status.queue_size, 0);
    assert!(status.last_processed_ms.is_none());

    stack.poller.sweep().await;
    assert_eq!(stack.newsroom.status().queue_size, 1);

    stack.newsroom.trigger_manual_batch().await;
    let status = stack.newsroom.status();
    assert_eq!(status.queue_size, 0);
    assert!(status.last_processed_ms.is_some());

    let limits = stack.newsroom.daily_limits_snapshot().await.unwrap();
    assert_eq!(limits.total_today, 1);
    assert_eq!(limits.categories.len(), 3);

    let brief_rows = stack
        .db
        .briefs_in_window(0, Utc::now().timestamp_millis() + 1)
        .await
        .unwrap();
    assert_eq!(brief_rows.len(), 1);
}
