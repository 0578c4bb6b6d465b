use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;

/// Consecutive failures before a source's circuit opens.
const OPEN_THRESHOLD: u32 = 5;

/// How long an open circuit blocks admission before the next probe.
const RETRY_AFTER_MS: i64 = 300_000;

/// Failure state for one source. Created on first failure, deleted on
/// success, probe expiry, or administrative reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitState {
    pub failures: u32,
    pub last_failure_ms: i64,
    pub open: bool,
}

/// Per-source circuit breaker registry. Memory-only; the sole shared mutable
/// structure in the ingest path, serialised behind a mutex.
///
/// There is no half-open state: once the retry window elapses the entry is
/// discarded and the next fetch acts as the probe, with its own result
/// deciding whether the circuit re-opens.
#[derive(Default)]
pub struct CircuitRegistry {
    inner: Mutex<HashMap<String, CircuitState>>,
}

impl CircuitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a fetch against this source may proceed.
    pub fn admit(&self, source_id: &str) -> bool {
        self.admit_at(source_id, Utc::now().timestamp_millis())
    }

    pub(crate) fn admit_at(&self, source_id: &str, now_ms: i64) -> bool {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match map.get(source_id) {
            None => true,
            Some(state) if !state.open => true,
            Some(state) => {
                if now_ms - state.last_failure_ms > RETRY_AFTER_MS {
                    // Window elapsed: discard and let the next fetch probe
                    map.remove(source_id);
                    tracing::info!(source = %source_id, "Circuit retry window elapsed, probing");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_failure(&self, source_id: &str) {
        self.record_failure_at(source_id, Utc::now().timestamp_millis())
    }

    pub(crate) fn record_failure_at(&self, source_id: &str, now_ms: i64) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let state = map.entry(source_id.to_string()).or_insert(CircuitState {
            failures: 0,
            last_failure_ms: now_ms,
            open: false,
        });
        state.failures += 1;
        state.last_failure_ms = now_ms;
        if state.failures >= OPEN_THRESHOLD && !state.open {
            state.open = true;
            tracing::warn!(
                source = %source_id,
                failures = state.failures,
                "Circuit opened, source will be skipped"
            );
        }
    }

    /// A successful fetch clears the source's failure history entirely.
    pub fn record_success(&self, source_id: &str) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if map.remove(source_id).is_some() {
            tracing::info!(source = %source_id, "Circuit closed after successful fetch");
        }
    }

    /// Administrative override: unconditionally forget the source's state.
    pub fn reset(&self, source_id: &str) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if map.remove(source_id).is_some() {
            tracing::info!(source = %source_id, "Circuit state reset");
        }
    }

    /// Copy of the current state map, for the status surface.
    pub fn snapshot(&self) -> HashMap<String, CircuitState> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_source_is_admitted() {
        let registry = CircuitRegistry::new();
        assert!(registry.admit_at("wire", 0));
    }

    #[test]
    fn test_opens_after_five_failures() {
        let registry = CircuitRegistry::new();
        for i in 0..4 {
            registry.record_failure_at("wire", i);
            assert!(registry.admit_at("wire", i), "closed below threshold");
        }
        registry.record_failure_at("wire", 4);
        assert!(!registry.admit_at("wire", 5));

        let snapshot = registry.snapshot();
        let state = snapshot.get("wire").unwrap();
        assert!(state.open);
        assert_eq!(state.failures, 5);
    }

    #[test]
    fn test_probe_after_retry_window() {
        let registry = CircuitRegistry::new();
        for _ in 0..5 {
            registry.record_failure_at("wire", 1_000);
        }
        assert!(!registry.admit_at("wire", 1_000 + RETRY_AFTER_MS));
        // Strictly past the window: entry discarded, admission granted
        assert!(registry.admit_at("wire", 1_001 + RETRY_AFTER_MS));
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_failed_probe_reopens_quickly() {
        let registry = CircuitRegistry::new();
        for _ in 0..5 {
            registry.record_failure_at("wire", 1_000);
        }
        assert!(registry.admit_at("wire", 2_000 + RETRY_AFTER_MS));
        // The probe failed five more times before the circuit opens again
        registry.record_failure_at("wire", 2_000 + RETRY_AFTER_MS);
        assert!(registry.admit_at("wire", 2_001 + RETRY_AFTER_MS));
    }

    #[test]
    fn test_success_clears_state() {
        let registry = CircuitRegistry::new();
        registry.record_failure_at("wire", 0);
        registry.record_failure_at("wire", 1);
        registry.record_success("wire");
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_reset_is_unconditional() {
        let registry = CircuitRegistry::new();
        for _ in 0..5 {
            registry.record_failure_at("wire", 0);
        }
        registry.reset("wire");
        assert!(registry.admit_at("wire", 1));
    }

    #[test]
    fn test_sources_are_independent() {
        let registry = CircuitRegistry::new();
        for _ in 0..5 {
            registry.record_failure_at("bad-wire", 0);
        }
        assert!(!registry.admit_at("bad-wire", 1));
        assert!(registry.admit_at("good-wire", 1));
    }
}
