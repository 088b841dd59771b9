//! Append-only usage ledger shared by every worker of a router.

use crate::models::{UsageLogEntry, UsageStats};
use crate::utils::{BoxError, write_atomic};
use serde_json::json;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

/// Thread-safe, append-only log of successful routed calls.
///
/// Clones share the same underlying log. Entries are never removed, so the
/// total cost only grows for the lifetime of the ledger.
#[derive(Debug, Clone, Default)]
pub struct UsageLedger {
    entries: Arc<Mutex<Vec<UsageLogEntry>>>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<UsageLogEntry>> {
        // Appends cannot leave the vector half-updated, so a poisoned lock is still usable.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record(&self, entry: UsageLogEntry) {
        self.lock().push(entry);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn entries(&self) -> Vec<UsageLogEntry> {
        self.lock().clone()
    }

    /// Entries appended after the first `offset` ones.
    pub fn entries_since(&self, offset: usize) -> Vec<UsageLogEntry> {
        self.lock().iter().skip(offset).cloned().collect()
    }

    pub fn stats(&self) -> UsageStats {
        UsageStats::from_entries(&self.lock())
    }

    pub fn total_cost(&self) -> f64 {
        self.lock().iter().map(|e| e.cost).sum()
    }

    /// Write `{logs, stats}` as pretty JSON.
    pub async fn save(&self, path: &Path) -> Result<(), BoxError> {
        let entries = self.entries();
        let stats = UsageStats::from_entries(&entries);
        let body = serde_json::to_vec_pretty(&json!({ "logs": entries, "stats": stats }))?;
        write_atomic(path, &body).await?;
        info!(
            path = %path.display(),
            calls = stats.total_calls,
            total_cost = stats.total_cost,
            "Saved usage log"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(model: &str, cost: f64) -> UsageLogEntry {
        UsageLogEntry {
            timestamp: Utc::now(),
            model: model.to_string(),
            input_tokens: 10,
            output_tokens: 5,
            cost,
            success: true,
        }
    }

    #[test]
    fn test_clones_share_entries() {
        let ledger = UsageLedger::new();
        let other = ledger.clone();
        other.record(entry("a", 0.1));
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.entries_since(0).len(), 1);
        assert!(ledger.entries_since(1).is_empty());
    }

    #[test]
    fn test_concurrent_appends_are_not_lost() {
        let ledger = UsageLedger::new();
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        ledger.record(entry(&format!("m{t}"), 0.001));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(ledger.len(), 4_000);
        assert!((ledger.total_cost() - 4.0).abs() < 1e-9);
        assert_eq!(ledger.stats().by_model.len(), 8);
    }

    #[test]
    fn test_total_cost_is_monotonic() {
        let ledger = UsageLedger::new();
        let mut last = ledger.total_cost();
        for cost in [0.0, 0.2, 0.0, 0.05] {
            ledger.record(entry("a", cost));
            let now = ledger.total_cost();
            assert!(now >= last);
            last = now;
        }
    }

    #[tokio::test]
    async fn test_save_writes_logs_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = UsageLedger::new();
        ledger.record(entry("a", 0.5));
        let path = dir.path().join("llm_usage.json");
        ledger.save(&path).await.unwrap();
        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["logs"].as_array().unwrap().len(), 1);
        assert_eq!(saved["stats"]["total_calls"], 1);
    }
}
