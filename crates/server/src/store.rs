//! Process-local cache of each patient's last analysis date

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Where the CDS service looks before asking the FHIR server
pub trait AnalysisDateStore: Send + Sync + 'static {
    fn get(&self, patient_id: &str) -> Option<String>;

    fn put(&self, patient_id: &str, date: String);
}

/// In-memory store whose entries expire after `ttl`
pub struct TtlAnalysisDateStore {
    ttl: Duration,
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl TtlAnalysisDateStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (String, Instant)>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl AnalysisDateStore for TtlAnalysisDateStore {
    fn get(&self, patient_id: &str) -> Option<String> {
        let mut entries = self.lock();
        match entries.get(patient_id) {
            Some((date, stored)) if stored.elapsed() < self.ttl => Some(date.clone()),
            Some(_) => {
                entries.remove(patient_id);
                None
            }
            None => None,
        }
    }

    fn put(&self, patient_id: &str, date: String) {
        let now = Instant::now();
        let mut entries = self.lock();
        entries.retain(|_, (_, stored)| now.duration_since(*stored) < self.ttl);
        entries.insert(patient_id.to_string(), (date, now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let store = TtlAnalysisDateStore::new(Duration::from_secs(60));
        store.put("p1", "2024-05-01".to_string());

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(store.get("p1").as_deref(), Some("2024-05-01"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.get("p1"), None);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn put_overwrites_and_sweeps_stale_entries() {
        let store = TtlAnalysisDateStore::new(Duration::from_secs(10));
        store.put("old", "2024-01-01".to_string());

        tokio::time::advance(Duration::from_secs(11)).await;
        store.put("p1", "2024-05-01".to_string());
        store.put("p1", "2024-06-01".to_string());

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("p1").as_deref(), Some("2024-06-01"));
    }
}
