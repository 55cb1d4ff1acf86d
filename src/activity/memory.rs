//! In-memory [`ActivityStore`] used by the test suite. A failure switch
//! exercises the fire-and-forget contract.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;

use crate::activity::{
    ActivityKind, ActivityRecord, ActivityStore, ClientMeta,
};
use crate::error::{Result, ServerError};

#[derive(Default)]
pub struct MemoryActivityStore {
    records: Mutex<Vec<ActivityRecord>>,
    pub fail: AtomicBool,
}

impl MemoryActivityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ActivityStore for MemoryActivityStore {
    async fn append(
        &self,
        user_id: i64,
        kind: ActivityKind,
        description: &str,
        meta: &ClientMeta,
    ) -> Result<()> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(ServerError::internal("activity store unavailable"));
        }

        let mut records = self.records.lock().unwrap();
        let id = records.len() as i64 + 1;
        records.push(ActivityRecord {
            id,
            user_id,
            kind,
            description: description.to_owned(),
            timestamp: Utc::now(),
            ip_address: meta.ip.clone(),
            user_agent: meta.user_agent.clone(),
        });

        Ok(())
    }

    async fn recent(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<ActivityRecord>> {
        let records = self.records.lock().unwrap();
        Ok(records
            .iter()
            .rev()
            .filter(|r| r.user_id == user_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn page(
        &self,
        user_id: i64,
        page: i64,
        size: i64,
    ) -> Result<(Vec<ActivityRecord>, i64)> {
        let records = self.records.lock().unwrap();
        let matching: Vec<ActivityRecord> = records
            .iter()
            .rev()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();

        let total = matching.len() as i64;
        let items = matching
            .into_iter()
            .skip((page * size) as usize)
            .take(size as usize)
            .collect();

        Ok((items, total))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::activity::ActivityLog;

    #[tokio::test]
    async fn test_recent_is_reverse_chronological() {
        let store = MemoryActivityStore::new();
        let meta = ClientMeta::default();

        for i in 0..3 {
            store
                .append(1, ActivityKind::Login, &format!("login {i}"), &meta)
                .await
                .unwrap();
        }
        store
            .append(2, ActivityKind::ProfileView, "other subject", &meta)
            .await
            .unwrap();

        let recent = store.recent(1, 10).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].description, "login 2");
        assert_eq!(recent[2].description, "login 0");
    }

    #[tokio::test]
    async fn test_record_swallows_store_failure() {
        let store = Arc::new(MemoryActivityStore::new());
        store.fail.store(true, Ordering::Relaxed);

        let log = ActivityLog::new(Arc::clone(&store) as Arc<dyn ActivityStore>);
        // Must not panic nor error.
        log.record(1, ActivityKind::Login, "User logged in", &ClientMeta::default())
            .await;

        store.fail.store(false, Ordering::Relaxed);
        assert!(log.recent(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_page_totals() {
        let store = MemoryActivityStore::new();
        let meta = ClientMeta::default();
        for i in 0..12 {
            store
                .append(1, ActivityKind::Login, &format!("login {i}"), &meta)
                .await
                .unwrap();
        }

        let (items, total) = store.page(1, 1, 5).await.unwrap();
        assert_eq!(total, 12);
        assert_eq!(items.len(), 5);
        assert_eq!(items[0].description, "login 6");
    }
}
