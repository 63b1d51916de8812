use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use vibe_types::models::{ConversationKey, ReadStatusRecord, ReadTimestamps};

use crate::collection::{Collection, RetryPolicy};
use crate::error::StoreError;

/// Three attempts, 100ms apart.
pub const READ_STATUS_RETRY: RetryPolicy = RetryPolicy::fixed(3, Duration::from_millis(100));

/// Serializes every user's mark-as-read updates through one FIFO.
///
/// All records share a single file, so two near-simultaneous marks (even for
/// different users) would otherwise each load a stale copy and the later
/// save would drop the earlier one.
pub struct ReadStatusCoordinator {
    records: Collection<ReadStatusRecord>,
}

impl ReadStatusCoordinator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_retry(path, READ_STATUS_RETRY)
    }

    pub fn with_retry(path: impl Into<PathBuf>, retry: RetryPolicy) -> Self {
        Self {
            records: Collection::new("read status", path, retry),
        }
    }

    pub(crate) fn collection(&self) -> &Collection<ReadStatusRecord> {
        &self.records
    }

    /// Record that `user_id` read `key` up to `timestamp`, creating the
    /// user's record on first use. Markers never move backwards; the
    /// effective stored instant is returned.
    pub async fn update(
        &self,
        user_id: Uuid,
        key: ConversationKey,
        timestamp: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, StoreError> {
        self.records
            .update(|records| {
                let index = match records.iter().position(|r| r.user_id == user_id) {
                    Some(index) => index,
                    None => {
                        records.push(ReadStatusRecord::new(user_id));
                        records.len() - 1
                    }
                };

                let marker = records[index]
                    .read_timestamps
                    .entry(key)
                    .or_insert(timestamp);
                if timestamp > *marker {
                    *marker = timestamp;
                }
                Ok(*marker)
            })
            .await
            .inspect(|stored| debug!("Read marker {} for {} -> {}", key, user_id, stored))
    }

    /// The user's markers, or an empty map if they never marked anything.
    pub async fn get(&self, user_id: Uuid) -> ReadTimestamps {
        self.records
            .read()
            .await
            .into_iter()
            .find(|r| r.user_id == user_id)
            .map(|r| r.read_timestamps)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn unknown_user_has_no_markers() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = ReadStatusCoordinator::new(dir.path().join("user_read_status.json"));
        assert!(coordinator.get(Uuid::new_v4()).await.is_empty());
    }

    #[tokio::test]
    async fn concurrent_marks_for_different_conversations_all_land() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = Arc::new(ReadStatusCoordinator::new(
            dir.path().join("user_read_status.json"),
        ));
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();
        let keys: Vec<ConversationKey> = (0..16)
            .map(|i| {
                if i % 2 == 0 {
                    ConversationKey::Channel(Uuid::new_v4())
                } else {
                    ConversationKey::Direct(Uuid::new_v4())
                }
            })
            .collect();

        let mut tasks = Vec::new();
        for (i, key) in keys.iter().copied().enumerate() {
            let coordinator = coordinator.clone();
            let who = if i % 4 == 3 { other } else { user };
            tasks.push(tokio::spawn(async move {
                coordinator.update(who, key, Utc::now()).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let mine = coordinator.get(user).await;
        let theirs = coordinator.get(other).await;
        assert_eq!(mine.len() + theirs.len(), keys.len());
        for (i, key) in keys.iter().enumerate() {
            let owner = if i % 4 == 3 { &theirs } else { &mine };
            assert!(owner.contains_key(key), "lost update for {key}");
        }
    }

    #[tokio::test]
    async fn markers_do_not_move_backwards() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = ReadStatusCoordinator::new(dir.path().join("user_read_status.json"));
        let user = Uuid::new_v4();
        let key = ConversationKey::Channel(Uuid::new_v4());
        let later = Utc::now();
        let earlier = later - ChronoDuration::minutes(5);

        assert_eq!(coordinator.update(user, key, later).await.unwrap(), later);
        assert_eq!(coordinator.update(user, key, earlier).await.unwrap(), later);
        assert_eq!(coordinator.get(user).await[&key], later);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_to_caller() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user_read_status.json");
        let coordinator = ReadStatusCoordinator::with_retry(
            &path,
            RetryPolicy::fixed(3, Duration::from_millis(1)),
        );
        std::fs::create_dir(dir.path().join("user_read_status.json.tmp")).unwrap();

        let err = coordinator
            .update(Uuid::new_v4(), ConversationKey::Direct(Uuid::new_v4()), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::RetriesExhausted { attempts: 3, .. }));
        assert!(err.is_persistence());
    }
}
