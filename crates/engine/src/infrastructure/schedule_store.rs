//! JSON file persistence for schedule entries.
//!
//! Only configuration and run statistics are written. Entries that were
//! active when saved come back Idle. Writes go to a temporary file that is
//! then renamed over the target, so a crash never leaves a truncated file.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use taskloom_domain::{ConditionContext, GameSnapshot, ScheduleEntry};
use taskloom_shared::{decode_schedule, encode_schedule, DecodeOptions};

use crate::infrastructure::ports::RandomPort;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Schedule serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JsonScheduleStore {
    path: PathBuf,
}

impl JsonScheduleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every entry that can be read. A missing file is an empty
    /// schedule.
    ///
    /// `game` supplies the baselines for relative conditions (XP gained,
    /// items gathered), which start counting from now.
    pub async fn load(
        &self,
        now: DateTime<Utc>,
        game: &GameSnapshot,
        random: &dyn RandomPort,
        options: DecodeOptions,
    ) -> Result<Vec<ScheduleEntry>, StoreError> {
        let json = match tokio::fs::read_to_string(&self.path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "No schedule file, starting empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };

        let roll = |min: i64, max: i64| random.gen_range(min, max);
        let ctx = ConditionContext::new(now, game, &roll);
        let entries = decode_schedule(&json, &ctx, &options)?;
        tracing::info!(path = %self.path.display(), entries = entries.len(), "Schedule loaded");
        Ok(entries)
    }

    pub async fn save(&self, entries: &[ScheduleEntry], now: DateTime<Utc>) -> Result<(), StoreError> {
        let json = encode_schedule(entries, now.date_naive())?;

        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent, e))?;
        }

        let mut tmp_name = self.path.as_os_str().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);
        tokio::fs::write(&tmp_path, json)
            .await
            .map_err(|e| StoreError::io(&tmp_path, e))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| StoreError::io(&self.path, e))?;

        tracing::debug!(path = %self.path.display(), entries = entries.len(), "Schedule saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::FixedRandom;
    use chrono::TimeZone;
    use taskloom_domain::condition::IntervalCondition;
    use taskloom_domain::{Condition, EntryState, LogicalCondition};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 14, 12, 0, 0).unwrap()
    }

    fn entry(name: &str) -> ScheduleEntry {
        ScheduleEntry::new(
            name,
            "mining",
            Condition::and([Condition::from(IntervalCondition::every_minutes(5, now()))]),
            Condition::Logical(LogicalCondition::or()),
            now(),
        )
        .unwrap()
        .with_priority(3)
    }

    async fn load(store: &JsonScheduleStore) -> Result<Vec<ScheduleEntry>, StoreError> {
        store
            .load(now(), &GameSnapshot::new(), &FixedRandom(0), DecodeOptions::at(now()))
            .await
    }

    #[tokio::test]
    async fn missing_file_is_an_empty_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonScheduleStore::new(dir.path().join("schedule.json"));

        assert!(load(&store).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn saves_and_loads_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonScheduleStore::new(dir.path().join("nested").join("schedule.json"));
        let saved = vec![entry("Mine iron"), entry("Mine coal")];

        store.save(&saved, now()).await.unwrap();
        let loaded = load(&store).await.unwrap();

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id(), saved[0].id());
        assert_eq!(loaded[1].name(), "Mine coal");
        assert_eq!(loaded[1].priority(), 3);
        assert!(loaded.iter().all(|entry| entry.state() == EntryState::Idle));
        assert!(!dir.path().join("nested").join("schedule.json.tmp").exists());
    }

    #[tokio::test]
    async fn save_replaces_the_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonScheduleStore::new(dir.path().join("schedule.json"));

        store.save(&[entry("Mine iron"), entry("Mine coal")], now()).await.unwrap();
        store.save(&[entry("Mine gold")], now()).await.unwrap();

        let loaded = load(&store).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name(), "Mine gold");
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schedule.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();

        let result = load(&JsonScheduleStore::new(path)).await;

        assert!(matches!(result, Err(StoreError::Serialization(_))));
    }

    #[tokio::test]
    async fn written_file_is_pretty_json_with_versions() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonScheduleStore::new(dir.path().join("schedule.json"));

        store.save(&[entry("Mine iron")], now()).await.unwrap();

        let text = tokio::fs::read_to_string(store.path()).await.unwrap();
        assert!(text.contains('\n'));
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["entries"][0]["startConditions"]["version"], 1);
    }
}
