//! SQLite storage layer for dupcheck.
//!
//! Persists every accepted phone number once, keyed by its dedup key, and
//! answers the membership, stats, export and reset queries the duplicate
//! filter needs. Each operation opens its own connection and closes it
//! before returning, so no handle outlives a single call.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::guard::{ClearGrant, ExportGrant};
use crate::logging::masked_key;
use crate::normalize::{dedup_key, is_valid_key, KEY_LEN};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid store configuration: {0}")]
    Config(String),
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// One accepted phone number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneRecord {
    pub id: i64,
    /// Value exactly as received, leading zeros and punctuation included.
    pub raw_value: String,
    pub dedup_key: String,
    /// Provenance tag, typically the uploaded file name.
    pub source_label: String,
    /// Unix seconds, assigned at insert.
    pub recorded_at: u64,
}

/// Read-only counters over the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_records: u64,
    pub valid_records: u64,
    pub source_labels: u64,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub db_path: PathBuf,
    pub wal_mode: bool,
    pub busy_timeout_ms: u64,
    /// Rows fetched per round trip by [`PhoneStore::load_valid_keys`].
    pub page_size: usize,
    /// Rows written per transaction by [`PhoneStore::insert_if_absent`].
    pub insert_batch_size: usize,
    /// Rows removed per statement by [`PhoneStore::clear_all`].
    pub delete_batch_size: usize,
}

impl StoreConfig {
    pub fn at(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<(), StoreError> {
        if self.page_size == 0 {
            return Err(StoreError::Config("page_size must be positive".into()));
        }
        if self.insert_batch_size == 0 {
            return Err(StoreError::Config(
                "insert_batch_size must be positive".into(),
            ));
        }
        if self.delete_batch_size == 0 {
            return Err(StoreError::Config(
                "delete_batch_size must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("phones.db"),
            wal_mode: true,
            busy_timeout_ms: 5_000,
            page_size: 10_000,
            insert_batch_size: 1_000,
            delete_batch_size: 10_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Store handle
// ---------------------------------------------------------------------------

/// Handle to an initialized phone store.
///
/// Holding a `PhoneStore` means the schema exists; it holds no open
/// connection of its own.
#[derive(Debug, Clone)]
pub struct PhoneStore {
    config: StoreConfig,
}

impl PhoneStore {
    /// Create the store file and schema if needed. Safe to call on every
    /// start; existing rows are left untouched.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        config.validate()?;
        if let Some(parent) = config.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        tracing::debug!(
            target: "dupcheck.storage",
            path = %config.db_path.display(),
            wal_mode = config.wal_mode,
            busy_timeout_ms = config.busy_timeout_ms,
            "opening phone store"
        );

        let store = Self { config };
        let conn = store.connect()?;
        if store.config.wal_mode {
            let mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            tracing::trace!(target: "dupcheck.storage", journal_mode = %mode, "journal mode set");
        }
        create_schema(&conn)?;
        Ok(store)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn path(&self) -> &Path {
        &self.config.db_path
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.config.db_path)?;
        conn.busy_timeout(Duration::from_millis(self.config.busy_timeout_ms))?;
        Ok(conn)
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Record every raw value whose key is not yet stored.
    ///
    /// Values whose key is not exactly [`KEY_LEN`] digits are skipped. The
    /// first record for a key wins, including against later repeats in the
    /// same call. Returns the number of rows actually inserted.
    ///
    /// Rows are committed in sub-batches; if a later sub-batch fails, the
    /// earlier ones stay durable.
    pub fn insert_if_absent<I, S>(
        &self,
        raw_values: I,
        source_label: &str,
    ) -> Result<usize, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut offered = 0usize;
        let candidates: Vec<(String, String)> = raw_values
            .into_iter()
            .filter_map(|raw| {
                offered += 1;
                let raw = raw.as_ref();
                let key = dedup_key(raw);
                (key.len() == KEY_LEN).then(|| (raw.to_string(), key))
            })
            .collect();

        if candidates.is_empty() {
            tracing::debug!(
                target: "dupcheck.storage",
                offered,
                "no duplicate-eligible values to insert"
            );
            return Ok(0);
        }

        let mut conn = self.connect()?;
        let now = now_secs() as i64;
        let mut inserted = 0usize;

        for chunk in candidates.chunks(self.config.insert_batch_size) {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT OR IGNORE INTO phone_numbers
                     (raw_value, dedup_key, source_label, recorded_at)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for (raw, key) in chunk {
                    inserted += stmt.execute(params![raw, key, source_label, now])?;
                }
            }
            tx.commit()?;
        }

        tracing::debug!(
            target: "dupcheck.storage",
            offered,
            eligible = candidates.len(),
            inserted,
            source_label,
            "bulk insert complete"
        );
        Ok(inserted)
    }

    /// Delete every record, then reclaim file space. Returns the number of
    /// rows removed.
    ///
    /// Rows go in bounded batches so a very large store never needs one
    /// giant transaction. Ids are not reused afterwards.
    pub fn clear_all(&self, _grant: &ClearGrant) -> Result<u64, StoreError> {
        let conn = self.connect()?;
        let batch = self.config.delete_batch_size as i64;
        let mut deleted = 0u64;
        loop {
            let removed = conn.execute(
                "DELETE FROM phone_numbers WHERE id IN
                 (SELECT id FROM phone_numbers ORDER BY id LIMIT ?1)",
                params![batch],
            )?;
            if removed == 0 {
                break;
            }
            deleted += removed as u64;
            tracing::trace!(target: "dupcheck.storage", removed, deleted, "clear batch");
        }
        conn.execute_batch("VACUUM;")?;

        tracing::info!(target: "dupcheck.storage", deleted, "phone store cleared");
        Ok(deleted)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Every stored key of exactly [`KEY_LEN`] digits.
    ///
    /// Fetched in id-ordered pages of `page_size` rows, resuming after the
    /// last id seen, so the engine never has to buffer the whole result.
    pub fn load_valid_keys(&self) -> Result<HashSet<String>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, dedup_key FROM phone_numbers
             WHERE id > ?1 AND length(dedup_key) = 9
             ORDER BY id LIMIT ?2",
        )?;

        let page_size = self.config.page_size;
        let mut keys = HashSet::new();
        let mut after_id = 0i64;
        let mut pages = 0usize;
        loop {
            let rows = stmt.query_map(params![after_id, page_size as i64], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut fetched = 0usize;
            for row in rows {
                let (id, key) = row?;
                after_id = id;
                fetched += 1;
                if is_valid_key(&key) {
                    keys.insert(key);
                }
            }
            pages += 1;
            if fetched < page_size {
                break;
            }
        }

        tracing::debug!(
            target: "dupcheck.storage",
            keys = keys.len(),
            pages,
            "loaded valid keys"
        );
        Ok(keys)
    }

    /// Whether the key of `raw` is already stored. Values without a valid
    /// key are never present.
    pub fn contains_key(&self, raw: &str) -> Result<bool, StoreError> {
        let key = dedup_key(raw);
        if !is_valid_key(&key) {
            return Ok(false);
        }
        let conn = self.connect()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM phone_numbers WHERE dedup_key = ?1 AND length(dedup_key) = 9",
                params![key],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        tracing::trace!(
            target: "dupcheck.storage",
            key = %masked_key(&key),
            found,
            "membership check"
        );
        Ok(found)
    }

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let conn = self.connect()?;
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM phone_numbers", [], |row| {
            row.get(0)
        })?;
        let valid: i64 = conn.query_row(
            "SELECT COUNT(*) FROM phone_numbers WHERE length(dedup_key) = 9",
            [],
            |row| row.get(0),
        )?;
        let labels: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT source_label) FROM phone_numbers",
            [],
            |row| row.get(0),
        )?;
        Ok(StoreStats {
            total_records: total as u64,
            valid_records: valid as u64,
            source_labels: labels as u64,
        })
    }

    pub fn count_for_source(&self, source_label: &str) -> Result<u64, StoreError> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM phone_numbers WHERE source_label = ?1",
            params![source_label],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Every record, ordered by source label then raw value.
    pub fn export_all(&self, _grant: &ExportGrant) -> Result<Vec<PhoneRecord>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, raw_value, dedup_key, source_label, recorded_at
             FROM phone_numbers
             ORDER BY source_label, raw_value, id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(PhoneRecord {
                id: row.get(0)?,
                raw_value: row.get(1)?,
                dedup_key: row.get(2)?,
                source_label: row.get(3)?,
                recorded_at: row.get::<_, i64>(4)? as u64,
            })
        })?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        tracing::debug!(target: "dupcheck.storage", records = result.len(), "exported records");
        Ok(result)
    }
}

fn create_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS phone_numbers (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            raw_value       TEXT NOT NULL,
            dedup_key       TEXT NOT NULL,
            source_label    TEXT NOT NULL DEFAULT '',
            recorded_at     INTEGER NOT NULL
        );

        -- Only full-length keys are unique; short keys never match anything.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_phone_numbers_key
            ON phone_numbers(dedup_key) WHERE length(dedup_key) = 9;
        CREATE INDEX IF NOT EXISTS idx_phone_numbers_recorded_at
            ON phone_numbers(recorded_at);
        CREATE INDEX IF NOT EXISTS idx_phone_numbers_source
            ON phone_numbers(source_label, raw_value);
        ",
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Resolve the database path: `{data_dir}/phones.db`.
pub fn db_path(data_dir: &Path) -> PathBuf {
    data_dir.join("phones.db")
}

/// Resolve the dupcheck home directory from environment or default.
pub fn resolve_data_dir() -> PathBuf {
    std::env::var("DUPCHECK_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_or_current().join(".dupcheck"))
}

fn home_or_current() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store(dir: &tempfile::TempDir) -> PhoneStore {
        PhoneStore::open(StoreConfig::at(dir.path().join("phones.db"))).unwrap()
    }

    #[test]
    fn test_schema_creation_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        assert_eq!(store.insert_if_absent(["0812345678"], "a.csv").unwrap(), 1);

        let reopened = test_store(&dir);
        assert_eq!(reopened.stats().unwrap().total_records, 1);
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b").join("phones.db");
        let store = PhoneStore::open(StoreConfig::at(&nested)).unwrap();
        assert!(nested.exists());
        assert_eq!(store.path(), nested.as_path());
    }

    #[test]
    fn test_rejects_zero_sized_batches() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            page_size: 0,
            ..StoreConfig::at(dir.path().join("phones.db"))
        };
        assert!(matches!(
            PhoneStore::open(config),
            Err(StoreError::Config(_))
        ));
    }

    #[test]
    fn test_insert_skips_short_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        let inserted = store
            .insert_if_absent(["42", "", "12345678", "n/a", "0899999999"], "mixed")
            .unwrap();
        assert_eq!(inserted, 1);
        let stats = store.stats().unwrap();
        assert_eq!(stats.total_records, 1);
        assert_eq!(stats.valid_records, 1);
    }

    #[test]
    fn test_first_insert_wins_within_batch() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        let inserted = store
            .insert_if_absent(["0812345678", "+66812345678", "812345678"], "batch-1")
            .unwrap();
        assert_eq!(inserted, 1);

        let records = store.export_all(&ExportGrant::authorized()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].raw_value, "0812345678");
        assert_eq!(records[0].dedup_key, "812345678");
        assert_eq!(records[0].source_label, "batch-1");
    }

    #[test]
    fn test_small_insert_batches_commit_independently() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            insert_batch_size: 2,
            ..StoreConfig::at(dir.path().join("phones.db"))
        };
        let store = PhoneStore::open(config).unwrap();
        let values: Vec<String> = (0..7).map(|i| format!("08{:08}", i)).collect();
        assert_eq!(store.insert_if_absent(&values, "paged").unwrap(), 7);
        assert_eq!(store.insert_if_absent(&values, "paged").unwrap(), 0);
    }

    #[test]
    fn test_load_valid_keys_pages_through_everything() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            page_size: 3,
            ..StoreConfig::at(dir.path().join("phones.db"))
        };
        let store = PhoneStore::open(config).unwrap();
        let values: Vec<String> = (0..10).map(|i| format!("{:09}", 100_000_000 + i)).collect();
        store.insert_if_absent(&values, "pages").unwrap();

        let keys = store.load_valid_keys().unwrap();
        assert_eq!(keys.len(), 10);
        for v in &values {
            assert!(keys.contains(v));
        }
    }

    #[test]
    fn test_contains_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        store.insert_if_absent(["234567890"], "seed").unwrap();
        assert!(store.contains_key("1234567890").unwrap());
        assert!(store.contains_key("+1 234-567-890").unwrap());
        assert!(!store.contains_key("34567890").unwrap());
        assert!(!store.contains_key("").unwrap());
    }

    #[test]
    fn test_stats_and_source_counts() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        store.insert_if_absent(["0811111111", "0822222222"], "a.csv").unwrap();
        store.insert_if_absent(["0833333333", "0811111111"], "b.csv").unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(
            stats,
            StoreStats {
                total_records: 3,
                valid_records: 3,
                source_labels: 2,
            }
        );
        assert_eq!(store.count_for_source("a.csv").unwrap(), 2);
        assert_eq!(store.count_for_source("b.csv").unwrap(), 1);
        assert_eq!(store.count_for_source("c.csv").unwrap(), 0);
    }

    #[test]
    fn test_export_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        store.insert_if_absent(["0899999999", "0811111111"], "b").unwrap();
        store.insert_if_absent(["0855555555"], "a").unwrap();

        let records = store.export_all(&ExportGrant::authorized()).unwrap();
        let order: Vec<(&str, &str)> = records
            .iter()
            .map(|r| (r.source_label.as_str(), r.raw_value.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("a", "0855555555"),
                ("b", "0811111111"),
                ("b", "0899999999"),
            ]
        );
        assert!(records.iter().all(|r| r.recorded_at > 0));
    }

    #[test]
    fn test_clear_all_in_batches_does_not_reuse_ids() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            delete_batch_size: 4,
            ..StoreConfig::at(dir.path().join("phones.db"))
        };
        let store = PhoneStore::open(config).unwrap();
        let values: Vec<String> = (0..10).map(|i| format!("{:09}", 500_000_000 + i)).collect();
        store.insert_if_absent(&values, "x").unwrap();

        assert_eq!(store.clear_all(&ClearGrant::for_tests()).unwrap(), 10);
        assert_eq!(store.stats().unwrap(), StoreStats::default());
        assert!(store.load_valid_keys().unwrap().is_empty());

        store.insert_if_absent(["0812345678"], "after").unwrap();
        let records = store.export_all(&ExportGrant::authorized()).unwrap();
        assert!(records[0].id > 10);
    }

    #[test]
    fn test_db_path_helpers() {
        let dir = PathBuf::from("/tmp/dupcheck-home");
        assert_eq!(db_path(&dir), dir.join("phones.db"));
    }
}
