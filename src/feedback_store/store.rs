//! SQLite-backed feedback store implementation.

use super::models::{
    ClipFeedback, ContentRecord, FeedbackCommit, FeedbackEvent, FeedbackSnapshot,
    FeedbackStoreStats, LabelUsage,
};
use super::schema::FEEDBACK_VERSIONED_SCHEMAS;
use super::trait_def::{FeedbackStore, FeedbackStoreError, StoreResult};
use crate::classifier::ContentMetadata;
use crate::signal::FeedbackSignal;
use crate::sqlite_persistence::migrate_to_latest;
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

const CLASSIFIER_STATE_KEY: &str = "classifier_model";

const EVENT_COLUMNS: &str = "id, label, signal, content_fingerprint, timestamp";

const CLIP_FEEDBACK_COLUMNS: &str =
    "id, content_fingerprint, original_tags, corrected_tags, timestamp";

/// SQLite-backed feedback store.
///
/// A single connection serializes writers and readers, which gives every caller
/// read-your-writes and keeps transactions invisible until committed.
#[derive(Clone)]
pub struct SqliteFeedbackStore {
    conn: Arc<Mutex<Connection>>,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// An event row before its signal has been validated.
struct RawEvent {
    id: i64,
    label: String,
    signal: String,
    content_fingerprint: String,
    timestamp: i64,
}

impl RawEvent {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            label: row.get(1)?,
            signal: row.get(2)?,
            content_fingerprint: row.get(3)?,
            timestamp: row.get(4)?,
        })
    }

    fn into_event(self) -> StoreResult<FeedbackEvent> {
        let signal = FeedbackSignal::parse(&self.signal).ok_or_else(|| {
            FeedbackStoreError::CorruptState(format!(
                "event {} has unknown signal {:?}",
                self.id, self.signal
            ))
        })?;
        Ok(FeedbackEvent {
            id: self.id,
            label: self.label,
            signal,
            content_fingerprint: self.content_fingerprint,
            timestamp: self.timestamp,
        })
    }
}

fn query_events(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> StoreResult<Vec<FeedbackEvent>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let raw = stmt
        .query_map(params, RawEvent::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    raw.into_iter().map(RawEvent::into_event).collect()
}

/// A clip feedback row with its tag lists still encoded.
struct RawClipFeedback {
    id: i64,
    content_fingerprint: String,
    original_tags: String,
    corrected_tags: String,
    timestamp: i64,
}

impl RawClipFeedback {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            content_fingerprint: row.get(1)?,
            original_tags: row.get(2)?,
            corrected_tags: row.get(3)?,
            timestamp: row.get(4)?,
        })
    }

    fn into_clip_feedback(self) -> StoreResult<ClipFeedback> {
        let id = self.id;
        let decode = |json: &str| {
            serde_json::from_str::<Vec<String>>(json).map_err(|e| {
                FeedbackStoreError::CorruptState(format!(
                    "clip feedback {} has unreadable tags: {}",
                    id, e
                ))
            })
        };
        Ok(ClipFeedback {
            id,
            original_tags: decode(&self.original_tags)?,
            corrected_tags: decode(&self.corrected_tags)?,
            content_fingerprint: self.content_fingerprint,
            timestamp: self.timestamp,
        })
    }
}

fn encode_tags(tags: &[String]) -> StoreResult<String> {
    serde_json::to_string(tags)
        .map_err(|e| FeedbackStoreError::CorruptState(format!("unencodable tags: {}", e)))
}

fn query_clip_feedback(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> StoreResult<Vec<ClipFeedback>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let raw = stmt
        .query_map(params, RawClipFeedback::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    raw.into_iter()
        .map(RawClipFeedback::into_clip_feedback)
        .collect()
}

fn row_to_usage(row: &Row) -> rusqlite::Result<LabelUsage> {
    Ok(LabelUsage {
        label: row.get(0)?,
        count: row.get(1)?,
        last_seen_at: row.get(2)?,
    })
}

fn row_to_content(row: &Row) -> rusqlite::Result<ContentRecord> {
    Ok(ContentRecord {
        fingerprint: row.get(0)?,
        metadata: ContentMetadata {
            duration_secs: row.get(1)?,
            sample_rate: row.get(2)?,
            channels: row.get(3)?,
        },
        recorded_at: row.get(4)?,
    })
}

fn insert_event(
    conn: &Connection,
    label: &str,
    signal: FeedbackSignal,
    content_fingerprint: &str,
    timestamp: i64,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO feedback_events (label, signal, content_fingerprint, timestamp)
         VALUES (?1, ?2, ?3, ?4)",
        params![label, signal.as_str(), content_fingerprint, timestamp],
    )?;
    Ok(conn.last_insert_rowid())
}

fn bump_label_usage(conn: &Connection, label: &str, seen_at: i64) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO label_usage (label, count, last_seen_at)
         VALUES (?1, 1, ?2)
         ON CONFLICT(label) DO UPDATE SET
             count = count + 1,
             last_seen_at = MAX(last_seen_at, excluded.last_seen_at)",
        params![label, seen_at],
    )?;
    Ok(())
}

fn upsert_content_metadata(
    conn: &Connection,
    fingerprint: &str,
    metadata: &ContentMetadata,
    recorded_at: i64,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO content_metadata
         (fingerprint, duration_secs, sample_rate, channels, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(fingerprint) DO UPDATE SET
             duration_secs = excluded.duration_secs,
             sample_rate = excluded.sample_rate,
             channels = excluded.channels,
             recorded_at = excluded.recorded_at",
        params![
            fingerprint,
            metadata.duration_secs,
            metadata.sample_rate,
            metadata.channels,
            recorded_at
        ],
    )?;
    Ok(())
}

fn upsert_classifier_state(conn: &Connection, blob: &str, updated_at: i64) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO tagger_state (key, value, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET
             value = excluded.value,
             updated_at = excluded.updated_at",
        params![CLASSIFIER_STATE_KEY, blob, updated_at],
    )?;
    Ok(())
}

/// Applies feedback to the latest clip feedback record of a clip.
///
/// Returns whether a record was corrected. A record with unreadable tags is
/// left alone rather than blocking the feedback itself.
fn correct_latest_clip_feedback(
    conn: &Connection,
    fingerprint: &str,
    label: &str,
    signal: FeedbackSignal,
) -> StoreResult<bool> {
    let latest = conn
        .query_row(
            &format!(
                "SELECT {} FROM clip_feedback WHERE content_fingerprint = ?1
                 ORDER BY timestamp DESC, id DESC LIMIT 1",
                CLIP_FEEDBACK_COLUMNS
            ),
            params![fingerprint],
            RawClipFeedback::from_row,
        )
        .optional()?;
    let Some(raw) = latest else {
        return Ok(false);
    };
    let mut record = match raw.into_clip_feedback() {
        Ok(record) => record,
        Err(err) => {
            warn!("Not correcting clip feedback: {}", err);
            return Ok(false);
        }
    };
    record.apply(label, signal);
    conn.execute(
        "UPDATE clip_feedback SET corrected_tags = ?1 WHERE id = ?2",
        params![encode_tags(&record.corrected_tags)?, record.id],
    )?;
    Ok(true)
}

fn count_rows(conn: &Connection) -> rusqlite::Result<FeedbackStoreStats> {
    let events: usize = conn.query_row("SELECT COUNT(*) FROM feedback_events", [], |r| r.get(0))?;
    let labels: usize = conn.query_row("SELECT COUNT(*) FROM label_usage", [], |r| r.get(0))?;
    let content_records: usize =
        conn.query_row("SELECT COUNT(*) FROM content_metadata", [], |r| r.get(0))?;
    let tagged_clips: usize =
        conn.query_row("SELECT COUNT(*) FROM clip_feedback", [], |r| r.get(0))?;
    let has_classifier_state = conn
        .query_row(
            "SELECT 1 FROM tagger_state WHERE key = ?1",
            params![CLASSIFIER_STATE_KEY],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    Ok(FeedbackStoreStats {
        events,
        labels,
        content_records,
        tagged_clips,
        has_classifier_state,
    })
}

fn validate_snapshot(snapshot: &FeedbackSnapshot) -> StoreResult<()> {
    let mut event_ids = HashSet::new();
    for event in &snapshot.events {
        if !event_ids.insert(event.id) {
            return Err(FeedbackStoreError::CorruptState(format!(
                "duplicate event id {}",
                event.id
            )));
        }
    }
    let mut labels = HashSet::new();
    for usage in &snapshot.usage_counters {
        if usage.count < 1 {
            return Err(FeedbackStoreError::CorruptState(format!(
                "label {:?} has usage count {}",
                usage.label, usage.count
            )));
        }
        if !labels.insert(usage.label.as_str()) {
            return Err(FeedbackStoreError::CorruptState(format!(
                "duplicate usage counter for label {:?}",
                usage.label
            )));
        }
    }
    let mut fingerprints = HashSet::new();
    for record in &snapshot.content {
        if !fingerprints.insert(record.fingerprint.as_str()) {
            return Err(FeedbackStoreError::CorruptState(format!(
                "duplicate content record {}",
                record.fingerprint
            )));
        }
    }
    let mut clip_ids = HashSet::new();
    for record in &snapshot.clip_feedback {
        if !clip_ids.insert(record.id) {
            return Err(FeedbackStoreError::CorruptState(format!(
                "duplicate clip feedback id {}",
                record.id
            )));
        }
    }
    Ok(())
}

impl SqliteFeedbackStore {
    /// Open (creating or migrating if needed) the feedback database at `db_path`.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open feedback database at {:?}", path))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("Failed to set WAL mode on feedback database")?;
        Self::from_connection(conn)
    }

    /// A store that lives only as long as the process.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        migrate_to_latest(&mut conn, FEEDBACK_VERSIONED_SCHEMAS, "feedback")?;

        let stats = count_rows(&conn)?;
        info!(
            "Feedback store ready: {} events, {} custom labels, {} known clips",
            stats.events, stats.labels, stats.content_records
        );

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| {
            FeedbackStoreError::StorageUnavailable(anyhow!("feedback database lock poisoned"))
        })
    }
}

impl FeedbackStore for SqliteFeedbackStore {
    fn record_signal(
        &self,
        label: &str,
        signal: FeedbackSignal,
        content_fingerprint: &str,
    ) -> StoreResult<i64> {
        let conn = self.conn()?;
        let id = insert_event(&conn, label, signal, content_fingerprint, now_ms())?;
        debug!(id, label, signal = signal.as_str(), "Recorded feedback event");
        Ok(id)
    }

    fn events_for_label(&self, label: Option<&str>) -> StoreResult<Vec<FeedbackEvent>> {
        let conn = self.conn()?;
        match label {
            Some(label) => query_events(
                &conn,
                &format!(
                    "SELECT {} FROM feedback_events WHERE label = ?1 ORDER BY id",
                    EVENT_COLUMNS
                ),
                params![label],
            ),
            None => query_events(
                &conn,
                &format!("SELECT {} FROM feedback_events ORDER BY id", EVENT_COLUMNS),
                [],
            ),
        }
    }

    fn recent_events(&self, limit: usize) -> StoreResult<Vec<FeedbackEvent>> {
        let conn = self.conn()?;
        query_events(
            &conn,
            &format!(
                "SELECT {} FROM feedback_events ORDER BY timestamp DESC, id DESC LIMIT ?1",
                EVENT_COLUMNS
            ),
            params![sql_limit(limit)],
        )
    }

    fn commit_feedback(&self, feedback: &FeedbackCommit<'_>) -> StoreResult<i64> {
        let mut conn = self.conn()?;
        let now = now_ms();
        let tx = conn.transaction()?;
        upsert_content_metadata(&tx, feedback.content_fingerprint, feedback.metadata, now)?;
        let id = insert_event(
            &tx,
            feedback.label,
            feedback.signal,
            feedback.content_fingerprint,
            now,
        )?;
        if feedback.signal == FeedbackSignal::Introduce {
            bump_label_usage(&tx, feedback.label, now)?;
        }
        let corrected = correct_latest_clip_feedback(
            &tx,
            feedback.content_fingerprint,
            feedback.label,
            feedback.signal,
        )?;
        upsert_classifier_state(&tx, feedback.classifier_state, now)?;
        tx.commit()?;
        debug!(
            id,
            label = feedback.label,
            signal = feedback.signal.as_str(),
            corrected,
            "Committed feedback"
        );
        Ok(id)
    }

    fn record_label_introduced(&self, label: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        bump_label_usage(&conn, label, now_ms())?;
        Ok(())
    }

    fn record_introduction(&self, label: &str, content_fingerprint: &str) -> StoreResult<i64> {
        let mut conn = self.conn()?;
        let now = now_ms();
        let tx = conn.transaction()?;
        let id = insert_event(&tx, label, FeedbackSignal::Introduce, content_fingerprint, now)?;
        bump_label_usage(&tx, label, now)?;
        tx.commit()?;
        debug!(id, label, "Recorded label introduction");
        Ok(id)
    }

    fn top_labels(&self, limit: usize) -> StoreResult<Vec<LabelUsage>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT label, count, last_seen_at FROM label_usage
             ORDER BY count DESC, last_seen_at DESC, label ASC
             LIMIT ?1",
        )?;
        let usage = stmt
            .query_map(params![sql_limit(limit)], row_to_usage)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(usage)
    }

    fn record_content_metadata(
        &self,
        fingerprint: &str,
        metadata: &ContentMetadata,
    ) -> StoreResult<()> {
        let conn = self.conn()?;
        upsert_content_metadata(&conn, fingerprint, metadata, now_ms())?;
        Ok(())
    }

    fn content_metadata(&self, fingerprint: &str) -> StoreResult<Option<ContentMetadata>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT fingerprint, duration_secs, sample_rate, channels, recorded_at
             FROM content_metadata WHERE fingerprint = ?1",
        )?;
        let record = stmt
            .query_row(params![fingerprint], row_to_content)
            .optional()?;
        Ok(record.map(|r| r.metadata))
    }

    fn record_clip_tags(
        &self,
        fingerprint: &str,
        metadata: &ContentMetadata,
        tags: &[String],
    ) -> StoreResult<i64> {
        let encoded = encode_tags(tags)?;
        let mut conn = self.conn()?;
        let now = now_ms();
        let tx = conn.transaction()?;
        upsert_content_metadata(&tx, fingerprint, metadata, now)?;
        tx.execute(
            "INSERT INTO clip_feedback
             (content_fingerprint, original_tags, corrected_tags, timestamp)
             VALUES (?1, ?2, ?2, ?3)",
            params![fingerprint, encoded, now],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        debug!(id, tags = tags.len(), "Recorded clip tags");
        Ok(id)
    }

    fn recent_clip_feedback(&self, limit: usize) -> StoreResult<Vec<ClipFeedback>> {
        let conn = self.conn()?;
        query_clip_feedback(
            &conn,
            &format!(
                "SELECT {} FROM clip_feedback ORDER BY timestamp DESC, id DESC LIMIT ?1",
                CLIP_FEEDBACK_COLUMNS
            ),
            params![sql_limit(limit)],
        )
    }

    fn save_classifier_state(&self, blob: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        upsert_classifier_state(&conn, blob, now_ms())?;
        Ok(())
    }

    fn load_classifier_state(&self) -> StoreResult<Option<String>> {
        let conn = self.conn()?;
        let blob = conn
            .query_row(
                "SELECT value FROM tagger_state WHERE key = ?1",
                params![CLASSIFIER_STATE_KEY],
                |row| row.get(0),
            )
            .optional()?;
        Ok(blob)
    }

    fn clear_all(&self) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let events = tx.execute("DELETE FROM feedback_events", [])?;
        let labels = tx.execute("DELETE FROM label_usage", [])?;
        tx.execute("DELETE FROM content_metadata", [])?;
        tx.execute("DELETE FROM clip_feedback", [])?;
        tx.execute("DELETE FROM tagger_state", [])?;
        tx.commit()?;
        info!(
            "Cleared feedback store ({} events, {} custom labels)",
            events, labels
        );
        Ok(())
    }

    fn export_snapshot(&self) -> StoreResult<FeedbackSnapshot> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let events = query_events(
            &tx,
            &format!("SELECT {} FROM feedback_events ORDER BY id", EVENT_COLUMNS),
            [],
        )?;
        let usage_counters = tx
            .prepare(
                "SELECT label, count, last_seen_at FROM label_usage
                 ORDER BY count DESC, last_seen_at DESC, label ASC",
            )?
            .query_map([], row_to_usage)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let content = tx
            .prepare(
                "SELECT fingerprint, duration_secs, sample_rate, channels, recorded_at
                 FROM content_metadata ORDER BY fingerprint",
            )?
            .query_map([], row_to_content)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let clip_feedback = query_clip_feedback(
            &tx,
            &format!("SELECT {} FROM clip_feedback ORDER BY id", CLIP_FEEDBACK_COLUMNS),
            [],
        )?;
        tx.commit()?;
        Ok(FeedbackSnapshot {
            events,
            usage_counters,
            content,
            clip_feedback,
        })
    }

    fn import_snapshot(&self, snapshot: &FeedbackSnapshot) -> StoreResult<()> {
        validate_snapshot(snapshot)?;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM feedback_events", [])?;
        tx.execute("DELETE FROM label_usage", [])?;
        tx.execute("DELETE FROM content_metadata", [])?;
        tx.execute("DELETE FROM clip_feedback", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO feedback_events (id, label, signal, content_fingerprint, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for event in &snapshot.events {
                stmt.execute(params![
                    event.id,
                    event.label,
                    event.signal.as_str(),
                    event.content_fingerprint,
                    event.timestamp
                ])?;
            }

            let mut stmt = tx.prepare(
                "INSERT INTO label_usage (label, count, last_seen_at) VALUES (?1, ?2, ?3)",
            )?;
            for usage in &snapshot.usage_counters {
                stmt.execute(params![usage.label, usage.count, usage.last_seen_at])?;
            }

            let mut stmt = tx.prepare(
                "INSERT INTO content_metadata
                 (fingerprint, duration_secs, sample_rate, channels, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for record in &snapshot.content {
                stmt.execute(params![
                    record.fingerprint,
                    record.metadata.duration_secs,
                    record.metadata.sample_rate,
                    record.metadata.channels,
                    record.recorded_at
                ])?;
            }

            let mut stmt = tx.prepare(
                "INSERT INTO clip_feedback
                 (id, content_fingerprint, original_tags, corrected_tags, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for record in &snapshot.clip_feedback {
                stmt.execute(params![
                    record.id,
                    record.content_fingerprint,
                    encode_tags(&record.original_tags)?,
                    encode_tags(&record.corrected_tags)?,
                    record.timestamp
                ])?;
            }
        }
        tx.commit()?;
        info!(
            "Imported {} events, {} usage counters, {} content records, {} clip feedback records",
            snapshot.events.len(),
            snapshot.usage_counters.len(),
            snapshot.content.len(),
            snapshot.clip_feedback.len()
        );
        Ok(())
    }

    fn stats(&self) -> StoreResult<FeedbackStoreStats> {
        let conn = self.conn()?;
        Ok(count_rows(&conn)?)
    }
}
