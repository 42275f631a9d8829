//! SQLite schema definitions for the feedback database.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};
use anyhow::Result;
use rusqlite::Connection;

// =============================================================================
// Version 1 - Feedback events and label usage
// =============================================================================

/// Append-only log of user feedback.
const FEEDBACK_EVENTS_TABLE_V1: Table = Table {
    name: "feedback_events",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("label", &SqlType::Text, non_null = true),
        sqlite_column!("signal", &SqlType::Text, non_null = true),
        sqlite_column!("content_fingerprint", &SqlType::Text, non_null = true),
        sqlite_column!("timestamp", &SqlType::Integer, non_null = true),
    ],
    indices: &[
        ("idx_feedback_events_label", "label"),
        ("idx_feedback_events_timestamp", "timestamp DESC"),
    ],
};

/// One row per user-introduced label.
const LABEL_USAGE_TABLE_V1: Table = Table {
    name: "label_usage",
    columns: &[
        sqlite_column!("label", &SqlType::Text, is_primary_key = true),
        sqlite_column!("count", &SqlType::Integer, non_null = true),
        sqlite_column!("last_seen_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_label_usage_count", "count DESC, last_seen_at DESC")],
};

// =============================================================================
// Version 2 - Content metadata and tagger state
// =============================================================================

/// Audio metadata per fingerprint, needed to rebuild feature vectors on replay.
const CONTENT_METADATA_TABLE_V2: Table = Table {
    name: "content_metadata",
    columns: &[
        sqlite_column!("fingerprint", &SqlType::Text, is_primary_key = true),
        sqlite_column!("duration_secs", &SqlType::Real, non_null = true),
        sqlite_column!("sample_rate", &SqlType::Integer, non_null = true),
        sqlite_column!("channels", &SqlType::Integer, non_null = true),
        sqlite_column!("recorded_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[],
};

/// Key-value blobs, e.g. the serialized classifier.
const TAGGER_STATE_TABLE_V2: Table = Table {
    name: "tagger_state",
    columns: &[
        sqlite_column!("key", &SqlType::Text, is_primary_key = true),
        sqlite_column!("value", &SqlType::Text, non_null = true),
        sqlite_column!("updated_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[],
};

fn migrate_v1_to_v2(conn: &Connection) -> Result<()> {
    CONTENT_METADATA_TABLE_V2.create(conn)?;
    TAGGER_STATE_TABLE_V2.create(conn)?;
    Ok(())
}

// =============================================================================
// Version 3 - Per-clip tag history
// =============================================================================

/// Tags proposed for a clip and what the user's feedback turned them into.
/// Tag lists are JSON arrays of labels.
const CLIP_FEEDBACK_TABLE_V3: Table = Table {
    name: "clip_feedback",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("content_fingerprint", &SqlType::Text, non_null = true),
        sqlite_column!("original_tags", &SqlType::Text, non_null = true),
        sqlite_column!(
            "corrected_tags",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'[]'")
        ),
        sqlite_column!("timestamp", &SqlType::Integer, non_null = true),
    ],
    indices: &[
        ("idx_clip_feedback_fingerprint", "content_fingerprint"),
        ("idx_clip_feedback_timestamp", "timestamp DESC"),
    ],
};

fn migrate_v2_to_v3(conn: &Connection) -> Result<()> {
    CLIP_FEEDBACK_TABLE_V3.create(conn)?;
    Ok(())
}

pub const FEEDBACK_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 1,
        tables: &[FEEDBACK_EVENTS_TABLE_V1, LABEL_USAGE_TABLE_V1],
        migration: None,
    },
    VersionedSchema {
        version: 2,
        tables: &[
            FEEDBACK_EVENTS_TABLE_V1,
            LABEL_USAGE_TABLE_V1,
            CONTENT_METADATA_TABLE_V2,
            TAGGER_STATE_TABLE_V2,
        ],
        migration: Some(migrate_v1_to_v2),
    },
    VersionedSchema {
        version: 3,
        tables: &[
            FEEDBACK_EVENTS_TABLE_V1,
            LABEL_USAGE_TABLE_V1,
            CONTENT_METADATA_TABLE_V2,
            TAGGER_STATE_TABLE_V2,
            CLIP_FEEDBACK_TABLE_V3,
        ],
        migration: Some(migrate_v2_to_v3),
    },
];
