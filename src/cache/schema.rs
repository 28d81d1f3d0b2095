//! SQLite schema for the durable cache tier.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP};

// =============================================================================
// Version 1 - Cached tool results
// =============================================================================

/// One row per fingerprint. `value` is JSON text, `expires_at` unix seconds.
const CACHE_ENTRIES_TABLE_V1: Table = Table {
    name: "cache_entries",
    columns: &[
        sqlite_column!("key", &SqlType::Text, is_primary_key = true),
        sqlite_column!("value", &SqlType::Text, non_null = true),
        sqlite_column!("expires_at", &SqlType::Integer, non_null = true),
        sqlite_column!(
            "created_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[("idx_cache_entries_expires_at", "expires_at")],
};

pub const CACHE_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[CACHE_ENTRIES_TABLE_V1],
    migration: None,
}];
