//! Entries-Table Schema Data
//!
//! Column names, slot counts and rendering helpers shared by every dialect.
//! Backends render their SQL from this data once, at pool build time; the
//! engine never sees a dialect difference.

/// Name of the entries table in every backend.
pub const TABLE: &str = "cache_entry";

/// Parent-key slots carried by the schema (K).
pub const PARENT_SLOTS: usize = 5;

/// Fixed (non-parent) columns in storage order.
pub const FIXED_COLUMNS: [&str; 8] = [
    "hash",
    "partition",
    "key",
    "utc_creation",
    "utc_expiry",
    "interval",
    "compressed",
    "value",
];

/// Total column count of a complete schema; the bootstrap probe compares
/// against this to detect half-created tables.
pub const COLUMN_COUNT: usize = FIXED_COLUMNS.len() + 2 * PARENT_SLOTS;

/// Column holding the hash of the N-th parent.
#[must_use]
pub fn parent_hash_column(slot: usize) -> String {
    format!("parent_hash{slot}")
}

/// Column holding the key of the N-th parent.
#[must_use]
pub fn parent_key_column(slot: usize) -> String {
    format!("parent_key{slot}")
}

/// All column names in storage order: fixed columns, then alternating
/// `parent_hashN, parent_keyN` pairs.
#[must_use]
pub fn all_columns() -> Vec<String> {
    let mut columns: Vec<String> = FIXED_COLUMNS.iter().map(ToString::to_string).collect();
    for slot in 0..PARENT_SLOTS {
        columns.push(parent_hash_column(slot));
        columns.push(parent_key_column(slot));
    }
    columns
}

/// Comma-joined column list for SELECT/INSERT statements.
#[must_use]
pub fn column_list() -> String {
    all_columns().join(", ")
}

/// `SET col = excluded.col` assignments for the upsert's conflict arm.
///
/// Both SQLite and PostgreSQL spell the inserted-row alias `excluded`. The
/// conflict target is `(partition, key)` — the logical identity of an
/// entry — so only the mutable columns appear here. `hash` is derived from
/// `(partition, key)` and cannot change on a same-pair upsert; a genuine
/// 64-bit collision between distinct pairs therefore fails the `hash`
/// primary key instead of rewriting an unrelated entry's row.
#[must_use]
pub fn upsert_assignments() -> String {
    all_columns()
        .iter()
        .filter(|column| !matches!(column.as_str(), "hash" | "partition" | "key"))
        .map(|column| format!("{column} = excluded.{column}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_count_matches_rendered_list() {
        assert_eq!(all_columns().len(), COLUMN_COUNT);
        assert_eq!(column_list().split(", ").count(), COLUMN_COUNT);
    }

    #[test]
    fn parent_columns_cover_every_slot() {
        let list = column_list();
        for slot in 0..PARENT_SLOTS {
            assert!(list.contains(&parent_hash_column(slot)));
            assert!(list.contains(&parent_key_column(slot)));
        }
    }

    #[test]
    fn upsert_assigns_only_mutable_columns() {
        let assignments = upsert_assignments();
        assert!(!assignments.contains("hash = excluded.hash"));
        assert!(!assignments.contains("partition = excluded.partition"));
        assert!(!assignments.contains("key = excluded.key"));
        assert!(assignments.contains("value = excluded.value"));
        assert!(assignments.contains("utc_expiry = excluded.utc_expiry"));
        assert!(assignments.contains("parent_hash0 = excluded.parent_hash0"));
    }
}
