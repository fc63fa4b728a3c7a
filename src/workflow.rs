//! Duplicate filtering for one uploaded batch.
//!
//! Rows are compared against a snapshot of the keys stored *before* the batch
//! is recorded. Repeats inside the batch are not checked against each other:
//! three spellings of one new number all come back unique, while only the
//! first of them is persisted.

use std::collections::HashSet;

use crate::logging::{masked_key, source_label};
use crate::normalize::{dedup_key, is_valid_key};
use crate::storage::{PhoneStore, StoreError};

#[derive(Debug, Clone, Default)]
pub struct FilterOptions {
    /// Provenance tag written with every persisted number.
    pub source_label: String,
    /// Record the batch after partitioning.
    pub persist: bool,
}

/// Rows split by whether their key was already known.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition<R> {
    /// Unseen rows, in input order.
    pub unique: Vec<R>,
    /// Input indices of rows whose key was already known.
    pub duplicate_rows: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterOutcome<R> {
    pub total: usize,
    pub unique: Vec<R>,
    pub duplicate_count: usize,
    /// Rows written by the persist step; zero when persistence was off.
    pub inserted: usize,
}

/// Split rows against a known key set.
///
/// Rows whose key is shorter than nine digits can never match, so they
/// always land in `unique`.
pub fn partition<R, F>(rows: Vec<R>, phone_of: F, known_keys: &HashSet<String>) -> Partition<R>
where
    F: Fn(&R) -> String,
{
    let mut unique = Vec::with_capacity(rows.len());
    let mut duplicate_rows = Vec::new();
    for (index, row) in rows.into_iter().enumerate() {
        let key = dedup_key(&phone_of(&row));
        if is_valid_key(&key) && known_keys.contains(&key) {
            tracing::trace!(
                target: "dupcheck.workflow",
                index,
                key = %masked_key(&key),
                "duplicate row"
            );
            duplicate_rows.push(index);
        } else {
            unique.push(row);
        }
    }
    Partition {
        unique,
        duplicate_rows,
    }
}

/// Filter a batch against the store and optionally record it.
///
/// `phone_of` extracts the raw phone text of a row. The persist step offers
/// every input value, duplicates included; the store drops the ones it
/// already has.
pub fn filter_batch<R, F>(
    store: &PhoneStore,
    rows: Vec<R>,
    phone_of: F,
    options: &FilterOptions,
) -> Result<FilterOutcome<R>, StoreError>
where
    F: Fn(&R) -> String,
{
    let total = rows.len();
    let raw_values: Vec<String> = if options.persist {
        rows.iter().map(&phone_of).collect()
    } else {
        Vec::new()
    };

    let known = store.load_valid_keys()?;
    let Partition {
        unique,
        duplicate_rows,
    } = partition(rows, &phone_of, &known);

    let inserted = if options.persist {
        store.insert_if_absent(&raw_values, &options.source_label)?
    } else {
        0
    };

    tracing::info!(
        target: "dupcheck.workflow",
        source = %source_label(&options.source_label),
        total,
        unique = unique.len(),
        duplicates = duplicate_rows.len(),
        inserted,
        "batch filtered"
    );

    Ok(FilterOutcome {
        total,
        unique,
        duplicate_count: duplicate_rows.len(),
        inserted,
    })
}
