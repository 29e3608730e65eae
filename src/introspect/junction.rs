//! Junction-table detection.

use std::collections::BTreeSet;

use crate::model::TableDescriptor;

/// A junction realises a many-to-many link: exactly two foreign keys, none
/// pointing back at the table itself, together covering the whole primary
/// key, and no column outside that key.
pub fn is_junction(table: &TableDescriptor) -> bool {
    if table.foreign_keys.len() != 2 || table.primary_key.is_empty() {
        return false;
    }
    if table.foreign_keys.iter().any(|fk| fk.target == table.name) {
        return false;
    }
    let fk_columns: BTreeSet<&str> = table.fk_columns();
    let pk: BTreeSet<&str> = table.primary_key.iter().map(String::as_str).collect();
    if fk_columns != pk {
        return false;
    }
    table.columns.iter().all(|c| pk.contains(c.name.as_str()))
}
