//! Column statistics over a bounded row sample.

use std::collections::BTreeSet;

use crate::model::ColumnStats;
use crate::source::Row;

/// A column is categorical when the table is big enough to tell, the
/// distinct values are few against the table's rows, and the sample already
/// repeats them.
const MIN_TABLE_ROWS: u64 = 50;
const MAX_DISTINCT_VALUES: usize = 30;
const MAX_DISTINCT_RATIO: f64 = 0.25;
const MAX_SAMPLE_DISTINCT_RATIO: f64 = 0.6;

const MAX_SAMPLE_VALUES: usize = 5;
const MAX_VALUE_CHARS: usize = 80;

fn clip(value: &str) -> String {
    if value.chars().count() <= MAX_VALUE_CHARS {
        return value.to_string();
    }
    let mut out: String = value.chars().take(MAX_VALUE_CHARS).collect();
    out.push('…');
    out
}

/// Statistics of column `index` across `rows`.
pub fn column_stats(rows: &[Row], index: usize, row_count: u64) -> ColumnStats {
    let sampled = rows.len() as u64;
    let values: Vec<&str> = rows
        .iter()
        .filter_map(|r| r.get(index).and_then(|v| v.as_deref()))
        .collect();
    let nulls = sampled - values.len() as u64;
    let distinct: BTreeSet<&str> = values.iter().copied().collect();

    let mut sample_values: Vec<String> = Vec::new();
    for v in &values {
        if sample_values.len() == MAX_SAMPLE_VALUES {
            break;
        }
        let v = clip(v);
        if !sample_values.contains(&v) {
            sample_values.push(v);
        }
    }

    let categorical = row_count >= MIN_TABLE_ROWS
        && !values.is_empty()
        && distinct.len() < MAX_DISTINCT_VALUES
        && (distinct.len() as f64 / row_count as f64) < MAX_DISTINCT_RATIO
        && (distinct.len() as f64 / values.len() as f64) <= MAX_SAMPLE_DISTINCT_RATIO;

    ColumnStats {
        row_count,
        sampled_rows: sampled,
        null_ratio: if sampled == 0 { 0.0 } else { nulls as f64 / sampled as f64 },
        distinct_estimate: distinct.len() as u64,
        sample_values,
        categorical_values: categorical.then(|| distinct.iter().map(|v| clip(v)).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(values: &[Option<&str>]) -> Vec<Row> {
        values.iter().map(|v| vec![v.map(str::to_string)]).collect()
    }

    #[test]
    fn test_basic_stats() {
        let s = column_stats(&rows(&[Some("a"), None, Some("b"), Some("a")]), 0, 1000);
        assert_eq!(s.sampled_rows, 4);
        assert_eq!(s.null_ratio, 0.25);
        assert_eq!(s.distinct_estimate, 2);
        assert_eq!(s.sample_values, vec!["a", "b"]);
        assert_eq!(s.categorical_values, None);
    }

    #[test]
    fn test_categorical_detection() {
        let states = ["draft", "posted", "cancel"];
        let values: Vec<Option<&str>> = (0..40).map(|i| Some(states[i % 3])).collect();
        let s = column_stats(&rows(&values), 0, 5000);
        assert_eq!(
            s.categorical_values,
            Some(vec!["cancel".to_string(), "draft".to_string(), "posted".to_string()])
        );
    }

    #[test]
    fn test_unique_column_is_not_categorical() {
        let owned: Vec<String> = (0..40).map(|i| i.to_string()).collect();
        let values: Vec<Option<&str>> = owned.iter().map(|s| Some(s.as_str())).collect();
        assert_eq!(column_stats(&rows(&values), 0, 40).categorical_values, None);
    }

    #[test]
    fn test_small_sample_of_a_large_table_is_categorical() {
        let s = column_stats(&rows(&[Some("posted"), Some("draft"), Some("posted"), Some("cancel"), Some("posted")]), 0, 1000);
        assert_eq!(
            s.categorical_values,
            Some(vec!["cancel".to_string(), "draft".to_string(), "posted".to_string()])
        );
    }

    #[test]
    fn test_small_table_is_never_categorical() {
        let values: Vec<Option<&str>> = (0..40).map(|i| Some(if i % 2 == 0 { "a" } else { "b" })).collect();
        assert_eq!(column_stats(&rows(&values), 0, 49).categorical_values, None);
    }

    #[test]
    fn test_empty_sample() {
        let s = column_stats(&[], 0, 0);
        assert_eq!(s.null_ratio, 0.0);
        assert!(s.sample_values.is_empty());
    }
}
