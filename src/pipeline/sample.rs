//! Entity sample selection.

use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::warn;

use crate::config::SamplingConfig;
use crate::model::{QualifiedName, TableDescriptor};
use crate::{Error, Result};

/// The run seed: the configured one, else the one an earlier run recorded,
/// else a fresh random one that the summary reports so the run can be
/// replayed.
pub fn resolve_seed(configured: Option<u64>, recorded: Option<u64>) -> u64 {
    configured.or(recorded).unwrap_or_else(|| rand::thread_rng().r#gen())
}

/// Entities to process, ordered by name.
///
/// An explicit entity list wins; names not in the extraction are skipped
/// with a warning. Otherwise `sample_size` entities are drawn uniformly with
/// the seeded generator, or every table when no size is set.
pub fn select_sample(
    tables: &[TableDescriptor],
    sampling: &SamplingConfig,
    default_schema: &str,
    seed: u64,
) -> Result<Vec<QualifiedName>> {
    let mut selected: Vec<QualifiedName> = if let Some(names) = &sampling.entities {
        let mut picked = Vec::new();
        for raw in names {
            let name = QualifiedName::parse(raw, default_schema);
            if tables.iter().any(|t| t.name == name) {
                picked.push(name);
            } else {
                warn!(entity = %name, "requested entity not in the extraction, skipped");
            }
        }
        if picked.is_empty() && !names.is_empty() {
            return Err(Error::Config("none of the requested entities exist in the source schema".into()));
        }
        picked
    } else {
        match sampling.sample_size {
            Some(n) if n < tables.len() => {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                sample(&mut rng, tables.len(), n).into_iter().map(|i| tables[i].name.clone()).collect()
            }
            _ => tables.iter().map(|t| t.name.clone()).collect(),
        }
    };
    selected.sort();
    selected.dedup();
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspect::build_extraction;
    use crate::source::RawTable;

    fn tables(n: usize) -> Vec<TableDescriptor> {
        build_extraction(
            (0..n)
                .map(|i| RawTable::new("public", &format!("t{i:02}")).column("id", "integer", false).primary_key(["id"]))
                .collect(),
        )
        .tables
    }

    fn sized(n: usize) -> SamplingConfig {
        SamplingConfig { sample_size: Some(n), ..SamplingConfig::default() }
    }

    #[test]
    fn test_seeded_sample_is_deterministic() {
        let t = tables(20);
        let a = select_sample(&t, &sized(5), "public", 42).unwrap();
        let b = select_sample(&t, &sized(5), "public", 42).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 5);
        let c = select_sample(&t, &sized(5), "public", 43).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_oversized_sample_takes_everything() {
        let t = tables(3);
        assert_eq!(select_sample(&t, &sized(10), "public", 1).unwrap().len(), 3);
        assert_eq!(select_sample(&t, &SamplingConfig::default(), "public", 1).unwrap().len(), 3);
    }

    #[test]
    fn test_explicit_entities() {
        let t = tables(3);
        let cfg = SamplingConfig {
            entities: Some(vec!["t02".into(), "public.t00".into(), "nope".into()]),
            sample_size: Some(1),
            ..SamplingConfig::default()
        };
        let picked = select_sample(&t, &cfg, "public", 1).unwrap();
        assert_eq!(picked, vec![QualifiedName::new("public", "t00"), QualifiedName::new("public", "t02")]);

        let missing = SamplingConfig { entities: Some(vec!["nope".into()]), ..SamplingConfig::default() };
        assert!(select_sample(&t, &missing, "public", 1).is_err());
    }

    #[test]
    fn test_configured_seed_beats_recorded_one() {
        assert_eq!(resolve_seed(Some(3), Some(9)), 3);
        assert_eq!(resolve_seed(None, Some(9)), 9);
    }
}
