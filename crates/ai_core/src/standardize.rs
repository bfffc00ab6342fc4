//! Column harmonization onto the canonical feature vocabulary
//!
//! Each survey catalog names the same physical quantity differently. For every
//! canonical name we scan a fixed priority list of synonyms and take the first one
//! present. The canonical name itself always leads its list, which makes the
//! operation idempotent on an already-standardized table.

use crate::errors::{CoreError, Result};
use crate::feature_engineering::DERIVED_FEATURES;
use crate::table::{Column, Table};
use tracing::debug;

pub const DISPOSITION: &str = "disposition";
pub const SOURCE: &str = "source";

/// Columns that ratio features divide by.
pub const RATIO_DENOMINATORS: [&str; 4] = ["period", "duration", "star_radius", "semi_major_axis"];

/// Identifier columns: kept through cleaning for traceability, never fed to a model.
pub const IDENTIFIERS: [&str; 4] = ["kepid", "koi_name", "tic_id", "toi"];

/// Canonical name followed by the source-specific synonyms, highest priority first.
pub const CANONICAL_SYNONYMS: &[(&str, &[&str])] = &[
    ("kepid", &["kepid"]),
    ("koi_name", &["koi_name", "kepoi_name"]),
    ("tic_id", &["tic_id", "tid"]),
    ("toi", &["toi"]),
    ("period", &["period", "koi_period", "pl_orbper"]),
    ("duration", &["duration", "koi_duration", "pl_trandurh", "pl_trandur"]),
    ("depth", &["depth", "koi_depth", "pl_trandep"]),
    ("planet_radius", &["planet_radius", "koi_prad", "pl_rade"]),
    ("star_radius", &["star_radius", "koi_srad", "st_rad"]),
    ("snr", &["snr", "koi_model_snr"]),
    ("teff", &["teff", "koi_steff", "st_teff"]),
    ("logg", &["logg", "koi_slogg", "st_logg"]),
    ("semi_major_axis", &["semi_major_axis", "koi_sma", "pl_orbsmax"]),
    (
        DISPOSITION,
        &[DISPOSITION, "koi_disposition", "tfopwg_disp", "archive_disposition"],
    ),
    (SOURCE, &[SOURCE]),
];

/// Every column name a standardized table may contain, in canonical order.
pub fn canonical_vocabulary() -> Vec<&'static str> {
    CANONICAL_SYNONYMS
        .iter()
        .map(|(name, _)| *name)
        .chain(DERIVED_FEATURES.iter().copied())
        .collect()
}

/// Rename recognised columns to their canonical names and drop everything else.
///
/// Derived feature columns map to themselves, so re-running this on a cleaned
/// table neither renames nor loses anything.
pub fn standardize_columns(table: &Table) -> Result<Table> {
    let mut columns: Vec<Column> = Vec::new();

    for (canonical, synonyms) in CANONICAL_SYNONYMS {
        if let Some(found) = synonyms.iter().find_map(|s| table.column(s)) {
            if found.name != *canonical {
                debug!("Mapping column {} -> {}", found.name, canonical);
            }
            columns.push(Column {
                name: (*canonical).to_string(),
                data: found.data.clone(),
            });
        }
    }
    for derived in DERIVED_FEATURES {
        if let Some(found) = table.column(derived) {
            columns.push(found.clone());
        }
    }

    let dropped = table.n_columns() - columns.len();
    if dropped > 0 {
        debug!("Dropped {} unrecognised columns", dropped);
    }

    if columns.is_empty() && table.n_rows() > 0 {
        return Err(CoreError::Schema(
            "no recognised columns in source table".to_string(),
        ));
    }
    if columns.is_empty() {
        return Ok(Table::new());
    }
    Table::from_columns(columns)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kepler_like() -> Table {
        Table::from_columns(vec![
            Column::numeric("kepid", vec![Some(1.0), Some(2.0)]),
            Column::numeric("koi_period", vec![Some(3.0), Some(4.0)]),
            Column::numeric("pl_orbper", vec![Some(30.0), Some(40.0)]),
            Column::numeric("koi_prad", vec![Some(1.1), None]),
            Column::text(
                "koi_disposition",
                vec![Some("CONFIRMED".into()), Some("CANDIDATE".into())],
            ),
            Column::text("koi_comment", vec![None, Some("noise".into())]),
        ])
        .unwrap()
    }

    #[test]
    fn maps_first_synonym_and_drops_unknown() {
        let out = standardize_columns(&kepler_like()).unwrap();
        assert_eq!(
            out.column_names(),
            vec!["kepid", "period", "planet_radius", "disposition"]
        );
        // koi_period outranks pl_orbper
        assert_eq!(out.numeric("period").unwrap(), &[Some(3.0), Some(4.0)]);
    }

    #[test]
    fn standardization_is_idempotent() {
        let once = standardize_columns(&kepler_like()).unwrap();
        let twice = standardize_columns(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn derived_columns_survive_restandardization() {
        let mut table = standardize_columns(&kepler_like()).unwrap();
        table
            .set_column(Column::numeric("radius_ratio", vec![Some(0.1), Some(0.2)]))
            .unwrap();
        let again = standardize_columns(&table).unwrap();
        assert!(again.has_column("radius_ratio"));
        assert_eq!(again.n_columns(), table.n_columns());
    }

    #[test]
    fn vocabulary_has_no_duplicates() {
        let vocab = canonical_vocabulary();
        let unique: std::collections::HashSet<_> = vocab.iter().collect();
        assert_eq!(unique.len(), vocab.len());
    }
}
