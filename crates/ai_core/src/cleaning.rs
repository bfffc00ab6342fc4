//! Label filtering, sanitization, imputation and feature-matrix assembly
//!
//! `clean` runs the full chain on a raw or standardized table:
//!
//! 1. harmonize column names
//! 2. drop rows with a missing or unrecognised disposition
//! 3. sanitize numeric cells (infinities, zero or negative ratio denominators)
//! 4. drop columns whose missing ratio exceeds the configured maximum
//! 5. impute numeric columns (KNN or median) and categorical columns (mode)
//! 6. sanitize, derive engineered features, sanitize again
//! 7. re-impute whatever the derivation left missing
//!
//! Every function here is pure; the caller decides what to log or persist.

use crate::errors::{CoreError, Result};
use crate::feature_engineering::{add_derived_features, DERIVED_FEATURES, EPSILON};
use crate::standardize::{
    canonical_vocabulary, standardize_columns, DISPOSITION, IDENTIFIERS, RATIO_DENOMINATORS,
    SOURCE,
};
use crate::table::{Column, ColumnData, Table};
use crate::types::{Disposition, N_CLASSES};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

/// How missing numeric cells are filled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum ImputationStrategy {
    /// Distance-weighted mean of the nearest rows that have the value
    Knn { neighbors: usize },
    /// Column median
    Median,
}

impl Default for ImputationStrategy {
    fn default() -> Self {
        ImputationStrategy::Knn { neighbors: 5 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleaningConfig {
    pub imputation: ImputationStrategy,
    /// Columns with a strictly larger missing ratio are dropped
    pub max_missing_ratio: f64,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            imputation: ImputationStrategy::default(),
            max_missing_ratio: 0.8,
        }
    }
}

impl CleaningConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.max_missing_ratio) {
            return Err(CoreError::Schema(format!(
                "max_missing_ratio must be within [0, 1], got {}",
                self.max_missing_ratio
            )));
        }
        if let ImputationStrategy::Knn { neighbors: 0 } = self.imputation {
            return Err(CoreError::Schema(
                "KNN imputation needs at least one neighbor".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroppedColumn {
    pub name: String,
    pub missing_ratio: f64,
}

/// What cleaning did to the data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanReport {
    pub rows_in: usize,
    pub rows_out: usize,
    pub missing_label_rows: usize,
    pub invalid_label_rows: usize,
    pub dropped_columns: Vec<DroppedColumn>,
    pub sanitized_cells: usize,
    pub imputed_numeric_cells: usize,
    pub imputed_categorical_cells: usize,
    pub class_counts: [usize; N_CLASSES],
}

impl CleanReport {
    /// Rows discarded by label filtering
    pub fn dropped_rows(&self) -> usize {
        self.missing_label_rows + self.invalid_label_rows
    }
}

/// Cleaned data ready for splitting
#[derive(Debug, Clone)]
pub struct CleanedDataset {
    /// Cleaned table, identifiers and source included
    pub table: Table,
    /// Row-major model input, columns ordered as `feature_names`
    pub features: Vec<Vec<f64>>,
    pub feature_names: Vec<String>,
    pub labels: Vec<Disposition>,
    pub report: CleanReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LabelCounts {
    pub missing: usize,
    pub invalid: usize,
}

/// Keep only rows with a valid disposition, trimming the stored labels.
pub fn filter_labels(table: &Table) -> Result<(Table, LabelCounts)> {
    let labels = match table.column(DISPOSITION).map(|c| &c.data) {
        Some(ColumnData::Text(values)) => values.clone(),
        Some(ColumnData::Numeric(values)) => values
            .iter()
            .map(|v| v.map(|x| x.to_string()))
            .collect(),
        None => {
            return Err(CoreError::Schema(format!(
                "table has no {DISPOSITION} column"
            )))
        }
    };

    let mut counts = LabelCounts::default();
    let mut keep = Vec::with_capacity(labels.len());
    let mut trimmed = Vec::with_capacity(labels.len());
    for label in &labels {
        match label.as_deref().map(str::trim) {
            None | Some("") => {
                counts.missing += 1;
                keep.push(false);
            }
            Some(value) if Disposition::from_label(value).is_some() => {
                keep.push(true);
                trimmed.push(Some(value.to_string()));
            }
            Some(_) => {
                counts.invalid += 1;
                keep.push(false);
            }
        }
    }

    let mut filtered = table.filter_rows(&keep)?;
    filtered.set_column(Column::text(DISPOSITION, trimmed))?;
    Ok((filtered, counts))
}

/// Replace infinities with missing; in ratio denominators also turn zero into
/// `EPSILON` and negatives into missing. Returns the number of cells changed.
pub fn sanitize(table: &mut Table) -> usize {
    let mut changed = 0;
    let names: Vec<String> = table.column_names().iter().map(|s| s.to_string()).collect();
    for name in names {
        let is_denominator = RATIO_DENOMINATORS.contains(&name.as_str());
        if let Some(Column {
            data: ColumnData::Numeric(values),
            ..
        }) = table.column_mut(&name)
        {
            for cell in values.iter_mut() {
                let Some(x) = *cell else { continue };
                let repaired = if !x.is_finite() {
                    None
                } else if is_denominator && x == 0.0 {
                    Some(EPSILON)
                } else if is_denominator && x < 0.0 {
                    None
                } else {
                    continue;
                };
                *cell = repaired;
                changed += 1;
            }
        }
    }
    changed
}

/// Drop every column whose missing ratio is strictly above `max_ratio`.
/// The disposition column is never dropped.
pub fn drop_sparse_columns(table: &mut Table, max_ratio: f64) -> Vec<DroppedColumn> {
    let sparse: Vec<DroppedColumn> = table
        .columns()
        .iter()
        .filter(|c| c.name != DISPOSITION && c.missing_ratio() > max_ratio)
        .map(|c| DroppedColumn {
            name: c.name.clone(),
            missing_ratio: c.missing_ratio(),
        })
        .collect();
    for column in &sparse {
        table.remove_column(&column.name);
    }
    sparse
}

/// Numeric columns a model consumes, in canonical order.
pub fn feature_columns(table: &Table) -> Vec<String> {
    canonical_vocabulary()
        .into_iter()
        .filter(|name| *name != DISPOSITION && *name != SOURCE && !IDENTIFIERS.contains(name))
        .filter(|name| table.numeric(name).is_some())
        .map(str::to_string)
        .collect()
}

/// Row-major matrix over `names`. Every cell must be present and finite.
pub fn feature_matrix(table: &Table, names: &[String]) -> Result<Vec<Vec<f64>>> {
    let columns = names
        .iter()
        .map(|name| {
            table
                .numeric(name)
                .ok_or_else(|| CoreError::Schema(format!("numeric column {name} not found")))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut rows = vec![Vec::with_capacity(names.len()); table.n_rows()];
    for (col_idx, values) in columns.iter().enumerate() {
        for (row_idx, cell) in values.iter().enumerate() {
            match cell {
                Some(x) if x.is_finite() => rows[row_idx].push(*x),
                _ => {
                    return Err(CoreError::NonFiniteInput {
                        row: row_idx,
                        column: col_idx,
                    })
                }
            }
        }
    }
    Ok(rows)
}

/// Fill missing cells of the named numeric columns. Returns the number filled.
pub fn impute_numeric(
    table: &mut Table,
    names: &[String],
    strategy: ImputationStrategy,
) -> Result<usize> {
    let mut columns: Vec<Vec<Option<f64>>> = names
        .iter()
        .map(|name| {
            table
                .numeric(name)
                .map(<[Option<f64>]>::to_vec)
                .ok_or_else(|| CoreError::Schema(format!("numeric column {name} not found")))
        })
        .collect::<Result<_>>()?;

    let filled = match strategy {
        ImputationStrategy::Median => median_impute(&mut columns, names),
        ImputationStrategy::Knn { neighbors } => knn_impute(&mut columns, neighbors),
    };

    for (name, values) in names.iter().zip(columns) {
        table.set_column(Column::numeric(name.clone(), values))?;
    }
    Ok(filled)
}

/// Fill missing cells of every text column except the label with the column mode.
/// Ties go to the lexicographically smallest value.
pub fn impute_categorical(table: &mut Table) -> Result<usize> {
    let mut filled = 0;
    let text_columns: Vec<Column> = table
        .columns()
        .iter()
        .filter(|c| c.name != DISPOSITION && !c.is_numeric())
        .cloned()
        .collect();

    for column in text_columns {
        let ColumnData::Text(mut values) = column.data else {
            continue;
        };
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for value in values.iter().flatten() {
            *counts.entry(value.as_str()).or_default() += 1;
        }
        let mut mode: Option<(&str, usize)> = None;
        for (value, count) in counts {
            if mode.map_or(true, |(_, best)| count > best) {
                mode = Some((value, count));
            }
        }
        let Some(mode) = mode.map(|(value, _)| value.to_string()) else {
            continue;
        };
        for cell in values.iter_mut().filter(|c| c.is_none()) {
            *cell = Some(mode.clone());
            filled += 1;
        }
        table.set_column(Column::text(column.name, values))?;
    }
    Ok(filled)
}

fn present_values(values: &[Option<f64>]) -> Vec<f64> {
    values.iter().flatten().copied().collect()
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

fn mean(values: &[Option<f64>]) -> Option<f64> {
    let present = present_values(values);
    if present.is_empty() {
        return None;
    }
    Some(present.iter().sum::<f64>() / present.len() as f64)
}

fn median_impute(columns: &mut [Vec<Option<f64>>], names: &[String]) -> usize {
    let mut filled = 0;
    for (values, name) in columns.iter_mut().zip(names) {
        let fill = median(present_values(values)).unwrap_or_else(|| {
            warn!("Column {} has no observed values, imputing 0.0", name);
            0.0
        });
        for cell in values.iter_mut().filter(|c| c.is_none()) {
            *cell = Some(fill);
            filled += 1;
        }
    }
    filled
}

/// Euclidean distance over coordinates present in both rows, scaled up by
/// total/present coordinates. `None` when the rows share no coordinate.
fn nan_euclidean(a: &[Option<f64>], b: &[Option<f64>]) -> Option<f64> {
    let mut sum = 0.0;
    let mut present = 0usize;
    for (x, y) in a.iter().zip(b) {
        if let (Some(x), Some(y)) = (x, y) {
            sum += (x - y) * (x - y);
            present += 1;
        }
    }
    if present == 0 {
        return None;
    }
    Some((sum * a.len() as f64 / present as f64).sqrt())
}

fn knn_impute(columns: &mut [Vec<Option<f64>>], k: usize) -> usize {
    let n_rows = columns.first().map(Vec::len).unwrap_or(0);
    let rows: Vec<Vec<Option<f64>>> = (0..n_rows)
        .map(|r| columns.iter().map(|c| c[r]).collect())
        .collect();
    let means: Vec<f64> = columns
        .iter()
        .map(|c| mean(c).unwrap_or(0.0))
        .collect();

    // Imputed values are computed from the observed data only, then applied together.
    let fills: Vec<(usize, usize, f64)> = (0..n_rows)
        .into_par_iter()
        .filter(|&r| rows[r].iter().any(Option::is_none))
        .flat_map_iter(|r| {
            let distances: Vec<Option<f64>> = rows
                .iter()
                .enumerate()
                .map(|(other, row)| {
                    if other == r {
                        None
                    } else {
                        nan_euclidean(&rows[r], row)
                    }
                })
                .collect();

            let mut row_fills = Vec::new();
            for (c, cell) in rows[r].iter().enumerate() {
                if cell.is_some() {
                    continue;
                }
                let mut donors: Vec<(f64, usize, f64)> = distances
                    .iter()
                    .enumerate()
                    .filter_map(|(other, d)| Some(((*d)?, other, rows[other][c]?)))
                    .collect();
                donors.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
                donors.truncate(k);

                let value = if donors.is_empty() {
                    means[c]
                } else if donors.iter().any(|(d, _, _)| *d == 0.0) {
                    let exact: Vec<f64> = donors
                        .iter()
                        .filter(|(d, _, _)| *d == 0.0)
                        .map(|(_, _, v)| *v)
                        .collect();
                    exact.iter().sum::<f64>() / exact.len() as f64
                } else {
                    let (weighted, weights) = donors
                        .iter()
                        .fold((0.0, 0.0), |(sv, sw), (d, _, v)| (sv + v / d, sw + 1.0 / d));
                    weighted / weights
                };
                row_fills.push((r, c, value));
            }
            row_fills
        })
        .collect();

    for (r, c, value) in &fills {
        columns[*c][*r] = Some(*value);
    }
    fills.len()
}

/// Run the full cleaning chain and assemble the model matrix.
#[instrument(skip_all, fields(rows = raw.n_rows(), columns = raw.n_columns()))]
pub fn clean(raw: &Table, config: &CleaningConfig) -> Result<CleanedDataset> {
    config.validate()?;
    let mut report = CleanReport {
        rows_in: raw.n_rows(),
        ..CleanReport::default()
    };

    let standardized = standardize_columns(raw)?;
    let (mut table, counts) = filter_labels(&standardized)?;
    report.missing_label_rows = counts.missing;
    report.invalid_label_rows = counts.invalid;
    if counts.missing + counts.invalid > 0 {
        info!(
            "Dropped {} rows without a valid disposition ({} missing, {} invalid)",
            counts.missing + counts.invalid,
            counts.missing,
            counts.invalid
        );
    }
    if table.n_rows() == 0 {
        return Err(CoreError::EmptyDataset(
            "no rows with a valid disposition".to_string(),
        ));
    }

    report.sanitized_cells += sanitize(&mut table);

    report.dropped_columns = drop_sparse_columns(&mut table, config.max_missing_ratio);
    for dropped in &report.dropped_columns {
        info!(
            "Dropping column {} with {:.1}% missing values",
            dropped.name,
            dropped.missing_ratio * 100.0
        );
    }

    let numeric = feature_columns(&table);
    report.imputed_numeric_cells += impute_numeric(&mut table, &numeric, config.imputation)?;
    report.imputed_categorical_cells += impute_categorical(&mut table)?;
    report.sanitized_cells += sanitize(&mut table);

    table = add_derived_features(&table)?;
    report.sanitized_cells += sanitize(&mut table);

    let feature_names = feature_columns(&table);
    report.imputed_numeric_cells +=
        impute_numeric(&mut table, &feature_names, config.imputation)?;
    debug!(
        "Feature matrix has {} columns ({} derived)",
        feature_names.len(),
        DERIVED_FEATURES.len()
    );

    let features = feature_matrix(&table, &feature_names)?;
    let labels = table
        .text(DISPOSITION)
        .ok_or_else(|| CoreError::Schema(format!("{DISPOSITION} column lost during cleaning")))?
        .iter()
        .map(|label| {
            label
                .as_deref()
                .and_then(Disposition::from_label)
                .ok_or_else(|| CoreError::InvalidLabel(label.clone().unwrap_or_default()))
        })
        .collect::<Result<Vec<_>>>()?;

    for label in &labels {
        report.class_counts[label.index()] += 1;
    }
    report.rows_out = table.n_rows();
    info!(
        "Cleaned {} -> {} rows, {} features, {} numeric cells imputed, {} sanitized",
        report.rows_in,
        report.rows_out,
        feature_names.len(),
        report.imputed_numeric_cells,
        report.sanitized_cells
    );

    Ok(CleanedDataset {
        table,
        features,
        feature_names,
        labels,
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn some(values: &[f64]) -> Vec<Option<f64>> {
        values.iter().copied().map(Some).collect()
    }

    fn raw_table() -> Table {
        Table::from_columns(vec![
            Column::text(
                "koi_disposition",
                vec![
                    Some("CONFIRMED".into()),
                    Some(" CANDIDATE ".into()),
                    Some("FALSE POSITIVE".into()),
                    Some("NOT DISPOSITIONED".into()),
                    None,
                    Some("CONFIRMED".into()),
                ],
            ),
            Column::numeric(
                "koi_period",
                vec![Some(1.0), Some(0.0), Some(3.0), Some(4.0), Some(5.0), Some(-2.0)],
            ),
            Column::numeric("koi_duration", some(&[2.0, 3.0, 2.5, 1.0, 1.0, 4.0])),
            Column::numeric(
                "koi_depth",
                vec![Some(100.0), None, Some(300.0), Some(1.0), Some(1.0), Some(f64::INFINITY)],
            ),
            Column::numeric("koi_prad", some(&[1.0, 2.0, 3.0, 1.0, 1.0, 2.5])),
            Column::numeric("koi_srad", some(&[1.0, 0.9, 1.1, 1.0, 1.0, 0.0])),
            Column::numeric("koi_sma", some(&[0.05, 0.1, 0.2, 0.1, 0.1, 0.3])),
            Column::numeric("koi_steff", some(&[5000.0, 5500.0, 6000.0, 1.0, 1.0, 5800.0])),
            Column::numeric("koi_slogg", vec![None, None, None, Some(4.4), None, None]),
            Column::text(
                "source",
                vec![Some("KEPLER".into()), None, Some("KEPLER".into()), None, None, None],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn filter_labels_counts_missing_and_invalid() {
        let table = standardize_columns(&raw_table()).unwrap();
        let (filtered, counts) = filter_labels(&table).unwrap();
        assert_eq!(filtered.n_rows(), 4);
        assert_eq!(counts, LabelCounts { missing: 1, invalid: 1 });
        assert_eq!(
            filtered.text(DISPOSITION).unwrap()[1].as_deref(),
            Some("CANDIDATE")
        );
    }

    #[test]
    fn sanitize_repairs_denominators_and_infinities() {
        let mut table = standardize_columns(&raw_table()).unwrap();
        let changed = sanitize(&mut table);
        let period = table.numeric("period").unwrap();
        assert_eq!(period[1], Some(EPSILON));
        assert_eq!(period[5], None);
        assert_eq!(table.numeric("depth").unwrap()[5], None);
        assert_eq!(table.numeric("star_radius").unwrap()[5], Some(EPSILON));
        assert_eq!(changed, 4);
    }

    #[test]
    fn sparse_columns_are_dropped_strictly_above_threshold() {
        let mut table = Table::from_columns(vec![
            Column::numeric("a", vec![Some(1.0), None, None, None, None]),
            Column::numeric("b", vec![None, None, None, None, None]),
            Column::text("disposition", vec![None, None, None, None, None]),
        ])
        .unwrap();
        assert_eq!(table.column("a").unwrap().missing_ratio(), 0.8);
        let dropped = drop_sparse_columns(&mut table, 0.8);
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].name, "b");
        assert!(table.has_column("a"));
        assert!(table.has_column("disposition"));
    }

    #[test]
    fn column_at_exactly_eighty_percent_missing_survives_cleaning() {
        let n = 10;
        let labels = ["CONFIRMED", "CANDIDATE", "FALSE POSITIVE"];
        let dense = |base: f64| (0..n).map(|i| Some(base + i as f64)).collect();
        let holes = |present: usize| {
            (0..n)
                .map(|i| (i < present).then_some(4.0 + 0.1 * i as f64))
                .collect()
        };
        let table = Table::from_columns(vec![
            Column::numeric("period", dense(2.0)),
            Column::numeric("duration", dense(1.0)),
            Column::numeric("depth", dense(100.0)),
            Column::numeric("planet_radius", dense(1.0)),
            Column::numeric("star_radius", dense(0.5)),
            Column::numeric("semi_major_axis", dense(0.1)),
            Column::numeric("teff", dense(5000.0)),
            Column::numeric("logg", holes(2)),
            Column::numeric("snr", holes(1)),
            Column::text(
                DISPOSITION,
                (0..n).map(|i| Some(labels[i % 3].to_string())).collect(),
            ),
        ])
        .unwrap();

        let cleaned = clean(&table, &CleaningConfig::default()).unwrap();
        let dropped: Vec<&str> = cleaned
            .report
            .dropped_columns
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(dropped, vec!["snr"]);
        assert!(cleaned.feature_names.iter().any(|n| n == "logg"));
        assert!(!cleaned.feature_names.iter().any(|n| n == "snr"));
    }

    #[test]
    fn median_imputation_uses_column_median() {
        let mut table = Table::from_columns(vec![Column::numeric(
            "period",
            vec![Some(1.0), None, Some(3.0), Some(10.0)],
        )])
        .unwrap();
        let filled =
            impute_numeric(&mut table, &["period".to_string()], ImputationStrategy::Median)
                .unwrap();
        assert_eq!(filled, 1);
        assert_eq!(table.numeric("period").unwrap()[1], Some(3.0));
    }

    #[test]
    fn knn_imputation_weights_by_distance() {
        let mut columns = vec![
            vec![Some(0.0), Some(1.0), Some(10.0), Some(0.5)],
            vec![Some(0.0), Some(10.0), Some(100.0), None],
        ];
        let filled = knn_impute(&mut columns, 2);
        assert_eq!(filled, 1);
        // donors at distance sqrt(2)*0.5 each, equal weights
        let value = columns[1][3].unwrap();
        assert!((value - 5.0).abs() < 1e-9);
    }

    #[test]
    fn knn_imputation_prefers_exact_matches() {
        let mut columns = vec![
            vec![Some(1.0), Some(1.0), Some(2.0)],
            vec![Some(4.0), None, Some(8.0)],
        ];
        knn_impute(&mut columns, 5);
        assert_eq!(columns[1][1], Some(4.0));
    }

    #[test]
    fn mode_imputation_breaks_ties_lexicographically() {
        let mut table = Table::from_columns(vec![Column::text(
            "source",
            vec![Some("TESS".into()), Some("K2".into()), None],
        )])
        .unwrap();
        assert_eq!(impute_categorical(&mut table).unwrap(), 1);
        assert_eq!(table.text("source").unwrap()[2].as_deref(), Some("K2"));
    }

    #[test]
    fn clean_produces_finite_matrix_and_report() {
        let config = CleaningConfig {
            imputation: ImputationStrategy::Knn { neighbors: 2 },
            max_missing_ratio: 0.8,
        };
        let cleaned = clean(&raw_table(), &config).unwrap();
        assert_eq!(cleaned.report.rows_in, 6);
        assert_eq!(cleaned.report.rows_out, 4);
        assert_eq!(cleaned.report.dropped_rows(), 2);
        assert_eq!(cleaned.report.class_counts, [1, 1, 2]);
        assert!(cleaned
            .report
            .dropped_columns
            .iter()
            .any(|d| d.name == "logg"));

        assert_eq!(cleaned.features.len(), 4);
        assert!(cleaned
            .features
            .iter()
            .flatten()
            .all(|x| x.is_finite()));
        assert!(!cleaned.feature_names.iter().any(|n| n == "source" || n == "disposition"));
        assert_eq!(
            cleaned.feature_names.last().map(String::as_str),
            Some("log_star_radius_squared")
        );
        assert_eq!(
            cleaned.labels,
            vec![
                Disposition::Confirmed,
                Disposition::Candidate,
                Disposition::FalsePositive,
                Disposition::Confirmed
            ]
        );
    }

    #[test]
    fn clean_is_fatal_without_required_inputs() {
        let mut table = raw_table();
        table.remove_column("koi_steff");
        let err = clean(&table, &CleaningConfig::default()).unwrap_err();
        assert!(matches!(err, CoreError::Schema(_)));
    }
}
