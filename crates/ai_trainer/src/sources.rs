//! Survey catalog ingestion
//!
//! Each mission publishes its own CSV. A catalog is read, harmonized onto the
//! canonical vocabulary, tagged with its mission and stacked with the others. A
//! catalog that cannot be read is skipped with a warning; the load only fails when
//! nothing at all could be read.

use crate::errors::{Result, TrainerError};
use exo_ai_core::standardize::{standardize_columns, DISPOSITION, SOURCE};
use exo_ai_core::{Column, ColumnData, Source, Table};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

/// One mission catalog on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSource {
    pub source: Source,
    pub path: PathBuf,
}

impl CatalogSource {
    pub fn new(source: Source, path: impl Into<PathBuf>) -> Self {
        Self {
            source,
            path: path.into(),
        }
    }

    /// Conventional file names inside a raw-data directory
    pub fn default_set(dir: &Path) -> Vec<CatalogSource> {
        vec![
            CatalogSource::new(Source::K2, dir.join("k2.csv")),
            CatalogSource::new(Source::Kepler, dir.join("kepler.csv")),
            CatalogSource::new(Source::Tess, dir.join("tess.csv")),
        ]
    }
}

/// Outcome of one load attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceReport {
    pub source: Source,
    pub rows: usize,
    /// Why the catalog was skipped, when it was
    pub skipped: Option<String>,
}

/// Map TESS follow-up codes onto the three disposition labels. Unknown codes pass
/// through unchanged and are later dropped by label filtering.
pub fn normalize_tess_disposition(code: &str) -> Option<&'static str> {
    match code.trim().to_uppercase().as_str() {
        "CP" | "KP" => Some("CONFIRMED"),
        "PC" | "APC" => Some("CANDIDATE"),
        "FP" | "FA" => Some("FALSE POSITIVE"),
        _ => None,
    }
}

/// Read one catalog into a standardized table tagged with its mission.
pub fn load_catalog(catalog: &CatalogSource) -> Result<Table> {
    let ingestion_error = |reason: String| TrainerError::SourceIngestion {
        source_name: catalog.source.name().to_string(),
        reason,
    };
    if !catalog.path.is_file() {
        return Err(ingestion_error(format!(
            "{} does not exist",
            catalog.path.display()
        )));
    }
    let raw = Table::from_csv_path(&catalog.path)
        .map_err(|e| ingestion_error(format!("{}: {e}", catalog.path.display())))?;
    let mut table = standardize_columns(&raw)?;

    if catalog.source == Source::Tess {
        if let Some(column) = table.column_mut(DISPOSITION) {
            if let ColumnData::Text(labels) = &mut column.data {
                for label in labels.iter_mut().flatten() {
                    if let Some(mapped) = normalize_tess_disposition(label) {
                        *label = mapped.to_string();
                    }
                }
            }
        }
    }

    let tag = Some(catalog.source.name().to_string());
    table.set_column(Column::text(SOURCE, vec![tag; table.n_rows()]))?;
    Ok(table)
}

/// Load every catalog that can be read and stack them into one table.
#[instrument(skip_all, fields(sources = catalogs.len()))]
pub fn load_catalogs(catalogs: &[CatalogSource]) -> Result<(Table, Vec<SourceReport>)> {
    let mut tables = Vec::new();
    let mut reports = Vec::with_capacity(catalogs.len());

    for catalog in catalogs {
        match load_catalog(catalog) {
            Ok(table) => {
                info!(
                    "Loaded {} rows, {} columns from {} ({})",
                    table.n_rows(),
                    table.n_columns(),
                    catalog.source,
                    catalog.path.display()
                );
                reports.push(SourceReport {
                    source: catalog.source,
                    rows: table.n_rows(),
                    skipped: None,
                });
                tables.push(table);
            }
            Err(err) if err.is_recoverable() => {
                warn!("Skipping source {}: {}", catalog.source, err);
                reports.push(SourceReport {
                    source: catalog.source,
                    rows: 0,
                    skipped: Some(err.to_string()),
                });
            }
            Err(err) => return Err(err),
        }
    }

    if tables.is_empty() {
        return Err(TrainerError::AllSourcesFailed {
            attempted: catalogs.len(),
        });
    }
    let combined = Table::concat(tables)?;
    info!(
        "Combined {} of {} sources into {} rows",
        reports.iter().filter(|r| r.skipped.is_none()).count(),
        catalogs.len(),
        combined.n_rows()
    );
    Ok((combined, reports))
}
