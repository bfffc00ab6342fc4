//! Column-oriented table with explicit missing values
//!
//! Catalog data arrives as CSV with a mix of numeric and text columns and plenty of
//! holes. Missing cells are `None`; non-finite numbers are kept as-is so that the
//! sanitization pass can see and repair them.

use crate::errors::{CoreError, Result};
use std::collections::HashSet;
use std::io::{Read, Write};
use std::path::Path;

/// Values of a single column
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Numeric(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Numeric(v) => v.len(),
            ColumnData::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of missing cells
    pub fn missing_count(&self) -> usize {
        match self {
            ColumnData::Numeric(v) => v.iter().filter(|c| c.is_none()).count(),
            ColumnData::Text(v) => v.iter().filter(|c| c.is_none()).count(),
        }
    }

    fn filter(&self, keep: &[bool]) -> ColumnData {
        match self {
            ColumnData::Numeric(v) => ColumnData::Numeric(
                v.iter()
                    .zip(keep)
                    .filter(|(_, k)| **k)
                    .map(|(c, _)| *c)
                    .collect(),
            ),
            ColumnData::Text(v) => ColumnData::Text(
                v.iter()
                    .zip(keep)
                    .filter(|(_, k)| **k)
                    .map(|(c, _)| c.clone())
                    .collect(),
            ),
        }
    }

    fn missing(kind_numeric: bool, len: usize) -> ColumnData {
        if kind_numeric {
            ColumnData::Numeric(vec![None; len])
        } else {
            ColumnData::Text(vec![None; len])
        }
    }

    fn into_text(self) -> Vec<Option<String>> {
        match self {
            ColumnData::Text(v) => v,
            ColumnData::Numeric(v) => v.into_iter().map(|c| c.map(|x| x.to_string())).collect(),
        }
    }

    fn cell_string(&self, row: usize) -> String {
        match self {
            ColumnData::Numeric(v) => v[row].map(|x| x.to_string()).unwrap_or_default(),
            ColumnData::Text(v) => v[row].clone().unwrap_or_default(),
        }
    }
}

/// Named column
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

impl Column {
    pub fn numeric(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self {
            name: name.into(),
            data: ColumnData::Numeric(values),
        }
    }

    pub fn text(name: impl Into<String>, values: Vec<Option<String>>) -> Self {
        Self {
            name: name.into(),
            data: ColumnData::Text(values),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self.data, ColumnData::Numeric(_))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Fraction of missing cells, 0.0 for an empty column
    pub fn missing_ratio(&self) -> f64 {
        let len = self.len();
        if len == 0 {
            return 0.0;
        }
        self.data.missing_count() as f64 / len as f64
    }
}

/// Rectangular table of named columns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
    n_rows: usize,
}

impl Table {
    /// Empty table with zero rows
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table, checking that every column has the same length and a unique name.
    pub fn from_columns(columns: Vec<Column>) -> Result<Self> {
        let n_rows = columns.first().map(Column::len).unwrap_or(0);
        let mut seen = HashSet::new();
        for column in &columns {
            if column.len() != n_rows {
                return Err(CoreError::Schema(format!(
                    "column {} has {} rows, expected {}",
                    column.name,
                    column.len(),
                    n_rows
                )));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(CoreError::Schema(format!(
                    "duplicate column name {}",
                    column.name
                )));
            }
        }
        Ok(Self { columns, n_rows })
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    /// Numeric values of a column, `None` if absent or not numeric
    pub fn numeric(&self, name: &str) -> Option<&[Option<f64>]> {
        match &self.column(name)?.data {
            ColumnData::Numeric(v) => Some(v),
            ColumnData::Text(_) => None,
        }
    }

    /// Text values of a column, `None` if absent or not text
    pub fn text(&self, name: &str) -> Option<&[Option<String>]> {
        match &self.column(name)?.data {
            ColumnData::Text(v) => Some(v),
            ColumnData::Numeric(_) => None,
        }
    }

    /// Append a column, or replace the existing one with the same name in place.
    pub fn set_column(&mut self, column: Column) -> Result<()> {
        if self.columns.is_empty() {
            self.n_rows = column.len();
        } else if column.len() != self.n_rows {
            return Err(CoreError::Schema(format!(
                "column {} has {} rows, expected {}",
                column.name,
                column.len(),
                self.n_rows
            )));
        }
        match self.columns.iter_mut().find(|c| c.name == column.name) {
            Some(existing) => *existing = column,
            None => self.columns.push(column),
        }
        Ok(())
    }

    pub fn remove_column(&mut self, name: &str) -> Option<Column> {
        let idx = self.columns.iter().position(|c| c.name == name)?;
        Some(self.columns.remove(idx))
    }

    /// Keep only rows whose mask entry is true.
    pub fn filter_rows(&self, keep: &[bool]) -> Result<Table> {
        if keep.len() != self.n_rows {
            return Err(CoreError::Schema(format!(
                "row mask has {} entries, table has {} rows",
                keep.len(),
                self.n_rows
            )));
        }
        let columns = self
            .columns
            .iter()
            .map(|c| Column {
                name: c.name.clone(),
                data: c.data.filter(keep),
            })
            .collect();
        Ok(Table {
            columns,
            n_rows: keep.iter().filter(|k| **k).count(),
        })
    }

    /// Read a CSV with a header row. Lines starting with `#` are skipped.
    ///
    /// A column is numeric when every non-empty cell parses as a number; empty cells
    /// and `NaN` become missing.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Table> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers: Vec<String> = csv_reader.headers()?.iter().map(str::to_string).collect();
        let mut raw: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];
        for record in csv_reader.records() {
            let record = record?;
            for (idx, cells) in raw.iter_mut().enumerate() {
                let cell = record.get(idx).unwrap_or("");
                cells.push(if cell.is_empty() {
                    None
                } else {
                    Some(cell.to_string())
                });
            }
        }

        let mut columns = Vec::with_capacity(headers.len());
        for (name, cells) in headers.into_iter().zip(raw) {
            if name.is_empty() {
                continue;
            }
            let parsed: Option<Vec<Option<f64>>> = cells
                .iter()
                .map(|cell| match cell {
                    None => Some(None),
                    Some(s) => s.parse::<f64>().ok().map(|x| (!x.is_nan()).then_some(x)),
                })
                .collect();
            columns.push(match parsed {
                Some(values) => Column::numeric(name, values),
                None => Column::text(name, cells),
            });
        }
        Table::from_columns(columns)
    }

    pub fn from_csv_path(path: &Path) -> Result<Table> {
        let file = std::fs::File::open(path)?;
        Table::from_csv_reader(std::io::BufReader::new(file))
    }

    /// Write the table as CSV with a header row; missing cells are empty.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(self.column_names())?;
        for row in 0..self.n_rows {
            csv_writer.write_record(self.columns.iter().map(|c| c.data.cell_string(row)))?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    /// Stack tables vertically over the union of their columns.
    ///
    /// Columns keep first-seen order. A column absent from one table is missing for
    /// that table's rows; a column that is numeric in one table and text in another
    /// becomes text.
    pub fn concat(tables: Vec<Table>) -> Result<Table> {
        let mut names: Vec<String> = Vec::new();
        for table in &tables {
            for column in &table.columns {
                if !names.contains(&column.name) {
                    names.push(column.name.clone());
                }
            }
        }

        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            let all_numeric = tables
                .iter()
                .filter_map(|t| t.column(&name))
                .all(Column::is_numeric);
            let parts: Vec<ColumnData> = tables
                .iter()
                .map(|t| match t.column(&name) {
                    Some(c) => c.data.clone(),
                    None => ColumnData::missing(all_numeric, t.n_rows),
                })
                .collect();

            let data = if all_numeric {
                let mut values = Vec::new();
                for part in parts {
                    if let ColumnData::Numeric(v) = part {
                        values.extend(v);
                    }
                }
                ColumnData::Numeric(values)
            } else {
                ColumnData::Text(parts.into_iter().flat_map(ColumnData::into_text).collect())
            };
            columns.push(Column { name, data });
        }
        Table::from_columns(columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "# catalog export\n\
        kepid,koi_disposition,koi_period,koi_prad\n\
        1001,CONFIRMED,3.5,1.2\n\
        1002, CANDIDATE ,,2.0\n\
        # trailing comment\n\
        1003,FALSE POSITIVE,NaN,inf\n";

    #[test]
    fn reads_csv_with_comments_and_types() {
        let table = Table::from_csv_reader(CSV.as_bytes()).unwrap();
        assert_eq!(table.n_rows(), 3);
        assert_eq!(
            table.column_names(),
            vec!["kepid", "koi_disposition", "koi_period", "koi_prad"]
        );
        assert_eq!(
            table.numeric("koi_period").unwrap(),
            &[Some(3.5), None, None]
        );
        assert_eq!(table.numeric("koi_prad").unwrap()[2], Some(f64::INFINITY));
        assert_eq!(
            table.text("koi_disposition").unwrap()[1].as_deref(),
            Some("CANDIDATE")
        );
    }

    #[test]
    fn concat_unions_columns() {
        let a = Table::from_columns(vec![Column::numeric("period", vec![Some(1.0)])]).unwrap();
        let b = Table::from_columns(vec![
            Column::numeric("period", vec![Some(2.0), Some(3.0)]),
            Column::text("toi", vec![Some("101.01".into()), None]),
        ])
        .unwrap();
        let merged = Table::concat(vec![a, b]).unwrap();
        assert_eq!(merged.n_rows(), 3);
        assert_eq!(
            merged.numeric("period").unwrap(),
            &[Some(1.0), Some(2.0), Some(3.0)]
        );
        assert_eq!(merged.text("toi").unwrap()[0], None);
    }

    #[test]
    fn rejects_ragged_columns() {
        let err = Table::from_columns(vec![
            Column::numeric("a", vec![Some(1.0)]),
            Column::numeric("b", vec![]),
        ])
        .unwrap_err();
        assert!(matches!(err, CoreError::Schema(_)));
    }

    #[test]
    fn filter_rows_keeps_masked_rows() {
        let table = Table::from_columns(vec![Column::numeric(
            "period",
            vec![Some(1.0), Some(2.0), Some(3.0)],
        )])
        .unwrap();
        let kept = table.filter_rows(&[true, false, true]).unwrap();
        assert_eq!(kept.numeric("period").unwrap(), &[Some(1.0), Some(3.0)]);
    }
}
