use std::{fs::File, path::Path};

use anyhow::{ensure, Context, Result};
use polars::{frame::DataFrame, io::SerReader, prelude::{CsvReadOptions, DataType}};

/// Reads a delimited text file with a header row into a Polars DataFrame.
///
/// Every column is read as a string so that value comparisons are
/// exact-equality on the raw text (leading zeros and numeric formatting
/// survive the round trip).
pub fn read_records(path: &Path, separator: u8) -> Result<DataFrame> {
    let file = File::open(path)
        .with_context(|| format!("[schema] Failed to open input file: {}", path.display()))?;
    CsvReadOptions::default()
        .with_has_header(true)
        .map_parse_options(|po| po.with_separator(separator))
        .with_infer_schema_length(Some(0))
        .into_reader_with_file_handle(file)
        .finish()
        .with_context(|| format!("[schema] Failed to read records from {}", path.display()))
}

/// A flat record table restricted to the declared geographic and query
/// columns. Columns are stored column-major; all values are raw strings.
#[derive(Debug, Clone)]
pub struct RecordTable {
    geo_names: Vec<String>,
    query_names: Vec<String>,
    geo: Vec<Vec<String>>,
    query: Vec<Vec<String>>,
    len: usize,
}

impl RecordTable {
    /// Extract the geographic and query columns from a DataFrame.
    ///
    /// Columns not named in either list are ignored. Missing columns and
    /// null cells are data errors.
    pub fn from_dataframe(
        df: &DataFrame,
        geo_columns: &[String],
        query_columns: &[String],
    ) -> Result<Self> {
        ensure!(df.height() > 0, "[schema] input contains no records");

        let geo = geo_columns.iter()
            .map(|name| extract_column(df, name))
            .collect::<Result<Vec<_>>>()?;
        let query = query_columns.iter()
            .map(|name| extract_column(df, name))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            geo_names: geo_columns.to_vec(),
            query_names: query_columns.to_vec(),
            geo,
            query,
            len: df.height(),
        })
    }

    /// Get the number of records.
    #[inline] pub fn len(&self) -> usize { self.len }

    /// Check if the table has no records.
    #[inline] pub fn is_empty(&self) -> bool { self.len == 0 }

    /// Get the geographic column names, coarsest first.
    #[inline] pub fn geo_names(&self) -> &[String] { &self.geo_names }

    /// Get the query column names.
    #[inline] pub fn query_names(&self) -> &[String] { &self.query_names }

    /// Get the value of geographic column `col` at `row`.
    #[inline]
    pub fn geo_value(&self, col: usize, row: usize) -> &str {
        &self.geo[col][row]
    }

    /// Get the value of query column `col` at `row`.
    #[inline]
    pub fn query_value(&self, col: usize, row: usize) -> &str {
        &self.query[col][row]
    }
}

/// Pull a named column out of the DataFrame as raw strings.
fn extract_column(df: &DataFrame, name: &str) -> Result<Vec<String>> {
    let column = df.column(name)
        .with_context(|| format!("[schema] missing column '{name}' in input"))?
        .cast(&DataType::String)
        .with_context(|| format!("[schema] column '{name}' is not readable as text"))?;

    column.str()?
        .into_iter()
        .enumerate()
        .map(|(row, value)| {
            value.map(str::to_owned).with_context(|| {
                format!("[schema] unreadable value in column '{name}' at row {row}")
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use polars::prelude::*;

    use super::*;

    fn sample_frame() -> DataFrame {
        DataFrame::new(vec![
            Series::new("R".into(), vec!["1", "1", "2"]).into(),
            Series::new("S".into(), vec!["0", "1", "0"]).into(),
            Series::new("ignored".into(), vec!["a", "b", "c"]).into(),
        ])
        .unwrap()
    }

    #[test]
    fn extracts_declared_columns() {
        let table = RecordTable::from_dataframe(
            &sample_frame(),
            &["R".to_string()],
            &["S".to_string()],
        )
        .unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(table.geo_names(), &["R".to_string()]);
        assert_eq!(table.geo_value(0, 2), "2");
        assert_eq!(table.query_value(0, 1), "1");
    }

    #[test]
    fn missing_column_is_an_error() {
        let result = RecordTable::from_dataframe(
            &sample_frame(),
            &["R".to_string()],
            &["NOPE".to_string()],
        );
        assert!(result.is_err());
    }

    #[test]
    fn empty_frame_is_an_error() {
        let df = DataFrame::new(vec![
            Series::new("R".into(), Vec::<String>::new()).into(),
        ])
        .unwrap();
        assert!(RecordTable::from_dataframe(&df, &["R".to_string()], &[]).is_err());
    }
}
