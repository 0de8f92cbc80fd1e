use ahash::AHashMap;
use anyhow::{bail, ensure, Result};

use super::table::RecordTable;

/// The canonical enumeration of query-value tuples.
///
/// Computed once from the full input and shared (by reference) with every
/// node of the geographic tree; its length is the fixed width of all
/// contingency vectors. Tuples are ordered lexicographically by the query
/// columns, which makes the enumeration a mixed-radix counter over the
/// per-column sorted value sets.
#[derive(Debug, Clone, PartialEq)]
pub struct Permutation {
    columns: Vec<String>,
    values: Vec<Vec<String>>,
    len: usize,
}

impl Permutation {
    /// Freeze the observed value domain of the table's query columns.
    pub fn canonicalize(table: &RecordTable) -> Result<Self> {
        ensure!(!table.query_names().is_empty(), "[schema] no query columns declared");

        let columns = table.query_names().to_vec();
        let mut values = Vec::with_capacity(columns.len());
        for col in 0..columns.len() {
            let mut seen: AHashMap<&str, ()> = AHashMap::new();
            let mut distinct = Vec::new();
            for row in 0..table.len() {
                let value = table.query_value(col, row);
                if seen.insert(value, ()).is_none() {
                    distinct.push(value.to_owned());
                }
            }
            distinct.sort();
            values.push(distinct);
        }

        let len = values.iter().map(Vec::len).product();
        Ok(Self { columns, values, len })
    }

    /// Get the fixed vector width `|Π|`.
    #[inline] pub fn len(&self) -> usize { self.len }

    /// Check if the domain is empty (never true for a non-empty input).
    #[inline] pub fn is_empty(&self) -> bool { self.len == 0 }

    /// Get the query column names.
    #[inline] pub fn columns(&self) -> &[String] { &self.columns }

    /// Get the sorted distinct values of query column `col`.
    #[inline] pub fn values(&self, col: usize) -> &[String] { &self.values[col] }

    /// Look up the cell index of a value tuple, or `None` if any value is
    /// outside the frozen domain.
    pub fn index_of(&self, tuple: &[&str]) -> Option<usize> {
        debug_assert!(tuple.len() == self.columns.len(), "tuple arity mismatch");

        let mut cell = 0usize;
        for (col, value) in tuple.iter().enumerate() {
            let idx = self.values[col].binary_search_by(|v| v.as_str().cmp(value)).ok()?;
            cell = cell * self.values[col].len() + idx;
        }
        Some(cell)
    }

    /// Decode a cell index back into its value tuple.
    pub fn tuple(&self, cell: usize) -> Vec<&str> {
        debug_assert!(cell < self.len, "cell index out of range");

        let mut tuple = vec![""; self.columns.len()];
        let mut rest = cell;
        for col in (0..self.columns.len()).rev() {
            let radix = self.values[col].len();
            tuple[col] = self.values[col][rest % radix].as_str();
            rest /= radix;
        }
        tuple
    }

    /// Precompute the cell index of every row of a table.
    ///
    /// Fails if the table carries a query value outside the frozen domain
    /// (the resume-mismatch condition when the table is a checkpoint).
    pub fn row_cells(&self, table: &RecordTable) -> Result<Vec<usize>> {
        ensure!(
            table.query_names() == self.columns.as_slice(),
            "[schema] query columns {:?} do not match the canonical domain {:?}",
            table.query_names(),
            self.columns
        );

        // Per-column value index maps beat repeated binary searches here.
        let lookups: Vec<AHashMap<&str, usize>> = self.values.iter()
            .map(|vals| vals.iter().enumerate().map(|(i, v)| (v.as_str(), i)).collect())
            .collect();

        let mut cells = Vec::with_capacity(table.len());
        for row in 0..table.len() {
            let mut cell = 0usize;
            for col in 0..self.columns.len() {
                let value = table.query_value(col, row);
                let Some(&idx) = lookups[col].get(value) else {
                    bail!(
                        "[schema] value '{}' in column '{}' is outside the canonical domain",
                        value,
                        self.columns[col]
                    );
                };
                cell = cell * self.values[col].len() + idx;
            }
            cells.push(cell);
        }
        Ok(cells)
    }
}
