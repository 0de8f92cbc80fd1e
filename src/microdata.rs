use std::{fs::File, path::Path};

use anyhow::{Context, Result};
use polars::{
    frame::DataFrame,
    io::SerWriter,
    prelude::{CsvWriter, NamedFrom},
    series::Series,
};

use crate::schema::Permutation;
use crate::tree::GeoNode;

/// Expand the tree's leaf vectors back into records and stream them to a
/// delimited file with the input schema (geographic columns, then query
/// columns).
///
/// Each leaf becomes one written chunk, so the full microdata is never
/// materialized in memory. Returns the number of emitted records.
pub fn write_microdata(
    root: &GeoNode,
    perm: &Permutation,
    geo_columns: &[String],
    path: &Path,
    separator: u8,
) -> Result<u64> {
    let mut file = File::create(path)
        .with_context(|| format!("[microdata] Failed to create output file: {}", path.display()))?;

    let mut emitted = 0u64;
    let mut first = true;
    emit_node(root, perm, geo_columns, separator, &mut file, &mut first, &mut emitted)?;
    Ok(emitted)
}

fn emit_node(
    node: &GeoNode,
    perm: &Permutation,
    geo_columns: &[String],
    separator: u8,
    file: &mut File,
    first: &mut bool,
    emitted: &mut u64,
) -> Result<()> {
    if !node.is_leaf() {
        for child in node.children() {
            emit_node(child, perm, geo_columns, separator, file, first, emitted)?;
        }
        return Ok(());
    }

    let mut frame = leaf_frame(node, perm, geo_columns);
    let rows = frame.height() as u64;
    if rows > 0 || *first {
        CsvWriter::new(&mut *file)
            .include_header(*first)
            .with_separator(separator)
            .finish(&mut frame)
            .with_context(|| format!("[microdata] Failed to write records for node {}", node.id()))?;
        *first = false;
    }
    *emitted += rows;
    Ok(())
}

/// One row per unit of count, in cell order. Cells left negative by a
/// skipped subtree are clamped to zero here.
fn leaf_frame(leaf: &GeoNode, perm: &Permutation, geo_columns: &[String]) -> DataFrame {
    let counts: Vec<usize> = leaf.vector().iter().map(|&v| v.max(0) as usize).collect();
    let rows: usize = counts.iter().sum();

    let mut columns = Vec::with_capacity(geo_columns.len() + perm.columns().len());
    for (k, name) in geo_columns.iter().enumerate() {
        let label = leaf.labels().get(k).map(String::as_str).unwrap_or("");
        columns.push(Series::new(name.as_str().into(), vec![label; rows]).into());
    }
    for (c, name) in perm.columns().iter().enumerate() {
        let mut values = Vec::with_capacity(rows);
        for (cell, &count) in counts.iter().enumerate() {
            let value = perm.tuple(cell)[c];
            values.extend(std::iter::repeat_n(value, count));
        }
        columns.push(Series::new(name.as_str().into(), values).into());
    }

    DataFrame::new(columns).expect("leaf columns share one length")
}
