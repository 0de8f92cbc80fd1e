use std::collections::BTreeMap;

use ahash::AHashMap;
use anyhow::{ensure, Result};

use crate::constraint::ConstraintTemplate;
use crate::schema::{histogram, histogram_full, Permutation, RecordTable};
use crate::tree::{GeoNode, NodeState};

/// Per-geographic-attribute constraint templates, keyed by column name.
pub type GeoConstraints = BTreeMap<String, Vec<ConstraintTemplate>>;

/// Build the geographic tree from scratch.
///
/// `cells` is the precomputed canonical cell index of every row. Children
/// within a parent keep the order in which their value is first observed;
/// that order is stable for the whole run.
pub fn build(
    table: &RecordTable,
    cells: &[usize],
    perm: &Permutation,
    geo_constraints: &GeoConstraints,
    root_constraints: &[ConstraintTemplate],
) -> Result<GeoNode> {
    validate_templates(perm, geo_constraints, root_constraints)?;

    let mut builder = Builder {
        table,
        cells,
        width: perm.len(),
        geo_constraints,
        next_id: 0,
    };

    let total = table.len() as i64;
    let mut root = GeoNode {
        id: builder.alloc_id(),
        labels: Vec::new(),
        total,
        vector: histogram_full(cells, perm.len()),
        reference: None,
        state: NodeState::Built,
        constraints: root_constraints.iter().map(|t| t.bind(total)).collect(),
        children: Vec::new(),
    };

    let rows: Vec<u32> = (0..table.len() as u32).collect();
    builder.build_children(&mut root, &rows, 0)?;
    Ok(root)
}

/// Rebuild a tree from a checkpoint, then extend it with the remaining
/// levels from the raw records.
///
/// The checkpoint table covers geographic levels `0..d'`; its vectors are
/// authoritative (already integer and consistent), so those nodes start in
/// `SolvedInt`. Deeper levels are histogrammed from the raw rows restricted
/// to each already-built cell and start in `Built`.
///
/// Returns the tree and the resume depth `d'`.
pub fn build_resumed(
    raw: &RecordTable,
    raw_cells: &[usize],
    processed: &RecordTable,
    processed_cells: &[usize],
    perm: &Permutation,
    geo_constraints: &GeoConstraints,
    root_constraints: &[ConstraintTemplate],
) -> Result<(GeoNode, usize)> {
    validate_templates(perm, geo_constraints, root_constraints)?;

    let resume_depth = processed.geo_names().len();
    ensure!(
        resume_depth < raw.geo_names().len(),
        "[resume] checkpoint already covers all {} geographic levels",
        raw.geo_names().len()
    );
    ensure!(
        raw.geo_names()[..resume_depth] == *processed.geo_names(),
        "[resume] checkpoint geographic columns {:?} are not a prefix of {:?}",
        processed.geo_names(),
        raw.geo_names()
    );

    let mut builder = Builder {
        table: raw,
        cells: raw_cells,
        width: perm.len(),
        geo_constraints,
        next_id: 0,
    };

    let total = processed.len() as i64;
    let mut root = GeoNode {
        id: builder.alloc_id(),
        labels: Vec::new(),
        total,
        vector: histogram_full(processed_cells, perm.len()),
        reference: None,
        state: NodeState::SolvedInt,
        constraints: root_constraints.iter().map(|t| t.bind(total)).collect(),
        children: Vec::new(),
    };

    let processed_rows: Vec<u32> = (0..processed.len() as u32).collect();
    let raw_rows: Vec<u32> = (0..raw.len() as u32).collect();
    builder.rebuild_children(
        &mut root,
        processed,
        processed_cells,
        &processed_rows,
        &raw_rows,
        0,
        resume_depth,
    )?;

    Ok((root, resume_depth))
}

fn validate_templates(
    perm: &Permutation,
    geo_constraints: &GeoConstraints,
    root_constraints: &[ConstraintTemplate],
) -> Result<()> {
    for template in root_constraints.iter().chain(geo_constraints.values().flatten()) {
        template.validate_width(perm.len())?;
    }
    Ok(())
}

struct Builder<'a> {
    table: &'a RecordTable,
    cells: &'a [usize],
    width: usize,
    geo_constraints: &'a GeoConstraints,
    next_id: u64,
}

impl Builder<'_> {
    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn templates_for(&self, column: &str) -> &[ConstraintTemplate] {
        self.geo_constraints.get(column).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Partition `rows` by the geographic column at `depth` and recurse.
    fn build_children(&mut self, parent: &mut GeoNode, rows: &[u32], depth: usize) -> Result<()> {
        if depth == self.table.geo_names().len() {
            return Ok(());
        }

        let column = self.table.geo_names()[depth].clone();
        for (value, group) in group_by_geo(self.table, depth, rows) {
            let total = group.len() as i64;
            let mut labels = parent.labels.clone();
            labels.push(value);

            let mut child = GeoNode {
                id: self.alloc_id(),
                labels,
                total,
                vector: histogram(self.cells, &group, self.width),
                reference: None,
                state: NodeState::Built,
                constraints: self.templates_for(&column).iter().map(|t| t.bind(total)).collect(),
                children: Vec::new(),
            };
            self.build_children(&mut child, &group, depth + 1)?;
            parent.children.push(child);
        }
        Ok(())
    }

    /// Rebuild levels `0..resume_depth` from the checkpoint table while
    /// partitioning the raw rows alongside, then hand the raw subsets to
    /// the fresh builder for the remaining levels.
    #[allow(clippy::too_many_arguments)]
    fn rebuild_children(
        &mut self,
        parent: &mut GeoNode,
        processed: &RecordTable,
        processed_cells: &[usize],
        processed_rows: &[u32],
        raw_rows: &[u32],
        depth: usize,
        resume_depth: usize,
    ) -> Result<()> {
        if depth == resume_depth {
            // Everything below here is new: histogram the raw records
            // restricted to this already-built cell.
            return self.build_children(parent, raw_rows, depth);
        }

        let column = self.table.geo_names()[depth].clone();
        let raw_groups: AHashMap<String, Vec<u32>> =
            group_by_geo(self.table, depth, raw_rows).into_iter().collect();

        for (value, group) in group_by_geo(processed, depth, processed_rows) {
            let total = group.len() as i64;
            let mut labels = parent.labels.clone();
            labels.push(value.clone());

            let mut child = GeoNode {
                id: self.alloc_id(),
                labels,
                total,
                vector: histogram(processed_cells, &group, self.width),
                reference: None,
                state: NodeState::SolvedInt,
                constraints: self.templates_for(&column).iter().map(|t| t.bind(total)).collect(),
                children: Vec::new(),
            };

            let raw_group = raw_groups.get(&value).map(Vec::as_slice).unwrap_or(&[]);
            self.rebuild_children(
                &mut child,
                processed,
                processed_cells,
                &group,
                raw_group,
                depth + 1,
                resume_depth,
            )?;
            parent.children.push(child);
        }
        Ok(())
    }
}

/// Split rows by the value of geographic column `col`, keeping groups in
/// first-observed order.
fn group_by_geo(table: &RecordTable, col: usize, rows: &[u32]) -> Vec<(String, Vec<u32>)> {
    let mut index: AHashMap<&str, usize> = AHashMap::new();
    let mut groups: Vec<(String, Vec<u32>)> = Vec::new();

    for &row in rows {
        let value = table.geo_value(col, row as usize);
        match index.get(value) {
            Some(&i) => groups[i].1.push(row),
            None => {
                index.insert(value, groups.len());
                groups.push((value.to_owned(), vec![row]));
            }
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use polars::prelude::*;

    use super::*;
    use crate::constraint::EditConstraint;

    fn table(rows: &[(&str, &str, &str, &str)]) -> RecordTable {
        let df = DataFrame::new(vec![
            Series::new("R".into(), rows.iter().map(|r| r.0).collect::<Vec<_>>()).into(),
            Series::new("C".into(), rows.iter().map(|r| r.1).collect::<Vec<_>>()).into(),
            Series::new("S".into(), rows.iter().map(|r| r.2).collect::<Vec<_>>()).into(),
            Series::new("A".into(), rows.iter().map(|r| r.3).collect::<Vec<_>>()).into(),
        ])
        .unwrap();
        RecordTable::from_dataframe(
            &df,
            &["R".to_string(), "C".to_string()],
            &["S".to_string(), "A".to_string()],
        )
        .unwrap()
    }

    /// Eight records over two regions, two communes each.
    fn sample() -> RecordTable {
        table(&[
            ("1", "a", "0", "0"),
            ("1", "a", "0", "0"),
            ("1", "a", "0", "1"),
            ("1", "b", "1", "1"),
            ("2", "a", "0", "0"),
            ("2", "b", "1", "0"),
            ("2", "b", "1", "0"),
            ("2", "b", "1", "1"),
        ])
    }

    fn constraints() -> (GeoConstraints, Vec<ConstraintTemplate>) {
        let mut geo = GeoConstraints::new();
        geo.insert("R".to_string(), vec![ConstraintTemplate::SumEqualsTotal]);
        geo.insert("C".to_string(), vec![]);
        (geo, vec![ConstraintTemplate::SumEqualsTotal])
    }

    #[test]
    fn builds_full_tree() {
        let table = sample();
        let perm = Permutation::canonicalize(&table).unwrap();
        let cells = perm.row_cells(&table).unwrap();
        let (geo, root_templates) = constraints();

        let root = build(&table, &cells, &perm, &geo, &root_templates).unwrap();

        assert_eq!(root.id(), 0);
        assert_eq!(root.total(), 8);
        assert_eq!(root.vector(), &[3, 1, 2, 2]);
        assert_eq!(root.constraints(), &[EditConstraint::SumEquals(8)]);
        assert_eq!(root.count_nodes(), 7);

        // Children in first-observed order with accumulated labels.
        let r1 = &root.children()[0];
        assert_eq!(r1.labels(), &["1".to_string()]);
        assert_eq!(r1.total(), 4);
        assert_eq!(r1.constraints(), &[EditConstraint::SumEquals(4)]);
        let r1a = &r1.children()[0];
        assert_eq!(r1a.labels(), &["1".to_string(), "a".to_string()]);
        assert_eq!(r1a.vector(), &[2, 1, 0, 0]);
        assert!(r1a.constraints().is_empty());
        assert!(r1a.is_leaf());
    }

    #[test]
    fn children_sum_to_parent_before_noise() {
        let table = sample();
        let perm = Permutation::canonicalize(&table).unwrap();
        let cells = perm.row_cells(&table).unwrap();
        let (geo, root_templates) = constraints();

        let root = build(&table, &cells, &perm, &geo, &root_templates).unwrap();
        for (_, nodes) in root.iterate_by_levels() {
            for node in nodes {
                if node.is_leaf() {
                    continue;
                }
                for j in 0..perm.len() {
                    let sum: i64 = node.children().iter().map(|c| c.vector()[j]).sum();
                    assert_eq!(sum, node.vector()[j]);
                }
            }
        }
    }

    #[test]
    fn node_ids_are_unique() {
        let table = sample();
        let perm = Permutation::canonicalize(&table).unwrap();
        let cells = perm.row_cells(&table).unwrap();
        let (geo, root_templates) = constraints();

        let root = build(&table, &cells, &perm, &geo, &root_templates).unwrap();
        let mut ids: Vec<u64> = root.iterate_by_levels().iter()
            .flat_map(|(_, nodes)| nodes.iter().map(|n| n.id()))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), root.count_nodes());
    }

    #[test]
    fn resumed_tree_joins_levels() {
        let raw = sample();
        let perm = Permutation::canonicalize(&raw).unwrap();
        let raw_cells = perm.row_cells(&raw).unwrap();

        // Checkpoint at depth 1: only the R column, same query schema.
        let df = DataFrame::new(vec![
            Series::new("R".into(), vec!["1", "1", "1", "1", "2", "2", "2", "2"]).into(),
            Series::new("S".into(), vec!["0", "0", "0", "1", "0", "1", "1", "1"]).into(),
            Series::new("A".into(), vec!["0", "0", "1", "1", "0", "0", "0", "1"]).into(),
        ])
        .unwrap();
        let processed =
            RecordTable::from_dataframe(&df, &["R".to_string()], &["S".to_string(), "A".to_string()])
                .unwrap();
        let processed_cells = perm.row_cells(&processed).unwrap();

        let (geo, root_templates) = constraints();
        let (root, resume_depth) = build_resumed(
            &raw, &raw_cells, &processed, &processed_cells, &perm, &geo, &root_templates,
        )
        .unwrap();

        assert_eq!(resume_depth, 1);
        assert_eq!(root.state(), NodeState::SolvedInt);
        assert_eq!(root.vector(), &[3, 1, 2, 2]);

        // Depth-1 nodes come from the checkpoint, depth-2 from the raw rows.
        let r2 = &root.children()[1];
        assert_eq!(r2.state(), NodeState::SolvedInt);
        assert_eq!(r2.vector(), &[1, 0, 2, 1]);
        let r2b = &r2.children()[1];
        assert_eq!(r2b.state(), NodeState::Built);
        assert_eq!(r2b.labels(), &["2".to_string(), "b".to_string()]);
        assert_eq!(r2b.vector(), &[0, 0, 2, 1]);
    }

    #[test]
    fn resumed_rejects_non_prefix() {
        let raw = sample();
        let perm = Permutation::canonicalize(&raw).unwrap();
        let raw_cells = perm.row_cells(&raw).unwrap();

        let df = DataFrame::new(vec![
            Series::new("X".into(), vec!["1"]).into(),
            Series::new("S".into(), vec!["0"]).into(),
            Series::new("A".into(), vec!["0"]).into(),
        ])
        .unwrap();
        let processed =
            RecordTable::from_dataframe(&df, &["X".to_string()], &["S".to_string(), "A".to_string()])
                .unwrap();
        let processed_cells = perm.row_cells(&processed).unwrap();

        let (geo, root_templates) = constraints();
        assert!(build_resumed(
            &raw, &raw_cells, &processed, &processed_cells, &perm, &geo, &root_templates,
        )
        .is_err());
    }
}
