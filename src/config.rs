use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use serde::Deserialize;

use crate::constraint::ConstraintTemplate;
use crate::metrics::DistanceMetric;
use crate::noise::MechanismKind;

fn default_separator() -> String {
    ";".to_string()
}

/// One run of the engine, as declared in a JSON configuration file.
///
/// `geo_columns` is ordered coarsest to finest; `process_until` truncates
/// it (inclusive). `privacy_parameters[d]` governs tree depth `d`, so the
/// vector must have one entry more than the number of levels in use.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    #[serde(default = "default_separator")]
    pub separator: String,

    pub geo_columns: Vec<String>,
    #[serde(default)]
    pub process_until: Option<String>,
    pub queries: Vec<String>,

    pub mechanism: MechanismKind,
    pub privacy_parameters: Vec<f64>,
    /// Skip measurement entirely (exact counts flow into estimation).
    #[serde(default)]
    pub disable_noise: bool,
    /// Seed for the noise source; defaults to OS entropy.
    #[serde(default)]
    pub seed: Option<u64>,

    #[serde(default)]
    pub geo_constraints: BTreeMap<String, Vec<ConstraintTemplate>>,
    #[serde(default)]
    pub root_constraints: Vec<ConstraintTemplate>,

    #[serde(default)]
    pub distance_metric: Option<DistanceMetric>,
    /// Microdata checkpoint to resume from.
    #[serde(default)]
    pub processed_data_path: Option<PathBuf>,
}

impl RunConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("[config] Failed to read config file: {}", path.display()))?;
        let config: RunConfig = serde_json::from_str(&text)
            .with_context(|| format!("[config] Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// The geographic columns actually processed, after the `process_until`
    /// truncation.
    pub fn geo_columns_in_use(&self) -> &[String] {
        match &self.process_until {
            Some(stop) => match self.geo_columns.iter().position(|c| c == stop) {
                Some(idx) => &self.geo_columns[..=idx],
                None => &self.geo_columns,
            },
            None => &self.geo_columns,
        }
    }

    /// The depth `L` of the tree (leaves live at depth `L`).
    #[inline]
    pub fn depth(&self) -> usize {
        self.geo_columns_in_use().len()
    }

    /// The single-byte column separator.
    #[inline]
    pub fn separator_byte(&self) -> u8 {
        self.separator.as_bytes()[0]
    }

    /// Reject contradictory or incomplete option combinations.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.geo_columns.is_empty(), "[config] geo_columns must not be empty");
        ensure!(!self.queries.is_empty(), "[config] queries must not be empty");
        ensure!(
            self.separator.len() == 1,
            "[config] separator must be a single byte, got '{}'",
            self.separator
        );

        let mut names: Vec<&String> = self.geo_columns.iter().chain(&self.queries).collect();
        names.sort();
        let before = names.len();
        names.dedup();
        ensure!(
            names.len() == before,
            "[config] geo_columns and queries must name distinct columns"
        );

        if let Some(stop) = &self.process_until {
            ensure!(
                self.geo_columns.contains(stop),
                "[config] process_until column '{stop}' is not in geo_columns"
            );
        }

        let levels = self.depth() + 1;
        ensure!(
            self.privacy_parameters.len() == levels,
            "[config] privacy_parameters has {} entries, expected {} (one per level)",
            self.privacy_parameters.len(),
            levels
        );
        if !self.disable_noise {
            ensure!(
                self.privacy_parameters.iter().all(|p| p.is_finite() && *p > 0.0),
                "[config] privacy parameters must be finite and positive"
            );
        }

        for column in self.geo_constraints.keys() {
            ensure!(
                self.geo_columns.contains(column),
                "[config] geo_constraints references unknown column '{column}'"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_json() -> serde_json::Value {
        serde_json::json!({
            "input_path": "in.csv",
            "output_path": "out.csv",
            "geo_columns": ["REGION", "PROVINCE"],
            "queries": ["SEX", "AGE"],
            "mechanism": "discrete_laplace",
            "privacy_parameters": [0.1, 0.2, 0.4],
        })
    }

    fn parse(value: serde_json::Value) -> Result<RunConfig> {
        let config: RunConfig = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn minimal_config_is_valid() {
        let config = parse(base_json()).unwrap();
        assert_eq!(config.depth(), 2);
        assert_eq!(config.separator_byte(), b';');
        assert!(config.geo_constraints.is_empty());
        assert!(config.distance_metric.is_none());
    }

    #[test]
    fn process_until_truncates_inclusively() {
        let mut json = base_json();
        json["process_until"] = "REGION".into();
        json["privacy_parameters"] = serde_json::json!([0.1, 0.2]);

        let config = parse(json).unwrap();
        assert_eq!(config.geo_columns_in_use(), &["REGION".to_string()]);
        assert_eq!(config.depth(), 1);
    }

    #[test]
    fn privacy_parameter_count_must_match_levels() {
        let mut json = base_json();
        json["privacy_parameters"] = serde_json::json!([0.1, 0.2]);
        assert!(parse(json).is_err());
    }

    #[test]
    fn non_positive_parameters_need_disable_noise() {
        let mut json = base_json();
        json["privacy_parameters"] = serde_json::json!([0.0, 0.2, 0.4]);
        assert!(parse(json.clone()).is_err());

        json["disable_noise"] = true.into();
        assert!(parse(json).is_ok());
    }

    #[test]
    fn overlapping_columns_are_rejected() {
        let mut json = base_json();
        json["queries"] = serde_json::json!(["REGION", "AGE"]);
        assert!(parse(json).is_err());
    }

    #[test]
    fn unknown_constraint_column_is_rejected() {
        let mut json = base_json();
        json["geo_constraints"] = serde_json::json!({
            "DISTRICT": [{"kind": "sum_equals_total"}],
        });
        assert!(parse(json).is_err());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let mut json = base_json();
        json["mechanismm"] = "discrete_laplace".into();
        assert!(serde_json::from_value::<RunConfig>(json).is_err());
    }

    #[test]
    fn constraint_templates_parse_inside_config() {
        let mut json = base_json();
        json["root_constraints"] = serde_json::json!([{"kind": "sum_equals_total"}]);
        json["geo_constraints"] = serde_json::json!({
            "REGION": [{"kind": "linear_leq", "coeffs": [1.0, 0.0, 0.0, 0.0], "rhs": 10.0}],
        });

        let config = parse(json).unwrap();
        assert_eq!(config.root_constraints, vec![ConstraintTemplate::SumEqualsTotal]);
        assert_eq!(config.geo_constraints["REGION"].len(), 1);
    }
}
