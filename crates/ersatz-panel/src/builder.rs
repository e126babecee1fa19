//! Construction of the solver's input matrices from a tidy panel.
//!
//! The panel is the usual long format: one row per (unit, time) pair, one
//! column for the unit id, one for the time index, one for the outcome, and
//! any number of predictor columns. The builder splits it at the treatment
//! cutoff, averages predictors over the pre-treatment window, extracts the
//! outcome paths, and rescales predictors by their cross-sectional population
//! standard deviation.
//!
//! Everything validates up front: a bad input never produces a partially
//! built [`PanelMatrices`].

use crate::error::{PanelError, Result};
use crate::matrices::PanelMatrices;
use ndarray::{Array1, Array2};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Standard deviations at or below this count as zero variance.
const ZERO_VARIANCE_TOL: f64 = 1e-12;

/// Describes how to read a panel `DataFrame`.
///
/// The unit-id column must be a string column; panels with numeric ids
/// should cast the id column to string before building. The cutoff is the
/// inclusive lower bound of the post-treatment ("after") regime: rows with
/// `time < cutoff` are pre-treatment, rows with `time >= cutoff` are
/// post-treatment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelSpec {
    /// Name of the outcome column.
    pub outcome: String,
    /// Name of the unit-id column.
    pub unit: String,
    /// Name of the time-index column.
    pub time: String,
    /// Inclusive start of the post-treatment regime.
    pub cutoff: f64,
    /// Id of the treated unit.
    pub treated: String,
    /// Columns to exclude from the predictor set (beyond outcome/unit/time).
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Build the aligned matrix bundle for one treated unit and its controls.
///
/// Predictor columns are every table column except the outcome, unit-id and
/// time columns and the explicitly excluded ones, in table column order.
/// Control units are the distinct non-treated unit ids in first-seen order.
///
/// # Errors
///
/// * [`PanelError::Schema`] - required column missing, wrong type, or nulls
/// * [`PanelError::NotFound`] - treated unit or excluded column absent
/// * [`PanelError::Shape`] - unbalanced panel (mismatched period counts)
/// * [`PanelError::ZeroVariance`] - a predictor that cannot discriminate
///   between units
pub fn build_matrices(data: &DataFrame, spec: &PanelSpec) -> Result<PanelMatrices> {
    let columns: Vec<String> = data
        .get_column_names()
        .iter()
        .map(|name| name.as_str().to_string())
        .collect();

    for required in [&spec.outcome, &spec.unit, &spec.time] {
        if !columns.iter().any(|c| c == required) {
            return Err(PanelError::Schema {
                column: required.clone(),
                reason: "is missing from the panel".to_string(),
            });
        }
    }
    for excluded in &spec.exclude {
        if !columns.iter().any(|c| c == excluded) {
            return Err(PanelError::NotFound {
                kind: "excluded column",
                name: excluded.clone(),
            });
        }
    }

    let units = unit_column(data, &spec.unit)?;
    if !units.iter().any(|u| u == &spec.treated) {
        return Err(PanelError::NotFound {
            kind: "treated unit",
            name: spec.treated.clone(),
        });
    }

    let predictor_names: Vec<String> = columns
        .iter()
        .filter(|c| {
            **c != spec.outcome
                && **c != spec.unit
                && **c != spec.time
                && !spec.exclude.contains(c)
        })
        .cloned()
        .collect();
    if predictor_names.is_empty() {
        return Err(PanelError::Degenerate {
            reason: "no predictor columns remain after exclusions".to_string(),
        });
    }

    let times = numeric_column(data, &spec.time)?;
    let outcomes = numeric_column(data, &spec.outcome)?;
    let predictor_cols: Vec<Vec<f64>> = predictor_names
        .iter()
        .map(|p| numeric_column(data, p))
        .collect::<Result<_>>()?;

    // Partition row indices by unit, preserving first-seen control order.
    let mut treated_rows: Vec<usize> = Vec::new();
    let mut control_units: Vec<String> = Vec::new();
    let mut control_rows: HashMap<String, Vec<usize>> = HashMap::new();
    for (row, unit) in units.iter().enumerate() {
        if unit == &spec.treated {
            treated_rows.push(row);
        } else {
            if !control_rows.contains_key(unit) {
                control_units.push(unit.clone());
            }
            control_rows.entry(unit.clone()).or_default().push(row);
        }
    }
    if control_units.is_empty() {
        return Err(PanelError::Degenerate {
            reason: "no control units in the panel".to_string(),
        });
    }

    let (treated_before, treated_after) =
        split_at_cutoff(&treated_rows, &times, spec.cutoff, &spec.treated)?;
    let t0 = treated_before.len();
    let t1 = treated_after.len();
    if t0 == 0 {
        return Err(PanelError::Shape {
            unit: spec.treated.clone(),
            regime: "pre-treatment",
            expected: 1,
            actual: 0,
        });
    }
    if t1 == 0 {
        return Err(PanelError::Shape {
            unit: spec.treated.clone(),
            regime: "post-treatment",
            expected: 1,
            actual: 0,
        });
    }

    // Balance check: every control unit must cover exactly the same number
    // of pre- and post-treatment periods as the treated unit.
    let mut control_before: Vec<Vec<usize>> = Vec::with_capacity(control_units.len());
    let mut control_after: Vec<Vec<usize>> = Vec::with_capacity(control_units.len());
    for unit in &control_units {
        let (before, after) = split_at_cutoff(&control_rows[unit], &times, spec.cutoff, unit)?;
        if before.len() != t0 {
            return Err(PanelError::Shape {
                unit: unit.clone(),
                regime: "pre-treatment",
                expected: t0,
                actual: before.len(),
            });
        }
        if after.len() != t1 {
            return Err(PanelError::Shape {
                unit: unit.clone(),
                regime: "post-treatment",
                expected: t1,
                actual: after.len(),
            });
        }
        control_before.push(before);
        control_after.push(after);
    }

    let k = predictor_names.len();
    let j = control_units.len();

    // Pre-treatment predictor averages: K vector for the treated unit, one
    // K column per control unit.
    let treated_predictors =
        Array1::from_iter(predictor_cols.iter().map(|col| mean_over(&treated_before, col)));
    let control_predictors = Array2::from_shape_fn((k, j), |(ki, ji)| {
        mean_over(&control_before[ji], &predictor_cols[ki])
    });

    let treated_outcome_before = Array1::from_iter(treated_before.iter().map(|&r| outcomes[r]));
    let treated_outcome_after = Array1::from_iter(treated_after.iter().map(|&r| outcomes[r]));
    let control_outcome_before =
        Array2::from_shape_fn((t0, j), |(t, ji)| outcomes[control_before[ji][t]]);
    let control_outcome_after =
        Array2::from_shape_fn((t1, j), |(t, ji)| outcomes[control_after[ji][t]]);

    // Rescale each predictor by its population standard deviation across the
    // combined treated + control cross-section.
    let mut predictor_scales = Array1::zeros(k);
    let mut scaled_treated_predictors = treated_predictors.clone();
    let mut scaled_control_predictors = control_predictors.clone();
    for ki in 0..k {
        let mut cross_section = Vec::with_capacity(j + 1);
        cross_section.push(treated_predictors[ki]);
        cross_section.extend(control_predictors.row(ki).iter().copied());
        let sd = population_std(&cross_section);
        if sd <= ZERO_VARIANCE_TOL {
            return Err(PanelError::ZeroVariance {
                predictor: predictor_names[ki].clone(),
            });
        }
        predictor_scales[ki] = sd;
        scaled_treated_predictors[ki] /= sd;
        for ji in 0..j {
            scaled_control_predictors[[ki, ji]] /= sd;
        }
    }

    Ok(PanelMatrices {
        treated_unit: spec.treated.clone(),
        control_units,
        predictor_names,
        predictor_scales,
        treated_predictors,
        control_predictors,
        scaled_treated_predictors,
        scaled_control_predictors,
        treated_outcome_before,
        treated_outcome_after,
        control_outcome_before,
        control_outcome_after,
    })
}

/// Extract a column as `Vec<f64>`, rejecting nulls and non-finite values.
fn numeric_column(data: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let column = data.column(name)?;
    let cast = column.cast(&DataType::Float64).map_err(|_| PanelError::Schema {
        column: name.to_string(),
        reason: format!("has dtype {} which is not numeric", column.dtype()),
    })?;
    let values = cast.f64()?;
    let mut out = Vec::with_capacity(values.len());
    for (row, value) in values.into_iter().enumerate() {
        match value {
            Some(v) if v.is_finite() => out.push(v),
            Some(_) => {
                return Err(PanelError::Schema {
                    column: name.to_string(),
                    reason: format!("contains a non-finite value at row {row}"),
                });
            }
            None => {
                return Err(PanelError::Schema {
                    column: name.to_string(),
                    reason: format!("contains a null at row {row}"),
                });
            }
        }
    }
    Ok(out)
}

/// Extract the unit-id column, which must be a string column without nulls.
fn unit_column(data: &DataFrame, name: &str) -> Result<Vec<String>> {
    let column = data.column(name)?;
    if column.dtype() != &DataType::String {
        return Err(PanelError::Schema {
            column: name.to_string(),
            reason: format!("has dtype {} but unit ids must be strings", column.dtype()),
        });
    }
    let values = column.str()?;
    let mut out = Vec::with_capacity(values.len());
    for (row, value) in values.into_iter().enumerate() {
        match value {
            Some(v) => out.push(v.to_string()),
            None => {
                return Err(PanelError::Schema {
                    column: name.to_string(),
                    reason: format!("contains a null at row {row}"),
                });
            }
        }
    }
    Ok(out)
}

/// Sort one unit's rows by ascending time and split them at the cutoff.
/// The cutoff itself belongs to the "after" regime.
fn split_at_cutoff(
    rows: &[usize],
    times: &[f64],
    cutoff: f64,
    unit: &str,
) -> Result<(Vec<usize>, Vec<usize>)> {
    let mut ordered = rows.to_vec();
    // Times are validated finite, so the comparison is total in practice.
    ordered.sort_by(|a, b| {
        times[*a]
            .partial_cmp(&times[*b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    for pair in ordered.windows(2) {
        if times[pair[0]] == times[pair[1]] {
            return Err(PanelError::Degenerate {
                reason: format!("duplicate time value {} for unit '{unit}'", times[pair[0]]),
            });
        }
    }
    let mut before = Vec::new();
    let mut after = Vec::new();
    for row in ordered {
        if times[row] < cutoff {
            before.push(row);
        } else {
            after.push(row);
        }
    }
    Ok((before, after))
}

fn mean_over(rows: &[usize], values: &[f64]) -> f64 {
    rows.iter().map(|&r| values[r]).sum::<f64>() / rows.len() as f64
}

/// Population standard deviation (divide by N, not N-1).
fn population_std(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn spec() -> PanelSpec {
        PanelSpec {
            outcome: "gdp".to_string(),
            unit: "region".to_string(),
            time: "year".to_string(),
            cutoff: 1992.0,
            treated: "north".to_string(),
            exclude: vec![],
        }
    }

    fn panel() -> DataFrame {
        // Three units, two pre-treatment years (1990, 1991), one post (1992).
        df!(
            "region" => ["north", "north", "north", "east", "east", "east", "west", "west", "west"],
            "year" => [1990.0, 1991.0, 1992.0, 1990.0, 1991.0, 1992.0, 1990.0, 1991.0, 1992.0],
            "gdp" => [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0],
            "invest" => [10.0, 12.0, 14.0, 20.0, 22.0, 24.0, 30.0, 32.0, 34.0],
        )
        .unwrap()
    }

    #[test]
    fn population_std_divides_by_n() {
        // Var([1, 3]) = 1 with the population convention, 2 with the sample one.
        assert_relative_eq!(population_std(&[1.0, 3.0]), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn builds_expected_dimensions_and_order() {
        let m = build_matrices(&panel(), &spec()).unwrap();
        assert_eq!(m.num_predictors(), 1);
        assert_eq!(m.num_control_units(), 2);
        assert_eq!(m.pre_periods(), 2);
        assert_eq!(m.post_periods(), 1);
        assert_eq!(m.control_units(), ["east".to_string(), "west".to_string()]);
        assert_eq!(m.predictor_names(), ["invest".to_string()]);
        // Pre-treatment averages of "invest": north 11, east 21, west 31.
        assert_relative_eq!(m.treated_predictors()[0], 11.0);
        assert_relative_eq!(m.control_predictors()[[0, 0]], 21.0);
        assert_relative_eq!(m.control_predictors()[[0, 1]], 31.0);
    }

    #[test]
    fn outcome_paths_follow_time_order() {
        let m = build_matrices(&panel(), &spec()).unwrap();
        assert_eq!(m.treated_outcome_before().to_vec(), vec![1.0, 2.0]);
        assert_eq!(m.treated_outcome_after().to_vec(), vec![3.0]);
        assert_eq!(m.control_outcome_before()[[1, 0]], 5.0);
        assert_eq!(m.control_outcome_after()[[0, 1]], 9.0);
    }

    #[test]
    fn rescaling_divides_by_population_std() {
        let m = build_matrices(&panel(), &spec()).unwrap();
        let sd = population_std(&[11.0, 21.0, 31.0]);
        assert_relative_eq!(m.predictor_scales()[0], sd, epsilon = 1e-12);
        assert_relative_eq!(m.scaled_treated_predictors()[0], 11.0 / sd, epsilon = 1e-12);
        assert_relative_eq!(
            m.scaled_control_predictors()[[0, 1]],
            31.0 / sd,
            epsilon = 1e-12
        );
    }

    #[test]
    fn missing_treated_unit_is_not_found() {
        let mut s = spec();
        s.treated = "south".to_string();
        let err = build_matrices(&panel(), &s).unwrap_err();
        assert!(matches!(err, PanelError::NotFound { kind: "treated unit", .. }));
    }

    #[test]
    fn missing_excluded_column_is_not_found() {
        let mut s = spec();
        s.exclude = vec!["population".to_string()];
        let err = build_matrices(&panel(), &s).unwrap_err();
        assert!(matches!(err, PanelError::NotFound { kind: "excluded column", .. }));
    }

    #[test]
    fn missing_outcome_column_is_schema_error() {
        let mut s = spec();
        s.outcome = "income".to_string();
        let err = build_matrices(&panel(), &s).unwrap_err();
        assert!(matches!(err, PanelError::Schema { .. }));
    }

    #[test]
    fn numeric_unit_column_is_schema_error() {
        let data = df!(
            "region" => [1i64, 2, 3],
            "year" => [1990.0, 1990.0, 1990.0],
            "gdp" => [1.0, 2.0, 3.0],
            "invest" => [1.0, 2.0, 3.0],
        )
        .unwrap();
        let err = build_matrices(&data, &spec()).unwrap_err();
        assert!(matches!(err, PanelError::Schema { .. }));
    }

    #[test]
    fn unbalanced_panel_is_shape_error() {
        // "west" is missing its 1991 row.
        let data = df!(
            "region" => ["north", "north", "north", "east", "east", "east", "west", "west"],
            "year" => [1990.0, 1991.0, 1992.0, 1990.0, 1991.0, 1992.0, 1990.0, 1992.0],
            "gdp" => [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 9.0],
            "invest" => [10.0, 12.0, 14.0, 20.0, 22.0, 24.0, 30.0, 34.0],
        )
        .unwrap();
        let err = build_matrices(&data, &spec()).unwrap_err();
        assert!(matches!(
            err,
            PanelError::Shape { regime: "pre-treatment", expected: 2, actual: 1, .. }
        ));
    }

    #[test]
    fn null_cell_is_schema_error() {
        let data = df!(
            "region" => ["north", "north", "east", "east"],
            "year" => [1990.0, 1992.0, 1990.0, 1992.0],
            "gdp" => [Some(1.0), None, Some(4.0), Some(6.0)],
            "invest" => [10.0, 14.0, 20.0, 24.0],
        )
        .unwrap();
        let err = build_matrices(&data, &spec()).unwrap_err();
        assert!(matches!(err, PanelError::Schema { ref column, .. } if column == "gdp"));
    }

    #[test]
    fn duplicate_time_within_a_unit_is_degenerate() {
        let data = df!(
            "region" => ["north", "north", "north", "east", "east", "east"],
            "year" => [1990.0, 1990.0, 1992.0, 1990.0, 1991.0, 1992.0],
            "gdp" => [1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            "invest" => [10.0, 12.0, 14.0, 20.0, 22.0, 24.0],
        )
        .unwrap();
        let err = build_matrices(&data, &spec()).unwrap_err();
        assert!(matches!(err, PanelError::Degenerate { .. }));
    }

    #[test]
    fn zero_pre_treatment_periods_is_shape_error() {
        // Every row sits at or after the cutoff.
        let mut s = spec();
        s.cutoff = 1980.0;
        let err = build_matrices(&panel(), &s).unwrap_err();
        assert!(matches!(
            err,
            PanelError::Shape { regime: "pre-treatment", actual: 0, .. }
        ));
    }

    #[test]
    fn panel_without_control_units_is_degenerate() {
        let data = df!(
            "region" => ["north", "north", "north"],
            "year" => [1990.0, 1991.0, 1992.0],
            "gdp" => [1.0, 2.0, 3.0],
            "invest" => [10.0, 12.0, 14.0],
        )
        .unwrap();
        let err = build_matrices(&data, &spec()).unwrap_err();
        assert!(matches!(err, PanelError::Degenerate { .. }));
    }

    #[test]
    fn zero_variance_predictor_is_rejected() {
        let data = df!(
            "region" => ["north", "north", "north", "east", "east", "east"],
            "year" => [1990.0, 1991.0, 1992.0, 1990.0, 1991.0, 1992.0],
            "gdp" => [1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            "flat" => [7.0, 7.0, 7.0, 7.0, 7.0, 7.0],
        )
        .unwrap();
        let err = build_matrices(&data, &spec()).unwrap_err();
        assert!(matches!(err, PanelError::ZeroVariance { ref predictor } if predictor == "flat"));
    }

    #[test]
    fn excluded_columns_are_dropped_from_predictors() {
        let mut s = spec();
        s.exclude = vec!["invest".to_string()];
        let err = build_matrices(&panel(), &s).unwrap_err();
        assert!(matches!(err, PanelError::Degenerate { .. }));
    }
}
