//! Derived transit features
//!
//! Domain ratios, log transforms and interaction terms computed from sanitized
//! numeric columns. Every division adds `EPSILON` to its denominator. A result that
//! is not finite is stored as missing so the cleaner can re-impute it.

use crate::errors::{CoreError, Result};
use crate::table::{Column, Table};
use std::f64::consts::PI;
use tracing::{error, instrument};

/// Added to every denominator, and substituted for zero in ratio denominators.
pub const EPSILON: f64 = 1e-10;

/// Solar effective temperature in kelvin.
const SOLAR_TEFF: f64 = 5778.0;

const LOG_CLIP_MAX: f64 = 1e10;

/// (input, log column, squared-log column), in output order.
const LOG_TRANSFORMS: [(&str, &str, &str); 5] = [
    ("period", "log_period", "log_period_squared"),
    ("duration", "log_duration", "log_duration_squared"),
    ("depth", "log_depth", "log_depth_squared"),
    ("planet_radius", "log_planet_radius", "log_planet_radius_squared"),
    ("star_radius", "log_star_radius", "log_star_radius_squared"),
];

/// Columns the derivation reads. Absence of any is a schema violation.
pub const REQUIRED_INPUTS: [&str; 7] = [
    "period",
    "duration",
    "depth",
    "planet_radius",
    "star_radius",
    "semi_major_axis",
    "teff",
];

/// Names of all derived features, in the order they are appended.
pub const DERIVED_FEATURES: [&str; 19] = [
    "transit_signal_strength",
    "radius_ratio",
    "transit_probability",
    "orbital_velocity",
    "stellar_flux",
    "transit_depth_norm",
    "habitable_zone_proxy",
    "radius_temp_interaction",
    "period_depth_interaction",
    "log_period",
    "log_period_squared",
    "log_duration",
    "log_duration_squared",
    "log_depth",
    "log_depth_squared",
    "log_planet_radius",
    "log_planet_radius_squared",
    "log_star_radius",
    "log_star_radius_squared",
];

fn required<'a>(table: &'a Table, name: &str) -> Result<&'a [Option<f64>]> {
    table.numeric(name).ok_or_else(|| {
        CoreError::Schema(format!(
            "derived features need numeric column {name}, which is {}",
            if table.has_column(name) {
                "not numeric"
            } else {
                "missing"
            }
        ))
    })
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

fn unary(values: &[Option<f64>], f: impl Fn(f64) -> f64) -> Vec<Option<f64>> {
    values.iter().map(|v| v.and_then(|x| finite(f(x)))).collect()
}

fn binary(a: &[Option<f64>], b: &[Option<f64>], f: impl Fn(f64, f64) -> f64) -> Vec<Option<f64>> {
    a.iter()
        .zip(b)
        .map(|(x, y)| match (x, y) {
            (Some(x), Some(y)) => finite(f(*x, *y)),
            _ => None,
        })
        .collect()
}

fn ternary(
    a: &[Option<f64>],
    b: &[Option<f64>],
    c: &[Option<f64>],
    f: impl Fn(f64, f64, f64) -> f64,
) -> Vec<Option<f64>> {
    a.iter()
        .zip(b)
        .zip(c)
        .map(|((x, y), z)| match (x, y, z) {
            (Some(x), Some(y), Some(z)) => finite(f(*x, *y, *z)),
            _ => None,
        })
        .collect()
}

fn log_clipped(x: f64) -> f64 {
    x.clamp(EPSILON, LOG_CLIP_MAX).ln_1p()
}

/// Append every feature in `DERIVED_FEATURES` to a copy of the table.
///
/// Fails with `CoreError::Schema` when an input column is missing or not numeric.
#[instrument(skip(table), fields(rows = table.n_rows()))]
pub fn add_derived_features(table: &Table) -> Result<Table> {
    let inputs = REQUIRED_INPUTS
        .iter()
        .map(|name| required(table, name))
        .collect::<Result<Vec<_>>>()
        .inspect_err(|err| error!("Error in feature engineering: {err}"))?;
    let (period, duration, depth, planet_radius, star_radius, sma, teff) = (
        inputs[0], inputs[1], inputs[2], inputs[3], inputs[4], inputs[5], inputs[6],
    );

    let mut derived: Vec<(&str, Vec<Option<f64>>)> = vec![
        (
            "transit_signal_strength",
            ternary(depth, duration, period, |d, t, p| d * t / (p + EPSILON)),
        ),
        (
            "radius_ratio",
            binary(planet_radius, star_radius, |rp, rs| rp / (rs + EPSILON)),
        ),
        (
            "transit_probability",
            binary(star_radius, sma, |rs, a| rs / (a + EPSILON)),
        ),
        (
            "orbital_velocity",
            binary(sma, period, |a, p| 2.0 * PI * a / (p + EPSILON)),
        ),
        (
            "stellar_flux",
            binary(teff, sma, |t, a| t.powi(4) / (a + EPSILON).powi(2)),
        ),
        (
            "transit_depth_norm",
            binary(depth, star_radius, |d, rs| d / (rs + EPSILON).powi(2)),
        ),
        (
            "habitable_zone_proxy",
            binary(teff, sma, |t, a| (t / SOLAR_TEFF).sqrt() / (a + EPSILON).sqrt()),
        ),
        (
            "radius_temp_interaction",
            binary(planet_radius, teff, |rp, t| rp * t),
        ),
        (
            "period_depth_interaction",
            binary(period, depth, |p, d| p * d.ln_1p()),
        ),
    ];

    for (input, log_name, squared_name) in LOG_TRANSFORMS {
        let values = required(table, input)?;
        derived.push((log_name, unary(values, log_clipped)));
        derived.push((squared_name, unary(values, |x| log_clipped(x).powi(2))));
    }

    let mut out = table.clone();
    for (name, values) in derived {
        out.set_column(Column::numeric(name, values))?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_table(sma: Option<f64>) -> Table {
        Table::from_columns(vec![
            Column::numeric("period", vec![Some(10.0)]),
            Column::numeric("duration", vec![Some(2.0)]),
            Column::numeric("depth", vec![Some(500.0)]),
            Column::numeric("planet_radius", vec![Some(2.0)]),
            Column::numeric("star_radius", vec![Some(1.0)]),
            Column::numeric("semi_major_axis", vec![sma]),
            Column::numeric("teff", vec![Some(5778.0)]),
        ])
        .unwrap()
    }

    #[test]
    fn computes_all_derived_columns_in_order() {
        let out = add_derived_features(&base_table(Some(0.1))).unwrap();
        let names = out.column_names();
        assert_eq!(&names[7..], &DERIVED_FEATURES[..]);

        let strength = out.numeric("transit_signal_strength").unwrap()[0].unwrap();
        assert!((strength - 100.0).abs() < 1e-6);
        let hz = out.numeric("habitable_zone_proxy").unwrap()[0].unwrap();
        assert!((hz - 1.0 / 0.1f64.sqrt()).abs() < 1e-6);
        let log_period = out.numeric("log_period").unwrap()[0].unwrap();
        assert!((log_period - 11.0f64.ln()).abs() < 1e-12);
        let squared = out.numeric("log_period_squared").unwrap()[0].unwrap();
        assert!((squared - log_period * log_period).abs() < 1e-12);
    }

    #[test]
    fn missing_inputs_propagate_as_missing() {
        let out = add_derived_features(&base_table(None)).unwrap();
        assert_eq!(out.numeric("stellar_flux").unwrap()[0], None);
        assert!(out.numeric("radius_ratio").unwrap()[0].is_some());
    }

    #[test]
    fn missing_column_is_fatal() {
        let mut table = base_table(Some(1.0));
        table.remove_column("teff");
        let err = add_derived_features(&table).unwrap_err();
        assert!(matches!(err, CoreError::Schema(_)));
    }

    #[test]
    fn non_finite_results_become_missing() {
        let mut table = base_table(Some(1.0));
        table
            .set_column(Column::numeric("depth", vec![Some(-5.0)]))
            .unwrap();
        let out = add_derived_features(&table).unwrap();
        // ln(1 + depth) is NaN for depth < -1
        assert_eq!(out.numeric("period_depth_interaction").unwrap()[0], None);
    }
}
