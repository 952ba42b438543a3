//! Convergence tracker: pure, stateless dynamics over a sequence of
//! [`ConvergencePoint`]s. Every signal here is recomputed from the point
//! sequence handed in — nothing is cached across calls — so the watchdog
//! and hatchery can call this as often as they like without worrying about
//! staleness.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The four finality dimensions, kept as a named struct rather than a map
/// so callers get compile-time field access; [`DIMENSION_WEIGHTS`] is the
/// ordered list used wherever code needs to iterate them (the watchdog's
/// phase order in particular).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DimensionScores {
    pub claim_confidence: f64,
    pub contradiction_resolution: f64,
    pub goal_completion: f64,
    pub risk_score_inverse: f64,
}

impl DimensionScores {
    pub fn get(&self, dimension: &str) -> Option<f64> {
        match dimension {
            "claim_confidence" => Some(self.claim_confidence),
            "contradiction_resolution" => Some(self.contradiction_resolution),
            "goal_completion" => Some(self.goal_completion),
            "risk_score_inverse" => Some(self.risk_score_inverse),
            _ => None,
        }
    }
}

/// `(dimension, weight)` in the watchdog's phase order: contradiction
/// resolution first, then claim confidence, then goal completion, then the
/// inverted risk score. Weights mirror the finality evaluator's
/// `goal_score_total` mix.
pub const DIMENSION_WEIGHTS: &[(&str, f64)] = &[
    ("contradiction_resolution", 0.30),
    ("claim_confidence", 0.30),
    ("goal_completion", 0.25),
    ("risk_score_inverse", 0.15),
];

pub fn weighted_total(dims: &DimensionScores) -> f64 {
    DIMENSION_WEIGHTS
        .iter()
        .map(|(name, weight)| weight * dims.get(name).unwrap_or(0.0))
        .sum()
}

/// One epoch's worth of finality signal, as persisted for the convergence
/// math. `pressure` and `lyapunov_v` are computed once at construction time
/// so a point is a complete, replayable record of what the tracker saw.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergencePoint {
    pub epoch: i64,
    pub goal_score: f64,
    pub lyapunov_v: f64,
    pub dimension_scores: DimensionScores,
    pub pressure: HashMap<String, f64>,
    pub created_at: DateTime<Utc>,
}

impl ConvergencePoint {
    /// Builds a point from a dimension snapshot: `goal_score` is the
    /// weighted total, `lyapunov_v` is its complement (a simple candidate
    /// Lyapunov function — decreasing as the system approaches finality),
    /// and `pressure[dim] = weight * (1 - dim_score)`, the marginal
    /// finality gain from closing that dimension's gap.
    pub fn new(epoch: i64, dims: DimensionScores, created_at: DateTime<Utc>) -> Self {
        let goal_score = weighted_total(&dims);
        let pressure = DIMENSION_WEIGHTS
            .iter()
            .map(|(name, weight)| {
                let score = dims.get(name).unwrap_or(0.0);
                (name.to_string(), weight * (1.0 - score))
            })
            .collect();
        Self {
            epoch,
            goal_score,
            lyapunov_v: 1.0 - goal_score,
            dimension_scores: dims,
            pressure,
            created_at,
        }
    }
}

/// Tuning knobs for the dynamics below; every field has a documented
/// default.
#[derive(Debug, Clone, Copy)]
pub struct ConvergenceConfig {
    /// EMA window (β) over per-step progress ratios.
    pub ema_window: u32,
    /// EMA must stay below this for `plateau_window` consecutive steps to
    /// call it a plateau.
    pub plateau_threshold: f64,
    /// τ: consecutive steps required to confirm a plateau.
    pub plateau_window: u32,
    /// ε: minimum slope to treat `α` as "making progress" for ETA purposes.
    pub alpha_epsilon: f64,
    /// Expected per-round improvement used to normalize the progress ratio.
    pub target_step: f64,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            ema_window: 3,
            plateau_threshold: 0.02,
            plateau_window: 3,
            alpha_epsilon: 1e-3,
            target_step: 0.05,
        }
    }
}

/// The four convergence signals plus the pressure map, recomputed fresh
/// from whatever point sequence is passed to [`compute_signals`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceSignals {
    pub progress_ratio_ema: f64,
    pub is_plateaued: bool,
    pub is_monotonic: bool,
    pub convergence_rate: f64,
    pub estimated_rounds: Option<u64>,
    pub pressure: HashMap<String, f64>,
    pub highest_pressure_dimension: Option<String>,
}

fn clamped_progress_ratios(points: &[ConvergencePoint], target_step: f64) -> Vec<f64> {
    points
        .windows(2)
        .map(|w| {
            let delta = w[1].goal_score - w[0].goal_score;
            delta.max(0.0) / target_step.max(f64::EPSILON)
        })
        .collect()
}

/// Exponential moving average with smoothing factor `2 / (window + 1)`,
/// seeded by the first sample. Empty input yields `0.0`.
fn ema_series(samples: &[f64], window: u32) -> Vec<f64> {
    if samples.is_empty() {
        return Vec::new();
    }
    let alpha = 2.0 / (window as f64 + 1.0);
    let mut out = Vec::with_capacity(samples.len());
    let mut prev = samples[0];
    out.push(prev);
    for &x in &samples[1..] {
        prev = alpha * x + (1.0 - alpha) * prev;
        out.push(prev);
    }
    out
}

/// Least-squares slope of `goal_score` against `epoch`. Returns `0.0` for
/// fewer than two points or a degenerate (single-epoch) series, rather than
/// dividing by zero.
fn linear_regression_slope(points: &[ConvergencePoint]) -> f64 {
    let n = points.len();
    if n < 2 {
        return 0.0;
    }
    let xs: Vec<f64> = points.iter().map(|p| p.epoch as f64).collect();
    let ys: Vec<f64> = points.iter().map(|p| p.goal_score).collect();
    let x_bar = xs.iter().sum::<f64>() / n as f64;
    let y_bar = ys.iter().sum::<f64>() / n as f64;
    let mut num = 0.0;
    let mut den = 0.0;
    for i in 0..n {
        num += (xs[i] - x_bar) * (ys[i] - y_bar);
        den += (xs[i] - x_bar).powi(2);
    }
    if den.abs() < f64::EPSILON {
        0.0
    } else {
        num / den
    }
}

/// Computes every signal the watchdog and hatchery consume, over an
/// arbitrary point sequence. Safe over empty or single-point input: no
/// panics, and the "not converging, not plateaued, no ETA" defaults hold.
pub fn compute_signals(
    points: &[ConvergencePoint],
    config: &ConvergenceConfig,
    auto_threshold: f64,
) -> ConvergenceSignals {
    let ratios = clamped_progress_ratios(points, config.target_step);
    let ema = ema_series(&ratios, config.ema_window);

    let is_plateaued = if ema.len() < config.plateau_window as usize || ema.is_empty() {
        false
    } else {
        ema[ema.len() - config.plateau_window as usize..]
            .iter()
            .all(|v| *v < config.plateau_threshold)
    };

    let is_monotonic = points
        .windows(2)
        .all(|w| w[1].goal_score - w[0].goal_score >= 0.0);

    let convergence_rate = linear_regression_slope(points);

    let current_score = points.last().map(|p| p.goal_score).unwrap_or(0.0);
    let estimated_rounds = if points.is_empty() {
        None
    } else if current_score >= auto_threshold {
        Some(0)
    } else if convergence_rate > config.alpha_epsilon {
        Some(((auto_threshold - current_score) / convergence_rate).ceil() as u64)
    } else {
        None
    };

    let pressure = points
        .last()
        .map(|p| p.pressure.clone())
        .unwrap_or_default();
    let highest_pressure_dimension = DIMENSION_WEIGHTS
        .iter()
        .filter_map(|(name, _)| pressure.get(*name).map(|v| (*name, *v)))
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(name, _)| name.to_string());

    ConvergenceSignals {
        progress_ratio_ema: ema.last().copied().unwrap_or(0.0),
        is_plateaued,
        is_monotonic,
        convergence_rate,
        estimated_rounds,
        pressure,
        highest_pressure_dimension,
    }
}
