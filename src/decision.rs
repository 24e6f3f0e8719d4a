//! Weighted multi-factor scoring engine: decides
//! Idle/Heat/Cool from whichever of the four named parameters have a
//! rating available this tick.

use std::collections::HashMap;

use rust_decimal::Decimal;
use tracing::debug;

use crate::domain::State;

pub const INTERNAL_TEMPERATURE: &str = "internal_temperature";
pub const EXTERNAL_TEMPERATURE: &str = "external_temperature";
pub const HISTORY_TEMPERATURE: &str = "history_temperature";
pub const ENERGY_COST: &str = "energy_cost";

/// Multiplies the final weighted score before thresholding. A
/// documented, intentional side effect: with only one parameter present
/// its normalized contribution already saturates at `|rating|/|rating|
/// = 1`, so `SCORE_MODIFIER` alone decides whether that single
/// parameter's sign crosses the threshold — single-parameter runs are
/// always maximally confident. Not fixed; see `DESIGN.md`.
const SCORE_MODIFIER: &str = "1.5";

const HEAT_THRESHOLD: &str = "0.45";
const COOL_THRESHOLD: &str = "-0.45";

fn score_modifier() -> Decimal {
    SCORE_MODIFIER.parse().expect("valid decimal literal")
}

fn heat_threshold() -> Decimal {
    HEAT_THRESHOLD.parse().expect("valid decimal literal")
}

fn cool_threshold() -> Decimal {
    COOL_THRESHOLD.parse().expect("valid decimal literal")
}

/// Default weight table. Must sum to 1.
fn default_weights() -> HashMap<&'static str, Decimal> {
    let mut weights = HashMap::new();
    weights.insert(INTERNAL_TEMPERATURE, Decimal::new(40, 2));
    weights.insert(EXTERNAL_TEMPERATURE, Decimal::new(20, 2));
    weights.insert(HISTORY_TEMPERATURE, Decimal::new(20, 2));
    weights.insert(ENERGY_COST, Decimal::new(20, 2));
    weights
}

/// `{parameter -> (weight, rating)}`, after renormalization.
pub type DecisionMatrix = HashMap<&'static str, (Decimal, Decimal)>;

pub struct DecisionEngine {
    weights: HashMap<&'static str, Decimal>,
}

impl Default for DecisionEngine {
    fn default() -> Self {
        DecisionEngine { weights: default_weights() }
    }
}

impl DecisionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Matches each `(name, rating)` pair to its weight, drops anything
    /// with no matching weight, and — if fewer than all four parameters
    /// ended up present — renormalizes so the present weights still sum
    /// to 1.
    pub fn build(&self, params: &[(&'static str, Decimal)]) -> DecisionMatrix {
        let mut matrix = DecisionMatrix::new();
        let mut total_weight = Decimal::ZERO;

        for &(name, rating) in params {
            if let Some(&weight) = self.weights.get(name) {
                matrix.insert(name, (weight, rating));
                total_weight += weight;
            }
            debug!(parameter = name, rating = %rating, "decision matrix input");
        }

        if matrix.len() != self.weights.len() && total_weight != Decimal::ZERO {
            for (weight, _rating) in matrix.values_mut() {
                *weight /= total_weight;
            }
        }

        matrix
    }

    /// Sums `weight * (rating / total_rating)` across the matrix,
    /// multiplies by `SCORE_MODIFIER`, and thresholds. Returns `Idle`
    /// without dividing when every rating is zero (`total_rating == 0`)
    /// or the matrix is empty.
    pub fn evaluate(&self, matrix: &DecisionMatrix) -> State {
        if matrix.is_empty() {
            return State::Idle;
        }

        let total_rating: Decimal = matrix.values().map(|(_, rating)| *rating).sum();
        if total_rating == Decimal::ZERO {
            return State::Idle;
        }

        let total_score: Decimal = matrix
            .values()
            .map(|(weight, rating)| *weight * (*rating / total_rating))
            .sum();
        let final_score = total_score * score_modifier();
        debug!(%total_rating, %total_score, %final_score, "decision matrix evaluated");

        if final_score > heat_threshold() {
            State::Heat
        } else if final_score < cool_threshold() {
            State::Cool
        } else {
            State::Idle
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn full_matrix_sums_without_renormalizing() {
        let engine = DecisionEngine::new();
        let matrix = engine.build(&[
            (INTERNAL_TEMPERATURE, dec!(1)),
            (EXTERNAL_TEMPERATURE, dec!(1)),
            (HISTORY_TEMPERATURE, dec!(1)),
            (ENERGY_COST, dec!(1)),
        ]);
        assert_eq!(matrix.len(), 4);
        assert_eq!(matrix[INTERNAL_TEMPERATURE].0, dec!(0.40));
    }

    #[test]
    fn missing_parameter_renormalizes_remaining_weights() {
        let engine = DecisionEngine::new();
        let matrix = engine.build(&[(INTERNAL_TEMPERATURE, dec!(1)), (EXTERNAL_TEMPERATURE, dec!(1))]);
        assert_eq!(matrix.len(), 2);
        let total: Decimal = matrix.values().map(|(w, _)| *w).sum();
        assert_eq!(total, dec!(1));
    }

    #[test]
    fn unknown_parameter_name_is_dropped() {
        let engine = DecisionEngine::new();
        let matrix = engine.build(&[("not_a_real_parameter", dec!(1))]);
        assert!(matrix.is_empty());
    }

    #[test]
    fn single_parameter_saturates_to_heat() {
        let engine = DecisionEngine::new();
        let matrix = engine.build(&[(INTERNAL_TEMPERATURE, dec!(2))]);
        assert_eq!(engine.evaluate(&matrix), State::Heat);
    }

    #[test]
    fn negative_rating_drives_cool() {
        let engine = DecisionEngine::new();
        let matrix = engine.build(&[(INTERNAL_TEMPERATURE, dec!(-2))]);
        assert_eq!(engine.evaluate(&matrix), State::Cool);
    }

    #[test]
    fn zero_total_rating_is_idle() {
        let engine = DecisionEngine::new();
        let matrix = engine.build(&[(INTERNAL_TEMPERATURE, dec!(0))]);
        assert_eq!(engine.evaluate(&matrix), State::Idle);
    }

    #[test]
    fn empty_matrix_is_idle() {
        let engine = DecisionEngine::new();
        assert_eq!(engine.evaluate(&DecisionMatrix::new()), State::Idle);
    }
}
