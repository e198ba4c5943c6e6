//! Decision pipeline

use super::conditions::{
    trend_context, volume_metrics, Breakout, CandleShape, Condition, Detail, OpenInterestSurge,
    SignalInput, VolumeSpike,
};
use super::types::{
    CandleShapeMetrics, ConditionOutcome, Evaluation, EvaluationError, SignalMetrics,
};
use crate::config::{Config, VolumeBasis};
use crate::exchange::{Candle, OpenInterest};
use rust_decimal::Decimal;

/// Combines the enabled conditions into a fire decision.
///
/// Evaluation is a pure function of the candles and open interest passed in:
/// no I/O, no clock, no shared state.
pub struct DecisionPipeline {
    conditions: Vec<Box<dyn Condition>>,
    recent: usize,
    baseline: usize,
    multiplier: Decimal,
    basis: VolumeBasis,
    trend_candles: usize,
    required: usize,
}

impl DecisionPipeline {
    pub fn from_config(config: &Config) -> Self {
        let sc = &config.scanner;
        let mut conditions: Vec<Box<dyn Condition>> = vec![
            Box::new(VolumeSpike {
                recent: sc.volume_recent_candles,
                baseline: sc.volume_baseline_candles,
                multiplier: sc.volume_multiplier,
                basis: sc.volume_basis,
            }),
            Box::new(CandleShape {
                bullish_required: config.candle.bullish_required,
                max_upper_wick_pct: config.candle.max_upper_wick_pct,
                min_body_pct: config.candle.min_body_pct,
            }),
        ];
        if config.breakout.enabled {
            conditions.push(Box::new(Breakout {
                lookback: config.breakout.lookback,
            }));
        }
        if config.open_interest.enabled {
            conditions.push(Box::new(OpenInterestSurge {
                periods: config.open_interest.periods,
                min_increase_pct: config.open_interest.min_increase_pct,
            }));
        }

        let required = conditions
            .iter()
            .map(|c| c.candles_needed())
            .chain([config.candle.trend_candles, 1])
            .max()
            .unwrap_or(1);

        Self {
            conditions,
            recent: sc.volume_recent_candles,
            baseline: sc.volume_baseline_candles,
            multiplier: sc.volume_multiplier,
            basis: sc.volume_basis,
            trend_candles: config.candle.trend_candles,
            required,
        }
    }

    /// Closed candles an evaluation needs
    pub fn required_candles(&self) -> usize {
        self.required
    }

    /// Whether any enabled condition reads open interest history
    pub fn needs_open_interest(&self) -> bool {
        self.conditions.iter().any(|c| c.needs_open_interest())
    }

    /// Evaluate only the candle-based conditions.
    ///
    /// Used to decide whether open interest is worth fetching: when this does
    /// not fire, the full evaluation cannot fire either.
    pub fn prescreen(&self, candles: &[Candle]) -> Result<Evaluation, EvaluationError> {
        self.run(candles, None, false)
    }

    /// Evaluate every enabled condition
    pub fn evaluate(
        &self,
        candles: &[Candle],
        open_interest: Option<&OpenInterest>,
    ) -> Result<Evaluation, EvaluationError> {
        self.run(candles, open_interest, true)
    }

    fn run(
        &self,
        candles: &[Candle],
        open_interest: Option<&OpenInterest>,
        with_open_interest: bool,
    ) -> Result<Evaluation, EvaluationError> {
        let last = match candles.last() {
            Some(last) if candles.len() >= self.required => last,
            _ => {
                return Err(EvaluationError::InsufficientCandles {
                    needed: self.required,
                    got: candles.len(),
                })
            }
        };

        let input = SignalInput {
            candles,
            open_interest,
        };
        let mut metrics = SignalMetrics {
            candle_open_time: last.open_time,
            last_close: last.close,
            volume: volume_metrics(
                candles,
                self.recent,
                self.baseline,
                self.basis,
                self.multiplier,
            ),
            candle: CandleShapeMetrics::of(last),
            breakout: None,
            open_interest: None,
            trend: trend_context(candles, self.trend_candles),
        };

        let mut reasons = Vec::new();
        let mut failed = Vec::new();
        for condition in &self.conditions {
            if condition.needs_open_interest() && !with_open_interest {
                continue;
            }
            let verdict = condition.evaluate(&input);
            match verdict.detail {
                Some(Detail::Breakout(b)) => metrics.breakout = Some(b),
                Some(Detail::OpenInterest(oi)) => metrics.open_interest = Some(oi),
                None => {}
            }
            match verdict.outcome {
                ConditionOutcome::Pass => reasons.push(condition.tag()),
                ConditionOutcome::Fail => failed.push(condition.tag()),
                ConditionOutcome::NotApplicable => {}
            }
        }

        Ok(Evaluation {
            fire: failed.is_empty() && !reasons.is_empty(),
            reasons,
            failed,
            metrics,
        })
    }
}
