//! Condition evaluators
//!
//! Each condition looks at the same read-only input and answers with a
//! tri-state outcome. The pipeline combines them by conjunction.

use super::types::{
    BreakoutMetrics, CandleColor, CandleShapeMetrics, ConditionOutcome, ConditionTag,
    OpenInterestMetrics, TrendContext, VolumeMetrics,
};
use crate::config::VolumeBasis;
use crate::exchange::{Candle, OpenInterest};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Read-only data for one instrument, oldest first
#[derive(Debug, Clone, Copy)]
pub struct SignalInput<'a> {
    pub candles: &'a [Candle],
    /// `None` when the history was not fetched
    pub open_interest: Option<&'a OpenInterest>,
}

/// Extra diagnostics a condition reports alongside its outcome
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Detail {
    Breakout(BreakoutMetrics),
    OpenInterest(OpenInterestMetrics),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verdict {
    pub outcome: ConditionOutcome,
    pub detail: Option<Detail>,
}

impl Verdict {
    fn of(passed: bool) -> Self {
        Self {
            outcome: if passed {
                ConditionOutcome::Pass
            } else {
                ConditionOutcome::Fail
            },
            detail: None,
        }
    }

    fn with(mut self, detail: Detail) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// One independently composable firing condition
pub trait Condition: Send + Sync {
    fn tag(&self) -> ConditionTag;

    /// Whether the condition reads the open interest history
    fn needs_open_interest(&self) -> bool {
        false
    }

    /// Minimum number of closed candles the condition looks at
    fn candles_needed(&self) -> usize;

    fn evaluate(&self, input: &SignalInput<'_>) -> Verdict;
}

fn mean(values: impl Iterator<Item = Decimal>) -> Decimal {
    let (sum, count) = values.fold((Decimal::ZERO, 0u32), |(sum, n), v| (sum + v, n + 1));
    if count == 0 {
        Decimal::ZERO
    } else {
        sum / Decimal::from(count)
    }
}

/// Recent and baseline volume averages over the tail of `candles`.
///
/// The recent window is the last `recent` candles, the baseline the
/// `baseline` candles right before it.
pub fn volume_metrics(
    candles: &[Candle],
    recent: usize,
    baseline: usize,
    basis: VolumeBasis,
    threshold: Decimal,
) -> VolumeMetrics {
    let n = candles.len();
    let split = n.saturating_sub(recent);
    let start = split.saturating_sub(baseline);

    let recent_avg = mean(candles[split..].iter().map(|c| c.volume_in(basis)));
    let baseline_avg = mean(candles[start..split].iter().map(|c| c.volume_in(basis)));

    let ratio = if baseline_avg > Decimal::ZERO {
        recent_avg.checked_div(baseline_avg)
    } else {
        None
    };

    VolumeMetrics {
        recent_avg,
        baseline_avg,
        ratio,
        threshold,
    }
}

impl CandleShapeMetrics {
    pub fn of(candle: &Candle) -> Self {
        let range = candle.range();
        if range <= Decimal::ZERO {
            return Self {
                color: CandleColor::Doji,
                body_pct: Decimal::ZERO,
                upper_wick_pct: Decimal::ZERO,
                lower_wick_pct: Decimal::ZERO,
            };
        }

        let top = candle.open.max(candle.close);
        let bottom = candle.open.min(candle.close);
        let pct = |part: Decimal| (part / range * dec!(100)).round_dp(1);

        Self {
            color: if candle.close >= candle.open {
                CandleColor::Green
            } else {
                CandleColor::Red
            },
            body_pct: pct(top - bottom),
            upper_wick_pct: pct(candle.high - top),
            lower_wick_pct: pct(bottom - candle.low),
        }
    }
}

/// Green count and pattern over the last `count` candles
pub fn trend_context(candles: &[Candle], count: usize) -> TrendContext {
    let tail = &candles[candles.len().saturating_sub(count)..];
    let pattern: String = tail
        .iter()
        .map(|c| if c.is_green() { 'G' } else { 'R' })
        .collect();

    TrendContext {
        green: tail.iter().filter(|c| c.is_green()).count(),
        total: tail.len(),
        pattern,
    }
}

/// Recent average volume at least `multiplier` times the baseline average
#[derive(Debug, Clone)]
pub struct VolumeSpike {
    pub recent: usize,
    pub baseline: usize,
    pub multiplier: Decimal,
    pub basis: VolumeBasis,
}

impl Condition for VolumeSpike {
    fn tag(&self) -> ConditionTag {
        ConditionTag::VolumeSpike
    }

    fn candles_needed(&self) -> usize {
        self.recent + self.baseline
    }

    fn evaluate(&self, input: &SignalInput<'_>) -> Verdict {
        let volume = volume_metrics(
            input.candles,
            self.recent,
            self.baseline,
            self.basis,
            self.multiplier,
        );
        // dead baseline never fires
        Verdict::of(volume.ratio.is_some_and(|r| r >= self.multiplier))
    }
}

/// Shape checks on the most recent candle. A zero threshold disables the
/// corresponding check.
#[derive(Debug, Clone)]
pub struct CandleShape {
    pub bullish_required: bool,
    pub max_upper_wick_pct: Decimal,
    pub min_body_pct: Decimal,
}

impl CandleShape {
    fn is_active(&self) -> bool {
        self.bullish_required
            || self.max_upper_wick_pct > Decimal::ZERO
            || self.min_body_pct > Decimal::ZERO
    }
}

impl Condition for CandleShape {
    fn tag(&self) -> ConditionTag {
        ConditionTag::CandleShape
    }

    fn candles_needed(&self) -> usize {
        1
    }

    fn evaluate(&self, input: &SignalInput<'_>) -> Verdict {
        if !self.is_active() {
            return Verdict {
                outcome: ConditionOutcome::NotApplicable,
                detail: None,
            };
        }
        let Some(last) = input.candles.last() else {
            return Verdict::of(false);
        };

        let shape = CandleShapeMetrics::of(last);
        let bullish_ok = !self.bullish_required || shape.color == CandleColor::Green;
        let wick_ok = self.max_upper_wick_pct <= Decimal::ZERO
            || shape.upper_wick_pct <= self.max_upper_wick_pct;
        let body_ok = self.min_body_pct <= Decimal::ZERO || shape.body_pct >= self.min_body_pct;

        Verdict::of(bullish_ok && wick_ok && body_ok)
    }
}

/// Last close strictly above the highest high of the preceding `lookback`
/// candles
#[derive(Debug, Clone)]
pub struct Breakout {
    pub lookback: usize,
}

impl Condition for Breakout {
    fn tag(&self) -> ConditionTag {
        ConditionTag::Breakout
    }

    fn candles_needed(&self) -> usize {
        self.lookback + 1
    }

    fn evaluate(&self, input: &SignalInput<'_>) -> Verdict {
        let candles = input.candles;
        let Some((last, before)) = candles.split_last() else {
            return Verdict::of(false);
        };
        let window = &before[before.len().saturating_sub(self.lookback)..];
        let Some(level) = window.iter().map(|c| c.high).max() else {
            return Verdict::of(false);
        };

        let confirmed = last.close > level;
        let margin_pct = if level > Decimal::ZERO {
            (last.close - level)
                .checked_div(level)
                .map(|m| m * dec!(100))
        } else {
            None
        };

        Verdict::of(confirmed).with(Detail::Breakout(BreakoutMetrics {
            level,
            close: last.close,
            confirmed,
            margin_pct,
        }))
    }
}

/// Latest open interest value at least `min_increase_pct` above the mean of
/// the `periods` points before it.
///
/// Missing history fails the condition outright.
#[derive(Debug, Clone)]
pub struct OpenInterestSurge {
    pub periods: usize,
    pub min_increase_pct: Decimal,
}

impl OpenInterestSurge {
    fn measure(&self, open_interest: Option<&OpenInterest>) -> OpenInterestMetrics {
        let unavailable = OpenInterestMetrics::unavailable(self.min_increase_pct);

        let points = match open_interest {
            Some(OpenInterest::Available(points)) if points.len() > self.periods => points,
            _ => return unavailable,
        };
        let tail = &points[points.len() - self.periods - 1..];
        let Some((current, history)) = tail.split_last() else {
            return unavailable;
        };

        let baseline_mean = mean(history.iter().map(|p| p.open_interest_value));
        if baseline_mean <= Decimal::ZERO {
            return unavailable;
        }
        let current = current.open_interest_value;

        OpenInterestMetrics {
            available: true,
            current: Some(current),
            baseline_mean: Some(baseline_mean),
            change_pct: (current - baseline_mean)
                .checked_div(baseline_mean)
                .map(|c| c * dec!(100)),
            min_increase_pct: self.min_increase_pct,
        }
    }
}

impl Condition for OpenInterestSurge {
    fn tag(&self) -> ConditionTag {
        ConditionTag::OpenInterestSurge
    }

    fn needs_open_interest(&self) -> bool {
        true
    }

    fn candles_needed(&self) -> usize {
        0
    }

    fn evaluate(&self, input: &SignalInput<'_>) -> Verdict {
        let metrics = self.measure(input.open_interest);
        let passed = match (metrics.current, metrics.baseline_mean) {
            (Some(current), Some(mean)) if metrics.available => {
                current >= mean * (Decimal::ONE + self.min_increase_pct / dec!(100))
            }
            _ => false,
        };
        Verdict::of(passed).with(Detail::OpenInterest(metrics))
    }
}
