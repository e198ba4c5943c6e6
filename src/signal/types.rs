//! Signal types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Condition that contributed to a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConditionTag {
    /// Recent volume at least `volume_multiplier` times the baseline
    VolumeSpike,
    /// Last candle passed the shape checks
    CandleShape,
    /// Close above the lookback high
    Breakout,
    /// Open interest above its recent mean
    OpenInterestSurge,
}

impl ConditionTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionTag::VolumeSpike => "volume-spike",
            ConditionTag::CandleShape => "candle-shape",
            ConditionTag::Breakout => "breakout",
            ConditionTag::OpenInterestSurge => "open-interest-surge",
        }
    }
}

impl fmt::Display for ConditionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tri-state result of one condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOutcome {
    /// Disabled, does not take part in the decision
    NotApplicable,
    Pass,
    Fail,
}

/// Color of a candle body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandleColor {
    Green,
    Red,
    /// Zero range
    Doji,
}

impl fmt::Display for CandleColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CandleColor::Green => "GREEN",
            CandleColor::Red => "RED",
            CandleColor::Doji => "DOJI",
        };
        f.write_str(s)
    }
}

/// Volume averages behind the spike check
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeMetrics {
    pub recent_avg: Decimal,
    pub baseline_avg: Decimal,
    /// `None` when the baseline average is zero
    pub ratio: Option<Decimal>,
    pub threshold: Decimal,
}

/// Shape of the most recent closed candle, as percentages of its range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CandleShapeMetrics {
    pub color: CandleColor,
    pub body_pct: Decimal,
    pub upper_wick_pct: Decimal,
    pub lower_wick_pct: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreakoutMetrics {
    /// Highest high of the lookback window
    pub level: Decimal,
    pub close: Decimal,
    pub confirmed: bool,
    /// Distance above the level in percent
    pub margin_pct: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OpenInterestMetrics {
    /// False when the history was missing or too short
    pub available: bool,
    pub current: Option<Decimal>,
    pub baseline_mean: Option<Decimal>,
    pub change_pct: Option<Decimal>,
    pub min_increase_pct: Decimal,
}

impl OpenInterestMetrics {
    pub(crate) fn unavailable(min_increase_pct: Decimal) -> Self {
        Self {
            available: false,
            current: None,
            baseline_mean: None,
            change_pct: None,
            min_increase_pct,
        }
    }
}

/// Direction of the last few candles
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendContext {
    pub green: usize,
    pub total: usize,
    /// One letter per candle, oldest first: `G` green, `R` otherwise
    pub pattern: String,
}

/// Diagnostic values gathered during an evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalMetrics {
    pub candle_open_time: DateTime<Utc>,
    pub last_close: Decimal,
    pub volume: VolumeMetrics,
    pub candle: CandleShapeMetrics,
    /// Present when the breakout condition is enabled
    pub breakout: Option<BreakoutMetrics>,
    /// Present when the open interest condition is enabled
    pub open_interest: Option<OpenInterestMetrics>,
    pub trend: TrendContext,
}

/// Outcome of the decision pipeline for one instrument
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub fire: bool,
    /// Satisfied conditions, in evaluation order
    pub reasons: Vec<ConditionTag>,
    /// Conditions that failed
    pub failed: Vec<ConditionTag>,
    pub metrics: SignalMetrics,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EvaluationError {
    #[error("insufficient candles: need {needed}, got {got}")]
    InsufficientCandles { needed: usize, got: usize },
}
