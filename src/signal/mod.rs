//! Signal generation module
//!
//! Decides whether an instrument fires from its recent closed candles and,
//! optionally, its open interest history.

mod conditions;
mod pipeline;
mod types;

pub use conditions::{
    trend_context, volume_metrics, Breakout, CandleShape, Condition, Detail, OpenInterestSurge,
    SignalInput, Verdict, VolumeSpike,
};
pub use pipeline::DecisionPipeline;
pub use types::{
    BreakoutMetrics, CandleColor, CandleShapeMetrics, ConditionOutcome, ConditionTag, Evaluation,
    EvaluationError, OpenInterestMetrics, SignalMetrics, TrendContext, VolumeMetrics,
};
