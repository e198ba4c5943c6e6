//! Cycle orchestrator
//!
//! Drives `Idle → RefreshingUniverse → Scanning → Sleeping` until shutdown.

mod orchestrator;

pub use orchestrator::Scanner;

use std::fmt;
use std::time::Duration;

/// Where the scan loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScannerState {
    Idle,
    RefreshingUniverse,
    Scanning,
    Sleeping,
}

impl fmt::Display for ScannerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScannerState::Idle => "idle",
            ScannerState::RefreshingUniverse => "refreshing-universe",
            ScannerState::Scanning => "scanning",
            ScannerState::Sleeping => "sleeping",
        };
        f.write_str(s)
    }
}

/// Counts from one scan cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle: u64,
    /// Instruments listed by the exchange
    pub universe: usize,
    pub excluded_by_name: usize,
    pub excluded_by_cap: usize,
    /// On cooldown, or already being evaluated
    pub suppressed: usize,
    /// Instruments that reached a decision
    pub evaluated: usize,
    /// Fires recorded in the cooldown ledger
    pub alerts: usize,
    /// Fires the transport refused
    pub delivery_failures: usize,
    /// Fetch or data errors
    pub skipped: usize,
    /// Dropped because of shutdown
    pub abandoned: usize,
    /// Take-profit and reversal messages sent for tracked signals
    pub tracker_updates: usize,
    /// Signals still followed by the tracker after this cycle
    pub tracked: usize,
    /// The universe could not be listed, nothing was scanned
    pub universe_error: bool,
    pub duration: Duration,
}

/// How one instrument's scan ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InstrumentOutcome {
    Suppressed,
    Rejected,
    Alerted,
    DeliveryFailed,
    Skipped,
    Abandoned,
}

impl CycleReport {
    pub(crate) fn tally(&mut self, outcome: InstrumentOutcome) {
        match outcome {
            InstrumentOutcome::Suppressed => self.suppressed += 1,
            InstrumentOutcome::Rejected => self.evaluated += 1,
            InstrumentOutcome::Alerted => {
                self.evaluated += 1;
                self.alerts += 1;
            }
            InstrumentOutcome::DeliveryFailed => {
                self.evaluated += 1;
                self.delivery_failures += 1;
            }
            InstrumentOutcome::Skipped => self.skipped += 1,
            InstrumentOutcome::Abandoned => self.abandoned += 1,
        }
    }
}
