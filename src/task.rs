//! Resumable step primitives shared by long-running world operations.
//!
//! Stamping, flattening and smoothing iterate over many thousands of samples
//! and must not block the host for longer than a configured time slice. Each
//! of them exposes a `step(budget)` method that processes samples until the
//! wall-clock budget is spent, then hands control back to the caller. The
//! caller resumes by calling `step` again; internal state is preserved between
//! calls and suspension only ever happens between samples, never mid-sample.

use std::time::{Duration, Instant};

/// Default per-resumption budget when the host is busy (roughly one frame).
pub const FRAME_BUDGET: Duration = Duration::from_millis(33);

/// Extended budget the caller may pass when it is otherwise idle.
pub const IDLE_BUDGET: Duration = Duration::from_millis(500);

/// Result of resuming a long-running operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// The budget ran out with work remaining; call `step` again to resume.
    InProgress,
    /// All samples were processed.
    Complete,
    /// The run was cancelled cooperatively; no further work will happen.
    Cancelled,
}

/// Wall-clock budget for one resumption.
///
/// Self-throttling by elapsed time rather than iteration count keeps the
/// observable pause constant across host machines of different speeds.
pub struct TimeBudget {
    started: Instant,
    budget: Duration,
}

impl TimeBudget {
    pub fn start(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    pub fn expired(&self) -> bool {
        self.started.elapsed() >= self.budget
    }
}
