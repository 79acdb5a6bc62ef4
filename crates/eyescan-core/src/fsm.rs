//! Link state machine: a fixed reset plan followed by a self-looping run state.

use std::fmt;

use serde::Serialize;

/// What one reset sub-step does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResetStep {
    /// Reset TX then RX of the link.
    ResetLink,
    /// Sleep proportionally to the link index.
    Stagger,
    StartEngine,
    /// Poll counters and pre-render whatever data has arrived.
    Warmup,
    /// Hold until the first slice arrives.
    AwaitFirstSlice,
    /// Pad the ring to capacity.
    FillBuffer,
}

impl fmt::Display for ResetStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResetStep::ResetLink => "reset link",
            ResetStep::Stagger => "stagger",
            ResetStep::StartEngine => "start engine",
            ResetStep::Warmup => "warmup",
            ResetStep::AwaitFirstSlice => "await first slice",
            ResetStep::FillBuffer => "fill buffer",
        };
        write!(f, "{s}")
    }
}

/// The reset sequence, one entry per sub-state.
pub const RESET_PLAN: [ResetStep; 10] = [
    ResetStep::ResetLink,
    ResetStep::Stagger,
    ResetStep::StartEngine,
    ResetStep::Warmup,
    ResetStep::Warmup,
    ResetStep::Warmup,
    ResetStep::Warmup,
    ResetStep::Warmup,
    ResetStep::AwaitFirstSlice,
    ResetStep::FillBuffer,
];

/// Result of executing the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Advance,
    /// Stay in the current state.
    Hold,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FsmState {
    /// Index into [`RESET_PLAN`].
    Reset(u8),
    Running,
    /// Terminal.
    Stopped,
}

impl FsmState {
    pub const RUNNING_CODE: u8 = RESET_PLAN.len() as u8;

    pub fn initial() -> Self {
        FsmState::Reset(0)
    }

    /// Transition function. Reset steps only move forward; `Running` loops
    /// until stopped; `Stopped` never leaves.
    pub fn next(self, outcome: StepOutcome) -> Self {
        match (self, outcome) {
            (FsmState::Stopped, _) | (_, StepOutcome::Stop) => FsmState::Stopped,
            (FsmState::Reset(i), StepOutcome::Advance) => {
                if usize::from(i) + 1 < RESET_PLAN.len() {
                    FsmState::Reset(i + 1)
                } else {
                    FsmState::Running
                }
            }
            (FsmState::Reset(i), StepOutcome::Hold) => FsmState::Reset(i),
            (FsmState::Running, _) => FsmState::Running,
        }
    }

    pub fn reset_step(self) -> Option<ResetStep> {
        match self {
            FsmState::Reset(i) => RESET_PLAN.get(usize::from(i)).copied(),
            _ => None,
        }
    }

    /// Numeric state as shown in tables: 0..9 while resetting, 10 running, 11 stopped.
    pub fn code(self) -> u8 {
        match self {
            FsmState::Reset(i) => i,
            FsmState::Running => Self::RUNNING_CODE,
            FsmState::Stopped => Self::RUNNING_CODE + 1,
        }
    }

    pub fn is_running(self) -> bool {
        self == FsmState::Running
    }

    /// True once the start-engine reset step has executed, until stopped.
    pub fn engine_armed(self) -> bool {
        match self {
            FsmState::Reset(i) => RESET_PLAN
                .get(..usize::from(i))
                .is_some_and(|done| done.contains(&ResetStep::StartEngine)),
            FsmState::Running => true,
            FsmState::Stopped => false,
        }
    }
}

impl fmt::Display for FsmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsmState::Reset(i) => match self.reset_step() {
                Some(step) => write!(f, "RESET_{i} ({step})"),
                None => write!(f, "RESET_{i}"),
            },
            FsmState::Running => write!(f, "RUNNING"),
            FsmState::Stopped => write!(f, "STOPPED"),
        }
    }
}
