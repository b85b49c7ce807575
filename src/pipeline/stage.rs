//! Stage latency table and the generic stage state machine.
//!
//! Every stage of the accelerator follows the same two-phase shape per
//! cycle:
//!
//! ```text
//!            remaining_latency > 0 ──► count down, do nothing
//!                     │
//!                     ▼ 0
//!   ┌──────────────────────────────┐  drain ok   ┌──────────────────┐
//!   │      ExecutionComplete       │────────────►│  AwaitingInput   │
//!   │ (result held in one-slot reg)│◄────────────│ (read + compute) │
//!   └──────────────────────────────┘  executed   └──────────────────┘
//! ```
//!
//! Finishing an execution arms the countdown with `latency - 1`, so a stage
//! with latency `L` hands its result downstream no earlier than `L` cycles
//! after it accepted the input. A successful drain falls through to the
//! accept step in the same cycle, so an unblocked stage starts a new
//! execution every `L` cycles.

use serde::{Deserialize, Serialize};

use super::channel::Channel;
use super::error::{PipelineError, Result};
use super::ray::Sample;

/// The six hardware units, in per-cycle evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    RayMarch,
    PositionalEncode,
    DirectionalEncode,
    DensityNetwork,
    ColorNetwork,
    Composite,
}

impl StageKind {
    /// All stages in evaluation order.
    pub const ALL: [StageKind; 6] = [
        StageKind::RayMarch,
        StageKind::PositionalEncode,
        StageKind::DirectionalEncode,
        StageKind::DensityNetwork,
        StageKind::ColorNetwork,
        StageKind::Composite,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StageKind::RayMarch => "ray march",
            StageKind::PositionalEncode => "positional encode",
            StageKind::DirectionalEncode => "directional encode",
            StageKind::DensityNetwork => "density network",
            StageKind::ColorNetwork => "color network",
            StageKind::Composite => "composite",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Reference design latencies (cycles)
// ============================================================================

/// Ray marching and occupancy lookup: 1 cycle.
pub const LATENCY_RAY_MARCH: u32 = 1;

/// Multiresolution hash encoding: 10 cycles.
pub const LATENCY_POSITIONAL_ENCODE: u32 = 10;

/// Spherical harmonics encoding: 4 cycles.
pub const LATENCY_DIRECTIONAL_ENCODE: u32 = 4;

/// Density MLP: 4 cycles.
pub const LATENCY_DENSITY_NETWORK: u32 = 4;

/// Color MLP: 6 cycles.
pub const LATENCY_COLOR_NETWORK: u32 = 6;

/// Volume compositing: 1 cycle.
pub const LATENCY_COMPOSITE: u32 = 1;

/// Per-stage latency table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageLatencies {
    pub ray_march: u32,
    pub positional_encode: u32,
    pub directional_encode: u32,
    pub density_network: u32,
    pub color_network: u32,
    pub composite: u32,
}

impl Default for StageLatencies {
    fn default() -> Self {
        Self {
            ray_march: LATENCY_RAY_MARCH,
            positional_encode: LATENCY_POSITIONAL_ENCODE,
            directional_encode: LATENCY_DIRECTIONAL_ENCODE,
            density_network: LATENCY_DENSITY_NETWORK,
            color_network: LATENCY_COLOR_NETWORK,
            composite: LATENCY_COMPOSITE,
        }
    }
}

impl StageLatencies {
    /// Every stage finishes in a single cycle.
    pub fn unit() -> Self {
        Self {
            ray_march: 1,
            positional_encode: 1,
            directional_encode: 1,
            density_network: 1,
            color_network: 1,
            composite: 1,
        }
    }

    /// Latency of one stage.
    pub fn get(&self, kind: StageKind) -> u32 {
        match kind {
            StageKind::RayMarch => self.ray_march,
            StageKind::PositionalEncode => self.positional_encode,
            StageKind::DirectionalEncode => self.directional_encode,
            StageKind::DensityNetwork => self.density_network,
            StageKind::ColorNetwork => self.color_network,
            StageKind::Composite => self.composite,
        }
    }

    /// Reject zero latencies; a stage needs at least the cycle it runs in.
    pub fn validate(&self) -> Result<()> {
        for kind in StageKind::ALL {
            if self.get(kind) == 0 {
                return Err(PipelineError::InvalidConfig(format!(
                    "{} latency must be at least 1 cycle",
                    kind
                )));
            }
        }
        Ok(())
    }
}

/// Execution state of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StageState {
    /// Ready to accept the next input.
    #[default]
    AwaitingInput,
    /// Holding a finished result that has not been handed off yet.
    ExecutionComplete,
}

/// What a stage should do this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Still counting down latency.
    Busy,
    /// Result ready; try to hand it downstream.
    Drain,
    /// Idle; try to read an input and execute.
    Accept,
}

/// Per-stage activity counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageStats {
    /// Executions performed.
    pub activations: u64,
    /// Cycles spent counting down latency.
    pub busy_cycles: u64,
    /// Cycles blocked on a full downstream channel.
    pub output_stalls: u64,
    /// Cycles with nothing to read.
    pub input_starved: u64,
}

impl StageStats {
    /// Fraction of `cycles` in which the stage executed or was busy.
    pub fn utilization(&self, cycles: u64) -> f64 {
        if cycles == 0 {
            0.0
        } else {
            (self.activations + self.busy_cycles) as f64 / cycles as f64
        }
    }
}

/// Latency countdown, state machine and one-slot output register of a stage.
#[derive(Debug, Clone)]
pub struct StageController<T> {
    kind: StageKind,
    latency: u32,
    remaining_latency: u32,
    state: StageState,
    register: Option<Sample<T>>,
    stats: StageStats,
}

impl<T> StageController<T> {
    /// Create an idle controller. `latency` must be at least 1.
    pub fn new(kind: StageKind, latency: u32) -> Self {
        Self {
            kind,
            latency,
            remaining_latency: 0,
            state: StageState::AwaitingInput,
            register: None,
            stats: StageStats::default(),
        }
    }

    /// Start with the countdown armed, as if an execution just finished.
    pub fn armed(kind: StageKind, latency: u32) -> Self {
        let mut ctrl = Self::new(kind, latency);
        ctrl.remaining_latency = latency.saturating_sub(1);
        ctrl
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub fn latency(&self) -> u32 {
        self.latency
    }

    pub fn remaining_latency(&self) -> u32 {
        self.remaining_latency
    }

    pub fn state(&self) -> StageState {
        self.state
    }

    pub fn stats(&self) -> &StageStats {
        &self.stats
    }

    /// The held result, if any.
    pub fn register(&self) -> Option<&Sample<T>> {
        self.register.as_ref()
    }

    /// Whether the stage holds no work at all.
    pub fn is_idle(&self) -> bool {
        self.state == StageState::AwaitingInput && self.register.is_none()
    }

    /// Advance the countdown and report this cycle's phase.
    pub fn begin_cycle(&mut self) -> Phase {
        if self.remaining_latency > 0 {
            self.remaining_latency -= 1;
            self.stats.busy_cycles += 1;
            return Phase::Busy;
        }
        match self.state {
            StageState::ExecutionComplete => Phase::Drain,
            StageState::AwaitingInput => Phase::Accept,
        }
    }

    /// Run the countdown and drain steps of a cycle. Returns `true` when the
    /// stage may read an input and execute this cycle, which includes a
    /// cycle whose drain just succeeded.
    pub fn ready_for_input(&mut self, out: &mut Channel<T>) -> Result<bool> {
        match self.begin_cycle() {
            Phase::Busy => Ok(false),
            Phase::Drain => self.drain_into(out),
            Phase::Accept => Ok(true),
        }
    }

    /// Record an execution: latch `output` and arm the countdown.
    pub fn complete(&mut self, output: Option<Sample<T>>) {
        self.register = output;
        self.rearm();
        self.state = StageState::ExecutionComplete;
    }

    /// Arm the countdown for an execution that writes its result directly.
    pub fn rearm(&mut self) {
        self.stats.activations += 1;
        self.remaining_latency = self.latency - 1;
    }

    /// Note a cycle with no input available.
    pub fn starve(&mut self) {
        self.stats.input_starved += 1;
    }

    /// Note a cycle blocked on downstream backpressure.
    pub fn stall(&mut self) {
        self.stats.output_stalls += 1;
    }

    /// Hand the held result to `out`.
    ///
    /// Returns `true` once the register is empty and the stage is back to
    /// [`StageState::AwaitingInput`]; `false` leaves everything in place for
    /// a retry next cycle.
    pub fn drain_into(&mut self, out: &mut Channel<T>) -> Result<bool> {
        if self.register.is_some() {
            if !out.can_accept() {
                self.stall();
                log::trace!("{} stalled on {}", self.kind, out.kind());
                return Ok(false);
            }
            if let Some(sample) = self.register.take() {
                out.write(sample)?;
            }
        }
        self.state = StageState::AwaitingInput;
        Ok(true)
    }
}
