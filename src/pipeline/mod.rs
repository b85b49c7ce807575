//! Cycle-accurate model of the NeRF accelerator pipeline.
//!
//! # Architecture
//!
//! ```text
//!              ┌────────────► positional ──► density ──┐
//!   marcher ───┤                                        ├──► color ──► composite
//!      ▲       └────────────► directional ─────────────┘                  │
//!      └──────────────────────── retirement notices ◄─────────────────────┘
//! ```
//!
//! - [`channel`]: bounded FIFOs whose writes become visible the next cycle
//! - [`stage`]: latency countdown and two-state controller shared by stages
//! - [`marcher`]: empty-space skipping and the ray retirement protocol
//! - [`adapters`]: encoder and network stages
//! - [`compositor`]: volume compositing and saturation
//! - [`engine`]: the per-cycle driver
//! - [`history`]: per-pixel best results and throughput figures
//! - [`numeric`]: float or per-link fixed-point payloads

pub mod adapters;
pub mod channel;
pub mod compositor;
pub mod engine;
pub mod error;
pub mod history;
pub mod marcher;
pub mod numeric;
pub mod ray;
pub mod stage;

#[cfg(test)]
pub(crate) mod test_support;

pub use adapters::RawRgba;
pub use channel::{Channel, ChannelKind, ChannelStats, DEFAULT_CHANNEL_CAPACITY};
pub use engine::{
    ChannelCapacities, EngineOptions, EngineStatus, FrameResult, PipelineEngine, DEFAULT_MAX_STEPS,
};
pub use error::{PipelineError, Result, Violation};
pub use history::{FrameHistory, PixelResult, ThroughputReport};
pub use marcher::{MarchParams, RayMarcher, ValidPixelSet};
pub use numeric::{FixedPointFormat, NumericPolicy, QuantScheme};
pub use ray::{RayArena, RayId, RayState, Sample};
pub use stage::{StageKind, StageLatencies, StageStats};
