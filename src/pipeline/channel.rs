//! Bounded handshake channels between pipeline stages.
//!
//! A channel models a hardware FIFO that latches on the clock edge:
//!
//! ```text
//!   producer ──write──► [ staged ] ──commit()──► [ visible queue ] ──read──► consumer
//!                       (this cycle)              (cycle N+1 onward)
//! ```
//!
//! Writes land in a staging area and only become readable after the engine
//! calls [`Channel::commit`] at the end of the cycle. Capacity counts both
//! the visible entries and the staged ones, so a producer sees backpressure
//! as soon as the slot it would need has been claimed.
//!
//! `try_write` / `try_read` are the polite forms used by stages that check
//! first. `write` / `read` are the strict forms: calling them against a full
//! or empty channel is a scheduling bug and yields
//! [`PipelineError::ChannelProtocolViolation`].

use std::collections::VecDeque;

use smallvec::SmallVec;

use super::error::{PipelineError, Result, Violation};
use super::ray::Sample;

/// Default depth of every inter-stage FIFO in the reference design.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 2;

/// The directed stage-to-stage links of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Ray marcher → positional encoder (sample position).
    MarchToPositional,
    /// Ray marcher → directional encoder (normalised direction).
    MarchToDirectional,
    /// Positional encoder → density network (encoded features).
    PositionalToDensity,
    /// Directional encoder → color network (encoded direction).
    DirectionalToColor,
    /// Density network → color network (density features).
    DensityToColor,
    /// Color network → compositor (raw rgb + raw density).
    ColorToComposite,
    /// Compositor → ray marcher (retirement notices).
    Retire,
}

impl ChannelKind {
    /// All links in pipeline order.
    pub const ALL: [ChannelKind; 7] = [
        ChannelKind::MarchToPositional,
        ChannelKind::MarchToDirectional,
        ChannelKind::PositionalToDensity,
        ChannelKind::DirectionalToColor,
        ChannelKind::DensityToColor,
        ChannelKind::ColorToComposite,
        ChannelKind::Retire,
    ];

    /// Short name used in reports and diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            ChannelKind::MarchToPositional => "march->positional",
            ChannelKind::MarchToDirectional => "march->directional",
            ChannelKind::PositionalToDensity => "positional->density",
            ChannelKind::DirectionalToColor => "directional->color",
            ChannelKind::DensityToColor => "density->color",
            ChannelKind::ColorToComposite => "color->composite",
            ChannelKind::Retire => "composite->march",
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Handshake counters for one channel.
///
/// A "full check" is a producer asking whether it may write; an "empty
/// check" is a consumer asking whether there is anything to read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Number of times a producer polled for space.
    pub full_checks: u64,
    /// Polls that found the channel full.
    pub full_hits: u64,
    /// Number of times a consumer polled for data.
    pub empty_checks: u64,
    /// Polls that found the channel empty.
    pub empty_hits: u64,
    /// Values accepted by `commit`.
    pub transfers: u64,
    /// Highest visible occupancy observed after a commit.
    pub peak_len: usize,
}

impl ChannelStats {
    /// Fraction of producer polls that met backpressure.
    pub fn full_rate(&self) -> f64 {
        if self.full_checks == 0 {
            0.0
        } else {
            self.full_hits as f64 / self.full_checks as f64
        }
    }

    /// Fraction of consumer polls that found nothing to read.
    pub fn empty_rate(&self) -> f64 {
        if self.empty_checks == 0 {
            0.0
        } else {
            self.empty_hits as f64 / self.empty_checks as f64
        }
    }
}

/// Bounded single-producer single-consumer queue of tagged samples.
#[derive(Debug, Clone)]
pub struct Channel<T> {
    kind: ChannelKind,
    capacity: usize,
    visible: VecDeque<Sample<T>>,
    staged: SmallVec<[Sample<T>; 2]>,
    stats: ChannelStats,
}

impl<T> Channel<T> {
    /// Create an empty channel. `capacity` must be at least one; the engine
    /// validates this before building channels.
    pub fn new(kind: ChannelKind, capacity: usize) -> Self {
        Self {
            kind,
            capacity,
            visible: VecDeque::with_capacity(capacity),
            staged: SmallVec::new(),
            stats: ChannelStats::default(),
        }
    }

    /// Which link this channel models.
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Configured depth.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of visible entries.
    pub fn len(&self) -> usize {
        self.visible.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
    }

    /// Number of writes waiting for the next commit.
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    /// Whether the visible queue and the staging area are both empty.
    pub fn is_idle(&self) -> bool {
        self.visible.is_empty() && self.staged.is_empty()
    }

    /// Handshake statistics gathered so far.
    pub fn stats(&self) -> &ChannelStats {
        &self.stats
    }

    /// Producer-side poll: can one more value be written this cycle?
    pub fn can_accept(&mut self) -> bool {
        self.stats.full_checks += 1;
        let ok = self.visible.len() + self.staged.len() < self.capacity;
        if !ok {
            self.stats.full_hits += 1;
        }
        ok
    }

    /// Consumer-side poll: is there a visible value to read?
    pub fn has_data(&mut self) -> bool {
        self.stats.empty_checks += 1;
        let ok = !self.visible.is_empty();
        if !ok {
            self.stats.empty_hits += 1;
        }
        ok
    }

    /// Stage a write, returning `false` under backpressure.
    pub fn try_write(&mut self, sample: Sample<T>) -> bool {
        if !self.can_accept() {
            return false;
        }
        self.staged.push(sample);
        true
    }

    /// Take the oldest visible value, if any.
    pub fn try_read(&mut self) -> Option<Sample<T>> {
        if !self.has_data() {
            return None;
        }
        self.visible.pop_front()
    }

    /// Stage a write that the caller has already checked for space.
    pub fn write(&mut self, sample: Sample<T>) -> Result<()> {
        if self.visible.len() + self.staged.len() >= self.capacity {
            return Err(PipelineError::ChannelProtocolViolation {
                channel: self.kind,
                violation: Violation::Overflow,
                ray_id: Some(sample.ray_id),
            });
        }
        self.staged.push(sample);
        Ok(())
    }

    /// Consume a value that the caller has already checked is present.
    pub fn read(&mut self) -> Result<Sample<T>> {
        self.visible
            .pop_front()
            .ok_or(PipelineError::ChannelProtocolViolation {
                channel: self.kind,
                violation: Violation::Underflow,
                ray_id: None,
            })
    }

    /// Latch staged writes into the visible queue.
    ///
    /// Called exactly once per cycle for every channel, after all stages ran.
    pub fn commit(&mut self) {
        self.stats.transfers += self.staged.len() as u64;
        self.visible.extend(self.staged.drain(..));
        self.stats.peak_len = self.stats.peak_len.max(self.visible.len());
        debug_assert!(self.visible.len() <= self.capacity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: u32) -> Sample<u32> {
        Sample::new(id, 0.0, id * 10)
    }

    #[test]
    fn test_write_not_visible_until_commit() {
        let mut ch = Channel::new(ChannelKind::MarchToPositional, 2);
        assert!(ch.try_write(sample(1)));
        assert_eq!(ch.len(), 0);
        assert_eq!(ch.staged_len(), 1);
        assert!(ch.try_read().is_none());

        ch.commit();
        assert_eq!(ch.len(), 1);
        assert_eq!(ch.staged_len(), 0);
        let got = ch.try_read().unwrap();
        assert_eq!(got.ray_id, 1);
        assert_eq!(got.value, 10);
    }

    #[test]
    fn test_capacity_counts_staged_writes() {
        let mut ch = Channel::new(ChannelKind::DensityToColor, 2);
        assert!(ch.try_write(sample(1)));
        assert!(ch.try_write(sample(2)));
        assert!(!ch.try_write(sample(3)));
        ch.commit();
        assert_eq!(ch.len(), 2);
        assert!(!ch.can_accept());
        assert!(ch.len() <= ch.capacity());
    }

    #[test]
    fn test_fifo_order_preserved() {
        let mut ch = Channel::new(ChannelKind::ColorToComposite, 4);
        for id in 0..3 {
            assert!(ch.try_write(sample(id)));
        }
        ch.commit();
        let ids: Vec<u32> = std::iter::from_fn(|| ch.try_read()).map(|s| s.ray_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_read_frees_space_for_same_cycle_write() {
        let mut ch = Channel::new(ChannelKind::PositionalToDensity, 1);
        assert!(ch.try_write(sample(1)));
        ch.commit();
        assert!(!ch.can_accept());
        ch.try_read().unwrap();
        assert!(ch.try_write(sample(2)));
        // The freshly written value is still invisible.
        assert!(ch.try_read().is_none());
    }

    #[test]
    fn test_strict_write_overflow_is_violation() {
        let mut ch = Channel::new(ChannelKind::Retire, 1);
        ch.write(sample(5)).unwrap();
        let err = ch.write(sample(6)).unwrap_err();
        assert_eq!(
            err,
            PipelineError::ChannelProtocolViolation {
                channel: ChannelKind::Retire,
                violation: Violation::Overflow,
                ray_id: Some(6),
            }
        );
    }

    #[test]
    fn test_strict_read_underflow_is_violation() {
        let mut ch: Channel<u32> = Channel::new(ChannelKind::MarchToDirectional, 2);
        match ch.read() {
            Err(PipelineError::ChannelProtocolViolation { violation, .. }) => {
                assert_eq!(violation, Violation::Underflow)
            }
            other => panic!("expected underflow, got {:?}", other),
        }
    }

    #[test]
    fn test_stats_track_polls() {
        let mut ch = Channel::new(ChannelKind::DirectionalToColor, 1);
        assert!(!ch.has_data());
        assert!(ch.try_write(sample(1)));
        assert!(!ch.can_accept());
        ch.commit();
        assert!(ch.has_data());

        let stats = ch.stats();
        assert_eq!(stats.empty_checks, 2);
        assert_eq!(stats.empty_hits, 1);
        assert_eq!(stats.full_checks, 2);
        assert_eq!(stats.full_hits, 1);
        assert_eq!(stats.transfers, 1);
        assert_eq!(stats.peak_len, 1);
        assert!((stats.full_rate() - 0.5).abs() < 1e-12);
    }
}
