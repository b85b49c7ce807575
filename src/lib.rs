//! ngp-sim library
//!
//! Cycle-accurate simulation of a NeRF rendering accelerator: a six-stage
//! pipeline (ray march, positional and directional encoding, density and
//! color networks, compositing) connected by bounded channels.

pub mod config;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod snapshot;
pub mod testing;
