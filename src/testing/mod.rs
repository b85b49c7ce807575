//! Batch harness for rendering several scenes through the pipeline.
//!
//! # Usage
//!
//! ```bash
//! ngp-sim --suite
//! ```

pub mod scene_suite;

pub use scene_suite::{SceneCase, SceneOutcome, SceneSuite, SuiteResult, NERF_SYNTHETIC_SCENES};
