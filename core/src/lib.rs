//! Core numerics for the elastic/Raman lidar processing chain.
//!
//! Raw instrument records are decoded, corrected channel by channel, glued
//! across detection modes, compared against a molecular atmosphere and finally
//! inverted into aerosol optical profiles.

pub mod atmosphere;
pub mod config;
pub mod instrument;
pub mod math;
pub mod prelude;
pub mod processing;
pub mod retrieval;
pub mod storage;
pub mod telemetry;

pub use config::PipelineConfig;
pub use prelude::{LidarError, LidarResult, ProcessingStage, StageInput, StageOutput};
