pub mod correction;
pub mod glue;
pub mod session;

pub use correction::{
    BackgroundStage, BinShiftStage, CorrectedFrame, CorrectedProfile, CorrectionPipeline,
    DarkCurrentStage, DeadtimeStage,
};
pub use glue::{ChannelGluer, GluedProfile, WindowDiagnostics};
pub use session::{mean_corrected_profile, DarkCurrentMean, MeasurementSession, SessionAggregate};
