use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Input payload for one correction stage: a single channel of one frame.
#[derive(Debug, Clone)]
pub struct StageInput {
    pub channel: usize,
    pub label: String,
    pub vertical_resolution: f64,
    pub samples: Vec<f64>,
}

impl StageInput {
    pub fn with_samples(&self, samples: Vec<f64>) -> Self {
        Self {
            channel: self.channel,
            label: self.label.clone(),
            vertical_resolution: self.vertical_resolution,
            samples,
        }
    }
}

/// Output produced by each stage.
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub samples: Vec<f64>,
    pub metadata: StageMetadata,
}

/// Metadata used for chaining stages and telemetry.
#[derive(Debug, Clone, Default)]
pub struct StageMetadata {
    pub background: Option<f64>,
    pub notes: Vec<String>,
}

/// Day/night split of a measurement session, taken from the session folder suffix.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AcquisitionPeriod {
    Morning,
    Afternoon,
    Night,
}

impl AcquisitionPeriod {
    pub fn from_suffix(name: &str) -> Option<Self> {
        if name.ends_with("am") {
            Some(Self::Morning)
        } else if name.ends_with("pm") {
            Some(Self::Afternoon)
        } else if name.ends_with("nt") {
            Some(Self::Night)
        } else {
            None
        }
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Morning => "am",
            Self::Afternoon => "pm",
            Self::Night => "nt",
        }
    }
}

/// Error taxonomy shared by every component of the pipeline.
#[derive(thiserror::Error, Debug)]
pub enum LidarError {
    #[error("malformed header (line {line}, field {field}): {reason}")]
    MalformedHeader {
        line: usize,
        field: String,
        reason: String,
    },
    #[error("declared shot count {shots} outside accepted band [{min}, {max}]")]
    ShotCountOutOfRange { shots: u32, min: u32, max: u32 },
    #[error("array length mismatch in {context}: expected {expected}, got {actual}")]
    ArrayLengthMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },
    #[error("no glueable region for {wavelength} within bins [{min_idx}, {max_idx})")]
    NoGlueableRegion {
        wavelength: String,
        min_idx: usize,
        max_idx: usize,
    },
    #[error("no sounding available at {}", path.display())]
    MissingSounding { path: PathBuf },
    #[error("singular least-squares fit: {context}")]
    SingularFit { context: String },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("table failure: {0}")]
    Csv(#[from] csv::Error),
}

impl LidarError {
    pub fn malformed(line: usize, field: &str, reason: impl Into<String>) -> Self {
        Self::MalformedHeader {
            line,
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub fn mismatch(context: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::ArrayLengthMismatch {
            context: context.into(),
            expected,
            actual,
        }
    }

    pub fn singular(context: impl Into<String>) -> Self {
        Self::SingularFit {
            context: context.into(),
        }
    }

    /// Frames rejected for their shot count go to quarantine; they are not pipeline failures.
    pub fn is_quarantine(&self) -> bool {
        matches!(self, Self::ShotCountOutOfRange { .. })
    }
}

pub type LidarResult<T> = Result<T, LidarError>;
pub type StageResult<T> = LidarResult<T>;

/// One step of the per-channel correction chain.
pub trait ProcessingStage {
    fn name(&self) -> &'static str;
    fn execute(&self, input: StageInput) -> StageResult<StageOutput>;
}
