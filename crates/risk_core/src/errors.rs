//! Error types for the risk pipeline

use std::fmt;
use thiserror::Error;

/// Errors that can occur while preparing data, training or loading artifacts
#[derive(Error, Debug)]
pub enum RiskError {
    /// Malformed core field (date, time or a numeric cell)
    #[error("Parse error in column '{column}' (row {row}): invalid value '{value}'")]
    Parse {
        column: String,
        value: String,
        row: usize,
    },

    /// Row counts of blocks being combined differ
    #[error("Shape mismatch: left block has {left} rows, right block has {right}")]
    ShapeMismatch { left: usize, right: usize },

    /// Too few positive samples to interpolate between neighbours
    #[error("Insufficient minority samples: found {found}, need at least {required}")]
    InsufficientMinoritySamples { found: usize, required: usize },

    /// Stored bundle layout differs from what this build expects
    #[error("Artifact version mismatch in {field}: expected {expected}, found {found}")]
    ArtifactVersionMismatch {
        field: String,
        expected: String,
        found: String,
    },

    /// Stored digest does not match the payload
    #[error("Artifact integrity check failed: expected hash {expected}, computed {computed}")]
    ArtifactIntegrity { expected: String, computed: String },

    /// Input table lacks a required column
    #[error("Missing required column: {0}")]
    MissingColumn(String),

    /// Labeled operation received a record without `risk_level`
    #[error("Missing risk_level label at row {row}")]
    MissingLabel { row: usize },

    /// Invalid parameters
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// Dataset-level problem (empty input, single-class labels, ...)
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Configuration could not be read or deserialized
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// CSV reader error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl RiskError {
    pub(crate) fn parse(column: &str, value: &str, row: usize) -> Self {
        RiskError::Parse {
            column: column.to_string(),
            value: value.to_string(),
            row,
        }
    }

    pub(crate) fn version_mismatch(
        field: &str,
        expected: impl fmt::Debug,
        found: impl fmt::Debug,
    ) -> Self {
        RiskError::ArtifactVersionMismatch {
            field: field.to_string(),
            expected: format!("{expected:?}"),
            found: format!("{found:?}"),
        }
    }
}

/// Result type for risk pipeline operations
pub type Result<T> = std::result::Result<T, RiskError>;

/// Pipeline stage in which a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Load,
    Split,
    Derive,
    Encode,
    Normalize,
    Assemble,
    Balance,
    Train,
    Evaluate,
    Predict,
    Bundle,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Load => "load",
            PipelineStage::Split => "split",
            PipelineStage::Derive => "derive",
            PipelineStage::Encode => "encode",
            PipelineStage::Normalize => "normalize",
            PipelineStage::Assemble => "assemble",
            PipelineStage::Balance => "balance",
            PipelineStage::Train => "train",
            PipelineStage::Evaluate => "evaluate",
            PipelineStage::Predict => "predict",
            PipelineStage::Bundle => "bundle",
        };
        f.write_str(name)
    }
}

/// A [`RiskError`] tagged with the stage that raised it
#[derive(Error, Debug)]
#[error("{stage} stage failed: {source}")]
pub struct StageError {
    pub stage: PipelineStage,
    #[source]
    pub source: RiskError,
}

impl StageError {
    pub fn new(stage: PipelineStage, source: RiskError) -> Self {
        Self { stage, source }
    }
}

/// Attach a pipeline stage to a fallible result
pub trait StageContext<T> {
    fn stage(self, stage: PipelineStage) -> std::result::Result<T, StageError>;
}

impl<T> StageContext<T> for Result<T> {
    fn stage(self, stage: PipelineStage) -> std::result::Result<T, StageError> {
        self.map_err(|source| StageError::new(stage, source))
    }
}
