use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// 流水线各阶段的错误类型。
///
/// 所有错误都同步返回给直接调用者；由编排层记录日志并终止本次运行。
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("mismatch between sequences and slice positions: {ids} IDs, {sequences} sequences and {positions} positions")]
    SequenceMismatch {
        ids: usize,
        sequences: usize,
        positions: usize,
    },

    #[error("sequence ID '{0}' occurs more than once")]
    DuplicateSequenceId(String),

    #[error("aligner executable '{0}' could not be found")]
    MissingExternalTool(PathBuf),

    #[error("aligner failed: {0}")]
    AlignerFailed(String),

    #[error("malformed alignment: {0}")]
    MalformedAlignment(String),

    #[error("alignment column {column} has no observed symbols")]
    InvalidColumn { column: usize },

    #[error("ranking table '{}' could not be imported ({reason}); re-run ranking", .path.display())]
    RankImport { path: PathBuf, reason: String },

    #[error("table '{}' is malformed: {reason}", .path.display())]
    MalformedTable { path: PathBuf, reason: String },

    #[error("PCA has not been fitted")]
    PcaNotFitted,

    #[error("cannot run PCA: {0}")]
    PcaInput(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("table write error: {0}")]
    Csv(#[from] csv::Error),
}

impl PipelineError {
    pub(crate) fn rank_import(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        PipelineError::RankImport {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed_table(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        PipelineError::MalformedTable {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
