use std::path::PathBuf;
use thiserror::Error;
/// Failures while turning one waveform file into traces.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("{}: malformed header: {reason}", .path.display())]
    HeaderParse { path: PathBuf, reason: String },
    #[error(
        "{}: truncated file: trace {trace} needs {needed} {unit} but only {available} are present",
        .path.display()
    )]
    TruncatedFile {
        path: PathBuf,
        trace: usize,
        needed: usize,
        available: usize,
        unit: &'static str,
    },
    #[error("{}: waveform header declares zero samples", .path.display())]
    EmptyWaveform { path: PathBuf },
    #[error(
        "{}: trace {trace} has {actual} samples, expected {expected}",
        .path.display()
    )]
    LengthMismatch {
        path: PathBuf,
        trace: usize,
        expected: usize,
        actual: usize,
    },
    #[error(
        "{}: trace {trace}, column {column}: {value:?} is not a number",
        .path.display()
    )]
    InvalidSample {
        path: PathBuf,
        trace: usize,
        column: usize,
        value: String,
    },
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}: {source}", .path.display())]
    Processing {
        path: PathBuf,
        #[source]
        source: ProcessingError,
    },
}
impl DecodeError {
    pub fn path(&self) -> &std::path::Path {
        match self {
            DecodeError::HeaderParse { path, .. }
            | DecodeError::TruncatedFile { path, .. }
            | DecodeError::EmptyWaveform { path }
            | DecodeError::LengthMismatch { path, .. }
            | DecodeError::InvalidSample { path, .. }
            | DecodeError::Io { path, .. }
            | DecodeError::Processing { path, .. } => path,
        }
    }
}
/// Failures of the in-memory signal processing stages.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("no traces to accumulate")]
    EmptyAccumulation,
    #[error("trace {index} has {actual} samples, expected {expected}")]
    LengthMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },
    #[error(
        "invalid band {low_hz} Hz .. {high_hz} Hz for order {order} (nyquist {nyquist_hz} Hz)"
    )]
    InvalidBand {
        low_hz: f64,
        high_hz: f64,
        order: usize,
        nyquist_hz: f64,
    },
    #[error("sampling interval must be positive, got {0}")]
    InvalidTimeStep(f64),
    #[error("trace has no samples")]
    EmptyTrace,
    #[error("failed to render plot: {0}")]
    Plot(String),
}
impl<E: std::error::Error + Send + Sync + 'static> From<plotters::drawing::DrawingAreaErrorKind<E>>
    for ProcessingError
{
    fn from(value: plotters::drawing::DrawingAreaErrorKind<E>) -> Self {
        ProcessingError::Plot(format!("{value:?}"))
    }
}
impl From<image::ImageError> for ProcessingError {
    fn from(value: image::ImageError) -> Self {
        ProcessingError::Plot(value.to_string())
    }
}
/// Failure while running a file through the analysis pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("{}: {source}", .path.display())]
    Processing {
        path: PathBuf,
        #[source]
        source: ProcessingError,
    },
}
