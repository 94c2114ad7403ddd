// src/drivers/mod.rs
// 声明同级目录下的子模块文件
pub mod accumulate;
pub mod decoder;
pub mod error;
pub mod fft;
pub mod filter;
pub mod merge;
pub mod pipeline;
pub mod plot;
pub mod source;
// 公开导出这些模块里的结构体，方便外部调用
pub use accumulate::{accumulate, Accumulator, BaselineWindow};
pub use decoder::{decode, DecodedWaveform, WaveformDecoder, WaveformFormat, WaveformHeader};
pub use error::{DecodeError, PipelineError, ProcessingError};
pub use fft::{fft_frequencies, spectrum, trim_start, SpectrumBuilder, SpectrumFrame};
pub use filter::{bandpass, BandpassSettings, FilterChain};
pub use merge::{merge, SharedAccumulation, SpectrumAccumulation};
pub use pipeline::{analyze_folder, AnalysisSummary, ProcessedFile, SpectrumPipeline};
pub use plot::{render_spectrum_png, render_traces_png, PlotStyle};
pub use source::{ManualSource, SweepAxis, SweepFileSet, WaveformInput, WaveformSource};
