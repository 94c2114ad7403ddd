//! Control core for a pulsed NMR spectrometer driven over SSH: sweep
//! orchestration, waveform decoding, FID accumulation and spectral merging.
pub mod config;
pub mod drivers;
pub mod engine;
pub mod recorder;
pub mod remote;
pub mod types;
