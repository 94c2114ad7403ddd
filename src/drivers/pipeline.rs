use std::path::{Path, PathBuf};
use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use crate::config::{AnalysisConfig, DeviceConfig};
use crate::drivers::accumulate::Accumulator;
use crate::drivers::decoder::WaveformDecoder;
use crate::drivers::error::{PipelineError, ProcessingError};
use crate::drivers::fft::{trim_start, SpectrumBuilder, SpectrumFrame};
use crate::drivers::filter::{validate_band, FilterChain};
use crate::drivers::merge::SpectrumAccumulation;
use crate::drivers::source::{SweepAxis, SweepFileSet, WaveformInput, WaveformSource};
/// Result of running one file through the pipeline.
#[derive(Clone, Debug)]
pub struct ProcessedFile {
    pub index: usize,
    pub path: PathBuf,
    pub fid_count: usize,
    /// Time axis after the start trim.
    pub time_axis: Vec<f64>,
    /// Accumulated, filtered and trimmed trace the spectrum was taken from.
    pub trace: Vec<f64>,
    /// Every decoded FID, untrimmed.
    pub fids: Vec<Vec<f64>>,
    pub spectrum: SpectrumFrame,
}
/// Files that went through and files that did not.
#[derive(Debug, Default)]
pub struct AnalysisSummary {
    pub files: Vec<ProcessedFile>,
    pub failures: Vec<PipelineError>,
}
impl AnalysisSummary {
    /// Time axis of the first file and the trimmed trace of every file, for
    /// an overlay across the sweep.
    pub fn trace_overlay(&self) -> Option<(&[f64], Vec<Vec<f64>>)> {
        let first = self.files.first()?;
        let traces = self.files.iter().map(|f| f.trace.clone()).collect();
        Some((first.time_axis.as_slice(), traces))
    }
}
/// Decodes sweep files one at a time and merges their spectra.
pub struct SpectrumPipeline<S: WaveformSource> {
    source: S,
    decoder: WaveformDecoder,
    analysis: AnalysisConfig,
    sampling_rate_hz: f64,
    axis: Option<SweepAxis>,
    builder: SpectrumBuilder,
    merged: SpectrumAccumulation,
}
impl<S: WaveformSource> SpectrumPipeline<S> {
    /// Fails early when the configured band cannot work at the board's rate.
    pub fn new(
        source: S,
        device: &DeviceConfig,
        analysis: AnalysisConfig,
    ) -> Result<Self, ProcessingError> {
        if let Some(band) = &analysis.bandpass {
            validate_band(band.low_hz, band.high_hz, device.sampling_rate_hz, band.order)?;
        }
        let decoder =
            WaveformDecoder::from_config(device).with_accumulator(Accumulator::new(analysis.baseline));
        Ok(Self {
            source,
            decoder,
            analysis,
            sampling_rate_hz: device.sampling_rate_hz,
            axis: None,
            builder: SpectrumBuilder::new(),
            merged: SpectrumAccumulation::new(),
        })
    }
    /// Checks the band against the decimated rate the filter will run at.
    pub fn with_decimation(self, decimation: u32) -> Result<Self, ProcessingError> {
        if let Some(band) = &self.analysis.bandpass {
            let rate = self.sampling_rate_hz / decimation.max(1) as f64;
            validate_band(band.low_hz, band.high_hz, rate, band.order)?;
        }
        Ok(self)
    }
    pub fn with_sweep_axis(mut self, axis: SweepAxis) -> Self {
        self.axis = Some(axis);
        self
    }
    pub fn merged(&self) -> &SpectrumAccumulation {
        &self.merged
    }
    pub fn into_merged(self) -> SpectrumAccumulation {
        self.merged
    }
    /// Processes the next file. `Ok(None)` once the source is exhausted; an
    /// error concerns only that file and the next call moves on.
    pub fn pump_once(&mut self) -> Result<Option<ProcessedFile>, PipelineError> {
        let Some(input) = self.source.next_input() else {
            return Ok(None);
        };
        let processed = self.process(input)?;
        self.merged.merge(&processed.spectrum);
        Ok(Some(processed))
    }
    pub fn run_to_end(&mut self) -> AnalysisSummary {
        let mut summary = AnalysisSummary::default();
        loop {
            match self.pump_once() {
                Ok(Some(file)) => {
                    info!(
                        "processed {} ({} FIDs, offset {} Hz)",
                        file.path.display(),
                        file.fid_count,
                        file.spectrum.frequency_offset_hz
                    );
                    summary.files.push(file);
                }
                Ok(None) => break,
                Err(e) => {
                    // a band the decimated rate cannot carry fails every file alike
                    let stop = matches!(
                        e,
                        PipelineError::Processing {
                            source: ProcessingError::InvalidBand { .. },
                            ..
                        }
                    );
                    if stop {
                        warn!("stopping analysis: {e}");
                        summary.failures.push(e);
                        break;
                    }
                    warn!("skipping file: {e}");
                    summary.failures.push(e);
                }
            }
        }
        summary
    }
    fn process(&mut self, input: WaveformInput) -> Result<ProcessedFile, PipelineError> {
        let WaveformInput { index, path } = input;
        let wave = self.decoder.decode_path(&path, self.analysis.fid_count)?;
        let failed = |source| PipelineError::Processing {
            path: path.clone(),
            source,
        };
        let dt = wave.header.decimation as f64 / self.sampling_rate_hz;
        let trace = match &self.analysis.bandpass {
            Some(band) => {
                // the filter runs at the decimated rate of the file
                let mut chain =
                    FilterChain::butterworth_bandpass(band.low_hz, band.high_hz, 1.0 / dt, band.order)
                        .map_err(failed)?;
                chain.apply(&wave.accumulated)
            }
            None => wave.accumulated.clone(),
        };
        let (cut, time_axis) =
            trim_start(&trace, &wave.time_axis, self.analysis.start_offset_ms, dt).map_err(failed)?;
        let mut spectrum = self.builder.compute(cut, dt).map_err(failed)?;
        if self.analysis.apply_frequency_offset {
            match &self.axis {
                Some(axis) => {
                    spectrum.frequency_offset_hz = axis.offset_at(index, self.analysis.offset_shift_hz)
                }
                None => debug!("no sweep axis, {} left at baseband", path.display()),
            }
        }
        Ok(ProcessedFile {
            index,
            fid_count: wave.fid_count(),
            time_axis: time_axis.to_vec(),
            trace: cut.to_vec(),
            fids: wave.traces,
            spectrum,
            path,
        })
    }
}
/// Analyses a sweep folder: manifest first, then the legacy folder name.
pub fn analyze_folder(
    folder: &Path,
    stem: &str,
    device: &DeviceConfig,
    analysis: AnalysisConfig,
) -> Result<(AnalysisSummary, SpectrumAccumulation)> {
    let (files, axis) = match SweepFileSet::from_manifest(folder) {
        Ok(found) => found,
        Err(e) => {
            debug!("no usable manifest ({e}), reading the folder name");
            let name = folder
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| anyhow!("{} has no folder name", folder.display()))?;
            let (axis, count) = SweepAxis::from_folder_name(name)
                .with_context(|| format!("cannot read sweep parameters from {name:?}"))?;
            (SweepFileSet::new(folder, stem, count), axis)
        }
    };
    info!(
        "analysing {} files in {} (base {} Hz, step {} Hz)",
        files.len(),
        folder.display(),
        axis.base_frequency_hz,
        axis.step_hz
    );
    let decimation = files.decimation();
    let mut pipeline = SpectrumPipeline::new(files, device, analysis)
        .context("invalid analysis settings")?
        .with_sweep_axis(axis);
    if let Some(decimation) = decimation {
        pipeline = pipeline
            .with_decimation(decimation)
            .with_context(|| format!("invalid analysis settings for decimation {decimation}"))?;
    }
    let summary = pipeline.run_to_end();
    Ok((summary, pipeline.into_merged()))
}
#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;
    use crate::drivers::filter::BandpassSettings;
    use crate::drivers::source::ManualSource;
    use crate::drivers::DecodeError;
    const FS: f64 = 1024.0;
    const N: usize = 256;
    fn device() -> DeviceConfig {
        DeviceConfig {
            sampling_rate_hz: FS,
            ..DeviceConfig::default()
        }
    }
    fn analysis() -> AnalysisConfig {
        AnalysisConfig {
            offset_shift_hz: 0.0,
            ..AnalysisConfig::default()
        }
    }
    fn write_tone(path: &Path, freq_hz: f64, fids: usize) {
        write_decimated_tone(path, freq_hz, fids, 1);
    }
    fn write_decimated_tone(path: &Path, freq_hz: f64, fids: usize, decimation: i32) {
        let mut bytes = Vec::new();
        for word in [N as i32, decimation, fids as i32, 0] {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        for _ in 0..fids {
            for i in 0..N {
                let code = (4000.0 * (2.0 * PI * freq_hz * i as f64 / FS).cos()).round() as i16;
                bytes.extend_from_slice(&code.to_le_bytes());
            }
        }
        std::fs::write(path, bytes).unwrap();
    }
    #[test]
    fn sweep_files_are_offset_and_merged() {
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<PathBuf> = (0..2).map(|i| dir.path().join(format!("Stepfreq{i}"))).collect();
        for path in &paths {
            write_tone(path, 64.0, 2);
        }
        let axis = SweepAxis {
            base_frequency_hz: 1_000.0,
            step_hz: 100.0,
        };
        let mut pipeline = SpectrumPipeline::new(ManualSource::new(paths), &device(), analysis())
            .unwrap()
            .with_sweep_axis(axis);
        let summary = pipeline.run_to_end();
        assert_eq!(summary.files.len(), 2);
        assert!(summary.failures.is_empty());
        assert_eq!(summary.files[1].spectrum.frequency_offset_hz, 1_100.0);
        let expected = 2.0 * 4000.0 / 8190.0;
        let merged = pipeline.merged();
        assert_eq!(merged.frame_count(), 2);
        assert!((merged.value_at(1_064.0) - expected).abs() < 1e-2);
        assert!((merged.value_at(1_164.0) - expected).abs() < 1e-2);
        assert!(merged.value_at(1_032.0).abs() < 1e-2);
        let (time, traces) = summary.trace_overlay().unwrap();
        assert_eq!(traces.len(), 2);
        assert_eq!(time.len(), N);
        assert_eq!(traces[1], summary.files[1].trace);
        assert!(AnalysisSummary::default().trace_overlay().is_none());
    }
    #[test]
    fn missing_file_only_skips_itself() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("Stepfreq1");
        write_tone(&good, 32.0, 1);
        let source = ManualSource::new(vec![dir.path().join("Stepfreq0"), good]);
        let mut pipeline = SpectrumPipeline::new(source, &device(), analysis()).unwrap();
        let summary = pipeline.run_to_end();
        assert_eq!(summary.files.len(), 1);
        assert_eq!(summary.files[0].index, 1);
        assert!(matches!(
            summary.failures.as_slice(),
            [PipelineError::Decode(DecodeError::Io { .. })]
        ));
        // no axis: left at baseband
        assert_eq!(summary.files[0].spectrum.frequency_offset_hz, 0.0);
    }
    #[test]
    fn trim_and_bandpass_shape_the_trace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Stepfreq0");
        write_tone(&path, 64.0, 1);
        let config = AnalysisConfig {
            bandpass: Some(BandpassSettings {
                low_hz: 40.0,
                high_hz: 100.0,
                order: 2,
            }),
            start_offset_ms: 1000.0 * 16.0 / FS,
            ..analysis()
        };
        let mut pipeline =
            SpectrumPipeline::new(ManualSource::new(vec![path]), &device(), config).unwrap();
        let file = pipeline.pump_once().unwrap().unwrap();
        assert_eq!(file.trace.len(), N - 16);
        assert_eq!(file.time_axis.len(), N - 16);
        assert_eq!(file.spectrum.len(), N - 16);
        assert!(pipeline.pump_once().unwrap().is_none());
    }
    #[test]
    fn inverted_band_is_rejected_up_front() {
        let config = AnalysisConfig {
            bandpass: Some(BandpassSettings {
                low_hz: 3_000.0,
                high_hz: 1_000.0,
                order: 5,
            }),
            ..analysis()
        };
        let result = SpectrumPipeline::new(ManualSource::new(Vec::new()), &DeviceConfig::default(), config);
        assert!(matches!(result, Err(ProcessingError::InvalidBand { .. })));
    }
    #[test]
    fn band_above_decimated_nyquist_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<PathBuf> = (0..3).map(|i| dir.path().join(format!("Stepfreq{i}"))).collect();
        for path in &paths {
            write_decimated_tone(path, 16.0, 1, 4);
        }
        // valid against 1024 Hz, not against 1024 / 4
        let config = AnalysisConfig {
            bandpass: Some(BandpassSettings {
                low_hz: 100.0,
                high_hz: 400.0,
                order: 2,
            }),
            ..analysis()
        };
        let early = SpectrumPipeline::new(ManualSource::new(Vec::new()), &device(), config.clone())
            .unwrap()
            .with_decimation(4);
        assert!(matches!(early, Err(ProcessingError::InvalidBand { .. })));
        let mut pipeline =
            SpectrumPipeline::new(ManualSource::new(paths), &device(), config).unwrap();
        let summary = pipeline.run_to_end();
        assert!(summary.files.is_empty());
        assert_eq!(summary.failures.len(), 1);
        assert!(matches!(
            summary.failures[0],
            PipelineError::Processing {
                source: ProcessingError::InvalidBand { .. },
                ..
            }
        ));
    }
    #[test]
    fn folder_analysis_falls_back_to_folder_name() {
        let root = tempfile::tempdir().unwrap();
        let folder = root.path().join("SweepFreq_2_100_1000_20240305_140709");
        std::fs::create_dir(&folder).unwrap();
        for i in 0..2 {
            write_tone(&folder.join(format!("Stepfreq{i}")), 64.0, 1);
        }
        let (summary, merged) = analyze_folder(&folder, "Stepfreq", &device(), analysis()).unwrap();
        assert_eq!(summary.files.len(), 2);
        assert_eq!(merged.frame_count(), 2);
        assert!(analyze_folder(root.path(), "Stepfreq", &device(), analysis()).is_err());
    }
}
