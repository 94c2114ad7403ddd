use rustfft::{num_complex::Complex64, FftPlanner};
use serde::{Deserialize, Serialize};
use crate::drivers::ProcessingError;
/// Two-sided magnitude spectrum of one trace.
///
/// Bins follow the raw FFT order: non-negative frequencies first, then the
/// negative ones. `frequency_offset_hz` is added to every bin when the frame
/// is merged into a sweep accumulation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpectrumFrame {
    pub frequencies_hz: Vec<f64>,
    pub magnitudes: Vec<f64>,
    pub frequency_offset_hz: f64,
}
impl SpectrumFrame {
    pub fn with_offset(mut self, frequency_offset_hz: f64) -> Self {
        self.frequency_offset_hz = frequency_offset_hz;
        self
    }
    pub fn len(&self) -> usize {
        self.frequencies_hz.len()
    }
    pub fn is_empty(&self) -> bool {
        self.frequencies_hz.is_empty()
    }
    /// Bin frequencies with the offset applied.
    pub fn shifted_frequencies(&self) -> impl Iterator<Item = f64> + '_ {
        let offset = self.frequency_offset_hz;
        self.frequencies_hz.iter().map(move |f| f + offset)
    }
    /// First `N/2` bins, i.e. the non-negative half of the spectrum.
    pub fn positive_half(&self) -> (&[f64], &[f64]) {
        let half = self.len() / 2;
        (&self.frequencies_hz[..half], &self.magnitudes[..half])
    }
    /// Shifted frequency and magnitude of the strongest bin.
    pub fn peak(&self) -> Option<(f64, f64)> {
        self.shifted_frequencies()
            .zip(self.magnitudes.iter().copied())
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }
}
/// Computes spectra, reusing FFT plans between traces of the same length.
pub struct SpectrumBuilder {
    planner: FftPlanner<f64>,
}
impl Default for SpectrumBuilder {
    fn default() -> Self {
        Self::new()
    }
}
impl SpectrumBuilder {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
        }
    }
    /// DFT of `trace` sampled every `dt` seconds; magnitude is `|X| * 2 / N`.
    pub fn compute(&mut self, trace: &[f64], dt: f64) -> Result<SpectrumFrame, ProcessingError> {
        if !(dt > 0.0) {
            return Err(ProcessingError::InvalidTimeStep(dt));
        }
        if trace.is_empty() {
            return Err(ProcessingError::EmptyTrace);
        }
        let n = trace.len();
        let fft = self.planner.plan_fft_forward(n);
        let mut buffer: Vec<Complex64> = trace.iter().map(|&v| Complex64::new(v, 0.0)).collect();
        fft.process(&mut buffer);
        let scale = 2.0 / n as f64;
        let magnitudes = buffer.iter().map(|c| c.norm() * scale).collect();
        Ok(SpectrumFrame {
            frequencies_hz: fft_frequencies(n, dt),
            magnitudes,
            frequency_offset_hz: 0.0,
        })
    }
}
/// One-shot spectrum of a single trace.
pub fn spectrum(trace: &[f64], dt: f64) -> Result<SpectrumFrame, ProcessingError> {
    SpectrumBuilder::new().compute(trace, dt)
}
/// Bin centres `k / (N * dt)` in FFT output order.
pub fn fft_frequencies(n: usize, dt: f64) -> Vec<f64> {
    let span = n as f64 * dt;
    let positive = (n + 1) / 2;
    (0..n)
        .map(|k| {
            if k < positive {
                k as f64 / span
            } else {
                (k as f64 - n as f64) / span
            }
        })
        .collect()
}
/// Drops the first `floor(start_offset_ms / (1000 * dt))` samples of a trace and its time axis.
pub fn trim_start<'a>(
    trace: &'a [f64],
    time_axis: &'a [f64],
    start_offset_ms: f64,
    dt: f64,
) -> Result<(&'a [f64], &'a [f64]), ProcessingError> {
    if !(dt > 0.0) {
        return Err(ProcessingError::InvalidTimeStep(dt));
    }
    let skip = (start_offset_ms / (1000.0 * dt)).floor().max(0.0) as usize;
    let skip_trace = skip.min(trace.len());
    let skip_time = skip.min(time_axis.len());
    Ok((&trace[skip_trace..], &time_axis[skip_time..]))
}
#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;
    #[test]
    fn tone_lands_in_both_signed_bins() {
        let n = 64;
        let dt = 1.0 / 64.0;
        let trace: Vec<f64> = (0..n)
            .map(|i| (2.0 * PI * 8.0 * i as f64 * dt).cos())
            .collect();
        let frame = spectrum(&trace, dt).unwrap();
        assert_eq!(frame.len(), n);
        assert_eq!(frame.frequencies_hz[8], 8.0);
        assert_eq!(frame.frequencies_hz[56], -8.0);
        assert!((frame.magnitudes[8] - 1.0).abs() < 1e-9);
        assert!((frame.magnitudes[56] - 1.0).abs() < 1e-9);
        assert!(frame.magnitudes[3].abs() < 1e-9);
        let (freqs, mags) = frame.positive_half();
        assert_eq!(freqs.len(), 32);
        assert_eq!(mags.len(), 32);
    }
    #[test]
    fn bin_layout_matches_fftfreq_for_odd_lengths() {
        let freqs = fft_frequencies(5, 0.1);
        let expected = [0.0, 2.0, 4.0, -4.0, -2.0];
        for (got, want) in freqs.iter().zip(expected) {
            assert!((got - want).abs() < 1e-12);
        }
    }
    #[test]
    fn offset_moves_the_peak() {
        let trace: Vec<f64> = (0..32).map(|i| (2.0 * PI * 4.0 * i as f64 / 32.0).cos()).collect();
        let frame = spectrum(&trace, 1.0 / 32.0).unwrap().with_offset(1_000.0);
        let (freq, mag) = frame.peak().unwrap();
        assert!((freq.abs() - 1_004.0).abs() < 1e-9 || (freq - 996.0).abs() < 1e-9);
        assert!((mag - 1.0).abs() < 1e-9);
    }
    #[test]
    fn invalid_inputs_are_rejected() {
        assert!(matches!(
            spectrum(&[1.0, 2.0], 0.0),
            Err(ProcessingError::InvalidTimeStep(_))
        ));
        assert!(matches!(
            spectrum(&[], 1e-3),
            Err(ProcessingError::EmptyTrace)
        ));
    }
    #[test]
    fn trim_drops_dead_time() {
        let trace: Vec<f64> = (0..100).map(|i| i as f64).collect();
        let dt = 1.0 / 1024.0;
        let time: Vec<f64> = (0..100).map(|i| i as f64 * dt).collect();
        let (cut, t) = trim_start(&trace, &time, 10.0 * dt * 1000.0, dt).unwrap();
        assert_eq!(cut.len(), 90);
        assert_eq!(t.len(), 90);
        assert_eq!(cut[0], 10.0);
        let (all, _) = trim_start(&trace, &time, 0.0, dt).unwrap();
        assert_eq!(all.len(), 100);
        let (none, _) = trim_start(&trace, &time, 500.0, dt).unwrap();
        assert!(none.is_empty());
    }
}
