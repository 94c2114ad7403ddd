use std::f64::consts::PI;
use serde::{Deserialize, Serialize};
use crate::drivers::ProcessingError;
/// Passband of the Butterworth bandpass applied before the FFT.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BandpassSettings {
    pub low_hz: f64,
    pub high_hz: f64,
    pub order: usize,
}
impl Default for BandpassSettings {
    fn default() -> Self {
        Self {
            low_hz: 1_000.0,
            high_hz: 3_000.0,
            order: 5,
        }
    }
}
#[derive(Clone, Copy, Debug)]
struct BiquadCoeffs {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}
#[derive(Clone, Copy, Debug, Default)]
struct BiquadState {
    z1: f64,
    z2: f64,
}
#[derive(Clone, Copy, Debug)]
struct BiquadFilter {
    coeffs: BiquadCoeffs,
    state: BiquadState,
}
impl BiquadFilter {
    fn new(coeffs: BiquadCoeffs) -> Self {
        Self {
            coeffs,
            state: BiquadState::default(),
        }
    }
    fn process(&mut self, input: f64) -> f64 {
        // Transposed direct form II
        let y = self.coeffs.b0 * input + self.state.z1;
        self.state.z1 = self.coeffs.b1 * input - self.coeffs.a1 * y + self.state.z2;
        self.state.z2 = self.coeffs.b2 * input - self.coeffs.a2 * y;
        y
    }
}
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Pass {
    Low,
    High,
}
/// Cascade of second-order sections, run causally sample by sample.
#[derive(Clone, Default, Debug)]
pub struct FilterChain {
    sections: Vec<BiquadFilter>,
}
impl FilterChain {
    pub fn empty() -> Self {
        Self { sections: vec![] }
    }
    /// Butterworth bandpass built as an order-`order` low-pass at `high_hz`
    /// followed by an order-`order` high-pass at `low_hz`.
    ///
    /// This is not the low-pass to bandpass transform of a single order-`order`
    /// design. Both give the same stopband slope and are close for bands wider
    /// than an octave, but on narrow bands the cascade's two -3 dB skirts
    /// overlap and the passband centre sits below unity gain.
    pub fn butterworth_bandpass(
        low_hz: f64,
        high_hz: f64,
        sampling_rate_hz: f64,
        order: usize,
    ) -> Result<Self, ProcessingError> {
        validate_band(low_hz, high_hz, sampling_rate_hz, order)?;
        let mut sections = butterworth_sections(order, high_hz, sampling_rate_hz, Pass::Low);
        sections.extend(butterworth_sections(
            order,
            low_hz,
            sampling_rate_hz,
            Pass::High,
        ));
        Ok(Self { sections })
    }
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
    pub fn section_count(&self) -> usize {
        self.sections.len()
    }
    pub fn reset(&mut self) {
        for section in &mut self.sections {
            section.state = BiquadState::default();
        }
    }
    pub fn process_sample(&mut self, mut value: f64) -> f64 {
        for section in &mut self.sections {
            value = section.process(value);
        }
        value
    }
    pub fn apply(&mut self, trace: &[f64]) -> Vec<f64> {
        trace.iter().map(|&v| self.process_sample(v)).collect()
    }
}
/// Checks the band edges against the sampling rate before any filter is designed.
pub fn validate_band(
    low_hz: f64,
    high_hz: f64,
    sampling_rate_hz: f64,
    order: usize,
) -> Result<(), ProcessingError> {
    let nyquist_hz = sampling_rate_hz * 0.5;
    let invalid = || ProcessingError::InvalidBand {
        low_hz,
        high_hz,
        order,
        nyquist_hz,
    };
    if !(low_hz < high_hz) {
        return Err(invalid());
    }
    if !(low_hz > 0.0) || !(high_hz < nyquist_hz) || order == 0 {
        return Err(invalid());
    }
    Ok(())
}
/// Filters `trace` with a fresh Butterworth bandpass.
pub fn bandpass(
    trace: &[f64],
    low_hz: f64,
    high_hz: f64,
    sampling_rate_hz: f64,
    order: usize,
) -> Result<Vec<f64>, ProcessingError> {
    let mut chain = FilterChain::butterworth_bandpass(low_hz, high_hz, sampling_rate_hz, order)?;
    Ok(chain.apply(trace))
}
fn butterworth_sections(
    order: usize,
    cutoff_hz: f64,
    sampling_rate_hz: f64,
    pass: Pass,
) -> Vec<BiquadFilter> {
    let mut sections = Vec::with_capacity(order / 2 + 1);
    for k in 0..order / 2 {
        // Q of the k-th conjugate pole pair of the analog prototype
        let q = 1.0 / (2.0 * (PI * (2 * k + 1) as f64 / (2 * order) as f64).sin());
        sections.push(BiquadFilter::new(second_order(
            cutoff_hz,
            sampling_rate_hz,
            q,
            pass,
        )));
    }
    if order % 2 == 1 {
        sections.push(BiquadFilter::new(first_order(
            cutoff_hz,
            sampling_rate_hz,
            pass,
        )));
    }
    sections
}
fn second_order(freq_hz: f64, sampling_rate_hz: f64, q: f64, pass: Pass) -> BiquadCoeffs {
    let w0 = 2.0 * PI * freq_hz / sampling_rate_hz;
    let alpha = w0.sin() / (2.0 * q);
    let cos_w0 = w0.cos();
    let (b0, b1) = match pass {
        Pass::Low => ((1.0 - cos_w0) * 0.5, 1.0 - cos_w0),
        Pass::High => ((1.0 + cos_w0) * 0.5, -(1.0 + cos_w0)),
    };
    let b2 = b0;
    let a0 = 1.0 + alpha;
    let a1 = -2.0 * cos_w0;
    let a2 = 1.0 - alpha;
    normalize(b0, b1, b2, a0, a1, a2)
}
fn first_order(freq_hz: f64, sampling_rate_hz: f64, pass: Pass) -> BiquadCoeffs {
    let k = (PI * freq_hz / sampling_rate_hz).tan();
    let (b0, b1) = match pass {
        Pass::Low => (k, k),
        Pass::High => (1.0, -1.0),
    };
    normalize(b0, b1, 0.0, 1.0 + k, k - 1.0, 0.0)
}
fn normalize(b0: f64, b1: f64, b2: f64, a0: f64, a1: f64, a2: f64) -> BiquadCoeffs {
    let a0_inv = 1.0 / a0;
    BiquadCoeffs {
        b0: b0 * a0_inv,
        b1: b1 * a0_inv,
        b2: b2 * a0_inv,
        a1: a1 * a0_inv,
        a2: a2 * a0_inv,
    }
}
