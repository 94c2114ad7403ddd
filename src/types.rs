// src/types.rs
use std::fs;
use std::path::{Path, PathBuf};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Burst cycle count accepted by the excitation generator.
pub const MAX_BURST_CYCLES: f64 = 50_000.0;
/// Settling time added to every sweep step by the estimate, in seconds.
pub const STEP_OVERHEAD_S: f64 = 1.0;
/// Connection and teardown time added once per sweep by the estimate, in seconds.
pub const SWEEP_OVERHEAD_S: f64 = 3.0;
pub const MANIFEST_FILE: &str = "manifest.json";

// 采集模式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepMode {
    Single,
    FrequencySweep,
    PulseWidthSweep,
    SingleEcho,
    FrequencySweepEcho,
    PulseWidthSweepEcho,
}

impl SweepMode {
    pub const ALL: [SweepMode; 6] = [
        SweepMode::Single,
        SweepMode::FrequencySweep,
        SweepMode::PulseWidthSweep,
        SweepMode::SingleEcho,
        SweepMode::FrequencySweepEcho,
        SweepMode::PulseWidthSweepEcho,
    ];

    pub fn is_echo(self) -> bool {
        matches!(
            self,
            SweepMode::SingleEcho | SweepMode::FrequencySweepEcho | SweepMode::PulseWidthSweepEcho
        )
    }

    pub fn is_single(self) -> bool {
        matches!(self, SweepMode::Single | SweepMode::SingleEcho)
    }

    pub fn sweeps_frequency(self) -> bool {
        matches!(self, SweepMode::FrequencySweep | SweepMode::FrequencySweepEcho)
    }

    pub fn sweeps_pulse_width(self) -> bool {
        matches!(self, SweepMode::PulseWidthSweep | SweepMode::PulseWidthSweepEcho)
    }

    /// Tag that starts the local experiment folder name.
    pub fn folder_prefix(self) -> &'static str {
        match self {
            SweepMode::Single => "Single_",
            SweepMode::FrequencySweep => "SweepFreq_",
            SweepMode::PulseWidthSweep => "SweepP90_",
            SweepMode::SingleEcho => "SingleEcho_",
            SweepMode::FrequencySweepEcho => "SweepFreqEcho_",
            SweepMode::PulseWidthSweepEcho => "SweepP90Echo_",
        }
    }
}

/// Parameters of one acquisition run. Fixed once the run starts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SweepPlan {
    pub mode: SweepMode,
    pub file_count: usize,
    pub frequency_step_hz: f64,
    pub pulse_width_step_s: f64,
    pub base_frequency_hz: f64,
    /// Excitation (pulse) duration of the first step.
    pub base_pulse_width_s: f64,
    pub sample_count: u32,
    pub decimation: u32,
    /// FIDs accumulated on the board for each file.
    pub fids_per_file: u32,
    /// Repetition period of one FID (or echo train).
    pub total_cycle_time_s: f64,
    /// Ignored outside echo modes.
    pub echo_time_s: f64,
    /// Local file stem; step `i` is saved as `<experiment_name><i>`.
    pub experiment_name: String,
}

impl Default for SweepPlan {
    fn default() -> Self {
        Self {
            mode: SweepMode::Single,
            file_count: 1,
            frequency_step_hz: 0.0,
            pulse_width_step_s: 0.0,
            base_frequency_hz: 24.3e6,
            base_pulse_width_s: 10e-6,
            sample_count: 16_384,
            decimation: 64,
            fids_per_file: 10,
            total_cycle_time_s: 1.0,
            echo_time_s: 0.0,
            experiment_name: "Stepfreq".into(),
        }
    }
}

impl SweepPlan {
    /// Single modes always acquire one file.
    pub fn effective_file_count(&self) -> usize {
        if self.mode.is_single() {
            1
        } else {
            self.file_count
        }
    }

    /// Frequency increment actually applied between steps.
    pub fn effective_frequency_step_hz(&self) -> f64 {
        if self.mode.sweeps_frequency() {
            self.frequency_step_hz
        } else {
            0.0
        }
    }

    pub fn effective_pulse_width_step_s(&self) -> f64 {
        if self.mode.sweeps_pulse_width() {
            self.pulse_width_step_s
        } else {
            0.0
        }
    }

    pub fn frequency_at(&self, step: usize) -> f64 {
        self.base_frequency_hz + step as f64 * self.effective_frequency_step_hz()
    }

    pub fn pulse_width_at(&self, step: usize) -> f64 {
        self.base_pulse_width_s + step as f64 * self.effective_pulse_width_step_s()
    }

    /// Duration of the recorded window alone, `N * dec / fs`.
    pub fn acquisition_window_s(&self, sampling_rate_hz: f64) -> f64 {
        (self.sample_count as f64 * self.decimation as f64) / sampling_rate_hz
    }

    /// Time the board is busy per FID for a given pulse width, excitation included.
    pub fn measurement_window_s(&self, sampling_rate_hz: f64, pulse_width_s: f64) -> f64 {
        let window = self.acquisition_window_s(sampling_rate_hz);
        if self.mode.is_echo() {
            window + 3.0 * self.echo_time_s + 3.0 * pulse_width_s
        } else {
            window + pulse_width_s
        }
    }

    /// Idle time between repetitions passed to the acquisition executable, in µs.
    pub fn repeat_delay_us(&self, sampling_rate_hz: f64, pulse_width_s: f64) -> f64 {
        (self.total_cycle_time_s - self.measurement_window_s(sampling_rate_hz, pulse_width_s))
            * 1e6
    }

    pub fn echo_time_us(&self) -> Option<f64> {
        self.mode.is_echo().then(|| self.echo_time_s * 1e6)
    }

    /// `<prefix><files>_<freq_step>_<base_freq>_<YYYYmmdd_HHMMSS>`.
    pub fn folder_name(&self, at: DateTime<Local>) -> String {
        format!(
            "{}{}_{}_{}_{}",
            self.mode.folder_prefix(),
            self.effective_file_count(),
            self.effective_frequency_step_hz(),
            self.base_frequency_hz,
            at.format("%Y%m%d_%H%M%S")
        )
    }

    pub fn local_file_name(&self, step: usize) -> String {
        format!("{}{}", self.experiment_name, step)
    }

    /// Durations and sanity warnings for the plan, without touching the board.
    pub fn estimate(&self, sampling_rate_hz: f64) -> TimingEstimate {
        let files = self.effective_file_count();
        let acquisition_window_s = self.acquisition_window_s(sampling_rate_hz);
        let burst_cycles = self.base_frequency_hz * self.base_pulse_width_s;
        let time_per_step_s = self.total_cycle_time_s * self.fids_per_file as f64 + STEP_OVERHEAD_S;
        let total_time_s = time_per_step_s * files as f64 + SWEEP_OVERHEAD_S;
        let end_frequency_hz = self.base_frequency_hz + self.effective_frequency_step_hz() * files as f64;
        let mut warnings = Vec::new();
        if !(0.0..=MAX_BURST_CYCLES).contains(&burst_cycles) {
            warnings.push(format!(
                "burst of {burst_cycles} cycles is outside 0..={MAX_BURST_CYCLES}, check pulse width or frequency"
            ));
        }
        if self.sample_count % 2 != 0 {
            warnings.push(format!("sample count {} must be even", self.sample_count));
        }
        if acquisition_window_s > self.total_cycle_time_s {
            warnings.push(format!(
                "acquisition window {acquisition_window_s} s exceeds cycle time {} s",
                self.total_cycle_time_s
            ));
        }
        if self.total_cycle_time_s > 1e6 {
            warnings.push(format!(
                "cycle time {} s is implausible, is it in seconds?",
                self.total_cycle_time_s
            ));
        }
        TimingEstimate {
            acquisition_window_s,
            burst_cycles,
            time_per_step_s,
            total_time_s,
            start_frequency_hz: self.base_frequency_hz,
            end_frequency_hz,
            warnings,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TimingEstimate {
    pub acquisition_window_s: f64,
    pub burst_cycles: f64,
    pub time_per_step_s: f64,
    pub total_time_s: f64,
    pub start_frequency_hz: f64,
    pub end_frequency_hz: f64,
    pub warnings: Vec<String>,
}

// 运行状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepState {
    Idle,
    Connecting,
    Running(usize),
    Cancelling,
    Completed,
    Failed,
}

impl SweepState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SweepState::Completed | SweepState::Failed)
    }
}

/// One retrieved file of a sweep.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub index: usize,
    pub frequency_hz: f64,
    pub pulse_width_s: f64,
    pub repeat_delay_us: f64,
    pub file: PathBuf,
}

// 后台发给调用方的消息
#[derive(Clone, Debug)]
pub enum SweepEvent {
    Log(String),
    State(SweepState),
    StepCompleted(StepRecord),
    Finished { state: SweepState, completed: usize },
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Description of a sweep folder, written next to the retrieved files.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SweepManifest {
    pub plan: SweepPlan,
    pub created_at: String,
    pub state: SweepState,
    pub steps: Vec<StepRecord>,
}

impl SweepManifest {
    pub fn new(plan: SweepPlan, created_at: DateTime<Local>) -> Self {
        Self {
            plan,
            created_at: created_at.to_rfc3339(),
            state: SweepState::Idle,
            steps: Vec::new(),
        }
    }

    pub fn save(&self, folder: &Path) -> Result<PathBuf, ManifestError> {
        let path = folder.join(MANIFEST_FILE);
        let text = serde_json::to_string_pretty(self).map_err(|source| ManifestError::Json {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, text).map_err(|source| ManifestError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    pub fn load(folder: &Path) -> Result<Self, ManifestError> {
        let path = folder.join(MANIFEST_FILE);
        let text = fs::read_to_string(&path).map_err(|source| ManifestError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ManifestError::Json { path, source })
    }
}
