// src/config.rs
use std::fs;
use std::path::Path;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use crate::drivers::accumulate::BaselineWindow;
use crate::drivers::filter::BandpassSettings;
/// Acquisition board constants and how to reach it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub sampling_rate_hz: f64,
    /// ADC code that maps to 1 V.
    pub full_scale_code: f64,
    pub host: String,
    pub user: String,
    pub port: u16,
    pub connect_timeout_secs: u64,
    /// Directory on the board holding the acquisition executables.
    pub remote_folder: String,
    pub fid_executable: String,
    pub echo_executable: String,
    /// Output file path, relative to `remote_folder`.
    pub remote_output: String,
}
impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            sampling_rate_hz: 125.0e6,
            full_scale_code: 8190.0,
            host: "169.254.215.235".into(),
            user: "root".into(),
            port: 22,
            connect_timeout_secs: 10,
            remote_folder: "Pitaya-Tests".into(),
            fid_executable: "Acquisition_axi.exe".into(),
            echo_executable: "Acquisition_echo.exe".into(),
            remote_output: "mesures/mesure.bin".into(),
        }
    }
}
impl DeviceConfig {
    /// Path of the acquisition output as seen from the remote login directory.
    pub fn remote_output_path(&self) -> String {
        format!(
            "{}/{}",
            self.remote_folder.trim_end_matches('/'),
            self.remote_output
        )
    }
    pub fn executable(&self, echo: bool) -> &str {
        if echo {
            &self.echo_executable
        } else {
            &self.fid_executable
        }
    }
}
/// Post-processing applied to retrieved files.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// `None` skips the bandpass.
    pub bandpass: Option<BandpassSettings>,
    /// Dead time removed from the start of each trace before the FFT.
    pub start_offset_ms: f64,
    /// Shift each file's spectrum by its excitation frequency before merging.
    pub apply_frequency_offset: bool,
    /// Added to the base frequency to get the offset of the first file.
    pub offset_shift_hz: f64,
    pub baseline: BaselineWindow,
    /// FIDs read per file, negative for all.
    pub fid_count: i64,
}
impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            bandpass: None,
            start_offset_ms: 0.0,
            apply_frequency_offset: true,
            offset_shift_hz: -50_000.0,
            baseline: BaselineWindow::default(),
            fid_count: -1,
        }
    }
}
/// Everything the binary reads from its JSON settings file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub device: DeviceConfig,
    pub analysis: AnalysisConfig,
}
impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse settings {}", path.display()))
    }
    /// Loads `path` when given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)
            .with_context(|| format!("failed to write settings {}", path.display()))
    }
}
