use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{ensure, Context, Result};
use log::info;
use serde::Serialize;
use crate::drivers::fft::SpectrumFrame;
use crate::drivers::merge::SpectrumAccumulation;
use crate::drivers::pipeline::ProcessedFile;
#[derive(Serialize)]
struct SpectrumRow {
    frequency_hz: f64,
    magnitude: f64,
}
/// Writes analysis results as CSV and PNG files into one folder.
pub struct DataRecorder {
    folder: PathBuf,
}
impl DataRecorder {
    pub fn new(folder: &Path) -> Result<Self> {
        fs::create_dir_all(folder)
            .with_context(|| format!("cannot create {}", folder.display()))?;
        Ok(Self {
            folder: folder.to_path_buf(),
        })
    }
    pub fn folder(&self) -> &Path {
        &self.folder
    }
    /// `frequency_hz,magnitude` rows, offset applied, in ascending frequency.
    pub fn write_spectrum(&self, name: &str, frame: &SpectrumFrame) -> Result<PathBuf> {
        let mut rows: Vec<SpectrumRow> = frame
            .shifted_frequencies()
            .zip(frame.magnitudes.iter().copied())
            .map(|(frequency_hz, magnitude)| SpectrumRow {
                frequency_hz,
                magnitude,
            })
            .collect();
        rows.sort_by(|a, b| a.frequency_hz.total_cmp(&b.frequency_hz));
        self.write_rows(name, rows)
    }
    pub fn write_merged(&self, name: &str, merged: &SpectrumAccumulation) -> Result<PathBuf> {
        let rows = merged
            .frequencies()
            .iter()
            .zip(merged.magnitudes())
            .map(|(&frequency_hz, &magnitude)| SpectrumRow {
                frequency_hz,
                magnitude,
            });
        self.write_rows(name, rows)
    }
    /// `time_s,fid0..fidN,accumulated` rows for one processed file. FIDs are
    /// cut to the same start as the accumulated trace.
    pub fn write_traces(&self, name: &str, file: &ProcessedFile) -> Result<PathBuf> {
        let fid_len = file.fids.first().map_or(0, Vec::len);
        ensure!(
            file.fids.iter().all(|f| f.len() == fid_len) && file.trace.len() <= fid_len,
            "traces of {} have inconsistent lengths",
            file.path.display()
        );
        let skipped = fid_len - file.trace.len();
        let path = self.folder.join(name);
        let mut writer = csv::Writer::from_path(&path)
            .with_context(|| format!("cannot create {}", path.display()))?;
        let mut header = vec!["time_s".to_string()];
        header.extend((0..file.fids.len()).map(|i| format!("fid{i}")));
        header.push("accumulated".into());
        writer.write_record(&header)?;
        for (row, (t, acc)) in file.time_axis.iter().zip(&file.trace).enumerate() {
            let mut record = Vec::with_capacity(file.fids.len() + 2);
            record.push(t.to_string());
            for fid in &file.fids {
                record.push(fid[skipped + row].to_string());
            }
            record.push(acc.to_string());
            writer.write_record(&record)?;
        }
        writer.flush()?;
        info!("wrote {}", path.display());
        Ok(path)
    }
    pub fn write_png(&self, name: &str, png: &[u8]) -> Result<PathBuf> {
        let path = self.folder.join(name);
        fs::write(&path, png).with_context(|| format!("cannot write {}", path.display()))?;
        info!("wrote {}", path.display());
        Ok(path)
    }
    fn write_rows(&self, name: &str, rows: impl IntoIterator<Item = SpectrumRow>) -> Result<PathBuf> {
        let path = self.folder.join(name);
        let mut writer = csv::Writer::from_path(&path)
            .with_context(|| format!("cannot create {}", path.display()))?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        info!("wrote {}", path.display());
        Ok(path)
    }
}
