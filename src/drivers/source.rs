use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use crate::types::{ManifestError, SweepManifest};
/// One waveform file and its position in the sweep.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WaveformInput {
    pub index: usize,
    pub path: PathBuf,
}
/// Something that can hand out waveform files in sweep order.
pub trait WaveformSource {
    fn next_input(&mut self) -> Option<WaveformInput>;
}
/// In-memory list of files, useful for tests and ad-hoc analysis.
pub struct ManualSource {
    queue: VecDeque<WaveformInput>,
}
impl ManualSource {
    pub fn new(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            queue: paths
                .into_iter()
                .enumerate()
                .map(|(index, path)| WaveformInput { index, path })
                .collect(),
        }
    }
}
impl WaveformSource for ManualSource {
    fn next_input(&mut self) -> Option<WaveformInput> {
        self.queue.pop_front()
    }
}
/// Files `<folder>/<stem>0 .. <stem>{count-1}` written by a sweep.
#[derive(Clone, Debug)]
pub struct SweepFileSet {
    folder: PathBuf,
    stem: String,
    count: usize,
    next: usize,
    decimation: Option<u32>,
}
impl SweepFileSet {
    pub fn new(folder: &Path, stem: &str, count: usize) -> Self {
        Self {
            folder: folder.to_path_buf(),
            stem: stem.to_string(),
            count,
            next: 0,
            decimation: None,
        }
    }
    /// Files listed in the folder's manifest, with the frequency axis it records.
    pub fn from_manifest(folder: &Path) -> Result<(Self, SweepAxis), ManifestError> {
        let manifest = SweepManifest::load(folder)?;
        let mut set = Self::new(folder, &manifest.plan.experiment_name, manifest.steps.len());
        set.decimation = Some(manifest.plan.decimation);
        let axis = SweepAxis {
            base_frequency_hz: manifest.plan.base_frequency_hz,
            step_hz: manifest.plan.effective_frequency_step_hz(),
        };
        Ok((set, axis))
    }
    pub fn len(&self) -> usize {
        self.count
    }
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
    /// Decimation recorded by the sweep, when the folder has a manifest.
    pub fn decimation(&self) -> Option<u32> {
        self.decimation
    }
    pub fn path(&self, index: usize) -> PathBuf {
        self.folder.join(format!("{}{}", self.stem, index))
    }
}
impl WaveformSource for SweepFileSet {
    fn next_input(&mut self) -> Option<WaveformInput> {
        if self.next >= self.count {
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(WaveformInput {
            index,
            path: self.path(index),
        })
    }
}
/// Excitation frequency of each file of a sweep.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SweepAxis {
    pub base_frequency_hz: f64,
    pub step_hz: f64,
}
impl SweepAxis {
    /// Offset given to file `index`: `base + shift + index * step`.
    pub fn offset_at(&self, index: usize, shift_hz: f64) -> f64 {
        self.base_frequency_hz + shift_hz + index as f64 * self.step_hz
    }
    /// Reads `<prefix>_<count>_<step>_<base>_<date>_<time>` folder names left by
    /// sweeps that predate the manifest. Returns the axis and the file count.
    pub fn from_folder_name(name: &str) -> Option<(Self, usize)> {
        let mut fields = name.split('_').skip(1);
        let count = fields.next()?.parse::<usize>().ok()?;
        let step_hz = fields.next()?.parse::<f64>().ok()?;
        let base_frequency_hz = fields.next()?.parse::<f64>().ok()?;
        Some((
            Self {
                base_frequency_hz,
                step_hz,
            },
            count,
        ))
    }
}
