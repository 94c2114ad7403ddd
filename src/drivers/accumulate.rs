use ndarray::{s, Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use crate::drivers::ProcessingError;
/// Late-record window (as fractions of the record length) whose mean is taken as
/// the baseline. The default assumes the FID has decayed before half the record.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineWindow {
    pub start_fraction: f64,
    pub end_fraction: f64,
}
impl Default for BaselineWindow {
    fn default() -> Self {
        Self {
            start_fraction: 0.5,
            end_fraction: 0.98,
        }
    }
}
impl BaselineWindow {
    /// Half-open index range `[start, end)` of the window for a record of `len` samples.
    pub fn bounds(&self, len: usize) -> (usize, usize) {
        let end = ((len as f64 * self.end_fraction).max(0.0) as usize).min(len);
        let start = ((len as f64 * self.start_fraction).max(0.0) as usize).min(end);
        (start, end)
    }
}
/// Sums FID repeats and removes the baseline offset of the sum.
#[derive(Clone, Copy, Debug, Default)]
pub struct Accumulator {
    baseline: BaselineWindow,
}
impl Accumulator {
    pub fn new(baseline: BaselineWindow) -> Self {
        Self { baseline }
    }
    pub fn baseline(&self) -> BaselineWindow {
        self.baseline
    }
    /// Sums the first `count_requested` traces (all of them when the request is
    /// negative or not smaller than the number of traces), then subtracts the
    /// baseline mean.
    pub fn accumulate<T: AsRef<[f64]>>(
        &self,
        traces: &[T],
        count_requested: i64,
    ) -> Result<Vec<f64>, ProcessingError> {
        let first = traces.first().ok_or(ProcessingError::EmptyAccumulation)?;
        let len = first.as_ref().len();
        for (index, trace) in traces.iter().enumerate() {
            let actual = trace.as_ref().len();
            if actual != len {
                return Err(ProcessingError::LengthMismatch {
                    index,
                    expected: len,
                    actual,
                });
            }
        }
        let count = resolve_count(count_requested, traces.len());
        let mut matrix = Array2::<f64>::zeros((count, len));
        for (mut row, trace) in matrix.rows_mut().into_iter().zip(&traces[..count]) {
            row.assign(&ArrayView1::from(trace.as_ref()));
        }
        let mut summed = matrix.sum_axis(Axis(0));
        self.remove_baseline(&mut summed);
        Ok(summed.to_vec())
    }
    pub fn remove_baseline(&self, trace: &mut Array1<f64>) {
        let (start, end) = self.baseline.bounds(trace.len());
        let mean = if end > start {
            trace.slice(s![start..end]).mean()
        } else {
            // window collapses on very short records
            trace.mean()
        };
        if let Some(mean) = mean {
            trace.mapv_inplace(|v| v - mean);
        }
    }
}
/// Number of traces actually summed for a request.
pub fn resolve_count(count_requested: i64, available: usize) -> usize {
    if count_requested < 0 || count_requested as u64 >= available as u64 {
        available
    } else {
        count_requested as usize
    }
}
/// Accumulates with the default baseline window.
pub fn accumulate<T: AsRef<[f64]>>(
    traces: &[T],
    count_requested: i64,
) -> Result<Vec<f64>, ProcessingError> {
    Accumulator::default().accumulate(traces, count_requested)
}
