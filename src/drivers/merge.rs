use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use crate::drivers::fft::SpectrumFrame;
/// Running sum of magnitude spectra on the union of every frame's frequency grid.
///
/// Each frame is treated as a piecewise-linear function that is zero outside its
/// own frequency range. The stored sum is exact at every grid point, so merging
/// the same frames in any order gives the same grid and (up to rounding) the
/// same sums.
#[derive(Clone, Debug, Default)]
pub struct SpectrumAccumulation {
    grid: Vec<f64>,
    sum: Vec<f64>,
    // summed magnitude of frames whose highest bin sits at this frequency
    upper_edges: HashMap<u64, f64>,
    // summed magnitude of frames whose lowest bin sits at this frequency
    lower_edges: HashMap<u64, f64>,
    frames: usize,
}
impl SpectrumAccumulation {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn frequencies(&self) -> &[f64] {
        &self.grid
    }
    pub fn magnitudes(&self) -> &[f64] {
        &self.sum
    }
    pub fn frame_count(&self) -> usize {
        self.frames
    }
    pub fn is_empty(&self) -> bool {
        self.grid.is_empty()
    }
    /// Value of the accumulated spectrum at `freq_hz`, zero outside the grid.
    pub fn value_at(&self, freq_hz: f64) -> f64 {
        match self.grid.binary_search_by(|g| g.total_cmp(&freq_hz)) {
            Ok(idx) => self.sum[idx],
            Err(idx) if idx == 0 || idx == self.grid.len() => 0.0,
            Err(idx) => self.between(idx - 1, freq_hz),
        }
    }
    /// Adds one frame (with its offset applied) to the accumulation.
    pub fn merge(&mut self, frame: &SpectrumFrame) {
        self.frames += 1;
        let points = sorted_points(frame);
        let (Some(&(low, low_mag)), Some(&(high, high_mag))) = (points.first(), points.last())
        else {
            return;
        };
        if self.grid.is_empty() {
            self.grid = points.iter().map(|p| p.0).collect();
            self.sum = points.iter().map(|p| p.1).collect();
        } else {
            let union = union_grid(&self.grid, points.iter().map(|p| p.0));
            let mut sum = Vec::with_capacity(union.len());
            let mut old_idx = 0;
            let mut new_idx = 0;
            for &freq in &union {
                while old_idx < self.grid.len() && self.grid[old_idx] < freq {
                    old_idx += 1;
                }
                while new_idx < points.len() && points[new_idx].0 < freq {
                    new_idx += 1;
                }
                let prior = if old_idx < self.grid.len() && self.grid[old_idx] == freq {
                    self.sum[old_idx]
                } else if old_idx == 0 || old_idx == self.grid.len() {
                    0.0
                } else {
                    self.between(old_idx - 1, freq)
                };
                let incoming = if new_idx < points.len() && points[new_idx].0 == freq {
                    points[new_idx].1
                } else if new_idx == 0 || new_idx == points.len() {
                    0.0
                } else {
                    lerp(points[new_idx - 1], points[new_idx], freq)
                };
                sum.push(prior + incoming);
            }
            self.grid = union;
            self.sum = sum;
        }
        *self.lower_edges.entry(low.to_bits()).or_insert(0.0) += low_mag;
        *self.upper_edges.entry(high.to_bits()).or_insert(0.0) += high_mag;
    }
    /// Snapshot as a frame whose frequencies already include every offset.
    pub fn to_frame(&self) -> SpectrumFrame {
        SpectrumFrame {
            frequencies_hz: self.grid.clone(),
            magnitudes: self.sum.clone(),
            frequency_offset_hz: 0.0,
        }
    }
    // Interpolates strictly between grid[left] and grid[left + 1]. Frames that end
    // at the left point or start at the right point are zero inside the gap, so
    // their share of the endpoint values is removed from the straight line.
    fn between(&self, left: usize, freq_hz: f64) -> f64 {
        let a = self.grid[left];
        let b = self.grid[left + 1];
        let t = (freq_hz - a) / (b - a);
        let ending = self.upper_edges.get(&a.to_bits()).copied().unwrap_or(0.0);
        let starting = self.lower_edges.get(&b.to_bits()).copied().unwrap_or(0.0);
        (self.sum[left] - ending) * (1.0 - t) + (self.sum[left + 1] - starting) * t
    }
}
/// Functional form of [`SpectrumAccumulation::merge`].
pub fn merge(mut accumulation: SpectrumAccumulation, frame: &SpectrumFrame) -> SpectrumAccumulation {
    accumulation.merge(frame);
    accumulation
}
/// Accumulation that several workers may merge into concurrently.
#[derive(Clone, Debug, Default)]
pub struct SharedAccumulation {
    inner: Arc<Mutex<SpectrumAccumulation>>,
}
impl SharedAccumulation {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn merge(&self, frame: &SpectrumFrame) {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.merge(frame);
    }
    pub fn snapshot(&self) -> SpectrumAccumulation {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
fn sorted_points(frame: &SpectrumFrame) -> Vec<(f64, f64)> {
    let mut points: Vec<(f64, f64)> = frame
        .shifted_frequencies()
        .zip(frame.magnitudes.iter().copied())
        .filter(|(f, m)| f.is_finite() && m.is_finite())
        .collect();
    points.sort_by(|a, b| a.0.total_cmp(&b.0));
    points.dedup_by(|later, earlier| later.0 == earlier.0);
    points
}
fn union_grid(existing: &[f64], incoming: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut union: Vec<f64> = existing.iter().copied().chain(incoming).collect();
    union.sort_by(f64::total_cmp);
    union.dedup();
    union
}
fn lerp(left: (f64, f64), right: (f64, f64), x: f64) -> f64 {
    let t = (x - left.0) / (right.0 - left.0);
    left.1 * (1.0 - t) + right.1 * t
}
#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    fn frame(freqs: &[f64], mags: &[f64], offset: f64) -> SpectrumFrame {
        SpectrumFrame {
            frequencies_hz: freqs.to_vec(),
            magnitudes: mags.to_vec(),
            frequency_offset_hz: offset,
        }
    }
    fn random_frame(rng: &mut StdRng, len: usize, spacing: f64, offset: f64) -> SpectrumFrame {
        let freqs: Vec<f64> = (0..len).map(|k| k as f64 * spacing).collect();
        let mags: Vec<f64> = (0..len).map(|_| rng.gen_range(0.0..1.0)).collect();
        frame(&freqs, &mags, offset)
    }
    fn brute_force(frames: &[SpectrumFrame], x: f64) -> f64 {
        frames
            .iter()
            .map(|f| {
                let pts = sorted_points(f);
                match pts.binary_search_by(|p| p.0.total_cmp(&x)) {
                    Ok(i) => pts[i].1,
                    Err(i) if i == 0 || i == pts.len() => 0.0,
                    Err(i) => lerp(pts[i - 1], pts[i], x),
                }
            })
            .sum()
    }
    #[test]
    fn first_frame_initialises_grid_with_offset() {
        let mut acc = SpectrumAccumulation::new();
        acc.merge(&frame(&[0.0, 1.0, -1.0], &[3.0, 2.0, 1.0], 10.0));
        assert_eq!(acc.frequencies(), &[9.0, 10.0, 11.0]);
        assert_eq!(acc.magnitudes(), &[1.0, 3.0, 2.0]);
        assert_eq!(acc.frame_count(), 1);
    }
    #[test]
    fn overlapping_frames_interpolate_and_zero_fill() {
        let mut acc = SpectrumAccumulation::new();
        acc.merge(&frame(&[0.0, 2.0], &[1.0, 1.0], 0.0));
        acc.merge(&frame(&[1.0, 3.0], &[2.0, 4.0], 0.0));
        assert_eq!(acc.frequencies(), &[0.0, 1.0, 2.0, 3.0]);
        let expected = [1.0, 3.0, 4.0, 4.0];
        for (got, want) in acc.magnitudes().iter().zip(expected) {
            assert!((got - want).abs() < 1e-12, "{got} != {want}");
        }
    }
    #[test]
    fn gap_next_to_a_frame_edge_stays_exact() {
        let a = frame(&[0.0, 1.0], &[5.0, 5.0], 0.0);
        let b = frame(&[2.0, 3.0], &[1.0, 1.0], 0.0);
        let c = frame(&[0.0, 3.0], &[0.0, 3.0], 0.0);
        let acc = [&a, &b, &c]
            .into_iter()
            .fold(SpectrumAccumulation::new(), |acc, f| merge(acc, f));
        // c contributes 1.5 at 1.5 Hz; a and b are both zero there
        assert!((acc.value_at(1.5) - 1.5).abs() < 1e-12);
        assert!((acc.value_at(1.0) - 6.0).abs() < 1e-12);
    }
    #[test]
    fn merge_order_does_not_change_result() {
        let mut rng = StdRng::seed_from_u64(7);
        let a = random_frame(&mut rng, 64, 1.0, 0.0);
        let b = random_frame(&mut rng, 64, 1.0, 20.3);
        let c = random_frame(&mut rng, 48, 1.7, -5.55);
        let forward = [&a, &b, &c]
            .into_iter()
            .fold(SpectrumAccumulation::new(), |acc, f| merge(acc, f));
        let rotated = [&c, &a, &b]
            .into_iter()
            .fold(SpectrumAccumulation::new(), |acc, f| merge(acc, f));
        assert_eq!(forward.frequencies(), rotated.frequencies());
        for (x, y) in forward.magnitudes().iter().zip(rotated.magnitudes()) {
            assert!((x - y).abs() < 1e-9);
        }
        let all = [a.clone(), b.clone(), c.clone()];
        for (freq, mag) in forward.frequencies().iter().zip(forward.magnitudes()) {
            assert!((brute_force(&all, *freq) - mag).abs() < 1e-9);
        }
    }
    #[test]
    fn grid_never_shrinks() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut acc = SpectrumAccumulation::new();
        let mut previous = 0;
        for step in 0..5 {
            acc.merge(&random_frame(&mut rng, 16, 2.0, step as f64 * 3.0));
            assert!(acc.frequencies().len() >= previous);
            assert!(acc.frequencies().windows(2).all(|w| w[0] < w[1]));
            previous = acc.frequencies().len();
        }
    }
    #[test]
    fn shared_accumulation_serialises_parallel_merges() {
        let shared = SharedAccumulation::new();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let shared = shared.clone();
                std::thread::spawn(move || {
                    shared.merge(&frame(&[0.0, 1.0], &[1.0, 1.0], i as f64 * 0.5));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let snapshot = shared.snapshot();
        assert_eq!(snapshot.frame_count(), 4);
        assert_eq!(snapshot.frequencies().len(), 6);
    }
}
