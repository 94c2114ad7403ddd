use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use log::debug;
use crate::config::DeviceConfig;
use crate::drivers::accumulate::Accumulator;
use crate::drivers::error::DecodeError;
/// Size of the binary header: four little-endian `i32` words.
pub const BINARY_HEADER_LEN: usize = 16;
const SAMPLE_BYTES: usize = 2;
/// On-disk layout of a waveform file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaveformFormat {
    /// 16-byte header then `fid_count` blocks of `sample_count` LE `i16` codes.
    Binary,
    /// CSV header row `sample_count,decimation,fid_count,gain,offset,bit_depth`,
    /// then one row of volts per FID.
    Text,
}
impl WaveformFormat {
    /// `.csv` / `.txt` files are text, everything else (the device writes
    /// extension-less files) is binary.
    pub fn detect(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("csv") | Some("txt") => WaveformFormat::Text,
            _ => WaveformFormat::Binary,
        }
    }
}
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WaveformHeader {
    pub sample_count: usize,
    pub decimation: u32,
    pub fid_count: usize,
    /// Text files only.
    pub gain: Option<f64>,
    /// Text files only.
    pub offset: Option<f64>,
    /// Text files only.
    pub bit_depth: Option<u32>,
    /// Fourth binary header word, written as the gain setting by the board.
    pub reserved: Option<i32>,
}
/// A decoded file: header, time axis, one trace per FID and their accumulation.
#[derive(Clone, Debug)]
pub struct DecodedWaveform {
    pub path: PathBuf,
    pub format: WaveformFormat,
    pub header: WaveformHeader,
    pub time_axis: Vec<f64>,
    pub traces: Vec<Vec<f64>>,
    pub accumulated: Vec<f64>,
}
impl DecodedWaveform {
    pub fn fid_count(&self) -> usize {
        self.traces.len()
    }
    pub fn sample_count(&self) -> usize {
        self.header.sample_count
    }
    /// Sampling interval of the time axis.
    pub fn dt(&self) -> f64 {
        match self.time_axis.as_slice() {
            [first, second, ..] => second - first,
            _ => 0.0,
        }
    }
}
/// Parses waveform files produced by the acquisition board.
#[derive(Clone, Debug)]
pub struct WaveformDecoder {
    sampling_rate_hz: f64,
    full_scale_code: f64,
    accumulator: Accumulator,
}
impl WaveformDecoder {
    pub fn new(sampling_rate_hz: f64, full_scale_code: f64, accumulator: Accumulator) -> Self {
        Self {
            sampling_rate_hz,
            full_scale_code,
            accumulator,
        }
    }
    pub fn from_config(config: &DeviceConfig) -> Self {
        Self::new(
            config.sampling_rate_hz,
            config.full_scale_code,
            Accumulator::default(),
        )
    }
    pub fn with_accumulator(mut self, accumulator: Accumulator) -> Self {
        self.accumulator = accumulator;
        self
    }
    /// Decodes `path`, picking the format from its extension.
    ///
    /// `requested_fid_count >= 0` limits how many traces are read; a negative
    /// value reads as many as the header declares.
    pub fn decode_path(
        &self,
        path: &Path,
        requested_fid_count: i64,
    ) -> Result<DecodedWaveform, DecodeError> {
        let format = WaveformFormat::detect(path);
        debug!("decoding {} as {:?}", path.display(), format);
        match format {
            WaveformFormat::Binary => {
                let bytes = fs::read(path).map_err(|source| DecodeError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                self.decode_binary(&bytes, requested_fid_count, path)
            }
            WaveformFormat::Text => {
                let file = fs::File::open(path).map_err(|source| DecodeError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                self.decode_text(file, requested_fid_count, path)
            }
        }
    }
    /// Decodes an in-memory binary file. `origin` is only used in errors.
    pub fn decode_binary(
        &self,
        bytes: &[u8],
        requested_fid_count: i64,
        origin: &Path,
    ) -> Result<DecodedWaveform, DecodeError> {
        if bytes.len() < BINARY_HEADER_LEN {
            return Err(DecodeError::HeaderParse {
                path: origin.to_path_buf(),
                reason: format!(
                    "expected a {BINARY_HEADER_LEN}-byte header, file has {} bytes",
                    bytes.len()
                ),
            });
        }
        let word = |idx: usize| {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&bytes[idx * 4..idx * 4 + 4]);
            i32::from_le_bytes(raw)
        };
        let (sample_count, decimation, fid_count) =
            checked_counts(origin, word(0) as i64, word(1) as i64, word(2) as i64)?;
        let header = WaveformHeader {
            sample_count,
            decimation,
            fid_count,
            gain: None,
            offset: None,
            bit_depth: None,
            reserved: Some(word(3)),
        };
        let to_read = if requested_fid_count < 0 {
            fid_count
        } else {
            (requested_fid_count as usize).min(fid_count)
        };
        let block = sample_count
            .checked_mul(SAMPLE_BYTES)
            .ok_or_else(|| DecodeError::HeaderParse {
                path: origin.to_path_buf(),
                reason: format!("sample count {sample_count} is too large"),
            })?;
        // the whole file must hold exactly the traces the header declares
        let expected_len = fid_count
            .checked_mul(block)
            .and_then(|data| data.checked_add(BINARY_HEADER_LEN))
            .ok_or_else(|| DecodeError::HeaderParse {
                path: origin.to_path_buf(),
                reason: format!("{fid_count} traces of {sample_count} samples overflow the file size"),
            })?;
        if bytes.len() < expected_len {
            let trace = (bytes.len() - BINARY_HEADER_LEN) / block;
            return Err(DecodeError::TruncatedFile {
                path: origin.to_path_buf(),
                trace,
                needed: BINARY_HEADER_LEN + (trace + 1) * block,
                available: bytes.len(),
                unit: "bytes",
            });
        }
        if bytes.len() > expected_len {
            return Err(DecodeError::HeaderParse {
                path: origin.to_path_buf(),
                reason: format!(
                    "header declares {expected_len} bytes, file has {} ({} trailing)",
                    bytes.len(),
                    bytes.len() - expected_len
                ),
            });
        }
        let traces = bytes[BINARY_HEADER_LEN..]
            .chunks_exact(block)
            .take(to_read)
            .map(|raw| {
                raw.chunks_exact(SAMPLE_BYTES)
                    .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f64 / self.full_scale_code)
                    .collect::<Vec<f64>>()
            })
            .collect();
        self.finish(origin, WaveformFormat::Binary, header, traces)
    }
    /// Decodes a CSV waveform from any reader. `origin` is only used in errors.
    pub fn decode_text<R: Read>(
        &self,
        reader: R,
        requested_fid_count: i64,
        origin: &Path,
    ) -> Result<DecodedWaveform, DecodeError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut records = csv_reader.records();
        let header_row = match records.next() {
            Some(row) => row.map_err(|e| csv_failure(origin, e, "header row"))?,
            None => {
                return Err(DecodeError::HeaderParse {
                    path: origin.to_path_buf(),
                    reason: "file is empty".into(),
                })
            }
        };
        if header_row.len() != 6 {
            return Err(DecodeError::HeaderParse {
                path: origin.to_path_buf(),
                reason: format!("expected 6 header fields, found {}", header_row.len()),
            });
        }
        let int_field = |idx: usize, name: &str| -> Result<i64, DecodeError> {
            header_row[idx]
                .parse::<i64>()
                .map_err(|_| DecodeError::HeaderParse {
                    path: origin.to_path_buf(),
                    reason: format!("{name} {:?} is not an integer", &header_row[idx]),
                })
        };
        let float_field = |idx: usize, name: &str| -> Result<f64, DecodeError> {
            header_row[idx]
                .parse::<f64>()
                .map_err(|_| DecodeError::HeaderParse {
                    path: origin.to_path_buf(),
                    reason: format!("{name} {:?} is not a number", &header_row[idx]),
                })
        };
        let (sample_count, decimation, fid_count) = checked_counts(
            origin,
            int_field(0, "sample count")?,
            int_field(1, "decimation")?,
            int_field(2, "FID count")?,
        )?;
        let bit_depth = int_field(5, "bit depth")?;
        let header = WaveformHeader {
            sample_count,
            decimation,
            fid_count,
            gain: Some(float_field(3, "gain")?),
            offset: Some(float_field(4, "offset")?),
            bit_depth: Some(u32::try_from(bit_depth).map_err(|_| DecodeError::HeaderParse {
                path: origin.to_path_buf(),
                reason: format!("bit depth {bit_depth} is out of range"),
            })?),
            reserved: None,
        };
        let to_read = if requested_fid_count < 0 {
            fid_count
        } else {
            requested_fid_count as usize
        };
        let mut traces = Vec::new();
        for trace in 0..to_read {
            let row = match records.next() {
                Some(row) => row.map_err(|e| csv_failure(origin, e, "trace row"))?,
                None => {
                    return Err(DecodeError::TruncatedFile {
                        path: origin.to_path_buf(),
                        trace,
                        needed: to_read.saturating_add(1),
                        available: trace + 1,
                        unit: "rows",
                    })
                }
            };
            if row.len() != sample_count {
                return Err(DecodeError::LengthMismatch {
                    path: origin.to_path_buf(),
                    trace,
                    expected: sample_count,
                    actual: row.len(),
                });
            }
            let samples = row
                .iter()
                .enumerate()
                .map(|(column, value)| {
                    value.parse::<f64>().map_err(|_| DecodeError::InvalidSample {
                        path: origin.to_path_buf(),
                        trace,
                        column,
                        value: value.to_string(),
                    })
                })
                .collect::<Result<Vec<f64>, _>>()?;
            traces.push(samples);
        }
        self.finish(origin, WaveformFormat::Text, header, traces)
    }
    /// Uniform time axis `t[i] = i * decimation / sampling_rate`.
    pub fn time_axis(&self, sample_count: usize, decimation: u32) -> Vec<f64> {
        let dt = decimation as f64 / self.sampling_rate_hz;
        (0..sample_count).map(|i| i as f64 * dt).collect()
    }
    fn finish(
        &self,
        origin: &Path,
        format: WaveformFormat,
        header: WaveformHeader,
        traces: Vec<Vec<f64>>,
    ) -> Result<DecodedWaveform, DecodeError> {
        let accumulated =
            self.accumulator
                .accumulate(&traces, -1)
                .map_err(|source| DecodeError::Processing {
                    path: origin.to_path_buf(),
                    source,
                })?;
        Ok(DecodedWaveform {
            path: origin.to_path_buf(),
            format,
            time_axis: self.time_axis(header.sample_count, header.decimation),
            header,
            traces,
            accumulated,
        })
    }
}
/// Decodes a file with the device constants from `config`.
pub fn decode(
    path: &Path,
    requested_fid_count: i64,
    config: &DeviceConfig,
) -> Result<DecodedWaveform, DecodeError> {
    WaveformDecoder::from_config(config).decode_path(path, requested_fid_count)
}
fn checked_counts(
    origin: &Path,
    sample_count: i64,
    decimation: i64,
    fid_count: i64,
) -> Result<(usize, u32, usize), DecodeError> {
    if sample_count == 0 {
        return Err(DecodeError::EmptyWaveform {
            path: origin.to_path_buf(),
        });
    }
    let bad = |reason: String| DecodeError::HeaderParse {
        path: origin.to_path_buf(),
        reason,
    };
    if sample_count < 0 {
        return Err(bad(format!("sample count {sample_count} is negative")));
    }
    if decimation <= 0 || decimation > u32::MAX as i64 {
        return Err(bad(format!("decimation {decimation} is out of range")));
    }
    if fid_count <= 0 {
        return Err(bad(format!("FID count {fid_count} must be positive")));
    }
    Ok((sample_count as usize, decimation as u32, fid_count as usize))
}
fn csv_failure(origin: &Path, error: csv::Error, what: &str) -> DecodeError {
    match error.into_kind() {
        csv::ErrorKind::Io(source) => DecodeError::Io {
            path: origin.to_path_buf(),
            source,
        },
        other => DecodeError::HeaderParse {
            path: origin.to_path_buf(),
            reason: format!("unreadable {what}: {other:?}"),
        },
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    fn decoder() -> WaveformDecoder {
        WaveformDecoder::new(125.0e6, 8190.0, Accumulator::default())
    }
    fn binary_file(sample_count: i32, decimation: i32, traces: &[Vec<i16>]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for word in [sample_count, decimation, traces.len() as i32, 0] {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        for trace in traces {
            for sample in trace {
                bytes.extend_from_slice(&sample.to_le_bytes());
            }
        }
        bytes
    }
    #[test]
    fn binary_round_trip_uses_full_file() {
        let traces = vec![vec![8190, -8190, 0, 4095], vec![1, 2, 3, 4], vec![0; 4]];
        let bytes = binary_file(4, 2, &traces);
        let wave = decoder()
            .decode_binary(&bytes, -1, Path::new("mem.bin"))
            .unwrap();
        assert_eq!(wave.fid_count(), 3);
        assert_eq!(wave.sample_count(), 4);
        let footprint: usize = wave.traces.iter().map(|t| t.len() * 2).sum();
        assert_eq!(footprint, bytes.len() - BINARY_HEADER_LEN);
        assert_eq!(wave.traces[0][0], 1.0);
        assert_eq!(wave.traces[0][1], -1.0);
        assert_eq!(wave.accumulated.len(), 4);
        assert_eq!(wave.header.reserved, Some(0));
    }
    #[test]
    fn binary_truncated_by_one_byte_fails_on_last_trace() {
        let traces = vec![vec![1; 8], vec![2; 8]];
        let mut bytes = binary_file(8, 1, &traces);
        bytes.pop();
        match decoder().decode_binary(&bytes, -1, Path::new("cut.bin")) {
            Err(DecodeError::TruncatedFile {
                trace,
                needed,
                available,
                ..
            }) => {
                assert_eq!(trace, 1);
                assert_eq!(needed, 48);
                assert_eq!(available, 47);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
    #[test]
    fn binary_request_limits_traces() {
        let traces = vec![vec![10; 4], vec![20; 4], vec![30; 4]];
        let bytes = binary_file(4, 1, &traces);
        let wave = decoder()
            .decode_binary(&bytes, 2, Path::new("mem.bin"))
            .unwrap();
        assert_eq!(wave.fid_count(), 2);
        let capped = decoder()
            .decode_binary(&bytes, 10, Path::new("mem.bin"))
            .unwrap();
        assert_eq!(capped.fid_count(), 3);
    }
    #[test]
    fn binary_header_errors() {
        let short = [0u8; 10];
        assert!(matches!(
            decoder().decode_binary(&short, -1, Path::new("x")),
            Err(DecodeError::HeaderParse { .. })
        ));
        let empty = binary_file(0, 1, &[vec![]]);
        assert!(matches!(
            decoder().decode_binary(&empty, -1, Path::new("x")),
            Err(DecodeError::EmptyWaveform { .. })
        ));
        let no_fids = binary_file(4, 1, &[]);
        assert!(matches!(
            decoder().decode_binary(&no_fids, -1, Path::new("x")),
            Err(DecodeError::HeaderParse { .. })
        ));
    }
    #[test]
    fn binary_trailing_byte_is_rejected() {
        let mut bytes = binary_file(4, 1, &[vec![1, 2, 3, 4]]);
        bytes.push(0);
        assert!(matches!(
            decoder().decode_binary(&bytes, -1, Path::new("long.bin")),
            Err(DecodeError::HeaderParse { .. })
        ));
        assert!(decoder().decode_binary(&bytes, 0, Path::new("long.bin")).is_err());
    }
    #[test]
    fn huge_declared_counts_fail_without_allocating() {
        let mut bytes = Vec::new();
        for word in [1, 1, i32::MAX, 0] {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        bytes.extend_from_slice(&7i16.to_le_bytes());
        assert!(matches!(
            decoder().decode_binary(&bytes, -1, Path::new("huge.bin")),
            Err(DecodeError::TruncatedFile { trace: 1, .. })
        ));
        let mut wide = Vec::new();
        for word in [i32::MAX, 1, i32::MAX, 0] {
            wide.extend_from_slice(&word.to_le_bytes());
        }
        assert!(decoder().decode_binary(&wide, 2, Path::new("wide.bin")).is_err());
        let text = "4,2,1,1.0,0.0,14\n1,2,3,4\n";
        assert!(matches!(
            decoder().decode_text(text.as_bytes(), i64::MAX, Path::new("m.csv")),
            Err(DecodeError::TruncatedFile { trace: 1, .. })
        ));
    }
    #[test]
    fn time_axis_is_uniform_and_half_open() {
        let bytes = binary_file(5, 25, &[vec![0; 5]]);
        let wave = decoder()
            .decode_binary(&bytes, -1, Path::new("mem.bin"))
            .unwrap();
        let dt = 25.0 / 125.0e6;
        assert_eq!(wave.time_axis.len(), 5);
        assert_eq!(wave.time_axis[0], 0.0);
        for (i, t) in wave.time_axis.iter().enumerate() {
            assert!((t - i as f64 * dt).abs() < 1e-18);
        }
        assert!(*wave.time_axis.last().unwrap() < 5.0 * dt);
        assert!((wave.dt() - dt).abs() < 1e-18);
    }
    #[test]
    fn text_header_and_override() {
        let text = "4,2,3,1.5,0.0,14\n1,2,3,4\n5,6,7,8\n9,10,11,12\n";
        let all = decoder()
            .decode_text(text.as_bytes(), -1, Path::new("m.csv"))
            .unwrap();
        assert_eq!(all.fid_count(), 3);
        assert_eq!(all.header.gain, Some(1.5));
        assert_eq!(all.header.bit_depth, Some(14));
        assert_eq!(all.traces[2], vec![9.0, 10.0, 11.0, 12.0]);
        let two = decoder()
            .decode_text(text.as_bytes(), 2, Path::new("m.csv"))
            .unwrap();
        assert_eq!(two.fid_count(), 2);
    }
    #[test]
    fn text_missing_rows_and_bad_headers() {
        let text = "4,2,3,1.5,0.0,14\n1,2,3,4\n";
        assert!(matches!(
            decoder().decode_text(text.as_bytes(), -1, Path::new("m.csv")),
            Err(DecodeError::TruncatedFile { trace: 1, .. })
        ));
        let short_header = "4,2,3\n1,2,3,4\n";
        assert!(matches!(
            decoder().decode_text(short_header.as_bytes(), -1, Path::new("m.csv")),
            Err(DecodeError::HeaderParse { .. })
        ));
        let typed = "four,2,1,1.0,0.0,14\n1,2,3,4\n";
        assert!(matches!(
            decoder().decode_text(typed.as_bytes(), -1, Path::new("m.csv")),
            Err(DecodeError::HeaderParse { .. })
        ));
        let ragged = "4,2,1,1.0,0.0,14\n1,2,3\n";
        assert!(matches!(
            decoder().decode_text(ragged.as_bytes(), -1, Path::new("m.csv")),
            Err(DecodeError::LengthMismatch { .. })
        ));
        let empty = "0,2,1,1.0,0.0,14\n";
        assert!(matches!(
            decoder().decode_text(empty.as_bytes(), -1, Path::new("m.csv")),
            Err(DecodeError::EmptyWaveform { .. })
        ));
    }
    #[test]
    fn format_detection_by_extension() {
        assert_eq!(WaveformFormat::detect(Path::new("a/b.CSV")), WaveformFormat::Text);
        assert_eq!(WaveformFormat::detect(Path::new("a/Stepfreq3")), WaveformFormat::Binary);
        assert_eq!(WaveformFormat::detect(Path::new("mesure.bin")), WaveformFormat::Binary);
    }
}
