use std::io::Cursor;
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use plotters::prelude::LineSeries;
use plotters::prelude::*;
use crate::drivers::error::ProcessingError;
use crate::drivers::fft::SpectrumFrame;
#[derive(Clone, Debug)]
pub struct PlotStyle {
    pub width: u32,
    pub height: u32,
    pub background: RGBColor,
    pub palette: Vec<RGBColor>,
}
impl Default for PlotStyle {
    fn default() -> Self {
        Self {
            width: 900,
            height: 400,
            background: RGBColor(10, 10, 10),
            palette: vec![BLUE, RED, GREEN, CYAN, MAGENTA, YELLOW, WHITE],
        }
    }
}
impl PlotStyle {
    /// Palette entry for series `idx`, white when the palette is empty.
    pub fn color(&self, idx: usize) -> RGBColor {
        if self.palette.is_empty() {
            WHITE
        } else {
            self.palette[idx % self.palette.len()]
        }
    }
}
/// Overlay of FID traces against time in milliseconds.
pub fn render_traces_png(
    time_axis: &[f64],
    traces: &[Vec<f64>],
    style: PlotStyle,
) -> Result<Vec<u8>, ProcessingError> {
    if traces.is_empty() || time_axis.is_empty() {
        return Err(ProcessingError::Plot("no traces to draw".into()));
    }
    let mut buffer = vec![0u8; (style.width * style.height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (style.width, style.height))
            .into_drawing_area();
        root.fill(&style.background)?;
        let (y_min, y_max) = value_range(traces.iter().flat_map(|t| t.iter().copied()));
        let x_max = time_axis.last().copied().unwrap_or(0.0) * 1e3;
        let mut chart = ChartBuilder::on(&root)
            .margin(10)
            .caption("FID", ("sans-serif", 20).into_font().color(&WHITE))
            .set_label_area_size(LabelAreaPosition::Left, 55)
            .set_label_area_size(LabelAreaPosition::Bottom, 40)
            .build_cartesian_2d(time_axis[0] * 1e3..x_max.max(1e-9), y_min..y_max)?;
        chart
            .configure_mesh()
            .x_desc("time (ms)")
            .y_desc("V")
            .light_line_style(&WHITE.mix(0.1))
            .draw()?;
        for (idx, trace) in traces.iter().enumerate() {
            let color = style.color(idx);
            let series = time_axis.iter().map(|t| t * 1e3).zip(trace.iter().copied());
            chart.draw_series(LineSeries::new(series, &color))?;
        }
        root.present()?;
    }
    encode_png(&buffer, style.width, style.height)
}
/// Magnitude spectrum against offset-applied frequency in kHz.
pub fn render_spectrum_png(
    frame: &SpectrumFrame,
    style: PlotStyle,
) -> Result<Vec<u8>, ProcessingError> {
    if frame.is_empty() {
        return Err(ProcessingError::Plot("spectrum has no magnitudes".into()));
    }
    let mut points: Vec<(f64, f64)> = frame
        .shifted_frequencies()
        .map(|f| f / 1e3)
        .zip(frame.magnitudes.iter().copied())
        .collect();
    points.sort_by(|a, b| a.0.total_cmp(&b.0));
    let mut buffer = vec![0u8; (style.width * style.height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (style.width, style.height))
            .into_drawing_area();
        root.fill(&style.background)?;
        let x_min = points[0].0;
        let x_max = points[points.len() - 1].0;
        let x_max = if x_max > x_min { x_max } else { x_min + 1.0 };
        let y_max = points.iter().fold(0.0f64, |acc, p| acc.max(p.1)).max(1e-6);
        let mut chart = ChartBuilder::on(&root)
            .margin(10)
            .caption(
                "FFT Magnitude",
                ("sans-serif", 20).into_font().color(&WHITE),
            )
            .set_label_area_size(LabelAreaPosition::Left, 55)
            .set_label_area_size(LabelAreaPosition::Bottom, 40)
            .build_cartesian_2d(x_min..x_max, 0f64..y_max)?;
        chart
            .configure_mesh()
            .x_desc("frequency (kHz)")
            .light_line_style(&WHITE.mix(0.1))
            .draw()?;
        chart.draw_series(LineSeries::new(points.iter().copied(), &style.color(0)))?;
        root.present()?;
    }
    encode_png(&buffer, style.width, style.height)
}
fn value_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (min, max) = values.fold((0.0f64, 0.0f64), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if (max - min).abs() < f64::EPSILON {
        (-1.0, 1.0)
    } else {
        (min, max)
    }
}
fn encode_png(buffer: &[u8], width: u32, height: u32) -> Result<Vec<u8>, ProcessingError> {
    let image = ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, buffer.to_vec())
        .ok_or_else(|| ProcessingError::Plot("failed to allocate image buffer".into()))?;
    let mut output = Vec::new();
    let dynamic = DynamicImage::ImageRgb8(image);
    dynamic.write_to(&mut Cursor::new(&mut output), ImageFormat::Png)?;
    Ok(output)
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::fft::spectrum;
    const PNG_MAGIC: [u8; 4] = [0x89, b'P', b'N', b'G'];
    // captions and tick labels need a system sans-serif font
    fn fonts_available() -> bool {
        let found = ("sans-serif", 12).into_font().box_size("0").is_ok();
        if !found {
            eprintln!("skipped: no sans-serif font installed");
        }
        found
    }
    fn assert_png(result: Result<Vec<u8>, ProcessingError>) {
        let png = result.unwrap();
        assert_eq!(png[..4], PNG_MAGIC);
    }
    #[test]
    fn traces_render_to_png() {
        if !fonts_available() {
            return;
        }
        let time: Vec<f64> = (0..64).map(|i| i as f64 * 1e-4).collect();
        let traces = vec![
            time.iter().map(|t| (t * 2e4).sin()).collect::<Vec<_>>(),
            vec![0.0; 64],
        ];
        assert_png(render_traces_png(&time, &traces, PlotStyle::default()));
    }
    #[test]
    fn spectrum_renders_to_png() {
        if !fonts_available() {
            return;
        }
        let trace: Vec<f64> = (0..64).map(|i| (i as f64 * 0.3).cos()).collect();
        let frame = spectrum(&trace, 1e-3).unwrap().with_offset(24e6);
        assert_png(render_spectrum_png(&frame, PlotStyle::default()));
    }
    #[test]
    fn empty_palette_falls_back_to_white() {
        let style = PlotStyle {
            palette: Vec::new(),
            ..PlotStyle::default()
        };
        assert_eq!(style.color(3), WHITE);
        assert_eq!(PlotStyle::default().color(8), RED);
        if !fonts_available() {
            return;
        }
        let time: Vec<f64> = (0..16).map(|i| i as f64 * 1e-3).collect();
        assert_png(render_traces_png(&time, &[vec![0.5; 16]], style));
    }
    #[test]
    fn empty_inputs_are_rejected() {
        assert!(render_traces_png(&[], &[], PlotStyle::default()).is_err());
        let empty = SpectrumFrame {
            frequencies_hz: vec![],
            magnitudes: vec![],
            frequency_offset_hz: 0.0,
        };
        assert!(render_spectrum_png(&empty, PlotStyle::default()).is_err());
    }
}
