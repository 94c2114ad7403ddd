// src/main.rs
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{info, warn};

use pitaya_nmr::config::Settings;
use pitaya_nmr::drivers::{analyze_folder, render_spectrum_png, render_traces_png, PlotStyle};
use pitaya_nmr::engine::{spawn_sweep, SweepReport};
use pitaya_nmr::recorder::DataRecorder;
use pitaya_nmr::remote::OpenSshConnector;
use pitaya_nmr::types::{SweepEvent, SweepMode, SweepPlan};

#[derive(Parser)]
#[command(name = "pitaya-nmr")]
#[command(author, version, about = "Pulsed NMR acquisition and spectrum analysis", long_about = None)]
struct Cli {
    /// JSON settings file (device and analysis); defaults are used when absent
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an acquisition sweep on the board and retrieve every file
    Sweep {
        #[command(flatten)]
        plan: PlanArgs,

        /// Folder that receives the timestamped experiment folder
        #[arg(short, long, default_value = "mesures")]
        output: PathBuf,

        /// Analyse the retrieved files once the sweep ends
        #[arg(long)]
        analyze: bool,
    },

    /// Decode a sweep folder, merge its spectra and export the results
    Analyze {
        /// Experiment folder written by `sweep`
        folder: PathBuf,

        /// File stem used when the folder has no manifest
        #[arg(long, default_value = "Stepfreq")]
        stem: String,

        /// Export folder (defaults to `<folder>/analysis`)
        #[arg(short, long)]
        export: Option<PathBuf>,

        /// Also render PNG figures
        #[arg(long)]
        png: bool,
    },

    /// Print the expected duration of a sweep and plan warnings
    Estimate {
        #[command(flatten)]
        plan: PlanArgs,
    },

    /// Write a settings file filled with defaults
    InitConfig {
        #[arg(default_value = "pitaya-nmr.json")]
        path: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Single,
    Sweep,
    SweepP90,
    Echo,
    SweepEcho,
    SweepP90Echo,
}

impl From<ModeArg> for SweepMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Single => SweepMode::Single,
            ModeArg::Sweep => SweepMode::FrequencySweep,
            ModeArg::SweepP90 => SweepMode::PulseWidthSweep,
            ModeArg::Echo => SweepMode::SingleEcho,
            ModeArg::SweepEcho => SweepMode::FrequencySweepEcho,
            ModeArg::SweepP90Echo => SweepMode::PulseWidthSweepEcho,
        }
    }
}

#[derive(Args)]
struct PlanArgs {
    /// Sweep plan as JSON; replaces every plan flag below
    #[arg(long)]
    plan: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "single")]
    mode: ModeArg,

    /// Number of files (ignored in single modes)
    #[arg(long, default_value = "1")]
    files: usize,

    /// Larmor (excitation) frequency in Hz
    #[arg(long, default_value = "24300000")]
    frequency: f64,

    /// Frequency step between files in Hz
    #[arg(long, default_value = "0")]
    step: f64,

    /// Excitation duration in seconds
    #[arg(long, default_value = "0.00001")]
    pulse: f64,

    /// Excitation duration step between files in seconds
    #[arg(long, default_value = "0")]
    pulse_step: f64,

    #[arg(long, default_value = "16384")]
    samples: u32,

    #[arg(long, default_value = "64")]
    decimation: u32,

    /// FIDs accumulated per file
    #[arg(long, default_value = "10")]
    fids: u32,

    /// Repetition period of one FID in seconds
    #[arg(long, default_value = "1")]
    cycle: f64,

    /// Echo time in seconds (echo modes)
    #[arg(long, default_value = "0")]
    echo: f64,

    /// Local file stem
    #[arg(long, default_value = "Stepfreq")]
    name: String,
}

impl PlanArgs {
    fn to_plan(&self) -> Result<SweepPlan> {
        if let Some(path) = &self.plan {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read plan {}", path.display()))?;
            return serde_json::from_str(&text)
                .with_context(|| format!("failed to parse plan {}", path.display()));
        }
        Ok(SweepPlan {
            mode: self.mode.into(),
            file_count: self.files,
            frequency_step_hz: self.step,
            pulse_width_step_s: self.pulse_step,
            base_frequency_hz: self.frequency,
            base_pulse_width_s: self.pulse,
            sample_count: self.samples,
            decimation: self.decimation,
            fids_per_file: self.fids,
            total_cycle_time_s: self.cycle,
            echo_time_s: self.echo,
            experiment_name: self.name.clone(),
        })
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let settings = Settings::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Sweep {
            plan,
            output,
            analyze,
        } => {
            let report = cmd_sweep(&settings, plan.to_plan()?, &output)?;
            if analyze {
                let export = report.folder.join("analysis");
                cmd_analyze(&settings, &report.folder, &plan.name, &export, true)?;
            }
            Ok(())
        }
        Commands::Analyze {
            folder,
            stem,
            export,
            png,
        } => {
            let export = export.unwrap_or_else(|| folder.join("analysis"));
            cmd_analyze(&settings, &folder, &stem, &export, png)
        }
        Commands::Estimate { plan } => cmd_estimate(&settings, plan.to_plan()?),
        Commands::InitConfig { path } => {
            Settings::default().save(&path)?;
            println!("Wrote default settings to {}", path.display());
            Ok(())
        }
    }
}

fn cmd_sweep(settings: &Settings, plan: SweepPlan, output: &Path) -> Result<SweepReport> {
    let estimate = plan.estimate(settings.device.sampling_rate_hz);
    for warning in &estimate.warnings {
        warn!("{warning}");
    }
    info!("expected duration {:.0} s", estimate.total_time_s);

    let handle = spawn_sweep(plan, settings.device.clone(), OpenSshConnector, output);
    let cancel = handle.cancellation();
    // a line reading "stop" on stdin ends the sweep after the current step
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines().map_while(|line| line.ok()) {
            if line.trim().eq_ignore_ascii_case("stop") {
                println!("Stop requested, finishing the current step...");
                cancel.cancel();
                break;
            }
        }
    });

    for event in handle.events().iter() {
        match event {
            SweepEvent::StepCompleted(step) => println!(
                "  [{}] {:.6} MHz  {:.3} us  -> {}",
                step.index,
                step.frequency_hz / 1e6,
                step.pulse_width_s * 1e6,
                step.file.display()
            ),
            SweepEvent::Finished { state, completed } => {
                println!("Sweep ended in state {state:?} after {completed} files")
            }
            SweepEvent::Log(_) | SweepEvent::State(_) => {}
        }
    }
    let report = handle.join()?;
    if report.cancelled {
        println!("Sweep was stopped early");
    }
    println!("Files saved in {}", report.folder.display());
    Ok(report)
}

fn cmd_analyze(
    settings: &Settings,
    folder: &Path,
    stem: &str,
    export: &Path,
    png: bool,
) -> Result<()> {
    let (summary, merged) =
        analyze_folder(folder, stem, &settings.device, settings.analysis.clone())?;
    if summary.files.is_empty() {
        bail!("no file of {} could be analysed", folder.display());
    }
    let recorder = DataRecorder::new(export)?;
    for file in &summary.files {
        let name = file
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file")
            .to_string();
        recorder.write_traces(&format!("{name}_fid.csv"), file)?;
        recorder.write_spectrum(&format!("{name}_tf.csv"), &file.spectrum)?;
        if let Some((freq, mag)) = file.spectrum.peak() {
            println!("{name}: peak {mag:.4} at {freq:.1} Hz");
        }
    }
    recorder.write_merged("tf_sum.csv", &merged)?;
    if png {
        let style = PlotStyle::default();
        if let Some((time_axis, traces)) = summary.trace_overlay() {
            let fid = render_traces_png(time_axis, &traces, style.clone())?;
            recorder.write_png("figure_fid.png", &fid)?;
        }
        let tf = render_spectrum_png(&merged.to_frame(), style)?;
        recorder.write_png("figure_tf_sum.png", &tf)?;
    }
    for failure in &summary.failures {
        println!("skipped: {failure}");
    }
    println!(
        "Analysed {} files ({} skipped), merged spectrum has {} points, exported to {}",
        summary.files.len(),
        summary.failures.len(),
        merged.frequencies().len(),
        recorder.folder().display()
    );
    Ok(())
}

fn cmd_estimate(settings: &Settings, plan: SweepPlan) -> Result<()> {
    let estimate = plan.estimate(settings.device.sampling_rate_hz);
    println!("Acquisition window : {} s", estimate.acquisition_window_s);
    println!("Burst cycles       : {:.1}", estimate.burst_cycles);
    println!(
        "Time per step      : {:.1} s ({} accumulations)",
        estimate.time_per_step_s, plan.fids_per_file
    );
    println!("Total sweep time   : {:.1} s", estimate.total_time_s);
    println!(
        "Sweep range        : {} Hz -> {} Hz",
        estimate.start_frequency_hz, estimate.end_frequency_hz
    );
    for warning in &estimate.warnings {
        println!("WARNING: {warning}");
    }
    Ok(())
}
