// src/engine.rs
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::Local;
use log::{error, info, warn};
use thiserror::Error;

use crate::config::DeviceConfig;
use crate::remote::{
    AcquisitionCommand, FileTransfer, RemoteConnector, RemoteError, RemoteLink, RemoteSession,
};
use crate::types::*;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("echo time {echo_time_s} s does not fit in the {total_cycle_time_s} s cycle")]
    EchoTiming {
        echo_time_s: f64,
        total_cycle_time_s: f64,
    },
    #[error("invalid sweep plan: {0}")]
    InvalidPlan(String),
    #[error("connection failed: {0}")]
    Connection(#[source] RemoteError),
    #[error("step {step} failed after {completed} completed steps: {source}")]
    Step {
        step: usize,
        completed: usize,
        #[source]
        source: RemoteError,
    },
    #[error("cannot create {}: {source}", .path.display())]
    LocalFolder {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("sweep worker panicked")]
    WorkerPanicked,
}

/// Stop request shared between the caller and a running sweep.
///
/// Only checked between steps: a step that has started always finishes.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of a sweep that reached `Completed`.
#[derive(Clone, Debug)]
pub struct SweepReport {
    pub state: SweepState,
    pub folder: PathBuf,
    pub manifest: PathBuf,
    pub steps: Vec<StepRecord>,
    pub cancelled: bool,
}

impl SweepReport {
    pub fn completed(&self) -> usize {
        self.steps.len()
    }

    pub fn files(&self) -> Vec<PathBuf> {
        self.steps.iter().map(|s| self.folder.join(&s.file)).collect()
    }
}

/// Rejects plans that cannot run, before anything touches the board.
pub fn validate_plan(plan: &SweepPlan) -> Result<(), SweepError> {
    if plan.mode.is_echo() && !(plan.total_cycle_time_s > plan.echo_time_s) {
        return Err(SweepError::EchoTiming {
            echo_time_s: plan.echo_time_s,
            total_cycle_time_s: plan.total_cycle_time_s,
        });
    }
    if plan.effective_file_count() == 0 {
        return Err(SweepError::InvalidPlan("file count must be at least 1".into()));
    }
    if plan.sample_count == 0 || plan.decimation == 0 || plan.fids_per_file == 0 {
        return Err(SweepError::InvalidPlan(
            "sample count, decimation and FID count must be positive".into(),
        ));
    }
    if plan.experiment_name.trim().is_empty() {
        return Err(SweepError::InvalidPlan("experiment name is empty".into()));
    }
    Ok(())
}

/// Runs one acquisition sweep: a remote command and a file retrieval per step.
pub struct SweepController<C: RemoteConnector> {
    plan: SweepPlan,
    device: DeviceConfig,
    connector: C,
    output_root: PathBuf,
    cancel: CancellationToken,
    events: Option<Sender<SweepEvent>>,
    state: SweepState,
}

impl<C: RemoteConnector> SweepController<C> {
    pub fn new(plan: SweepPlan, device: DeviceConfig, connector: C, output_root: &Path) -> Self {
        Self {
            plan,
            device,
            connector,
            output_root: output_root.to_path_buf(),
            cancel: CancellationToken::new(),
            events: None,
            state: SweepState::Idle,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_events(mut self, events: Sender<SweepEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> SweepState {
        self.state
    }

    /// Drives the sweep to `Completed` (including cancelled runs) or `Failed`.
    pub fn run(mut self) -> Result<SweepReport, SweepError> {
        if let Err(e) = validate_plan(&self.plan) {
            self.fail(&e, 0);
            return Err(e);
        }

        self.set_state(SweepState::Connecting);
        self.log(format!(
            "connecting to {}@{}:{}",
            self.device.user, self.device.host, self.device.port
        ));
        let mut link = match self.connector.connect(&self.device) {
            Ok((session, transfer)) => RemoteLink::new(session, transfer),
            Err(e) => {
                let e = SweepError::Connection(e);
                self.fail(&e, 0);
                return Err(e);
            }
        };
        if !link.session().is_ready() {
            if let Err(e) = link.close() {
                warn!("closing remote link: {e}");
            }
            let e = SweepError::Connection(RemoteError::Connection {
                host: self.device.host.clone(),
                reason: "session is not ready".into(),
            });
            self.fail(&e, 0);
            return Err(e);
        }

        let started = Local::now();
        let folder = self.output_root.join(self.plan.folder_name(started));
        if let Err(source) = fs::create_dir_all(&folder) {
            let e = SweepError::LocalFolder {
                path: folder,
                source,
            };
            self.fail(&e, 0);
            return Err(e);
        }
        let mut manifest = SweepManifest::new(self.plan.clone(), started);

        let outcome = self.run_steps(&mut link, &folder, &mut manifest.steps);
        if let Err(e) = link.close() {
            warn!("closing remote link: {e}");
        }
        let cancelled = match outcome {
            Ok(cancelled) => cancelled,
            Err(e) => {
                manifest.state = SweepState::Failed;
                if let Err(write) = manifest.save(&folder) {
                    warn!("{write}");
                }
                self.fail(&e, manifest.steps.len());
                return Err(e);
            }
        };

        manifest.state = SweepState::Completed;
        let manifest_path = match manifest.save(&folder) {
            Ok(path) => path,
            Err(e) => {
                let e = SweepError::Manifest(e);
                self.fail(&e, manifest.steps.len());
                return Err(e);
            }
        };
        self.set_state(SweepState::Completed);
        let completed = manifest.steps.len();
        self.log(format!(
            "sweep finished: {completed}/{} files in {}",
            self.plan.effective_file_count(),
            folder.display()
        ));
        self.emit(SweepEvent::Finished {
            state: SweepState::Completed,
            completed,
        });
        Ok(SweepReport {
            state: SweepState::Completed,
            folder,
            manifest: manifest_path,
            steps: manifest.steps,
            cancelled,
        })
    }

    // Returns whether the run stopped on a cancellation request.
    fn run_steps(
        &mut self,
        link: &mut RemoteLink<C::Session, C::Transfer>,
        folder: &Path,
        steps: &mut Vec<StepRecord>,
    ) -> Result<bool, SweepError> {
        let files = self.plan.effective_file_count();
        let fs_hz = self.device.sampling_rate_hz;
        let remote_output = self.device.remote_output_path();
        for index in 0..files {
            if self.cancel.is_cancelled() {
                self.set_state(SweepState::Cancelling);
                self.log(format!("stop requested, {} of {files} steps done", steps.len()));
                return Ok(true);
            }
            self.set_state(SweepState::Running(index));
            let frequency_hz = self.plan.frequency_at(index);
            let pulse_width_s = self.plan.pulse_width_at(index);
            let repeat_delay_us = self.plan.repeat_delay_us(fs_hz, pulse_width_s);
            self.log(format!(
                "--- step {index}/{files}: {:.3} MHz, {:.3} us ---",
                frequency_hz / 1e6,
                pulse_width_s * 1e6
            ));
            let command = AcquisitionCommand {
                remote_folder: self.device.remote_folder.clone(),
                executable: self.device.executable(self.plan.mode.is_echo()).to_string(),
                sample_count: self.plan.sample_count,
                decimation: self.plan.decimation,
                fid_count: self.plan.fids_per_file,
                output_path: self.device.remote_output.clone(),
                frequency_hz,
                pulse_width_s,
                repeat_delay_us,
                echo_time_us: self.plan.echo_time_us(),
            };
            let step_failed = |source| SweepError::Step {
                step: index,
                completed: steps.len(),
                source,
            };
            let output = link
                .session()
                .execute(&command.to_command_line())
                .map_err(step_failed)?;
            if !output.stdout.trim().is_empty() {
                info!("{}", output.stdout.trim_end());
            }
            if !output.stderr.trim().is_empty() {
                warn!("remote stderr: {}", output.stderr.trim_end());
            }
            let file = PathBuf::from(self.plan.local_file_name(index));
            link.transfer()
                .fetch(&remote_output, &folder.join(&file))
                .map_err(step_failed)?;
            let record = StepRecord {
                index,
                frequency_hz,
                pulse_width_s,
                repeat_delay_us,
                file,
            };
            self.emit(SweepEvent::StepCompleted(record.clone()));
            steps.push(record);
        }
        Ok(false)
    }

    fn set_state(&mut self, state: SweepState) {
        self.state = state;
        self.emit(SweepEvent::State(state));
    }

    fn fail(&mut self, error: &SweepError, completed: usize) {
        error!("sweep failed: {error}");
        self.set_state(SweepState::Failed);
        self.emit(SweepEvent::Log(format!("sweep failed: {error}")));
        self.emit(SweepEvent::Finished {
            state: SweepState::Failed,
            completed,
        });
    }

    fn log(&self, message: String) {
        info!("{message}");
        self.emit(SweepEvent::Log(message));
    }

    fn emit(&self, event: SweepEvent) {
        if let Some(tx) = &self.events {
            tx.send(event).ok();
        }
    }
}

/// Sweep running on its own thread.
pub struct SweepHandle {
    cancel: CancellationToken,
    events: Receiver<SweepEvent>,
    join: JoinHandle<Result<SweepReport, SweepError>>,
}

impl SweepHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn events(&self) -> &Receiver<SweepEvent> {
        &self.events
    }

    pub fn join(self) -> Result<SweepReport, SweepError> {
        self.join.join().unwrap_or(Err(SweepError::WorkerPanicked))
    }
}

pub fn spawn_sweep<C>(
    plan: SweepPlan,
    device: DeviceConfig,
    connector: C,
    output_root: &Path,
) -> SweepHandle
where
    C: RemoteConnector + 'static,
{
    let (tx, rx) = mpsc::channel();
    let cancel = CancellationToken::new();
    let controller = SweepController::new(plan, device, connector, output_root)
        .with_cancellation(cancel.clone())
        .with_events(tx);
    let join = thread::spawn(move || controller.run());
    SweepHandle {
        cancel,
        events: rx,
        join,
    }
}
