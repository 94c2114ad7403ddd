use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use log::{debug, warn};
use thiserror::Error;
use crate::config::DeviceConfig;
// ssh reserves this exit status for its own failures
const SSH_FAILURE_STATUS: i32 = 255;
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("cannot reach {host}: {reason}")]
    Connection { host: String, reason: String },
    #[error("remote file {0} not found")]
    NotFound(String),
    #[error("failed to copy {remote} to {}: {reason}", .local.display())]
    Transfer {
        remote: String,
        local: PathBuf,
        reason: String,
    },
    #[error("remote command `{command}` could not run: {reason}")]
    Command { command: String, reason: String },
}
/// What the remote command printed. Only ever logged.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: Option<i32>,
}
/// Command channel to the acquisition board.
pub trait RemoteSession: Send {
    fn is_ready(&mut self) -> bool;
    fn execute(&mut self, command: &str) -> Result<CommandOutput, RemoteError>;
    fn close(&mut self) -> Result<(), RemoteError>;
}
/// File channel used to pull acquisition output back.
pub trait FileTransfer: Send {
    fn fetch(&mut self, remote_path: &str, local_path: &Path) -> Result<(), RemoteError>;
    fn close(&mut self) -> Result<(), RemoteError>;
}
/// Opens both channels to the board.
pub trait RemoteConnector: Send {
    type Session: RemoteSession;
    type Transfer: FileTransfer;
    fn connect(
        &mut self,
        config: &DeviceConfig,
    ) -> Result<(Self::Session, Self::Transfer), RemoteError>;
}
/// Owns an open session and transfer channel and closes both when dropped.
pub struct RemoteLink<S: RemoteSession, T: FileTransfer> {
    session: S,
    transfer: T,
    released: bool,
}
impl<S: RemoteSession, T: FileTransfer> RemoteLink<S, T> {
    pub fn new(session: S, transfer: T) -> Self {
        Self {
            session,
            transfer,
            released: false,
        }
    }
    pub fn session(&mut self) -> &mut S {
        &mut self.session
    }
    pub fn transfer(&mut self) -> &mut T {
        &mut self.transfer
    }
    /// Closes both channels once; later calls are no-ops.
    pub fn close(&mut self) -> Result<(), RemoteError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        let session = self.session.close();
        let transfer = self.transfer.close();
        session.and(transfer)
    }
}
impl<S: RemoteSession, T: FileTransfer> Drop for RemoteLink<S, T> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("closing remote link: {e}");
        }
    }
}
/// Invocation of one of the acquisition executables on the board.
#[derive(Clone, Debug, PartialEq)]
pub struct AcquisitionCommand {
    pub remote_folder: String,
    pub executable: String,
    pub sample_count: u32,
    pub decimation: u32,
    pub fid_count: u32,
    pub output_path: String,
    pub frequency_hz: f64,
    pub pulse_width_s: f64,
    pub repeat_delay_us: f64,
    /// Present only for echo acquisitions.
    pub echo_time_us: Option<f64>,
}
impl AcquisitionCommand {
    pub fn to_command_line(&self) -> String {
        let mut line = format!(
            "cd {} && ./{} {} {} {} {} {} {} {}",
            self.remote_folder,
            self.executable,
            self.sample_count,
            self.decimation,
            self.fid_count,
            self.output_path,
            self.frequency_hz,
            self.pulse_width_s,
            self.repeat_delay_us
        );
        if let Some(echo) = self.echo_time_us {
            line.push_str(&format!(" {echo}"));
        }
        line
    }
}
/// Reaches the board through the system `ssh`/`scp` binaries with key auth.
#[derive(Clone, Debug, Default)]
pub struct OpenSshConnector;
impl RemoteConnector for OpenSshConnector {
    type Session = OpenSshSession;
    type Transfer = OpenSshTransfer;
    fn connect(
        &mut self,
        config: &DeviceConfig,
    ) -> Result<(Self::Session, Self::Transfer), RemoteError> {
        let endpoint = SshEndpoint::from_config(config);
        let mut session = OpenSshSession {
            endpoint: endpoint.clone(),
            closed: false,
        };
        let probe = session.run("true")?;
        if probe.status != Some(0) {
            return Err(RemoteError::Connection {
                host: endpoint.host.clone(),
                reason: format!("probe exited with {:?}: {}", probe.status, probe.stderr.trim()),
            });
        }
        debug!("ssh link to {} is up", endpoint.target());
        Ok((session, OpenSshTransfer { endpoint }))
    }
}
#[derive(Clone, Debug)]
struct SshEndpoint {
    host: String,
    user: String,
    port: u16,
    timeout_secs: u64,
}
impl SshEndpoint {
    fn from_config(config: &DeviceConfig) -> Self {
        Self {
            host: config.host.clone(),
            user: config.user.clone(),
            port: config.port,
            timeout_secs: config.connect_timeout_secs,
        }
    }
    fn target(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
    fn common_options(&self) -> Vec<String> {
        vec![
            "-o".into(),
            "BatchMode=yes".into(),
            "-o".into(),
            format!("ConnectTimeout={}", self.timeout_secs),
        ]
    }
    fn ssh_args(&self, command: &str) -> Vec<String> {
        let mut args = self.common_options();
        args.extend(["-p".into(), self.port.to_string(), self.target(), command.into()]);
        args
    }
    fn scp_args(&self, remote_path: &str, local_path: &Path) -> Vec<String> {
        let mut args = self.common_options();
        args.extend([
            "-P".into(),
            self.port.to_string(),
            format!("{}:{}", self.target(), remote_path),
            local_path.display().to_string(),
        ]);
        args
    }
    fn unreachable(&self, reason: impl Into<String>) -> RemoteError {
        RemoteError::Connection {
            host: self.host.clone(),
            reason: reason.into(),
        }
    }
}
pub struct OpenSshSession {
    endpoint: SshEndpoint,
    closed: bool,
}
impl OpenSshSession {
    fn run(&mut self, command: &str) -> Result<CommandOutput, RemoteError> {
        let output = Command::new("ssh")
            .args(self.endpoint.ssh_args(command))
            .output()
            .map_err(|e| self.endpoint.unreachable(format!("cannot start ssh: {e}")))?;
        let output = command_output(output);
        match output.status {
            Some(SSH_FAILURE_STATUS) => Err(self.endpoint.unreachable(output.stderr.trim())),
            Some(126) | Some(127) => Err(RemoteError::Command {
                command: command.to_string(),
                reason: output.stderr.trim().to_string(),
            }),
            _ => Ok(output),
        }
    }
}
impl RemoteSession for OpenSshSession {
    fn is_ready(&mut self) -> bool {
        !self.closed
    }
    fn execute(&mut self, command: &str) -> Result<CommandOutput, RemoteError> {
        if self.closed {
            return Err(self.endpoint.unreachable("session already closed"));
        }
        self.run(command)
    }
    fn close(&mut self) -> Result<(), RemoteError> {
        self.closed = true;
        Ok(())
    }
}
pub struct OpenSshTransfer {
    endpoint: SshEndpoint,
}
impl FileTransfer for OpenSshTransfer {
    fn fetch(&mut self, remote_path: &str, local_path: &Path) -> Result<(), RemoteError> {
        let output = Command::new("scp")
            .args(self.endpoint.scp_args(remote_path, local_path))
            .output()
            .map_err(|e| RemoteError::Transfer {
                remote: remote_path.to_string(),
                local: local_path.to_path_buf(),
                reason: format!("cannot start scp: {e}"),
            })?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("No such file") {
            Err(RemoteError::NotFound(remote_path.to_string()))
        } else {
            Err(RemoteError::Transfer {
                remote: remote_path.to_string(),
                local: local_path.to_path_buf(),
                reason: stderr.trim().to_string(),
            })
        }
    }
    fn close(&mut self) -> Result<(), RemoteError> {
        Ok(())
    }
}
fn command_output(output: Output) -> CommandOutput {
    CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        status: output.status.code(),
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    fn command(echo: Option<f64>) -> AcquisitionCommand {
        AcquisitionCommand {
            remote_folder: "Pitaya-Tests".into(),
            executable: "Acquisition_axi.exe".into(),
            sample_count: 16384,
            decimation: 64,
            fid_count: 10,
            output_path: "mesures/mesure.bin".into(),
            frequency_hz: 24_300_000.0,
            pulse_width_s: 0.5,
            repeat_delay_us: 991_611.5,
            echo_time_us: echo,
        }
    }
    #[test]
    fn command_line_layout() {
        assert_eq!(
            command(None).to_command_line(),
            "cd Pitaya-Tests && ./Acquisition_axi.exe 16384 64 10 mesures/mesure.bin 24300000 0.5 991611.5"
        );
        assert!(command(Some(2000.0)).to_command_line().ends_with(" 991611.5 2000"));
    }
    #[test]
    fn ssh_and_scp_arguments() {
        let endpoint = SshEndpoint::from_config(&DeviceConfig::default());
        let ssh = endpoint.ssh_args("ls");
        assert_eq!(
            ssh,
            vec![
                "-o",
                "BatchMode=yes",
                "-o",
                "ConnectTimeout=10",
                "-p",
                "22",
                "root@169.254.215.235",
                "ls"
            ]
        );
        let scp = endpoint.scp_args("Pitaya-Tests/mesures/mesure.bin", Path::new("out/Stepfreq0"));
        assert_eq!(scp[4], "-P");
        assert_eq!(scp[6], "root@169.254.215.235:Pitaya-Tests/mesures/mesure.bin");
        assert_eq!(scp[7], "out/Stepfreq0");
    }
    #[derive(Clone, Default)]
    struct Closed(Arc<Mutex<Vec<&'static str>>>);
    struct DummySession(Closed);
    struct DummyTransfer(Closed);
    impl RemoteSession for DummySession {
        fn is_ready(&mut self) -> bool {
            true
        }
        fn execute(&mut self, _command: &str) -> Result<CommandOutput, RemoteError> {
            Ok(CommandOutput::default())
        }
        fn close(&mut self) -> Result<(), RemoteError> {
            self.0 .0.lock().unwrap().push("session");
            Ok(())
        }
    }
    impl FileTransfer for DummyTransfer {
        fn fetch(&mut self, _remote: &str, _local: &Path) -> Result<(), RemoteError> {
            Ok(())
        }
        fn close(&mut self) -> Result<(), RemoteError> {
            self.0 .0.lock().unwrap().push("transfer");
            Ok(())
        }
    }
    #[test]
    fn link_closes_once_on_drop() {
        let closed = Closed::default();
        {
            let mut link = RemoteLink::new(DummySession(closed.clone()), DummyTransfer(closed.clone()));
            link.close().unwrap();
        }
        assert_eq!(*closed.0.lock().unwrap(), vec!["session", "transfer"]);
        {
            let _link = RemoteLink::new(DummySession(closed.clone()), DummyTransfer(closed.clone()));
        }
        assert_eq!(closed.0.lock().unwrap().len(), 4);
    }
}
