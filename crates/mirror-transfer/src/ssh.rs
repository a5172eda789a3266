//! SSH/SCP transport
//!
//! A session is one OpenSSH control master (`ssh -M -N`). Commands run over
//! it with `ssh -S <socket>` and copies with `scp -o ControlPath=<socket>`, so
//! the host authenticates once per session. The master is spawned with
//! `kill_on_drop`, which releases the connection even when the session is
//! dropped mid-sync.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mirror_core::MirrorConfig;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, info, instrument, warn};

use crate::transport::{RemoteSession, RemoteTransport, TransferError, TransferOp, TransferResult};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Transport over the system `ssh` and `scp` binaries
#[derive(Debug, Clone)]
pub struct SshTransport {
    config: Arc<MirrorConfig>,
    ssh_program: PathBuf,
    scp_program: PathBuf,
    connect_timeout: Duration,
}

impl SshTransport {
    pub fn new(config: Arc<MirrorConfig>) -> Self {
        Self {
            config,
            ssh_program: PathBuf::from("ssh"),
            scp_program: PathBuf::from("scp"),
            connect_timeout: Duration::from_secs(30),
        }
    }

    /// Use other `ssh`/`scp` executables
    pub fn with_programs(mut self, ssh: impl Into<PathBuf>, scp: impl Into<PathBuf>) -> Self {
        self.ssh_program = ssh.into();
        self.scp_program = scp.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Master connection command
    fn master_command(&self, socket: &Path) -> Command {
        let mut cmd = Command::new(&self.ssh_program);
        configure_ssh_cmd(&mut cmd, &self.config, false);
        cmd.arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)))
            .arg("-M")
            .arg("-N")
            .arg("-S")
            .arg(socket)
            .arg(self.config.destination())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Wait until the control socket answers, the master dies, or we time out
    async fn wait_for_master(&self, master: &mut Child, socket: &Path) -> TransferResult<()> {
        let destination = self.config.destination();
        let deadline = tokio::time::Instant::now() + self.connect_timeout;

        loop {
            if let Some(status) = master
                .try_wait()
                .map_err(|e| TransferError::io(TransferOp::Connect, &destination, e))?
            {
                let mut stderr = String::new();
                if let Some(mut pipe) = master.stderr.take() {
                    let _ = pipe.read_to_string(&mut stderr).await;
                }
                return Err(TransferError::new(
                    TransferOp::Connect,
                    &destination,
                    format!("ssh exited with {}: {}", status, stderr.trim()),
                ));
            }

            let check = control_command(&self.ssh_program, socket, &self.config)
                .arg("-O")
                .arg("check")
                .arg(&destination)
                .stdin(Stdio::null())
                .output()
                .await
                .map_err(|e| TransferError::io(TransferOp::Connect, &destination, e))?;
            if check.status.success() {
                return Ok(());
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(TransferError::new(
                    TransferOp::Connect,
                    &destination,
                    format!("no connection after {:?}", self.connect_timeout),
                ));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl RemoteTransport for SshTransport {
    #[instrument(skip(self), fields(transport = "ssh"))]
    async fn open(&self) -> TransferResult<Box<dyn RemoteSession>> {
        let destination = self.config.destination();
        let control_dir = tempfile::Builder::new()
            .prefix("mirror-ssh-")
            .tempdir()
            .map_err(|e| TransferError::io(TransferOp::Connect, &destination, e))?;
        let socket = control_dir.path().join("control");

        let mut master = self
            .master_command(&socket)
            .spawn()
            .map_err(|e| TransferError::io(TransferOp::Connect, &destination, e))?;

        self.wait_for_master(&mut master, &socket).await?;
        info!(destination = %destination, "SSH session opened");

        Ok(Box::new(SshSession {
            config: self.config.clone(),
            ssh_program: self.ssh_program.clone(),
            scp_program: self.scp_program.clone(),
            socket,
            master,
            _control_dir: control_dir,
        }))
    }

    fn name(&self) -> &str {
        "ssh"
    }
}

/// One authenticated control master
pub struct SshSession {
    config: Arc<MirrorConfig>,
    ssh_program: PathBuf,
    scp_program: PathBuf,
    socket: PathBuf,
    master: Child,
    // removed (with the socket) on drop
    _control_dir: TempDir,
}

impl SshSession {
    /// Run a shell command on the remote host over the master connection
    async fn exec(&self, operation: TransferOp, remote_path: &str, command: String) -> TransferResult<()> {
        debug!(command = %command, "ssh exec");
        let output = control_command(&self.ssh_program, &self.socket, &self.config)
            .arg(self.config.destination())
            .arg(command)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| TransferError::io(operation, remote_path, e))?;

        check_output(operation, remote_path, output)
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    #[instrument(skip(self), fields(transport = "ssh"))]
    async fn ensure_dir(&mut self, path: &str) -> TransferResult<()> {
        self.exec(TransferOp::EnsureDir, path, format!("mkdir -p {}", sh_quote(path)))
            .await
    }

    #[instrument(skip(self), fields(transport = "ssh"))]
    async fn purge_dir(&mut self, path: &str) -> TransferResult<()> {
        let dir = sh_quote(path);
        let command = format!(
            "if [ -d {dir} ]; then find {dir} -mindepth 1 -maxdepth 1 -type f -exec rm -f {{}} +; fi",
            dir = dir
        );
        self.exec(TransferOp::PurgeDir, path, command).await
    }

    #[instrument(skip(self), fields(transport = "ssh"))]
    async fn upload(&mut self, local_path: &Path, remote_path: &str) -> TransferResult<()> {
        let mut cmd = Command::new(&self.scp_program);
        configure_ssh_cmd(&mut cmd, &self.config, true);
        let output = cmd
            .arg("-q")
            .arg("-o")
            .arg(format!("ControlPath={}", self.socket.display()))
            .arg(local_path)
            .arg(format!("{}:{}", self.config.destination(), remote_path))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| TransferError::io(TransferOp::Upload, remote_path, e))?;

        check_output(TransferOp::Upload, remote_path, output)
    }

    async fn close(self: Box<Self>) -> TransferResult<()> {
        let mut this = self;
        let destination = this.config.destination();
        let exit = control_command(&this.ssh_program, &this.socket, &this.config)
            .arg("-O")
            .arg("exit")
            .arg(&destination)
            .stdin(Stdio::null())
            .output()
            .await;

        if !matches!(&exit, Ok(output) if output.status.success()) {
            warn!(destination = %destination, "Control master did not exit cleanly, killing it");
            this.master
                .kill()
                .await
                .map_err(|e| TransferError::io(TransferOp::Close, &destination, e))?;
            return Ok(());
        }

        this.master
            .wait()
            .await
            .map_err(|e| TransferError::io(TransferOp::Close, &destination, e))?;
        debug!(destination = %destination, "SSH session closed");
        Ok(())
    }
}

fn check_output(operation: TransferOp, remote_path: &str, output: Output) -> TransferResult<()> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(TransferError::new(
        operation,
        remote_path,
        format!("exit status {}: {}", output.status, stderr.trim()),
    ))
}

/// Quote for a POSIX shell
fn sh_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// `ssh` client that talks through an existing master and never becomes one
fn control_command(program: &Path, socket: &Path, config: &MirrorConfig) -> Command {
    let mut cmd = Command::new(program);
    configure_ssh_cmd(&mut cmd, config, false);
    cmd.arg("-o").arg("ControlMaster=no").arg("-S").arg(socket);
    cmd
}

/// Authentication and host options shared by ssh and scp (`scp` spells the port `-P`)
fn configure_ssh_cmd(cmd: &mut Command, config: &MirrorConfig, scp_style: bool) {
    cmd.arg("-o").arg("BatchMode=yes");
    if let Some(port) = config.port {
        cmd.arg(if scp_style { "-P" } else { "-p" })
            .arg(port.to_string());
    }
    if let Some(key) = &config.key_path {
        cmd.arg("-i").arg(key);
    }
    if let Some(known_hosts) = &config.known_hosts_file {
        cmd.arg("-o")
            .arg(format!("UserKnownHostsFile={}", known_hosts.display()));
    }
    if !config.strict_host_key_checking {
        cmd.arg("-o").arg("StrictHostKeyChecking=no");
        if config.known_hosts_file.is_none() {
            cmd.arg("-o").arg("UserKnownHostsFile=/dev/null");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MirrorConfig {
        MirrorConfig {
            enabled: true,
            host: "upload.example.net".to_string(),
            user: "sshacs".to_string(),
            key_path: Some(PathBuf::from("/srv/app/config/keys/mirror_rsa")),
            port: Some(2222),
            remote_base_path: "/12345".to_string(),
            web_host: "http://cdn.example.net".to_string(),
            ..Default::default()
        }
    }

    fn args(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_sh_quote() {
        assert_eq!(sh_quote("/a/b"), "'/a/b'");
        assert_eq!(sh_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn test_configure_ssh_and_scp_ports() {
        let config = config();

        let mut ssh = Command::new("ssh");
        configure_ssh_cmd(&mut ssh, &config, false);
        let ssh_args = args(&ssh);
        assert!(ssh_args.windows(2).any(|w| w == ["-p", "2222"]));
        assert!(ssh_args.windows(2).any(|w| w == ["-i", "/srv/app/config/keys/mirror_rsa"]));
        assert!(ssh_args.contains(&"BatchMode=yes".to_string()));

        let mut scp = Command::new("scp");
        configure_ssh_cmd(&mut scp, &config, true);
        assert!(args(&scp).windows(2).any(|w| w == ["-P", "2222"]));
    }

    #[test]
    fn test_relaxed_host_checking() {
        let config = MirrorConfig {
            strict_host_key_checking: false,
            ..config()
        };
        let mut ssh = Command::new("ssh");
        configure_ssh_cmd(&mut ssh, &config, false);
        let ssh_args = args(&ssh);

        assert!(ssh_args.contains(&"StrictHostKeyChecking=no".to_string()));
        assert!(ssh_args.contains(&"UserKnownHostsFile=/dev/null".to_string()));
    }

    #[test]
    fn test_master_command() {
        let transport = SshTransport::new(Arc::new(config()));
        let cmd = transport.master_command(Path::new("/tmp/ctl"));
        let master_args = args(&cmd);

        assert!(master_args.contains(&"-M".to_string()));
        assert!(master_args.windows(2).any(|w| w == ["-S", "/tmp/ctl"]));
        assert_eq!(master_args.last().map(String::as_str), Some("sshacs@upload.example.net"));
    }

    #[test]
    fn test_control_command_uses_session_options() {
        let cmd = control_command(Path::new("ssh"), Path::new("/tmp/ctl"), &config());
        let control_args = args(&cmd);

        assert!(control_args.windows(2).any(|w| w == ["-o", "ControlMaster=no"]));
        assert!(control_args.windows(2).any(|w| w == ["-o", "BatchMode=yes"]));
        assert!(control_args.windows(2).any(|w| w == ["-p", "2222"]));
        assert!(control_args.windows(2).any(|w| w == ["-S", "/tmp/ctl"]));
        assert!(!control_args.contains(&"-M".to_string()));
    }

    #[tokio::test]
    async fn test_open_fails_without_binary() {
        let transport = SshTransport::new(Arc::new(config()))
            .with_programs("/nonexistent/ssh", "/nonexistent/scp");

        match transport.open().await {
            Err(err) => {
                assert_eq!(err.operation, TransferOp::Connect);
                assert_eq!(err.remote_path, "sshacs@upload.example.net");
            }
            Ok(_) => panic!("session opened without an ssh binary"),
        }
    }
}
