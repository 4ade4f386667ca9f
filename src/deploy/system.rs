//! # Capability implementations backed by the operating system.
//!
//! | capability            | implementation                                      |
//! |-----------------------|-----------------------------------------------------|
//! | [`Connectivity`]      | TCP connect to a probe address                      |
//! | [`BundleSync`]        | HTTP GET `<base>/<device_id>.zip`, `unzip -P`       |
//! | [`CommandFile`]       | `/bin/bash <file>`, then truncate the file          |
//! | [`NetworkConfigurator`]| file copy + configured restart command             |
//! | [`PackageInstaller`]  | `git clone` into a temp dir + install command       |
//! | [`SelfTest`]          | `camvisor deploy-test` as a child process           |
//! | [`Rebooter`]          | configured reboot command                           |
//! | [`Clock`]             | `chrono::Local::now()`                              |

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time;
use tracing::{debug, info};

use super::capabilities::{
    BundleOutcome, BundleSync, Clock, CommandFile, CommandReport, Connectivity,
    NetworkConfigurator, PackageInstaller, Rebooter, SelfTest, SourceRef,
};
use super::cycle::Capabilities;
use crate::error::StageError;
use crate::meta::DeviceMeta;

/// Bound on one run of the operator command file.
pub const COMMAND_FILE_TIMEOUT: Duration = Duration::from_secs(600);
/// Bound on extracting the device bundle.
pub const UNZIP_TIMEOUT: Duration = Duration::from_secs(300);
/// Bound on the network restart command.
pub const NETWORK_RESTART_TIMEOUT: Duration = Duration::from_secs(120);
/// Bound on each of the source clone and the install command.
pub const INSTALL_TIMEOUT: Duration = Duration::from_secs(1800);
/// Bound on the reboot command.
pub const REBOOT_TIMEOUT: Duration = Duration::from_secs(60);

/// Waits for `cmd` with a bound; the child is killed when the bound is hit.
async fn output_within(cmd: &mut Command, timeout: Duration) -> Result<Output, StageError> {
    cmd.kill_on_drop(true);
    match time::timeout(timeout, cmd.output()).await {
        Ok(output) => Ok(output?),
        Err(_) => Err(StageError::Timeout { timeout }),
    }
}

/// Runs `argv`, failing on spawn errors, non-zero exits and overruns of `timeout`.
async fn run_argv(argv: &[String], cwd: Option<&Path>, timeout: Duration) -> Result<Output, StageError> {
    let Some((program, args)) = argv.split_first() else {
        return Err(StageError::failed("empty command"));
    };
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    debug!(program = %program, "running");
    let output = output_within(&mut cmd, timeout).await?;
    if !output.status.success() {
        return Err(StageError::failed(format!(
            "{program} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(output)
}

/// Writes `content` next to `target`, then renames it over `target`.
async fn write_atomic(target: &Path, content: &[u8]) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut staging = target.as_os_str().to_owned();
    staging.push(format!(".{}.tmp", std::process::id()));
    tokio::fs::write(&staging, content).await?;
    tokio::fs::rename(&staging, target).await
}

async fn read_optional(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Dials a TCP address.
pub struct TcpConnectivity {
    addr: String,
    timeout: Duration,
}

impl TcpConnectivity {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: Duration::from_secs(2),
        }
    }
}

#[async_trait]
impl Connectivity for TcpConnectivity {
    async fn probe(&self) -> bool {
        matches!(
            time::timeout(self.timeout, TcpStream::connect(&self.addr)).await,
            Ok(Ok(_))
        )
    }
}

/// Downloads `<base_url>/<device_id>.zip` and extracts it over the working directory.
pub struct HttpBundleSync {
    client: reqwest::Client,
    base_url: Option<String>,
    password: Option<String>,
    workdir: PathBuf,
}

impl HttpBundleSync {
    pub fn new(
        base_url: Option<String>,
        password: Option<String>,
        workdir: impl Into<PathBuf>,
    ) -> Result<Self, StageError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self {
            client,
            base_url,
            password,
            workdir: workdir.into(),
        })
    }

    async fn extract(&self, archive: &Path, staging: &Path) -> Result<(), StageError> {
        let mut argv = vec!["unzip".to_string(), "-o".to_string(), "-q".to_string()];
        if let Some(pw) = &self.password {
            argv.push("-P".into());
            argv.push(pw.clone());
        }
        argv.push(archive.display().to_string());
        argv.push("-d".into());
        argv.push(staging.display().to_string());
        run_argv(&argv, None, UNZIP_TIMEOUT).await.map(|_| ())
    }
}

#[async_trait]
impl BundleSync for HttpBundleSync {
    async fn sync(&self, device_id: &str) -> Result<BundleOutcome, StageError> {
        let Some(base) = &self.base_url else {
            return Ok(BundleOutcome::Absent);
        };
        let url = format!("{}/{device_id}.zip", base.trim_end_matches('/'));

        let response = self.client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(BundleOutcome::Absent);
        }
        if !response.status().is_success() {
            return Err(StageError::failed(format!("GET {url}: {}", response.status())));
        }

        let parent = self.workdir.parent().unwrap_or(Path::new("/"));
        tokio::fs::create_dir_all(parent).await?;
        let scratch = tempfile::tempdir_in(parent)?;
        let archive = scratch.path().join("bundle.zip");

        let mut file = tokio::fs::File::create(&archive).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        drop(file);

        let staging = scratch.path().join("content");
        self.extract(&archive, &staging).await?;

        // Previous content is only removed once the new one is fully extracted.
        match tokio::fs::remove_dir_all(&self.workdir).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::fs::rename(&staging, &self.workdir).await?;
        info!(url = %url, workdir = %self.workdir.display(), "bundle installed");
        Ok(BundleOutcome::Installed)
    }
}

/// Operator script run with bash and emptied afterwards, so it runs once.
pub struct ShellCommandFile {
    path: PathBuf,
    timeout: Duration,
}

impl ShellCommandFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timeout: COMMAND_FILE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl CommandFile for ShellCommandFile {
    async fn run(&self) -> Result<Option<CommandReport>, StageError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(None);
        }

        info!(file = %self.path.display(), "executing command file");
        let mut cmd = Command::new("/bin/bash");
        cmd.arg(&self.path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let result = output_within(&mut cmd, self.timeout).await;
        // Emptied even after a timeout, so a hanging script does not hang every boot.
        tokio::fs::write(&self.path, b"").await?;
        let output = result?;

        Ok(Some(CommandReport {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }))
    }
}

/// Candidate/installed network config files plus a restart command.
pub struct FileNetworkConfigurator {
    candidate: Option<PathBuf>,
    installed: Option<PathBuf>,
    restart: Vec<String>,
}

impl FileNetworkConfigurator {
    pub fn new(candidate: Option<PathBuf>, installed: Option<PathBuf>, restart: Vec<String>) -> Self {
        Self {
            candidate,
            installed,
            restart,
        }
    }
}

#[async_trait]
impl NetworkConfigurator for FileNetworkConfigurator {
    async fn candidate(&self) -> Result<Option<Vec<u8>>, StageError> {
        match &self.candidate {
            Some(path) => Ok(read_optional(path).await?),
            None => Ok(None),
        }
    }

    async fn installed(&self) -> Result<Option<Vec<u8>>, StageError> {
        match &self.installed {
            Some(path) => Ok(read_optional(path).await?),
            None => Ok(None),
        }
    }

    async fn install(&self, content: &[u8]) -> Result<(), StageError> {
        let Some(target) = &self.installed else {
            return Err(StageError::failed("no installed network config path configured"));
        };
        write_atomic(target, content).await?;
        Ok(())
    }

    async fn restart_interface(&self) -> Result<(), StageError> {
        if self.restart.is_empty() {
            return Err(StageError::failed("no network restart command configured"));
        }
        run_argv(&self.restart, None, NETWORK_RESTART_TIMEOUT).await.map(|_| ())
    }
}

/// Clones the source into a fresh temporary directory and runs the install command there.
pub struct GitInstaller {
    install_command: Vec<String>,
}

impl GitInstaller {
    pub fn new(install_command: Vec<String>) -> Self {
        Self { install_command }
    }
}

#[async_trait]
impl PackageInstaller for GitInstaller {
    async fn install(&self, source: &SourceRef) -> Result<(), StageError> {
        if self.install_command.is_empty() {
            return Err(StageError::failed("no install command configured"));
        }
        let scratch = tempfile::tempdir()?;
        let checkout = scratch.path().join("src");

        let mut clone = vec!["git".to_string(), "clone".into(), "--depth".into(), "1".into()];
        if let Some(branch) = &source.branch {
            clone.push("--branch".into());
            clone.push(branch.clone());
        }
        clone.push(source.url.clone());
        clone.push(checkout.display().to_string());
        run_argv(&clone, None, INSTALL_TIMEOUT).await?;

        run_argv(&self.install_command, Some(&checkout), INSTALL_TIMEOUT).await?;
        info!(url = %source.url, "software upgraded");
        Ok(())
    }
}

/// Runs this executable's `deploy-test` command.
pub struct ProcessSelfTest {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessSelfTest {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl SelfTest for ProcessSelfTest {
    async fn run(&self) -> Result<(), StageError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;
        if output.status.success() {
            return Ok(());
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Err(StageError::failed(format!(
            "self-test exited with {}: {}",
            output.status,
            stdout.trim()
        )))
    }
}

pub struct CommandRebooter {
    argv: Vec<String>,
}

impl CommandRebooter {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

#[async_trait]
impl Rebooter for CommandRebooter {
    async fn reboot(&self) -> Result<(), StageError> {
        run_argv(&self.argv, None, REBOOT_TIMEOUT).await.map(|_| ())
    }
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Every capability wired from the device meta file.
pub fn from_meta(meta: &DeviceMeta, self_test: ProcessSelfTest) -> Result<Capabilities, StageError> {
    Ok(Capabilities {
        connectivity: Arc::new(TcpConnectivity::new(meta.connectivity_probe.clone())),
        bundle: Arc::new(HttpBundleSync::new(
            meta.bundle_url.clone(),
            meta.archive_password.clone(),
            meta.workdir.clone(),
        )?),
        command_file: Arc::new(ShellCommandFile::new(meta.command_file.clone())),
        network: Arc::new(FileNetworkConfigurator::new(
            meta.network_candidate.clone(),
            meta.network_installed.clone(),
            meta.network_restart.clone(),
        )),
        installer: Arc::new(GitInstaller::new(meta.install_command.clone())),
        self_test: Arc::new(self_test),
        rebooter: Arc::new(CommandRebooter::new(meta.reboot_command.clone())),
        clock: Arc::new(SystemClock),
    })
}
