//! # DeploymentCycle: the once-per-boot update / validate / serve / reboot sequence.
//!
//! ```text
//! AwaitingNetwork ─► SyncingBundle ─► RunningCommandFile ─► SyncingNetworkConfig
//!        ─► UpgradingSoftware ─► ResolvingConfig ─► SelfTesting ─► Serving
//!        ─► Terminating ─► Rebooting
//! ```
//!
//! | stage                | on failure                                    |
//! |----------------------|-----------------------------------------------|
//! | AwaitingNetwork      | degraded, continue (connected = false)        |
//! | SyncingBundle        | degraded, continue on previous content        |
//! | RunningCommandFile   | degraded, continue                            |
//! | SyncingNetworkConfig | degraded, continue                            |
//! | UpgradingSoftware    | degraded, continue on previous version        |
//! | ResolvingConfig      | **fatal**                                     |
//! | SelfTesting          | **fatal** (skipped when not connected)        |
//! | Serving              | cannot fail; ends at the deadline or a signal |
//! | Terminating          | degraded, continue                            |
//! | Rebooting            | terminal                                      |
//!
//! A fatal stage ends the cycle with [`DeployError::Fatal`] before the workload
//! is ever started; nothing is shut down and the device is not rebooted. A
//! termination request before Serving ends it the same way with
//! [`DeployError::Interrupted`].
//! Stages run strictly in order and each one's failure policy is resolved
//! before the next starts.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveTime};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::capabilities::{
    BundleOutcome, BundleSync, Clock, CommandFile, Connectivity, NetworkConfigurator,
    PackageInstaller, Rebooter, SelfTest, SourceRef,
};
use super::deadline::next_deadline;
use super::state::{DeploymentState, StageStatus};
use crate::config::{ConfigStore, ConfigVersion, Configuration};
use crate::error::{ConfigError, DeployError, StageError};
use crate::meta::DeviceMeta;
use crate::notify::Notifier;
use crate::supervisor::{SupervisorConfig, Workload, WorkloadFactory};

/// Every external effect of the cycle.
#[derive(Clone)]
pub struct Capabilities {
    pub connectivity: Arc<dyn Connectivity>,
    pub bundle: Arc<dyn BundleSync>,
    pub command_file: Arc<dyn CommandFile>,
    pub network: Arc<dyn NetworkConfigurator>,
    pub installer: Arc<dyn PackageInstaller>,
    pub self_test: Arc<dyn SelfTest>,
    pub rebooter: Arc<dyn Rebooter>,
    pub clock: Arc<dyn Clock>,
}

/// Tunables of the cycle.
#[derive(Debug, Clone)]
pub struct CycleSettings {
    /// Device identity; names the remote bundle.
    pub device_id: String,
    /// Software source; no upgrade when `None`.
    pub source: Option<SourceRef>,
    /// Connectivity probes before giving up.
    pub connectivity_attempts: u32,
    /// Pause between connectivity probes.
    pub probe_interval: Duration,
    /// Bound of each self-test run.
    pub self_test_timeout: Duration,
    /// Sequential self-test runs; all must pass.
    pub self_test_runs: u32,
    /// Daily reboot time.
    pub reboot_at: NaiveTime,
    /// Grace given to the workload when terminating.
    pub terminate_grace: Duration,
}

impl CycleSettings {
    pub fn from_meta(meta: &DeviceMeta) -> Self {
        Self {
            device_id: meta.device_id.clone(),
            source: meta.source_ref.as_ref().map(|url| SourceRef {
                url: url.clone(),
                branch: meta.source_branch.clone(),
            }),
            connectivity_attempts: meta.connectivity_attempts,
            probe_interval: Duration::from_secs(1),
            self_test_timeout: meta.self_test_timeout,
            self_test_runs: 2,
            reboot_at: meta.reboot_time,
            terminate_grace: SupervisorConfig::DEFAULT_GRACE,
        }
    }
}

/// What a successful cycle did.
#[derive(Debug, Default, Clone)]
pub struct CycleReport {
    /// Whether connectivity was established.
    pub connected: bool,
    /// Configuration version that was served.
    pub config_version: Option<ConfigVersion>,
    /// When serving was scheduled to end.
    pub deadline: Option<DateTime<Local>>,
    /// Every stage with how it resolved, in execution order.
    pub stages: Vec<(DeploymentState, StageStatus)>,
}

impl CycleReport {
    pub fn status(&self, stage: DeploymentState) -> Option<&StageStatus> {
        self.stages.iter().find(|(s, _)| *s == stage).map(|(_, st)| st)
    }
}

/// The deployment state machine. One instance per boot.
pub struct DeploymentCycle {
    settings: CycleSettings,
    caps: Capabilities,
    store: ConfigStore,
    factory: Arc<dyn WorkloadFactory>,
    notifier: Notifier,
    terminate: CancellationToken,
    state: DeploymentState,
}

impl DeploymentCycle {
    pub fn new(
        settings: CycleSettings,
        caps: Capabilities,
        store: ConfigStore,
        factory: Arc<dyn WorkloadFactory>,
    ) -> Self {
        Self {
            settings,
            caps,
            store,
            factory,
            notifier: Notifier::disabled(),
            terminate: CancellationToken::new(),
            state: DeploymentState::AwaitingNetwork,
        }
    }

    /// Sends stage warnings and failures through `notifier`.
    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    /// Ends serving early when `terminate` is cancelled (termination signal).
    pub fn with_terminate(mut self, terminate: CancellationToken) -> Self {
        self.terminate = terminate;
        self
    }

    /// Stage currently executing (or the last one executed).
    pub fn state(&self) -> DeploymentState {
        self.state
    }

    /// Runs every stage once, in order.
    pub async fn run(&mut self) -> Result<CycleReport, DeployError> {
        let mut report = CycleReport::default();

        self.begin(DeploymentState::AwaitingNetwork)?;
        let status = self.await_network().await;
        report.connected = status == StageStatus::Done;
        self.record(&mut report, status).await;

        self.begin(DeploymentState::SyncingBundle)?;
        let status = self.sync_bundle(report.connected).await;
        self.record(&mut report, status).await;

        self.begin(DeploymentState::RunningCommandFile)?;
        let status = self.run_command_file().await;
        self.record(&mut report, status).await;

        self.begin(DeploymentState::SyncingNetworkConfig)?;
        let status = self.sync_network_config().await;
        self.record(&mut report, status).await;

        self.begin(DeploymentState::UpgradingSoftware)?;
        let status = self.upgrade_software(report.connected).await;
        self.record(&mut report, status).await;

        self.begin(DeploymentState::ResolvingConfig)?;
        let cfg = match self.resolve_config() {
            Ok(cfg) => cfg,
            Err(reason) => return Err(self.fatal(reason).await),
        };
        report.config_version = cfg.version;
        self.record(&mut report, StageStatus::Done).await;

        self.begin(DeploymentState::SelfTesting)?;
        let status = match self.self_test(report.connected).await {
            Ok(status) => status,
            Err(reason) => return Err(self.fatal(reason).await),
        };
        self.record(&mut report, status).await;

        self.begin(DeploymentState::Serving)?;
        let mut workload = self.factory.build(&cfg);
        workload.start_all().await;
        let deadline = next_deadline(self.caps.clock.now(), self.settings.reboot_at);
        report.deadline = Some(deadline);
        info!(deadline = %deadline.format("%Y-%m-%d %H:%M:%S"), "serving");
        let why = self.serve_until(workload.as_mut(), deadline).await;
        info!(reason = why, "serving ended");
        self.record(&mut report, StageStatus::Done).await;

        self.enter(DeploymentState::Terminating);
        let status = match workload.shutdown(self.settings.terminate_grace).await {
            Ok(()) => StageStatus::Done,
            Err(e) => StageStatus::Degraded(e.to_string()),
        };
        self.record(&mut report, status).await;
        workload.close().await;

        self.enter(DeploymentState::Rebooting);
        let status = match self.caps.rebooter.reboot().await {
            Ok(()) => StageStatus::Done,
            Err(e) => StageStatus::Degraded(format!("reboot failed: {e}")),
        };
        self.record(&mut report, status).await;

        Ok(report)
    }

    fn enter(&mut self, stage: DeploymentState) {
        self.state = stage;
        info!(stage = %stage, "entering stage");
    }

    /// Enters a stage that a termination request may still cancel.
    fn begin(&mut self, stage: DeploymentState) -> Result<(), DeployError> {
        if self.terminate.is_cancelled() {
            warn!(stage = %stage, "termination requested, deployment interrupted");
            return Err(DeployError::Interrupted { stage });
        }
        self.enter(stage);
        Ok(())
    }

    async fn record(&self, report: &mut CycleReport, status: StageStatus) {
        let stage = self.state;
        match &status {
            StageStatus::Done => info!(stage = %stage, "stage done"),
            StageStatus::Skipped => info!(stage = %stage, "stage skipped"),
            StageStatus::Degraded(reason) => {
                warn!(stage = %stage, reason = %reason, "stage failed, continuing");
                self.notifier.error(stage.as_str(), reason).await;
            }
        }
        report.stages.push((stage, status));
    }

    async fn fatal(&self, reason: String) -> DeployError {
        error!(stage = %self.state, reason = %reason, notified = true, "fatal stage failure, aborting");
        self.notifier.critical(self.state.as_str(), &reason).await;
        DeployError::Fatal {
            stage: self.state,
            reason,
        }
    }

    async fn await_network(&self) -> StageStatus {
        let attempts = self.settings.connectivity_attempts.max(1);
        for attempt in 1..=attempts {
            if self.caps.connectivity.probe().await {
                info!(attempt, "network available");
                return StageStatus::Done;
            }
            if attempt < attempts {
                tokio::select! {
                    _ = time::sleep(self.settings.probe_interval) => {}
                    _ = self.terminate.cancelled() => return StageStatus::Skipped,
                }
            }
        }
        StageStatus::Degraded(format!("no connectivity after {attempts} attempts"))
    }

    async fn sync_bundle(&self, connected: bool) -> StageStatus {
        if !connected {
            return StageStatus::Skipped;
        }
        match self.caps.bundle.sync(&self.settings.device_id).await {
            Ok(BundleOutcome::Installed) => StageStatus::Done,
            Ok(BundleOutcome::Absent) => StageStatus::Skipped,
            Err(e) => StageStatus::Degraded(format!("bundle sync failed: {e}")),
        }
    }

    async fn run_command_file(&self) -> StageStatus {
        let report = match self.caps.command_file.run().await {
            Ok(Some(report)) => report,
            Ok(None) => return StageStatus::Skipped,
            Err(e) => return StageStatus::Degraded(format!("command file failed to run: {e}")),
        };
        if !report.stdout.trim().is_empty() {
            info!(stdout = %report.stdout.trim(), "command file output");
            self.notifier.info("command file", report.stdout.trim()).await;
        }
        if report.failed() {
            let code = report
                .status
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            return StageStatus::Degraded(format!(
                "command file exited with {code}: {}",
                report.stderr.trim()
            ));
        }
        StageStatus::Done
    }

    async fn sync_network_config(&self) -> StageStatus {
        let net = &self.caps.network;
        let candidate = match net.candidate().await {
            Ok(Some(candidate)) => candidate,
            Ok(None) => return StageStatus::Skipped,
            Err(e) => return StageStatus::Degraded(format!("reading network config: {e}")),
        };
        match net.installed().await {
            Ok(Some(installed)) if installed == candidate => return StageStatus::Skipped,
            Ok(_) => {}
            Err(e) => return StageStatus::Degraded(format!("reading installed network config: {e}")),
        }

        if let Err(e) = net.install(&candidate).await {
            return StageStatus::Degraded(format!("installing network config: {e}"));
        }
        info!("network config changed, restarting interface");
        match net.restart_interface().await {
            Ok(()) => StageStatus::Done,
            Err(e) => StageStatus::Degraded(format!("network restart failed: {e}")),
        }
    }

    async fn upgrade_software(&self, connected: bool) -> StageStatus {
        let Some(source) = self.settings.source.as_ref().filter(|_| connected) else {
            return StageStatus::Skipped;
        };
        match self.caps.installer.install(source).await {
            Ok(()) => StageStatus::Done,
            Err(e) => StageStatus::Degraded(format!("upgrade from {} failed: {e}", source.url)),
        }
    }

    fn resolve_config(&self) -> Result<Configuration, String> {
        let version = match self.store.resolve_active_version() {
            Ok(Some(version)) => version,
            Ok(None) => {
                return Err(ConfigError::NoVersion {
                    dir: self.store.dir().to_path_buf(),
                }
                .to_string());
            }
            Err(e) => return Err(e.to_string()),
        };
        self.store.activate(version).map_err(|e| e.to_string())?;
        match self.store.prune(version) {
            Ok(removed) if !removed.is_empty() => info!(?removed, "old configurations pruned"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "failed to prune old configurations"),
        }
        self.store.load().map_err(|e| e.to_string())
    }

    async fn self_test(&self, connected: bool) -> Result<StageStatus, String> {
        if !connected {
            return Ok(StageStatus::Skipped);
        }
        let runs = self.settings.self_test_runs.max(1);
        let timeout = self.settings.self_test_timeout;
        for run in 1..=runs {
            let outcome = match time::timeout(timeout, self.caps.self_test.run()).await {
                Ok(outcome) => outcome,
                Err(_elapsed) => Err(StageError::Timeout { timeout }),
            };
            if let Err(e) = outcome {
                return Err(format!("self-test run {run}/{runs}: {e}"));
            }
            info!(run, runs, "self-test passed");
        }
        Ok(StageStatus::Done)
    }

    /// Serves until `deadline` or the termination token, whichever comes first.
    async fn serve_until(&self, workload: &mut dyn Workload, deadline: DateTime<Local>) -> &'static str {
        let wait = (deadline - self.caps.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let stop = CancellationToken::new();
        let timer = async {
            let why = tokio::select! {
                _ = time::sleep(wait) => "deadline reached",
                _ = self.terminate.cancelled() => "termination requested",
            };
            stop.cancel();
            why
        };
        let ((), why) = tokio::join!(workload.serve(stop.clone()), timer);
        why
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::capabilities::CommandReport;
    use crate::error::RuntimeError;
    use crate::notify::notifier::tests::RecordingSink;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    type Calls = Arc<Mutex<Vec<String>>>;

    fn push(calls: &Calls, call: impl Into<String>) {
        calls.lock().unwrap().push(call.into());
    }

    struct FakeConnectivity {
        up: bool,
        probes: AtomicU32,
    }

    #[async_trait]
    impl Connectivity for FakeConnectivity {
        async fn probe(&self) -> bool {
            self.probes.fetch_add(1, Ordering::SeqCst);
            self.up
        }
    }

    struct FakeBundle(Option<BundleOutcome>, Calls);

    #[async_trait]
    impl BundleSync for FakeBundle {
        async fn sync(&self, device_id: &str) -> Result<BundleOutcome, StageError> {
            push(&self.1, format!("bundle:{device_id}"));
            self.0.ok_or_else(|| StageError::failed("archive corrupt"))
        }
    }

    struct FakeCommandFile(Option<CommandReport>);

    #[async_trait]
    impl CommandFile for FakeCommandFile {
        async fn run(&self) -> Result<Option<CommandReport>, StageError> {
            Ok(self.0.clone())
        }
    }

    struct FakeNetwork {
        candidate: Option<Vec<u8>>,
        installed: Mutex<Option<Vec<u8>>>,
        restart_ok: bool,
        calls: Calls,
    }

    #[async_trait]
    impl NetworkConfigurator for FakeNetwork {
        async fn candidate(&self) -> Result<Option<Vec<u8>>, StageError> {
            Ok(self.candidate.clone())
        }
        async fn installed(&self) -> Result<Option<Vec<u8>>, StageError> {
            Ok(self.installed.lock().unwrap().clone())
        }
        async fn install(&self, content: &[u8]) -> Result<(), StageError> {
            push(&self.calls, "network:install");
            *self.installed.lock().unwrap() = Some(content.to_vec());
            Ok(())
        }
        async fn restart_interface(&self) -> Result<(), StageError> {
            push(&self.calls, "network:restart");
            match self.restart_ok {
                true => Ok(()),
                false => Err(StageError::failed("wlan0 did not come up")),
            }
        }
    }

    struct FakeInstaller(bool, Calls);

    #[async_trait]
    impl PackageInstaller for FakeInstaller {
        async fn install(&self, source: &SourceRef) -> Result<(), StageError> {
            push(&self.1, format!("install:{}", source.url));
            match self.0 {
                true => Ok(()),
                false => Err(StageError::failed("pip install failed")),
            }
        }
    }

    struct FakeSelfTest {
        duration: Duration,
        runs: AtomicU32,
    }

    #[async_trait]
    impl SelfTest for FakeSelfTest {
        async fn run(&self) -> Result<(), StageError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            time::sleep(self.duration).await;
            Ok(())
        }
    }

    struct FakeRebooter(Calls);

    #[async_trait]
    impl Rebooter for FakeRebooter {
        async fn reboot(&self) -> Result<(), StageError> {
            push(&self.0, "reboot");
            Ok(())
        }
    }

    struct FixedClock(DateTime<Local>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Local> {
            self.0
        }
    }

    struct FakeWorkload(Calls);

    #[async_trait]
    impl Workload for FakeWorkload {
        async fn start_all(&mut self) {
            push(&self.0, "start_all");
        }
        async fn serve(&mut self, stop: CancellationToken) {
            stop.cancelled().await;
            push(&self.0, "serve:stopped");
        }
        async fn shutdown(&mut self, grace: Duration) -> Result<(), RuntimeError> {
            push(&self.0, format!("shutdown:{}s", grace.as_secs()));
            Ok(())
        }
        async fn close(self: Box<Self>) {
            push(&self.0, "close");
        }
    }

    struct FakeFactory(Calls);

    impl WorkloadFactory for FakeFactory {
        fn build(&self, _cfg: &Configuration) -> Box<dyn Workload> {
            Box::new(FakeWorkload(self.0.clone()))
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        calls: Calls,
        self_test: Arc<FakeSelfTest>,
        connectivity: Arc<FakeConnectivity>,
        sink: Arc<RecordingSink>,
        cycle: DeploymentCycle,
    }

    struct Setup {
        connected: bool,
        config_versions: &'static [u64],
        bundle: Option<BundleOutcome>,
        command: Option<CommandReport>,
        network: (Option<&'static str>, Option<&'static str>, bool),
        installer_ok: bool,
        self_test_duration: Duration,
    }

    impl Default for Setup {
        fn default() -> Self {
            Self {
                connected: true,
                config_versions: &[1],
                bundle: Some(BundleOutcome::Absent),
                command: None,
                network: (None, None, true),
                installer_ok: true,
                self_test_duration: Duration::from_secs(1),
            }
        }
    }

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 12, 8, 30, 0).single().unwrap()
    }

    fn harness(setup: Setup) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        for v in setup.config_versions {
            std::fs::write(
                dir.path().join(format!("cam_{v}.toml")),
                "[main]\nperiod = 5\n\n[status]\nreport = \"/tmp/status\"\n",
            )
            .unwrap();
        }

        let calls: Calls = Arc::default();
        let self_test = Arc::new(FakeSelfTest {
            duration: setup.self_test_duration,
            runs: AtomicU32::new(0),
        });
        let connectivity = Arc::new(FakeConnectivity {
            up: setup.connected,
            probes: AtomicU32::new(0),
        });
        let caps = Capabilities {
            connectivity: connectivity.clone(),
            bundle: Arc::new(FakeBundle(setup.bundle, calls.clone())),
            command_file: Arc::new(FakeCommandFile(setup.command)),
            network: Arc::new(FakeNetwork {
                candidate: setup.network.0.map(|s| s.as_bytes().to_vec()),
                installed: Mutex::new(setup.network.1.map(|s| s.as_bytes().to_vec())),
                restart_ok: setup.network.2,
                calls: calls.clone(),
            }),
            installer: Arc::new(FakeInstaller(setup.installer_ok, calls.clone())),
            self_test: self_test.clone(),
            rebooter: Arc::new(FakeRebooter(calls.clone())),
            clock: Arc::new(FixedClock(now())),
        };
        let settings = CycleSettings {
            device_id: "cam-07".into(),
            source: Some(SourceRef {
                url: "https://git.example.org/camvisor.git".into(),
                branch: None,
            }),
            connectivity_attempts: 30,
            probe_interval: Duration::from_secs(1),
            self_test_timeout: Duration::from_secs(5),
            self_test_runs: 2,
            reboot_at: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
            terminate_grace: Duration::from_secs(20),
        };
        let sink = Arc::new(RecordingSink::default());
        let cycle = DeploymentCycle::new(
            settings,
            caps,
            ConfigStore::new(dir.path(), "cam"),
            Arc::new(FakeFactory(calls.clone())),
        )
        .with_notifier(Notifier::new(sink.clone(), "cam-07"));

        Harness {
            _dir: dir,
            calls,
            self_test,
            connectivity,
            sink,
            cycle,
        }
    }

    fn calls(h: &Harness) -> Vec<String> {
        h.calls.lock().unwrap().clone()
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_cycle_serves_until_deadline_then_reboots() {
        let mut h = harness(Setup::default());
        let started = time::Instant::now();

        let report = h.cycle.run().await.unwrap();

        assert!(report.connected);
        let stages: Vec<DeploymentState> = report.stages.iter().map(|(s, _)| *s).collect();
        assert_eq!(stages, DeploymentState::ALL.to_vec());
        assert_eq!(report.config_version, Some(ConfigVersion(1)));
        assert_eq!(
            report.deadline,
            Some(Local.with_ymd_and_hms(2024, 3, 13, 7, 0, 0).single().unwrap())
        );
        // 08:30 to 07:00 next day, plus two one-second self-test runs.
        assert_eq!(started.elapsed(), Duration::from_secs(22 * 3600 + 30 * 60 + 2));
        assert_eq!(
            calls(&h),
            vec![
                "bundle:cam-07",
                "install:https://git.example.org/camvisor.git",
                "start_all",
                "serve:stopped",
                "shutdown:20s",
                "close",
                "reboot",
            ]
        );
        assert_eq!(h.self_test.runs.load(Ordering::SeqCst), 2);
        assert_eq!(h.cycle.state(), DeploymentState::Rebooting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_self_test_timeout_is_fatal_and_never_serves() {
        let mut h = harness(Setup {
            self_test_duration: Duration::from_secs(60),
            ..Setup::default()
        });

        let err = h.cycle.run().await.unwrap_err();

        match err {
            DeployError::Fatal { stage, reason } => {
                assert_eq!(stage, DeploymentState::SelfTesting);
                assert!(reason.contains("timed out"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
        let calls = calls(&h);
        assert!(!calls.contains(&"start_all".to_string()));
        assert!(!calls.contains(&"reboot".to_string()));
        assert_eq!(h.self_test.runs.load(Ordering::SeqCst), 1);
        assert_eq!(h.sink.titles().last().map(String::as_str), Some("self-testing"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_self_test_run_can_fail() {
        struct SecondRunFails(AtomicU32);

        #[async_trait]
        impl SelfTest for SecondRunFails {
            async fn run(&self) -> Result<(), StageError> {
                match self.0.fetch_add(1, Ordering::SeqCst) {
                    0 => Ok(()),
                    _ => Err(StageError::failed("camera not detected")),
                }
            }
        }

        let mut h = harness(Setup::default());
        h.cycle.caps.self_test = Arc::new(SecondRunFails(AtomicU32::new(0)));

        let err = h.cycle.run().await.unwrap_err();
        assert!(err.to_string().contains("self-test run 2/2"), "{err}");
        assert!(!calls(&h).contains(&"start_all".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_connectivity_skips_self_test_and_still_serves() {
        let mut h = harness(Setup {
            connected: false,
            ..Setup::default()
        });

        let report = h.cycle.run().await.unwrap();

        assert!(!report.connected);
        assert_eq!(h.connectivity.probes.load(Ordering::SeqCst), 30);
        assert!(report.status(DeploymentState::AwaitingNetwork).unwrap().is_degraded());
        assert_eq!(report.status(DeploymentState::SyncingBundle), Some(&StageStatus::Skipped));
        assert_eq!(report.status(DeploymentState::UpgradingSoftware), Some(&StageStatus::Skipped));
        assert_eq!(report.status(DeploymentState::SelfTesting), Some(&StageStatus::Skipped));
        assert_eq!(h.self_test.runs.load(Ordering::SeqCst), 0);
        assert!(calls(&h).contains(&"start_all".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_device_without_config_is_fatal() {
        let mut h = harness(Setup {
            config_versions: &[],
            bundle: Some(BundleOutcome::Absent),
            ..Setup::default()
        });

        let err = h.cycle.run().await.unwrap_err();

        assert!(matches!(
            err,
            DeployError::Fatal {
                stage: DeploymentState::ResolvingConfig,
                ..
            }
        ));
        assert!(!calls(&h).contains(&"start_all".to_string()));
        assert_eq!(h.self_test.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_highest_config_version_is_activated_and_others_pruned() {
        let mut h = harness(Setup {
            config_versions: &[1, 3, 2],
            ..Setup::default()
        });

        let report = h.cycle.run().await.unwrap();

        assert_eq!(report.config_version, Some(ConfigVersion(3)));
        let dir = h.cycle.store.dir().to_path_buf();
        assert!(dir.join("cam_3.toml").exists());
        assert!(!dir.join("cam_1.toml").exists());
        assert!(!dir.join("cam_2.toml").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_fatal_failures_do_not_stop_the_cycle() {
        let mut h = harness(Setup {
            bundle: None,
            command: Some(CommandReport {
                status: Some(1),
                stdout: String::new(),
                stderr: "rm: cannot remove".into(),
            }),
            network: (Some("new"), Some("old"), false),
            installer_ok: false,
            ..Setup::default()
        });

        let report = h.cycle.run().await.unwrap();

        for stage in [
            DeploymentState::SyncingBundle,
            DeploymentState::RunningCommandFile,
            DeploymentState::SyncingNetworkConfig,
            DeploymentState::UpgradingSoftware,
        ] {
            assert!(report.status(stage).unwrap().is_degraded(), "{stage}");
        }
        assert!(calls(&h).contains(&"network:restart".to_string()));
        assert!(calls(&h).contains(&"reboot".to_string()));
        let titles = h.sink.titles();
        assert!(titles.contains(&"running-command-file".to_string()));
        assert!(titles.contains(&"upgrading-software".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_identical_network_config_is_skipped() {
        let mut h = harness(Setup {
            network: (Some("auto wlan0"), Some("auto wlan0"), true),
            ..Setup::default()
        });

        let report = h.cycle.run().await.unwrap();

        assert_eq!(report.status(DeploymentState::SyncingNetworkConfig), Some(&StageStatus::Skipped));
        assert!(!calls(&h).iter().any(|c| c.starts_with("network:")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_changed_network_config_is_installed_and_restarted() {
        let mut h = harness(Setup {
            network: (Some("auto eth0"), None, true),
            ..Setup::default()
        });

        let report = h.cycle.run().await.unwrap();

        assert_eq!(report.status(DeploymentState::SyncingNetworkConfig), Some(&StageStatus::Done));
        let calls = calls(&h);
        let install = calls.iter().position(|c| c == "network:install").unwrap();
        let restart = calls.iter().position(|c| c == "network:restart").unwrap();
        assert!(install < restart);
    }

    #[tokio::test(start_paused = true)]
    async fn test_termination_signal_bypasses_deadline() {
        let mut h = harness(Setup::default());
        let terminate = CancellationToken::new();
        h.cycle.terminate = terminate.clone();
        let started = time::Instant::now();

        tokio::spawn(async move {
            time::sleep(Duration::from_secs(60)).await;
            terminate.cancel();
        });
        h.cycle.run().await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(120));
        let calls = calls(&h);
        assert_eq!(&calls[calls.len() - 4..], ["serve:stopped", "shutdown:20s", "close", "reboot"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_termination_before_serving_interrupts_without_reboot() {
        let mut h = harness(Setup {
            connected: false,
            ..Setup::default()
        });
        let terminate = CancellationToken::new();
        h.cycle.terminate = terminate.clone();
        let started = time::Instant::now();

        tokio::spawn(async move {
            time::sleep(Duration::from_millis(4500)).await;
            terminate.cancel();
        });
        let err = h.cycle.run().await.unwrap_err();

        match &err {
            DeployError::Interrupted { stage } => assert_eq!(*stage, DeploymentState::SyncingBundle),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.as_label(), "deploy_interrupted");
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(h.connectivity.probes.load(Ordering::SeqCst), 5);
        assert!(calls(&h).is_empty());
        assert_eq!(h.cycle.state(), DeploymentState::AwaitingNetwork);
    }

    #[tokio::test]
    async fn test_termination_already_requested_stops_at_first_stage() {
        let mut h = harness(Setup::default());
        h.cycle.terminate.cancel();

        let err = h.cycle.run().await.unwrap_err();

        assert!(matches!(err, DeployError::Interrupted { stage: DeploymentState::AwaitingNetwork }));
        assert_eq!(h.connectivity.probes.load(Ordering::SeqCst), 0);
        assert!(calls(&h).is_empty());
    }
}
