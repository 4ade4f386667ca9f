//! `camvisor` command line.
//!
//! ```text
//! camvisor [--meta <path>] run          supervise the workers of the active configuration
//! camvisor [--meta <path>] deploy       run the once-per-boot deployment cycle
//! camvisor [--meta <path>] deploy-test  check and exercise every configured worker
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use camvisor::deploy::system::{self, ProcessSelfTest};
use camvisor::workers::builtin::register_builtins;
use camvisor::{
    BootGuard, ConfigStore, Configuration, CycleSettings, DeployError, DeploymentCycle, DeviceMeta,
    ErrorLayer, LogWriter, Notifier, NotifyWriter, NtfySink, Subscribe, Supervisor, SupervisorConfig,
    WorkerRegistry, Workload, WorkloadFactory, logging, wait_for_shutdown_signal,
};

/// How often `run` checks the active configuration for changes.
const RELOAD_CHECK: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "camvisor", version, about = "Unattended camera device supervisor")]
struct Cli {
    /// Device meta file.
    #[arg(long, env = "CAMVISOR_META", default_value = "/etc/camvisor/meta.toml")]
    meta: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Supervise the workers of the active configuration until a signal.
    Run,
    /// Update, validate, serve until the reboot time, then reboot.
    Deploy,
    /// Validate and exercise every configured worker once.
    DeployTest,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let meta = DeviceMeta::load(&cli.meta)?;
    let store = store_for(&meta);

    // The log file is a property of the configuration; a broken one must not
    // prevent logging to stderr.
    let cfg = store.load().ok();
    let log_file = cfg.as_ref().and_then(|cfg| cfg.main.local_log_file.clone());
    // The self-test reports through its exit status; the deploy cycle notifies.
    let notifier = notifier_for(&meta, cfg.as_ref());
    let errors = match cli.command {
        Command::DeployTest => None,
        _ if notifier.is_enabled() => Some(ErrorLayer::new(notifier)),
        _ => None,
    };
    let (errors, _forwarder) = errors.unzip();
    let _guard = logging::init(log_file.as_deref(), errors).context("initialising logging")?;

    match cli.command {
        Command::Run => run(&meta, store).await,
        Command::Deploy => deploy(&cli.meta, meta, store).await,
        Command::DeployTest => deploy_test(store).await,
    }
}

async fn run(meta: &DeviceMeta, store: ConfigStore) -> anyhow::Result<ExitCode> {
    let cfg = store.load().context("loading active configuration")?;
    let mut fingerprint = store.fingerprint()?;
    let factory = SupervisorFactory::new(meta.clone());
    let registry = factory.registry(&cfg);

    let mut sup = factory.supervisor(&cfg);
    sup.start_all();
    info!(version = ?cfg.version, workers = cfg.workers.len(), "supervisor started");

    let signal = wait_for_shutdown_signal();
    tokio::pin!(signal);
    loop {
        let stop = CancellationToken::new();
        let trigger = async {
            let reload = tokio::select! {
                res = &mut signal => {
                    if let Err(e) = res {
                        error!(error = %e, "signal handling failed");
                    }
                    false
                }
                _ = changed(&store, &fingerprint) => true,
            };
            stop.cancel();
            reload
        };
        let ((), reload) = tokio::join!(sup.serve(stop.clone()), trigger);
        if !reload {
            break;
        }

        match store.load() {
            Ok(cfg) => {
                info!(version = ?cfg.version, "configuration changed, reloading");
                sup.reload(registry.specs(&cfg)).await;
            }
            Err(e) => error!(error = %e, label = e.as_label(), "changed configuration is unusable, keeping workers"),
        }
        fingerprint = store.fingerprint().unwrap_or(fingerprint);
    }

    let grace = sup.config().grace;
    let result = sup.shutdown(grace).await;
    sup.close().await;
    match result {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            error!(error = %e, label = e.as_label(), "shutdown incomplete");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn changed(store: &ConfigStore, since: &camvisor::config::Fingerprint) {
    loop {
        time::sleep(RELOAD_CHECK).await;
        if store.has_changed(since) {
            return;
        }
    }
}

async fn deploy(meta_path: &Path, meta: DeviceMeta, store: ConfigStore) -> anyhow::Result<ExitCode> {
    let _boot = match BootGuard::claim(&meta.boot_marker) {
        Ok(guard) => guard,
        Err(e @ DeployError::AlreadyRan { .. }) => {
            warn!(error = %e, "nothing to do");
            return Ok(ExitCode::SUCCESS);
        }
        Err(e) => return Err(e.into()),
    };

    let exe = std::env::current_exe().context("locating own executable for the self-test")?;
    let self_test = ProcessSelfTest::new(
        exe,
        vec![
            "--meta".into(),
            meta_path.display().to_string(),
            "deploy-test".into(),
        ],
    );
    let caps = system::from_meta(&meta, self_test)?;

    let terminate = CancellationToken::new();
    tokio::spawn({
        let terminate = terminate.clone();
        async move {
            if let Err(e) = wait_for_shutdown_signal().await {
                error!(error = %e, "signal handling failed");
                return;
            }
            terminate.cancel();
        }
    });

    let notifier = notifier_for(&meta, None);
    let mut cycle = DeploymentCycle::new(
        CycleSettings::from_meta(&meta),
        caps,
        store,
        Arc::new(SupervisorFactory::new(meta.clone())),
    )
    .with_notifier(notifier)
    .with_terminate(terminate);

    match cycle.run().await {
        Ok(report) => {
            let degraded = report.stages.iter().filter(|(_, s)| s.is_degraded()).count();
            info!(connected = report.connected, degraded, "deployment cycle complete");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!(error = %e, label = e.as_label(), "deployment cycle aborted");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn deploy_test(store: ConfigStore) -> anyhow::Result<ExitCode> {
    let cfg = store.load().context("loading active configuration")?;
    let mut registry = WorkerRegistry::new();
    register_builtins(&mut registry, Notifier::disabled(), store);

    // Same spec building as serving, so a section it would skip fails here.
    let mut failed = 0usize;
    for (name, result) in registry.deploy_test(&cfg).await {
        match result {
            Ok(()) => println!("{name}: ok"),
            Err(e) => {
                println!("{name}: FAILED ({e})");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        error!(failed, total = cfg.workers.len(), "deployment test failed");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn store_for(meta: &DeviceMeta) -> ConfigStore {
    ConfigStore::new(&meta.config_dir, &meta.config_prefix).with_vars(meta.template_vars())
}

/// Notification target: the configuration's `ntfy` settings, else the meta file's.
fn notifier_for(meta: &DeviceMeta, cfg: Option<&Configuration>) -> Notifier {
    let settings = cfg.and_then(|c| c.main.ntfy.as_ref());
    let url = settings.map(|s| s.url.clone()).or_else(|| meta.ntfy_url.clone());
    let topic = settings
        .and_then(|s| s.topic.clone())
        .unwrap_or_else(|| meta.topic().to_string());

    let Some(url) = url else {
        return Notifier::disabled();
    };
    match NtfySink::new(url) {
        Ok(sink) => Notifier::new(Arc::new(sink), topic),
        Err(e) => {
            warn!(error = %e, "notifications disabled");
            Notifier::disabled()
        }
    }
}

/// Builds a [`Supervisor`] with the built-in workers for a configuration.
struct SupervisorFactory {
    meta: DeviceMeta,
}

impl SupervisorFactory {
    fn new(meta: DeviceMeta) -> Self {
        Self { meta }
    }

    fn registry(&self, cfg: &Configuration) -> WorkerRegistry {
        let mut registry = WorkerRegistry::new();
        register_builtins(&mut registry, notifier_for(&self.meta, Some(cfg)), store_for(&self.meta));
        registry
    }

    fn supervisor(&self, cfg: &Configuration) -> Supervisor {
        let notifier = notifier_for(&self.meta, Some(cfg));
        let subscribers: Vec<Arc<dyn Subscribe>> = vec![
            Arc::new(LogWriter::new()),
            Arc::new(NotifyWriter::new(notifier)),
        ];
        Supervisor::new(
            SupervisorConfig::from_main(&cfg.main),
            self.registry(cfg).specs(cfg),
            subscribers,
        )
    }
}

impl WorkloadFactory for SupervisorFactory {
    fn build(&self, cfg: &Configuration) -> Box<dyn Workload> {
        Box::new(self.supervisor(cfg))
    }
}
