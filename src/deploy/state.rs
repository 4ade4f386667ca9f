//! # Deployment stages.

use std::fmt;

/// Stages of the deployment cycle, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeploymentState {
    AwaitingNetwork,
    SyncingBundle,
    RunningCommandFile,
    SyncingNetworkConfig,
    UpgradingSoftware,
    ResolvingConfig,
    SelfTesting,
    Serving,
    Terminating,
    Rebooting,
}

impl DeploymentState {
    /// Every stage, in order.
    pub const ALL: [DeploymentState; 10] = [
        DeploymentState::AwaitingNetwork,
        DeploymentState::SyncingBundle,
        DeploymentState::RunningCommandFile,
        DeploymentState::SyncingNetworkConfig,
        DeploymentState::UpgradingSoftware,
        DeploymentState::ResolvingConfig,
        DeploymentState::SelfTesting,
        DeploymentState::Serving,
        DeploymentState::Terminating,
        DeploymentState::Rebooting,
    ];

    /// The stage after this one; `None` for the terminal stage.
    pub fn next(self) -> Option<DeploymentState> {
        let idx = Self::ALL.iter().position(|s| *s == self)?;
        Self::ALL.get(idx + 1).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeploymentState::AwaitingNetwork => "awaiting-network",
            DeploymentState::SyncingBundle => "syncing-bundle",
            DeploymentState::RunningCommandFile => "running-command-file",
            DeploymentState::SyncingNetworkConfig => "syncing-network-config",
            DeploymentState::UpgradingSoftware => "upgrading-software",
            DeploymentState::ResolvingConfig => "resolving-config",
            DeploymentState::SelfTesting => "self-testing",
            DeploymentState::Serving => "serving",
            DeploymentState::Terminating => "terminating",
            DeploymentState::Rebooting => "rebooting",
        }
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a stage resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageStatus {
    /// The stage did its work.
    Done,
    /// Nothing to do (no bundle, no connectivity, identical file, ...).
    Skipped,
    /// The stage failed; its failure policy let the cycle continue.
    Degraded(String),
}

impl StageStatus {
    pub fn is_degraded(&self) -> bool {
        matches!(self, StageStatus::Degraded(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stages_are_ordered_and_chained() {
        let mut stage = DeploymentState::AwaitingNetwork;
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            assert!(next > stage);
            seen.push(next);
            stage = next;
        }
        assert_eq!(seen, DeploymentState::ALL.to_vec());
        assert_eq!(DeploymentState::Rebooting.next(), None);
    }

    #[test]
    fn test_display_is_kebab_case() {
        assert_eq!(DeploymentState::SyncingNetworkConfig.to_string(), "syncing-network-config");
    }
}
