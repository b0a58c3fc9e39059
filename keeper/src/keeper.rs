//! Operation facade: the entry point the CLI drives
//!
//! Every operation on a named context sanitizes the name first and holds
//! that context's lock for its whole duration, so a concurrent keep or
//! restore of the same name fails fast with `Busy`.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::browser_tabs::BrowserTabExtractor;
use crate::clear::{self, ClearCounts, ClearMode};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::desktop::{self, Desktop};
use crate::environment::{
    EnvSnapshotFile, EnvTarget, EnvironmentManager, EnvironmentRestore, ProcessEnvironment,
};
use crate::error::{KeeperError, Result};
use crate::handlers::{HandlerRegistry, RestoreScope};
use crate::model::{sanitize_context_name, ContextSummary};
use crate::outcome::{Outcome, Warning, WarningKind};
use crate::process::{self, ProcessSource};
use crate::recent::RecentIndex;
use crate::restore::{RestoreOptions, RestoreOrchestrator, RestoreSummary};
use crate::snapshot::{run_blocking, Confirm, KeepOptions, SnapshotBuilder};
use crate::store::ContextStore;
use crate::system;
use crate::whitelist::Whitelist;

/// The seams a keeper is assembled from
pub struct KeeperParts {
    pub desktop: Arc<dyn Desktop>,
    pub processes: Arc<dyn ProcessSource>,
    pub registry: Arc<HandlerRegistry>,
    pub clock: Arc<dyn Clock>,
    pub env: Arc<dyn EnvTarget>,
}

impl KeeperParts {
    /// Backends for the machine this process runs on
    pub fn native(config: &Config) -> Self {
        Self {
            desktop: desktop::native(),
            processes: process::native(),
            registry: Arc::new(HandlerRegistry::new(Arc::new(
                BrowserTabExtractor::from_config(config),
            ))),
            clock: Arc::new(SystemClock),
            env: Arc::new(ProcessEnvironment),
        }
    }
}

pub struct ContextKeeper {
    config: Config,
    store: ContextStore,
    environment: EnvironmentManager,
    whitelist: Whitelist,
    recent: RecentIndex,
    desktop: Arc<dyn Desktop>,
    builder: SnapshotBuilder,
    orchestrator: RestoreOrchestrator,
}

impl ContextKeeper {
    pub fn new(config: Config) -> Self {
        let parts = KeeperParts::native(&config);
        Self::with_parts(config, parts)
    }

    pub fn with_parts(config: Config, parts: KeeperParts) -> Self {
        let store = ContextStore::new(&config);
        let environment = EnvironmentManager::new(store.clone(), parts.clock.clone(), parts.env);
        let builder = SnapshotBuilder::new(
            config.clone(),
            parts.desktop.clone(),
            parts.processes.clone(),
            parts.registry.clone(),
            environment.clone(),
            store.clone(),
            parts.clock,
        );
        let orchestrator = RestoreOrchestrator::new(
            config.clone(),
            parts.desktop.clone(),
            parts.processes,
            parts.registry,
        );

        Self {
            whitelist: Whitelist::new(config.whitelist_file()),
            recent: RecentIndex::new(config.recent_index_file()),
            desktop: parts.desktop,
            config,
            store,
            environment,
            builder,
            orchestrator,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &ContextStore {
        &self.store
    }

    pub fn whitelist(&self) -> &Whitelist {
        &self.whitelist
    }

    fn sweep_temps(&self) {
        let (deleted, scanned, hit_limit) = self.store.cleanup_stale_temps();
        if deleted > 0 || hit_limit {
            log::info!(
                "Removed {} stale temp file(s) ({} scanned{})",
                deleted,
                scanned,
                if hit_limit { ", scan limit reached" } else { "" }
            );
        }
    }

    /// Capture the current desktop under `name`, replacing any earlier snapshot
    pub async fn keep(
        &self,
        name: &str,
        options: KeepOptions,
        confirm: &dyn Confirm,
        cancel: &CancellationToken,
    ) -> Result<Outcome<ContextSummary>> {
        let name = sanitize_context_name(name)?;
        let _lock = self.store.acquire_lock(&name)?;
        self.sweep_temps();

        let outcome = self.builder.build(&name, options, confirm, cancel).await?;
        self.builder.persist(&outcome.value)?;
        if let Err(e) = self.recent.touch(&name) {
            log::warn!("Could not update recent contexts: {}", e);
        }
        Ok(outcome.map(|snapshot| snapshot.to_summary()))
    }

    /// Bring back the context saved under `name`
    pub async fn restore(
        &self,
        name: &str,
        options: &RestoreOptions,
        confirm: &dyn Confirm,
        cancel: &CancellationToken,
    ) -> Result<Outcome<RestoreSummary>> {
        let name = sanitize_context_name(name)?;
        let _lock = self.store.acquire_lock(&name)?;

        let backup = match options.save_current.as_deref() {
            Some(backup) => {
                let backup = sanitize_context_name(backup)?;
                if backup == name {
                    return Err(KeeperError::InvalidName(format!(
                        "cannot save the current desktop as '{}' while restoring it",
                        name
                    )));
                }
                Some(backup)
            }
            None => None,
        };

        // Nothing is written until the snapshot is known to exist
        let snapshot = self.store.read_snapshot(&name)?;
        if cancel.is_cancelled() {
            return Err(KeeperError::Cancelled);
        }

        let saved_current = match backup {
            Some(backup) => {
                let kept = self
                    .keep(&backup, KeepOptions::default(), confirm, cancel)
                    .await?;
                log::info!("Saved current desktop as {} before restoring {}", backup, name);
                Some(kept.value)
            }
            None => None,
        };
        let mut warnings: Vec<Warning> = Vec::new();

        let cleared = match options.clear_existing {
            Some(mode) => {
                if !confirm.confirm_clear(mode) {
                    return Err(KeeperError::Declined(format!(
                        "clearing the desktop ({:?})",
                        mode
                    )));
                }
                let desktop = self.desktop.clone();
                let matcher = self.whitelist.matcher()?;
                let cleared = run_blocking("desktop clear", self.config.capture_timeout, move || {
                    clear::clear_desktop(&*desktop, &matcher, mode, false)
                })
                .await;
                match cleared {
                    Ok(counts) => Some(counts),
                    Err(e) => {
                        warnings.push(Warning::from_error("clear", &e));
                        None
                    }
                }
            }
            None => None,
        };

        let (mut summary, replay_warnings) = self
            .orchestrator
            .replay(&snapshot, options.scope, cancel)
            .await;
        warnings.extend(replay_warnings);
        summary.cleared = cleared;
        summary.saved_current = saved_current;

        if options.scope == RestoreScope::Full && cancel.is_cancelled() {
            log::warn!("Restore of {} cancelled; environment and system state left as is", name);
            warnings.push(Warning::new(
                "restore",
                WarningKind::Cancelled,
                "cancelled; environment and system state not restored",
            ));
        } else if options.scope == RestoreScope::Full {
            let manager = self.environment.clone();
            let env_name = name.clone();
            let restored = run_blocking("environment restore", self.config.capture_timeout, move || {
                manager.restore(&env_name)
            })
            .await;
            match restored {
                Ok(restore) => summary.environment = Some(restore),
                Err(KeeperError::NotFound(_)) => {
                    log::debug!("{} has no environment snapshot", name);
                }
                Err(e) => warnings.push(Warning::from_error("environment", &e)),
            }

            let desktop = self.desktop.clone();
            let store = self.store.clone();
            let system_name = name.clone();
            let state = snapshot.windows.system.clone();
            let system_warnings = run_blocking("system restore", self.config.capture_timeout, move || {
                Ok(system::restore(&*desktop, &store, &system_name, &state))
            })
            .await;
            match system_warnings {
                Ok(system_warnings) => warnings.extend(system_warnings),
                Err(e) => warnings.push(Warning::from_error("system", &e)),
            }
        }

        Ok(summary.into_outcome(warnings))
    }

    pub fn list(&self) -> Result<Vec<ContextSummary>> {
        self.store.list()
    }

    /// Returns false when there was nothing to delete
    pub fn delete(&self, name: &str) -> Result<bool> {
        let name = sanitize_context_name(name)?;
        let _lock = self.store.acquire_lock(&name)?;
        let deleted = self.store.delete(&name)?;
        if let Err(e) = self.recent.remove(&name) {
            log::warn!("Could not update recent contexts: {}", e);
        }
        Ok(deleted)
    }

    pub fn delete_all(&self) -> Result<usize> {
        let deleted = self.store.delete_all()?;
        if let Err(e) = self.recent.clear() {
            log::warn!("Could not clear recent contexts: {}", e);
        }
        Ok(deleted)
    }

    /// Recently kept names, newest first
    pub fn recent(&self) -> Vec<String> {
        self.recent.list()
    }

    pub fn clear_desktop(&self, mode: ClearMode, force: bool) -> Result<ClearCounts> {
        let matcher = self.whitelist.matcher()?;
        clear::clear_desktop(&*self.desktop, &matcher, mode, force)
    }

    pub fn keep_environment(&self, name: &str) -> Result<EnvSnapshotFile> {
        let name = sanitize_context_name(name)?;
        let _lock = self.store.acquire_lock(&name)?;
        let (file, _) = self.environment.keep(&name)?;
        Ok(file)
    }

    pub fn restore_environment(&self, name: &str) -> Result<EnvironmentRestore> {
        let name = sanitize_context_name(name)?;
        let _lock = self.store.acquire_lock(&name)?;
        self.environment.restore(&name)
    }

    pub fn list_environment(&self, name: &str) -> Result<Vec<EnvSnapshotFile>> {
        self.environment.list(&sanitize_context_name(name)?)
    }

    pub fn cleanup_environment(&self, name: &str, keep_last: usize) -> Result<usize> {
        let name = sanitize_context_name(name)?;
        let _lock = self.store.acquire_lock(&name)?;
        self.environment.cleanup(&name, keep_last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WindowState;
    use crate::outcome::OutcomeStatus;
    use crate::snapshot::AlwaysProceed;
    use crate::test_utils::Harness;

    async fn keep(keeper: &ContextKeeper, name: &str) -> ContextSummary {
        keeper
            .keep(name, KeepOptions::default(), &AlwaysProceed, &CancellationToken::new())
            .await
            .unwrap()
            .value
    }

    #[tokio::test]
    async fn test_keep_lists_and_records_recent() {
        let harness = Harness::new();
        harness.add_window(1, "notepad.exe", "a.txt - Notepad");
        let keeper = harness.keeper();

        let summary = keep(&keeper, " demo ").await;
        assert_eq!(summary.name, "demo");
        assert_eq!(summary.applications, 1);

        let listed = keeper.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "demo");
        assert_eq!(keeper.recent(), vec!["demo".to_string()]);
    }

    #[tokio::test]
    async fn test_keep_while_locked_is_busy() {
        let harness = Harness::new();
        let keeper = harness.keeper();
        let _held = keeper.store().acquire_lock("demo").unwrap();

        let result = keeper
            .keep("demo", KeepOptions::default(), &AlwaysProceed, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(KeeperError::Busy(_))));
    }

    #[test]
    fn test_environment_operations_while_locked_are_busy() {
        let harness = Harness::new();
        let keeper = harness.keeper();
        keeper.keep_environment("demo").unwrap();
        let _held = keeper.store().acquire_lock("demo").unwrap();

        assert!(matches!(keeper.keep_environment("demo"), Err(KeeperError::Busy(_))));
        assert!(matches!(keeper.restore_environment("demo"), Err(KeeperError::Busy(_))));
        assert!(matches!(
            keeper.cleanup_environment("demo", 0),
            Err(KeeperError::Busy(_))
        ));
        assert_eq!(keeper.list_environment("demo").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_restore_unknown_context_is_not_found() {
        let harness = Harness::new();
        let result = harness
            .keeper()
            .restore(
                "nope",
                &RestoreOptions::default(),
                &AlwaysProceed,
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(KeeperError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_save_current_under_same_name_is_rejected() {
        let harness = Harness::new();
        let keeper = harness.keeper();
        keep(&keeper, "demo").await;

        let options = RestoreOptions {
            save_current: Some("demo".into()),
            ..Default::default()
        };
        let result = keeper
            .restore("demo", &options, &AlwaysProceed, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(KeeperError::InvalidName(_))));
    }

    #[tokio::test]
    async fn test_save_current_keeps_a_backup_first() {
        let harness = Harness::new();
        harness.add_window(1, "mystery.exe", "Mystery");
        let keeper = harness.keeper();
        keep(&keeper, "demo").await;

        let options = RestoreOptions {
            save_current: Some("backup".into()),
            ..Default::default()
        };
        let outcome = keeper
            .restore("demo", &options, &AlwaysProceed, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            outcome.value.saved_current.map(|s| s.name).as_deref(),
            Some("backup")
        );
        assert!(keeper.store().exists("backup"));
        assert_eq!(keeper.recent()[0], "backup");
    }

    #[tokio::test]
    async fn test_save_current_skipped_when_context_is_missing() {
        let harness = Harness::new();
        harness.add_window(1, "mystery.exe", "Mystery");
        let keeper = harness.keeper();

        let options = RestoreOptions {
            save_current: Some("backup".into()),
            ..Default::default()
        };
        let result = keeper
            .restore("missing", &options, &AlwaysProceed, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(KeeperError::NotFound(_))));
        assert!(!keeper.store().exists("backup"));
        assert!(keeper.recent().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_restore_leaves_environment_alone() {
        let mut harness = Harness::new();
        harness.config.restore_attempts = 20;
        harness.config.restore_backoff = std::time::Duration::from_millis(500);
        let handle = harness.add_window(1, "mystery.exe", "Mystery");
        let keeper = harness.keeper();
        keep(&keeper, "demo").await;

        harness.env.set("EXTRA", "1");
        harness.desktop.set_unplaceable(handle, 100);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let outcome = keeper
            .restore("demo", &RestoreOptions::default(), &AlwaysProceed, &cancel)
            .await
            .unwrap();
        assert!(outcome.value.environment.is_none());
        assert!(harness.env.vars().contains_key("EXTRA"));
        let cancelled: Vec<&str> = outcome
            .warnings
            .iter()
            .filter(|w| w.kind == WarningKind::Cancelled)
            .map(|w| w.source.as_str())
            .collect();
        assert_eq!(cancelled, vec!["placement", "restore"]);
        assert_eq!(outcome.status, OutcomeStatus::Partial);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent_and_updates_recent() {
        let harness = Harness::new();
        let keeper = harness.keeper();
        keep(&keeper, "demo").await;

        assert!(keeper.delete("demo").unwrap());
        assert!(!keeper.delete("demo").unwrap());
        assert!(keeper.list().unwrap().is_empty());
        assert!(keeper.recent().is_empty());
    }

    #[tokio::test]
    async fn test_full_restore_brings_back_environment_and_volume() {
        let harness = Harness::new();
        harness.add_window(1, "mystery.exe", "Mystery");
        harness.desktop.set_volume_level(Some(35));
        let keeper = harness.keeper();
        keep(&keeper, "demo").await;

        harness.env.set("EXTRA", "1");
        harness.desktop.set_volume_level(Some(80));

        let outcome = keeper
            .restore(
                "demo",
                &RestoreOptions::default(),
                &AlwaysProceed,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Success, "{:?}", outcome.warnings);
        let env = outcome.value.environment.unwrap();
        assert_eq!(env.removed, vec!["EXTRA".to_string()]);
        assert!(!harness.env.vars().contains_key("EXTRA"));
        assert_eq!(harness.desktop.volume().unwrap(), Some(35));
    }

    #[tokio::test]
    async fn test_restore_with_clear_minimizes_first() {
        let harness = Harness::new();
        harness.add_window(1, "mystery.exe", "Mystery");
        let keeper = harness.keeper();
        keep(&keeper, "demo").await;
        let other = harness.add_window(2, "other.exe", "Other");

        let options = RestoreOptions {
            scope: RestoreScope::LayoutOnly,
            clear_existing: Some(ClearMode::Minimize),
            ..Default::default()
        };
        let outcome = keeper
            .restore("demo", &options, &AlwaysProceed, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.value.cleared.map(|c| c.affected), Some(2));
        assert_eq!(outcome.value.restored, 1);
        assert_eq!(
            harness.desktop.window(other).map(|w| w.state),
            Some(WindowState::Minimized)
        );
    }

    #[tokio::test]
    async fn test_environment_operations_sanitize_names() {
        let harness = Harness::new();
        let keeper = harness.keeper();
        let file = keeper.keep_environment("my/ctx").unwrap();
        assert!(file.path.starts_with(keeper.store().context_dir("my_ctx")));
        assert_eq!(keeper.list_environment("my/ctx").unwrap().len(), 1);
        assert_eq!(keeper.cleanup_environment("my/ctx", 0).unwrap(), 1);
    }
}
