//! Replay a snapshot onto the live desktop
//!
//! 1. Bind entries to already-running windows (each window at most once).
//! 2. Restore entries concurrently, bounded by `max_parallelism`: reuse or launch.
//! 3. Place windows one at a time, back-to-front, so the originally topmost
//!    window is raised last. Placement retries with a linear backoff since
//!    freshly launched windows often refuse the first move.
//!
//! One application failing never stops the others; failures are counted
//! and reported with the application's identity.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::clear::{ClearCounts, ClearMode};
use crate::config::Config;
use crate::desktop::Desktop;
use crate::environment::EnvironmentRestore;
use crate::error::{KeeperError, Result};
use crate::handlers::{
    HandlerRegistry, RestoreAction, RestoreContext, RestoreResult, RestoreScope, WaitPolicy,
};
use crate::inventory;
use crate::model::{
    AppType, ApplicationEntry, ContextSnapshot, ContextSummary, WindowHandle, WindowRecord,
    WindowState,
};
use crate::outcome::{Outcome, OutcomeStatus, Warning, WarningKind};
use crate::process::{ProcessSource, ProcessTable};
use crate::snapshot::run_blocking;

/// Polls for a launched window per placement attempt
const WAIT_POLLS_PER_ATTEMPT: u32 = 5;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreOptions {
    pub scope: RestoreScope,
    /// Minimize or close current windows before replaying
    pub clear_existing: Option<ClearMode>,
    /// Keep the current desktop under this name first
    pub save_current: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AppOutcome {
    Restored,
    Skipped,
    Failed,
}

/// What happened to one entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppReport {
    pub application: String,
    pub app_type: AppType,
    pub outcome: AppOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<RestoreAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSummary {
    pub context_name: String,
    pub restored: usize,
    pub skipped: usize,
    pub failed: usize,
    /// One per failed application: identity plus abbreviated cause
    pub errors: Vec<Warning>,
    pub reports: Vec<AppReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<EnvironmentRestore>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleared: Option<ClearCounts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_current: Option<ContextSummary>,
}

impl RestoreSummary {
    /// Failure only when nothing came back and something broke
    pub fn into_outcome(self, warnings: Vec<Warning>) -> Outcome<RestoreSummary> {
        let status = if self.restored == 0 && self.failed > 0 {
            OutcomeStatus::Failure
        } else if warnings.is_empty() && self.failed == 0 {
            OutcomeStatus::Success
        } else {
            OutcomeStatus::Partial
        };
        Outcome::with_status(self, warnings, status)
    }
}

/// Entry-level replay, independent of locking and persistence
pub struct RestoreOrchestrator {
    config: Config,
    desktop: Arc<dyn Desktop>,
    processes: Arc<dyn ProcessSource>,
    registry: Arc<HandlerRegistry>,
}

impl RestoreOrchestrator {
    pub fn new(
        config: Config,
        desktop: Arc<dyn Desktop>,
        processes: Arc<dyn ProcessSource>,
        registry: Arc<HandlerRegistry>,
    ) -> Self {
        Self {
            config,
            desktop,
            processes,
            registry,
        }
    }

    fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy {
            attempts: self.config.restore_attempts.max(1) * WAIT_POLLS_PER_ATTEMPT,
            interval: self.config.restore_backoff,
        }
    }

    /// Replay `snapshot`, returning counts, per-app reports and warnings
    pub async fn replay(
        &self,
        snapshot: &ContextSnapshot,
        scope: RestoreScope,
        cancel: &CancellationToken,
    ) -> (RestoreSummary, Vec<Warning>) {
        let mut summary = RestoreSummary {
            context_name: snapshot.context_name.clone(),
            ..Default::default()
        };
        let mut warnings = Vec::new();

        // Front-to-back
        let entries: Vec<ApplicationEntry> = snapshot
            .entries_in_z_order()
            .into_iter()
            .filter(|e| scope != RestoreScope::TabsOnly || e.app_type() == AppType::Browser)
            .cloned()
            .collect();
        log::info!(
            "Restoring {} ({} entr{}, scope {:?})",
            snapshot.context_name,
            entries.len(),
            if entries.len() == 1 { "y" } else { "ies" },
            scope
        );

        let desktop = self.desktop.clone();
        let live = run_blocking("window enumeration", self.config.capture_timeout, move || {
            inventory::enumerate(&*desktop)
        })
        .await
        .unwrap_or_else(|e| {
            log::warn!("Cannot list live windows, launching everything: {}", e);
            warnings.push(Warning::from_error("inventory", &e));
            Vec::new()
        });
        let processes = self.processes.clone();
        let table = run_blocking("process snapshot", self.config.capture_timeout, move || {
            Ok(processes.snapshot())
        })
        .await
        .unwrap_or_else(|_| ProcessTable::new());

        let existing = self.claim_existing(&entries, &live, &table);
        let results = self.restore_entries(&entries, existing, &live, scope, cancel).await;

        if scope != RestoreScope::TabsOnly {
            self.place_windows(&entries, &results, cancel, &mut warnings).await;
        }

        for (entry, result) in entries.iter().zip(results) {
            let application = entry.label();
            let app_type = entry.app_type();
            let report = match result {
                Ok(RestoreResult {
                    action: RestoreAction::Skipped(reason),
                    ..
                }) => {
                    summary.skipped += 1;
                    AppReport {
                        application,
                        app_type,
                        outcome: AppOutcome::Skipped,
                        action: None,
                        message: Some(reason),
                    }
                }
                Ok(result) => {
                    summary.restored += 1;
                    warnings.extend(result.warnings);
                    AppReport {
                        application,
                        app_type,
                        outcome: AppOutcome::Restored,
                        action: Some(result.action),
                        message: None,
                    }
                }
                Err(e) => {
                    summary.failed += 1;
                    let error = Warning::from_error(application.clone(), &e);
                    log::warn!("Restore failed for {}: {}", application, e);
                    let message = Some(error.message.clone());
                    summary.errors.push(error);
                    AppReport {
                        application,
                        app_type,
                        outcome: AppOutcome::Failed,
                        action: None,
                        message,
                    }
                }
            };
            summary.reports.push(report);
        }

        log::info!(
            "Restored {}: {} restored, {} skipped, {} failed",
            snapshot.context_name,
            summary.restored,
            summary.skipped,
            summary.failed
        );
        (summary, warnings)
    }

    /// Bind entries to live windows, frontmost entry first
    fn claim_existing(
        &self,
        entries: &[ApplicationEntry],
        live: &[WindowRecord],
        table: &ProcessTable,
    ) -> HashMap<usize, WindowHandle> {
        let mut taken = HashSet::new();
        let mut existing = HashMap::new();
        for (i, entry) in entries.iter().enumerate() {
            let handler = self.registry.get(entry.app_type());
            let found = live.iter().find(|w| {
                !taken.contains(&w.handle)
                    && handler.matches(entry, w, table.info_with_children(w.pid).as_ref())
            });
            if let Some(window) = found {
                log::debug!("{} is already open as {:#x}", entry.label(), window.handle.0);
                taken.insert(window.handle);
                existing.insert(i, window.handle);
            }
        }
        existing
    }

    async fn restore_entries(
        &self,
        entries: &[ApplicationEntry],
        existing: HashMap<usize, WindowHandle>,
        live: &[WindowRecord],
        scope: RestoreScope,
        cancel: &CancellationToken,
    ) -> Vec<Result<RestoreResult>> {
        let known: Arc<HashSet<WindowHandle>> = Arc::new(live.iter().map(|w| w.handle).collect());
        let claimed = Arc::new(Mutex::new(existing.values().copied().collect::<HashSet<_>>()));
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallelism.max(1)));
        let wait = self.wait_policy();
        let timeout = self.config.capture_timeout + wait.interval * wait.attempts;

        let mut tasks = JoinSet::new();
        for (i, entry) in entries.iter().enumerate() {
            let handler = self.registry.get(entry.app_type());
            let ctx = RestoreContext {
                desktop: self.desktop.clone(),
                processes: self.processes.clone(),
                scope,
                existing: existing.get(&i).copied(),
                known: known.clone(),
                claimed: claimed.clone(),
                wait,
            };
            let entry = entry.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (i, Ok(RestoreResult::skipped("cancelled")));
                };
                if cancel.is_cancelled() {
                    return (i, Ok(RestoreResult::skipped("cancelled")));
                }
                let what = format!("restore of {}", entry.label());
                let result = run_blocking(&what, timeout, move || handler.restore(&entry, &ctx)).await;
                (i, result)
            });
        }

        let mut results: Vec<Option<Result<RestoreResult>>> = entries.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((i, result)) => results[i] = Some(result),
                Err(e) => log::error!("Restore task failed: {}", e),
            }
        }
        results
            .into_iter()
            .map(|r| {
                r.unwrap_or_else(|| {
                    Err(KeeperError::Unavailable(
                        "restore task did not finish".to_string(),
                    ))
                })
            })
            .collect()
    }

    /// Sequential placement, back-to-front
    ///
    /// Stops once `cancel` fires; the placement in flight is allowed to return.
    async fn place_windows(
        &self,
        entries: &[ApplicationEntry],
        results: &[Result<RestoreResult>],
        cancel: &CancellationToken,
        warnings: &mut Vec<Warning>,
    ) {
        let attempts = self.config.restore_attempts.max(1);
        let mut not_placed = 0;
        for (entry, result) in entries.iter().zip(results).rev() {
            let Ok(RestoreResult {
                window: Some(handle),
                ..
            }) = result
            else {
                continue;
            };
            if cancel.is_cancelled() {
                not_placed += 1;
                continue;
            }
            let layout = entry.app().window.clone();
            let handle = *handle;

            let mut attempt = 0;
            let placed = loop {
                let desktop = self.desktop.clone();
                let target = layout.clone();
                let result = run_blocking("window placement", self.config.capture_timeout, move || {
                    desktop.apply_layout(handle, &target)
                })
                .await;
                attempt += 1;
                if result.is_err() && cancel.is_cancelled() {
                    break Err(KeeperError::Cancelled);
                }
                if result.is_ok() || attempt >= attempts {
                    break result;
                }
                log::debug!("Placement of {} failed (attempt {}), retrying", entry.label(), attempt);
                tokio::select! {
                    _ = tokio::time::sleep(self.config.restore_backoff * attempt) => {}
                    _ = cancel.cancelled() => {}
                }
                if cancel.is_cancelled() {
                    break Err(KeeperError::Cancelled);
                }
            };

            match placed {
                Err(KeeperError::Cancelled) => not_placed += 1,
                Ok(()) if layout.state != WindowState::Minimized => {
                    if let Err(e) = self.desktop.bring_to_front(handle) {
                        log::debug!("Could not raise {}: {}", entry.label(), e);
                    }
                }
                Ok(()) => {}
                Err(e) => {
                    log::warn!(
                        "Could not place {} after {} attempt(s): {}",
                        entry.label(),
                        attempts,
                        e
                    );
                    warnings.push(Warning::new(
                        entry.label(),
                        WarningKind::Failed,
                        format!("layout not applied: {}", e),
                    ));
                }
            }
        }
        if not_placed > 0 {
            log::warn!("Placement cancelled; {} window(s) left where they are", not_placed);
            warnings.push(Warning::new(
                "placement",
                WarningKind::Cancelled,
                format!("cancelled; {} window(s) not placed", not_placed),
            ));
        }
    }
}
