//! Reconciliation engine - merges the local scan, the remote catalog and the
//! binding table, and turns host triggers into sync operations
//!
//! The binding document is only mutated through the `&mut BindingDocument`
//! each trigger receives. Background pulls run concurrently, bounded by a
//! semaphore, and hand their outcomes back to be applied afterwards.

use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedMutexGuard, Semaphore};
use tracing::{debug, info, warn};

use crate::bindings::{BindingDocument, RepositoryBinding};
use crate::error::{SyncError, SyncResult};
use crate::github::RemoteCatalog;
use crate::naming::{LogicalName, RemoteRepoId};
use crate::notify::Notifier;
use crate::scanner::DirectoryScanner;
use crate::state::{EventType, Severity};
use crate::sync::{SyncOperation, SyncOutcome};

/// One async mutex per world name so operations on a directory never overlap
#[derive(Default)]
pub struct DirectoryGuards {
    locks: Mutex<HashMap<LogicalName, Arc<tokio::sync::Mutex<()>>>>,
}

impl DirectoryGuards {
    /// Wait for exclusive access to `name`
    pub async fn acquire(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(name.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// What a reconciliation pass did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// The binding document was modified and should be saved
    pub changed: bool,
    pub inserted: Vec<LogicalName>,
    pub pruned: Vec<LogicalName>,
    pub created: Vec<LogicalName>,
    pub pulled: Vec<LogicalName>,
    pub failed: Vec<LogicalName>,
}

pub struct ReconciliationEngine {
    scanner: DirectoryScanner,
    catalog: Arc<dyn RemoteCatalog>,
    operation: SyncOperation,
    notifier: Notifier,
    guards: DirectoryGuards,
    pass_lock: tokio::sync::Mutex<()>,
    max_parallel: usize,
}

impl ReconciliationEngine {
    pub fn new(
        scanner: DirectoryScanner,
        catalog: Arc<dyn RemoteCatalog>,
        operation: SyncOperation,
        notifier: Notifier,
        max_parallel: usize,
    ) -> Self {
        Self {
            scanner,
            catalog,
            operation,
            notifier,
            guards: DirectoryGuards::default(),
            pass_lock: tokio::sync::Mutex::new(()),
            max_parallel: max_parallel.max(1),
        }
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    // =========================================================================
    // Host triggers
    // =========================================================================

    /// Full reconciliation at host startup
    pub async fn on_startup(&self, doc: &mut BindingDocument) -> ReconcileReport {
        self.reconcile(doc).await
    }

    /// Pull every enabled world so the host shows the latest saves
    pub async fn on_browse_opened(&self, doc: &mut BindingDocument) -> ReconcileReport {
        let targets: Vec<(LogicalName, RemoteRepoId)> = doc
            .backed_up_worlds
            .iter()
            .filter(|(_, binding)| binding.enabled)
            .filter_map(|(name, binding)| binding.repo_id().map(|id| (name.clone(), id)))
            .collect();

        let mut report = ReconcileReport::default();
        self.pull_all(targets, doc, &mut report).await;
        report
    }

    /// Start syncing a world: bind, create its repository if needed, then push or pull
    ///
    /// An existing directory is pushed (local wins); a missing one is cloned.
    pub async fn on_enable(&self, doc: &mut BindingDocument, name: &str) -> bool {
        doc.no_backup_worlds.remove(name);
        let binding = doc.backed_up_worlds.entry(name.to_string()).or_default();
        binding.enabled = true;

        let Some(repo_id) = self.ensure_repository(doc, name).await else {
            return true;
        };

        let dir = self.scanner.world_dir(name);
        if tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            let result = self.push_world(name, &repo_id).await;
            self.report_outcome(name, &result);
        } else {
            let result = self.pull_world(name, &repo_id).await;
            self.apply_pull(doc, name, &result);
            self.report_outcome(name, &result);
        }
        true
    }

    /// Stop syncing a world and strip its backup metadata
    pub async fn on_disable(&self, doc: &mut BindingDocument, name: &str) -> bool {
        let changed = match doc.backed_up_worlds.get_mut(name) {
            Some(binding) if binding.enabled => {
                binding.enabled = false;
                true
            }
            _ => false,
        };

        let result = self.unbind_world(name).await;
        self.report_outcome(name, &result);
        changed
    }

    /// Push the world the host just closed
    pub async fn on_shutdown(&self, doc: &mut BindingDocument, name: &str) -> bool {
        let enabled = doc
            .backed_up_worlds
            .get(name)
            .map(|binding| binding.enabled)
            .unwrap_or(false);
        if !enabled {
            debug!("{} is not enabled for backup, skipping push", name);
            return false;
        }

        let had_repo = doc.backed_up_worlds.get(name).and_then(|b| b.repo_id()).is_some();
        let Some(repo_id) = self.ensure_repository(doc, name).await else {
            return false;
        };

        let result = self.push_world(name, &repo_id).await;
        self.report_outcome(name, &result);
        !had_repo
    }

    /// The host deleted a world: unbind it and keep it from reappearing
    pub async fn on_delete(&self, doc: &mut BindingDocument, name: &str) -> bool {
        if tokio::fs::try_exists(self.scanner.world_dir(name))
            .await
            .unwrap_or(false)
        {
            let result = self.unbind_world(name).await;
            if let Err(e) = &result {
                warn!("Cleanup of deleted world {} failed: {}", name, e);
            }
        }

        let removed = doc.backed_up_worlds.remove(name);
        let had_repo = removed.as_ref().and_then(|b| b.repo_id()).is_some();

        let changed = if had_repo {
            info!("Excluding deleted world {} from backup listing", name);
            doc.no_backup_worlds.insert(name.to_string());
            true
        } else {
            doc.no_backup_worlds.remove(name) || removed.is_some()
        };

        if changed {
            self.notifier.world_event(
                EventType::Unbound,
                name,
                format!("Stopped tracking deleted world {}", name),
            );
        }
        changed
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Recompute the binding table from the local scan and the remote catalog and
    /// apply the resulting creates and pulls
    pub async fn reconcile(&self, doc: &mut BindingDocument) -> ReconcileReport {
        let _pass = self.pass_lock.lock().await;
        let mut report = ReconcileReport::default();

        let local = match self.scanner.list_local_directories().await {
            Ok(names) => Some(names),
            Err(e) => {
                self.notifier.general(
                    Severity::Error,
                    format!("Could not read saves directory {}: {}", self.scanner.root().display(), e),
                );
                None
            }
        };

        let remote = match self.catalog.list_tracked_repositories().await {
            Ok(repos) => Some(repos),
            Err(e) => {
                self.notifier.general(
                    Severity::Warning,
                    format!("Could not list GitHub backups: {}", e.user_message("backup listing")),
                );
                None
            }
        };

        let remote = remote.map(|repos| self.key_remote_by_binding(doc, repos));

        if let (Some(local), Some(remote)) = (&local, &remote) {
            self.prune(doc, local, remote, &mut report);
        }

        if let Some(remote) = &remote {
            self.insert_remote_only(doc, remote, &mut report);
        }

        let enabled: Vec<LogicalName> = doc
            .backed_up_worlds
            .iter()
            .filter(|(_, binding)| binding.enabled)
            .map(|(name, _)| name.clone())
            .collect();

        let mut pulls = Vec::new();
        for name in enabled {
            let was_bound = doc
                .backed_up_worlds
                .get(&name)
                .map(|binding| binding.is_bound())
                .unwrap_or(false);

            let Some(repo_id) = self.ensure_repository(doc, &name).await else {
                report.failed.push(name);
                continue;
            };
            if !was_bound {
                report.created.push(name.clone());
                report.changed = true;
            }

            // Without a local scan there is no way to tell which worlds are missing
            if let Some(local) = &local {
                if !local.contains(&name) {
                    pulls.push((name, repo_id));
                }
            }
        }

        self.pull_all(pulls, doc, &mut report).await;

        self.notifier.general(
            Severity::Info,
            format!(
                "Reconciled {} worlds: {} new, {} pruned, {} restored",
                doc.backed_up_worlds.len(),
                report.inserted.len(),
                report.pruned.len(),
                report.pulled.len()
            ),
        );
        report
    }

    /// Re-key catalog entries that already belong to a binding under that binding's name
    fn key_remote_by_binding(
        &self,
        doc: &BindingDocument,
        repos: BTreeMap<LogicalName, RemoteRepoId>,
    ) -> BTreeMap<LogicalName, RemoteRepoId> {
        let by_repo: HashMap<String, &LogicalName> = doc
            .backed_up_worlds
            .iter()
            .filter(|(_, binding)| !binding.repo_full_name.is_empty())
            .map(|(name, binding)| (binding.repo_full_name.clone(), name))
            .collect();

        repos
            .into_iter()
            .map(|(name, id)| match by_repo.get(&id.full_name()) {
                Some(bound) => ((*bound).clone(), id),
                None => (name, id),
            })
            .collect()
    }

    fn prune(
        &self,
        doc: &mut BindingDocument,
        local: &BTreeSet<LogicalName>,
        remote: &BTreeMap<LogicalName, RemoteRepoId>,
        report: &mut ReconcileReport,
    ) {
        let known = |name: &LogicalName| local.contains(name) || remote.contains_key(name);

        let stale: Vec<LogicalName> = doc
            .backed_up_worlds
            .keys()
            .filter(|name| !known(name))
            .cloned()
            .collect();
        for name in stale {
            debug!("Pruning binding for vanished world {}", name);
            doc.backed_up_worlds.remove(&name);
            report.pruned.push(name);
            report.changed = true;
        }

        let before = doc.no_backup_worlds.len();
        doc.no_backup_worlds.retain(|name| known(name));
        report.changed |= doc.no_backup_worlds.len() != before;
    }

    fn insert_remote_only(
        &self,
        doc: &mut BindingDocument,
        remote: &BTreeMap<LogicalName, RemoteRepoId>,
        report: &mut ReconcileReport,
    ) {
        for (name, repo_id) in remote {
            if doc.no_backup_worlds.contains(name) {
                continue;
            }
            match doc.backed_up_worlds.get_mut(name) {
                None => {
                    debug!("Listing remote world {} (disabled)", name);
                    doc.backed_up_worlds.insert(
                        name.clone(),
                        RepositoryBinding::new(repo_id.full_name(), false),
                    );
                    report.inserted.push(name.clone());
                    report.changed = true;
                }
                Some(binding) if binding.repo_id().is_none() => {
                    binding.repo_full_name = repo_id.full_name();
                    report.changed = true;
                }
                Some(_) => {}
            }
        }
    }

    /// Resolve the binding's repository, creating it when the binding has none
    async fn ensure_repository(&self, doc: &mut BindingDocument, name: &str) -> Option<RemoteRepoId> {
        if let Some(id) = doc.backed_up_worlds.get(name).and_then(|b| b.repo_id()) {
            return Some(id);
        }

        match self.catalog.create_if_absent(name).await {
            Ok(id) => {
                if let Some(binding) = doc.backed_up_worlds.get_mut(name) {
                    binding.repo_full_name = id.full_name();
                }
                self.notifier.world_event(
                    EventType::RepoCreated,
                    name,
                    format!("Backup repository {} ready for {}", id, name),
                );
                Some(id)
            }
            Err(e) => {
                self.report_error(name, &e);
                None
            }
        }
    }

    /// Pull many worlds concurrently and apply the outcomes to `doc`
    async fn pull_all(
        &self,
        targets: Vec<(LogicalName, RemoteRepoId)>,
        doc: &mut BindingDocument,
        report: &mut ReconcileReport,
    ) {
        if targets.is_empty() {
            return;
        }

        info!(
            "Pulling {} worlds with concurrency {}",
            targets.len(),
            self.max_parallel
        );

        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut futures = FuturesUnordered::new();

        for (name, repo_id) in targets {
            let semaphore = semaphore.clone();
            futures.push(async move {
                let result = match semaphore.acquire().await {
                    Ok(_permit) => self.pull_world(&name, &repo_id).await,
                    Err(_) => Err(SyncError::Config("pull scheduler closed".to_string())),
                };
                (name, result)
            });
        }

        while let Some((name, result)) = futures.next().await {
            if self.apply_pull(doc, &name, &result) {
                report.changed = true;
            }
            match &result {
                Ok(_) => report.pulled.push(name.clone()),
                Err(_) => report.failed.push(name.clone()),
            }
            self.report_outcome(&name, &result);
        }
    }

    /// Persist a repository id learned from a clone; true when `doc` changed
    fn apply_pull(
        &self,
        doc: &mut BindingDocument,
        name: &str,
        result: &SyncResult<SyncOutcome>,
    ) -> bool {
        if let Ok(SyncOutcome::ClonedAfterCreate { repo_id }) = result {
            if let Some(binding) = doc.backed_up_worlds.get_mut(name) {
                binding.repo_full_name = repo_id.full_name();
                return true;
            }
        }
        false
    }

    // =========================================================================
    // Single-directory operations
    // =========================================================================

    /// Push one world while holding its directory guard
    pub async fn push_world(&self, name: &str, repo_id: &RemoteRepoId) -> SyncResult<SyncOutcome> {
        let _guard = self.guards.acquire(name).await;
        self.operation
            .bind_and_push(&self.scanner.world_dir(name), repo_id)
            .await
    }

    /// Pull one world while holding its directory guard
    pub async fn pull_world(&self, name: &str, repo_id: &RemoteRepoId) -> SyncResult<SyncOutcome> {
        let _guard = self.guards.acquire(name).await;
        self.operation
            .bind_and_pull(name, &self.scanner.world_dir(name), repo_id)
            .await
    }

    /// Unbind one world while holding its directory guard
    pub async fn unbind_world(&self, name: &str) -> SyncResult<SyncOutcome> {
        let _guard = self.guards.acquire(name).await;
        self.operation.unbind(&self.scanner.world_dir(name)).await
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    fn report_outcome(&self, name: &str, result: &SyncResult<SyncOutcome>) {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => return self.report_error(name, e),
        };

        match outcome {
            SyncOutcome::Pushed { renamed_to } => {
                self.notifier.world_event(
                    EventType::Pushed,
                    name,
                    format!("Backed up {} to GitHub", name),
                );
                if let Some(new_name) = renamed_to {
                    self.notifier.world_event(
                        EventType::Renamed,
                        name,
                        format!("Renamed {} to {}", name, new_name),
                    );
                }
            }
            SyncOutcome::NothingToBackup => self.notifier.world_event(
                EventType::NothingToBackup,
                name,
                format!("No changes to back up for {}", name),
            ),
            SyncOutcome::Pulled { renamed_to } => {
                self.notifier.world_event(
                    EventType::Pulled,
                    name,
                    format!("Restored latest backup of {}", name),
                );
                if let Some(new_name) = renamed_to {
                    self.notifier.world_event(
                        EventType::Renamed,
                        name,
                        format!("Renamed {} to {}", name, new_name),
                    );
                }
            }
            SyncOutcome::NothingToPull => self.notifier.world_event(
                EventType::NothingToPull,
                name,
                format!("Nothing to restore for {} yet", name),
            ),
            SyncOutcome::Cloned => self.notifier.world_event(
                EventType::Cloned,
                name,
                format!("Downloaded {} from GitHub", name),
            ),
            SyncOutcome::ClonedAfterCreate { repo_id } => {
                self.notifier.world_event(
                    EventType::RepoCreated,
                    name,
                    format!("Backup repository {} was missing and has been recreated", repo_id),
                );
                self.notifier.world_event(
                    EventType::Cloned,
                    name,
                    format!("Downloaded {} from GitHub", name),
                );
            }
            SyncOutcome::Unbound { leftovers } if leftovers.is_empty() => {
                self.notifier.world_event(
                    EventType::Unbound,
                    name,
                    format!("Stopped syncing {}", name),
                )
            }
            SyncOutcome::Unbound { leftovers } => self.notifier.world_event(
                EventType::Unbound,
                name,
                format!(
                    "Stopped syncing {}; {} metadata entries could not be removed yet",
                    name,
                    leftovers.len()
                ),
            ),
        }
    }

    fn report_error(&self, name: &str, err: &SyncError) {
        let event_type = match err {
            SyncError::EmptyContent(_) => EventType::SkippedEmpty,
            SyncError::LocalConflict(_) => EventType::SkippedLocalConflict,
            _ => EventType::SyncError,
        };
        debug!("{} failed with {}: {}", name, err.kind(), err);
        self.notifier
            .world_failure(event_type, name, err.user_message(name), err.to_string());
    }
}
