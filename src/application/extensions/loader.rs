//! Extension loader - tracks the live extensions and drives their lifecycle
//! through the session's [`ExtensionHost`]

use std::any::Any;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use super::{discovery, BulkOutcome};
use crate::application::errors::ExtensionError;
use crate::domain::traits::ExtensionHost;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Load,
    Unload,
    Reload,
}

impl Operation {
    fn verb(&self) -> &'static str {
        match self {
            Operation::Load => "load",
            Operation::Unload => "unload",
            Operation::Reload => "reload",
        }
    }
}

/// Owns the Loaded Set and performs load / unload / reload against the host.
///
/// No operation returns an error: every failure is logged and reported as
/// `false` (or as a `failed` entry of a [`BulkOutcome`]).
pub struct ExtensionLoader {
    lifecycle: Lifecycle,
    root: PathBuf,
    suffix: String,
    base_dir: PathBuf,
    timeout: Option<Duration>,
    /// Bulk operations hold it exclusively, single-item operations share it
    gate: RwLock<()>,
}

impl ExtensionLoader {
    pub fn new(host: Arc<dyn ExtensionHost>, root: impl Into<PathBuf>) -> Self {
        Self {
            lifecycle: Lifecycle {
                host,
                loaded: Arc::new(Mutex::new(Vec::new())),
            },
            root: root.into(),
            suffix: discovery::default_suffix().to_string(),
            base_dir: discovery::working_dir(),
            timeout: None,
            gate: RwLock::new(()),
        }
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    /// Directory identifiers are made relative to (the working directory by default)
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    /// Per-item limit. An operation exceeding it is reported as failed; the
    /// host call itself still runs to completion and the Loaded Set follows
    /// its real result.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Identifiers of every extension file currently under the root
    pub fn discover(&self) -> Vec<String> {
        discovery::discover(&self.root, &self.suffix)
            .iter()
            .map(|path| discovery::path_to_identifier(path, &self.base_dir))
            .collect()
    }

    pub async fn load(&self, identifier: &str) -> bool {
        let _gate = self.gate.read().await;
        self.settle(Operation::Load, identifier).await
    }

    pub async fn unload(&self, identifier: &str) -> bool {
        let _gate = self.gate.read().await;
        self.settle(Operation::Unload, identifier).await
    }

    /// Swap in a fresh build; an extension that is not loaded gets loaded instead
    pub async fn reload(&self, identifier: &str) -> bool {
        let _gate = self.gate.read().await;
        self.settle(Operation::Reload, identifier).await
    }

    /// Discover every extension file and load them all concurrently
    pub async fn load_all(&self) -> BulkOutcome {
        let _gate = self.gate.write().await;

        let identifiers = self.discover();
        info!("Found {} extension files", identifiers.len());

        let outcome = self.fan_out(Operation::Load, identifiers).await;
        info!(
            "Load finished: {}/{} successfully loaded",
            outcome.success.len(),
            outcome.total
        );
        outcome
    }

    /// Reload every currently loaded extension concurrently.
    ///
    /// Works on a snapshot taken once the batch owns the gate; single-item
    /// operations issued meanwhile wait and run after the batch.
    pub async fn reload_all(&self) -> BulkOutcome {
        let _gate = self.gate.write().await;

        let snapshot = self.get_loaded();
        if snapshot.is_empty() {
            info!("No extensions loaded, nothing to reload");
            return BulkOutcome::default();
        }

        let outcome = self.fan_out(Operation::Reload, snapshot).await;
        info!(
            "Reload finished: {}/{} successfully reloaded",
            outcome.success.len(),
            outcome.total
        );
        outcome
    }

    /// Copy of the Loaded Set, in load order
    pub fn get_loaded(&self) -> Vec<String> {
        self.lifecycle.loaded().clone()
    }

    pub fn is_loaded(&self, identifier: &str) -> bool {
        self.lifecycle.loaded().iter().any(|l| l == identifier)
    }

    pub fn len(&self) -> usize {
        self.lifecycle.loaded().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn fan_out(&self, op: Operation, identifiers: Vec<String>) -> BulkOutcome {
        if identifiers.is_empty() {
            return BulkOutcome::default();
        }

        // join_all yields results in input order whatever order they finish in
        let settled = join_all(identifiers.iter().map(|id| self.settle(op, id))).await;
        BulkOutcome::collect(identifiers.into_iter().zip(settled))
    }

    /// Run one operation behind the per-item fault boundary.
    ///
    /// The host call and its bookkeeping run on their own task, so neither a
    /// timeout nor a dropped caller can stop them between the host commit
    /// and the Loaded Set update. A panic surfaces as a failed join.
    async fn settle(&self, op: Operation, identifier: &str) -> bool {
        let lifecycle = self.lifecycle.clone();
        let owned = identifier.to_string();
        let mut task = tokio::spawn(async move { lifecycle.run(op, &owned).await });

        let joined = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    error!(
                        "Timed out after {:?} trying to {} {}, finishing in the background",
                        limit,
                        op.verb(),
                        identifier
                    );
                    return false;
                }
            },
            None => task.await,
        };

        match joined {
            Ok(ok) => ok,
            Err(e) if e.is_panic() => {
                error!(
                    "Panic while trying to {} {}: {}",
                    op.verb(),
                    identifier,
                    panic_message(e.into_panic().as_ref())
                );
                false
            }
            Err(e) => {
                error!("Failed to {} {}: {}", op.verb(), identifier, e);
                false
            }
        }
    }
}

/// Host handle plus the Loaded Set; cheap to clone into a task
#[derive(Clone)]
struct Lifecycle {
    host: Arc<dyn ExtensionHost>,
    loaded: Arc<Mutex<Vec<String>>>,
}

impl Lifecycle {
    fn loaded(&self) -> MutexGuard<'_, Vec<String>> {
        self.loaded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run(&self, op: Operation, identifier: &str) -> bool {
        match op {
            Operation::Load => self.load(identifier).await,
            Operation::Unload => self.unload(identifier).await,
            Operation::Reload => self.reload(identifier).await,
        }
    }

    async fn load(&self, identifier: &str) -> bool {
        match self.host.activate(identifier).await {
            Ok(()) => {
                {
                    let mut loaded = self.loaded();
                    if !loaded.iter().any(|l| l == identifier) {
                        loaded.push(identifier.to_string());
                    }
                }
                info!("Extension loaded: {}", identifier);
                true
            }
            Err(ExtensionError::AlreadyActive) => {
                warn!("Extension {} already loaded", identifier);
                false
            }
            Err(ExtensionError::NotFound) => {
                error!("Extension {} not found", identifier);
                false
            }
            Err(ExtensionError::NoEntryPoint) => {
                error!("Extension {} is missing its setup entry point", identifier);
                false
            }
            Err(e) => {
                error!(error = ?e, "Error loading {}: {}", identifier, e);
                false
            }
        }
    }

    async fn unload(&self, identifier: &str) -> bool {
        match self.host.deactivate(identifier).await {
            Ok(()) => {
                self.loaded().retain(|l| l != identifier);
                info!("Extension unloaded: {}", identifier);
                true
            }
            Err(ExtensionError::NotActive) => {
                warn!("Extension {} not loaded", identifier);
                false
            }
            Err(e) => {
                error!(error = ?e, "Error unloading {}: {}", identifier, e);
                false
            }
        }
    }

    async fn reload(&self, identifier: &str) -> bool {
        match self.host.swap(identifier).await {
            Ok(()) => {
                info!("Extension reloaded: {}", identifier);
                true
            }
            Err(ExtensionError::NotActive) => {
                info!("Extension {} not loaded, loading...", identifier);
                self.load(identifier).await
            }
            Err(e) => {
                error!(error = ?e, "Error reloading {}: {}", identifier, e);
                false
            }
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::fs::File;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Clone)]
    enum Script {
        Fail(ExtensionError),
        Panic,
        Delay(u64),
        /// Commit, then keep the caller waiting
        Linger(u64),
    }

    /// In-memory host whose activate/swap behaviour is scripted per identifier
    #[derive(Default)]
    struct ScriptedHost {
        active: Mutex<Vec<String>>,
        scripts: Mutex<HashMap<String, Script>>,
        calls: AtomicUsize,
        journal: Mutex<Vec<String>>,
    }

    impl ScriptedHost {
        fn script(&self, identifier: &str, script: Script) {
            self.scripts.lock().unwrap().insert(identifier.to_string(), script);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn journal(&self) -> Vec<String> {
            self.journal.lock().unwrap().clone()
        }

        async fn follow_script(&self, identifier: &str) -> Result<(), ExtensionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let script = self.scripts.lock().unwrap().get(identifier).cloned();
            match script {
                Some(Script::Fail(e)) => return Err(e),
                Some(Script::Panic) => panic!("activation of {} blew up", identifier),
                Some(Script::Delay(ms)) => tokio::time::sleep(Duration::from_millis(ms)).await,
                Some(Script::Linger(_)) | None => {}
            }
            Ok(())
        }

        async fn linger(&self, identifier: &str) {
            let script = self.scripts.lock().unwrap().get(identifier).cloned();
            if let Some(Script::Linger(ms)) = script {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
        }

        fn record(&self, entry: String) {
            self.journal.lock().unwrap().push(entry);
        }
    }

    #[async_trait]
    impl ExtensionHost for ScriptedHost {
        async fn activate(&self, identifier: &str) -> Result<(), ExtensionError> {
            self.follow_script(identifier).await?;
            {
                let mut active = self.active.lock().unwrap();
                if active.iter().any(|a| a == identifier) {
                    return Err(ExtensionError::AlreadyActive);
                }
                active.push(identifier.to_string());
            }
            self.record(format!("activate:{}", identifier));
            Ok(())
        }

        async fn deactivate(&self, identifier: &str) -> Result<(), ExtensionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let removed = {
                let mut active = self.active.lock().unwrap();
                let before = active.len();
                active.retain(|a| a != identifier);
                active.len() != before
            };
            if !removed {
                return Err(ExtensionError::NotActive);
            }
            self.linger(identifier).await;
            Ok(())
        }

        async fn swap(&self, identifier: &str) -> Result<(), ExtensionError> {
            let is_active = self.active.lock().unwrap().iter().any(|a| a == identifier);
            if !is_active {
                self.calls.fetch_add(1, Ordering::SeqCst);
                return Err(ExtensionError::NotActive);
            }
            self.follow_script(identifier).await?;
            self.record(format!("swap:{}", identifier));
            self.linger(identifier).await;
            Ok(())
        }

        fn extension_names(&self) -> Vec<String> {
            self.active.lock().unwrap().clone()
        }
    }

    fn loader_with(host: &Arc<ScriptedHost>, root: &Path) -> ExtensionLoader {
        let host: Arc<dyn ExtensionHost> = host.clone();
        ExtensionLoader::new(host, root)
            .with_suffix("so")
            .with_base_dir(root.canonicalize().unwrap())
    }

    fn extension_dir(names: &[&str]) -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        for name in names {
            File::create(temp_dir.path().join(format!("{}.so", name))).unwrap();
        }
        temp_dir
    }

    #[tokio::test]
    async fn test_load_inactive_appears_once() {
        let host = Arc::new(ScriptedHost::default());
        let dir = extension_dir(&[]);
        let loader = loader_with(&host, dir.path());

        assert!(loader.load("fun.dice").await);
        assert_eq!(loader.get_loaded(), vec!["fun.dice"]);
        assert!(loader.is_loaded("fun.dice"));
    }

    #[tokio::test]
    async fn test_load_active_is_rejected() {
        let host = Arc::new(ScriptedHost::default());
        let dir = extension_dir(&[]);
        let loader = loader_with(&host, dir.path());

        assert!(loader.load("fun.dice").await);
        assert!(!loader.load("fun.dice").await);
        assert_eq!(loader.get_loaded(), vec!["fun.dice"]);
    }

    #[tokio::test]
    async fn test_load_failures_leave_set_untouched() {
        let host = Arc::new(ScriptedHost::default());
        host.script("missing", Script::Fail(ExtensionError::NotFound));
        host.script("no_setup", Script::Fail(ExtensionError::NoEntryPoint));
        host.script("broken", Script::Fail(ExtensionError::Unexpected("bad ELF".into())));
        let dir = extension_dir(&[]);
        let loader = loader_with(&host, dir.path());

        assert!(!loader.load("missing").await);
        assert!(!loader.load("no_setup").await);
        assert!(!loader.load("broken").await);
        assert!(loader.is_empty());
    }

    #[tokio::test]
    async fn test_unload() {
        let host = Arc::new(ScriptedHost::default());
        let dir = extension_dir(&[]);
        let loader = loader_with(&host, dir.path());

        loader.load("a").await;
        loader.load("b").await;
        assert!(loader.unload("a").await);
        assert_eq!(loader.get_loaded(), vec!["b"]);

        assert!(!loader.unload("a").await);
        assert_eq!(loader.get_loaded(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_reload_active_keeps_membership() {
        let host = Arc::new(ScriptedHost::default());
        let dir = extension_dir(&[]);
        let loader = loader_with(&host, dir.path());

        loader.load("a").await;
        loader.load("b").await;
        assert!(loader.reload("a").await);
        assert_eq!(loader.get_loaded(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_reload_inactive_falls_back_to_load() {
        let host = Arc::new(ScriptedHost::default());
        host.script("missing", Script::Fail(ExtensionError::NotFound));
        let dir = extension_dir(&[]);
        let loader = loader_with(&host, dir.path());

        assert!(loader.reload("a").await);
        assert_eq!(loader.get_loaded(), vec!["a"]);
        assert_eq!(host.extension_names(), vec!["a"]);

        assert!(!loader.reload("missing").await);
        assert_eq!(loader.get_loaded(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_reload_failure_keeps_extension_loaded() {
        let host = Arc::new(ScriptedHost::default());
        let dir = extension_dir(&[]);
        let loader = loader_with(&host, dir.path());

        loader.load("a").await;
        host.script("a", Script::Fail(ExtensionError::Unexpected("compile error".into())));
        assert!(!loader.reload("a").await);
        assert_eq!(loader.get_loaded(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_get_loaded_is_a_copy() {
        let host = Arc::new(ScriptedHost::default());
        let dir = extension_dir(&[]);
        let loader = loader_with(&host, dir.path());

        loader.load("a").await;
        let mut copy = loader.get_loaded();
        copy.push("intruder".to_string());
        copy.clear();
        assert_eq!(loader.get_loaded(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_load_all_accounts_for_every_file() {
        let host = Arc::new(ScriptedHost::default());
        host.script("b", Script::Fail(ExtensionError::NoEntryPoint));
        let dir = extension_dir(&["a", "b", "c", "_private"]);
        let loader = loader_with(&host, dir.path());

        let outcome = loader.load_all().await;
        assert_eq!(outcome.total, 3);
        assert_eq!(outcome.success.len() + outcome.failed.len(), outcome.total);

        let success: HashSet<_> = outcome.success.iter().collect();
        let failed: HashSet<_> = outcome.failed.iter().collect();
        assert!(success.is_disjoint(&failed));

        let attempted: HashSet<String> = success.union(&failed).map(|s| s.to_string()).collect();
        let expected: HashSet<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        assert_eq!(attempted, expected);
        assert_eq!(loader.get_loaded(), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_load_all_isolates_a_panicking_extension() {
        let host = Arc::new(ScriptedHost::default());
        host.script("c", Script::Panic);
        let dir = extension_dir(&["a", "b", "c", "d", "e"]);
        let loader = loader_with(&host, dir.path());

        let outcome = loader.load_all().await;
        assert_eq!(outcome.total, 5);
        assert_eq!(outcome.failed, vec!["c"]);
        assert_eq!(outcome.success, vec!["a", "b", "d", "e"]);
        assert_eq!(loader.len(), 4);
    }

    #[tokio::test]
    async fn test_load_all_isolates_an_unexpected_fault() {
        let host = Arc::new(ScriptedHost::default());
        host.script("c", Script::Fail(ExtensionError::Unexpected("segment missing".into())));
        let dir = extension_dir(&["a", "b", "c", "d", "e"]);
        let loader = loader_with(&host, dir.path());

        let outcome = loader.load_all().await;
        assert_eq!(outcome.total, 5);
        assert_eq!(outcome.failed, vec!["c"]);
        assert_eq!(outcome.success, vec!["a", "b", "d", "e"]);
    }

    #[tokio::test]
    async fn test_load_all_keeps_dispatch_order() {
        let host = Arc::new(ScriptedHost::default());
        // a finishes last, e first
        host.script("a", Script::Delay(80));
        host.script("b", Script::Delay(60));
        host.script("c", Script::Delay(40));
        host.script("d", Script::Delay(20));
        let dir = extension_dir(&["a", "b", "c", "d", "e"]);
        let loader = loader_with(&host, dir.path());

        let outcome = loader.load_all().await;
        assert_eq!(outcome.success, vec!["a", "b", "c", "d", "e"]);
        assert_eq!(
            host.journal(),
            vec!["activate:e", "activate:d", "activate:c", "activate:b", "activate:a"]
        );
    }

    #[tokio::test]
    async fn test_load_all_with_nothing_discovered() {
        let host = Arc::new(ScriptedHost::default());
        let dir = extension_dir(&[]);
        let dyn_host: Arc<dyn ExtensionHost> = host.clone();
        let loader = ExtensionLoader::new(dyn_host, dir.path().join("absent")).with_suffix("so");

        let outcome = loader.load_all().await;
        assert_eq!(outcome, BulkOutcome::default());
        assert_eq!(host.calls(), 0);
    }

    #[tokio::test]
    async fn test_reload_all_with_empty_set_makes_no_calls() {
        let host = Arc::new(ScriptedHost::default());
        let dir = extension_dir(&["a"]);
        let loader = loader_with(&host, dir.path());

        let outcome = loader.reload_all().await;
        assert_eq!(outcome, BulkOutcome { success: vec![], failed: vec![], total: 0 });
        assert_eq!(host.calls(), 0);
    }

    #[tokio::test]
    async fn test_reload_all_reports_per_item() {
        let host = Arc::new(ScriptedHost::default());
        let dir = extension_dir(&["a", "b", "c"]);
        let loader = loader_with(&host, dir.path());
        loader.load_all().await;

        host.script("b", Script::Fail(ExtensionError::Unexpected("syntax".into())));
        let outcome = loader.reload_all().await;
        assert_eq!(outcome.total, 3);
        assert_eq!(outcome.success, vec!["a", "c"]);
        assert_eq!(outcome.failed, vec!["b"]);
        assert_eq!(loader.get_loaded(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_single_load_waits_for_running_batch() {
        let host = Arc::new(ScriptedHost::default());
        let dir = extension_dir(&[]);
        let loader = loader_with(&host, dir.path());
        loader.load("a").await;
        loader.load("b").await;
        host.script("a", Script::Delay(50));
        host.script("b", Script::Delay(50));

        let (outcome, loaded) = tokio::join!(loader.reload_all(), loader.load("late"));

        assert!(loaded);
        assert_eq!(outcome.total, 2);
        assert!(!outcome.success.contains(&"late".to_string()));
        assert_eq!(host.journal().last().map(String::as_str), Some("activate:late"));
        assert_eq!(loader.get_loaded(), vec!["a", "b", "late"]);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let host = Arc::new(ScriptedHost::default());
        host.script("slow", Script::Delay(500));
        let dir = extension_dir(&["fast", "slow"]);
        let loader = loader_with(&host, dir.path()).with_timeout(Some(Duration::from_millis(50)));

        let outcome = loader.load_all().await;
        assert_eq!(outcome.success, vec!["fast"]);
        assert_eq!(outcome.failed, vec!["slow"]);
        assert!(!loader.is_loaded("slow"));

        // The abandoned activation still completes and is recorded
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert!(loader.is_loaded("slow"));
        assert!(host.extension_names().contains(&"slow".to_string()));
    }

    #[tokio::test]
    async fn test_timed_out_unload_keeps_set_in_step_with_host() {
        let host = Arc::new(ScriptedHost::default());
        let dir = extension_dir(&[]);
        let loader = loader_with(&host, dir.path()).with_timeout(Some(Duration::from_millis(50)));
        assert!(loader.load("a").await);
        host.script("a", Script::Linger(200));

        assert!(!loader.unload("a").await);
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert!(host.extension_names().is_empty());
        assert!(!loader.is_loaded("a"));
        assert!(loader.load("a").await);
        assert_eq!(loader.get_loaded(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_timed_out_reload_keeps_extension_loaded() {
        let host = Arc::new(ScriptedHost::default());
        let dir = extension_dir(&[]);
        let loader = loader_with(&host, dir.path()).with_timeout(Some(Duration::from_millis(50)));
        assert!(loader.load("a").await);
        host.script("a", Script::Linger(200));

        assert!(!loader.reload("a").await);
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(host.journal().last().map(String::as_str), Some("swap:a"));
        assert_eq!(loader.get_loaded(), vec!["a"]);
        host.script("a", Script::Delay(0));
        assert!(loader.unload("a").await);
        assert!(loader.is_empty());
    }
}
