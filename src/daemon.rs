//! Ties the tree, the listener subtree, the mount subtree and the `Server`
//! together into one running daemon, and owns the shutdown-disposition
//! state machine that drains them in the right order.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::attr::{Attr, ModeType};
use crate::cancel::CancelScope;
use crate::config::DaemonConfig;
use crate::control::{build_control_dir, ShutdownDisposition};
use crate::directory::BaseDir;
use crate::error::{Errno, Error, FsResult};
use crate::listener::multiaddr::Multiaddr;
use crate::listener::{get_listeners, ListenerRoot};
use crate::mount::{unmount_all, MountFactories, MountFile};
use crate::node::{Directory, Entry};
use crate::qid::PathAllocator;
use crate::server::{Server, Transport};

/// Cheap, cloneable front door other tasks (a signal handler, a supervising
/// binary) use to push a [`ShutdownDisposition`] into a running
/// [`DaemonController`] without holding onto the controller itself.
#[derive(Clone)]
pub struct DaemonHandle {
    shutdown_tx: async_channel::Sender<ShutdownDisposition>,
}

impl DaemonHandle {
    pub async fn request_shutdown(&self, disposition: ShutdownDisposition) {
        let _ = self.shutdown_tx.send(disposition).await;
    }
}

/// Owns the whole tree and the `Server` that answers 9P requests against it.
/// `new` builds the tree and binds every configured listen address; `run`
/// drives the daemon until a shutdown disposition has fully drained it.
pub struct DaemonController {
    root: Arc<dyn Directory>,
    server: Arc<Server>,
    config: DaemonConfig,
    listener_scope: CancelScope,
    hard_cancel: CancelScope,
    shutdown_tx: async_channel::Sender<ShutdownDisposition>,
    shutdown_rx: async_channel::Receiver<ShutdownDisposition>,
    control_rx: async_channel::Receiver<ShutdownDisposition>,
}

impl DaemonController {
    pub async fn new(config: DaemonConfig, factories: MountFactories) -> FsResult<Self> {
        let alloc = Arc::new(PathAllocator::new());
        let root_attr = Attr::new_inheriting(ModeType::Directory, 0o755, Some(0), Some(0), None);
        let root = BaseDir::new(alloc.clone(), root_attr.clone(), false);

        let mounts = MountFile::new(alloc.clone(), root_attr.clone(), Arc::new(factories));
        root.link("mounts".to_string(), Entry::Dir(mounts)).await?;

        let listener_scope = CancelScope::new();
        let (listener_emit_tx, listener_emit_rx) = async_channel::unbounded();
        let listeners = ListenerRoot::new(alloc.clone(), root_attr.clone(), listener_emit_tx, listener_scope.clone());
        root.link("listeners".to_string(), Entry::Dir(listeners)).await?;

        let hard_cancel = CancelScope::new();
        let (control_dir, control_rx) = build_control_dir(alloc.clone(), &root_attr, hard_cancel.clone()).await?;
        root.link("control".to_string(), Entry::Dir(control_dir)).await?;

        tokio::spawn(async move {
            while let Ok(handle) = listener_emit_rx.recv().await {
                info!(maddr = %handle.maddr, "listener opened");
            }
        });

        let server = Server::new(root.clone());
        for addr in &config.listen {
            let maddr = Multiaddr::parse(addr)?;
            let transport = Transport::bind(&maddr).await?;
            server.spawn_serve(transport);
        }

        let (shutdown_tx, shutdown_rx) = async_channel::unbounded();

        Ok(DaemonController {
            root,
            server,
            config,
            listener_scope,
            hard_cancel,
            shutdown_tx,
            shutdown_rx,
            control_rx,
        })
    }

    /// The tree root, for a caller that wants to attach demo mounts or
    /// inspect the tree alongside the running daemon.
    pub fn root(&self) -> Arc<dyn Directory> {
        self.root.clone()
    }

    /// A cloneable handle external shutdown sources (OS signals, a parent
    /// context) can use to inject dispositions while `run` is in progress.
    pub fn handle(&self) -> DaemonHandle {
        DaemonHandle { shutdown_tx: self.shutdown_tx.clone() }
    }

    /// Runs until every shutdown consumer has drained: the listener subtree
    /// stops accepting new addresses, the mount subtree unmounts everything,
    /// and the `Server` closes every connection. Returns the background
    /// errors collected along the way, if any.
    pub async fn run(self) -> Result<(), Vec<Error>> {
        let errors: Arc<StdMutex<Vec<Error>>> = Arc::new(StdMutex::new(Vec::new()));
        let (level_tx, level_rx) = watch::channel::<Option<ShutdownDisposition>>(None);

        let forward_handle = forward_dispositions(self.control_rx.clone(), self.shutdown_tx.clone());
        spawn_leveling_filter(self.shutdown_rx.clone(), level_tx);

        let mut ticker_handles = Vec::new();
        if let Some(interval) = self.config.idle_check_interval {
            ticker_handles.push(spawn_unreachable_ticker(self.root.clone(), self.shutdown_tx.clone(), interval));
        }
        ticker_handles.push(spawn_unreachable_ticker(self.root.clone(), self.shutdown_tx.clone(), self.config.unreachable_check_interval));

        // Drop our own sender so the leveling filter's source channel can
        // close once every background task's clone is gone too; the
        // orchestrator itself no longer depends on that closure to return.
        drop(self.shutdown_tx);

        let orchestrator = tokio::spawn(run_orchestrator(
            self.server.clone(),
            self.root.clone(),
            self.listener_scope.clone(),
            self.hard_cancel.clone(),
            self.config.shutdown_short_grace,
            level_rx,
            errors.clone(),
        ));

        let orchestrator_result = orchestrator.await;

        // The disposition has fully drained; these loops have no further
        // purpose and would otherwise run for the rest of the process.
        forward_handle.abort();
        for handle in ticker_handles {
            handle.abort();
        }

        if orchestrator_result.is_err() {
            errors.lock().unwrap().push(Error::new(Errno::Io));
        }

        let collected = std::mem::take(&mut *errors.lock().unwrap());
        if collected.is_empty() {
            Ok(())
        } else {
            Err(collected)
        }
    }
}

/// Re-emits every value from `src` onto `dst`; used to fold the control
/// file's channel and the externally-injected channel into one stream ahead
/// of the leveling filter. Exits quietly once `src` closes (or is aborted
/// once the orchestrator has drained a disposition).
fn forward_dispositions(
    src: async_channel::Receiver<ShutdownDisposition>,
    dst: async_channel::Sender<ShutdownDisposition>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Ok(d) = src.recv().await {
            if dst.send(d).await.is_err() {
                break;
            }
        }
    })
}

/// Tracks the highest disposition seen so far and only forwards strictly
/// increasing values, so a `Patient` disposition received after an
/// `Immediate` one can never downgrade an in-progress shutdown.
fn spawn_leveling_filter(
    rx: async_channel::Receiver<ShutdownDisposition>,
    tx: watch::Sender<Option<ShutdownDisposition>>,
) {
    tokio::spawn(async move {
        let mut highest: Option<ShutdownDisposition> = None;
        while let Ok(level) = rx.recv().await {
            if highest.map_or(true, |h| level > h) {
                highest = Some(level);
                if tx.send(Some(level)).is_err() {
                    break;
                }
            }
        }
    });
}

async fn has_any_mount(root: &Arc<dyn Directory>) -> FsResult<bool> {
    let mounts = root.walk1("mounts").await?.as_dir().ok_or_else(|| Error::new(Errno::NotDir))?;
    for host in mounts.readdir(0, usize::MAX).await? {
        let host_dir = match mounts.walk1(&host.name).await? {
            Entry::Dir(d) => d,
            Entry::File(_) => continue,
        };
        for guest in host_dir.readdir(0, usize::MAX).await? {
            let guest_dir = match host_dir.walk1(&guest.name).await? {
                Entry::Dir(d) => d,
                Entry::File(_) => continue,
            };
            if !guest_dir.readdir(0, 1).await?.is_empty() {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Fires `Patient` once every `interval` whenever the tree has both zero
/// mounts and zero listeners: a daemon nobody can reach through either
/// subtree is a daemon that should retire itself.
fn spawn_unreachable_ticker(
    root: Arc<dyn Directory>,
    tx: async_channel::Sender<ShutdownDisposition>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let listeners_empty = match get_listeners(&root).await {
                Ok(v) => v.is_empty(),
                Err(_) => true,
            };
            let mounts_empty = match has_any_mount(&root).await {
                Ok(has) => !has,
                Err(_) => true,
            };
            if listeners_empty && mounts_empty {
                debug!("tree unreachable, requesting shutdown");
                if tx.send(ShutdownDisposition::Patient).await.is_err() {
                    break;
                }
            }
        }
    })
}

/// The single task that owns the shutdown state machine: on the first
/// disposition it stops the listener subtree and starts unmounting, then
/// escalates the `Server`'s hard-cancel scope according to the level
/// (`Short` schedules a delayed cancel, `Immediate` cancels at once), and
/// starts `Server::shutdown` exactly once.
async fn run_orchestrator(
    server: Arc<Server>,
    root: Arc<dyn Directory>,
    listener_scope: CancelScope,
    hard_cancel: CancelScope,
    short_grace: Duration,
    mut levels: watch::Receiver<Option<ShutdownDisposition>>,
    errors: Arc<StdMutex<Vec<Error>>>,
) {
    let mut started = false;
    let mut short_timer_spawned = false;
    let mut shutdown_handle: Option<tokio::task::JoinHandle<()>> = None;

    let initial = *levels.borrow_and_update();
    if let Some(level) = initial {
        apply_level(
            level,
            &mut started,
            &mut short_timer_spawned,
            &mut shutdown_handle,
            &server,
            &root,
            &listener_scope,
            &hard_cancel,
            short_grace,
            &errors,
        );
    }

    // Once `shutdown_handle` resolves the disposition has fully drained
    // (every connection closed, idle-closed, or force-cancelled), so the
    // state machine is done regardless of whether further, higher-level
    // dispositions ever arrive or the watch channel ever closes.
    loop {
        tokio::select! {
            res = async { shutdown_handle.as_mut().unwrap().await }, if shutdown_handle.is_some() => {
                if let Err(e) = res {
                    warn!(error = %e, "server shutdown task panicked");
                    errors.lock().unwrap().push(Error::new(Errno::Io));
                }
                break;
            }
            changed = levels.changed() => {
                if changed.is_err() {
                    break;
                }
                let level = *levels.borrow_and_update();
                if let Some(level) = level {
                    apply_level(
                        level,
                        &mut started,
                        &mut short_timer_spawned,
                        &mut shutdown_handle,
                        &server,
                        &root,
                        &listener_scope,
                        &hard_cancel,
                        short_grace,
                        &errors,
                    );
                }
            }
        }
    }
}

/// Applies one observed disposition level: starts the drain sequence on
/// first call, escalates the hard-cancel scope per level, and ensures
/// `Server::shutdown` has been kicked off exactly once.
#[allow(clippy::too_many_arguments)]
fn apply_level(
    level: ShutdownDisposition,
    started: &mut bool,
    short_timer_spawned: &mut bool,
    shutdown_handle: &mut Option<tokio::task::JoinHandle<()>>,
    server: &Arc<Server>,
    root: &Arc<dyn Directory>,
    listener_scope: &CancelScope,
    hard_cancel: &CancelScope,
    short_grace: Duration,
    errors: &Arc<StdMutex<Vec<Error>>>,
) {
    if !*started {
        *started = true;
        listener_scope.cancel();

        let root = root.clone();
        let errors = errors.clone();
        tokio::spawn(async move {
            if let Err(e) = unmount_all(&root).await {
                warn!(error = %e, "unmount_all failed during shutdown");
                errors.lock().unwrap().push(e);
            }
        });
    }

    match level {
        ShutdownDisposition::Short if !*short_timer_spawned => {
            *short_timer_spawned = true;
            let hard_cancel = hard_cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(short_grace).await;
                hard_cancel.cancel();
            });
        }
        ShutdownDisposition::Immediate => hard_cancel.cancel(),
        _ => {}
    }

    if shutdown_handle.is_none() {
        let server = server.clone();
        let hard_cancel = hard_cancel.clone();
        *shutdown_handle = Some(tokio::spawn(async move {
            server.shutdown(&hard_cancel).await;
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DaemonConfig {
        DaemonConfig { listen: vec![], ..DaemonConfig::default() }
    }

    #[tokio::test]
    async fn builds_tree_with_expected_children() {
        let controller = DaemonController::new(config(), MountFactories::new()).await.unwrap();
        let root = controller.root();
        assert!(root.walk1("mounts").await.unwrap().as_dir().is_some());
        assert!(root.walk1("listeners").await.unwrap().as_dir().is_some());
        assert!(root.walk1("control").await.unwrap().as_dir().is_some());
    }

    #[tokio::test]
    async fn patient_shutdown_via_handle_drains_run() {
        let controller = DaemonController::new(config(), MountFactories::new()).await.unwrap();
        let handle = controller.handle();
        let run = tokio::spawn(controller.run());
        handle.request_shutdown(ShutdownDisposition::Patient).await;
        let result = tokio::time::timeout(Duration::from_secs(5), run).await;
        assert!(result.is_ok(), "run() did not complete after a patient shutdown request");
        assert!(result.unwrap().unwrap().is_ok());
    }

    #[tokio::test]
    async fn writing_shutdown_file_drains_run() {
        let controller = DaemonController::new(config(), MountFactories::new()).await.unwrap();
        let root = controller.root();
        let shutdown = root
            .walk1("control")
            .await
            .unwrap()
            .as_dir()
            .unwrap()
            .walk1("shutdown")
            .await
            .unwrap()
            .as_file()
            .unwrap();
        let run = tokio::spawn(controller.run());
        shutdown.write_at(0, b"immediate").await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), run).await;
        assert!(result.is_ok(), "run() did not complete after an immediate shutdown write");
    }
}
