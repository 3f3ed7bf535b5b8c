//! `mounts/<host-id>/<guest-id>/<user-chosen-name>` subtree.
//! `MountFile`, `HostFile` and `GuestFile` are composition wrappers around
//! [`DirCore`]: each overrides only `Mkdir`/`Mknod` to consult a static
//! factory table and rejects unknown kinds with `EACCES`, delegating
//! everything else straight through.

pub mod mountpoint;

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tracing::{error, info};

use crate::attr::{Attr, ModeType, SetAttr};
use crate::directory::DirCore;
use crate::error::{Errno, Error, FsResult};
use crate::node::{DirEntry, Directory, Entry, FileLeaf};
use crate::qid::{PathAllocator, Qid};
pub use mountpoint::{Detach, Mountpoint, MountpointFile};

/// Builds the `Mountpoint` object for one (host-kind, guest-kind) pair.
pub type MakeMountpointFunc = Arc<dyn Fn() -> Box<dyn Mountpoint> + Send + Sync>;

/// Static registration table, built once at daemon start.
#[derive(Clone, Default)]
pub struct MountFactories {
    guests_by_host: HashMap<String, Vec<String>>,
    make_mountpoint: HashMap<(String, String), MakeMountpointFunc>,
}

impl MountFactories {
    pub fn new() -> Self {
        MountFactories::default()
    }

    pub fn register(
        &mut self,
        host_kind: impl Into<String>,
        guest_kind: impl Into<String>,
        make: MakeMountpointFunc,
    ) {
        let host_kind = host_kind.into();
        let guest_kind = guest_kind.into();
        self.guests_by_host
            .entry(host_kind.clone())
            .or_default()
            .push(guest_kind.clone());
        self.make_mountpoint.insert((host_kind, guest_kind), make);
    }

    fn is_known_host(&self, host_kind: &str) -> bool {
        self.guests_by_host.contains_key(host_kind)
    }

    fn is_known_guest(&self, host_kind: &str, guest_kind: &str) -> bool {
        self.guests_by_host
            .get(host_kind)
            .map(|guests| guests.iter().any(|g| g == guest_kind))
            .unwrap_or(false)
    }

    fn make_mountpoint(&self, host_kind: &str, guest_kind: &str) -> Option<Box<dyn Mountpoint>> {
        self.make_mountpoint.get(&(host_kind.to_string(), guest_kind.to_string())).map(|f| f())
    }
}

pub struct MountFile {
    core: DirCore,
    factories: Arc<MountFactories>,
    self_weak: std::sync::Mutex<Weak<dyn Directory>>,
}

impl MountFile {
    pub fn new(alloc: Arc<PathAllocator>, attr: Attr, factories: Arc<MountFactories>) -> Arc<dyn Directory> {
        Arc::new_cyclic(|weak: &Weak<MountFile>| MountFile {
            core: DirCore::new(alloc, attr, false),
            factories,
            self_weak: std::sync::Mutex::new(weak.clone() as Weak<dyn Directory>),
        })
    }

    fn weak(&self) -> Weak<dyn Directory> {
        self.self_weak.lock().unwrap().clone()
    }
}

#[async_trait]
impl Directory for MountFile {
    fn qid(&self) -> Qid {
        self.core.qid()
    }
    async fn get_attr(&self) -> FsResult<Attr> {
        self.core.get_attr().await
    }
    async fn set_attr(&self, set: &SetAttr) -> FsResult<()> {
        self.core.set_attr(set).await
    }
    fn parent(&self) -> Option<Arc<dyn Directory>> {
        self.core.parent()
    }
    fn set_parent(&self, parent: Weak<dyn Directory>, name: String) {
        self.core.set_parent(parent, name)
    }
    fn name(&self) -> String {
        self.core.name()
    }
    async fn walk1(&self, name: &str) -> FsResult<Entry> {
        self.core.walk1(name).await
    }
    async fn link(&self, name: String, entry: Entry) -> FsResult<()> {
        self.core.link(name, entry, self.weak()).await
    }
    async fn unlink_at(&self, name: &str) -> FsResult<()> {
        self.core.unlink_at(name).await
    }

    async fn mkdir(
        &self,
        name: String,
        perm: u32,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> FsResult<Arc<dyn Directory>> {
        if !self.factories.is_known_host(&name) {
            return Err(Error::new(Errno::Access));
        }
        let parent_attr = self.core.get_attr().await?;
        let attr = Attr::new_inheriting(ModeType::Directory, perm, uid, gid, Some(&parent_attr));
        let child = HostFile::new(self.core.alloc().clone(), attr, name.clone(), self.factories.clone());
        self.core.link(name, Entry::Dir(child.clone()), self.weak()).await?;
        Ok(child)
    }

    async fn mknod(
        &self,
        _name: String,
        _perm: u32,
        _uid: Option<u32>,
        _gid: Option<u32>,
    ) -> FsResult<Arc<dyn FileLeaf>> {
        Err(Error::new(Errno::Access))
    }

    async fn readdir(&self, offset: usize, count: usize) -> FsResult<Vec<DirEntry>> {
        self.core.readdir(offset, count).await
    }

    async fn rename_at(&self, old_name: &str, new_dir: &Arc<dyn Directory>, new_name: &str) -> FsResult<()> {
        self.core.rename_at(old_name, new_dir, new_name, self.weak()).await
    }
}

pub struct HostFile {
    core: DirCore,
    host_kind: String,
    factories: Arc<MountFactories>,
    self_weak: std::sync::Mutex<Weak<dyn Directory>>,
}

impl HostFile {
    fn new(
        alloc: Arc<PathAllocator>,
        attr: Attr,
        host_kind: String,
        factories: Arc<MountFactories>,
    ) -> Arc<dyn Directory> {
        Arc::new_cyclic(|weak: &Weak<HostFile>| HostFile {
            core: DirCore::new(alloc, attr, false),
            host_kind,
            factories,
            self_weak: std::sync::Mutex::new(weak.clone() as Weak<dyn Directory>),
        })
    }

    fn weak(&self) -> Weak<dyn Directory> {
        self.self_weak.lock().unwrap().clone()
    }
}

#[async_trait]
impl Directory for HostFile {
    fn qid(&self) -> Qid {
        self.core.qid()
    }
    async fn get_attr(&self) -> FsResult<Attr> {
        self.core.get_attr().await
    }
    async fn set_attr(&self, set: &SetAttr) -> FsResult<()> {
        self.core.set_attr(set).await
    }
    fn parent(&self) -> Option<Arc<dyn Directory>> {
        self.core.parent()
    }
    fn set_parent(&self, parent: Weak<dyn Directory>, name: String) {
        self.core.set_parent(parent, name)
    }
    fn name(&self) -> String {
        self.core.name()
    }
    async fn walk1(&self, name: &str) -> FsResult<Entry> {
        self.core.walk1(name).await
    }
    async fn link(&self, name: String, entry: Entry) -> FsResult<()> {
        self.core.link(name, entry, self.weak()).await
    }
    async fn unlink_at(&self, name: &str) -> FsResult<()> {
        self.core.unlink_at(name).await
    }

    async fn mkdir(
        &self,
        name: String,
        perm: u32,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> FsResult<Arc<dyn Directory>> {
        if !self.factories.is_known_guest(&self.host_kind, &name) {
            return Err(Error::new(Errno::Access));
        }
        let parent_attr = self.core.get_attr().await?;
        let attr = Attr::new_inheriting(ModeType::Directory, perm, uid, gid, Some(&parent_attr));
        let child = GuestFile::new(
            self.core.alloc().clone(),
            attr,
            self.host_kind.clone(),
            name.clone(),
            self.factories.clone(),
        );
        self.core.link(name, Entry::Dir(child.clone()), self.weak()).await?;
        Ok(child)
    }

    async fn mknod(
        &self,
        _name: String,
        _perm: u32,
        _uid: Option<u32>,
        _gid: Option<u32>,
    ) -> FsResult<Arc<dyn FileLeaf>> {
        Err(Error::new(Errno::Access))
    }

    async fn readdir(&self, offset: usize, count: usize) -> FsResult<Vec<DirEntry>> {
        self.core.readdir(offset, count).await
    }

    async fn rename_at(&self, old_name: &str, new_dir: &Arc<dyn Directory>, new_name: &str) -> FsResult<()> {
        self.core.rename_at(old_name, new_dir, new_name, self.weak()).await
    }
}

pub struct GuestFile {
    core: DirCore,
    host_kind: String,
    guest_kind: String,
    factories: Arc<MountFactories>,
    self_weak: std::sync::Mutex<Weak<dyn Directory>>,
}

impl GuestFile {
    fn new(
        alloc: Arc<PathAllocator>,
        attr: Attr,
        host_kind: String,
        guest_kind: String,
        factories: Arc<MountFactories>,
    ) -> Arc<dyn Directory> {
        Arc::new_cyclic(|weak: &Weak<GuestFile>| GuestFile {
            core: DirCore::new(alloc, attr, false),
            host_kind,
            guest_kind,
            factories,
            self_weak: std::sync::Mutex::new(weak.clone() as Weak<dyn Directory>),
        })
    }

    fn weak(&self) -> Weak<dyn Directory> {
        self.self_weak.lock().unwrap().clone()
    }
}

#[async_trait]
impl Directory for GuestFile {
    fn qid(&self) -> Qid {
        self.core.qid()
    }
    async fn get_attr(&self) -> FsResult<Attr> {
        self.core.get_attr().await
    }
    async fn set_attr(&self, set: &SetAttr) -> FsResult<()> {
        self.core.set_attr(set).await
    }
    fn parent(&self) -> Option<Arc<dyn Directory>> {
        self.core.parent()
    }
    fn set_parent(&self, parent: Weak<dyn Directory>, name: String) {
        self.core.set_parent(parent, name)
    }
    fn name(&self) -> String {
        self.core.name()
    }
    async fn walk1(&self, name: &str) -> FsResult<Entry> {
        self.core.walk1(name).await
    }
    async fn link(&self, name: String, entry: Entry) -> FsResult<()> {
        self.core.link(name, entry, self.weak()).await
    }
    async fn unlink_at(&self, name: &str) -> FsResult<()> {
        self.core.unlink_at(name).await
    }

    async fn mkdir(
        &self,
        _name: String,
        _perm: u32,
        _uid: Option<u32>,
        _gid: Option<u32>,
    ) -> FsResult<Arc<dyn Directory>> {
        Err(Error::new(Errno::Access))
    }

    async fn mknod(
        &self,
        name: String,
        perm: u32,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> FsResult<Arc<dyn FileLeaf>> {
        let mountpoint = self
            .factories
            .make_mountpoint(&self.host_kind, &self.guest_kind)
            .ok_or_else(|| Error::new(Errno::Access))?;
        let parent_attr = self.core.get_attr().await?;
        let attr = Attr::new_inheriting(ModeType::Regular, perm, uid, gid, Some(&parent_attr));
        let child = MountpointFile::new(self.core.alloc().clone(), attr, mountpoint);
        self.core.link(name, Entry::File(child.clone()), self.weak()).await?;
        Ok(child)
    }

    async fn readdir(&self, offset: usize, count: usize) -> FsResult<Vec<DirEntry>> {
        self.core.readdir(offset, count).await
    }

    async fn rename_at(&self, old_name: &str, new_dir: &Arc<dyn Directory>, new_name: &str) -> FsResult<()> {
        self.core.rename_at(old_name, new_dir, new_name, self.weak()).await
    }
}

/// Unlinks every mount leaf under every `host/guest` pair, fanning the
/// work out across a `JoinSet` with an errgroup-like completion signal.
pub async fn unmount_all(root: &Arc<dyn Directory>) -> FsResult<()> {
    let mut join_set = tokio::task::JoinSet::new();
    for host in root.readdir(0, usize::MAX).await? {
        let host_dir = root.walk1(&host.name).await?.as_dir().ok_or_else(|| Error::new(Errno::NotDir))?;
        for guest in host_dir.readdir(0, usize::MAX).await? {
            let guest_dir =
                host_dir.walk1(&guest.name).await?.as_dir().ok_or_else(|| Error::new(Errno::NotDir))?;
            for leaf in guest_dir.readdir(0, usize::MAX).await? {
                let guest_dir = guest_dir.clone();
                let leaf_name = leaf.name.clone();
                join_set.spawn(async move {
                    let result = guest_dir.unlink_at(&leaf_name).await;
                    (leaf_name, result)
                });
            }
        }
    }

    let mut errors = Vec::new();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((name, Ok(()))) => info!(mount = %name, "unmounted"),
            Ok((name, Err(e))) => {
                error!(mount = %name, error = %e, "unmount failed");
                errors.push(e);
            }
            Err(e) => error!(error = %e, "unmount task panicked"),
        }
    }
    if let Some(first) = errors.into_iter().next() {
        return Err(first);
    }
    Ok(())
}

/// Unlinks every mount leaf whose JSON payload mentions one of `targets`
/// as a string value anywhere in the document.
pub async fn unmount_targets(root: &Arc<dyn Directory>, targets: &[String]) -> FsResult<()> {
    let mut found = std::collections::HashSet::new();
    for host in root.readdir(0, usize::MAX).await? {
        let host_dir = root.walk1(&host.name).await?.as_dir().ok_or_else(|| Error::new(Errno::NotDir))?;
        for guest in host_dir.readdir(0, usize::MAX).await? {
            let guest_dir =
                host_dir.walk1(&guest.name).await?.as_dir().ok_or_else(|| Error::new(Errno::NotDir))?;
            for leaf in guest_dir.readdir(0, usize::MAX).await? {
                let entry = guest_dir.walk1(&leaf.name).await?;
                let file = match entry.as_file() {
                    Some(f) => f,
                    None => continue,
                };
                let bytes = file.read_at(0, u32::MAX).await.unwrap_or_default();
                let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap_or_default();
                let matched = targets.iter().any(|t| json_contains_string(&value, t));
                if matched {
                    let matched_targets: Vec<_> =
                        targets.iter().filter(|t| json_contains_string(&value, t)).cloned().collect();
                    found.extend(matched_targets);
                    guest_dir.unlink_at(&leaf.name).await?;
                }
            }
        }
    }
    let missing: Vec<_> = targets.iter().filter(|t| !found.contains(*t)).cloned().collect();
    if !missing.is_empty() {
        return Err(Error::with_source(Errno::NoEnt, MissingTargets(missing)));
    }
    Ok(())
}

/// Names exactly which of the requested `UnmountTargets` weren't found
/// mounted anywhere, so the caller isn't left guessing which one(s) failed.
#[derive(Debug)]
pub struct MissingTargets(pub Vec<String>);

impl std::fmt::Display for MissingTargets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "targets not mounted: {}", self.0.join(", "))
    }
}

impl std::error::Error for MissingTargets {}

fn json_contains_string(value: &serde_json::Value, needle: &str) -> bool {
    match value {
        serde_json::Value::String(s) => s == needle,
        serde_json::Value::Array(items) => items.iter().any(|v| json_contains_string(v, needle)),
        serde_json::Value::Object(map) => map.values().any(|v| json_contains_string(v, needle)),
        _ => false,
    }
}
