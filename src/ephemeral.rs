//! Directory wrapper that reclaims itself once empty and unreferenced.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::attr::{Attr, SetAttr};
use crate::error::FsResult;
use crate::node::{DirEntry, Directory, Entry, FileLeaf};
use crate::qid::Qid;

/// The whole `{check-empty, mark, unlink}` sequence is guarded by this
/// mutex so a racing Close and Link cannot both observe the pre-decision
/// state and double-unlink.
struct ReclaimState {
    should_unlink: bool,
}

/// Wraps any [`Directory`] and adds handle counting plus unlink-when-empty
/// behavior. Composition, not inheritance.
pub struct EphemeralDir {
    inner: Arc<dyn Directory>,
    handles: AtomicUsize,
    reclaim: Mutex<ReclaimState>,
}

impl EphemeralDir {
    pub fn new(inner: Arc<dyn Directory>) -> Arc<dyn Directory> {
        Arc::new(EphemeralDir {
            inner,
            handles: AtomicUsize::new(0),
            reclaim: Mutex::new(ReclaimState { should_unlink: false }),
        })
    }

    async fn maybe_reclaim(&self) {
        let parent = match self.inner.parent() {
            Some(p) => p,
            None => return,
        };
        let name = self.inner.name();
        // Holding this lock for the whole decision keeps a concurrent Link
        // (which clears `should_unlink`) and a concurrent last-Close from
        // both reaching `parent.unlink_at` for the same directory.
        let mut state = self.reclaim.lock().await;
        if !state.should_unlink {
            return;
        }
        if self.handles.load(Ordering::SeqCst) != 0 {
            return;
        }
        if !self.is_empty_inner().await {
            return;
        }
        state.should_unlink = false;
        drop(state);
        debug!(dir = %name, "reclaiming empty ephemeral directory");
        let _ = parent.unlink_at(&name).await;
    }

    async fn is_empty_inner(&self) -> bool {
        matches!(self.inner.readdir(0, 1).await, Ok(v) if v.is_empty())
    }
}

#[async_trait]
impl Directory for EphemeralDir {
    fn qid(&self) -> Qid {
        self.inner.qid()
    }

    async fn get_attr(&self) -> FsResult<Attr> {
        self.inner.get_attr().await
    }

    async fn set_attr(&self, set: &SetAttr) -> FsResult<()> {
        self.inner.set_attr(set).await
    }

    fn parent(&self) -> Option<Arc<dyn Directory>> {
        self.inner.parent()
    }

    fn set_parent(&self, parent: Weak<dyn Directory>, name: String) {
        self.inner.set_parent(parent, name)
    }

    fn name(&self) -> String {
        self.inner.name()
    }

    async fn walk1(&self, name: &str) -> FsResult<Entry> {
        self.inner.walk1(name).await
    }

    async fn link(&self, name: String, entry: Entry) -> FsResult<()> {
        let result = self.inner.link(name, entry).await;
        if result.is_ok() {
            // A Link during the reclaim window cancels it.
            self.reclaim.lock().await.should_unlink = false;
        }
        result
    }

    async fn unlink_at(&self, name: &str) -> FsResult<()> {
        let result = self.inner.unlink_at(name).await;
        if result.is_ok() && self.is_empty_inner().await {
            self.reclaim.lock().await.should_unlink = true;
            self.maybe_reclaim().await;
        }
        result
    }

    async fn mkdir(
        &self,
        name: String,
        perm: u32,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> FsResult<Arc<dyn Directory>> {
        let child = self.inner.mkdir(name, perm, uid, gid).await?;
        self.reclaim.lock().await.should_unlink = false;
        Ok(child)
    }

    async fn mknod(
        &self,
        name: String,
        perm: u32,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> FsResult<Arc<dyn FileLeaf>> {
        let child = self.inner.mknod(name, perm, uid, gid).await?;
        self.reclaim.lock().await.should_unlink = false;
        Ok(child)
    }

    async fn readdir(&self, offset: usize, count: usize) -> FsResult<Vec<DirEntry>> {
        self.inner.readdir(offset, count).await
    }

    async fn rename_at(
        &self,
        old_name: &str,
        new_dir: &Arc<dyn Directory>,
        new_name: &str,
    ) -> FsResult<()> {
        self.inner.rename_at(old_name, new_dir, new_name).await
    }

    fn rename_disabled(&self) -> bool {
        self.inner.rename_disabled()
    }

    fn on_handle_opened(&self) {
        self.handles.fetch_add(1, Ordering::SeqCst);
        self.inner.on_handle_opened();
    }

    async fn on_handle_closed(&self) {
        self.inner.on_handle_closed().await;
        if self.handles.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.maybe_reclaim().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::ModeType;
    use crate::directory::BaseDir;
    use crate::node::Entry;
    use crate::qid::PathAllocator;

    fn leaf_attr() -> Attr {
        Attr::new_inheriting(ModeType::Directory, 0o755, Some(0), Some(0), None)
    }

    #[tokio::test]
    async fn reclaims_after_last_close_once_empty() {
        let alloc = Arc::new(PathAllocator::new());
        let root = BaseDir::new(alloc.clone(), leaf_attr(), false);
        let child_base = BaseDir::new(alloc.clone(), leaf_attr(), false);
        let child = EphemeralDir::new(child_base);
        root.link("eph".into(), Entry::Dir(child.clone())).await.unwrap();

        child.mkdir("tmp".into(), 0o755, None, None).await.unwrap();
        child.on_handle_opened();
        child.unlink_at("tmp").await.unwrap();
        // still has one outstanding handle: must not have reclaimed yet
        assert!(root.walk1("eph").await.is_ok());

        child.on_handle_closed().await;
        assert!(root.walk1("eph").await.is_err());
    }

    #[tokio::test]
    async fn link_during_window_cancels_reclaim() {
        let alloc = Arc::new(PathAllocator::new());
        let root = BaseDir::new(alloc.clone(), leaf_attr(), false);
        let child_base = BaseDir::new(alloc.clone(), leaf_attr(), false);
        let child = EphemeralDir::new(child_base);
        root.link("eph".into(), Entry::Dir(child.clone())).await.unwrap();

        child.mkdir("tmp".into(), 0o755, None, None).await.unwrap();
        child.on_handle_opened();
        child.unlink_at("tmp").await.unwrap();
        child.mkdir("again".into(), 0o755, None, None).await.unwrap();
        child.on_handle_closed().await;
        assert!(root.walk1("eph").await.is_ok());
    }
}
