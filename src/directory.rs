//! Generic directory state and the plain directory kind built directly on
//! it.

use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use tracing::warn;

use crate::attr::{Attr, SetAttr};
use crate::error::{Errno, Error, FsResult};
use crate::file_table::FileTable;
use crate::node::{DirEntry, Directory, Entry, FileLeaf};
use crate::qid::{PathAllocator, Qid, QidKind};

/// State shared by every directory kind: identity, children, attributes,
/// and the non-owning link back to the parent (a `Weak` to avoid the
/// reference cycle a strong parent pointer would create).
pub struct DirCore {
    qid: Qid,
    alloc: Arc<PathAllocator>,
    children: FileTable,
    attr: Mutex<Attr>,
    parent: Mutex<Option<Weak<dyn Directory>>>,
    name: Mutex<String>,
    rename_disabled: bool,
}

impl DirCore {
    pub fn new(alloc: Arc<PathAllocator>, attr: Attr, rename_disabled: bool) -> Self {
        let qid = alloc.qid(QidKind::Directory);
        DirCore {
            qid,
            alloc,
            children: FileTable::new(),
            attr: Mutex::new(attr),
            parent: Mutex::new(None),
            name: Mutex::new(String::new()),
            rename_disabled,
        }
    }

    pub fn qid(&self) -> Qid {
        self.qid
    }

    pub fn alloc(&self) -> &Arc<PathAllocator> {
        &self.alloc
    }

    pub fn children(&self) -> &FileTable {
        &self.children
    }

    pub async fn get_attr(&self) -> FsResult<Attr> {
        Ok(self.attr.lock().unwrap().clone())
    }

    pub async fn set_attr(&self, set: &SetAttr) -> FsResult<()> {
        self.attr.lock().unwrap().apply(set);
        Ok(())
    }

    pub fn parent(&self) -> Option<Arc<dyn Directory>> {
        self.parent.lock().unwrap().as_ref().and_then(Weak::upgrade)
    }

    pub fn set_parent(&self, parent: Weak<dyn Directory>, name: String) {
        *self.parent.lock().unwrap() = Some(parent);
        *self.name.lock().unwrap() = name;
    }

    pub fn name(&self) -> String {
        self.name.lock().unwrap().clone()
    }

    pub fn rename_disabled(&self) -> bool {
        self.rename_disabled
    }

    pub async fn walk1(&self, name: &str) -> FsResult<Entry> {
        self.children.get(name).ok_or_else(|| Error::new(Errno::NoEnt))
    }

    pub async fn link(&self, name: String, entry: Entry, self_weak: Weak<dyn Directory>) -> FsResult<()> {
        entry.set_parent(self_weak, name.clone());
        self.children.insert(name, entry)
    }

    pub async fn unlink_at(&self, name: &str) -> FsResult<()> {
        if let Some(Entry::Dir(d)) = self.children.get(name) {
            if d.readdir(0, 1).await?.len() > 0 {
                return Err(Error::new(Errno::NotEmpty));
            }
        }
        let entry = self.children.remove(name)?;
        entry.detach().await?;
        Ok(())
    }

    pub async fn readdir(&self, offset: usize, count: usize) -> FsResult<Vec<DirEntry>> {
        Ok(self
            .children
            .list(offset, count)
            .into_iter()
            .map(|(name, entry)| DirEntry { name, qid: entry.qid() })
            .collect())
    }

    /// Moves `old_name` to `new_name` under `new_dir`. Removes the source
    /// link before creating the destination one, so a failing `link` (e.g.
    /// `EEXIST` at the destination) leaves `old_name` exactly where it was
    /// rather than linked at both locations: `link` can observably repoint
    /// the entry's parent before its own insert fails, so a failed move is
    /// rolled back by restoring both the parent pointer and the table entry.
    pub async fn rename_at(
        &self,
        old_name: &str,
        new_dir: &Arc<dyn Directory>,
        new_name: &str,
        self_weak: Weak<dyn Directory>,
    ) -> FsResult<()> {
        if self.rename_disabled {
            return Err(Error::new(Errno::Access));
        }
        let entry = self.children.remove(old_name)?;
        if let Err(e) = new_dir.link(new_name.to_string(), entry.clone()).await {
            entry.set_parent(self_weak, old_name.to_string());
            if self.children.insert(old_name.to_string(), entry).is_err() {
                warn!(old_name, "rename rollback lost the source name to a concurrent writer");
            }
            return Err(e);
        }
        Ok(())
    }
}

/// An ordinary directory with no specialized children: the default kind
/// produced by `Mkdir` outside of the synthetic subtrees that need their
/// own factories (mounts, listeners, control).
pub struct BaseDir {
    core: DirCore,
    self_weak: Mutex<Weak<dyn Directory>>,
}

impl BaseDir {
    pub fn new(alloc: Arc<PathAllocator>, attr: Attr, rename_disabled: bool) -> Arc<dyn Directory> {
        Arc::new_cyclic(|weak: &Weak<BaseDir>| BaseDir {
            core: DirCore::new(alloc, attr, rename_disabled),
            self_weak: Mutex::new(weak.clone() as Weak<dyn Directory>),
        })
    }

    fn weak(&self) -> Weak<dyn Directory> {
        self.self_weak.lock().unwrap().clone()
    }
}

#[async_trait]
impl Directory for BaseDir {
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
        let parent_attr = self.core.get_attr().await?;
        let attr = Attr::new_inheriting(
            crate::attr::ModeType::Directory,
            perm,
            uid,
            gid,
            Some(&parent_attr),
        );
        let child = BaseDir::new(self.core.alloc().clone(), attr, false);
        self.core.link(name, Entry::Dir(child.clone()), self.weak()).await?;
        Ok(child)
    }

    async fn mknod(
        &self,
        name: String,
        perm: u32,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> FsResult<Arc<dyn FileLeaf>> {
        let parent_attr = self.core.get_attr().await?;
        let attr = Attr::new_inheriting(
            crate::attr::ModeType::Regular,
            perm,
            uid,
            gid,
            Some(&parent_attr),
        );
        let child = crate::plain_file::PlainFile::new(self.core.alloc().clone(), attr);
        self.core.link(name, Entry::File(child.clone()), self.weak()).await?;
        Ok(child)
    }

    async fn readdir(&self, offset: usize, count: usize) -> FsResult<Vec<DirEntry>> {
        self.core.readdir(offset, count).await
    }

    async fn rename_at(
        &self,
        old_name: &str,
        new_dir: &Arc<dyn Directory>,
        new_name: &str,
    ) -> FsResult<()> {
        self.core.rename_at(old_name, new_dir, new_name, self.weak()).await
    }

    fn rename_disabled(&self) -> bool {
        self.core.rename_disabled()
    }
}

/// Resolves a sequence of path components against a starting entry. An
/// empty name list clones the starting handle with no lookups performed.
/// `".."` climbs to the parent, failing with `ENOENT` at a root.
pub async fn walk_path(start: Entry, names: &[String]) -> FsResult<Entry> {
    if names.is_empty() {
        if let Entry::Dir(d) = &start {
            d.on_handle_opened();
        }
        return Ok(start.clone());
    }
    let mut current = start;
    for name in names {
        let dir = current.as_dir().ok_or_else(|| Error::new(Errno::NotDir))?;
        current = if name == ".." {
            match dir.parent() {
                Some(p) => Entry::Dir(p),
                None => return Err(Error::new(Errno::NoEnt)),
            }
        } else {
            dir.walk1(name).await?
        };
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::ModeType;

    fn root() -> Arc<dyn Directory> {
        let alloc = Arc::new(PathAllocator::new());
        let attr = Attr::new_inheriting(ModeType::Directory, 0o755, Some(0), Some(0), None);
        BaseDir::new(alloc, attr, false)
    }

    #[tokio::test]
    async fn mkdir_then_walk_finds_child() {
        let root = root();
        let child = root.mkdir("sub".into(), 0o755, None, None).await.unwrap();
        let found = root.walk1("sub").await.unwrap();
        assert_eq!(found.qid(), child.qid());
    }

    #[tokio::test]
    async fn walk_empty_clones_handle_without_lookup() {
        let root = root();
        let entry = Entry::Dir(root.clone());
        let cloned = walk_path(entry, &[]).await.unwrap();
        assert_eq!(cloned.qid(), root.qid());
    }

    #[tokio::test]
    async fn dotdot_climbs_to_parent() {
        let root = root();
        root.mkdir("sub".into(), 0o755, None, None).await.unwrap();
        let sub = root.walk1("sub").await.unwrap();
        let back = walk_path(sub, &[".."].map(String::from)).await.unwrap();
        assert_eq!(back.qid(), root.qid());
    }

    #[tokio::test]
    async fn duplicate_mkdir_fails_with_eexist() {
        let root = root();
        root.mkdir("sub".into(), 0o755, None, None).await.unwrap();
        let err = root.mkdir("sub".into(), 0o755, None, None).await.unwrap_err();
        assert_eq!(err.errno, Errno::Exist);
    }

    #[tokio::test]
    async fn unlink_nonempty_dir_fails() {
        let root = root();
        root.mkdir("sub".into(), 0o755, None, None).await.unwrap();
        let sub = root.walk1("sub").await.unwrap().as_dir().unwrap();
        sub.mkdir("leaf".into(), 0o755, None, None).await.unwrap();
        let err = root.unlink_at("sub").await.unwrap_err();
        assert_eq!(err.errno, Errno::NotEmpty);
    }
}
