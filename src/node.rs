//! The two node kinds every tree entry is, and the handle type that lets
//! callers hold either without knowing which.

use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;

use crate::attr::{Attr, SetAttr};
use crate::error::FsResult;
use crate::qid::Qid;

/// Mode requested by `Topen`/`Tlopen`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    ReadWrite,
}

impl OpenMode {
    pub fn can_read(self) -> bool {
        matches!(self, OpenMode::Read | OpenMode::ReadWrite)
    }

    pub fn can_write(self) -> bool {
        matches!(self, OpenMode::Write | OpenMode::ReadWrite)
    }
}

/// A single entry as returned by `Readdir`.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub qid: Qid,
}

/// Interior node: a directory whose children live in a [`crate::file_table::FileTable`].
#[async_trait]
pub trait Directory: Send + Sync {
    fn qid(&self) -> Qid;
    async fn get_attr(&self) -> FsResult<Attr>;
    async fn set_attr(&self, set: &SetAttr) -> FsResult<()>;
    fn parent(&self) -> Option<Arc<dyn Directory>>;
    fn set_parent(&self, parent: Weak<dyn Directory>, name: String);
    fn name(&self) -> String;

    /// Resolves one path component. `".."` is handled by the generic walk
    /// driver in [`crate::directory::walk_path`], not here.
    async fn walk1(&self, name: &str) -> FsResult<Entry>;

    /// Links `entry` under `name`, failing with `EEXIST` on collision or
    /// `EACCES` if this directory restricts what kinds of children it
    /// accepts (e.g. `Listener` only accepting `ProtocolDir`s).
    async fn link(&self, name: String, entry: Entry) -> FsResult<()>;

    async fn unlink_at(&self, name: &str) -> FsResult<()>;

    async fn mkdir(
        &self,
        name: String,
        perm: u32,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> FsResult<Arc<dyn Directory>>;

    async fn mknod(
        &self,
        name: String,
        perm: u32,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> FsResult<Arc<dyn FileLeaf>>;

    async fn readdir(&self, offset: usize, count: usize) -> FsResult<Vec<DirEntry>>;

    async fn rename_at(
        &self,
        old_name: &str,
        new_dir: &Arc<dyn Directory>,
        new_name: &str,
    ) -> FsResult<()>;

    /// `true` for directories constructed `WithoutRename`.
    fn rename_disabled(&self) -> bool {
        false
    }

    /// Called when a `Walk([])` clone of this directory is closed. Only
    /// [`crate::ephemeral::EphemeralDir`] gives this teeth.
    async fn on_handle_closed(&self) {}

    /// Called on each `Walk([])` clone.
    fn on_handle_opened(&self) {}
}

/// Leaf node: a regular, write-only, or append-only file.
#[async_trait]
pub trait FileLeaf: Send + Sync {
    fn qid(&self) -> Qid;
    async fn get_attr(&self) -> FsResult<Attr>;
    async fn set_attr(&self, set: &SetAttr) -> FsResult<()>;
    fn parent(&self) -> Option<Arc<dyn Directory>>;
    fn set_parent(&self, parent: Weak<dyn Directory>, name: String);
    fn name(&self) -> String;

    async fn open(&self, mode: OpenMode) -> FsResult<()>;
    async fn read_at(&self, offset: u64, count: u32) -> FsResult<Vec<u8>>;
    async fn write_at(&self, offset: u64, data: &[u8]) -> FsResult<u32>;
    async fn fsync(&self) -> FsResult<()>;
    async fn close(&self) -> FsResult<()>;

    /// Invoked by the parent's `UnlinkAt` when this leaf implements
    /// detach-on-unlink behaviour. Default: no-op.
    async fn detach(&self) -> FsResult<()> {
        Ok(())
    }
}

/// Either half of the tree, held uniformly wherever code walks the tree
/// without caring which kind it found.
#[derive(Clone)]
pub enum Entry {
    Dir(Arc<dyn Directory>),
    File(Arc<dyn FileLeaf>),
}

impl fmt::Debug for dyn Directory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Directory").field("name", &self.name()).finish()
    }
}

impl fmt::Debug for dyn FileLeaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileLeaf").field("name", &self.name()).finish()
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entry::Dir(d) => f.debug_tuple("Dir").field(d).finish(),
            Entry::File(file) => f.debug_tuple("File").field(file).finish(),
        }
    }
}

impl Entry {
    pub fn qid(&self) -> Qid {
        match self {
            Entry::Dir(d) => d.qid(),
            Entry::File(f) => f.qid(),
        }
    }

    pub async fn get_attr(&self) -> FsResult<Attr> {
        match self {
            Entry::Dir(d) => d.get_attr().await,
            Entry::File(f) => f.get_attr().await,
        }
    }

    pub fn parent(&self) -> Option<Arc<dyn Directory>> {
        match self {
            Entry::Dir(d) => d.parent(),
            Entry::File(f) => f.parent(),
        }
    }

    pub fn set_parent(&self, parent: Weak<dyn Directory>, name: String) {
        match self {
            Entry::Dir(d) => d.set_parent(parent, name),
            Entry::File(f) => f.set_parent(parent, name),
        }
    }

    pub fn name(&self) -> String {
        match self {
            Entry::Dir(d) => d.name(),
            Entry::File(f) => f.name(),
        }
    }

    pub fn as_dir(&self) -> Option<Arc<dyn Directory>> {
        match self {
            Entry::Dir(d) => Some(d.clone()),
            Entry::File(_) => None,
        }
    }

    pub fn as_file(&self) -> Option<Arc<dyn FileLeaf>> {
        match self {
            Entry::File(f) => Some(f.clone()),
            Entry::Dir(_) => None,
        }
    }

    pub async fn detach(&self) -> FsResult<()> {
        match self {
            Entry::File(f) => f.detach().await,
            Entry::Dir(_) => Ok(()),
        }
    }
}
