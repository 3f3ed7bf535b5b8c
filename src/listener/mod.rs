//! Listener subtree: a directory path is a listen address, the terminal
//! leaf is the socket, accepted connections appear as files.

pub mod multiaddr;
pub mod tracked;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};

use async_trait::async_trait;
use tokio::net::{TcpListener, UnixListener};
use tracing::{info, warn};

use crate::attr::{Attr, ModeType, SetAttr, Timestamp};
use crate::cancel::CancelScope;
use crate::directory::DirCore;
use crate::error::{Errno, Error, FsResult};
use crate::node::{DirEntry, Directory, Entry, FileLeaf, OpenMode};
use crate::qid::{PathAllocator, Qid, QidKind};
use multiaddr::{is_known_protocol, is_path_typed, is_valid_value, Multiaddr};

/// Emitted on successful `Mknod("listener")`.
pub struct ListenerHandle {
    pub maddr: Multiaddr,
    pub qid: Qid,
}

type Emit = async_channel::Sender<ListenerHandle>;

fn child_attr(alloc: &Arc<PathAllocator>, parent_attr: &Attr) -> Attr {
    let _ = alloc;
    Attr::new_inheriting(ModeType::Directory, parent_attr.perm, None, None, Some(parent_attr))
}

// Each of `ListenerRoot`/`ProtocolDir`/`ValueDir` delegates the common
// `Directory` operations straight to its `DirCore` and overrides only
// `Mkdir`/`Mknod` — the same composition-over-inheritance shape as
// `BaseDir` and the mount subtree's `HostFile`/`GuestFile`.

/// `listeners/`: Mkdir validates a protocol token and creates a
/// [`ProtocolDir`].
pub struct ListenerRoot {
    core: DirCore,
    emit: Emit,
    scope: CancelScope,
    self_weak: StdMutex<Weak<dyn Directory>>,
}

impl ListenerRoot {
    /// `scope` gates new listener provisioning: once cancelled, no further
    /// protocol/value directories or `listener` leaves can be created
    pub fn new(alloc: Arc<PathAllocator>, attr: Attr, emit: Emit, scope: CancelScope) -> Arc<dyn Directory> {
        Arc::new_cyclic(|weak: &Weak<ListenerRoot>| ListenerRoot {
            core: DirCore::new(alloc, attr, false),
            emit,
            scope,
            self_weak: StdMutex::new(weak.clone() as Weak<dyn Directory>),
        })
    }

    fn weak(&self) -> Weak<dyn Directory> {
        self.self_weak.lock().unwrap().clone()
    }
}

#[async_trait]
impl Directory for ListenerRoot {
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

    async fn mkdir(
        &self,
        name: String,
        perm: u32,
        _uid: Option<u32>,
        _gid: Option<u32>,
    ) -> FsResult<Arc<dyn Directory>> {
        if self.scope.is_cancelled() {
            return Err(Error::new(Errno::Io));
        }
        if !is_known_protocol(&name) {
            return Err(Error::new(Errno::Access));
        }
        let parent_attr = self.core.get_attr().await?;
        let mut attr = child_attr(self.core.alloc(), &parent_attr);
        attr.perm = perm;
        let child = ProtocolDir::new(self.core.alloc().clone(), attr, name.clone(), vec![], self.emit.clone(), self.scope.clone());
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
}

/// One protocol hop in the multiaddr chain, e.g. `ip4` or `tcp`. Mkdir
/// validates the child name as a legal value for this protocol and
/// creates a [`ValueDir`].
pub struct ProtocolDir {
    core: DirCore,
    protocol: String,
    chain_so_far: Vec<(String, String)>,
    emit: Emit,
    scope: CancelScope,
    self_weak: StdMutex<Weak<dyn Directory>>,
}

impl ProtocolDir {
    fn new(
        alloc: Arc<PathAllocator>,
        attr: Attr,
        protocol: String,
        chain_so_far: Vec<(String, String)>,
        emit: Emit,
        scope: CancelScope,
    ) -> Arc<dyn Directory> {
        Arc::new_cyclic(|weak: &Weak<ProtocolDir>| ProtocolDir {
            core: DirCore::new(alloc, attr, false),
            protocol,
            chain_so_far,
            emit,
            scope,
            self_weak: StdMutex::new(weak.clone() as Weak<dyn Directory>),
        })
    }

    fn weak(&self) -> Weak<dyn Directory> {
        self.self_weak.lock().unwrap().clone()
    }
}

#[async_trait]
impl Directory for ProtocolDir {
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

    async fn mkdir(
        &self,
        name: String,
        perm: u32,
        _uid: Option<u32>,
        _gid: Option<u32>,
    ) -> FsResult<Arc<dyn Directory>> {
        if self.scope.is_cancelled() {
            return Err(Error::new(Errno::Io));
        }
        if !is_path_typed(&self.protocol) && !is_valid_value(&self.protocol, &name) {
            return Err(Error::new(Errno::Access));
        }
        let parent_attr = self.core.get_attr().await?;
        let mut attr = child_attr(self.core.alloc(), &parent_attr);
        attr.perm = perm;
        let mut chain = self.chain_so_far.clone();
        chain.push((self.protocol.clone(), name.clone()));
        let child = ValueDir::new(self.core.alloc().clone(), attr, chain, self.emit.clone(), self.scope.clone());
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
}

/// A complete value in the multiaddr chain, e.g. `127.0.0.1` or `1564`.
/// Either a pass-through to a nested [`ProtocolDir`] (deeper multiaddr
/// components) or terminal: the only directory that can `Mknod` a
/// `listener` file, with a lazily-created `connections/` sibling.
pub struct ValueDir {
    core: DirCore,
    chain: Vec<(String, String)>,
    emit: Emit,
    scope: CancelScope,
    conn_counter: AtomicU64,
    self_weak: StdMutex<Weak<ValueDir>>,
}

impl ValueDir {
    fn new(
        alloc: Arc<PathAllocator>,
        attr: Attr,
        chain: Vec<(String, String)>,
        emit: Emit,
        scope: CancelScope,
    ) -> Arc<dyn Directory> {
        Arc::new_cyclic(|weak: &Weak<ValueDir>| ValueDir {
            core: DirCore::new(alloc, attr, false),
            chain,
            emit,
            scope,
            conn_counter: AtomicU64::new(0),
            self_weak: StdMutex::new(weak.clone()),
        })
    }

    fn weak(&self) -> Weak<dyn Directory> {
        self.self_weak.lock().unwrap().clone() as Weak<dyn Directory>
    }

    fn self_arc(&self) -> Option<Arc<ValueDir>> {
        self.self_weak.lock().unwrap().upgrade()
    }

    async fn connections_dir(&self) -> FsResult<Arc<dyn Directory>> {
        if let Ok(Entry::Dir(d)) = self.core.walk1("connections").await {
            return Ok(d);
        }
        let attr = self.core.get_attr().await?;
        let dir = crate::directory::BaseDir::new(self.core.alloc().clone(), attr, false);
        match self.core.link("connections".to_string(), Entry::Dir(dir.clone()), self.weak()).await {
            Ok(()) => Ok(dir),
            Err(_) => self.core.walk1("connections").await?.as_dir().ok_or_else(|| Error::new(Errno::Io)),
        }
    }

    /// Spawns the accept loop for `listener`, creating a `ConnFile` under
    /// `connections/` for each accepted connection. `scope` cancelling
    /// breaks the loop and drops `listener`, closing the bound socket.
    async fn spawn_tcp_accept_loop(self: Arc<Self>, listener: TcpListener, maddr_str: String, scope: CancelScope) {
        let this = self;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = scope.cancelled() => break,
                    accepted = listener.accept() => {
                        let (stream, remote) = match accepted {
                            Ok(pair) => pair,
                            Err(e) => {
                                warn!(error = %e, maddr = %maddr_str, "accept failed");
                                break;
                            }
                        };
                        let local = stream.local_addr().map(|a| a.to_string()).unwrap_or_default();
                        let tracked = tracked::TrackedConn::new(stream, local, remote.to_string());
                        this.clone().register_connection(tracked).await;
                    }
                }
            }
        });
    }

    async fn spawn_unix_accept_loop(self: Arc<Self>, listener: UnixListener, path: String, scope: CancelScope) {
        let this = self;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = scope.cancelled() => break,
                    accepted = listener.accept() => {
                        let (stream, _addr) = match accepted {
                            Ok(pair) => pair,
                            Err(e) => {
                                warn!(error = %e, unix_path = %path, "accept failed");
                                break;
                            }
                        };
                        let tracked = tracked::TrackedConn::new(stream, path.clone(), String::new());
                        this.clone().register_connection(tracked).await;
                    }
                }
            }
        });
    }

    async fn register_connection<S>(self: Arc<Self>, tracked: tracked::TrackedConn<S>)
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let id = self.conn_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let conns = match self.connections_dir().await {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "failed to materialize connections directory");
                return;
            }
        };
        let attr = match conns.get_attr().await {
            Ok(a) => a,
            Err(_) => return,
        };
        let scope = CancelScope::new();
        let conn_file = ConnFile::new(
            self.core.alloc().clone(),
            attr,
            id,
            tracked.local.clone(),
            tracked.remote.clone(),
            scope.clone(),
        );
        let name = id.to_string();
        if conns.link(name.clone(), Entry::File(conn_file.clone())).await.is_err() {
            return;
        }
        info!(id, local = %tracked.local, remote = %tracked.remote, "accepted connection");

        // We don't relay application bytes (out of scope); detect peer
        // close by reading to EOF/error, or an explicit unlink cancelling
        // `scope`, and drop `tracked` either way to close the socket.
        let conns = conns.clone();
        tokio::spawn(async move {
            let mut tracked = tracked;
            let mut buf = [0u8; 256];
            loop {
                tokio::select! {
                    _ = scope.cancelled() => break,
                    res = tokio::io::AsyncReadExt::read(&mut tracked, &mut buf) => {
                        match res {
                            Ok(0) | Err(_) => break,
                            Ok(_) => continue,
                        }
                    }
                }
            }
            let _ = conns.unlink_at(&name).await;
        });
    }
}

#[async_trait]
impl Directory for ValueDir {
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

    async fn mkdir(
        &self,
        name: String,
        perm: u32,
        _uid: Option<u32>,
        _gid: Option<u32>,
    ) -> FsResult<Arc<dyn Directory>> {
        if self.scope.is_cancelled() {
            return Err(Error::new(Errno::Io));
        }
        if !is_known_protocol(&name) {
            return Err(Error::new(Errno::Access));
        }
        let parent_attr = self.core.get_attr().await?;
        let mut attr = child_attr(self.core.alloc(), &parent_attr);
        attr.perm = perm;
        let child = ProtocolDir::new(
            self.core.alloc().clone(),
            attr,
            name.clone(),
            self.chain.clone(),
            self.emit.clone(),
            self.scope.clone(),
        );
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
        if self.scope.is_cancelled() {
            return Err(Error::new(Errno::Io));
        }
        if name != "listener" {
            return Err(Error::new(Errno::Access));
        }
        let maddr = Multiaddr::from_components(self.chain.clone());
        let self_arc = self.self_arc().ok_or_else(|| Error::new(Errno::Io))?;
        let listener_scope = CancelScope::new();

        let (maddr_str, unix_path, unix_parent_dir) = if let Some(addr) = maddr.tcp_socket_addr() {
            let listener = TcpListener::bind(addr).await.map_err(Error::from)?;
            let bound = listener.local_addr().map_err(Error::from)?;
            let mut resolved = maddr.clone();
            if let Some(last) = resolved.components.last_mut() {
                if last.0 == "tcp" {
                    last.1 = bound.port().to_string();
                }
            }
            let s = resolved.to_string();
            self_arc.clone().spawn_tcp_accept_loop(listener, s.clone(), listener_scope.clone()).await;
            (s, None, None)
        } else if let Some(path) = maddr.unix_path() {
            let parent_dir = std::path::Path::new(path).parent().map(|d| d.to_path_buf());
            if let Some(dir) = &parent_dir {
                tokio::fs::create_dir_all(dir).await.ok();
            }
            let listener = UnixListener::bind(path).map_err(Error::from)?;
            self_arc
                .clone()
                .spawn_unix_accept_loop(listener, path.to_string(), listener_scope.clone())
                .await;
            (maddr.to_string(), Some(PathBuf::from(path)), parent_dir)
        } else {
            return Err(Error::new(Errno::Io));
        };

        let parent_attr = self.core.get_attr().await?;
        let attr = Attr::new_inheriting(ModeType::Regular, perm, uid, gid, Some(&parent_attr));
        let file = ListenerFile::new(
            self.core.alloc().clone(),
            attr,
            maddr_str,
            listener_scope,
            unix_path,
            unix_parent_dir,
        );
        self.core.link(name, Entry::File(file.clone()), self.weak()).await?;

        let _ = self.emit.send(ListenerHandle { maddr, qid: file.qid() }).await;
        Ok(file)
    }
}

/// Terminal leaf: read-only, serves the listener's bound multiaddress.
/// `detach` (called from `unlink_at`) cancels `scope`, which stops the
/// accept loop and drops its bound socket, and for unix listeners removes
/// the socket path and the directory created to hold it.
pub struct ListenerFile {
    qid: Qid,
    attr: StdMutex<Attr>,
    maddr_str: String,
    scope: CancelScope,
    unix_path: Option<PathBuf>,
    unix_parent_dir: Option<PathBuf>,
    detached: AtomicBool,
    parent: StdMutex<Option<Weak<dyn Directory>>>,
    name: StdMutex<String>,
}

impl ListenerFile {
    fn new(
        alloc: Arc<PathAllocator>,
        attr: Attr,
        maddr_str: String,
        scope: CancelScope,
        unix_path: Option<PathBuf>,
        unix_parent_dir: Option<PathBuf>,
    ) -> Arc<ListenerFile> {
        Arc::new(ListenerFile {
            qid: alloc.qid(QidKind::Regular),
            attr: StdMutex::new(attr),
            maddr_str,
            scope,
            unix_path,
            unix_parent_dir,
            detached: AtomicBool::new(false),
            parent: StdMutex::new(None),
            name: StdMutex::new(String::new()),
        })
    }
}

#[async_trait]
impl FileLeaf for ListenerFile {
    fn qid(&self) -> Qid {
        self.qid
    }
    async fn get_attr(&self) -> FsResult<Attr> {
        let mut attr = self.attr.lock().unwrap().clone();
        attr.size = self.maddr_str.len() as u64;
        Ok(attr)
    }
    async fn set_attr(&self, set: &SetAttr) -> FsResult<()> {
        self.attr.lock().unwrap().apply(set);
        Ok(())
    }
    fn parent(&self) -> Option<Arc<dyn Directory>> {
        self.parent.lock().unwrap().as_ref().and_then(Weak::upgrade)
    }
    fn set_parent(&self, parent: Weak<dyn Directory>, name: String) {
        *self.parent.lock().unwrap() = Some(parent);
        *self.name.lock().unwrap() = name;
    }
    fn name(&self) -> String {
        self.name.lock().unwrap().clone()
    }
    async fn open(&self, mode: OpenMode) -> FsResult<()> {
        if mode != OpenMode::Write {
            return Err(Error::new(Errno::Access));
        }
        Ok(())
    }
    async fn read_at(&self, offset: u64, count: u32) -> FsResult<Vec<u8>> {
        let bytes = self.maddr_str.as_bytes();
        let offset = offset as usize;
        if offset >= bytes.len() {
            return Ok(Vec::new());
        }
        let end = (offset + count as usize).min(bytes.len());
        Ok(bytes[offset..end].to_vec())
    }
    async fn write_at(&self, _offset: u64, _data: &[u8]) -> FsResult<u32> {
        Err(Error::new(Errno::Access))
    }
    async fn fsync(&self) -> FsResult<()> {
        Ok(())
    }
    async fn close(&self) -> FsResult<()> {
        Ok(())
    }
    async fn detach(&self) -> FsResult<()> {
        if self.detached.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.scope.cancel();
        if let Some(path) = &self.unix_path {
            let _ = tokio::fs::remove_file(path).await;
        }
        if let Some(dir) = &self.unix_parent_dir {
            let _ = tokio::fs::remove_dir(dir).await;
        }
        Ok(())
    }
}

/// `connections/<id>`: read-only JSON snapshot of one accepted connection.
/// `detach` cancels `scope`, which breaks the reader task's select loop and
/// drops the accepted socket, closing it.
pub struct ConnFile {
    qid: Qid,
    attr: StdMutex<Attr>,
    id: u64,
    local: String,
    remote: String,
    scope: CancelScope,
    detached: AtomicBool,
    parent: StdMutex<Option<Weak<dyn Directory>>>,
    name: StdMutex<String>,
}

impl ConnFile {
    fn new(
        alloc: Arc<PathAllocator>,
        attr: Attr,
        id: u64,
        local: String,
        remote: String,
        scope: CancelScope,
    ) -> Arc<ConnFile> {
        Arc::new(ConnFile {
            qid: alloc.qid(QidKind::Regular),
            attr: StdMutex::new(attr),
            id,
            local,
            remote,
            scope,
            detached: AtomicBool::new(false),
            parent: StdMutex::new(None),
            name: StdMutex::new(String::new()),
        })
    }

    fn payload(&self) -> Vec<u8> {
        let now = Timestamp::now();
        serde_json::to_vec(&serde_json::json!({
            "#": self.id,
            "local": self.local,
            "remote": self.remote,
            "lastRead": now.seconds,
            "lastWrite": now.seconds,
        }))
        .unwrap_or_default()
    }
}

#[async_trait]
impl FileLeaf for ConnFile {
    fn qid(&self) -> Qid {
        self.qid
    }
    async fn get_attr(&self) -> FsResult<Attr> {
        let mut attr = self.attr.lock().unwrap().clone();
        attr.size = self.payload().len() as u64;
        Ok(attr)
    }
    async fn set_attr(&self, set: &SetAttr) -> FsResult<()> {
        self.attr.lock().unwrap().apply(set);
        Ok(())
    }
    fn parent(&self) -> Option<Arc<dyn Directory>> {
        self.parent.lock().unwrap().as_ref().and_then(Weak::upgrade)
    }
    fn set_parent(&self, parent: Weak<dyn Directory>, name: String) {
        *self.parent.lock().unwrap() = Some(parent);
        *self.name.lock().unwrap() = name;
    }
    fn name(&self) -> String {
        self.name.lock().unwrap().clone()
    }
    async fn open(&self, mode: OpenMode) -> FsResult<()> {
        if mode != OpenMode::Read {
            return Err(Error::new(Errno::Access));
        }
        Ok(())
    }
    async fn read_at(&self, offset: u64, count: u32) -> FsResult<Vec<u8>> {
        let bytes = self.payload();
        let offset = offset as usize;
        if offset >= bytes.len() {
            return Ok(Vec::new());
        }
        let end = (offset + count as usize).min(bytes.len());
        Ok(bytes[offset..end].to_vec())
    }
    async fn write_at(&self, _offset: u64, _data: &[u8]) -> FsResult<u32> {
        Err(Error::new(Errno::Access))
    }
    async fn fsync(&self) -> FsResult<()> {
        Ok(())
    }
    async fn close(&self) -> FsResult<()> {
        Ok(())
    }
    async fn detach(&self) -> FsResult<()> {
        if self.detached.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.scope.cancel();
        Ok(())
    }
}

/// Recursively enumerates every `listener` file under `root`, fanning
/// out one task per subdirectory.
pub async fn get_listeners(root: &Arc<dyn Directory>) -> FsResult<Vec<String>> {
    let mut join_set = tokio::task::JoinSet::new();
    spawn_listener_scan(root.clone(), &mut join_set);
    let mut out = Vec::new();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(Ok(names)) => out.extend(names),
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(Error::new(Errno::Io)),
        }
    }
    Ok(out)
}

fn spawn_listener_scan(dir: Arc<dyn Directory>, join_set: &mut tokio::task::JoinSet<FsResult<Vec<String>>>) {
    join_set.spawn(async move {
        let mut names = Vec::new();
        let mut inner = tokio::task::JoinSet::new();
        for entry in dir.readdir(0, usize::MAX).await? {
            match dir.walk1(&entry.name).await? {
                Entry::Dir(d) if entry.name != "connections" => spawn_listener_scan(d, &mut inner),
                Entry::File(_) if entry.name == "listener" => names.push(entry.name.clone()),
                _ => {}
            }
        }
        while let Some(joined) = inner.join_next().await {
            match joined {
                Ok(Ok(mut sub)) => names.append(&mut sub),
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(Error::new(Errno::Io)),
            }
        }
        Ok(names)
    });
}

/// Recursively enumerates every `ConnFile` name under `root`.
pub async fn get_connections(root: &Arc<dyn Directory>) -> FsResult<Vec<String>> {
    let mut join_set = tokio::task::JoinSet::new();
    spawn_connection_scan(root.clone(), &mut join_set);
    let mut out = Vec::new();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(Ok(names)) => out.extend(names),
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(Error::new(Errno::Io)),
        }
    }
    Ok(out)
}

fn spawn_connection_scan(dir: Arc<dyn Directory>, join_set: &mut tokio::task::JoinSet<FsResult<Vec<String>>>) {
    join_set.spawn(async move {
        let mut names = Vec::new();
        let mut inner = tokio::task::JoinSet::new();
        for entry in dir.readdir(0, usize::MAX).await? {
            match dir.walk1(&entry.name).await? {
                Entry::Dir(d) if entry.name == "connections" => {
                    for conn in d.readdir(0, usize::MAX).await? {
                        names.push(conn.name.clone());
                    }
                }
                Entry::Dir(d) => spawn_connection_scan(d, &mut inner),
                _ => {}
            }
        }
        while let Some(joined) = inner.join_next().await {
            match joined {
                Ok(Ok(mut sub)) => names.append(&mut sub),
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(Error::new(Errno::Io)),
            }
        }
        Ok(names)
    });
}
