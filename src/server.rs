//! The 9P2000.L network server: accepts connections, frames and dispatches
//! messages against the file tree, and supports graceful shutdown with
//! connection tracking.
//! Grounded on the `rs9p` crate's `dispatch`/`dispatch_once`/`srv_async_*`
//! shape (`other_examples/`) for the accept-loop/fid-table outline, but
//! written against this codebase's own stack: `crate::wire` instead of
//! `bytes`/`tokio_util::codec`, and `crate::listener::tracked::TrackedConn`
//! (already built for the listener subtree) instead of a bespoke tracker.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, UnixListener};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::attr::{ModeType, SetAttr, Timestamp};
use crate::cancel::CancelScope;
use crate::directory::walk_path;
use crate::error::{Errno, Error, FsResult};
use crate::listener::multiaddr::Multiaddr;
use crate::listener::tracked::TrackedConn;
use crate::node::{Directory, Entry, OpenMode};
use crate::wire::{self, FCall, Msg, RGetAttr, WireDirEntry, WireQid};

/// The largest `msize` this daemon will agree to.
const MAX_MSIZE: u32 = 1 << 20;

/// Returned by [`Server::serve`] when the accept loop ends because the
/// server is shutting down, or because the listener's backing file (a unix
/// socket path) was removed out from under it — both are graceful, expected
/// stops, not failures.
#[derive(Debug)]
pub struct ErrServerClosed;

impl std::fmt::Display for ErrServerClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("server closed")
    }
}

impl std::error::Error for ErrServerClosed {}

#[derive(Debug)]
pub enum ServeError {
    Closed,
    Io(std::io::Error),
}

impl std::fmt::Display for ServeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServeError::Closed => write!(f, "{}", ErrServerClosed),
            ServeError::Io(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ServeError {}

/// Any duplex byte stream a transport can hand us. `Box<dyn Conn>` gets
/// `AsyncRead`/`AsyncWrite` for free from tokio's blanket impls over boxed
/// trait objects, so `TrackedConn<Box<dyn Conn>>` works without a bespoke
/// enum per transport kind.
pub trait Conn: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Conn for T {}

/// A bound socket this daemon listens for 9P traffic on, distinct from the listener *subtree* which hands out
/// arbitrary sockets on a client's behalf.
pub enum Transport {
    Tcp(TcpListener),
    Unix { listener: UnixListener, path: PathBuf },
}

impl Transport {
    pub async fn bind(maddr: &Multiaddr) -> FsResult<Self> {
        if let Some(addr) = maddr.tcp_socket_addr() {
            let listener = TcpListener::bind(addr).await.map_err(Error::from)?;
            return Ok(Transport::Tcp(listener));
        }
        if let Some(path) = maddr.unix_path() {
            if let Some(dir) = std::path::Path::new(path).parent() {
                tokio::fs::create_dir_all(dir).await.ok();
            }
            let listener = UnixListener::bind(path).map_err(Error::from)?;
            return Ok(Transport::Unix { listener, path: PathBuf::from(path) });
        }
        Err(Error::new(Errno::Inval))
    }

    async fn accept(&self) -> std::io::Result<(Box<dyn Conn>, String, String)> {
        match self {
            Transport::Tcp(listener) => {
                let (stream, remote) = listener.accept().await?;
                let local = stream.local_addr().map(|a| a.to_string()).unwrap_or_default();
                Ok((Box::new(stream), local, remote.to_string()))
            }
            Transport::Unix { listener, path } => {
                let (stream, _) = listener.accept().await?;
                Ok((Box::new(stream), path.display().to_string(), String::new()))
            }
        }
    }

    /// True once the listener's own backing resource has disappeared: for
    /// a unix socket, the bound path no longer exists.
    fn backing_file_gone(&self) -> bool {
        match self {
            Transport::Tcp(_) => false,
            Transport::Unix { path, .. } => !path.exists(),
        }
    }
}

struct FidEntry {
    entry: Entry,
    open_mode: Option<OpenMode>,
    /// Set when this fid was produced by `Twalk` with no path components —
    /// the handle-count "clone" that `EphemeralDir` reclaim tracks.
    empty_walk_clone: bool,
}

/// Per-connection 9P session state: the fid table and the negotiated
/// `msize`.
struct Session {
    root: Arc<dyn Directory>,
    fids: Mutex<HashMap<u32, FidEntry>>,
    msize: AtomicU32,
}

impl Session {
    fn new(root: Arc<dyn Directory>) -> Self {
        Session { root, fids: Mutex::new(HashMap::new()), msize: AtomicU32::new(MAX_MSIZE) }
    }

    fn get(&self, fid: u32) -> FsResult<Entry> {
        self.fids.lock().unwrap().get(&fid).map(|f| f.entry.clone()).ok_or_else(|| Error::new(Errno::BadF))
    }

    fn open_mode(&self, fid: u32) -> Option<OpenMode> {
        self.fids.lock().unwrap().get(&fid).and_then(|f| f.open_mode)
    }

    fn insert(&self, fid: u32, entry: Entry, empty_walk_clone: bool) {
        self.fids.lock().unwrap().insert(fid, FidEntry { entry, open_mode: None, empty_walk_clone });
    }

    fn set_open_mode(&self, fid: u32, mode: OpenMode) {
        if let Some(f) = self.fids.lock().unwrap().get_mut(&fid) {
            f.open_mode = Some(mode);
        }
    }

    async fn clunk(&self, fid: u32) {
        let removed = self.fids.lock().unwrap().remove(&fid);
        if let Some(f) = removed {
            if f.empty_walk_clone {
                if let Entry::Dir(d) = &f.entry {
                    d.on_handle_closed().await;
                }
            }
        }
    }
}

fn mode_from_flags(flags: u32) -> OpenMode {
    match flags & 0x3 {
        0 => OpenMode::Read,
        1 => OpenMode::Write,
        _ => OpenMode::ReadWrite,
    }
}

fn attr_mode_bits(mode_type: ModeType, perm: u32) -> u32 {
    let type_bits = match mode_type {
        ModeType::Directory => 0o040000,
        ModeType::Regular => 0o100000,
    };
    type_bits | (perm & 0o7777)
}

async fn entry_set_attr(entry: &Entry, set: &SetAttr) -> FsResult<()> {
    match entry {
        Entry::Dir(d) => d.set_attr(set).await,
        Entry::File(f) => f.set_attr(set).await,
    }
}

const ATTR_MODE: u32 = 0x0001;
const ATTR_UID: u32 = 0x0002;
const ATTR_GID: u32 = 0x0004;
const ATTR_SIZE: u32 = 0x0008;
const ATTR_ATIME: u32 = 0x0010;
const ATTR_MTIME: u32 = 0x0020;
const ATTR_ATIME_SET: u32 = 0x0080;
const ATTR_MTIME_SET: u32 = 0x0100;

fn set_attr_from_wire(
    valid: u32,
    perm: u32,
    uid: u32,
    gid: u32,
    size: u64,
    atime_sec: u64,
    atime_nsec: u64,
    mtime_sec: u64,
    mtime_nsec: u64,
) -> SetAttr {
    let mut set = SetAttr::default();
    if valid & ATTR_MODE != 0 {
        set.perm = Some(perm);
    }
    if valid & ATTR_UID != 0 {
        set.uid = Some(uid);
    }
    if valid & ATTR_GID != 0 {
        set.gid = Some(gid);
    }
    if valid & ATTR_SIZE != 0 {
        set.size = Some(size);
    }
    if valid & ATTR_ATIME != 0 || valid & ATTR_ATIME_SET != 0 {
        set.atime = Some(Timestamp { seconds: atime_sec as i64, nanos: atime_nsec as u32 });
    }
    if valid & ATTR_MTIME != 0 || valid & ATTR_MTIME_SET != 0 {
        set.mtime = Some(Timestamp { seconds: mtime_sec as i64, nanos: mtime_nsec as u32 });
    }
    set
}

/// Walks `names` from `start`, collecting one wqid per successfully
/// resolved component. Unlike [`crate::directory::walk_path`] (used by
/// directory `Mkdir`/`Mknod` internals, which only ever need the final
/// entry) this also reports the intermediate qids `Rwalk` carries.
async fn collect_walk(start: Entry, names: &[String]) -> FsResult<(Entry, Vec<WireQid>)> {
    if names.is_empty() {
        let cloned = walk_path(start, &[]).await?;
        return Ok((cloned, Vec::new()));
    }
    let mut current = start;
    let mut qids = Vec::with_capacity(names.len());
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
        qids.push(WireQid::from(current.qid()));
    }
    Ok((current, qids))
}

/// Handles one decoded request, returning the reply body. Errors are
/// translated to `Rlerror` by the caller, which alone knows the tag.
async fn dispatch(session: &Session, body: FCall) -> FsResult<FCall> {
    match body {
        FCall::Tversion { msize, version } => {
            session.fids.lock().unwrap().clear();
            let agreed = msize.min(MAX_MSIZE);
            session.msize.store(agreed, Ordering::Relaxed);
            let version = if version == "9P2000.L" { version } else { "unknown".to_string() };
            Ok(FCall::Rversion { msize: agreed, version })
        }
        FCall::Tattach { fid, afid: _, uname: _, aname: _, n_uname: _ } => {
            let root = Entry::Dir(session.root.clone());
            let qid = root.qid();
            session.insert(fid, root, false);
            Ok(FCall::Rattach { qid: qid.into() })
        }
        FCall::Twalk { fid, newfid, wnames } => {
            let start = session.get(fid)?;
            let (landed, qids) = collect_walk(start, &wnames).await?;
            session.insert(newfid, landed, wnames.is_empty());
            Ok(FCall::Rwalk { wqids: qids })
        }
        FCall::Tlopen { fid, flags } => {
            let entry = session.get(fid)?;
            let mode = mode_from_flags(flags);
            if let Entry::File(f) = &entry {
                f.open(mode).await?;
            }
            session.set_open_mode(fid, mode);
            Ok(FCall::Rlopen { qid: entry.qid().into(), iounit: 0 })
        }
        FCall::Tread { fid, offset, count } => {
            let entry = session.get(fid)?;
            let mode = session.open_mode(fid).ok_or_else(|| Error::new(Errno::BadF))?;
            if !mode.can_read() {
                return Err(Error::new(Errno::BadF));
            }
            match entry {
                Entry::File(f) => Ok(FCall::Rread { data: f.read_at(offset, count).await? }),
                Entry::Dir(d) => {
                    let entries = d.readdir(offset as usize, usize::MAX).await?;
                    let wire_entries: Vec<WireDirEntry> = entries
                        .into_iter()
                        .enumerate()
                        .map(|(i, e)| WireDirEntry {
                            qid: e.qid.into(),
                            offset: offset + i as u64 + 1,
                            kind: e.qid.kind.to_wire(),
                            name: e.name,
                        })
                        .collect();
                    let data = wire::encode_dirents(&wire_entries, count as usize)
                        .map_err(|e| Error::with_source(Errno::Io, e))?;
                    Ok(FCall::Rread { data })
                }
            }
        }
        FCall::Twrite { fid, offset, data } => {
            let entry = session.get(fid)?;
            let mode = session.open_mode(fid).ok_or_else(|| Error::new(Errno::BadF))?;
            if !mode.can_write() {
                return Err(Error::new(Errno::BadF));
            }
            let file = entry.as_file().ok_or_else(|| Error::new(Errno::IsDir))?;
            let count = file.write_at(offset, &data).await?;
            Ok(FCall::Rwrite { count })
        }
        FCall::Tclunk { fid } => {
            session.clunk(fid).await;
            Ok(FCall::Rclunk)
        }
        FCall::Tremove { fid } => {
            let entry = session.get(fid)?;
            session.clunk(fid).await;
            let parent = entry.parent().ok_or_else(|| Error::new(Errno::Access))?;
            parent.unlink_at(&entry.name()).await?;
            Ok(FCall::Rremove)
        }
        FCall::Tgetattr { fid, req_mask } => {
            let entry = session.get(fid)?;
            let attr = entry.get_attr().await?;
            Ok(FCall::Rgetattr(Box::new(RGetAttr {
                valid: req_mask,
                qid: entry.qid().into(),
                mode: attr_mode_bits(attr.mode_type, attr.perm),
                uid: attr.uid,
                gid: attr.gid,
                nlink: 1,
                rdev: 0,
                size: attr.size,
                blksize: 4096,
                blocks: (attr.size + 511) / 512,
                atime_sec: attr.atime.seconds as u64,
                atime_nsec: attr.atime.nanos as u64,
                mtime_sec: attr.mtime.seconds as u64,
                mtime_nsec: attr.mtime.nanos as u64,
                ctime_sec: attr.ctime.seconds as u64,
                ctime_nsec: attr.ctime.nanos as u64,
            })))
        }
        FCall::Tsetattr { fid, valid, mode, uid, gid, size, atime_sec, atime_nsec, mtime_sec, mtime_nsec } => {
            let entry = session.get(fid)?;
            let set = set_attr_from_wire(valid, mode & 0o7777, uid, gid, size, atime_sec, atime_nsec, mtime_sec, mtime_nsec);
            entry_set_attr(&entry, &set).await?;
            Ok(FCall::Rsetattr)
        }
        FCall::Trenameat { olddirfid, oldname, newdirfid, newname } => {
            let old_dir = session.get(olddirfid)?.as_dir().ok_or_else(|| Error::new(Errno::NotDir))?;
            let new_dir = session.get(newdirfid)?.as_dir().ok_or_else(|| Error::new(Errno::NotDir))?;
            old_dir.rename_at(&oldname, &new_dir, &newname).await?;
            Ok(FCall::Rrenameat)
        }
        FCall::Tunlinkat { dirfid, name, flags: _ } => {
            let dir = session.get(dirfid)?.as_dir().ok_or_else(|| Error::new(Errno::NotDir))?;
            dir.unlink_at(&name).await?;
            Ok(FCall::Runlinkat)
        }
        FCall::Tmkdir { dfid, name, mode, gid } => {
            let dir = session.get(dfid)?.as_dir().ok_or_else(|| Error::new(Errno::NotDir))?;
            let child = dir.mkdir(name, mode & 0o7777, None, Some(gid)).await?;
            Ok(FCall::Rmkdir { qid: child.qid().into() })
        }
        FCall::Tmknod { dfid, name, mode, major: _, minor: _, gid } => {
            let dir = session.get(dfid)?.as_dir().ok_or_else(|| Error::new(Errno::NotDir))?;
            let child = dir.mknod(name, mode & 0o7777, None, Some(gid)).await?;
            Ok(FCall::Rmknod { qid: child.qid().into() })
        }
        // No node in this tree is ever a symlink ; report honestly rather than fabricate
        // a target.
        FCall::Treadlink { .. } => Err(Error::new(Errno::NoSys)),
        other => {
            warn!(msg_type = ?other.msg_type(), "unexpected request-shaped reply variant");
            Err(Error::new(Errno::Proto))
        }
    }
}

async fn handle_one_message(session: &Session, msg: Msg) -> Msg {
    match dispatch(session, msg.body).await {
        Ok(body) => Msg { tag: msg.tag, body },
        Err(e) => {
            debug!(errno = %e.errno, "request failed");
            Msg { tag: msg.tag, body: FCall::Rlerror { ecode: e.errno.to_raw() } }
        }
    }
}

struct ConnEntry {
    last_read: Arc<Mutex<Timestamp>>,
    last_write: Arc<Mutex<Timestamp>>,
    scope: CancelScope,
}

struct ListenerEntry {
    scope: CancelScope,
    serve_handle: JoinHandle<Result<(), ServeError>>,
}

/// Owns the 9P server's connection registry and shutdown state . One `Server` typically serves every address the daemon was asked
/// to listen on.
pub struct Server {
    root: Arc<dyn Directory>,
    connections: Mutex<HashMap<u64, ConnEntry>>,
    next_conn_id: AtomicU64,
    listeners: Mutex<Vec<ListenerEntry>>,
    closing: AtomicBool,
}

impl Server {
    pub fn new(root: Arc<dyn Directory>) -> Arc<Server> {
        Arc::new(Server {
            root,
            connections: Mutex::new(HashMap::new()),
            next_conn_id: AtomicU64::new(0),
            listeners: Mutex::new(Vec::new()),
            closing: AtomicBool::new(false),
        })
    }

    /// Spawns the accept loop for `transport` and registers it so `Close`/
    /// `Shutdown` can stop it later.
    pub fn spawn_serve(self: &Arc<Self>, transport: Transport) {
        let this = self.clone();
        let scope = CancelScope::new();
        let scope_for_task = scope.clone();
        let handle = tokio::spawn(async move { this.serve(transport, scope_for_task).await });
        self.listeners.lock().unwrap().push(ListenerEntry { scope, serve_handle: handle });
    }

    /// `Serve(listener)`: loops `Accept` → spawn handler per connection
    async fn serve(self: Arc<Self>, transport: Transport, scope: CancelScope) -> Result<(), ServeError> {
        loop {
            tokio::select! {
                _ = scope.cancelled() => return Err(ServeError::Closed),
                accepted = transport.accept() => {
                    match accepted {
                        Ok((stream, local, remote)) => {
                            self.clone().handle(stream, local, remote);
                        }
                        Err(e) => {
                            if self.closing.load(Ordering::SeqCst) || transport.backing_file_gone() {
                                return Err(ServeError::Closed);
                            }
                            warn!(error = %e, "accept failed");
                            return Err(ServeError::Io(e));
                        }
                    }
                }
            }
        }
    }

    /// `Handle(readSide, writeSide)`: wraps the connection in a tracker,
    /// registers it, and runs the request/response loop until EOF, error,
    /// or forced close.
    fn handle(self: Arc<Self>, stream: Box<dyn Conn>, local: String, remote: String) {
        let id = self.next_conn_id.fetch_add(1, Ordering::SeqCst);
        let tracked = TrackedConn::new(stream, local.clone(), remote.clone());
        let (last_read, last_write) = tracked.activity_handles();
        let scope = CancelScope::new();
        self.connections.lock().unwrap().insert(
            id,
            ConnEntry { last_read, last_write, scope: scope.clone() },
        );
        info!(id, %local, %remote, "connection accepted");

        tokio::spawn(async move {
            let session = Session::new(self.root.clone());
            let mut conn = tracked;
            loop {
                let mut size_buf = [0u8; 4];
                tokio::select! {
                    _ = scope.cancelled() => break,
                    res = conn.read_exact(&mut size_buf) => {
                        if res.is_err() {
                            break;
                        }
                    }
                }
                let size = u32::from_le_bytes(size_buf) as usize;
                if size < 7 {
                    break;
                }
                let mut rest = vec![0u8; size - 4];
                if conn.read_exact(&mut rest).await.is_err() {
                    break;
                }
                let reply = match wire::decode(&rest) {
                    Ok(msg) => handle_one_message(&session, msg).await,
                    Err(_) => {
                        let tag = wire::peek_tag(&rest).unwrap_or(wire::NOTAG);
                        Msg { tag, body: FCall::Rlerror { ecode: Errno::Proto.to_raw() } }
                    }
                };
                let bytes = match wire::encode(&reply) {
                    Ok(b) => b,
                    Err(_) => break,
                };
                if conn.write_all(&bytes).await.is_err() {
                    break;
                }
            }
            self.connections.lock().unwrap().remove(&id);
            info!(id, "connection closed");
        });
    }

    fn close_connection(&self, id: u64) {
        if let Some(entry) = self.connections.lock().unwrap().get(&id) {
            entry.scope.cancel();
        }
    }

    fn close_all_connections(&self) {
        for entry in self.connections.lock().unwrap().values() {
            entry.scope.cancel();
        }
    }

    /// `Close()`: marks the server shutting down, closes every registered
    /// listener, waits for all `Serve` calls to exit, then closes every
    /// remaining connection.
    pub async fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        let entries: Vec<ListenerEntry> = std::mem::take(&mut *self.listeners.lock().unwrap());
        for entry in &entries {
            entry.scope.cancel();
        }
        for entry in entries {
            let _ = entry.serve_handle.await;
        }
        self.close_all_connections();
    }

    /// `Shutdown(ctx)`: like [`Server::close`], but between listener close
    /// and connection close it polls all connections, closing any idle for
    /// 30s or more. Interval doubles from 1ms to 500ms with ±10% jitter.
    /// Returns once every connection is idle-and-closed, or once `scope` is
    /// cancelled (remaining connections are then closed immediately).
    pub async fn shutdown(&self, scope: &CancelScope) {
        self.closing.store(true, Ordering::SeqCst);
        let entries: Vec<ListenerEntry> = std::mem::take(&mut *self.listeners.lock().unwrap());
        for entry in &entries {
            entry.scope.cancel();
        }
        for entry in entries {
            let _ = entry.serve_handle.await;
        }

        let mut interval = Duration::from_millis(1);
        loop {
            if self.connections.lock().unwrap().is_empty() {
                break;
            }
            let now = Timestamp::now();
            let idle: Vec<u64> = self
                .connections
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, c)| {
                    let read = *c.last_read.lock().unwrap();
                    let write = *c.last_write.lock().unwrap();
                    let last = read.max(write);
                    now.seconds - last.seconds >= 30
                })
                .map(|(id, _)| *id)
                .collect();
            for id in idle {
                self.close_connection(id);
            }
            tokio::select! {
                _ = tokio::time::sleep(jittered(interval)) => {}
                _ = scope.cancelled() => {
                    self.close_all_connections();
                    return;
                }
            }
            interval = (interval * 2).min(Duration::from_millis(500));
        }
    }
}

fn jittered(base: Duration) -> Duration {
    let jitter = rand::random::<f64>() * 0.2 - 0.1;
    Duration::from_secs_f64((base.as_secs_f64() * (1.0 + jitter)).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::Attr;
    use crate::directory::BaseDir;
    use crate::qid::PathAllocator;

    fn root() -> Arc<dyn Directory> {
        let alloc = Arc::new(PathAllocator::new());
        let attr = Attr::new_inheriting(ModeType::Directory, 0o755, Some(0), Some(0), None);
        BaseDir::new(alloc, attr, false)
    }

    #[tokio::test]
    async fn attach_then_getattr_round_trips_through_dispatch() {
        let session = Session::new(root());
        let reply = dispatch(&session, FCall::Tattach { fid: 0, afid: wire::NOFID, uname: "".into(), aname: "".into(), n_uname: 0 })
            .await
            .unwrap();
        assert!(matches!(reply, FCall::Rattach { .. }));

        let reply = dispatch(&session, FCall::Tgetattr { fid: 0, req_mask: 0 }).await.unwrap();
        match reply {
            FCall::Rgetattr(a) => assert_eq!(a.mode & 0o040000, 0o040000),
            _ => panic!("expected Rgetattr"),
        }
    }

    #[tokio::test]
    async fn walk_into_unknown_child_fails_with_enoent() {
        let session = Session::new(root());
        dispatch(&session, FCall::Tattach { fid: 0, afid: wire::NOFID, uname: "".into(), aname: "".into(), n_uname: 0 })
            .await
            .unwrap();
        let err = dispatch(&session, FCall::Twalk { fid: 0, newfid: 1, wnames: vec!["missing".into()] })
            .await
            .unwrap_err();
        assert_eq!(err.errno, Errno::NoEnt);
    }

    #[tokio::test]
    async fn mkdir_then_walk_then_getattr() {
        let session = Session::new(root());
        dispatch(&session, FCall::Tattach { fid: 0, afid: wire::NOFID, uname: "".into(), aname: "".into(), n_uname: 0 })
            .await
            .unwrap();
        dispatch(&session, FCall::Tmkdir { dfid: 0, name: "sub".into(), mode: 0o755, gid: 0 }).await.unwrap();
        let reply = dispatch(&session, FCall::Twalk { fid: 0, newfid: 1, wnames: vec!["sub".into()] }).await.unwrap();
        match reply {
            FCall::Rwalk { wqids } => assert_eq!(wqids.len(), 1),
            _ => panic!("expected Rwalk"),
        }
    }

    #[tokio::test]
    async fn write_without_open_fails_with_ebadf() {
        let session = Session::new(root());
        dispatch(&session, FCall::Tattach { fid: 0, afid: wire::NOFID, uname: "".into(), aname: "".into(), n_uname: 0 })
            .await
            .unwrap();
        dispatch(&session, FCall::Tmknod { dfid: 0, name: "leaf".into(), mode: 0o644, major: 0, minor: 0, gid: 0 })
            .await
            .unwrap();
        dispatch(&session, FCall::Twalk { fid: 0, newfid: 1, wnames: vec!["leaf".into()] }).await.unwrap();
        let err = dispatch(&session, FCall::Twrite { fid: 1, offset: 0, data: vec![1] }).await.unwrap_err();
        assert_eq!(err.errno, Errno::BadF);
    }

    #[tokio::test]
    async fn readlink_is_not_supported() {
        let session = Session::new(root());
        dispatch(&session, FCall::Tattach { fid: 0, afid: wire::NOFID, uname: "".into(), aname: "".into(), n_uname: 0 })
            .await
            .unwrap();
        let err = dispatch(&session, FCall::Treadlink { fid: 0 }).await.unwrap_err();
        assert_eq!(err.errno, Errno::NoSys);
    }

    #[tokio::test]
    async fn shutdown_with_no_connections_returns_immediately() {
        let server = Server::new(root());
        let scope = CancelScope::new();
        server.shutdown(&scope).await;
        assert!(server.connections.lock().unwrap().is_empty());
    }
}
