//! The mount leaf itself: a regular file whose writes configure a mount
//! and whose sync attaches it.

use std::sync::{Arc, Mutex as StdMutex, Weak};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::warn;

use crate::attr::{Attr, SetAttr};
use crate::error::{Errno, Error, FsResult};
use crate::node::{Directory, FileLeaf, OpenMode};
use crate::qid::{PathAllocator, Qid, QidKind};

/// The pluggable per-(host,guest) behavior a `MountpointFile` drives.
/// `parse_field`/`apply_json` mutate configuration; `make_fs`/`mount` run
/// the actual attach and hand back something that can later detach it.
#[async_trait]
pub trait Mountpoint: Send + Sync {
    fn parse_field(&mut self, attribute: &str, value: &str) -> FsResult<()>;
    fn apply_json(&mut self, value: Value) -> FsResult<()>;
    fn to_json(&self) -> Value;
    async fn make_fs(&self) -> FsResult<()>;
    async fn mount(&self) -> FsResult<Arc<dyn Detach>>;
}

#[async_trait]
pub trait Detach: Send + Sync {
    async fn detach(&self) -> FsResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Fresh,
    Writing,
    Synced,
    Dirty,
}

struct Inner {
    state: State,
    buffer: Vec<u8>,
    first_write_seen: bool,
    structured: bool,
    snapshot: Vec<u8>,
    mountpoint: Box<dyn Mountpoint>,
    detach: Option<Arc<dyn Detach>>,
}

pub struct MountpointFile {
    qid: Qid,
    attr: StdMutex<Attr>,
    inner: Mutex<Inner>,
    parent: StdMutex<Option<Weak<dyn Directory>>>,
    name: StdMutex<String>,
}

impl MountpointFile {
    pub fn new(
        alloc: Arc<PathAllocator>,
        attr: Attr,
        mountpoint: Box<dyn Mountpoint>,
    ) -> Arc<MountpointFile> {
        Arc::new(MountpointFile {
            qid: alloc.qid(QidKind::Regular),
            attr: StdMutex::new(attr),
            inner: Mutex::new(Inner {
                state: State::Fresh,
                buffer: Vec::new(),
                first_write_seen: false,
                structured: false,
                snapshot: b"{}".to_vec(),
                mountpoint,
                detach: None,
            }),
            parent: StdMutex::new(None),
            name: StdMutex::new(String::new()),
        })
    }

    /// Applies the buffered payload, republishes the JSON snapshot, tears
    /// down any prior attach, then attaches the new configuration, in that
    /// order. The whole sequence holds `inner` for its duration.
    async fn sync(&self) -> FsResult<()> {
        let mut inner = self.inner.lock().await;

        if inner.structured && !inner.buffer.is_empty() {
            let value: Value =
                serde_json::from_slice(&inner.buffer).map_err(|e| Error::with_source(Errno::Io, e))?;
            inner.mountpoint.apply_json(value)?;
        }

        let snapshot = serde_json::to_vec(&inner.mountpoint.to_json()).unwrap_or_else(|_| b"{}".to_vec());

        if let Some(detach) = inner.detach.take() {
            if let Err(e) = detach.detach().await {
                warn!(error = %e, "detaching previous mount during resync");
            }
        }

        inner.mountpoint.make_fs().await?;
        let new_detach = inner.mountpoint.mount().await?;

        inner.buffer.clear();
        inner.snapshot = snapshot;
        inner.detach = Some(new_detach);
        inner.state = State::Synced;
        Ok(())
    }

    pub async fn detach_self(&self) -> FsResult<()> {
        let detach = self.inner.lock().await.detach.take();
        if let Some(detach) = detach {
            detach.detach().await?;
        }
        Ok(())
    }
}

fn split_field_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let mut chars = line.chars().peekable();
    let mut attribute = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            break;
        }
        attribute.push(c);
        chars.next();
    }
    while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
        chars.next();
    }
    let mut value = String::new();
    let mut in_quotes = false;
    for c in chars {
        if c == '"' {
            in_quotes = !in_quotes;
            continue;
        }
        if c.is_whitespace() && !in_quotes {
            break;
        }
        value.push(c);
    }
    if attribute.is_empty() {
        None
    } else {
        Some((attribute, value))
    }
}

#[async_trait]
impl FileLeaf for MountpointFile {
    fn qid(&self) -> Qid {
        self.qid
    }

    async fn get_attr(&self) -> FsResult<Attr> {
        let mut attr = self.attr.lock().unwrap().clone();
        attr.size = self.inner.lock().await.snapshot.len() as u64;
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

    async fn open(&self, _mode: OpenMode) -> FsResult<()> {
        Ok(())
    }

    async fn read_at(&self, offset: u64, count: u32) -> FsResult<Vec<u8>> {
        let inner = self.inner.lock().await;
        let offset = offset as usize;
        if offset >= inner.snapshot.len() {
            return Ok(Vec::new());
        }
        let end = (offset + count as usize).min(inner.snapshot.len());
        Ok(inner.snapshot[offset..end].to_vec())
    }

    async fn write_at(&self, offset: u64, data: &[u8]) -> FsResult<u32> {
        let mut trigger_sync = false;
        {
            let mut inner = self.inner.lock().await;
            if !inner.first_write_seen {
                inner.first_write_seen = true;
                inner.structured = data.first() == Some(&b'{');
                inner.state = State::Writing;
            } else if inner.state == State::Synced {
                inner.state = State::Dirty;
            }

            if inner.structured {
                if offset as usize != inner.buffer.len() {
                    return Err(Error::new(Errno::Inval));
                }
                inner.buffer.extend_from_slice(data);
            } else {
                let text = String::from_utf8_lossy(data);
                for line in text.lines() {
                    match split_field_line(line) {
                        Some((attribute, _)) if attribute == "sync" => {
                            trigger_sync = true;
                        }
                        Some((attribute, value)) => {
                            inner.mountpoint.parse_field(&attribute, &value)?;
                        }
                        None => {}
                    }
                }
            }
        }
        if trigger_sync {
            self.sync().await?;
        }
        Ok(data.len() as u32)
    }

    async fn fsync(&self) -> FsResult<()> {
        self.sync().await
    }

    async fn close(&self) -> FsResult<()> {
        let dirty = {
            let inner = self.inner.lock().await;
            matches!(inner.state, State::Writing | State::Dirty)
        };
        if dirty {
            if let Err(e) = self.sync().await {
                if let Some(parent) = self.parent() {
                    let name = self.name();
                    let _ = parent.unlink_at(&name).await;
                }
                return Err(e);
            }
        }
        Ok(())
    }

    async fn detach(&self) -> FsResult<()> {
        self.detach_self().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::ModeType;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct NoopDetach(Arc<AtomicBool>);

    #[async_trait]
    impl Detach for NoopDetach {
        async fn detach(&self) -> FsResult<()> {
            self.0.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct TestMountpoint {
        host_point: String,
        guest_maddr: String,
        detached: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Mountpoint for TestMountpoint {
        fn parse_field(&mut self, attribute: &str, value: &str) -> FsResult<()> {
            match attribute {
                "host.point" => self.host_point = value.to_string(),
                "guest.apiMaddr" => self.guest_maddr = value.to_string(),
                _ => return Err(Error::new(Errno::Inval)),
            }
            Ok(())
        }

        fn apply_json(&mut self, value: Value) -> FsResult<()> {
            if let Some(point) = value.pointer("/host/point").and_then(Value::as_str) {
                self.host_point = point.to_string();
            }
            if let Some(maddr) = value.pointer("/guest/apiMaddr").and_then(Value::as_str) {
                self.guest_maddr = maddr.to_string();
            }
            Ok(())
        }

        fn to_json(&self) -> Value {
            serde_json::json!({
                "host": {"point": self.host_point},
                "guest": {"apiMaddr": self.guest_maddr},
            })
        }

        async fn make_fs(&self) -> FsResult<()> {
            Ok(())
        }

        async fn mount(&self) -> FsResult<Arc<dyn Detach>> {
            Ok(Arc::new(NoopDetach(self.detached.clone())))
        }
    }

    fn file() -> (Arc<MountpointFile>, Arc<AtomicBool>) {
        let alloc = Arc::new(PathAllocator::new());
        let attr = Attr::new_inheriting(ModeType::Regular, 0o644, Some(0), Some(0), None);
        let detached = Arc::new(AtomicBool::new(false));
        let mp = TestMountpoint {
            host_point: String::new(),
            guest_maddr: String::new(),
            detached: detached.clone(),
        };
        (MountpointFile::new(alloc, attr, Box::new(mp)), detached)
    }

    #[tokio::test]
    async fn structured_write_then_close_mounts() {
        let (file, _detached) = file();
        let payload = br#"{"host":{"point":"/tmp/x"},"guest":{"apiMaddr":"/ip4/127.0.0.1/tcp/5001"}}"#;
        file.write_at(0, payload).await.unwrap();
        file.close().await.unwrap();
        let read = file.read_at(0, 4096).await.unwrap();
        let value: Value = serde_json::from_slice(&read).unwrap();
        assert_eq!(value["host"]["point"], "/tmp/x");
    }

    #[tokio::test]
    async fn field_oriented_sync_line_triggers_attach() {
        let (file, _detached) = file();
        let payload = b"host.point /tmp/y\nguest.apiMaddr /ip4/127.0.0.1/tcp/5001\nsync\n";
        file.write_at(0, payload).await.unwrap();
        let read = file.read_at(0, 4096).await.unwrap();
        let value: Value = serde_json::from_slice(&read).unwrap();
        assert_eq!(value["host"]["point"], "/tmp/y");
    }

    #[tokio::test]
    async fn non_contiguous_structured_write_fails() {
        let (file, _detached) = file();
        file.write_at(0, b"{\"a\":1}").await.unwrap();
        let err = file.write_at(10, b"x").await.unwrap_err();
        assert_eq!(err.errno, Errno::Inval);
    }

    #[tokio::test]
    async fn detach_invokes_stored_closer() {
        let (file, detached) = file();
        file.write_at(0, b"host.point /tmp/z\nsync\n").await.unwrap();
        file.detach().await.unwrap();
        assert!(detached.load(Ordering::SeqCst));
    }
}
