//! `control/`: a plain directory holding the shutdown `ChannelFile`

use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;

use crate::attr::{Attr, ModeType, SetAttr};
use crate::cancel::CancelScope;
use crate::directory::BaseDir;
use crate::error::{Errno, Error, FsResult};
use crate::node::{Directory, Entry, FileLeaf, OpenMode};
use crate::qid::{PathAllocator, Qid, QidKind};

/// Disposition carried by writes to `control/shutdown`, ordered so that
/// `Immediate > Short > Patient` drives the sequential-leveling filter in
/// `daemon.rs`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownDisposition {
    Patient = 1,
    Short = 2,
    Immediate = 3,
}

impl ShutdownDisposition {
    /// Parses one shutdown-file write payload. A single byte valued 1-3 is
    /// accepted as the raw enum value; an ASCII digit `b'1'` (0x31) is NOT
    /// in that range and falls through to the string form, where it is
    /// simply invalid.
    pub fn parse(payload: &[u8]) -> FsResult<Self> {
        if payload.len() == 1 {
            match payload[0] {
                1 => return Ok(ShutdownDisposition::Patient),
                2 => return Ok(ShutdownDisposition::Short),
                3 => return Ok(ShutdownDisposition::Immediate),
                _ => {}
            }
        }
        let text = std::str::from_utf8(payload).map_err(|_| Error::new(Errno::Inval))?.trim();
        match text {
            "patient" => Ok(ShutdownDisposition::Patient),
            "short" => Ok(ShutdownDisposition::Short),
            "immediate" => Ok(ShutdownDisposition::Immediate),
            _ => Err(Error::new(Errno::Inval)),
        }
    }
}

/// Write-only leaf at `control/shutdown`. Unlike the generic
/// [`crate::channel_file::ChannelFile`] it specializes on, each write is
/// parsed into a [`ShutdownDisposition`] *before* being forwarded — an
/// unparsable payload fails the write with `EINVAL` and leaves no trace on
/// the channel.
pub struct ShutdownChannelFile {
    qid: Qid,
    attr: Mutex<Attr>,
    sender: async_channel::Sender<ShutdownDisposition>,
    scope: CancelScope,
    parent: Mutex<Option<Weak<dyn Directory>>>,
    name: Mutex<String>,
}

impl ShutdownChannelFile {
    pub fn new(
        alloc: Arc<PathAllocator>,
        attr: Attr,
        sender: async_channel::Sender<ShutdownDisposition>,
        scope: CancelScope,
    ) -> Arc<dyn FileLeaf> {
        Arc::new(ShutdownChannelFile {
            qid: alloc.qid(QidKind::Regular),
            attr: Mutex::new(attr),
            sender,
            scope,
            parent: Mutex::new(None),
            name: Mutex::new(String::new()),
        })
    }
}

#[async_trait]
impl FileLeaf for ShutdownChannelFile {
    fn qid(&self) -> Qid {
        self.qid
    }

    async fn get_attr(&self) -> FsResult<Attr> {
        Ok(self.attr.lock().unwrap().clone())
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

    async fn read_at(&self, _offset: u64, _count: u32) -> FsResult<Vec<u8>> {
        Err(Error::new(Errno::Access))
    }

    async fn write_at(&self, _offset: u64, data: &[u8]) -> FsResult<u32> {
        let disposition = ShutdownDisposition::parse(data)?;
        if self.scope.is_cancelled() {
            return Err(Error::new(Errno::Io));
        }
        tokio::select! {
            result = self.sender.send(disposition) => {
                result.map_err(|_| Error::new(Errno::Io))?;
                Ok(data.len() as u32)
            }
            _ = self.scope.cancelled() => Err(Error::new(Errno::Io)),
        }
    }

    async fn fsync(&self) -> FsResult<()> {
        Ok(())
    }

    async fn close(&self) -> FsResult<()> {
        Ok(())
    }
}

/// Builds the `control/` directory with its `shutdown` leaf already linked.
/// Returns the directory plus the receiving half of the shutdown channel,
/// which `daemon.rs` merges with the other shutdown sources.
pub async fn build_control_dir(
    alloc: Arc<PathAllocator>,
    parent_attr: &Attr,
    scope: CancelScope,
) -> FsResult<(Arc<dyn Directory>, async_channel::Receiver<ShutdownDisposition>)> {
    let dir_attr = Attr::new_inheriting(ModeType::Directory, 0o555, Some(0), Some(0), Some(parent_attr));
    let dir = BaseDir::new(alloc.clone(), dir_attr, false);

    let (tx, rx) = async_channel::unbounded::<ShutdownDisposition>();
    let file_attr = Attr::new_inheriting(ModeType::Regular, 0o200, Some(0), Some(0), Some(parent_attr));
    let shutdown_file = ShutdownChannelFile::new(alloc, file_attr, tx, scope);
    dir.link("shutdown".to_string(), Entry::File(shutdown_file)).await?;

    Ok((dir, rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_raw_byte_dispositions() {
        assert_eq!(ShutdownDisposition::parse(&[1]).unwrap(), ShutdownDisposition::Patient);
        assert_eq!(ShutdownDisposition::parse(&[2]).unwrap(), ShutdownDisposition::Short);
        assert_eq!(ShutdownDisposition::parse(&[3]).unwrap(), ShutdownDisposition::Immediate);
    }

    #[test]
    fn ascii_digit_one_is_not_raw_byte_one() {
        // b'1' == 0x31, outside the [1,3] raw-byte range, so it must fall
        // through to string comparison and fail (it isn't "patient").
        assert!(ShutdownDisposition::parse(b"1").is_err());
    }

    #[test]
    fn parses_trimmed_strings_case_sensitively() {
        assert_eq!(ShutdownDisposition::parse(b" patient\n").unwrap(), ShutdownDisposition::Patient);
        assert!(ShutdownDisposition::parse(b"Patient").is_err());
    }

    #[test]
    fn rejects_garbage_payload() {
        assert!(ShutdownDisposition::parse(b"whenever").is_err());
    }

    #[test]
    fn disposition_ordering_matches_severity() {
        assert!(ShutdownDisposition::Immediate > ShutdownDisposition::Short);
        assert!(ShutdownDisposition::Short > ShutdownDisposition::Patient);
    }

    #[tokio::test]
    async fn shutdown_write_is_forwarded_as_disposition() {
        let alloc = Arc::new(PathAllocator::new());
        let root_attr = Attr::new_inheriting(ModeType::Directory, 0o755, Some(0), Some(0), None);
        let (dir, rx) = build_control_dir(alloc, &root_attr, CancelScope::new()).await.unwrap();
        let shutdown = dir.walk1("shutdown").await.unwrap().as_file().unwrap();
        shutdown.write_at(0, b"short").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), ShutdownDisposition::Short);
    }

    #[tokio::test]
    async fn invalid_payload_fails_write_with_no_state_change() {
        let alloc = Arc::new(PathAllocator::new());
        let root_attr = Attr::new_inheriting(ModeType::Directory, 0o755, Some(0), Some(0), None);
        let (dir, rx) = build_control_dir(alloc, &root_attr, CancelScope::new()).await.unwrap();
        let shutdown = dir.walk1("shutdown").await.unwrap().as_file().unwrap();
        let err = shutdown.write_at(0, b"whenever").await.unwrap_err();
        assert_eq!(err.errno, Errno::Inval);
        assert!(rx.try_recv().is_err());
    }
}
