//! Write-only leaf that forwards each write as one message on a queue
//! . Backs `control/shutdown` and, indirectly, the listener
//! subtree's output channels.

use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;

use crate::attr::{Attr, SetAttr};
use crate::cancel::CancelScope;
use crate::error::{Errno, Error, FsResult};
use crate::node::{Directory, FileLeaf, OpenMode};
use crate::qid::{PathAllocator, Qid, QidKind};

pub struct ChannelFile {
    qid: Qid,
    attr: Mutex<Attr>,
    sender: async_channel::Sender<Vec<u8>>,
    scope: CancelScope,
    parent: Mutex<Option<Weak<dyn Directory>>>,
    name: Mutex<String>,
}

impl ChannelFile {
    pub fn new(
        alloc: Arc<PathAllocator>,
        attr: Attr,
        sender: async_channel::Sender<Vec<u8>>,
        scope: CancelScope,
    ) -> Arc<dyn FileLeaf> {
        Arc::new(ChannelFile {
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
impl FileLeaf for ChannelFile {
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
        if self.scope.is_cancelled() {
            return Err(Error::new(Errno::Io));
        }
        tokio::select! {
            result = self.sender.send(data.to_vec()) => {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::ModeType;

    fn attr() -> Attr {
        Attr::new_inheriting(ModeType::Regular, 0o200, Some(0), Some(0), None)
    }

    #[tokio::test]
    async fn write_forwards_to_channel() {
        let alloc = Arc::new(PathAllocator::new());
        let (tx, rx) = async_channel::unbounded();
        let file = ChannelFile::new(alloc, attr(), tx, CancelScope::new());
        file.write_at(0, b"1").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), b"1".to_vec());
    }

    #[tokio::test]
    async fn read_is_rejected() {
        let alloc = Arc::new(PathAllocator::new());
        let (tx, _rx) = async_channel::unbounded();
        let file = ChannelFile::new(alloc, attr(), tx, CancelScope::new());
        let err = file.read_at(0, 1).await.unwrap_err();
        assert_eq!(err.errno, Errno::Access);
    }

    #[tokio::test]
    async fn write_after_cancel_fails() {
        let alloc = Arc::new(PathAllocator::new());
        let (tx, _rx) = async_channel::unbounded();
        let scope = CancelScope::new();
        let file = ChannelFile::new(alloc, attr(), tx, scope.clone());
        scope.cancel();
        let err = file.write_at(0, b"x").await.unwrap_err();
        assert_eq!(err.errno, Errno::Io);
    }
}
