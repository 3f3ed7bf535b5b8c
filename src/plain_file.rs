//! The plain read/write regular file produced by a directory's generic
//! `Mknod`.

use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;

use crate::attr::{Attr, SetAttr};
use crate::error::FsResult;
use crate::node::{Directory, FileLeaf, OpenMode};
use crate::qid::{PathAllocator, Qid, QidKind};

pub struct PlainFile {
    qid: Qid,
    attr: Mutex<Attr>,
    data: Mutex<Vec<u8>>,
    parent: Mutex<Option<Weak<dyn Directory>>>,
    name: Mutex<String>,
}

impl PlainFile {
    pub fn new(alloc: Arc<PathAllocator>, attr: Attr) -> Arc<dyn FileLeaf> {
        Arc::new(PlainFile {
            qid: alloc.qid(QidKind::Regular),
            attr: Mutex::new(attr),
            data: Mutex::new(Vec::new()),
            parent: Mutex::new(None),
            name: Mutex::new(String::new()),
        })
    }
}

#[async_trait]
impl FileLeaf for PlainFile {
    fn qid(&self) -> Qid {
        self.qid
    }

    async fn get_attr(&self) -> FsResult<Attr> {
        let mut attr = self.attr.lock().unwrap().clone();
        attr.size = self.data.lock().unwrap().len() as u64;
        Ok(attr)
    }

    async fn set_attr(&self, set: &SetAttr) -> FsResult<()> {
        if let Some(size) = set.size {
            self.data.lock().unwrap().resize(size as usize, 0);
        }
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
        let data = self.data.lock().unwrap();
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(Vec::new());
        }
        let end = (offset + count as usize).min(data.len());
        Ok(data[offset..end].to_vec())
    }

    async fn write_at(&self, offset: u64, buf: &[u8]) -> FsResult<u32> {
        let mut data = self.data.lock().unwrap();
        let offset = offset as usize;
        if data.len() < offset + buf.len() {
            data.resize(offset + buf.len(), 0);
        }
        data[offset..offset + buf.len()].copy_from_slice(buf);
        drop(data);
        self.attr.lock().unwrap().touch_mtime();
        Ok(buf.len() as u32)
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

    fn file() -> Arc<dyn FileLeaf> {
        let alloc = Arc::new(PathAllocator::new());
        let attr = Attr::new_inheriting(ModeType::Regular, 0o644, Some(0), Some(0), None);
        PlainFile::new(alloc, attr)
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let f = file();
        f.write_at(0, b"hello").await.unwrap();
        let got = f.read_at(0, 5).await.unwrap();
        assert_eq!(got, b"hello");
    }

    #[tokio::test]
    async fn read_past_end_is_empty() {
        let f = file();
        f.write_at(0, b"hi").await.unwrap();
        let got = f.read_at(10, 5).await.unwrap();
        assert!(got.is_empty());
    }

    #[tokio::test]
    async fn set_attr_size_truncates() {
        let f = file();
        f.write_at(0, b"hello world").await.unwrap();
        let set = SetAttr { size: Some(5), ..Default::default() };
        f.set_attr(&set).await.unwrap();
        let attr = f.get_attr().await.unwrap();
        assert_eq!(attr.size, 5);
    }
}
