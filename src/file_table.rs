//! Name→child map backing every directory.
//! Protected by a single read-write lock; enumeration sorts
//! lexicographically using a `BTreeMap` rather than sorting a `HashMap`'s
//! keys on every `Readdir`.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::error::{Errno, Error, FsResult};
use crate::node::Entry;

#[derive(Default)]
pub struct FileTable {
    children: RwLock<BTreeMap<String, Entry>>,
}

impl FileTable {
    pub fn new() -> Self {
        FileTable { children: RwLock::new(BTreeMap::new()) }
    }

    pub fn get(&self, name: &str) -> Option<Entry> {
        self.children.read().unwrap().get(name).cloned()
    }

    /// Inserts `name`, failing with `EEXIST` if already present. Concurrent
    /// inserts of the same name serialize on the write lock; exactly one
    /// wins.
    pub fn insert(&self, name: String, entry: Entry) -> FsResult<()> {
        let mut children = self.children.write().unwrap();
        if children.contains_key(&name) {
            return Err(Error::new(Errno::Exist));
        }
        children.insert(name, entry);
        Ok(())
    }

    pub fn remove(&self, name: &str) -> FsResult<Entry> {
        let mut children = self.children.write().unwrap();
        children.remove(name).ok_or_else(|| Error::new(Errno::NoEnt))
    }

    pub fn is_empty(&self) -> bool {
        self.children.read().unwrap().is_empty()
    }

    pub fn len(&self) -> usize {
        self.children.read().unwrap().len()
    }

    /// Lexicographically-sorted dirents, windowed by `offset`/`count`.
    pub fn list(&self, offset: usize, count: usize) -> Vec<(String, Entry)> {
        self.children
            .read()
            .unwrap()
            .iter()
            .skip(offset)
            .take(count)
            .map(|(name, entry)| (name.clone(), entry.clone()))
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.children.read().unwrap().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::{Attr, ModeType};
    use crate::directory::BaseDir;
    use crate::qid::PathAllocator;
    use std::sync::Arc;

    fn dir(alloc: &Arc<PathAllocator>) -> Entry {
        let attr = Attr::new_inheriting(ModeType::Directory, 0o755, Some(0), Some(0), None);
        Entry::Dir(BaseDir::new(alloc.clone(), attr, false))
    }

    #[test]
    fn insert_then_duplicate_fails() {
        let alloc = Arc::new(PathAllocator::new());
        let table = FileTable::new();
        table.insert("a".into(), dir(&alloc)).unwrap();
        let err = table.insert("a".into(), dir(&alloc)).unwrap_err();
        assert_eq!(err.errno, Errno::Exist);
    }

    #[test]
    fn remove_missing_fails() {
        let table = FileTable::new();
        let err = table.remove("missing").unwrap_err();
        assert_eq!(err.errno, Errno::NoEnt);
    }

    #[test]
    fn list_is_sorted_and_windowed() {
        let alloc = Arc::new(PathAllocator::new());
        let table = FileTable::new();
        for name in ["charlie", "alpha", "bravo"] {
            table.insert(name.into(), dir(&alloc)).unwrap();
        }
        let names: Vec<_> = table.list(0, 10).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["alpha", "bravo", "charlie"]);
        let windowed: Vec<_> = table.list(1, 1).into_iter().map(|(n, _)| n).collect();
        assert_eq!(windowed, vec!["bravo"]);
    }
}
