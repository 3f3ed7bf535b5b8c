//! Per-node attributes.

use std::time::{SystemTime, UNIX_EPOCH};

/// POSIX-ish mode-type discriminant carried in [`Attr::mode`]'s high bits
/// and mirrored in the node's [`crate::qid::QidKind`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ModeType {
    Regular,
    Directory,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: u32,
}

impl Timestamp {
    pub fn now() -> Self {
        let dur = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        Timestamp { seconds: dur.as_secs() as i64, nanos: dur.subsec_nanos() }
    }
}

/// Full attribute set carried by every node.
#[derive(Debug, Clone, PartialEq)]
pub struct Attr {
    pub mode_type: ModeType,
    /// Permission bits only (mode-type is tracked separately in
    /// [`Attr::mode_type`] and folded in at wire-encode time).
    pub perm: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub atime: Timestamp,
    pub mtime: Timestamp,
    pub ctime: Timestamp,
}

impl Attr {
    /// Builds a fresh attribute set, inheriting uid/gid from `parent` when
    /// the creating operation did not supply them explicitly.
    pub fn new_inheriting(
        mode_type: ModeType,
        perm: u32,
        uid: Option<u32>,
        gid: Option<u32>,
        parent: Option<&Attr>,
    ) -> Self {
        let now = Timestamp::now();
        Attr {
            mode_type,
            perm,
            uid: uid.or_else(|| parent.map(|p| p.uid)).unwrap_or(0),
            gid: gid.or_else(|| parent.map(|p| p.gid)).unwrap_or(0),
            size: 0,
            atime: now,
            mtime: now,
            ctime: now,
        }
    }

    pub fn touch_mtime(&mut self) {
        let now = Timestamp::now();
        self.mtime = now;
        self.ctime = now;
    }

    pub fn touch_atime(&mut self) {
        self.atime = Timestamp::now();
    }
}

/// Sparse attribute update, as carried by `Tsetattr`.
#[derive(Debug, Clone, Default)]
pub struct SetAttr {
    pub perm: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub size: Option<u64>,
    pub atime: Option<Timestamp>,
    pub mtime: Option<Timestamp>,
}

impl Attr {
    pub fn apply(&mut self, set: &SetAttr) {
        if let Some(perm) = set.perm {
            self.perm = perm;
        }
        if let Some(uid) = set.uid {
            self.uid = uid;
        }
        if let Some(gid) = set.gid {
            self.gid = gid;
        }
        if let Some(size) = set.size {
            self.size = size;
        }
        if let Some(atime) = set.atime {
            self.atime = atime;
        }
        if let Some(mtime) = set.mtime {
            self.mtime = mtime;
        }
        self.ctime = Timestamp::now();
    }
}
