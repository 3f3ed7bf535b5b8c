//! POSIX-flavoured error taxonomy shared by every CORE operation.
//! Mirrors a closed error-enum-plus-source pattern familiar from other VFS
//! traits, generalized to the errno set this daemon's 9P wire layer needs.

use std::fmt;

/// Wire-level error code. Only the bare code crosses the 9P wire; any
/// underlying cause stays server-side, attached to [`Error::source`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Errno {
    /// Unknown child name.
    NoEnt,
    /// Name already linked.
    Exist,
    /// Walk past a leaf.
    NotDir,
    /// Operation expects a leaf.
    IsDir,
    /// Operation on an unopened or wrongly-opened handle.
    BadF,
    /// Malformed input.
    Inval,
    /// Policy refusal.
    Access,
    /// Downstream failure (listener/mount/JSON).
    Io,
    /// Handle already open.
    Busy,
    /// Directory not empty.
    NotEmpty,
    /// Operation not implemented by this node kind.
    NoSys,
    /// Protocol-level violation (bad tag, bad fid reuse, ...).
    Proto,
}

impl Errno {
    /// Linux errno numeric value, used when encoding `Rlerror`.
    pub fn to_raw(self) -> u32 {
        match self {
            Errno::NoEnt => 2,
            Errno::Io => 5,
            Errno::BadF => 9,
            Errno::Access => 13,
            Errno::Exist => 17,
            Errno::NotDir => 20,
            Errno::IsDir => 21,
            Errno::Inval => 22,
            Errno::Busy => 16,
            Errno::NotEmpty => 39,
            Errno::NoSys => 38,
            Errno::Proto => 71,
        }
    }

    pub fn from_raw(raw: u32) -> Errno {
        match raw {
            2 => Errno::NoEnt,
            5 => Errno::Io,
            9 => Errno::BadF,
            13 => Errno::Access,
            17 => Errno::Exist,
            20 => Errno::NotDir,
            21 => Errno::IsDir,
            22 => Errno::Inval,
            16 => Errno::Busy,
            39 => Errno::NotEmpty,
            38 => Errno::NoSys,
            _ => Errno::Proto,
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Errno::NoEnt => "ENOENT",
            Errno::Exist => "EEXIST",
            Errno::NotDir => "ENOTDIR",
            Errno::IsDir => "EISDIR",
            Errno::BadF => "EBADF",
            Errno::Inval => "EINVAL",
            Errno::Access => "EACCES",
            Errno::Io => "EIO",
            Errno::Busy => "EBUSY",
            Errno::NotEmpty => "ENOTEMPTY",
            Errno::NoSys => "ENOSYS",
            Errno::Proto => "EPROTO",
        };
        f.write_str(s)
    }
}

/// A wire-facing errno paired with an optional server-side cause.
#[derive(Debug)]
pub struct Error {
    pub errno: Errno,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Error {
    pub fn new(errno: Errno) -> Self {
        Error { errno, source: None }
    }

    /// Builds an `EIO` carrying `cause` for server-side logging: the
    /// specific cause is joined with `EIO` for the server log, but only the
    /// bare errno crosses the wire.
    pub fn io(cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        Error { errno: Errno::Io, source: Some(Box::new(cause)) }
    }

    pub fn with_source(
        errno: Errno,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Error { errno, source: Some(Box::new(cause)) }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(cause) => write!(f, "{}: {}", self.errno, cause),
            None => write!(f, "{}", self.errno),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<Errno> for Error {
    fn from(errno: Errno) -> Self {
        Error::new(errno)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        let errno = match err.kind() {
            NotFound => Errno::NoEnt,
            AlreadyExists => Errno::Exist,
            PermissionDenied => Errno::Access,
            InvalidInput => Errno::Inval,
            _ => Errno::Io,
        };
        Error::with_source(errno, err)
    }
}

pub type FsResult<T> = Result<T, Error>;
