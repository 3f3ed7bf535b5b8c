//! 9P2000.L message encoding . Opcodes and field
//! layout follow the published 9P2000.L message set. Integers and the
//! string/data length prefixes are little-endian, per the protocol's own
//! convention — distinct from the big-endian XDR encoding used elsewhere in
//! this codebase for the unrelated NFS heritage it grew out of. Grounded on
//! the wire-shape of the `rs9p` crate's `fcall.rs` (`other_examples/`), but
//! written against this codebase's own `byteorder`-based `Read`/`Write`
//! style rather than that crate's `bytes`/`nix` stack.

use std::io::{self, Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Errno, Error, FsResult};
use crate::qid::{Qid, QidKind};

/// Tag value meaning "no response expected" (unused by this daemon, carried
/// for completeness of the message set).
pub const NOTAG: u16 = 0xffff;
/// Fid value meaning "no fid" (used as `afid` when the client declines auth).
pub const NOFID: u32 = 0xffffffff;

/// One 9P2000.L message type. Discriminants are the wire opcodes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MsgType {
    Rlerror = 7,
    Tlopen = 12,
    Rlopen = 13,
    Tmknod = 18,
    Rmknod = 19,
    Treadlink = 22,
    Rreadlink = 23,
    Tgetattr = 24,
    Rgetattr = 25,
    Tsetattr = 26,
    Rsetattr = 27,
    Tmkdir = 72,
    Rmkdir = 73,
    Trenameat = 74,
    Rrenameat = 75,
    Tunlinkat = 76,
    Runlinkat = 77,
    Tversion = 100,
    Rversion = 101,
    Tattach = 104,
    Rattach = 105,
    Twalk = 110,
    Rwalk = 111,
    Tread = 116,
    Rread = 117,
    Twrite = 118,
    Rwrite = 119,
    Tclunk = 120,
    Rclunk = 121,
    Tremove = 122,
    Rremove = 123,
}

impl MsgType {
    pub fn from_u8(v: u8) -> Option<Self> {
        use MsgType::*;
        Some(match v {
            7 => Rlerror,
            12 => Tlopen,
            13 => Rlopen,
            18 => Tmknod,
            19 => Rmknod,
            22 => Treadlink,
            23 => Rreadlink,
            24 => Tgetattr,
            25 => Rgetattr,
            26 => Tsetattr,
            27 => Rsetattr,
            72 => Tmkdir,
            73 => Rmkdir,
            74 => Trenameat,
            75 => Rrenameat,
            76 => Tunlinkat,
            77 => Runlinkat,
            100 => Tversion,
            101 => Rversion,
            104 => Tattach,
            105 => Rattach,
            110 => Twalk,
            111 => Rwalk,
            116 => Tread,
            117 => Rread,
            118 => Twrite,
            119 => Rwrite,
            120 => Tclunk,
            121 => Rclunk,
            122 => Tremove,
            123 => Rremove,
            _ => return None,
        })
    }
}

/// Wire-format QID: type byte + version + path, 13 bytes fixed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct WireQid {
    pub kind: u8,
    pub version: u32,
    pub path: u64,
}

impl From<Qid> for WireQid {
    fn from(qid: Qid) -> Self {
        WireQid { kind: qid.kind.to_wire(), version: qid.version, path: qid.path }
    }
}

impl WireQid {
    /// Recovers the node kind from the wire byte. Unknown bit patterns are
    /// treated as `Regular`, matching 9P's convention that unrecognized
    /// qid.type bits are simply ignored by readers.
    pub fn kind(&self) -> QidKind {
        match self.kind {
            0x80 => QidKind::Directory,
            0x40 => QidKind::AppendOnly,
            0x02 => QidKind::Symlink,
            _ => QidKind::Regular,
        }
    }

    fn encode(&self, dest: &mut impl Write) -> io::Result<()> {
        dest.write_u8(self.kind)?;
        dest.write_u32::<LittleEndian>(self.version)?;
        dest.write_u64::<LittleEndian>(self.path)?;
        Ok(())
    }

    fn decode(src: &mut impl Read) -> io::Result<Self> {
        let kind = src.read_u8()?;
        let version = src.read_u32::<LittleEndian>()?;
        let path = src.read_u64::<LittleEndian>()?;
        Ok(WireQid { kind, version, path })
    }
}

/// One parsed 9P2000.L request or reply body. `Tauth`/`Tstat`/`Twstat`/legacy
/// `Trename` are omitted: this daemon accepts but never enforces auth, and
/// `renameat`/`getattr`/`setattr` supersede their legacy counterparts.
#[derive(Debug, Clone, PartialEq)]
pub enum FCall {
    Tversion { msize: u32, version: String },
    Rversion { msize: u32, version: String },
    Tattach { fid: u32, afid: u32, uname: String, aname: String, n_uname: u32 },
    Rattach { qid: WireQid },
    Twalk { fid: u32, newfid: u32, wnames: Vec<String> },
    Rwalk { wqids: Vec<WireQid> },
    Tlopen { fid: u32, flags: u32 },
    Rlopen { qid: WireQid, iounit: u32 },
    Tread { fid: u32, offset: u64, count: u32 },
    Rread { data: Vec<u8> },
    Twrite { fid: u32, offset: u64, data: Vec<u8> },
    Rwrite { count: u32 },
    Tclunk { fid: u32 },
    Rclunk,
    Tremove { fid: u32 },
    Rremove,
    Tgetattr { fid: u32, req_mask: u64 },
    Rgetattr(Box<RGetAttr>),
    Tsetattr { fid: u32, valid: u32, mode: u32, uid: u32, gid: u32, size: u64, atime_sec: u64, atime_nsec: u64, mtime_sec: u64, mtime_nsec: u64 },
    Rsetattr,
    Trenameat { olddirfid: u32, oldname: String, newdirfid: u32, newname: String },
    Rrenameat,
    Tunlinkat { dirfid: u32, name: String, flags: u32 },
    Runlinkat,
    Tmkdir { dfid: u32, name: String, mode: u32, gid: u32 },
    Rmkdir { qid: WireQid },
    Tmknod { dfid: u32, name: String, mode: u32, major: u32, minor: u32, gid: u32 },
    Rmknod { qid: WireQid },
    Treadlink { fid: u32 },
    Rreadlink { target: String },
    Rlerror { ecode: u32 },
}

/// `Rgetattr`'s field list, boxed out of [`FCall`] so the enum's largest
/// variant doesn't dominate its size.
#[derive(Debug, Clone, PartialEq)]
pub struct RGetAttr {
    pub valid: u64,
    pub qid: WireQid,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u64,
    pub rdev: u64,
    pub size: u64,
    pub blksize: u64,
    pub blocks: u64,
    pub atime_sec: u64,
    pub atime_nsec: u64,
    pub mtime_sec: u64,
    pub mtime_nsec: u64,
    pub ctime_sec: u64,
    pub ctime_nsec: u64,
}

impl FCall {
    pub fn msg_type(&self) -> MsgType {
        use FCall::*;
        match self {
            Tversion { .. } => MsgType::Tversion,
            Rversion { .. } => MsgType::Rversion,
            Tattach { .. } => MsgType::Tattach,
            Rattach { .. } => MsgType::Rattach,
            Twalk { .. } => MsgType::Twalk,
            Rwalk { .. } => MsgType::Rwalk,
            Tlopen { .. } => MsgType::Tlopen,
            Rlopen { .. } => MsgType::Rlopen,
            Tread { .. } => MsgType::Tread,
            Rread { .. } => MsgType::Rread,
            Twrite { .. } => MsgType::Twrite,
            Rwrite { .. } => MsgType::Rwrite,
            Tclunk { .. } => MsgType::Tclunk,
            Rclunk => MsgType::Rclunk,
            Tremove { .. } => MsgType::Tremove,
            Rremove => MsgType::Rremove,
            Tgetattr { .. } => MsgType::Tgetattr,
            Rgetattr(_) => MsgType::Rgetattr,
            Tsetattr { .. } => MsgType::Tsetattr,
            Rsetattr => MsgType::Rsetattr,
            Trenameat { .. } => MsgType::Trenameat,
            Rrenameat => MsgType::Rrenameat,
            Tunlinkat { .. } => MsgType::Tunlinkat,
            Runlinkat => MsgType::Runlinkat,
            Tmkdir { .. } => MsgType::Tmkdir,
            Rmkdir { .. } => MsgType::Rmkdir,
            Tmknod { .. } => MsgType::Tmknod,
            Rmknod { .. } => MsgType::Rmknod,
            Treadlink { .. } => MsgType::Treadlink,
            Rreadlink { .. } => MsgType::Rreadlink,
            Rlerror { .. } => MsgType::Rlerror,
        }
    }
}

/// A tagged message: the unit exchanged over the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Msg {
    pub tag: u16,
    pub body: FCall,
}

// 9P strings are length-prefixed UTF-8 with a *two*-byte length, unlike the
// four-byte-plus-padding XDR strings used by this codebase's NFS heritage.
fn write_string(dest: &mut impl Write, s: &str) -> io::Result<()> {
    let len: u16 = s
        .len()
        .try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "string exceeds 9P length limit"))?;
    dest.write_u16::<LittleEndian>(len)?;
    dest.write_all(s.as_bytes())
}

fn read_string(src: &mut impl Read) -> io::Result<String> {
    let len = src.read_u16::<LittleEndian>()? as usize;
    let mut buf = vec![0u8; len];
    src.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn write_data(dest: &mut impl Write, data: &[u8]) -> io::Result<()> {
    let len: u32 = data
        .len()
        .try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "data exceeds u32 length"))?;
    dest.write_u32::<LittleEndian>(len)?;
    dest.write_all(data)
}

fn read_data(src: &mut impl Read) -> io::Result<Vec<u8>> {
    let len = src.read_u32::<LittleEndian>()? as usize;
    let mut buf = vec![0u8; len];
    src.read_exact(&mut buf)?;
    Ok(buf)
}

fn write_string_vec(dest: &mut impl Write, items: &[String]) -> io::Result<()> {
    let count: u16 = items
        .len()
        .try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many path components"))?;
    dest.write_u16::<LittleEndian>(count)?;
    for item in items {
        write_string(dest, item)?;
    }
    Ok(())
}

fn read_string_vec(src: &mut impl Read) -> io::Result<Vec<String>> {
    let count = src.read_u16::<LittleEndian>()?;
    (0..count).map(|_| read_string(src)).collect()
}

fn write_qid_vec(dest: &mut impl Write, items: &[WireQid]) -> io::Result<()> {
    let count: u16 = items
        .len()
        .try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many qids"))?;
    dest.write_u16::<LittleEndian>(count)?;
    for item in items {
        item.encode(dest)?;
    }
    Ok(())
}

fn read_qid_vec(src: &mut impl Read) -> io::Result<Vec<WireQid>> {
    let count = src.read_u16::<LittleEndian>()?;
    (0..count).map(|_| WireQid::decode(src)).collect()
}

fn encode_body(dest: &mut impl Write, body: &FCall) -> io::Result<()> {
    use FCall::*;
    match body {
        Tversion { msize, version } => {
            dest.write_u32::<LittleEndian>(*msize)?;
            write_string(dest, version)
        }
        Rversion { msize, version } => {
            dest.write_u32::<LittleEndian>(*msize)?;
            write_string(dest, version)
        }
        Tattach { fid, afid, uname, aname, n_uname } => {
            dest.write_u32::<LittleEndian>(*fid)?;
            dest.write_u32::<LittleEndian>(*afid)?;
            write_string(dest, uname)?;
            write_string(dest, aname)?;
            dest.write_u32::<LittleEndian>(*n_uname)
        }
        Rattach { qid } => qid.encode(dest),
        Twalk { fid, newfid, wnames } => {
            dest.write_u32::<LittleEndian>(*fid)?;
            dest.write_u32::<LittleEndian>(*newfid)?;
            write_string_vec(dest, wnames)
        }
        Rwalk { wqids } => write_qid_vec(dest, wqids),
        Tlopen { fid, flags } => {
            dest.write_u32::<LittleEndian>(*fid)?;
            dest.write_u32::<LittleEndian>(*flags)
        }
        Rlopen { qid, iounit } => {
            qid.encode(dest)?;
            dest.write_u32::<LittleEndian>(*iounit)
        }
        Tread { fid, offset, count } => {
            dest.write_u32::<LittleEndian>(*fid)?;
            dest.write_u64::<LittleEndian>(*offset)?;
            dest.write_u32::<LittleEndian>(*count)
        }
        Rread { data } => write_data(dest, data),
        Twrite { fid, offset, data } => {
            dest.write_u32::<LittleEndian>(*fid)?;
            dest.write_u64::<LittleEndian>(*offset)?;
            write_data(dest, data)
        }
        Rwrite { count } => dest.write_u32::<LittleEndian>(*count),
        Tclunk { fid } => dest.write_u32::<LittleEndian>(*fid),
        Rclunk => Ok(()),
        Tremove { fid } => dest.write_u32::<LittleEndian>(*fid),
        Rremove => Ok(()),
        Tgetattr { fid, req_mask } => {
            dest.write_u32::<LittleEndian>(*fid)?;
            dest.write_u64::<LittleEndian>(*req_mask)
        }
        Rgetattr(a) => {
            dest.write_u64::<LittleEndian>(a.valid)?;
            a.qid.encode(dest)?;
            dest.write_u32::<LittleEndian>(a.mode)?;
            dest.write_u32::<LittleEndian>(a.uid)?;
            dest.write_u32::<LittleEndian>(a.gid)?;
            dest.write_u64::<LittleEndian>(a.nlink)?;
            dest.write_u64::<LittleEndian>(a.rdev)?;
            dest.write_u64::<LittleEndian>(a.size)?;
            dest.write_u64::<LittleEndian>(a.blksize)?;
            dest.write_u64::<LittleEndian>(a.blocks)?;
            dest.write_u64::<LittleEndian>(a.atime_sec)?;
            dest.write_u64::<LittleEndian>(a.atime_nsec)?;
            dest.write_u64::<LittleEndian>(a.mtime_sec)?;
            dest.write_u64::<LittleEndian>(a.mtime_nsec)?;
            dest.write_u64::<LittleEndian>(a.ctime_sec)?;
            dest.write_u64::<LittleEndian>(a.ctime_nsec)
        }
        Tsetattr { fid, valid, mode, uid, gid, size, atime_sec, atime_nsec, mtime_sec, mtime_nsec } => {
            dest.write_u32::<LittleEndian>(*fid)?;
            dest.write_u32::<LittleEndian>(*valid)?;
            dest.write_u32::<LittleEndian>(*mode)?;
            dest.write_u32::<LittleEndian>(*uid)?;
            dest.write_u32::<LittleEndian>(*gid)?;
            dest.write_u64::<LittleEndian>(*size)?;
            dest.write_u64::<LittleEndian>(*atime_sec)?;
            dest.write_u64::<LittleEndian>(*atime_nsec)?;
            dest.write_u64::<LittleEndian>(*mtime_sec)?;
            dest.write_u64::<LittleEndian>(*mtime_nsec)
        }
        Rsetattr => Ok(()),
        Trenameat { olddirfid, oldname, newdirfid, newname } => {
            dest.write_u32::<LittleEndian>(*olddirfid)?;
            write_string(dest, oldname)?;
            dest.write_u32::<LittleEndian>(*newdirfid)?;
            write_string(dest, newname)
        }
        Rrenameat => Ok(()),
        Tunlinkat { dirfid, name, flags } => {
            dest.write_u32::<LittleEndian>(*dirfid)?;
            write_string(dest, name)?;
            dest.write_u32::<LittleEndian>(*flags)
        }
        Runlinkat => Ok(()),
        Tmkdir { dfid, name, mode, gid } => {
            dest.write_u32::<LittleEndian>(*dfid)?;
            write_string(dest, name)?;
            dest.write_u32::<LittleEndian>(*mode)?;
            dest.write_u32::<LittleEndian>(*gid)
        }
        Rmkdir { qid } => qid.encode(dest),
        Tmknod { dfid, name, mode, major, minor, gid } => {
            dest.write_u32::<LittleEndian>(*dfid)?;
            write_string(dest, name)?;
            dest.write_u32::<LittleEndian>(*mode)?;
            dest.write_u32::<LittleEndian>(*major)?;
            dest.write_u32::<LittleEndian>(*minor)?;
            dest.write_u32::<LittleEndian>(*gid)
        }
        Rmknod { qid } => qid.encode(dest),
        Treadlink { fid } => dest.write_u32::<LittleEndian>(*fid),
        Rreadlink { target } => write_string(dest, target),
        Rlerror { ecode } => dest.write_u32::<LittleEndian>(*ecode),
    }
}

fn decode_body(kind: MsgType, src: &mut impl Read) -> io::Result<FCall> {
    use MsgType::*;
    Ok(match kind {
        Tversion => FCall::Tversion { msize: src.read_u32::<LittleEndian>()?, version: read_string(src)? },
        Rversion => FCall::Rversion { msize: src.read_u32::<LittleEndian>()?, version: read_string(src)? },
        Tattach => FCall::Tattach {
            fid: src.read_u32::<LittleEndian>()?,
            afid: src.read_u32::<LittleEndian>()?,
            uname: read_string(src)?,
            aname: read_string(src)?,
            n_uname: src.read_u32::<LittleEndian>()?,
        },
        Rattach => FCall::Rattach { qid: WireQid::decode(src)? },
        Twalk => FCall::Twalk {
            fid: src.read_u32::<LittleEndian>()?,
            newfid: src.read_u32::<LittleEndian>()?,
            wnames: read_string_vec(src)?,
        },
        Rwalk => FCall::Rwalk { wqids: read_qid_vec(src)? },
        Tlopen => FCall::Tlopen { fid: src.read_u32::<LittleEndian>()?, flags: src.read_u32::<LittleEndian>()? },
        Rlopen => FCall::Rlopen { qid: WireQid::decode(src)?, iounit: src.read_u32::<LittleEndian>()? },
        Tread => FCall::Tread {
            fid: src.read_u32::<LittleEndian>()?,
            offset: src.read_u64::<LittleEndian>()?,
            count: src.read_u32::<LittleEndian>()?,
        },
        Rread => FCall::Rread { data: read_data(src)? },
        Twrite => FCall::Twrite {
            fid: src.read_u32::<LittleEndian>()?,
            offset: src.read_u64::<LittleEndian>()?,
            data: read_data(src)?,
        },
        Rwrite => FCall::Rwrite { count: src.read_u32::<LittleEndian>()? },
        Tclunk => FCall::Tclunk { fid: src.read_u32::<LittleEndian>()? },
        Rclunk => FCall::Rclunk,
        Tremove => FCall::Tremove { fid: src.read_u32::<LittleEndian>()? },
        Rremove => FCall::Rremove,
        Tgetattr => FCall::Tgetattr { fid: src.read_u32::<LittleEndian>()?, req_mask: src.read_u64::<LittleEndian>()? },
        Rgetattr => FCall::Rgetattr(Box::new(RGetAttr {
            valid: src.read_u64::<LittleEndian>()?,
            qid: WireQid::decode(src)?,
            mode: src.read_u32::<LittleEndian>()?,
            uid: src.read_u32::<LittleEndian>()?,
            gid: src.read_u32::<LittleEndian>()?,
            nlink: src.read_u64::<LittleEndian>()?,
            rdev: src.read_u64::<LittleEndian>()?,
            size: src.read_u64::<LittleEndian>()?,
            blksize: src.read_u64::<LittleEndian>()?,
            blocks: src.read_u64::<LittleEndian>()?,
            atime_sec: src.read_u64::<LittleEndian>()?,
            atime_nsec: src.read_u64::<LittleEndian>()?,
            mtime_sec: src.read_u64::<LittleEndian>()?,
            mtime_nsec: src.read_u64::<LittleEndian>()?,
            ctime_sec: src.read_u64::<LittleEndian>()?,
            ctime_nsec: src.read_u64::<LittleEndian>()?,
        })),
        Tsetattr => FCall::Tsetattr {
            fid: src.read_u32::<LittleEndian>()?,
            valid: src.read_u32::<LittleEndian>()?,
            mode: src.read_u32::<LittleEndian>()?,
            uid: src.read_u32::<LittleEndian>()?,
            gid: src.read_u32::<LittleEndian>()?,
            size: src.read_u64::<LittleEndian>()?,
            atime_sec: src.read_u64::<LittleEndian>()?,
            atime_nsec: src.read_u64::<LittleEndian>()?,
            mtime_sec: src.read_u64::<LittleEndian>()?,
            mtime_nsec: src.read_u64::<LittleEndian>()?,
        },
        Rsetattr => FCall::Rsetattr,
        Trenameat => FCall::Trenameat {
            olddirfid: src.read_u32::<LittleEndian>()?,
            oldname: read_string(src)?,
            newdirfid: src.read_u32::<LittleEndian>()?,
            newname: read_string(src)?,
        },
        Rrenameat => FCall::Rrenameat,
        Tunlinkat => FCall::Tunlinkat {
            dirfid: src.read_u32::<LittleEndian>()?,
            name: read_string(src)?,
            flags: src.read_u32::<LittleEndian>()?,
        },
        Runlinkat => FCall::Runlinkat,
        Tmkdir => FCall::Tmkdir {
            dfid: src.read_u32::<LittleEndian>()?,
            name: read_string(src)?,
            mode: src.read_u32::<LittleEndian>()?,
            gid: src.read_u32::<LittleEndian>()?,
        },
        Rmkdir => FCall::Rmkdir { qid: WireQid::decode(src)? },
        Tmknod => FCall::Tmknod {
            dfid: src.read_u32::<LittleEndian>()?,
            name: read_string(src)?,
            mode: src.read_u32::<LittleEndian>()?,
            major: src.read_u32::<LittleEndian>()?,
            minor: src.read_u32::<LittleEndian>()?,
            gid: src.read_u32::<LittleEndian>()?,
        },
        Rmknod => FCall::Rmknod { qid: WireQid::decode(src)? },
        Treadlink => FCall::Treadlink { fid: src.read_u32::<LittleEndian>()? },
        Rreadlink => FCall::Rreadlink { target: read_string(src)? },
        Rlerror => FCall::Rlerror { ecode: src.read_u32::<LittleEndian>()? },
    })
}

/// One record in a serialized directory listing (`Tread`/`Rread` against a
/// directory fid — this daemon has no separate `Treaddir` op; reading a
/// directory fid streams these instead). Mirrors the shape of rs9p's
/// `DirEntryData` (`other_examples/`), trimmed to what `server.rs` needs.
#[derive(Debug, Clone, PartialEq)]
pub struct WireDirEntry {
    pub qid: WireQid,
    pub offset: u64,
    pub kind: u8,
    pub name: String,
}

impl WireDirEntry {
    pub fn wire_len(&self) -> usize {
        13 + 8 + 1 + 2 + self.name.len()
    }

    fn encode(&self, dest: &mut impl Write) -> io::Result<()> {
        self.qid.encode(dest)?;
        dest.write_u64::<LittleEndian>(self.offset)?;
        dest.write_u8(self.kind)?;
        write_string(dest, &self.name)
    }

    fn decode(src: &mut impl Read) -> io::Result<Self> {
        let qid = WireQid::decode(src)?;
        let offset = src.read_u64::<LittleEndian>()?;
        let kind = src.read_u8()?;
        let name = read_string(src)?;
        Ok(WireDirEntry { qid, offset, kind, name })
    }
}

/// Concatenates dirents, dropping any entry that would overflow `max_bytes`
/// (the `Tread` `count` field) rather than truncating one mid-record.
pub fn encode_dirents(entries: &[WireDirEntry], max_bytes: usize) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    for entry in entries {
        if out.len() + entry.wire_len() > max_bytes {
            break;
        }
        entry.encode(&mut out)?;
    }
    Ok(out)
}

pub fn decode_dirents(buf: &[u8]) -> io::Result<Vec<WireDirEntry>> {
    let mut cur = Cursor::new(buf);
    let mut out = Vec::new();
    while (cur.position() as usize) < buf.len() {
        out.push(WireDirEntry::decode(&mut cur)?);
    }
    Ok(out)
}

/// Encodes a full framed message: 4-byte little-endian size (including
/// itself) + 1-byte type + 2-byte tag + body.
pub fn encode(msg: &Msg) -> io::Result<Vec<u8>> {
    let mut body_buf = Vec::new();
    encode_body(&mut body_buf, &msg.body)?;
    let size: u32 = (4 + 1 + 2 + body_buf.len())
        .try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "message exceeds u32 size"))?;
    let mut out = Vec::with_capacity(size as usize);
    out.write_u32::<LittleEndian>(size)?;
    out.write_u8(msg.body.msg_type() as u8)?;
    out.write_u16::<LittleEndian>(msg.tag)?;
    out.extend_from_slice(&body_buf);
    Ok(out)
}

/// Reads just the tag out of an otherwise-undecodable message, so a
/// malformed body can still be answered with an `Rlerror` on the right tag
/// instead of dropping the connection.
pub fn peek_tag(buf: &[u8]) -> Option<u16> {
    if buf.len() < 3 {
        return None;
    }
    Some(u16::from_le_bytes([buf[1], buf[2]]))
}

/// Decodes one message from `buf`, which must hold exactly the bytes
/// *after* the leading 4-byte size field (the caller reads that separately
/// to know how much to buffer — see `server.rs`'s framing loop).
pub fn decode(buf: &[u8]) -> FsResult<Msg> {
    let mut cur = Cursor::new(buf);
    let mtype = cur.read_u8().map_err(|_| Error::new(Errno::Proto))?;
    let tag = cur.read_u16::<LittleEndian>().map_err(|_| Error::new(Errno::Proto))?;
    let kind = MsgType::from_u8(mtype).ok_or_else(|| Error::new(Errno::Proto))?;
    let body = decode_body(kind, &mut cur).map_err(|e| Error::with_source(Errno::Proto, e))?;
    Ok(Msg { tag, body })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: Msg) {
        let bytes = encode(&msg).unwrap();
        let size = u32::from_le_bytes(bytes[..4].try_into().unwrap()) as usize;
        assert_eq!(size, bytes.len());
        let decoded = decode(&bytes[4..]).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn roundtrips_tversion() {
        roundtrip(Msg { tag: NOTAG, body: FCall::Tversion { msize: 8192, version: "9P2000.L".into() } });
    }

    #[test]
    fn roundtrips_twalk_with_multiple_components() {
        roundtrip(Msg {
            tag: 7,
            body: FCall::Twalk { fid: 1, newfid: 2, wnames: vec!["mounts".into(), "ipfs".into()] },
        });
    }

    #[test]
    fn roundtrips_rread_with_data() {
        roundtrip(Msg { tag: 3, body: FCall::Rread { data: vec![1, 2, 3, 4, 5] } });
    }

    #[test]
    fn roundtrips_rgetattr() {
        let qid = WireQid { kind: QidKind::Directory.to_wire(), version: 0, path: 42 };
        roundtrip(Msg {
            tag: 1,
            body: FCall::Rgetattr(Box::new(RGetAttr {
                valid: 0,
                qid,
                mode: 0o755,
                uid: 0,
                gid: 0,
                nlink: 1,
                rdev: 0,
                size: 0,
                blksize: 4096,
                blocks: 0,
                atime_sec: 0,
                atime_nsec: 0,
                mtime_sec: 0,
                mtime_nsec: 0,
                ctime_sec: 0,
                ctime_nsec: 0,
            })),
        });
    }

    #[test]
    fn wire_qid_kind_roundtrips_through_qid() {
        let qid = Qid { kind: QidKind::Symlink, version: 3, path: 99 };
        let wire: WireQid = qid.into();
        assert_eq!(wire.kind(), QidKind::Symlink);
        assert_eq!(wire.version, 3);
        assert_eq!(wire.path, 99);
    }

    #[test]
    fn rejects_unknown_message_type() {
        let buf = [255u8, 0, 0];
        assert!(decode(&buf).is_err());
    }

    #[test]
    fn dirents_roundtrip_and_respect_byte_budget() {
        let entries = vec![
            WireDirEntry { qid: WireQid { kind: 0, version: 0, path: 1 }, offset: 1, kind: 0, name: "a".into() },
            WireDirEntry { qid: WireQid { kind: 0x80, version: 0, path: 2 }, offset: 2, kind: 4, name: "bb".into() },
        ];
        let full = encode_dirents(&entries, 4096).unwrap();
        assert_eq!(decode_dirents(&full).unwrap(), entries);

        let budget = entries[0].wire_len();
        let partial = encode_dirents(&entries, budget).unwrap();
        assert_eq!(decode_dirents(&partial).unwrap(), vec![entries[0].clone()]);
    }

    #[test]
    fn peek_tag_reads_tag_from_malformed_message() {
        let mut buf = Vec::new();
        buf.write_u8(255).unwrap();
        buf.write_u16::<LittleEndian>(42).unwrap();
        assert_eq!(peek_tag(&buf), Some(42));
        assert_eq!(peek_tag(&[1, 2]), None);
    }

    #[test]
    fn rejects_truncated_body() {
        // Tversion header claims a version string but the buffer ends early.
        let mut buf = Vec::new();
        buf.write_u8(MsgType::Tversion as u8).unwrap();
        buf.write_u16::<LittleEndian>(0).unwrap();
        buf.write_u32::<LittleEndian>(8192).unwrap();
        buf.write_u16::<LittleEndian>(20).unwrap(); // claims 20 bytes, none follow
        assert!(decode(&buf).is_err());
    }
}
