//! Core types for Strata repositories.
//!
//! This crate defines the object model shared by the store and the pull
//! engine: digests, object names and kinds, the commit/tree/meta/file data
//! structures, and their canonical encodings.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub mod hex;

/// Largest acceptable metadata object (commit, dir-tree, dir-meta, summary,
/// delta superblock). Content objects are unbounded.
pub const MAX_METADATA_SIZE: u64 = 10 * 1024 * 1024;

/// Maximum object-graph recursion depth before a pull is aborted.
pub const MAX_RECURSION: u32 = 256;

/// Newest static-delta part format this implementation understands.
pub const DELTA_PART_VERSION: u32 = 0;

#[derive(Error, Debug)]
pub enum TypeError {
    #[error("Invalid checksum string '{0}'")]
    InvalidChecksum(String),
    #[error("Invalid object kind '{0}'")]
    InvalidObjectKind(String),
    #[error("Invalid ref name '{0}'")]
    InvalidRefName(String),
    #[error("Invalid filename '{0}'")]
    InvalidFileName(String),
    #[error("Object encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// A 32-byte BLAKE3 object digest, rendered as 64 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectId([u8; 32]);

impl ObjectId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        validate_checksum_string(s)?;
        let raw = hex::decode(s).ok_or_else(|| TypeError::InvalidChecksum(s.to_string()))?;
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&raw);
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Digest of a byte slice; the identity of every metadata object and of
    /// the canonical content stream of every file object.
    pub fn digest(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl TryFrom<String> for ObjectId {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, TypeError> {
        Self::from_hex(&s)
    }
}

impl From<ObjectId> for String {
    fn from(id: ObjectId) -> String {
        id.to_hex()
    }
}

/// The four object kinds of a Strata repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Commit,
    DirTree,
    DirMeta,
    File,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Commit => "commit",
            ObjectKind::DirTree => "dirtree",
            ObjectKind::DirMeta => "dirmeta",
            ObjectKind::File => "file",
        }
    }

    pub fn parse(s: &str) -> Result<Self, TypeError> {
        match s {
            "commit" => Ok(ObjectKind::Commit),
            "dirtree" => Ok(ObjectKind::DirTree),
            "dirmeta" => Ok(ObjectKind::DirMeta),
            "file" => Ok(ObjectKind::File),
            other => Err(TypeError::InvalidObjectKind(other.to_string())),
        }
    }

    /// Commits, dir-trees and dir-metas are metadata; files are content.
    pub fn is_meta(&self) -> bool {
        !matches!(self, ObjectKind::File)
    }

    /// Loose-file extension for this kind. File objects are stored
    /// compressed (`filez`) in archive repositories and raw (`file`) in
    /// bare ones; metadata extensions do not vary by mode.
    pub fn extension(&self, archive: bool) -> &'static str {
        match self {
            ObjectKind::Commit => "commit",
            ObjectKind::DirTree => "dirtree",
            ObjectKind::DirMeta => "dirmeta",
            ObjectKind::File => {
                if archive {
                    "filez"
                } else {
                    "file"
                }
            }
        }
    }

    /// One-byte tag used in delta part frames and fallback entries.
    pub fn wire_tag(&self) -> u8 {
        match self {
            ObjectKind::File => 1,
            ObjectKind::DirTree => 2,
            ObjectKind::DirMeta => 3,
            ObjectKind::Commit => 4,
        }
    }

    pub fn from_wire_tag(tag: u8) -> Result<Self, TypeError> {
        match tag {
            1 => Ok(ObjectKind::File),
            2 => Ok(ObjectKind::DirTree),
            3 => Ok(ObjectKind::DirMeta),
            4 => Ok(ObjectKind::Commit),
            other => Err(TypeError::InvalidObjectKind(other.to_string())),
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `(digest, kind)` pair naming one object. The canonical string form
/// `<hex>.<kind>` is used as a set and map key throughout the pull engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectName {
    pub id: ObjectId,
    pub kind: ObjectKind,
}

impl ObjectName {
    pub fn new(id: ObjectId, kind: ObjectKind) -> Self {
        Self { id, kind }
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.id, self.kind)
    }
}

/// A commit object: snapshot metadata plus the digests of its root tree,
/// root tree metadata and optional parent commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub parent: Option<ObjectId>,
    #[serde(default)]
    pub related: Vec<RelatedRef>,
    pub subject: String,
    #[serde(default)]
    pub body: String,
    pub timestamp: u64,
    pub root_tree: ObjectId,
    pub root_meta: ObjectId,
}

/// A named commit referenced by, but not part of, a commit's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedRef {
    pub name: String,
    pub id: ObjectId,
}

/// A directory tree object: file entries and subdirectory entries, each
/// pointing at further objects by digest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirTree {
    #[serde(default)]
    pub files: Vec<FileEntry>,
    #[serde(default)]
    pub dirs: Vec<DirEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub id: ObjectId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub tree: ObjectId,
    pub meta: ObjectId,
}

/// Directory metadata: mode, ownership and extended attributes. A leaf
/// object; references nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirMeta {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    #[serde(default)]
    pub xattrs: BTreeMap<String, Vec<u8>>,
}

impl Default for DirMeta {
    fn default() -> Self {
        Self {
            mode: 0o40755,
            uid: 0,
            gid: 0,
            xattrs: BTreeMap::new(),
        }
    }
}

/// The header of a file object's canonical content stream: file-info and
/// extended attributes. The content bytes follow the header on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHeader {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    #[serde(default)]
    pub symlink_target: Option<String>,
    #[serde(default)]
    pub xattrs: BTreeMap<String, Vec<u8>>,
}

impl FileHeader {
    pub fn regular(mode: u32, size: u64) -> Self {
        Self {
            mode,
            uid: 0,
            gid: 0,
            size,
            symlink_target: None,
            xattrs: BTreeMap::new(),
        }
    }

    pub fn symlink(target: impl Into<String>) -> Self {
        let target = target.into();
        Self {
            mode: 0o120777,
            uid: 0,
            gid: 0,
            size: 0,
            symlink_target: Some(target),
            xattrs: BTreeMap::new(),
        }
    }

    pub fn is_symlink(&self) -> bool {
        self.symlink_target.is_some()
    }
}

/// Canonical encoding of a metadata object. Field order is fixed by the
/// struct definitions and all maps are ordered, so the output is stable.
pub fn to_canonical_vec<T: Serialize>(value: &T) -> Result<Vec<u8>, TypeError> {
    Ok(serde_json::to_vec(value)?)
}

pub fn from_canonical_slice<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, TypeError> {
    Ok(serde_json::from_slice(bytes)?)
}

impl Commit {
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, TypeError> {
        to_canonical_vec(self)
    }

    pub fn digest(&self) -> Result<ObjectId, TypeError> {
        Ok(ObjectId::digest(&self.canonical_bytes()?))
    }
}

impl DirTree {
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, TypeError> {
        to_canonical_vec(self)
    }

    pub fn digest(&self) -> Result<ObjectId, TypeError> {
        Ok(ObjectId::digest(&self.canonical_bytes()?))
    }
}

impl DirMeta {
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, TypeError> {
        to_canonical_vec(self)
    }

    pub fn digest(&self) -> Result<ObjectId, TypeError> {
        Ok(ObjectId::digest(&self.canonical_bytes()?))
    }
}

/// Checks that `s` is exactly 64 lowercase hex characters.
pub fn validate_checksum_string(s: &str) -> Result<(), TypeError> {
    if s.len() != 64 || !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return Err(TypeError::InvalidChecksum(s.to_string()));
    }
    Ok(())
}

/// Ref names are non-empty slash-separated components of
/// `[A-Za-z0-9._-]`, with no empty, `.`-only or `..` components.
pub fn validate_refname(name: &str) -> Result<(), TypeError> {
    let invalid = || TypeError::InvalidRefName(name.to_string());
    if name.is_empty() || name.starts_with('/') || name.ends_with('/') {
        return Err(invalid());
    }
    for component in name.split('/') {
        if component.is_empty() || component == "." || component == ".." {
            return Err(invalid());
        }
        if !component
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
        {
            return Err(invalid());
        }
    }
    Ok(())
}

/// File and directory names inside a tree must be single non-empty path
/// components: no separators, no NUL, not `.` or `..`.
pub fn validate_filename(name: &str) -> Result<(), TypeError> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\0')
    {
        return Err(TypeError::InvalidFileName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn some_id(fill: u8) -> ObjectId {
        ObjectId::from_bytes([fill; 32])
    }

    #[test]
    fn object_id_hex_roundtrip() {
        let id = ObjectId::digest(b"hello world");
        let hex = id.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(ObjectId::from_hex(&hex).unwrap(), id);
    }

    #[test]
    fn object_id_rejects_bad_hex() {
        assert!(ObjectId::from_hex("abc").is_err());
        assert!(ObjectId::from_hex(&"G".repeat(64)).is_err());
        // Uppercase is not canonical.
        assert!(ObjectId::from_hex(&"AB".repeat(32)).is_err());
    }

    #[test]
    fn object_name_string_form() {
        let name = ObjectName::new(some_id(0xab), ObjectKind::DirTree);
        assert_eq!(name.to_string(), format!("{}.dirtree", "ab".repeat(32)));
    }

    #[test]
    fn kind_wire_tags_roundtrip() {
        for kind in [
            ObjectKind::Commit,
            ObjectKind::DirTree,
            ObjectKind::DirMeta,
            ObjectKind::File,
        ] {
            assert_eq!(ObjectKind::from_wire_tag(kind.wire_tag()).unwrap(), kind);
        }
        assert!(ObjectKind::from_wire_tag(0).is_err());
        assert!(ObjectKind::from_wire_tag(9).is_err());
    }

    #[test]
    fn commit_canonical_encoding_is_stable() {
        let commit = Commit {
            metadata: BTreeMap::new(),
            parent: None,
            related: Vec::new(),
            subject: "initial".to_string(),
            body: String::new(),
            timestamp: 1700000000,
            root_tree: some_id(1),
            root_meta: some_id(2),
        };
        let a = commit.canonical_bytes().unwrap();
        let b = commit.canonical_bytes().unwrap();
        assert_eq!(a, b);

        let decoded: Commit = from_canonical_slice(&a).unwrap();
        assert_eq!(decoded, commit);
        assert_eq!(decoded.digest().unwrap(), commit.digest().unwrap());
    }

    #[test]
    fn parent_changes_commit_digest() {
        let mut commit = Commit {
            metadata: BTreeMap::new(),
            parent: None,
            related: Vec::new(),
            subject: "x".to_string(),
            body: String::new(),
            timestamp: 0,
            root_tree: some_id(1),
            root_meta: some_id(2),
        };
        let root_digest = commit.digest().unwrap();
        commit.parent = Some(some_id(3));
        assert_ne!(commit.digest().unwrap(), root_digest);
    }

    #[test]
    fn refname_validation() {
        assert!(validate_refname("main").is_ok());
        assert!(validate_refname("linux/x86_64/stable").is_ok());
        assert!(validate_refname("v2024.1").is_ok());
        assert!(validate_refname("").is_err());
        assert!(validate_refname("/main").is_err());
        assert!(validate_refname("main/").is_err());
        assert!(validate_refname("a//b").is_err());
        assert!(validate_refname("a/../b").is_err());
        assert!(validate_refname("sp ace").is_err());
    }

    #[test]
    fn filename_validation() {
        assert!(validate_filename("hello.txt").is_ok());
        assert!(validate_filename("..").is_err());
        assert!(validate_filename(".").is_err());
        assert!(validate_filename("a/b").is_err());
        assert!(validate_filename("nul\0byte").is_err());
        assert!(validate_filename("").is_err());
    }
}
