//! On-disk Strata repositories.
//!
//! A repository is a directory holding a content-addressed loose object
//! store (`objects/<xx>/<rest>.<ext>`), refs, per-remote trust keyrings,
//! pull state markers, and a TOML config. All writes go through temp files
//! in the repository's own `tmp/` directory and are renamed into place.

use std::collections::BTreeMap;
use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use flate2::write::ZlibEncoder;
use flate2::Compression;
use tempfile::NamedTempFile;
use thiserror::Error;

use strata_types::{
    from_canonical_slice, validate_checksum_string, validate_refname, Commit, DirMeta, DirTree,
    FileHeader, ObjectId, ObjectKind, ObjectName, TypeError, MAX_METADATA_SIZE,
};

mod config;
pub mod content;
pub mod sign;
mod transaction;

pub use config::{CoreConfig, RemoteConfig, RepoConfig, RepoMode};
pub use sign::{Keyring, SignatureList};
pub use transaction::{Transaction, TRANSACTION_MARKER};

#[derive(Error, Debug)]
pub enum RepoError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error("Config encode error: {0}")]
    ConfigEncode(#[from] toml::ser::Error),
    #[error("No such object {0}")]
    MissingObject(ObjectName),
    #[error("Invalid object: {0}")]
    InvalidObject(String),
    #[error("No such ref '{0}'")]
    RefNotFound(String),
    #[error("Signature error: {0}")]
    BadSignature(String),
    #[error("Not a Strata repository: {0}")]
    NotARepository(PathBuf),
    #[error("Repository already initialized at {0}")]
    AlreadyInitialized(PathBuf),
}

/// Whether a stored commit's transitive closure is known to be complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitState {
    Complete,
    Partial,
}

impl CommitState {
    pub fn is_partial(&self) -> bool {
        matches!(self, CommitState::Partial)
    }
}

pub struct Repository {
    path: PathBuf,
    config: RepoConfig,
}

impl Repository {
    /// Create a new repository at `path`.
    pub fn init(path: impl Into<PathBuf>, mode: RepoMode) -> Result<Self, RepoError> {
        let path = path.into();
        if path.join("config").exists() {
            return Err(RepoError::AlreadyInitialized(path));
        }
        for dir in [
            "objects",
            "tmp",
            "state",
            "refs/heads",
            "refs/remotes",
            "keys",
        ] {
            fs::create_dir_all(path.join(dir))?;
        }
        let config = RepoConfig::new(mode);
        let repo = Self { path, config };
        repo.save_config()?;
        tracing::info!(path = %repo.path.display(), %mode, "initialized repository");
        Ok(repo)
    }

    /// Open an existing repository.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, RepoError> {
        let path = path.into();
        let config_path = path.join("config");
        let text = match fs::read_to_string(&config_path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(RepoError::NotARepository(path))
            }
            Err(err) => return Err(err.into()),
        };
        let config = RepoConfig::from_toml_str(&text)?;
        // tmp and state may be missing in repositories created by older
        // tools; both are recreated on demand.
        fs::create_dir_all(path.join("tmp"))?;
        Ok(Self { path, config })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> RepoMode {
        self.config.core.mode
    }

    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    pub fn remote_config(&self, name: &str) -> Option<&RemoteConfig> {
        self.config.remotes.get(name)
    }

    pub fn add_remote(&mut self, name: &str, remote: RemoteConfig) -> Result<(), RepoError> {
        self.config.remotes.insert(name.to_string(), remote);
        self.save_config()
    }

    pub fn save_config(&self) -> Result<(), RepoError> {
        let text = self.config.to_toml_string()?;
        // init runs before tmp/ exists, so write directly.
        fs::write(self.path.join("config"), text)?;
        Ok(())
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.path.join("tmp")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.path.join("state")
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.path.join("keys")
    }

    fn refs_dir(&self) -> PathBuf {
        self.path.join("refs")
    }

    /// Loose path of an object in this repository's own mode.
    pub fn object_path(&self, id: ObjectId, kind: ObjectKind) -> PathBuf {
        let hex = id.to_hex();
        self.path
            .join("objects")
            .join(&hex[..2])
            .join(format!("{}.{}", &hex[2..], kind.extension(self.mode().is_archive())))
    }

    fn detached_metadata_path(&self, id: ObjectId) -> PathBuf {
        let hex = id.to_hex();
        self.path
            .join("objects")
            .join(&hex[..2])
            .join(format!("{}.commitmeta", &hex[2..]))
    }

    pub fn has_object(&self, name: &ObjectName) -> bool {
        self.object_path(name.id, name.kind).exists()
    }

    /// Raw canonical bytes of a stored metadata object.
    pub fn load_metadata_bytes(&self, name: &ObjectName) -> Result<Vec<u8>, RepoError> {
        debug_assert!(name.kind.is_meta());
        let path = self.object_path(name.id, name.kind);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(RepoError::MissingObject(*name))
            }
            Err(err) => return Err(err.into()),
        };
        if bytes.len() as u64 > MAX_METADATA_SIZE {
            return Err(RepoError::InvalidObject(format!(
                "metadata object {name} exceeds maximum size"
            )));
        }
        Ok(bytes)
    }

    pub fn load_commit(&self, id: ObjectId) -> Result<(Commit, CommitState), RepoError> {
        let bytes = self.load_metadata_bytes(&ObjectName::new(id, ObjectKind::Commit))?;
        let commit: Commit = from_canonical_slice(&bytes)?;
        let state = if self.commit_partial_exists(id) {
            CommitState::Partial
        } else {
            CommitState::Complete
        };
        Ok((commit, state))
    }

    pub fn load_dirtree(&self, id: ObjectId) -> Result<DirTree, RepoError> {
        let bytes = self.load_metadata_bytes(&ObjectName::new(id, ObjectKind::DirTree))?;
        Ok(from_canonical_slice(&bytes)?)
    }

    pub fn load_dirmeta(&self, id: ObjectId) -> Result<DirMeta, RepoError> {
        let bytes = self.load_metadata_bytes(&ObjectName::new(id, ObjectKind::DirMeta))?;
        Ok(from_canonical_slice(&bytes)?)
    }

    /// Store a metadata object, returning the digest it was stored under.
    /// Callers that fetched the object under an expected digest compare it
    /// against the returned one.
    pub fn write_metadata(&self, kind: ObjectKind, bytes: &[u8]) -> Result<ObjectId, RepoError> {
        debug_assert!(kind.is_meta());
        if bytes.len() as u64 > MAX_METADATA_SIZE {
            return Err(RepoError::InvalidObject(
                "metadata object exceeds maximum size".to_string(),
            ));
        }
        let id = ObjectId::digest(bytes);
        let path = self.object_path(id, kind);
        if !path.exists() {
            self.persist_bytes(&path, bytes)?;
            tracing::debug!(object = %ObjectName::new(id, kind), "stored metadata object");
        }
        Ok(id)
    }

    /// Store a file object from raw header bytes and a reader over the raw
    /// (uncompressed) body, returning the canonical digest it was stored
    /// under.
    pub fn write_content<R: Read>(
        &self,
        header_raw: &[u8],
        body: &mut R,
    ) -> Result<ObjectId, RepoError> {
        let mut temp = NamedTempFile::new_in(self.tmp_dir())?;
        let len = u32::try_from(header_raw.len())
            .map_err(|_| RepoError::InvalidObject("content header too large".to_string()))?;
        temp.as_file_mut().write_all(&len.to_be_bytes())?;
        temp.as_file_mut().write_all(header_raw)?;

        let id = if self.mode().is_archive() {
            let mut encoder = ZlibEncoder::new(temp.as_file_mut(), Compression::default());
            let id = content::digest_content(header_raw, body, &mut encoder)?;
            encoder.finish()?;
            id
        } else {
            content::digest_content(header_raw, body, temp.as_file_mut())?
        };

        let path = self.object_path(id, ObjectKind::File);
        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            temp.persist(&path).map_err(|err| RepoError::Io(err.error))?;
            tracing::debug!(object = %ObjectName::new(id, ObjectKind::File), "stored content object");
        }
        Ok(id)
    }

    /// Store a file object from its canonical content stream.
    pub fn write_content_canonical(&self, canonical: &[u8]) -> Result<ObjectId, RepoError> {
        let mut cursor = Cursor::new(canonical);
        let (_header, raw) = content::read_header(&mut cursor)?;
        self.write_content(&raw, &mut cursor)
    }

    /// Load a stored file object as (header, raw body bytes).
    pub fn load_content(&self, id: ObjectId) -> Result<(FileHeader, Vec<u8>), RepoError> {
        let path = self.object_path(id, ObjectKind::File);
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(RepoError::MissingObject(ObjectName::new(id, ObjectKind::File)))
            }
            Err(err) => return Err(err.into()),
        };
        let mut reader = std::io::BufReader::new(file);
        let (header, _raw) = content::read_header(&mut reader)?;
        let mut body = Vec::new();
        if self.mode().is_archive() {
            flate2::read::ZlibDecoder::new(reader).read_to_end(&mut body)?;
        } else {
            reader.read_to_end(&mut body)?;
        }
        Ok((header, body))
    }

    /// Canonical content stream of a stored file object, independent of
    /// this repository's storage mode.
    pub fn content_canonical_bytes(&self, id: ObjectId) -> Result<Vec<u8>, RepoError> {
        let path = self.object_path(id, ObjectKind::File);
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(RepoError::MissingObject(ObjectName::new(id, ObjectKind::File)))
            }
            Err(err) => return Err(err.into()),
        };
        let mut reader = std::io::BufReader::new(file);
        let (_header, raw) = content::read_header(&mut reader)?;
        let len = raw.len() as u32;
        let mut canonical = Vec::new();
        canonical.extend_from_slice(&len.to_be_bytes());
        canonical.extend_from_slice(&raw);
        if self.mode().is_archive() {
            flate2::read::ZlibDecoder::new(reader).read_to_end(&mut canonical)?;
        } else {
            reader.read_to_end(&mut canonical)?;
        }
        Ok(canonical)
    }

    /// Adopt an already-verified archive-form temp file as a loose file
    /// object. Only meaningful for archive-z2 repositories, where the
    /// fetched representation is the stored representation.
    pub fn adopt_archive_object(
        &self,
        id: ObjectId,
        temp: NamedTempFile,
    ) -> Result<(), RepoError> {
        debug_assert!(self.mode().is_archive());
        let path = self.object_path(id, ObjectKind::File);
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        temp.persist(&path).map_err(|err| RepoError::Io(err.error))?;
        Ok(())
    }

    pub fn write_detached_metadata(
        &self,
        id: ObjectId,
        metadata: &BTreeMap<String, serde_json::Value>,
    ) -> Result<(), RepoError> {
        let bytes = serde_json::to_vec(metadata)?;
        self.persist_bytes(&self.detached_metadata_path(id), &bytes)
    }

    pub fn load_detached_metadata(
        &self,
        id: ObjectId,
    ) -> Result<Option<BTreeMap<String, serde_json::Value>>, RepoError> {
        match fs::read(self.detached_metadata_path(id)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Copy one object out of another local repository, verifying its
    /// digest on the way in.
    pub fn import_object_from(
        &self,
        source: &Repository,
        name: &ObjectName,
    ) -> Result<(), RepoError> {
        if self.has_object(name) {
            return Ok(());
        }
        let written = if name.kind.is_meta() {
            let bytes = source.load_metadata_bytes(name)?;
            self.write_metadata(name.kind, &bytes)?
        } else {
            let canonical = source.content_canonical_bytes(name.id)?;
            self.write_content_canonical(&canonical)?
        };
        if written != name.id {
            return Err(RepoError::InvalidObject(format!(
                "corrupted object {name} in source repository; digest is {written}"
            )));
        }
        tracing::debug!(object = %name, "imported object from local repository");
        Ok(())
    }

    fn commitpartial_path(&self, id: ObjectId) -> PathBuf {
        self.state_dir().join(format!("{id}.commitpartial"))
    }

    /// Create the commit-partial marker. Racing creators are fine; an
    /// existing marker is not an error.
    pub fn mark_commit_partial(&self, id: ObjectId) -> Result<(), RepoError> {
        fs::create_dir_all(self.state_dir())?;
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.commitpartial_path(id))
        {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn commit_partial_exists(&self, id: ObjectId) -> bool {
        self.commitpartial_path(id).exists()
    }

    pub fn clear_commit_partial(&self, id: ObjectId) -> Result<(), RepoError> {
        match fs::remove_file(self.commitpartial_path(id)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Write a ref file. `remote = None` is a local head.
    pub fn write_ref(
        &self,
        remote: Option<&str>,
        refname: &str,
        target: ObjectId,
    ) -> Result<(), RepoError> {
        validate_refname(refname)?;
        let path = match remote {
            Some(remote) => self.refs_dir().join("remotes").join(remote).join(refname),
            None => self.refs_dir().join("heads").join(refname),
        };
        self.persist_bytes(&path, format!("{target}\n").as_bytes())
    }

    /// Resolve a rev: a full checksum string, a local head, or a
    /// remote-tracking ref like `origin/main`.
    pub fn resolve_rev(
        &self,
        refspec: &str,
        allow_noent: bool,
    ) -> Result<Option<ObjectId>, RepoError> {
        if validate_checksum_string(refspec).is_ok() {
            return Ok(Some(ObjectId::from_hex(refspec)?));
        }
        for candidate in [
            self.refs_dir().join("heads").join(refspec),
            self.refs_dir().join("remotes").join(refspec),
        ] {
            match fs::read_to_string(&candidate) {
                Ok(text) => {
                    let trimmed = text.trim();
                    validate_checksum_string(trimmed)?;
                    return Ok(Some(ObjectId::from_hex(trimmed)?));
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            }
        }
        if allow_noent {
            Ok(None)
        } else {
            Err(RepoError::RefNotFound(refspec.to_string()))
        }
    }

    /// Every ref in the repository, keyed by path relative to `refs/`
    /// (`heads/main`, `remotes/origin/main`, ...).
    pub fn list_refs(&self) -> Result<BTreeMap<String, ObjectId>, RepoError> {
        fn walk(
            root: &Path,
            dir: &Path,
            out: &mut BTreeMap<String, ObjectId>,
        ) -> Result<(), RepoError> {
            let entries = match fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(err) => return Err(err.into()),
            };
            for entry in entries {
                let entry = entry?;
                let path = entry.path();
                if path.is_dir() {
                    walk(root, &path, out)?;
                } else {
                    let text = fs::read_to_string(&path)?;
                    let trimmed = text.trim();
                    validate_checksum_string(trimmed)?;
                    let rel = path
                        .strip_prefix(root)
                        .map_err(|_| RepoError::InvalidObject("ref outside refs dir".to_string()))?
                        .to_string_lossy()
                        .replace('\\', "/");
                    out.insert(rel, ObjectId::from_hex(trimmed)?);
                }
            }
            Ok(())
        }

        let mut out = BTreeMap::new();
        let root = self.refs_dir();
        walk(&root, &root, &mut out)?;
        Ok(out)
    }

    /// Trusted keys for a remote; an absent keyring file is an empty ring.
    pub fn keyring_for_remote(&self, remote: &str) -> Result<Keyring, RepoError> {
        match fs::read_to_string(self.keys_dir().join(format!("{remote}.pub"))) {
            Ok(text) => Keyring::from_hex_lines(&text),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Keyring::empty()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn add_trusted_key(&self, remote: &str, key_hex: &str) -> Result<(), RepoError> {
        fs::create_dir_all(self.keys_dir())?;
        let path = self.keys_dir().join(format!("{remote}.pub"));
        let mut text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(err.into()),
        };
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(key_hex.trim());
        text.push('\n');
        fs::write(path, text)?;
        Ok(())
    }

    /// Atomically replace a file at the repository root (`summary`,
    /// `summary.sig`).
    pub fn write_repo_file(&self, name: &str, bytes: &[u8]) -> Result<(), RepoError> {
        self.persist_bytes(&self.path.join(name), bytes)
    }

    pub fn read_repo_file(&self, name: &str) -> Result<Option<Vec<u8>>, RepoError> {
        match fs::read(self.path.join(name)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn persist_bytes(&self, path: &Path, bytes: &[u8]) -> Result<(), RepoError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut temp = NamedTempFile::new_in(self.tmp_dir())?;
        temp.write_all(bytes)?;
        temp.persist(path).map_err(|err| RepoError::Io(err.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn bare_repo(dir: &TempDir) -> Repository {
        Repository::init(dir.path().join("repo"), RepoMode::Bare).unwrap()
    }

    fn archive_repo(dir: &TempDir) -> Repository {
        Repository::init(dir.path().join("archive"), RepoMode::ArchiveZ2).unwrap()
    }

    #[test]
    fn metadata_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let repo = bare_repo(&dir);

        let tree = DirTree::default();
        let bytes = tree.canonical_bytes().unwrap();
        let id = repo.write_metadata(ObjectKind::DirTree, &bytes).unwrap();
        assert_eq!(id, tree.digest().unwrap());

        let name = ObjectName::new(id, ObjectKind::DirTree);
        assert!(repo.has_object(&name));
        assert_eq!(repo.load_dirtree(id).unwrap(), tree);
        // A second write of the same object is a no-op.
        assert_eq!(repo.write_metadata(ObjectKind::DirTree, &bytes).unwrap(), id);
    }

    #[test]
    fn content_store_roundtrip_in_both_modes() {
        let dir = TempDir::new().unwrap();
        let header = FileHeader::regular(0o100644, 9);
        let canonical = content::encode_content_stream(&header, b"some data").unwrap();
        let expected = ObjectId::digest(&canonical);

        for repo in [bare_repo(&dir), archive_repo(&dir)] {
            let id = repo.write_content_canonical(&canonical).unwrap();
            assert_eq!(id, expected);
            let (loaded_header, body) = repo.load_content(id).unwrap();
            assert_eq!(loaded_header, header);
            assert_eq!(body, b"some data");
            assert_eq!(repo.content_canonical_bytes(id).unwrap(), canonical);
        }
    }

    #[test]
    fn import_between_modes_preserves_digests() {
        let dir = TempDir::new().unwrap();
        let source = archive_repo(&dir);
        let dest = bare_repo(&dir);

        let canonical = content::encode_content_stream(
            &FileHeader::regular(0o100644, 5),
            b"hello",
        )
        .unwrap();
        let id = source.write_content_canonical(&canonical).unwrap();
        let name = ObjectName::new(id, ObjectKind::File);

        dest.import_object_from(&source, &name).unwrap();
        assert!(dest.has_object(&name));
        assert_eq!(dest.content_canonical_bytes(id).unwrap(), canonical);
    }

    #[test]
    fn commit_partial_markers() {
        let dir = TempDir::new().unwrap();
        let repo = bare_repo(&dir);
        let id = ObjectId::digest(b"commit");

        assert!(!repo.commit_partial_exists(id));
        repo.mark_commit_partial(id).unwrap();
        repo.mark_commit_partial(id).unwrap();
        assert!(repo.commit_partial_exists(id));
        repo.clear_commit_partial(id).unwrap();
        repo.clear_commit_partial(id).unwrap();
        assert!(!repo.commit_partial_exists(id));
    }

    #[test]
    fn partial_marker_reflects_in_commit_state() {
        let dir = TempDir::new().unwrap();
        let repo = bare_repo(&dir);
        let commit = Commit {
            metadata: BTreeMap::new(),
            parent: None,
            related: Vec::new(),
            subject: "s".to_string(),
            body: String::new(),
            timestamp: 1,
            root_tree: ObjectId::digest(b"t"),
            root_meta: ObjectId::digest(b"m"),
        };
        let id = repo
            .write_metadata(ObjectKind::Commit, &commit.canonical_bytes().unwrap())
            .unwrap();

        assert!(!repo.load_commit(id).unwrap().1.is_partial());
        repo.mark_commit_partial(id).unwrap();
        assert!(repo.load_commit(id).unwrap().1.is_partial());
    }

    #[test]
    fn resolve_rev_variants() {
        let dir = TempDir::new().unwrap();
        let repo = bare_repo(&dir);
        let target = ObjectId::digest(b"tip");

        repo.write_ref(None, "main", target).unwrap();
        repo.write_ref(Some("origin"), "main", target).unwrap();

        assert_eq!(repo.resolve_rev("main", false).unwrap(), Some(target));
        assert_eq!(repo.resolve_rev("origin/main", false).unwrap(), Some(target));
        assert_eq!(
            repo.resolve_rev(&target.to_hex(), false).unwrap(),
            Some(target)
        );
        assert_eq!(repo.resolve_rev("missing", true).unwrap(), None);
        assert!(repo.resolve_rev("missing", false).is_err());

        let refs = repo.list_refs().unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs["heads/main"], target);
        assert_eq!(refs["remotes/origin/main"], target);
    }

    #[test]
    fn detached_metadata_roundtrip() {
        let dir = TempDir::new().unwrap();
        let repo = bare_repo(&dir);
        let id = ObjectId::digest(b"c");

        assert!(repo.load_detached_metadata(id).unwrap().is_none());

        let mut meta = BTreeMap::new();
        meta.insert(
            "signatures".to_string(),
            serde_json::json!(["00aa", "11bb"]),
        );
        repo.write_detached_metadata(id, &meta).unwrap();
        assert_eq!(repo.load_detached_metadata(id).unwrap(), Some(meta));
    }

    #[test]
    fn oversized_metadata_is_rejected() {
        let dir = TempDir::new().unwrap();
        let repo = bare_repo(&dir);
        let huge = vec![b'x'; (MAX_METADATA_SIZE + 1) as usize];
        assert!(repo.write_metadata(ObjectKind::DirMeta, &huge).is_err());
    }
}
