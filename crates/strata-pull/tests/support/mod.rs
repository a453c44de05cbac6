//! Fixtures for pull tests: remote repository builders, summaries,
//! signatures, and static deltas laid out exactly as a remote serves them.

#![allow(dead_code)]

pub mod server;
pub use server::TestServer;

use ed25519_dalek::{Signer as _, SigningKey};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write as _;
use std::path::Path;

use strata_pull::{
    delta_name, DeltaFallback, DeltaPartHeader, DeltaSuperblock, Summary, SummaryRef,
    STATIC_DELTAS_KEY,
};
use strata_repo::{content, Repository};
use strata_types::{
    hex, Commit, DirEntry, DirMeta, DirTree, FileEntry, FileHeader, ObjectId, ObjectKind,
    ObjectName,
};

pub fn file_object(repo: &Repository, data: &[u8]) -> ObjectId {
    let header = FileHeader::regular(0o100644, data.len() as u64);
    let canonical = content::encode_content_stream(&header, data).unwrap();
    repo.write_content_canonical(&canonical).unwrap()
}

pub fn dirmeta_object(repo: &Repository) -> ObjectId {
    let meta = DirMeta::default();
    repo.write_metadata(ObjectKind::DirMeta, &meta.canonical_bytes().unwrap())
        .unwrap()
}

pub fn tree_object(
    repo: &Repository,
    files: &[(&str, ObjectId)],
    dirs: &[(&str, ObjectId, ObjectId)],
) -> ObjectId {
    let tree = DirTree {
        files: files
            .iter()
            .map(|(name, id)| FileEntry {
                name: name.to_string(),
                id: *id,
            })
            .collect(),
        dirs: dirs
            .iter()
            .map(|(name, tree, meta)| DirEntry {
                name: name.to_string(),
                tree: *tree,
                meta: *meta,
            })
            .collect(),
    };
    repo.write_metadata(ObjectKind::DirTree, &tree.canonical_bytes().unwrap())
        .unwrap()
}

pub fn commit_object(
    repo: &Repository,
    subject: &str,
    parent: Option<ObjectId>,
    root_tree: ObjectId,
    root_meta: ObjectId,
    timestamp: u64,
) -> ObjectId {
    let commit = Commit {
        metadata: BTreeMap::new(),
        parent,
        related: Vec::new(),
        subject: subject.to_string(),
        body: String::new(),
        timestamp,
        root_tree,
        root_meta,
    };
    repo.write_metadata(ObjectKind::Commit, &commit.canonical_bytes().unwrap())
        .unwrap()
}

/// Write the remote's `summary` from its current heads, with an optional
/// static-delta checksum table.
pub fn write_summary(repo: &Repository, deltas: &[(String, ObjectId)]) {
    let mut refs = Vec::new();
    for (name, target) in repo.list_refs().unwrap() {
        let Some(refname) = name.strip_prefix("heads/") else {
            continue;
        };
        let size = repo
            .load_metadata_bytes(&ObjectName::new(target, ObjectKind::Commit))
            .unwrap()
            .len() as u64;
        refs.push((
            refname.to_string(),
            SummaryRef {
                size,
                digest: target,
            },
        ));
    }
    refs.sort_by(|a, b| a.0.cmp(&b.0));

    let mut metadata = BTreeMap::new();
    if !deltas.is_empty() {
        let table: serde_json::Map<String, serde_json::Value> = deltas
            .iter()
            .map(|(name, digest)| (name.clone(), serde_json::Value::String(digest.to_hex())))
            .collect();
        metadata.insert(
            STATIC_DELTAS_KEY.to_string(),
            serde_json::Value::Object(table),
        );
    }

    let summary = Summary { refs, metadata };
    repo.write_repo_file("summary", &serde_json::to_vec(&summary).unwrap())
        .unwrap();
}

pub fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

pub fn public_key_hex(key: &SigningKey) -> String {
    hex::encode(key.verifying_key().as_bytes())
}

pub fn sign_summary(repo: &Repository, key: &SigningKey) {
    let bytes = repo.read_repo_file("summary").unwrap().unwrap();
    let signature = key.sign(&bytes);
    let line = format!("{}\n", hex::encode(&signature.to_bytes()));
    repo.write_repo_file("summary.sig", line.as_bytes()).unwrap();
}

/// Attach detached metadata carrying a signature over the commit's
/// canonical bytes.
pub fn sign_commit(repo: &Repository, commit: ObjectId, key: &SigningKey) {
    let bytes = repo
        .load_metadata_bytes(&ObjectName::new(commit, ObjectKind::Commit))
        .unwrap();
    let signature = key.sign(&bytes);
    let mut metadata = BTreeMap::new();
    metadata.insert(
        "signatures".to_string(),
        serde_json::json!([hex::encode(&signature.to_bytes())]),
    );
    repo.write_detached_metadata(commit, &metadata).unwrap();
}

/// Build a one-part static delta on the remote covering `part_objects`,
/// with `fallbacks` left to loose fetches. Returns the superblock digest
/// for the summary table.
pub fn build_delta(
    remote: &Repository,
    from: Option<ObjectId>,
    to: ObjectId,
    part_objects: &[ObjectName],
    fallbacks: &[ObjectName],
) -> ObjectId {
    let mut payload = Vec::new();
    for name in part_objects {
        let bytes = if name.kind.is_meta() {
            remote.load_metadata_bytes(name).unwrap()
        } else {
            remote.content_canonical_bytes(name.id).unwrap()
        };
        payload.push(name.kind.wire_tag());
        payload.extend_from_slice(name.id.as_bytes());
        payload.extend_from_slice(&(bytes.len() as u64).to_be_bytes());
        payload.extend_from_slice(&bytes);
    }
    let mut encoder =
        flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(&payload).unwrap();
    let compressed = encoder.finish().unwrap();
    let part_digest = ObjectId::digest(&compressed);

    let (commit, _) = remote.load_commit(to).unwrap();
    let fallback_entries = fallbacks
        .iter()
        .map(|name| {
            let size = if name.kind.is_meta() {
                remote.load_metadata_bytes(name).unwrap().len() as u64
            } else {
                remote.content_canonical_bytes(name.id).unwrap().len() as u64
            };
            DeltaFallback {
                kind: name.kind,
                digest: name.id,
                compressed_size: size,
                uncompressed_size: size,
            }
        })
        .collect();

    let superblock = DeltaSuperblock {
        from,
        to,
        commit,
        metadata: BTreeMap::new(),
        parts: vec![DeltaPartHeader {
            version: 0,
            digest: part_digest,
            size: compressed.len() as u64,
            uncompressed_size: payload.len() as u64,
            objects: part_objects.to_vec(),
        }],
        fallbacks: fallback_entries,
    };

    let bytes = serde_json::to_vec(&superblock).unwrap();
    let name = delta_name(from, to);
    let dir = remote
        .path()
        .join("deltas")
        .join(&name[..2])
        .join(&name[2..]);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("superblock"), &bytes).unwrap();
    fs::write(dir.join("0"), &compressed).unwrap();
    ObjectId::digest(&bytes)
}

/// Flip one byte in the middle of a file.
pub fn corrupt_file(path: &Path) {
    let mut bytes = fs::read(path).unwrap();
    let index = bytes.len() / 2;
    bytes[index] ^= 0xff;
    fs::write(path, bytes).unwrap();
}

/// All loose objects of a repository: relative path to raw bytes.
pub fn objects_snapshot(repo: &Repository) -> BTreeMap<String, Vec<u8>> {
    fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<String, Vec<u8>>) {
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        for entry in entries {
            let entry = entry.unwrap();
            let path = entry.path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                let rel = path.strip_prefix(root).unwrap().to_string_lossy().to_string();
                out.insert(rel, fs::read(&path).unwrap());
            }
        }
    }
    let mut out = BTreeMap::new();
    let root = repo.path().join("objects");
    walk(&root, &root, &mut out);
    out
}
