//! File-object content streams.
//!
//! The canonical content stream of a file object is a 4-byte big-endian
//! header length, the JSON-encoded [`FileHeader`], then the raw content
//! bytes. The object digest is computed over exactly this framing. The
//! archive form served by `archive-z2` repositories keeps the same header
//! framing but zlib-compresses the body.

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use strata_types::{FileHeader, ObjectId, MAX_METADATA_SIZE};

use crate::RepoError;

/// Reads the length-prefixed header, returning both the parsed form and
/// the raw JSON bytes. Digests must hash the bytes as read, so callers
/// keep the raw form.
pub fn read_header<R: Read>(reader: &mut R) -> Result<(FileHeader, Vec<u8>), RepoError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf);
    if u64::from(len) > MAX_METADATA_SIZE {
        return Err(RepoError::InvalidObject(format!(
            "content header of {len} bytes exceeds maximum"
        )));
    }
    let mut raw = vec![0u8; len as usize];
    reader.read_exact(&mut raw)?;
    let header: FileHeader = serde_json::from_slice(&raw)
        .map_err(|err| RepoError::InvalidObject(format!("bad content header: {err}")))?;
    Ok((header, raw))
}

fn write_framing<W: Write>(writer: &mut W, header_raw: &[u8]) -> Result<(), RepoError> {
    let len = u32::try_from(header_raw.len())
        .map_err(|_| RepoError::InvalidObject("content header too large".to_string()))?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(header_raw)?;
    Ok(())
}

/// Encodes a canonical content stream from a header and body.
pub fn encode_content_stream(header: &FileHeader, body: &[u8]) -> Result<Vec<u8>, RepoError> {
    let raw = serde_json::to_vec(header)?;
    let mut out = Vec::with_capacity(4 + raw.len() + body.len());
    write_framing(&mut out, &raw)?;
    out.extend_from_slice(body);
    Ok(out)
}

/// Encodes the archive (`filez`) form: same framing, compressed body.
pub fn encode_archive_stream(header: &FileHeader, body: &[u8]) -> Result<Vec<u8>, RepoError> {
    let raw = serde_json::to_vec(header)?;
    let mut out = Vec::new();
    write_framing(&mut out, &raw)?;
    let mut encoder = ZlibEncoder::new(out, Compression::default());
    encoder.write_all(body)?;
    Ok(encoder.finish()?)
}

/// Opens an archive stream, yielding the header and a reader over the
/// decompressed body.
pub fn parse_archive_stream<R: Read>(
    mut reader: R,
) -> Result<(FileHeader, Vec<u8>, ZlibDecoder<R>), RepoError> {
    let (header, raw) = read_header(&mut reader)?;
    Ok((header, raw, ZlibDecoder::new(reader)))
}

/// Computes the canonical digest of a content stream given the raw header
/// bytes and a reader over the raw (uncompressed) body, feeding the body
/// to `sink` as it is hashed.
pub fn digest_content<R: Read, W: Write>(
    header_raw: &[u8],
    body: &mut R,
    sink: &mut W,
) -> Result<ObjectId, RepoError> {
    let len = u32::try_from(header_raw.len())
        .map_err(|_| RepoError::InvalidObject("content header too large".to_string()))?;
    let mut hasher = blake3::Hasher::new();
    hasher.update(&len.to_be_bytes());
    hasher.update(header_raw);

    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = body.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        sink.write_all(&buf[..n])?;
    }
    Ok(ObjectId::from_bytes(*hasher.finalize().as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn archive_and_canonical_forms_share_a_digest() {
        let header = FileHeader::regular(0o100644, 12);
        let body = b"hello strata";

        let canonical = encode_content_stream(&header, body).unwrap();
        let archive = encode_archive_stream(&header, body).unwrap();
        assert_ne!(canonical, archive);

        let direct = ObjectId::digest(&canonical);

        let (parsed, raw, mut decoder) = parse_archive_stream(Cursor::new(archive)).unwrap();
        assert_eq!(parsed, header);
        let mut sink = Vec::new();
        let streamed = digest_content(&raw, &mut decoder, &mut sink).unwrap();
        assert_eq!(streamed, direct);
        assert_eq!(sink, body);
    }

    #[test]
    fn truncated_stream_is_rejected() {
        let header = FileHeader::regular(0o100644, 4);
        let mut archive = encode_archive_stream(&header, b"data").unwrap();
        archive.truncate(3);
        assert!(parse_archive_stream(Cursor::new(archive)).is_err());
    }

    #[test]
    fn symlink_streams_have_empty_bodies() {
        let header = FileHeader::symlink("target/path");
        let canonical = encode_content_stream(&header, b"").unwrap();
        let (parsed, _raw) = read_header(&mut Cursor::new(&canonical)).unwrap();
        assert!(parsed.is_symlink());
        assert_eq!(parsed.symlink_target.as_deref(), Some("target/path"));
    }
}
