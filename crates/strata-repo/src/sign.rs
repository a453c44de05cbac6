//! Ed25519 trust primitives.
//!
//! A keyring is a text file of hex-encoded 32-byte public keys, one per
//! line (`#` comments allowed). A signature list is the same shape with
//! 64-byte signatures; `summary.sig` and the `signatures` field of
//! detached commit metadata both carry this form.

use ed25519_dalek::{Signature, VerifyingKey};
use strata_types::hex;

use crate::RepoError;

#[derive(Debug, Clone, Default)]
pub struct Keyring {
    keys: Vec<VerifyingKey>,
}

impl Keyring {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_hex_lines(text: &str) -> Result<Self, RepoError> {
        let mut keys = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let raw = hex::decode(line)
                .ok_or_else(|| RepoError::BadSignature(format!("bad public key '{line}'")))?;
            let bytes: [u8; 32] = raw
                .as_slice()
                .try_into()
                .map_err(|_| RepoError::BadSignature(format!("bad public key '{line}'")))?;
            let key = VerifyingKey::from_bytes(&bytes)
                .map_err(|err| RepoError::BadSignature(format!("bad public key: {err}")))?;
            keys.push(key);
        }
        Ok(Self { keys })
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Number of signatures in `sigs` made over `message` by any key in
    /// this ring.
    pub fn count_valid(&self, message: &[u8], sigs: &SignatureList) -> usize {
        sigs.0
            .iter()
            .filter(|sig| {
                self.keys
                    .iter()
                    .any(|key| key.verify_strict(message, sig).is_ok())
            })
            .count()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SignatureList(Vec<Signature>);

impl SignatureList {
    pub fn from_text(text: &str) -> Result<Self, RepoError> {
        let mut sigs = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            sigs.push(parse_signature(line)?);
        }
        Ok(Self(sigs))
    }

    /// Parses the `signatures` entry of detached commit metadata: a JSON
    /// array of hex strings.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, RepoError> {
        let entries = value
            .as_array()
            .ok_or_else(|| RepoError::BadSignature("signatures must be an array".to_string()))?;
        let mut sigs = Vec::new();
        for entry in entries {
            let text = entry.as_str().ok_or_else(|| {
                RepoError::BadSignature("signature entries must be strings".to_string())
            })?;
            sigs.push(parse_signature(text)?);
        }
        Ok(Self(sigs))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for sig in &self.0 {
            out.push_str(&hex::encode(&sig.to_bytes()));
            out.push('\n');
        }
        out
    }
}

fn parse_signature(text: &str) -> Result<Signature, RepoError> {
    let raw = hex::decode(text)
        .ok_or_else(|| RepoError::BadSignature(format!("bad signature '{text}'")))?;
    Signature::from_slice(&raw)
        .map_err(|err| RepoError::BadSignature(format!("bad signature: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    fn test_key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    fn ring_for(keys: &[&SigningKey]) -> Keyring {
        let lines: Vec<String> = keys
            .iter()
            .map(|k| hex::encode(k.verifying_key().as_bytes()))
            .collect();
        Keyring::from_hex_lines(&lines.join("\n")).unwrap()
    }

    #[test]
    fn counts_only_trusted_signatures() {
        let trusted = test_key(1);
        let untrusted = test_key(2);
        let ring = ring_for(&[&trusted]);

        let message = b"summary bytes";
        let sigs = SignatureList(vec![
            trusted.sign(message),
            untrusted.sign(message),
        ]);
        assert_eq!(ring.count_valid(message, &sigs), 1);

        let tampered = SignatureList(vec![untrusted.sign(message)]);
        assert_eq!(ring.count_valid(message, &tampered), 0);
    }

    #[test]
    fn signature_text_roundtrip() {
        let key = test_key(7);
        let sigs = SignatureList(vec![key.sign(b"payload")]);
        let text = sigs.to_text();
        let parsed = SignatureList::from_text(&text).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(ring_for(&[&key]).count_valid(b"payload", &parsed), 1);
    }

    #[test]
    fn keyring_skips_comments_and_blanks() {
        let key = test_key(3);
        let text = format!(
            "# trusted build key\n\n{}\n",
            hex::encode(key.verifying_key().as_bytes())
        );
        let ring = Keyring::from_hex_lines(&text).unwrap();
        assert_eq!(ring.len(), 1);
    }
}
