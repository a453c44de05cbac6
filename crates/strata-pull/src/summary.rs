//! The repository summary and its trust envelope.
//!
//! A summary is a signed index of every ref a remote serves, plus a table
//! of available static deltas and their superblock checksums. Refs are
//! sorted by name so lookups can binary-search.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use strata_types::{validate_checksum_string, ObjectId};

use crate::PullError;

pub const STATIC_DELTAS_KEY: &str = "static-deltas";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Summary {
    /// `[refname, target]` pairs ordered lexicographically by refname.
    pub refs: Vec<(String, SummaryRef)>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryRef {
    /// Size in bytes of the commit object, used as the fetch size bound.
    pub size: u64,
    pub digest: ObjectId,
}

impl Summary {
    pub fn parse(bytes: &[u8]) -> Result<Self, PullError> {
        serde_json::from_slice(bytes)
            .map_err(|err| PullError::InvalidFormat(format!("bad summary: {err}")))
    }

    /// Look up a ref by name. Refs are sorted, so this is a binary search.
    pub fn lookup(&self, refname: &str) -> Result<(ObjectId, u64), PullError> {
        match self
            .refs
            .binary_search_by(|(name, _)| name.as_str().cmp(refname))
        {
            Ok(index) => {
                let target = &self.refs[index].1;
                Ok((target.digest, target.size))
            }
            Err(_) => Err(PullError::NotFound(format!(
                "No such branch '{refname}' in repository summary"
            ))),
        }
    }

    /// The static-delta table: delta name to expected superblock digest.
    /// Every digest must be a well-formed 64-hex checksum.
    pub fn delta_checksums(&self) -> Result<BTreeMap<String, ObjectId>, PullError> {
        let mut out = BTreeMap::new();
        let Some(value) = self.metadata.get(STATIC_DELTAS_KEY) else {
            return Ok(out);
        };
        let table = value.as_object().ok_or_else(|| {
            PullError::InvalidFormat("static-deltas metadata must be a map".to_string())
        })?;
        for (name, digest) in table {
            let digest = digest.as_str().ok_or_else(|| {
                PullError::InvalidFormat(format!("static delta '{name}' has a non-string checksum"))
            })?;
            validate_checksum_string(digest)?;
            out.insert(name.clone(), ObjectId::from_hex(digest)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(fill: u8) -> ObjectId {
        ObjectId::from_bytes([fill; 32])
    }

    fn sample() -> Summary {
        Summary {
            refs: vec![
                ("beta".to_string(), SummaryRef { size: 100, digest: id(1) }),
                ("main".to_string(), SummaryRef { size: 200, digest: id(2) }),
                ("stable".to_string(), SummaryRef { size: 300, digest: id(3) }),
            ],
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn lookup_finds_sorted_refs() {
        let summary = sample();
        assert_eq!(summary.lookup("beta").unwrap(), (id(1), 100));
        assert_eq!(summary.lookup("main").unwrap(), (id(2), 200));
        assert_eq!(summary.lookup("stable").unwrap(), (id(3), 300));

        let err = summary.lookup("nightly").unwrap_err();
        assert!(matches!(err, PullError::NotFound(_)));
        assert!(err.to_string().contains("No such branch 'nightly'"));
    }

    #[test]
    fn parse_roundtrip() {
        let summary = sample();
        let bytes = serde_json::to_vec(&summary).unwrap();
        let parsed = Summary::parse(&bytes).unwrap();
        assert_eq!(parsed.refs.len(), 3);
        assert_eq!(parsed.lookup("main").unwrap(), (id(2), 200));
    }

    #[test]
    fn delta_checksum_table() {
        let mut summary = sample();
        let delta_digest = id(9);
        let mut table = serde_json::Map::new();
        table.insert(
            format!("{}-{}", id(1), id(2)),
            serde_json::Value::String(delta_digest.to_hex()),
        );
        summary.metadata.insert(
            STATIC_DELTAS_KEY.to_string(),
            serde_json::Value::Object(table),
        );
        let parsed = summary.delta_checksums().unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[&format!("{}-{}", id(1), id(2))], delta_digest);
    }

    #[test]
    fn malformed_delta_checksums_are_rejected() {
        let mut summary = sample();
        summary.metadata.insert(
            STATIC_DELTAS_KEY.to_string(),
            serde_json::json!({ "a-b": "not-a-checksum" }),
        );
        assert!(summary.delta_checksums().is_err());

        summary.metadata.insert(
            STATIC_DELTAS_KEY.to_string(),
            serde_json::json!(["wrong-shape"]),
        );
        assert!(summary.delta_checksums().is_err());
    }
}
