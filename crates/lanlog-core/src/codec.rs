//! String encodings shared with peers on the wire.
//!
//! Peers encode sequence lists as comma-separated decimal strings
//! (`"4,5,6"`, empty string for none) and boolean flags as the strings
//! `"true"` / `"false"`. Decoding is lenient: a JSON array of numbers and a
//! JSON boolean are accepted too, and a missing field decodes as empty/false
//! when the field carries `#[serde(default)]`.

use std::collections::BTreeSet;

use crate::error::CoreError;

/// Format a set of sequences as `"a,b,c"` in ascending order.
pub fn format_sequence_list(seqs: &BTreeSet<u64>) -> String {
    seqs.iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse a comma-separated sequence list.
///
/// Whitespace around entries and empty entries are ignored, so `""`,
/// `" "` and `"4,,5,"` are all accepted.
pub fn parse_sequence_list(s: &str) -> Result<BTreeSet<u64>, CoreError> {
    let mut out = BTreeSet::new();
    for part in s.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let seq = part
            .parse::<u64>()
            .map_err(|_| CoreError::InvalidSequenceList(s.to_string()))?;
        out.insert(seq);
    }
    Ok(out)
}

/// Serde adapter for sequence-list fields.
pub mod sequence_list {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::collections::BTreeSet;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Numbers(Vec<u64>),
        Null(()),
    }

    pub fn serialize<S: Serializer>(seqs: &BTreeSet<u64>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_sequence_list(seqs))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeSet<u64>, D::Error> {
        match Repr::deserialize(d)? {
            Repr::Text(text) => super::parse_sequence_list(&text).map_err(de::Error::custom),
            Repr::Numbers(nums) => Ok(nums.into_iter().collect()),
            Repr::Null(()) => Ok(BTreeSet::new()),
        }
    }
}

/// Serde adapter for boolean flags carried as `"true"` / `"false"`.
pub mod bool_flag {
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Bool(bool),
        Text(String),
    }

    pub fn serialize<S: Serializer>(flag: &bool, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(if *flag { "true" } else { "false" })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        match Repr::deserialize(d)? {
            Repr::Bool(b) => Ok(b),
            Repr::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(true),
                "false" | "" => Ok(false),
                other => Err(de::Error::custom(format!("invalid flag: {other}"))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_sequence_list() {
        let seqs: BTreeSet<u64> = [6, 4, 5].into_iter().collect();
        assert_eq!(format_sequence_list(&seqs), "4,5,6");
        assert_eq!(format_sequence_list(&BTreeSet::new()), "");
    }

    #[test]
    fn test_parse_sequence_list_lenient() {
        let seqs = parse_sequence_list(" 4, 5,,6,").unwrap();
        assert_eq!(seqs.into_iter().collect::<Vec<_>>(), vec![4, 5, 6]);
        assert!(parse_sequence_list("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_sequence_list_rejects_garbage() {
        assert!(parse_sequence_list("4,x").is_err());
        assert!(parse_sequence_list("-1").is_err());
    }

    #[derive(serde::Serialize, serde::Deserialize)]
    struct Probe {
        #[serde(with = "sequence_list", default)]
        seqs: BTreeSet<u64>,
        #[serde(with = "bool_flag", default)]
        flag: bool,
    }

    #[test]
    fn test_serde_adapters_accept_alternate_forms() {
        let p: Probe = serde_json::from_str(r#"{"seqs":[3,1],"flag":true}"#).unwrap();
        assert_eq!(p.seqs.into_iter().collect::<Vec<_>>(), vec![1, 3]);
        assert!(p.flag);

        let p: Probe = serde_json::from_str(r#"{"flag":"TRUE"}"#).unwrap();
        assert!(p.seqs.is_empty());
        assert!(p.flag);

        let p: Probe = serde_json::from_str(r#"{}"#).unwrap();
        assert!(!p.flag);
    }

    #[test]
    fn test_serde_adapters_write_strings() {
        let p = Probe {
            seqs: [2, 9].into_iter().collect(),
            flag: false,
        };
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, r#"{"seqs":"2,9","flag":"false"}"#);
    }
}
