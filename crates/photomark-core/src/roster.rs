//! Known-face roster.
//!
//! A reference encoding is carried as a face vector payload: a JSON object
//! whose `face_encodings` array holds at least one vector, the first of which
//! is used. Payloads are usually base64-encoded so they fit in an environment
//! variable. A roster file lists people and where their payload comes from:
//!
//! ```toml
//! [[person]]
//! name = "alice"
//! env = "ALICE_FACE"            # variable holding a base64 payload
//!
//! [[person]]
//! name = "bob"
//! payload = "eyJmYWNlX2VuY29kaW5ncyI6W1swLjEsMC4yXV19"
//!
//! [[person]]
//! name = "carol"
//! file = "fv/carol.jpg.fv.md.answer.md"   # plain JSON, relative to the roster file
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::naming;
use crate::types::Embedding;

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("environment variable {var} for {name} is not set")]
    MissingVar { name: String, var: String },
    #[error("payload for {name} is not valid base64: {source}")]
    Base64 {
        name: String,
        #[source]
        source: base64::DecodeError,
    },
    #[error("payload for {name} is not valid face vector JSON: {source}")]
    Json {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("payload for {name} has no face encodings")]
    NoEncoding { name: String },
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid roster file {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("roster entry {name} must set exactly one of `env`, `payload` or `file`")]
    AmbiguousSource { name: String },
    #[error("invalid known face spec {0:?}: expected NAME=ENV_VAR")]
    InvalidSpec(String),
}

/// One person the matcher can recognize.
#[derive(Debug, Clone, PartialEq)]
pub struct KnownFace {
    pub name: String,
    pub encoding: Embedding,
}

impl KnownFace {
    pub fn new(name: impl Into<String>, encoding: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            encoding: Embedding::new(encoding),
        }
    }
}

/// Reference encodings for face identification.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Roster {
    faces: Vec<KnownFace>,
}

#[derive(Deserialize)]
struct EncodingPayload {
    face_encodings: Vec<Vec<f32>>,
}

#[derive(Deserialize)]
struct RosterFile {
    #[serde(default)]
    person: Vec<RosterEntry>,
}

#[derive(Deserialize)]
struct RosterEntry {
    name: String,
    env: Option<String>,
    payload: Option<String>,
    file: Option<PathBuf>,
}

/// Parse a `NAME=ENV_VAR` command-line spec.
pub fn parse_known_spec(spec: &str) -> Result<(String, String), RosterError> {
    match spec.split_once('=') {
        Some((name, var)) if !name.trim().is_empty() && !var.trim().is_empty() => {
            Ok((name.trim().to_string(), var.trim().to_string()))
        }
        _ => Err(RosterError::InvalidSpec(spec.to_string())),
    }
}

/// First encoding of a plain JSON face vector payload.
pub fn decode_json_payload(name: &str, json: &str) -> Result<Embedding, RosterError> {
    let payload: EncodingPayload = serde_json::from_str(json).map_err(|source| RosterError::Json {
        name: name.to_string(),
        source,
    })?;
    payload
        .face_encodings
        .into_iter()
        .next()
        .map(Embedding::new)
        .ok_or_else(|| RosterError::NoEncoding { name: name.to_string() })
}

/// First encoding of a base64-encoded face vector payload.
///
/// Whitespace anywhere in `encoded` is ignored, so line-wrapped output of
/// `base64` can be used as is.
pub fn decode_base64_payload(name: &str, encoded: &str) -> Result<Embedding, RosterError> {
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = STANDARD.decode(compact).map_err(|source| RosterError::Base64 {
        name: name.to_string(),
        source,
    })?;
    decode_json_payload(name, &String::from_utf8_lossy(&bytes))
}

impl Roster {
    pub fn new(faces: Vec<KnownFace>) -> Self {
        Self { faces }
    }

    /// Load each `(name, variable)` pair from the process environment.
    pub fn from_env<N, V>(entries: &[(N, V)]) -> Result<Self, RosterError>
    where
        N: AsRef<str>,
        V: AsRef<str>,
    {
        Self::from_lookup(entries, |var| std::env::var(var).ok())
    }

    /// Like [`Roster::from_env`], with an explicit variable lookup.
    pub fn from_lookup<N, V, F>(entries: &[(N, V)], lookup: F) -> Result<Self, RosterError>
    where
        N: AsRef<str>,
        V: AsRef<str>,
        F: Fn(&str) -> Option<String>,
    {
        let faces = entries
            .iter()
            .map(|(name, var)| {
                let (name, var) = (name.as_ref(), var.as_ref());
                let encoded = lookup(var).ok_or_else(|| RosterError::MissingVar {
                    name: name.to_string(),
                    var: var.to_string(),
                })?;
                Ok::<_, RosterError>(KnownFace {
                    name: name.to_string(),
                    encoding: decode_base64_payload(name, &encoded)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(faces))
    }

    /// Load a TOML roster file. `file` entries resolve relative to it.
    pub fn from_file(path: &Path) -> Result<Self, RosterError> {
        let text = fs::read_to_string(path).map_err(|source| RosterError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text, &naming::parent_dir(path), |var| std::env::var(var).ok())
            .map_err(|err| match err {
                RosterError::Toml { source, .. } => RosterError::Toml {
                    path: path.to_path_buf(),
                    source,
                },
                other => other,
            })
    }

    fn from_toml<F>(text: &str, base_dir: &Path, lookup: F) -> Result<Self, RosterError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file: RosterFile = toml::from_str(text).map_err(|source| RosterError::Toml {
            path: PathBuf::new(),
            source,
        })?;

        let mut faces = Vec::with_capacity(file.person.len());
        for entry in file.person {
            let encoding = match (&entry.env, &entry.payload, &entry.file) {
                (Some(var), None, None) => {
                    let encoded = lookup(var).ok_or_else(|| RosterError::MissingVar {
                        name: entry.name.clone(),
                        var: var.clone(),
                    })?;
                    decode_base64_payload(&entry.name, &encoded)?
                }
                (None, Some(encoded), None) => decode_base64_payload(&entry.name, encoded)?,
                (None, None, Some(file)) => {
                    let path = base_dir.join(file);
                    let json = fs::read_to_string(&path).map_err(|source| RosterError::Io { path, source })?;
                    decode_json_payload(&entry.name, &json)?
                }
                _ => return Err(RosterError::AmbiguousSource { name: entry.name }),
            };
            faces.push(KnownFace {
                name: entry.name,
                encoding,
            });
        }
        Ok(Self::new(faces))
    }

    /// Append every face of `other`.
    pub fn extend(&mut self, other: Roster) {
        self.faces.extend(other.faces);
    }

    pub fn iter(&self) -> impl Iterator<Item = &KnownFace> {
        self.faces.iter()
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.faces.iter().map(|f| f.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn b64(json: &str) -> String {
        STANDARD.encode(json)
    }

    fn lookup_from(vars: &[(&str, String)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        move |var: &str| map.get(var).cloned()
    }

    #[test]
    fn test_decode_takes_first_encoding() {
        let e = decode_base64_payload("a", &b64(r#"{"face_encodings": [[0.1, 0.2], [9.0, 9.0]]}"#)).unwrap();
        assert_eq!(e.values, vec![0.1, 0.2]);
    }

    #[test]
    fn test_decode_line_wrapped_payload() {
        let values: Vec<String> = (0..64).map(|i| format!("{:.6}", i as f32 / 64.0)).collect();
        let json = format!(r#"{{"face_encodings": [[{}]]}}"#, values.join(", "));
        let encoded = b64(&json);
        assert!(encoded.len() > 76);

        // `base64` wraps at 76 columns and the shell keeps the final newline
        let wrapped: String = encoded
            .as_bytes()
            .chunks(76)
            .map(|line| format!("{}\n", String::from_utf8_lossy(line)))
            .collect();
        assert!(STANDARD.decode(&wrapped).is_err());

        let e = decode_base64_payload("a", &wrapped).unwrap();
        assert_eq!(e.values.len(), 64);
        assert_eq!(e.values[32], 0.5);
    }

    #[test]
    fn test_decode_ignores_other_fields() {
        let json = r#"{"rotation": 90, "face_locations": [[1,2,3,4]], "face_encodings": [[0.5]]}"#;
        assert_eq!(decode_json_payload("a", json).unwrap().values, vec![0.5]);
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(decode_base64_payload("a", "@@@"), Err(RosterError::Base64 { .. })));
        assert!(matches!(decode_base64_payload("a", &b64("not json")), Err(RosterError::Json { .. })));
        assert!(matches!(
            decode_base64_payload("a", &b64(r#"{"face_encodings": []}"#)),
            Err(RosterError::NoEncoding { .. })
        ));
    }

    #[test]
    fn test_from_lookup_loads_in_order() {
        let lookup = lookup_from(&[
            ("BOB_FACE", b64(r#"{"face_encodings": [[0.0, 1.0]]}"#)),
            ("ALICE_FACE", b64(r#"{"face_encodings": [[1.0, 0.0]]}"#)),
        ]);
        let roster = Roster::from_lookup(&[("alice", "ALICE_FACE"), ("bob", "BOB_FACE")], lookup).unwrap();
        assert_eq!(roster.names(), vec!["alice", "bob"]);
        assert_eq!(roster.iter().next().unwrap().encoding.values, vec![1.0, 0.0]);
    }

    #[test]
    fn test_from_lookup_missing_var() {
        let err = Roster::from_lookup(&[("alice", "ALICE_FACE")], |_| None).unwrap_err();
        assert!(matches!(err, RosterError::MissingVar { var, .. } if var == "ALICE_FACE"));
    }

    #[test]
    fn test_parse_known_spec() {
        assert_eq!(
            parse_known_spec("alice=ALICE_FACE").unwrap(),
            ("alice".to_string(), "ALICE_FACE".to_string())
        );
        assert!(parse_known_spec("alice").is_err());
        assert!(parse_known_spec("=VAR").is_err());
        assert!(parse_known_spec("alice=").is_err());
    }

    #[test]
    fn test_from_toml_all_sources() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("carol.json"), r#"{"face_encodings": [[0.3, 0.3]]}"#).unwrap();

        let text = format!(
            r#"
[[person]]
name = "alice"
env = "ALICE_FACE"

[[person]]
name = "bob"
payload = "{}"

[[person]]
name = "carol"
file = "carol.json"
"#,
            b64(r#"{"face_encodings": [[0.2, 0.2]]}"#)
        );
        let lookup = lookup_from(&[("ALICE_FACE", b64(r#"{"face_encodings": [[0.1, 0.1]]}"#))]);

        let roster = Roster::from_toml(&text, dir.path(), lookup).unwrap();
        assert_eq!(roster.names(), vec!["alice", "bob", "carol"]);
        let values: Vec<f32> = roster.iter().map(|f| f.encoding.values[0]).collect();
        assert_eq!(values, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_from_toml_rejects_ambiguous_entry() {
        let text = r#"
[[person]]
name = "alice"
env = "A"
payload = "B"
"#;
        let err = Roster::from_toml(text, Path::new("."), |_| None).unwrap_err();
        assert!(matches!(err, RosterError::AmbiguousSource { name } if name == "alice"));
    }

    #[test]
    fn test_from_file_reports_path_on_bad_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("roster.toml");
        fs::write(&path, "[[person]\nname=").unwrap();
        let err = Roster::from_file(&path).unwrap_err();
        assert!(matches!(err, RosterError::Toml { path: p, .. } if p == path));
    }

    #[test]
    fn test_extend() {
        let mut a = Roster::new(vec![KnownFace::new("a", vec![1.0])]);
        a.extend(Roster::new(vec![KnownFace::new("b", vec![2.0])]));
        assert_eq!(a.len(), 2);
        assert!(!a.is_empty());
    }
}
