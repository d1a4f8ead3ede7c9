use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const IGLU_PREFIX: &str = "iglu:";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaParseError {
    #[error("schema URI {0} must start with iglu:")]
    MissingPrefix(String),
    #[error("schema URI {0} must have the form iglu:vendor/name/format/version")]
    WrongShape(String),
    #[error("schema version {0} must have the form model-revision-addition")]
    InvalidVersion(String),
}

/// A fully versioned schema identifier, e.g.
/// `iglu:com.acme/user/jsonschema/1-0-2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemaKey {
    pub vendor: String,
    pub name: String,
    pub format: String,
    pub version: SchemaVer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchemaVer {
    pub model: u32,
    pub revision: u32,
    pub addition: u32,
}

/// A schema pattern where any version component may be `*`, e.g.
/// `iglu:com.acme/user/jsonschema/1-*-*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaCriterion {
    pub vendor: String,
    pub name: String,
    pub format: String,
    pub model: Option<u32>,
    pub revision: Option<u32>,
    pub addition: Option<u32>,
}

/// A JSON payload tagged with the schema describing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelfDescribingJson {
    pub schema: SchemaKey,
    pub data: serde_json::Value,
}

impl SelfDescribingJson {
    pub fn new(schema: SchemaKey, data: serde_json::Value) -> Self {
        Self { schema, data }
    }
}

/// Splits `iglu:vendor/name/format/version` into its four path segments.
fn split_uri(uri: &str) -> Result<[&str; 4], SchemaParseError> {
    let path = uri
        .strip_prefix(IGLU_PREFIX)
        .ok_or_else(|| SchemaParseError::MissingPrefix(uri.to_string()))?;
    let parts: Vec<&str> = path.split('/').collect();
    match parts.as_slice() {
        [vendor, name, format, version]
            if !vendor.is_empty() && !name.is_empty() && !format.is_empty() =>
        {
            Ok([*vendor, *name, *format, *version])
        }
        _ => Err(SchemaParseError::WrongShape(uri.to_string())),
    }
}

fn split_version(version: &str) -> Result<[&str; 3], SchemaParseError> {
    let parts: Vec<&str> = version.split('-').collect();
    match parts.as_slice() {
        [model, revision, addition] => Ok([*model, *revision, *addition]),
        _ => Err(SchemaParseError::InvalidVersion(version.to_string())),
    }
}

impl FromStr for SchemaKey {
    type Err = SchemaParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let [vendor, name, format, version] = split_uri(s)?;
        let [model, revision, addition] = split_version(version)?;
        let number = |part: &str| {
            part.parse::<u32>()
                .map_err(|_| SchemaParseError::InvalidVersion(version.to_string()))
        };
        Ok(SchemaKey {
            vendor: vendor.to_string(),
            name: name.to_string(),
            format: format.to_string(),
            version: SchemaVer {
                model: number(model)?,
                revision: number(revision)?,
                addition: number(addition)?,
            },
        })
    }
}

impl fmt::Display for SchemaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}/{}/{}/{}-{}-{}",
            IGLU_PREFIX,
            self.vendor,
            self.name,
            self.format,
            self.version.model,
            self.version.revision,
            self.version.addition
        )
    }
}

impl Serialize for SchemaKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SchemaKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

impl SchemaCriterion {
    pub fn matches(&self, key: &SchemaKey) -> bool {
        let component = |expected: Option<u32>, actual: u32| expected.is_none_or(|e| e == actual);
        self.vendor == key.vendor
            && self.name == key.name
            && self.format == key.format
            && component(self.model, key.version.model)
            && component(self.revision, key.version.revision)
            && component(self.addition, key.version.addition)
    }
}

impl FromStr for SchemaCriterion {
    type Err = SchemaParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let [vendor, name, format, version] = split_uri(s)?;
        let [model, revision, addition] = split_version(version)?;
        let component = |part: &str| match part {
            "*" => Ok(None),
            n => n
                .parse::<u32>()
                .map(Some)
                .map_err(|_| SchemaParseError::InvalidVersion(version.to_string())),
        };
        Ok(SchemaCriterion {
            vendor: vendor.to_string(),
            name: name.to_string(),
            format: format.to_string(),
            model: component(model)?,
            revision: component(revision)?,
            addition: component(addition)?,
        })
    }
}

impl fmt::Display for SchemaCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let component = |c: Option<u32>| c.map_or_else(|| "*".to_string(), |n| n.to_string());
        write!(
            f,
            "{}{}/{}/{}/{}-{}-{}",
            IGLU_PREFIX,
            self.vendor,
            self.name,
            self.format,
            component(self.model),
            component(self.revision),
            component(self.addition)
        )
    }
}

impl<'de> Deserialize<'de> for SchemaCriterion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}
