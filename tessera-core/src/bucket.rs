use crate::{Result, TesseraError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Backend a bucket belongs to. `Ais` buckets live only in the cluster,
/// every other provider is a remote namespace cached by the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Ais,
    Aws,
    Gcp,
    Azure,
    Ht,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Ais => "ais",
            Provider::Aws => "aws",
            Provider::Gcp => "gcp",
            Provider::Azure => "azure",
            Provider::Ht => "ht",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ais" => Some(Provider::Ais),
            "aws" | "s3" => Some(Provider::Aws),
            "gcp" | "gs" => Some(Provider::Gcp),
            "azure" | "az" => Some(Provider::Azure),
            "ht" => Some(Provider::Ht),
            _ => None,
        }
    }

    pub fn is_remote(&self) -> bool {
        !matches!(self, Provider::Ais)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bucket {
    pub name: String,
    pub provider: Provider,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl Bucket {
    pub fn new(name: impl Into<String>, provider: Provider) -> Result<Self> {
        let bucket = Self {
            name: name.into(),
            provider,
            namespace: None,
        };
        bucket.validate()?;
        Ok(bucket)
    }

    pub fn ais(name: impl Into<String>) -> Result<Self> {
        Self::new(name, Provider::Ais)
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Result<Self> {
        self.namespace = Some(namespace.into());
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        validate_name_component("bucket", &self.name)?;
        if let Some(namespace) = &self.namespace {
            validate_name_component("namespace", namespace)?;
        }
        Ok(())
    }

    pub fn is_remote(&self) -> bool {
        self.provider.is_remote()
    }

    /// Cluster-wide unique name of an object in this bucket. Placement hashes this.
    pub fn uname(&self, obj_name: &str) -> String {
        match &self.namespace {
            Some(namespace) => format!(
                "{}/#{}/{}/{}",
                self.provider, namespace, self.name, obj_name
            ),
            None => format!("{}/{}/{}", self.provider, self.name, obj_name),
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{}://#{}/{}", self.provider, namespace, self.name),
            None => write!(f, "{}://{}", self.provider, self.name),
        }
    }
}

/// Parses `name`, `ais://name`, `aws://name` or `ais://#ns/name`.
impl FromStr for Bucket {
    type Err = TesseraError;

    fn from_str(value: &str) -> Result<Self> {
        let (provider, rest) = match value.split_once("://") {
            Some((scheme, rest)) => {
                let provider = Provider::parse(scheme).ok_or_else(|| {
                    TesseraError::InvalidRequest(format!("unknown bucket provider: {}", scheme))
                })?;
                (provider, rest)
            }
            None => (Provider::Ais, value),
        };

        match rest.strip_prefix('#') {
            Some(namespaced) => {
                let (namespace, name) = namespaced.split_once('/').ok_or_else(|| {
                    TesseraError::InvalidRequest(format!("invalid namespaced bucket: {}", value))
                })?;
                Bucket::new(name, provider)?.with_namespace(namespace)
            }
            None => Bucket::new(rest, provider),
        }
    }
}

fn validate_name_component(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(TesseraError::InvalidRequest(format!(
            "{} name cannot be empty",
            what
        )));
    }
    if value == "." || value == ".." || value.contains('/') {
        return Err(TesseraError::InvalidRequest(format!(
            "invalid {} name: {}",
            what, value
        )));
    }
    if value.starts_with(['@', '#', '%']) {
        return Err(TesseraError::InvalidRequest(format!(
            "{} name cannot start with a reserved marker: {}",
            what, value
        )));
    }
    Ok(())
}
