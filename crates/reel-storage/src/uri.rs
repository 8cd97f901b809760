//! Asset URI parsing.

use std::fmt;

use url::Url;

use crate::error::{StorageError, StorageResult};

/// Schemes resolved through the object store.
pub const OBJECT_SCHEMES: &[&str] = &["s3", "r2", "gs"];

const MAX_EXTENSION_LEN: usize = 5;

/// `scheme://bucket/key`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectUri {
    pub scheme: String,
    pub bucket: String,
    pub key: String,
}

impl ObjectUri {
    pub fn parse(uri: &str) -> StorageResult<Self> {
        let url = Url::parse(uri).map_err(|e| StorageError::invalid_uri(uri, e.to_string()))?;
        let scheme = url.scheme().to_string();
        if !OBJECT_SCHEMES.contains(&scheme.as_str()) {
            return Err(StorageError::UnsupportedScheme(scheme));
        }

        // Key is taken verbatim; Url would percent-encode it.
        let (_, rest) = uri
            .split_once("://")
            .ok_or_else(|| StorageError::invalid_uri(uri, "expected scheme://bucket/key"))?;
        let (bucket, key) = rest
            .split_once('/')
            .ok_or_else(|| StorageError::invalid_uri(uri, "missing object key"))?;

        if bucket.is_empty() {
            return Err(StorageError::invalid_uri(uri, "missing bucket"));
        }
        if key.is_empty() {
            return Err(StorageError::invalid_uri(uri, "missing object key"));
        }

        Ok(Self {
            scheme,
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }
}

impl fmt::Display for ObjectUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.bucket, self.key)
    }
}

/// Where an input asset lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetLocation {
    Object(ObjectUri),
    Http(Url),
}

impl AssetLocation {
    /// Classify `uri` by scheme. Unknown schemes and unparseable input are permanent errors.
    pub fn parse(uri: &str) -> StorageResult<Self> {
        let url = Url::parse(uri.trim()).map_err(|e| StorageError::invalid_uri(uri, e.to_string()))?;

        match url.scheme() {
            "http" | "https" => {
                if url.host_str().map_or(true, str::is_empty) {
                    return Err(StorageError::invalid_uri(uri, "missing host"));
                }
                Ok(Self::Http(url))
            }
            scheme if OBJECT_SCHEMES.contains(&scheme) => Ok(Self::Object(ObjectUri::parse(uri.trim())?)),
            other => Err(StorageError::UnsupportedScheme(other.to_string())),
        }
    }

    /// Lower-cased extension of the last path segment, if it looks like one.
    pub fn extension(&self) -> Option<String> {
        let path = match self {
            Self::Object(object) => object.key.as_str(),
            Self::Http(url) => url.path(),
        };

        let name = path.rsplit('/').next()?;
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty()
            || ext.is_empty()
            || ext.len() > MAX_EXTENSION_LEN
            || !ext.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}
