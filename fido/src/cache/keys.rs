//! Cache key construction.
//!
//! `namespace[:prefix][:identifier][:params]`, where params are the non-empty query values
//! sorted by name and rendered `name_value`, joined with `:`. A params segment longer than
//! [`MAX_PARAMS_LEN`] is replaced by its SHA-256 hex digest.

use crate::types::CacheNamespace;
use sha2::{Digest, Sha256};
use std::fmt;

pub const MAX_PARAMS_LEN: usize = 100;

#[derive(Debug, Clone)]
pub struct CacheKey {
    namespace: CacheNamespace,
    prefix: Option<String>,
    identifier: Option<String>,
    params: Vec<(String, String)>,
}

impl CacheKey {
    pub fn new(namespace: CacheNamespace) -> Self {
        Self {
            namespace,
            prefix: None,
            identifier: None,
            params: Vec::new(),
        }
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn identifier(mut self, identifier: impl ToString) -> Self {
        self.identifier = Some(identifier.to_string());
        self
    }

    /// Add a parameter; `None` values are left out of the key
    pub fn param<V: ToString>(mut self, name: &str, value: Option<V>) -> Self {
        if let Some(value) = value {
            self.params.push((name.to_string(), value.to_string()));
        }
        self
    }

    fn params_segment(&self) -> Option<String> {
        if self.params.is_empty() {
            return None;
        }
        let mut sorted: Vec<&(String, String)> = self.params.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        let joined = sorted
            .iter()
            .map(|(name, value)| format!("{name}_{value}"))
            .collect::<Vec<_>>()
            .join(":");

        if joined.len() > MAX_PARAMS_LEN {
            Some(format!("{:x}", Sha256::digest(joined.as_bytes())))
        } else {
            Some(joined)
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.namespace.as_str())?;
        if let Some(prefix) = &self.prefix {
            write!(f, ":{prefix}")?;
        }
        if let Some(identifier) = &self.identifier {
            write!(f, ":{identifier}")?;
        }
        if let Some(params) = self.params_segment() {
            write!(f, ":{params}")?;
        }
        Ok(())
    }
}
