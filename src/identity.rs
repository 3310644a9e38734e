//! Client identity advertised in SUB.
//!
//! Derived once from the host environment and passed around as immutable
//! configuration.

use crate::error::{NsqError, Result};

/// Short and long client identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    short_id: String,
    long_id: String,
}

impl ClientIdentity {
    /// Build an identity from explicit ids.
    ///
    /// Ids travel as SUB parameters, so they must be non-empty and free of
    /// whitespace.
    pub fn new(short_id: impl Into<String>, long_id: impl Into<String>) -> Result<Self> {
        let short_id = short_id.into();
        let long_id = long_id.into();
        check_id("short id", &short_id)?;
        check_id("long id", &long_id)?;
        Ok(Self { short_id, long_id })
    }

    /// Identity from the local hostname.
    ///
    /// The long id is the hostname as reported by the OS; the short id is its
    /// first label.
    pub fn from_hostname() -> Result<Self> {
        let name = hostname::get()?
            .into_string()
            .map_err(|raw| NsqError::InvalidArgument(format!("hostname {:?} is not UTF-8", raw)))?;
        Self::from_fqdn(&name)
    }

    fn from_fqdn(name: &str) -> Result<Self> {
        let long_id = name.trim();
        let short_id = long_id.split('.').next().unwrap_or(long_id);
        Self::new(short_id, long_id)
    }

    pub fn short_id(&self) -> &str {
        &self.short_id
    }

    pub fn long_id(&self) -> &str {
        &self.long_id
    }
}

fn check_id(kind: &str, id: &str) -> Result<()> {
    if id.is_empty() || id.chars().any(char::is_whitespace) {
        return Err(NsqError::InvalidArgument(format!(
            "{} {:?} must be non-empty without whitespace",
            kind, id
        )));
    }
    Ok(())
}
