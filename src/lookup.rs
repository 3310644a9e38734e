//! Host discovery.
//!
//! The consumer asks a [`Lookup`] for the hosts carrying a topic. An empty
//! answer is legal and subscribes nothing.

use crate::error::Result;
use crate::handler::BoxFuture;

/// Resolves the `host:port` addresses serving a topic.
pub trait Lookup: Send + Sync {
    fn lookup_hosts<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, Result<Vec<String>>>;
}

/// A fixed host list returned for every topic.
#[derive(Debug, Clone, Default)]
pub struct StaticLookup {
    hosts: Vec<String>,
}

impl StaticLookup {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hosts: hosts.into_iter().map(Into::into).collect(),
        }
    }
}

impl Lookup for StaticLookup {
    fn lookup_hosts<'a>(&'a self, _topic: &'a str) -> BoxFuture<'a, Result<Vec<String>>> {
        let hosts = self.hosts.clone();
        Box::pin(async move { Ok(hosts) })
    }
}
