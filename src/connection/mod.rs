//! Protocol clients and pass failover.
//!
//! Every transport implements [`ProtocolClient`]; [`ClientFactory`] picks the
//! implementation for a pass, and [`Connector`] walks a mirror's passes until
//! one of them connects.

mod connector;
pub mod ftp;
pub mod http;
pub mod listing;
#[cfg(test)]
pub(crate) mod memory;
pub mod ssh;

use std::future::Future;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::{Endpoint, HttpConfig, Node, Pass, Protocol, SshConfig};

pub use connector::{Connection, Connector};
pub use ftp::FtpClient;
pub use http::HttpClient;
pub use ssh::SshClient;

/// Directory listing capability shared by every transport.
///
/// Listing methods return leaf nodes: children are never populated.
#[async_trait]
pub trait ProtocolClient: Send {
    fn endpoint(&self) -> &Endpoint;

    /// Open and authenticate the session.
    async fn connect(&mut self) -> Result<()>;

    /// Drop the session. Safe to call on a client that never connected.
    async fn close(&mut self);

    /// Entries of the directory at an absolute server path.
    async fn list_from(&mut self, path: &str) -> Result<Vec<Node>>;

    async fn path_exists(&mut self, path: &str) -> bool;

    /// Entries of the endpoint's root directory.
    async fn list_detailed(&mut self) -> Result<Vec<Node>> {
        let root = self.endpoint().remote_path().to_string();
        self.list_from(&root).await
    }

    async fn list_names(&mut self) -> Result<Vec<String>> {
        Ok(self
            .list_detailed()
            .await?
            .into_iter()
            .map(|node| node.name)
            .collect())
    }

    async fn list_dirs_from(&mut self, path: &str) -> Result<Vec<Node>> {
        Ok(self
            .list_from(path)
            .await?
            .into_iter()
            .filter(Node::is_dir)
            .collect())
    }
}

/// Builds an unconnected client for a pass.
pub trait ClientFactory: Send + Sync {
    fn create(&self, pass: &Pass) -> Result<Box<dyn ProtocolClient>>;
}

/// Factory for the real network clients, keyed on the pass protocol.
#[derive(Debug, Clone, Default)]
pub struct NetworkClientFactory {
    ssh: SshConfig,
    http: HttpConfig,
}

impl NetworkClientFactory {
    pub fn new(ssh: SshConfig, http: HttpConfig) -> Self {
        Self { ssh, http }
    }
}

impl ClientFactory for NetworkClientFactory {
    fn create(&self, pass: &Pass) -> Result<Box<dyn ProtocolClient>> {
        let client: Box<dyn ProtocolClient> = match pass.endpoint.protocol() {
            Protocol::Ftp => Box::new(FtpClient::new(pass.clone())?),
            Protocol::Sftp => Box::new(SshClient::new(pass.clone(), self.ssh.clone())?),
            Protocol::Http => Box::new(HttpClient::new(pass.clone(), &self.http)?),
        };
        Ok(client)
    }
}

/// Run one network call under the endpoint's acceptable lag.
pub(crate) async fn within_lag<T>(
    endpoint: &Endpoint,
    context: impl Into<String>,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(endpoint.acceptable_lag(), call).await {
        Ok(result) => result,
        Err(_) => Err(AppError::timeout(
            format!("{} on {}", context.into(), endpoint),
            endpoint.acceptable_lag_ms(),
        )),
    }
}
