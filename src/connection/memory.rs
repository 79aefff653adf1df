//! In-memory client and scripted factory for tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::connection::{ClientFactory, ProtocolClient};
use crate::error::{AppError, Result};
use crate::models::{Endpoint, Node, Pass};

#[derive(Default)]
struct State {
    failing: HashSet<String>,
    hanging: HashSet<String>,
    broken_paths: HashSet<String>,
    trees: HashMap<String, Node>,
    attempts: Vec<String>,
    listings: Vec<String>,
    closed: usize,
}

/// Serves listings out of a [`Node`] tree.
pub(crate) struct MemoryClient {
    endpoint: Endpoint,
    state: Arc<Mutex<State>>,
    connected: bool,
}

impl MemoryClient {
    /// Standalone client serving `root` at the endpoint's remote path.
    pub(crate) fn new(endpoint: Endpoint, root: Node) -> Self {
        let state = State {
            trees: HashMap::from([(endpoint.host().to_string(), root)]),
            ..State::default()
        };
        Self {
            endpoint,
            state: Arc::new(Mutex::new(state)),
            connected: false,
        }
    }

    pub(crate) fn break_path(&self, path: &str) {
        self.state.lock().unwrap().broken_paths.insert(path.to_string());
    }

    pub(crate) fn listed_paths(&self) -> Vec<String> {
        self.state.lock().unwrap().listings.clone()
    }

    fn resolve(&self, path: &str) -> Option<Node> {
        let state = self.state.lock().unwrap();
        let root = state.trees.get(self.endpoint.host())?;
        let base = self.endpoint.remote_path().trim_end_matches('/');
        let relative = path.strip_prefix(base)?.trim_matches('/');

        let mut node = root;
        for name in relative.split('/').filter(|s| !s.is_empty()) {
            node = node.children.iter().find(|c| c.is_dir() && c.name == name)?;
        }
        Some(node.clone())
    }
}

#[async_trait]
impl ProtocolClient for MemoryClient {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn connect(&mut self) -> Result<()> {
        let (failing, hanging) = {
            let mut state = self.state.lock().unwrap();
            let host = self.endpoint.host().to_string();
            state.attempts.push(host.clone());
            (state.failing.contains(&host), state.hanging.contains(&host))
        };
        if hanging {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        if failing {
            return Err(AppError::connection(&self.endpoint, "connection refused"));
        }
        self.connected = true;
        Ok(())
    }

    async fn close(&mut self) {
        self.connected = false;
        self.state.lock().unwrap().closed += 1;
    }

    async fn list_from(&mut self, path: &str) -> Result<Vec<Node>> {
        if !self.connected {
            return Err(AppError::crawl(path, "not connected"));
        }
        {
            let mut state = self.state.lock().unwrap();
            state.listings.push(path.to_string());
            if state.broken_paths.contains(path) {
                return Err(AppError::crawl(path, "connection produced no listing"));
            }
        }
        let dir = self
            .resolve(path)
            .ok_or_else(|| AppError::crawl(path, "no such directory"))?;
        Ok(dir
            .children
            .into_iter()
            .map(|mut child| {
                child.children.clear();
                child
            })
            .collect())
    }

    async fn path_exists(&mut self, path: &str) -> bool {
        self.resolve(path).is_some()
    }
}

/// Factory handing out [`MemoryClient`]s with scripted failures.
#[derive(Clone, Default)]
pub(crate) struct ScriptedFactory {
    state: Arc<Mutex<State>>,
}

impl ScriptedFactory {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing(self, host: &str) -> Self {
        self.fail(host);
        self
    }

    pub(crate) fn hanging(self, host: &str) -> Self {
        self.state.lock().unwrap().hanging.insert(host.to_string());
        self
    }

    pub(crate) fn with_tree(self, host: &str, root: Node) -> Self {
        self.set_tree(host, root);
        self
    }

    pub(crate) fn set_tree(&self, host: &str, root: Node) {
        self.state.lock().unwrap().trees.insert(host.to_string(), root);
    }

    pub(crate) fn fail(&self, host: &str) {
        self.state.lock().unwrap().failing.insert(host.to_string());
    }

    pub(crate) fn recover(&self, host: &str) {
        self.state.lock().unwrap().failing.remove(host);
    }

    pub(crate) fn break_path(&self, path: &str) {
        self.state.lock().unwrap().broken_paths.insert(path.to_string());
    }

    pub(crate) fn clear_attempts(&self) {
        self.state.lock().unwrap().attempts.clear();
    }

    pub(crate) fn attempted_hosts(&self) -> Vec<String> {
        self.state.lock().unwrap().attempts.clone()
    }

    pub(crate) fn closed_count(&self) -> usize {
        self.state.lock().unwrap().closed
    }
}

impl ClientFactory for ScriptedFactory {
    fn create(&self, pass: &Pass) -> Result<Box<dyn ProtocolClient>> {
        Ok(Box::new(MemoryClient {
            endpoint: pass.endpoint.clone(),
            state: Arc::clone(&self.state),
            connected: false,
        }))
    }
}
