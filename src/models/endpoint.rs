//! Endpoint, credential and pass model.
//!
//! An [`Endpoint`] says where a mirror lives, a [`Credential`] says who we log
//! in as, and a [`Pass`] pairs the two into one usable connection recipe.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Default acceptable lag for connect and listing calls.
pub const DEFAULT_ACCEPTABLE_LAG_MS: u64 = 3000;

/// Transfer protocol spoken by an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Ftp,
    #[serde(alias = "ssh", alias = "ssh2")]
    Sftp,
    Http,
}

impl Protocol {
    /// Well-known port for the protocol.
    pub fn default_port(self) -> u16 {
        match self {
            Protocol::Ftp => 21,
            Protocol::Sftp => 22,
            Protocol::Http => 80,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Ftp => "ftp",
            Protocol::Sftp => "sftp",
            Protocol::Http => "http",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ftp" => Ok(Protocol::Ftp),
            "sftp" | "ssh" | "ssh2" => Ok(Protocol::Sftp),
            "http" => Ok(Protocol::Http),
            other => Err(AppError::config(format!("unknown protocol '{other}'"))),
        }
    }
}

/// How to reach a mirror.
///
/// Equality and hashing only consider host, remote path and protocol, so two
/// endpoints that differ by port or lag are treated as the same location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    host: String,
    protocol: Protocol,
    port: u16,
    remote_path: String,
    acceptable_lag_ms: u64,
}

impl Endpoint {
    /// Create an endpoint on the protocol's default port.
    pub fn new(host: impl Into<String>, protocol: Protocol, remote_path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            protocol,
            port: protocol.default_port(),
            remote_path: normalize_remote_path(&remote_path.into()),
            acceptable_lag_ms: DEFAULT_ACCEPTABLE_LAG_MS,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_acceptable_lag_ms(mut self, lag_ms: u64) -> Self {
        self.acceptable_lag_ms = lag_ms;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn remote_path(&self) -> &str {
        &self.remote_path
    }

    pub fn acceptable_lag_ms(&self) -> u64 {
        self.acceptable_lag_ms
    }

    /// Acceptable lag as a timeout for a single connect or listing call.
    pub fn acceptable_lag(&self) -> Duration {
        Duration::from_millis(self.acceptable_lag_ms)
    }

    /// Identity fragment used for mirror ids: `host_protocol`.
    pub fn identity(&self) -> String {
        format!("{}_{}", self.host, self.protocol)
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host
            && self.remote_path == other.remote_path
            && self.protocol == other.protocol
    }
}

impl Eq for Endpoint {}

impl Hash for Endpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.remote_path.hash(state);
        self.protocol.hash(state);
    }
}

impl Ord for Endpoint {
    fn cmp(&self, other: &Self) -> Ordering {
        self.host
            .cmp(&other.host)
            .then_with(|| self.remote_path.cmp(&other.remote_path))
            .then_with(|| self.protocol.cmp(&other.protocol))
    }
}

impl PartialOrd for Endpoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}:{}{}",
            self.protocol, self.host, self.port, self.remote_path
        )
    }
}

/// Remote paths are absolute and carry no trailing slash, except the root.
fn normalize_remote_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Login information for a pass.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credential {
    pub login: String,
    /// Password, or key passphrase when a keyfile is set
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub keyfile: Option<PathBuf>,
    #[serde(default = "default_display_name")]
    pub display_name: String,
}

fn default_display_name() -> String {
    "Mirror Monitor".to_string()
}

impl Credential {
    pub const ANONYMOUS_LOGIN: &'static str = "anonymous";
    pub const ANONYMOUS_PASSWORD: &'static str = "mirrormonitor@localhost";

    /// Password-based credential.
    pub fn password(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            secret: password.into(),
            keyfile: None,
            display_name: default_display_name(),
        }
    }

    /// Key-based credential; `passphrase` may be empty.
    pub fn keyfile(
        login: impl Into<String>,
        keyfile: impl Into<PathBuf>,
        passphrase: impl Into<String>,
    ) -> Self {
        Self {
            login: login.into(),
            secret: passphrase.into(),
            keyfile: Some(keyfile.into()),
            display_name: default_display_name(),
        }
    }

    /// The identity used when nothing else is configured.
    pub fn anonymous() -> Self {
        Self::password(Self::ANONYMOUS_LOGIN, Self::ANONYMOUS_PASSWORD)
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn uses_key_auth(&self) -> bool {
        self.keyfile.is_some()
    }

    /// The shared anonymous identity. Its secret is an FTP courtesy address, not a password.
    pub fn is_anonymous(&self) -> bool {
        self.login == Self::ANONYMOUS_LOGIN && self.keyfile.is_none()
    }
}

impl Default for Credential {
    fn default() -> Self {
        Self::anonymous()
    }
}

// Secrets never reach logs or error messages.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("login", &self.login)
            .field("keyfile", &self.keyfile)
            .field("display_name", &self.display_name)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.keyfile {
            Some(keyfile) => write!(f, "{} (key {})", self.login, keyfile.display()),
            None => write!(f, "{} ({})", self.login, self.display_name),
        }
    }
}

/// One endpoint/credential combination usable to reach a mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pass {
    pub endpoint: Endpoint,
    pub credential: Credential,
    active: bool,
}

impl Pass {
    pub fn new(endpoint: Endpoint, credential: Credential) -> Self {
        Self {
            endpoint,
            credential,
            active: false,
        }
    }

    /// True only while a connection built from this pass is live.
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Cartesian product of endpoints and credentials, endpoint-major.
    pub fn build_all(endpoints: &[Endpoint], credentials: &[Credential]) -> Vec<Pass> {
        endpoints
            .iter()
            .flat_map(|endpoint| {
                credentials
                    .iter()
                    .map(move |credential| Pass::new(endpoint.clone(), credential.clone()))
            })
            .collect()
    }
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} with {}", self.endpoint, self.credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_default_ports_follow_protocol() {
        assert_eq!(Endpoint::new("h", Protocol::Ftp, "/").port(), 21);
        assert_eq!(Endpoint::new("h", Protocol::Sftp, "/").port(), 22);
        assert_eq!(Endpoint::new("h", Protocol::Http, "/").port(), 80);
        assert_eq!(
            Endpoint::new("h", Protocol::Http, "/").acceptable_lag_ms(),
            DEFAULT_ACCEPTABLE_LAG_MS
        );
    }

    #[test]
    fn test_equality_ignores_port_and_lag() {
        let a = Endpoint::new("mirror.example.org", Protocol::Ftp, "/pub/");
        let b = Endpoint::new("mirror.example.org", Protocol::Ftp, "/pub")
            .with_port(2121)
            .with_acceptable_lag_ms(10_000);
        let c = Endpoint::new("mirror.example.org", Protocol::Http, "/pub");

        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_ordering_is_by_host_first() {
        let mut endpoints = vec![
            Endpoint::new("zeta.example.org", Protocol::Ftp, "/"),
            Endpoint::new("alpha.example.org", Protocol::Http, "/"),
        ];
        endpoints.sort();
        assert_eq!(endpoints[0].host(), "alpha.example.org");
    }

    #[test]
    fn test_remote_path_is_normalized() {
        assert_eq!(Endpoint::new("h", Protocol::Ftp, "pub/linux/").remote_path(), "/pub/linux");
        assert_eq!(Endpoint::new("h", Protocol::Ftp, "").remote_path(), "/");
    }

    #[test]
    fn test_protocol_parses_aliases() {
        assert_eq!("SSH".parse::<Protocol>().unwrap(), Protocol::Sftp);
        assert_eq!("ssh2".parse::<Protocol>().unwrap(), Protocol::Sftp);
        assert!("gopher".parse::<Protocol>().is_err());
    }

    #[test]
    fn test_credential_display_hides_secret() {
        let cred = Credential::password("mirror", "hunter2");
        assert!(!cred.to_string().contains("hunter2"));
        assert!(!format!("{cred:?}").contains("hunter2"));
        assert!(!cred.uses_key_auth());

        let key = Credential::keyfile("mirror", "/etc/monitor/id_rsa", "");
        assert!(key.uses_key_auth());
    }

    #[test]
    fn test_anonymous_identity() {
        assert!(Credential::anonymous().is_anonymous());
        assert!(!Credential::password("bob", "hunter2").is_anonymous());
        assert!(!Credential::keyfile(Credential::ANONYMOUS_LOGIN, "/etc/monitor/id_rsa", "").is_anonymous());
    }

    #[test]
    fn test_passes_are_endpoint_major() {
        let endpoints = vec![
            Endpoint::new("a", Protocol::Ftp, "/"),
            Endpoint::new("a", Protocol::Http, "/"),
        ];
        let creds = vec![Credential::password("main", "x"), Credential::anonymous()];

        let passes = Pass::build_all(&endpoints, &creds);
        assert_eq!(passes.len(), 4);
        assert_eq!(passes[0].endpoint.protocol(), Protocol::Ftp);
        assert_eq!(passes[0].credential.login, "main");
        assert_eq!(passes[1].credential.login, "anonymous");
        assert_eq!(passes[2].endpoint.protocol(), Protocol::Http);
        assert!(passes.iter().all(|p| !p.is_active()));
    }
}
