//! Application configuration structures.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{
    AnalysisPolicy, Credential, Endpoint, Mirror, MirrorRole, Pass, Protocol,
    DEFAULT_ACCEPTABLE_LAG_MS,
};
use crate::pipeline::scheduler::parse_cron;

/// Upper bound on `monitor.stuck_after_hours` (one year).
pub const MAX_STUCK_AFTER_HOURS: u64 = 24 * 366;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Pipeline and worker pool settings
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Default schedule for mirrors without their own cron
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Crawl depth and verbosity
    #[serde(default)]
    pub analysis: AnalysisPolicy,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub ssh: SshConfig,

    #[serde(default)]
    pub http: HttpConfig,

    /// Fallback credentials tried after a mirror's own user
    #[serde(default)]
    pub identities: Vec<Credential>,

    /// The reference mirror
    #[serde(default)]
    pub master: Option<MirrorConfig>,

    /// Secondary mirrors
    #[serde(default)]
    pub mirrors: Vec<MirrorConfig>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.monitor.max_concurrent == 0 {
            return Err(AppError::validation("monitor.max_concurrent must be > 0"));
        }
        if !(1..=MAX_STUCK_AFTER_HOURS).contains(&self.monitor.stuck_after_hours) {
            return Err(AppError::validation(format!(
                "monitor.stuck_after_hours must be between 1 and {MAX_STUCK_AFTER_HOURS}"
            )));
        }
        if self.schedule.frequency_hours == Some(0) {
            return Err(AppError::validation("schedule.frequency_hours must be > 0"));
        }
        parse_cron(&self.schedule.cron_expression())?;

        let master = self
            .master
            .as_ref()
            .ok_or_else(|| AppError::config("no [master] mirror defined"))?;

        let mut names = HashSet::new();
        for mirror in std::iter::once(master).chain(&self.mirrors) {
            mirror.validate()?;
            if !names.insert(mirror.name.as_str()) {
                return Err(AppError::config(format!(
                    "mirror name '{}' is defined twice",
                    mirror.name
                )));
            }
        }
        Ok(())
    }

    /// Credentials for a mirror: its own user first, then the defaults.
    pub fn credentials_for(&self, mirror: &MirrorConfig) -> Vec<Credential> {
        let mut credentials: Vec<Credential> = mirror.user.iter().cloned().collect();
        for identity in &self.identities {
            if !credentials.contains(identity) {
                credentials.push(identity.clone());
            }
        }
        if credentials.is_empty() {
            credentials.push(Credential::anonymous());
        }
        credentials
    }

    fn build_mirror(&self, mirror: &MirrorConfig, role: MirrorRole) -> Mirror {
        let endpoints: Vec<Endpoint> = mirror.access.iter().map(|a| a.endpoint(&mirror.host)).collect();
        let passes = Pass::build_all(&endpoints, &self.credentials_for(mirror));
        let cron = mirror
            .cron
            .clone()
            .unwrap_or_else(|| self.schedule.cron_expression());
        Mirror::new(
            mirror.name.clone(),
            role,
            passes,
            mirror.analysis.unwrap_or(self.analysis),
            cron,
        )
    }

    /// The master mirror; its absence is fatal.
    pub fn master_mirror(&self) -> Result<Mirror> {
        let master = self
            .master
            .as_ref()
            .ok_or_else(|| AppError::config("no [master] mirror defined"))?;
        Ok(self.build_mirror(master, MirrorRole::Master))
    }

    pub fn secondary_mirrors(&self) -> Vec<Mirror> {
        self.mirrors
            .iter()
            .map(|m| self.build_mirror(m, MirrorRole::Secondary))
            .collect()
    }
}

/// Pipeline and worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Deltas larger than this are replaced by a full snapshot
    #[serde(default = "defaults::delta_limit")]
    pub delta_limit: usize,

    /// Maximum pipelines running at once across the fleet
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,

    /// Runs older than this are flagged as stuck
    #[serde(default = "defaults::stuck_after_hours")]
    pub stuck_after_hours: u64,

    /// How often the stuck detector sweeps
    #[serde(default = "defaults::stuck_check_interval")]
    pub stuck_check_interval_secs: u64,

    /// Lateness after which a trigger counts as misfired
    #[serde(default = "defaults::misfire_threshold")]
    pub misfire_threshold_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            delta_limit: defaults::delta_limit(),
            max_concurrent: defaults::max_concurrent(),
            stuck_after_hours: defaults::stuck_after_hours(),
            stuck_check_interval_secs: defaults::stuck_check_interval(),
            misfire_threshold_secs: defaults::misfire_threshold(),
        }
    }
}

/// Default schedule, as a cron expression or a frequency in hours.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub cron: Option<String>,

    #[serde(default)]
    pub frequency_hours: Option<u32>,
}

impl ScheduleConfig {
    /// Effective cron expression; an explicit cron wins over a frequency.
    pub fn cron_expression(&self) -> String {
        match (&self.cron, self.frequency_hours) {
            (Some(cron), _) => cron.clone(),
            (None, Some(hours)) => format!("0 0 0/{hours} * * *"),
            (None, None) => defaults::cron(),
        }
    }
}

/// Document store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "defaults::storage_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: defaults::storage_root(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

/// What to do with a host key we have never seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostKeyPolicy {
    /// Accept any key and log it
    #[default]
    Accept,
    /// Require the key to be in known_hosts already
    Strict,
}

/// SSH client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    #[serde(default)]
    pub host_key_policy: HostKeyPolicy,

    /// Remote command producing a long listing of the current directory
    #[serde(default = "defaults::ssh_list_command")]
    pub list_command: String,

    /// Program used to supply passwords non-interactively
    #[serde(default = "defaults::sshpass_program")]
    pub sshpass_program: String,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host_key_policy: HostKeyPolicy::default(),
            list_command: defaults::ssh_list_command(),
            sshpass_program: defaults::sshpass_program(),
        }
    }
}

/// HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
        }
    }
}

/// One mirror definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    pub name: String,

    pub host: String,

    /// Access methods in preference order
    #[serde(default)]
    pub access: Vec<AccessConfig>,

    /// Mirror-specific credential, tried before the default identities
    #[serde(default)]
    pub user: Option<Credential>,

    #[serde(default)]
    pub cron: Option<String>,

    #[serde(default)]
    pub analysis: Option<AnalysisPolicy>,
}

impl MirrorConfig {
    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::config("mirror name is empty"));
        }
        if self.host.trim().is_empty() {
            return Err(AppError::config(format!("mirror '{}' has no host", self.name)));
        }
        if self.access.is_empty() {
            return Err(AppError::config(format!(
                "mirror '{}' has no access method",
                self.name
            )));
        }
        if let Some(cron) = &self.cron {
            parse_cron(cron).map_err(|e| {
                AppError::config(format!("mirror '{}' has an invalid cron: {e}", self.name))
            })?;
        }
        Ok(())
    }
}

/// One access method of a mirror.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessConfig {
    pub protocol: Protocol,

    #[serde(default = "defaults::remote_path")]
    pub path: String,

    /// Defaults to the protocol's well-known port
    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default = "defaults::max_lag")]
    pub max_lag_ms: u64,
}

impl AccessConfig {
    pub fn endpoint(&self, host: &str) -> Endpoint {
        let endpoint = Endpoint::new(host, self.protocol, self.path.clone())
            .with_acceptable_lag_ms(self.max_lag_ms);
        match self.port {
            Some(port) => endpoint.with_port(port),
            None => endpoint,
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    use super::DEFAULT_ACCEPTABLE_LAG_MS;

    pub fn delta_limit() -> usize {
        100
    }
    pub fn max_concurrent() -> usize {
        4
    }
    pub fn stuck_after_hours() -> u64 {
        24
    }
    pub fn stuck_check_interval() -> u64 {
        300
    }
    pub fn misfire_threshold() -> u64 {
        60
    }
    pub fn cron() -> String {
        "0 0 2 * * *".into()
    }
    pub fn storage_root() -> PathBuf {
        PathBuf::from("storage")
    }
    pub fn log_level() -> String {
        "info".into()
    }
    pub fn ssh_list_command() -> String {
        "ls -l --time-style=full-iso".into()
    }
    pub fn sshpass_program() -> String {
        "sshpass".into()
    }
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; mirror-monitor/0.1)".into()
    }
    pub fn remote_path() -> String {
        "/".into()
    }
    pub fn max_lag() -> u64 {
        DEFAULT_ACCEPTABLE_LAG_MS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Depth, Verbosity};

    const SAMPLE: &str = r#"
        [monitor]
        delta_limit = 50

        [schedule]
        frequency_hours = 6

        [analysis]
        depth = "skeleton"
        verbosity = "quiet"

        [[identities]]
        login = "mirror"
        secret = "s3cret"

        [master]
        name = "master"
        host = "master.example.org"
        [[master.access]]
        protocol = "ftp"
        path = "/pub/distrib"

        [[mirrors]]
        name = "eu"
        host = "eu.example.org"
        cron = "0 30 3 * * ?"
        [mirrors.user]
        login = "eu-user"
        keyfile = "/etc/monitor/eu_rsa"
        [[mirrors.access]]
        protocol = "ssh"
        path = "/srv/mirror"
        port = 2222
        [[mirrors.access]]
        protocol = "http"
        path = "/mirror/"
        max_lag_ms = 10000
    "#;

    #[test]
    fn test_parses_full_sample() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.monitor.delta_limit, 50);
        assert_eq!(config.monitor.max_concurrent, 4);
        assert_eq!(config.schedule.cron_expression(), "0 0 0/6 * * *");
        assert_eq!(config.analysis.depth, Depth::Skeleton);
        assert_eq!(config.analysis.verbosity, Verbosity::Quiet);
    }

    #[test]
    fn test_builds_passes_in_preference_order() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        let mirrors = config.secondary_mirrors();
        let eu = &mirrors[0];

        // 2 access methods x (own user + 1 default identity)
        assert_eq!(eu.passes().len(), 4);
        assert_eq!(eu.passes()[0].credential.login, "eu-user");
        assert!(eu.passes()[0].credential.uses_key_auth());
        assert_eq!(eu.passes()[0].endpoint.port(), 2222);
        assert_eq!(eu.passes()[1].credential.login, "mirror");
        assert_eq!(eu.passes()[2].endpoint.protocol(), Protocol::Http);
        assert_eq!(eu.passes()[2].endpoint.acceptable_lag_ms(), 10_000);
        assert_eq!(eu.cron, "0 30 3 * * ?");
    }

    #[test]
    fn test_master_inherits_default_schedule() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        let master = config.master_mirror().unwrap();
        assert!(master.is_master());
        assert_eq!(master.cron, "0 0 0/6 * * *");
        assert_eq!(master.passes().len(), 1);
    }

    #[test]
    fn test_anonymous_is_used_without_identities() {
        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.identities.clear();
        let master = config.master_mirror().unwrap();
        assert_eq!(master.passes()[0].credential.login, Credential::ANONYMOUS_LOGIN);
    }

    #[test]
    fn test_validate_rejects_missing_master() {
        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.master = None;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
        assert!(config.master_mirror().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_names() {
        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.mirrors[0].name = "master".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_cron_and_empty_access() {
        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.mirrors[0].cron = Some("every tuesday".into());
        assert!(config.validate().is_err());

        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.mirrors[0].access.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_stuck_threshold() {
        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.monitor.stuck_after_hours = u64::MAX;
        assert!(matches!(config.validate(), Err(AppError::Validation(_))));

        config.monitor.stuck_after_hours = MAX_STUCK_AFTER_HOURS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_schedule_runs_nightly() {
        assert_eq!(ScheduleConfig::default().cron_expression(), "0 0 2 * * *");
    }
}
