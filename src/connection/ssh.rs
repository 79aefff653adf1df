//! SSH client using the system `ssh` binary.
//!
//! Every call is one `ssh` invocation; listings come from a remote `ls -l`.
//! Password logins go through `sshpass -e` so the secret never shows up in
//! the process table.

use std::process::Stdio;

use async_trait::async_trait;
use chrono::Utc;
use tokio::process::Command;

use crate::connection::listing::LongListingParser;
use crate::connection::{ProtocolClient, within_lag};
use crate::error::{AppError, Result};
use crate::models::{Endpoint, HostKeyPolicy, Node, Pass, SshConfig};
use crate::utils::shell_quote;

/// Program and arguments of one remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Invocation {
    program: String,
    args: Vec<String>,
    password: Option<String>,
}

/// SSH implementation of [`ProtocolClient`].
pub struct SshClient {
    pass: Pass,
    config: SshConfig,
    parser: LongListingParser,
    connected: bool,
}

impl SshClient {
    pub fn new(pass: Pass, config: SshConfig) -> Result<Self> {
        Ok(Self {
            pass,
            config,
            parser: LongListingParser::new()?,
            connected: false,
        })
    }

    fn invocation(&self, remote_command: &str) -> Invocation {
        let endpoint = &self.pass.endpoint;
        let credential = &self.pass.credential;
        let uses_sshpass = !credential.secret.is_empty() && !credential.is_anonymous();

        let mut args = Vec::new();
        let program = if uses_sshpass {
            if credential.uses_key_auth() {
                args.extend(["-P".to_string(), "passphrase".to_string()]);
            }
            args.push("-e".to_string());
            args.push("ssh".to_string());
            self.config.sshpass_program.clone()
        } else {
            "ssh".to_string()
        };

        let connect_timeout = endpoint.acceptable_lag_ms().div_ceil(1000).max(1);
        args.extend([
            "-p".to_string(),
            endpoint.port().to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={connect_timeout}"),
        ]);
        if !uses_sshpass {
            args.extend(["-o".to_string(), "BatchMode=yes".to_string()]);
        }
        match self.config.host_key_policy {
            HostKeyPolicy::Accept => args.extend([
                "-o".to_string(),
                "StrictHostKeyChecking=no".to_string(),
                "-o".to_string(),
                "UserKnownHostsFile=/dev/null".to_string(),
            ]),
            HostKeyPolicy::Strict => {
                args.extend(["-o".to_string(), "StrictHostKeyChecking=yes".to_string()])
            }
        }
        if let Some(keyfile) = &credential.keyfile {
            args.extend(["-i".to_string(), keyfile.display().to_string()]);
        }
        args.push(format!("{}@{}", credential.login, endpoint.host()));
        args.push(remote_command.to_string());

        Invocation {
            program,
            args,
            password: uses_sshpass.then(|| credential.secret.clone()),
        }
    }

    fn listing_command(&self, path: &str) -> String {
        format!("cd {} && {}", shell_quote(path), self.config.list_command)
    }

    /// Run a remote command, returning stdout or stderr on failure.
    async fn run(&self, remote_command: &str) -> std::result::Result<String, String> {
        let invocation = self.invocation(remote_command);
        log::debug!("{}: ssh {}", self.pass.endpoint, remote_command);

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(password) = &invocation.password {
            command.env("SSHPASS", password);
        }

        let output = command
            .output()
            .await
            .map_err(|e| format!("cannot run {}: {e}", invocation.program))?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(format!(
                "exit {}: {}",
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            ))
        }
    }
}

#[async_trait]
impl ProtocolClient for SshClient {
    fn endpoint(&self) -> &Endpoint {
        &self.pass.endpoint
    }

    async fn connect(&mut self) -> Result<()> {
        if self.config.host_key_policy == HostKeyPolicy::Accept {
            log::info!("{}: accepting any host key", self.pass.endpoint);
        }
        let check = format!("cd {} && pwd", shell_quote(self.pass.endpoint.remote_path()));
        self.run(&check)
            .await
            .map_err(|reason| AppError::connection(&self.pass.endpoint, reason))?;
        self.connected = true;
        Ok(())
    }

    async fn close(&mut self) {
        self.connected = false;
    }

    async fn list_from(&mut self, path: &str) -> Result<Vec<Node>> {
        if !self.connected {
            return Err(AppError::crawl(path, "not connected"));
        }
        let command = self.listing_command(path);
        let raw = within_lag(&self.pass.endpoint, format!("listing {path}"), async {
            self.run(&command).await.map_err(|reason| AppError::crawl(path, reason))
        })
        .await?;
        Ok(self.parser.parse(&raw, Utc::now()))
    }

    async fn path_exists(&mut self, path: &str) -> bool {
        self.connected && self.run(&format!("test -d {}", shell_quote(path))).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Credential, Protocol};

    fn make_client(credential: Credential, policy: HostKeyPolicy) -> SshClient {
        let endpoint = Endpoint::new("mirror.example.org", Protocol::Sftp, "/srv/mirror")
            .with_port(2222)
            .with_acceptable_lag_ms(2500);
        let config = SshConfig {
            host_key_policy: policy,
            ..SshConfig::default()
        };
        SshClient::new(Pass::new(endpoint, credential), config).unwrap()
    }

    #[test]
    fn test_password_login_goes_through_sshpass() {
        let client = make_client(Credential::password("bob", "hunter2"), HostKeyPolicy::Accept);
        let invocation = client.invocation("pwd");

        assert_eq!(invocation.program, "sshpass");
        assert_eq!(&invocation.args[..2], ["-e", "ssh"]);
        assert!(invocation.args.contains(&"2222".to_string()));
        assert!(invocation.args.contains(&"ConnectTimeout=3".to_string()));
        assert!(invocation.args.contains(&"StrictHostKeyChecking=no".to_string()));
        assert!(!invocation.args.contains(&"BatchMode=yes".to_string()));
        assert!(!invocation.args.iter().any(|a| a.contains("hunter2")));
        assert_eq!(invocation.password.as_deref(), Some("hunter2"));
        assert_eq!(invocation.args.last().map(String::as_str), Some("pwd"));
        assert!(invocation.args.contains(&"bob@mirror.example.org".to_string()));
    }

    #[test]
    fn test_key_login_runs_ssh_in_batch_mode() {
        let client = make_client(
            Credential::keyfile("mirror", "/home/mirror/.ssh/id_ed25519", ""),
            HostKeyPolicy::Strict,
        );
        let invocation = client.invocation("pwd");

        assert_eq!(invocation.program, "ssh");
        assert!(invocation.password.is_none());
        assert!(invocation.args.contains(&"BatchMode=yes".to_string()));
        assert!(invocation.args.contains(&"StrictHostKeyChecking=yes".to_string()));
        let key = invocation.args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(invocation.args[key + 1], "/home/mirror/.ssh/id_ed25519");
    }

    #[test]
    fn test_anonymous_login_runs_ssh_in_batch_mode() {
        let client = make_client(Credential::anonymous(), HostKeyPolicy::Accept);
        let invocation = client.invocation("pwd");

        assert_eq!(invocation.program, "ssh");
        assert!(invocation.password.is_none());
        assert!(invocation.args.contains(&"BatchMode=yes".to_string()));
        assert!(invocation.args.contains(&"anonymous@mirror.example.org".to_string()));
    }

    #[test]
    fn test_listing_command_quotes_the_path() {
        let client = make_client(Credential::anonymous(), HostKeyPolicy::Accept);
        assert_eq!(
            client.listing_command("/srv/it's here"),
            "cd '/srv/it'\\''s here' && ls -l --time-style=full-iso"
        );
    }

    #[tokio::test]
    async fn test_listing_requires_a_connection() {
        let mut client = make_client(Credential::anonymous(), HostKeyPolicy::Accept);
        assert!(matches!(
            client.list_from("/srv/mirror").await,
            Err(AppError::Crawl { .. })
        ));
        assert!(!client.path_exists("/srv/mirror").await);
    }
}
