//! Ordered pass failover.

use std::sync::Arc;

use crate::connection::{ClientFactory, ProtocolClient, within_lag};
use crate::error::{AppError, FailedAttempt, Result};
use crate::models::{Mirror, Pass};

/// A live session, owned by the caller for the duration of one run.
pub struct Connection {
    client: Box<dyn ProtocolClient>,
    pass: Pass,
    pass_index: usize,
}

impl Connection {
    pub fn client(&mut self) -> &mut dyn ProtocolClient {
        self.client.as_mut()
    }

    pub fn pass(&self) -> &Pass {
        &self.pass
    }

    /// `host_protocol` of the pass this connection went through.
    pub fn identity(&self) -> String {
        self.pass.endpoint.identity()
    }
}

/// Connects mirrors by trying their passes in order.
#[derive(Clone)]
pub struct Connector {
    factory: Arc<dyn ClientFactory>,
}

impl Connector {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self { factory }
    }

    /// Connect through the sticky pass if it still works, otherwise through
    /// the first pass that does. Each pass is tried at most once per call.
    pub async fn connect(&self, mirror: &mut Mirror) -> Result<Connection> {
        let sticky = mirror.sticky_index();
        let order: Vec<usize> = sticky
            .into_iter()
            .chain((0..mirror.passes().len()).filter(|i| Some(*i) != sticky))
            .collect();

        let mut attempts = Vec::with_capacity(order.len());
        for index in order {
            let pass = mirror.passes()[index].clone();
            match self.open(&pass).await {
                Ok(client) => {
                    for (i, p) in mirror.passes_mut().iter_mut().enumerate() {
                        p.set_active(i == index);
                    }
                    mirror.set_sticky(index);
                    log::info!("[{}] Connected with {}", mirror.name, pass);
                    return Ok(Connection {
                        client,
                        pass,
                        pass_index: index,
                    });
                }
                Err(e) => {
                    log::warn!("[{}] Connection with {} failed: {}", mirror.name, pass, e);
                    attempts.push(FailedAttempt {
                        pass: pass.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        Err(AppError::AllPassesFailed {
            mirror: mirror.name.clone(),
            attempts,
        })
    }

    /// Close the session and clear the pass's active flag.
    pub async fn disconnect(&self, mirror: &mut Mirror, mut connection: Connection) {
        connection.client.close().await;
        if let Some(pass) = mirror.passes_mut().get_mut(connection.pass_index) {
            pass.set_active(false);
        }
        log::debug!("[{}] Disconnected from {}", mirror.name, connection.pass);
    }

    async fn open(&self, pass: &Pass) -> Result<Box<dyn ProtocolClient>> {
        let mut client = self.factory.create(pass)?;
        let outcome = within_lag(&pass.endpoint, "connect", client.connect()).await;
        match outcome {
            Ok(()) => Ok(client),
            Err(e) => {
                // A half-open session must not survive into the next attempt.
                client.close().await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::memory::ScriptedFactory;
    use crate::models::{AnalysisPolicy, Credential, Endpoint, MirrorRole, Protocol};

    fn make_mirror(hosts: &[&str]) -> Mirror {
        let endpoints: Vec<Endpoint> = hosts
            .iter()
            .map(|h| Endpoint::new(*h, Protocol::Ftp, "/pub"))
            .collect();
        let passes = Pass::build_all(&endpoints, &[Credential::anonymous()]);
        Mirror::new("test", MirrorRole::Secondary, passes, AnalysisPolicy::default(), "0 0 2 * * *")
    }

    #[tokio::test]
    async fn test_first_working_pass_wins() {
        let factory = Arc::new(ScriptedFactory::new().failing("a.example.org"));
        let connector = Connector::new(factory.clone());
        let mut mirror = make_mirror(&["a.example.org", "b.example.org", "c.example.org"]);

        let connection = connector.connect(&mut mirror).await.unwrap();

        assert_eq!(connection.pass().endpoint.host(), "b.example.org");
        assert_eq!(factory.attempted_hosts(), vec!["a.example.org", "b.example.org"]);
        assert_eq!(mirror.sticky_index(), Some(1));
        assert_eq!(mirror.identity().unwrap(), "b.example.org_ftp");
        assert_eq!(mirror.passes().iter().filter(|p| p.is_active()).count(), 1);
        assert!(mirror.passes()[1].is_active());

        connector.disconnect(&mut mirror, connection).await;
        assert!(mirror.passes().iter().all(|p| !p.is_active()));
        assert_eq!(factory.closed_count(), 2);
    }

    #[tokio::test]
    async fn test_exhaustion_tries_each_pass_once_and_names_all() {
        let factory = Arc::new(
            ScriptedFactory::new()
                .failing("a.example.org")
                .failing("b.example.org")
                .failing("c.example.org"),
        );
        let connector = Connector::new(factory.clone());
        let mut mirror = make_mirror(&["a.example.org", "b.example.org", "c.example.org"]);

        let err = connector.connect(&mut mirror).await.err().unwrap();

        assert_eq!(factory.attempted_hosts().len(), 3);
        match err {
            AppError::AllPassesFailed { attempts, .. } => {
                assert_eq!(attempts.len(), 3);
                assert!(attempts[0].pass.contains("a.example.org"));
                assert!(attempts[2].pass.contains("c.example.org"));
                assert!(attempts.iter().all(|a| a.reason.contains("refused")));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(mirror.identity().is_err());
    }

    #[tokio::test]
    async fn test_sticky_pass_is_tried_first() {
        let factory = Arc::new(ScriptedFactory::new().failing("a.example.org"));
        let connector = Connector::new(factory.clone());
        let mut mirror = make_mirror(&["a.example.org", "b.example.org"]);

        let connection = connector.connect(&mut mirror).await.unwrap();
        connector.disconnect(&mut mirror, connection).await;

        factory.recover("a.example.org");
        factory.clear_attempts();

        let connection = connector.connect(&mut mirror).await.unwrap();
        assert_eq!(connection.pass().endpoint.host(), "b.example.org");
        assert_eq!(factory.attempted_hosts(), vec!["b.example.org"]);
    }

    #[tokio::test]
    async fn test_failed_sticky_falls_back_without_retrying_it() {
        let factory = Arc::new(ScriptedFactory::new().failing("a.example.org"));
        let connector = Connector::new(factory.clone());
        let mut mirror = make_mirror(&["a.example.org", "b.example.org", "c.example.org"]);

        let connection = connector.connect(&mut mirror).await.unwrap();
        connector.disconnect(&mut mirror, connection).await;

        factory.fail("b.example.org");
        factory.clear_attempts();

        let connection = connector.connect(&mut mirror).await.unwrap();
        assert_eq!(connection.pass().endpoint.host(), "c.example.org");
        assert_eq!(
            factory.attempted_hosts(),
            vec!["b.example.org", "a.example.org", "c.example.org"]
        );
        assert_eq!(mirror.sticky_index(), Some(2));
    }

    #[tokio::test]
    async fn test_slow_connect_counts_as_failure() {
        let factory = Arc::new(ScriptedFactory::new().hanging("a.example.org"));
        let connector = Connector::new(factory.clone());
        let endpoints = vec![
            Endpoint::new("a.example.org", Protocol::Ftp, "/").with_acceptable_lag_ms(20),
            Endpoint::new("b.example.org", Protocol::Ftp, "/"),
        ];
        let passes = Pass::build_all(&endpoints, &[Credential::anonymous()]);
        let mut mirror =
            Mirror::new("slow", MirrorRole::Secondary, passes, AnalysisPolicy::default(), "0 0 2 * * *");

        let connection = connector.connect(&mut mirror).await.unwrap();
        assert_eq!(connection.pass().endpoint.host(), "b.example.org");
    }
}
