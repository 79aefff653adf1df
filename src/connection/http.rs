//! HTTP client reading auto-generated directory index pages.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use url::Url;

use crate::connection::listing::AutoindexParser;
use crate::connection::{ProtocolClient, within_lag};
use crate::error::{AppError, Result};
use crate::models::{Endpoint, HttpConfig, Node, Pass};

/// HTTP implementation of [`ProtocolClient`].
pub struct HttpClient {
    pass: Pass,
    client: reqwest::Client,
    base: Url,
    parser: AutoindexParser,
    connected: bool,
}

impl HttpClient {
    pub fn new(pass: Pass, config: &HttpConfig) -> Result<Self> {
        let endpoint = &pass.endpoint;
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_millis(endpoint.acceptable_lag_ms()))
            .build()?;
        let base = Url::parse(&format!("http://{}:{}/", endpoint.host(), endpoint.port()))?;

        Ok(Self {
            pass,
            client,
            base,
            parser: AutoindexParser::new()?,
            connected: false,
        })
    }

    /// Index URL of a server directory; always ends with `/`.
    fn directory_url(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        url.set_path(&format!("{}/", path.trim_end_matches('/')));
        url
    }

    async fn fetch_index(&self, path: &str) -> Result<String> {
        let url = self.directory_url(path);
        log::debug!("GET {url}");
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::crawl(url.as_str(), format!("HTTP {status}")));
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl ProtocolClient for HttpClient {
    fn endpoint(&self) -> &Endpoint {
        &self.pass.endpoint
    }

    async fn connect(&mut self) -> Result<()> {
        self.fetch_index(self.pass.endpoint.remote_path())
            .await
            .map_err(|e| AppError::connection(&self.pass.endpoint, e))?;
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
        let body = within_lag(&self.pass.endpoint, format!("GET {path}"), self.fetch_index(path)).await?;
        Ok(self.parser.parse(&body, Utc::now()))
    }

    async fn path_exists(&mut self, path: &str) -> bool {
        let url = self.directory_url(path);
        match self.client.head(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Credential, Protocol};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const INDEX: &str = r#"<html><body><h1>Index of /pub</h1><pre>
<a href="../">Parent Directory</a>
<a href="i586/">i586/</a>                   03-Oct-2005 10:09    -
<a href="foo.rpm">foo.rpm</a>                 03-Oct-2005 10:09   12k
</pre></body></html>"#;

    /// Serves `INDEX` for `/pub/` and 404 for everything else.
    async fn spawn_server() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let n = stream.read(&mut buf).await.unwrap_or(0);
                    let request = String::from_utf8_lossy(&buf[..n]).to_string();
                    let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                    let response = if path == "/pub/" {
                        format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            INDEX.len(),
                            INDEX
                        )
                    } else {
                        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
                    };
                    let _ = stream.write_all(response.as_bytes()).await;
                });
            }
        });
        port
    }

    fn make_client(path: &str, port: u16) -> HttpClient {
        let endpoint = Endpoint::new("127.0.0.1", Protocol::Http, path).with_port(port);
        HttpClient::new(Pass::new(endpoint, Credential::anonymous()), &HttpConfig::default()).unwrap()
    }

    #[test]
    fn test_directory_urls_end_with_slash() {
        let client = make_client("/pub", 8080);
        assert_eq!(client.directory_url("/pub/i586").as_str(), "http://127.0.0.1:8080/pub/i586/");
        assert_eq!(client.directory_url("/pub/").as_str(), "http://127.0.0.1:8080/pub/");
        assert_eq!(client.directory_url("/").as_str(), "http://127.0.0.1:8080/");
        assert_eq!(
            client.directory_url("/pub/my dir").as_str(),
            "http://127.0.0.1:8080/pub/my%20dir/"
        );
    }

    #[tokio::test]
    async fn test_lists_index_page() {
        let port = spawn_server().await;
        let mut client = make_client("/pub", port);

        client.connect().await.unwrap();
        let nodes = client.list_detailed().await.unwrap();

        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].name, "i586");
        assert!(nodes[0].is_dir());
        assert_eq!(nodes[1].size, Some(12 * 1024));
    }

    #[tokio::test]
    async fn test_missing_directory_fails_listing() {
        let port = spawn_server().await;
        let mut client = make_client("/pub", port);
        client.connect().await.unwrap();

        let err = client.list_from("/pub/nope").await.unwrap_err();
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_unreachable_root_fails_connect() {
        let port = spawn_server().await;
        let mut client = make_client("/elsewhere", port);
        assert!(matches!(client.connect().await, Err(AppError::Connection { .. })));
    }
}
