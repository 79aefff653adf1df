//! FTP client over a tokio `TcpStream`.
//!
//! Speaks the small subset a crawler needs: login, `CWD`, passive `LIST`,
//! `QUIT`. A control channel that was closed under us is reopened once per
//! listing call before the failure is surfaced.

use std::io;
use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::connection::listing::LongListingParser;
use crate::connection::{ProtocolClient, within_lag};
use crate::error::{AppError, Result};
use crate::models::{Endpoint, Node, Pass};

/// One server reply.
#[derive(Debug, Clone)]
struct Reply {
    code: u16,
    text: String,
}

impl Reply {
    fn is_positive(&self) -> bool {
        (200..400).contains(&self.code)
    }
}

/// Control connection.
struct Control {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    peer: IpAddr,
}

impl Control {
    async fn open(endpoint: &Endpoint) -> Result<Self> {
        let stream = TcpStream::connect((endpoint.host(), endpoint.port())).await?;
        let peer = stream.peer_addr()?.ip();
        let (read, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read),
            writer,
            peer,
        })
    }

    async fn read_reply(&mut self) -> Result<Reply> {
        let first = self.read_line().await?;
        let code: u16 = first
            .get(..3)
            .and_then(|c| c.parse().ok())
            .ok_or_else(|| AppError::connection("ftp", format!("malformed reply '{first}'")))?;

        let mut text = first.get(4..).unwrap_or_default().to_string();
        if first.as_bytes().get(3) == Some(&b'-') {
            let terminator = format!("{code} ");
            loop {
                let line = self.read_line().await?;
                text.push('\n');
                text.push_str(&line);
                if line.starts_with(&terminator) {
                    break;
                }
            }
        }

        if code == 421 {
            return Err(closed_channel());
        }
        Ok(Reply { code, text })
    }

    async fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Err(closed_channel());
        }
        Ok(line.trim_end().to_string())
    }

    async fn command(&mut self, command: &str) -> Result<Reply> {
        if command.starts_with("PASS ") {
            log::debug!("FTP > PASS ****");
        } else {
            log::debug!("FTP > {command}");
        }
        self.writer.write_all(command.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await?;
        let reply = self.read_reply().await?;
        log::debug!("FTP < {} {}", reply.code, reply.text);
        Ok(reply)
    }
}

fn closed_channel() -> AppError {
    AppError::Io(io::Error::new(
        io::ErrorKind::ConnectionAborted,
        "FTP control connection closed",
    ))
}

fn is_closed_channel(err: &AppError) -> bool {
    match err {
        AppError::Io(e) => matches!(
            e.kind(),
            io::ErrorKind::ConnectionAborted
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::UnexpectedEof
                | io::ErrorKind::NotConnected
        ),
        _ => false,
    }
}

/// FTP implementation of [`ProtocolClient`].
pub struct FtpClient {
    pass: Pass,
    parser: LongListingParser,
    pasv: Regex,
    control: Option<Control>,
}

impl FtpClient {
    pub fn new(pass: Pass) -> Result<Self> {
        Ok(Self {
            pass,
            parser: LongListingParser::new()?,
            pasv: Regex::new(r"(\d+),(\d+),(\d+),(\d+),(\d+),(\d+)")?,
            control: None,
        })
    }

    async fn login(&mut self) -> Result<()> {
        let endpoint = &self.pass.endpoint;
        let credential = &self.pass.credential;
        let mut control = Control::open(endpoint).await?;

        let greeting = control.read_reply().await?;
        if !greeting.is_positive() {
            return Err(AppError::connection(endpoint, format!("greeting refused: {}", greeting.text)));
        }

        let mut reply = control.command(&format!("USER {}", credential.login)).await?;
        if reply.code == 331 {
            reply = control.command(&format!("PASS {}", credential.secret)).await?;
        }
        if !reply.is_positive() {
            return Err(AppError::connection(
                endpoint,
                format!("login refused for {}: {} {}", credential.login, reply.code, reply.text),
            ));
        }

        control.command("TYPE A").await?;

        let reply = control.command(&format!("CWD {}", endpoint.remote_path())).await?;
        if !reply.is_positive() {
            return Err(AppError::connection(
                endpoint,
                format!("unable to change to directory {}: {}", endpoint.remote_path(), reply.text),
            ));
        }

        self.control = Some(control);
        Ok(())
    }

    async fn list_once(&mut self, path: &str) -> Result<String> {
        let control = self.control.as_mut().ok_or_else(closed_channel)?;

        let reply = control.command(&format!("CWD {path}")).await?;
        if !reply.is_positive() {
            return Err(AppError::crawl(path, format!("unable to change to directory: {}", reply.text)));
        }

        let reply = control.command("PASV").await?;
        if reply.code != 227 {
            return Err(AppError::crawl(path, format!("passive mode refused: {}", reply.text)));
        }
        let port = self
            .pasv
            .captures(&reply.text)
            .and_then(|caps| {
                let high: u8 = caps[5].parse().ok()?;
                let low: u8 = caps[6].parse().ok()?;
                Some((u16::from(high) << 8) | u16::from(low))
            })
            .ok_or_else(|| AppError::crawl(path, format!("unreadable PASV reply '{}'", reply.text)))?;

        // The advertised host is often a private address; the control peer is reachable.
        let mut data = TcpStream::connect(SocketAddr::new(control.peer, port)).await?;

        let reply = control.command("LIST").await?;
        if reply.code != 125 && reply.code != 150 {
            return Err(AppError::crawl(path, format!("LIST refused: {} {}", reply.code, reply.text)));
        }

        let mut raw = Vec::new();
        data.read_to_end(&mut raw).await?;
        drop(data);

        let done = control.read_reply().await?;
        if !done.is_positive() {
            return Err(AppError::crawl(path, format!("LIST failed: {} {}", done.code, done.text)));
        }

        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    async fn list_within_lag(&mut self, path: &str) -> Result<String> {
        let endpoint = self.pass.endpoint.clone();
        within_lag(&endpoint, format!("LIST {path}"), self.list_once(path)).await
    }
}

#[async_trait]
impl ProtocolClient for FtpClient {
    fn endpoint(&self) -> &Endpoint {
        &self.pass.endpoint
    }

    async fn connect(&mut self) -> Result<()> {
        self.login().await.map_err(|e| match e {
            AppError::Connection { .. } => e,
            other => AppError::connection(&self.pass.endpoint, other),
        })
    }

    async fn close(&mut self) {
        if let Some(mut control) = self.control.take() {
            let _ = control.command("QUIT").await;
        }
    }

    async fn list_from(&mut self, path: &str) -> Result<Vec<Node>> {
        let raw = match self.list_within_lag(path).await {
            Err(e) if is_closed_channel(&e) => {
                log::info!("{}: control channel closed, reconnecting once", self.pass.endpoint);
                self.control = None;
                let endpoint = self.pass.endpoint.clone();
                within_lag(&endpoint, "reconnect", self.connect()).await?;
                self.list_within_lag(path).await?
            }
            other => other?,
        };
        Ok(self.parser.parse(&raw, Utc::now()))
    }

    async fn path_exists(&mut self, path: &str) -> bool {
        let endpoint = self.pass.endpoint.clone();
        let Some(control) = self.control.as_mut() else {
            return false;
        };
        let command = format!("CWD {path}");
        let result = within_lag(&endpoint, command.clone(), control.command(&command)).await;
        match result {
            Ok(reply) => reply.is_positive(),
            Err(e) => {
                log::debug!("{endpoint}: {command} failed: {e}");
                // A reply may still arrive later and desynchronize the channel.
                if matches!(e, AppError::Timeout { .. }) || is_closed_channel(&e) {
                    self.control = None;
                }
                false
            }
        }
    }
}
