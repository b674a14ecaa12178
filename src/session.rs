//! Interactive device sessions over SSH and Telnet.
//!
//! The collector only talks to the [`SessionConnector`] and
//! [`DeviceSession`] traits, so tests can drive it with scripted sessions.
//! [`NetworkConnector`] is the real implementation.
//!
//! # Main Components
//!
//! - [`NetworkConnector`] - opens SSH (russh) or Telnet sessions
//! - [`LiveSession`] - an authenticated interactive shell
//! - [`Credentials`] - login secrets shared by every worker
//! - [`SecurityLevel`] - SSH algorithm policy

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::ConnectError;
use crate::templates::DriverTemplate;

pub use detect::{SIGNATURES, autodetect_ssh, detection_to_profile};
pub use security::SecurityLevel;
pub use shell::Shell;
pub use telnet::TelnetDecoder;

mod detect;
mod security;
mod shell;
mod ssh;
mod telnet;

/// Interactive remote-access protocol used for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Ssh,
    Telnet,
}

impl Transport {
    /// Primary first, fallback second.
    pub const ORDER: [Transport; 2] = [Transport::Ssh, Transport::Telnet];

    pub fn port(&self) -> u16 {
        match self {
            Transport::Ssh => 22,
            Transport::Telnet => 23,
        }
    }

    /// Device type identifier of a profile over this transport.
    pub fn device_type(&self, profile: &str) -> String {
        match self {
            Transport::Ssh => profile.to_string(),
            Transport::Telnet => format!("{profile}{}", crate::profile::TELNET_SUFFIX),
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Ssh => f.write_str("ssh"),
            Transport::Telnet => f.write_str("telnet"),
        }
    }
}

/// Login secrets for one run.
///
/// Held in memory only and shared read-only between workers.
#[derive(Debug)]
pub struct Credentials {
    pub username: String,
    password: SecretString,
    secret: Option<SecretString>,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        secret: Option<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
            secret: secret
                .filter(|s| !s.is_empty())
                .map(SecretString::from),
        }
    }

    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }

    /// Privilege elevation secret, if one was supplied.
    pub fn secret(&self) -> Option<&str> {
        self.secret.as_ref().map(|s| s.expose_secret())
    }
}

/// Parameters for one session attempt.
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub host: String,
    pub port: u16,
    pub transport: Transport,
    /// Profile id plus transport suffix, e.g. `cisco_ios_telnet`.
    pub device_type: String,
    pub driver: DriverTemplate,
    pub credentials: Arc<Credentials>,
    pub connect_timeout: Duration,
    /// Handshake, login and first prompt.
    pub auth_timeout: Duration,
    /// Short idle windows for timing reads.
    pub fast: bool,
}

/// An authenticated interactive shell.
pub trait DeviceSession: Send {
    /// Enters privileged mode with the given secret.
    fn enable(&mut self, secret: &str) -> impl Future<Output = Result<(), ConnectError>> + Send;

    /// Sends a command and waits for the prompt, bounded by `timeout`.
    fn send_command(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<String, ConnectError>> + Send;

    /// Sends a command and reads until output goes quiet.
    ///
    /// Does not depend on prompt recognition.
    fn send_command_timing(
        &mut self,
        command: &str,
        max: Duration,
    ) -> impl Future<Output = Result<String, ConnectError>> + Send;

    /// Current prompt text.
    fn find_prompt(
        &mut self,
        timeout: Duration,
    ) -> impl Future<Output = Result<String, ConnectError>> + Send;

    /// Ends the session. Failures are swallowed.
    fn close(self) -> impl Future<Output = ()> + Send;
}

/// Opens sessions; the seam between the collector and the network.
pub trait SessionConnector: Send + Sync + 'static {
    type Session: DeviceSession + 'static;

    fn connect(
        &self,
        params: SessionParams,
    ) -> impl Future<Output = Result<Self::Session, ConnectError>> + Send;

    /// Best-effort SSH fingerprinting; returns a driver name when a
    /// signature matched.
    fn autodetect(
        &self,
        host: &str,
        credentials: Arc<Credentials>,
        connect_timeout: Duration,
        auth_timeout: Duration,
    ) -> impl Future<Output = Result<Option<String>, ConnectError>> + Send {
        let _ = (host, credentials, connect_timeout, auth_timeout);
        async { Ok(None) }
    }
}

/// Opens real SSH and Telnet sessions.
#[derive(Debug, Clone, Copy)]
pub struct NetworkConnector {
    pub security: SecurityLevel,
}

impl NetworkConnector {
    pub fn new(security: SecurityLevel) -> Self {
        Self { security }
    }
}

impl Default for NetworkConnector {
    fn default() -> Self {
        Self::new(SecurityLevel::LegacyCompatible)
    }
}

/// Underlying connection kept alive for the shell.
enum Link {
    Ssh(russh::client::Handle<ssh::SshHandler>),
    Telnet(tokio::task::JoinHandle<()>),
}

/// Shell opened by [`NetworkConnector`].
pub struct LiveSession {
    shell: Shell,
    link: Link,
}

impl SessionConnector for NetworkConnector {
    type Session = LiveSession;

    async fn connect(&self, params: SessionParams) -> Result<LiveSession, ConnectError> {
        match params.transport {
            Transport::Ssh => {
                let (handle, shell) = ssh::open(&params, self.security).await?;
                Ok(LiveSession {
                    shell,
                    link: Link::Ssh(handle),
                })
            }
            Transport::Telnet => {
                let (task, shell) = telnet::open(&params).await?;
                Ok(LiveSession {
                    shell,
                    link: Link::Telnet(task),
                })
            }
        }
    }

    async fn autodetect(
        &self,
        host: &str,
        credentials: Arc<Credentials>,
        connect_timeout: Duration,
        auth_timeout: Duration,
    ) -> Result<Option<String>, ConnectError> {
        autodetect_ssh(
            host,
            credentials,
            connect_timeout,
            auth_timeout,
            self.security,
        )
        .await
    }
}

impl DeviceSession for LiveSession {
    async fn enable(&mut self, secret: &str) -> Result<(), ConnectError> {
        self.shell.enable(secret).await
    }

    async fn send_command(&mut self, command: &str, timeout: Duration) -> Result<String, ConnectError> {
        self.shell.send_command(command, timeout).await
    }

    async fn send_command_timing(
        &mut self,
        command: &str,
        max: Duration,
    ) -> Result<String, ConnectError> {
        self.shell.send_command_timing(command, max).await
    }

    async fn find_prompt(&mut self, timeout: Duration) -> Result<String, ConnectError> {
        self.shell.find_prompt(timeout).await
    }

    async fn close(self) {
        let LiveSession { shell, link } = self;
        shell.close().await;
        match link {
            Link::Ssh(handle) => ssh::disconnect(handle).await,
            Link::Telnet(task) => task.abort(),
        }
    }
}
