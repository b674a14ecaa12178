#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rcollect::config::{CollectConfig, CollectPaths, Timeouts};
use rcollect::error::ConnectError;
use rcollect::probe::PortProbe;
use rcollect::session::{Credentials, DeviceSession, SessionConnector, SessionParams};

/// How the scripted device answers one command.
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    /// Prompt-aware send fails, the timing send returns the text.
    OnlyTiming(String),
    /// Both send modes fail.
    Broken,
}

/// Scripted device shared by every session of a connector.
#[derive(Debug, Default)]
pub struct Script {
    /// Device types that log in; everything else fails authentication.
    pub accepts: HashSet<String>,
    pub replies: HashMap<String, Reply>,
    pub prompt: String,
    pub connect_delay: Duration,
    pub enable_fails: bool,
    /// Every connect fails with this internal error text.
    pub connect_error: Option<String>,
    pub panic_on_host: Option<String>,
    pub detected: Option<String>,
}

impl Script {
    pub fn accepting(device_types: &[&str]) -> Self {
        Self {
            accepts: device_types.iter().map(|d| d.to_string()).collect(),
            prompt: "lab-sw1#".to_string(),
            ..Default::default()
        }
    }
}

/// Calls observed by a [`MockConnector`].
#[derive(Debug, Default)]
pub struct Calls {
    /// `(host, device_type)` per connect, in call order.
    pub connects: Mutex<Vec<(String, String)>>,
    pub autodetects: Mutex<Vec<String>>,
    pub enables: AtomicUsize,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
}

impl Calls {
    pub fn connects(&self) -> Vec<(String, String)> {
        self.connects.lock().expect("connects lock").clone()
    }

    pub fn device_types_for(&self, host: &str) -> Vec<String> {
        self.connects()
            .into_iter()
            .filter(|(h, _)| h == host)
            .map(|(_, dt)| dt)
            .collect()
    }
}

#[derive(Clone)]
pub struct MockConnector {
    pub script: Arc<Script>,
    pub calls: Arc<Calls>,
}

impl MockConnector {
    pub fn new(script: Script) -> Self {
        Self {
            script: Arc::new(script),
            calls: Arc::new(Calls::default()),
        }
    }
}

pub struct MockSession {
    script: Arc<Script>,
    calls: Arc<Calls>,
}

impl SessionConnector for MockConnector {
    type Session = MockSession;

    async fn connect(&self, params: SessionParams) -> Result<MockSession, ConnectError> {
        self.calls
            .connects
            .lock()
            .expect("connects lock")
            .push((params.host.clone(), params.device_type.clone()));
        if self.script.panic_on_host.as_deref() == Some(params.host.as_str()) {
            panic!("scripted crash for {}", params.host);
        }

        let now = self.calls.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.calls.max_active.fetch_max(now, Ordering::SeqCst);
        if !self.script.connect_delay.is_zero() {
            tokio::time::sleep(self.script.connect_delay).await;
        }

        if let Some(text) = &self.script.connect_error {
            self.calls.active.fetch_sub(1, Ordering::SeqCst);
            return Err(ConnectError::InternalServerError(text.clone()));
        }
        if self.script.accepts.contains(&params.device_type) {
            Ok(MockSession {
                script: self.script.clone(),
                calls: self.calls.clone(),
            })
        } else {
            self.calls.active.fetch_sub(1, Ordering::SeqCst);
            Err(ConnectError::AuthenticationFailed(
                params.credentials.username.clone(),
            ))
        }
    }

    async fn autodetect(
        &self,
        host: &str,
        _credentials: Arc<Credentials>,
        _connect_timeout: Duration,
        _auth_timeout: Duration,
    ) -> Result<Option<String>, ConnectError> {
        self.calls
            .autodetects
            .lock()
            .expect("autodetect lock")
            .push(host.to_string());
        Ok(self.script.detected.clone())
    }
}

impl DeviceSession for MockSession {
    async fn enable(&mut self, _secret: &str) -> Result<(), ConnectError> {
        self.calls.enables.fetch_add(1, Ordering::SeqCst);
        if self.script.enable_fails {
            Err(ConnectError::ElevationFailed("secret rejected".to_string()))
        } else {
            Ok(())
        }
    }

    async fn send_command(&mut self, command: &str, _timeout: Duration) -> Result<String, ConnectError> {
        match self.script.replies.get(command) {
            Some(Reply::Text(text)) => Ok(text.clone()),
            Some(Reply::OnlyTiming(_)) | Some(Reply::Broken) => {
                Err(ConnectError::ExecTimeout(String::new()))
            }
            None => Ok(format!("output of {command}")),
        }
    }

    async fn send_command_timing(
        &mut self,
        command: &str,
        _max: Duration,
    ) -> Result<String, ConnectError> {
        match self.script.replies.get(command) {
            Some(Reply::Text(text)) | Some(Reply::OnlyTiming(text)) => Ok(text.clone()),
            Some(Reply::Broken) => Err(ConnectError::ChannelDisconnectError),
            None => Ok(format!("output of {command}")),
        }
    }

    async fn find_prompt(&mut self, _timeout: Duration) -> Result<String, ConnectError> {
        Ok(self.script.prompt.clone())
    }

    async fn close(self) {
        self.calls.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Reports the listed `(host, port)` pairs as open.
#[derive(Debug, Default)]
pub struct MockProbe {
    open: HashSet<(String, u16)>,
}

impl MockProbe {
    pub fn with_open(open: &[(&str, u16)]) -> Self {
        Self {
            open: open.iter().map(|(h, p)| (h.to_string(), *p)).collect(),
        }
    }
}

impl PortProbe for MockProbe {
    async fn is_open(&self, host: &str, port: u16, _timeout: Duration) -> bool {
        self.open.contains(&(host.to_string(), port))
    }
}

pub fn credentials(secret: Option<&str>) -> Arc<Credentials> {
    Arc::new(Credentials::new("admin", "pw", secret.map(str::to_string)))
}

/// Config rooted in a temporary directory with short timeouts and
/// fingerprinting off.
pub fn test_config(base: &Path) -> CollectConfig {
    CollectConfig {
        detect: false,
        heartbeat_interval: Duration::from_secs(5),
        timeouts: Timeouts {
            probe: Duration::from_millis(50),
            connect: Duration::from_millis(200),
            auth: Duration::from_millis(200),
            command: Duration::from_millis(200),
            host_deadline: Duration::from_secs(30),
        },
        paths: CollectPaths::under(base),
        ..Default::default()
    }
}

pub fn write_file(path: &Path, text: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent dir");
    }
    std::fs::write(path, text).expect("write file");
}
