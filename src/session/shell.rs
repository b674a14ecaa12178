use std::time::Duration;

use log::{debug, trace};
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::time::Instant;

use crate::device::{
    IGNORE_START_LINE, LOGIN_FAILED, LOGIN_PROMPT, LineKind, PromptMatcher, normalize_output,
    tail_line,
};
use crate::error::ConnectError;
use crate::templates::DriverTemplate;

/// Idle window that ends a timing read.
const TIMING_IDLE: Duration = Duration::from_secs(2);
const TIMING_IDLE_FAST: Duration = Duration::from_millis(500);

/// Key sent to continue paged output.
const PAGER_CONTINUE: &str = " ";

/// Line-oriented view of a device shell.
///
/// The transport's I/O task feeds decoded text into `rx` and writes
/// whatever arrives on `tx` to the device.
pub struct Shell {
    tx: Sender<String>,
    rx: Receiver<String>,
    matcher: PromptMatcher,
    driver: DriverTemplate,
    fast: bool,
    label: String,
}

impl Shell {
    pub fn new(
        tx: Sender<String>,
        rx: Receiver<String>,
        driver: DriverTemplate,
        fast: bool,
        label: impl Into<String>,
    ) -> Result<Self, ConnectError> {
        Ok(Self {
            tx,
            rx,
            matcher: driver.matcher()?,
            driver,
            fast,
            label: label.into(),
        })
    }

    async fn write(&self, data: &str) -> Result<(), ConnectError> {
        self.tx.send(data.to_string()).await?;
        Ok(())
    }

    /// Reads until the trailing line is a prompt or a password request.
    ///
    /// Pager prompts are answered and removed from `out`.
    async fn read_until_prompt(&mut self, out: &mut String) -> Result<LineKind, ConnectError> {
        loop {
            let Some(data) = self.rx.recv().await else {
                return Err(ConnectError::ChannelDisconnectError);
            };
            trace!("{} {:?}", self.label, data);
            out.push_str(&data);
            match self.step(out).await? {
                kind @ (LineKind::Prompt | LineKind::Password) => return Ok(kind),
                _ => {}
            }
        }
    }

    /// Classifies the trailing line and answers pagers.
    async fn step(&mut self, out: &mut String) -> Result<LineKind, ConnectError> {
        let tail = tail_line(out);
        let tail_len = tail.len();
        let kind = self.matcher.read(tail);
        if kind == LineKind::More {
            out.truncate(out.len() - tail_len);
            self.write(PAGER_CONTINUE).await?;
        }
        Ok(kind)
    }

    /// Completes an in-shell login and waits for the first prompt.
    ///
    /// Handles devices that ask for credentials inside the shell (telnet,
    /// and some SSH servers that accept any user at the protocol level).
    pub async fn login(&mut self, username: &str, password: &str) -> Result<String, ConnectError> {
        let mut out = String::new();
        let mut sent_user = false;
        let mut sent_password = false;
        loop {
            let Some(data) = self.rx.recv().await else {
                return Err(ConnectError::ChannelDisconnectError);
            };
            trace!("{} {:?}", self.label, data);
            out.push_str(&data);

            if sent_password && LOGIN_FAILED.is_match(&out) {
                return Err(ConnectError::AuthenticationFailed(username.to_string()));
            }

            let tail = IGNORE_START_LINE.replace(tail_line(&out), "").to_string();
            if LOGIN_PROMPT.is_match(tail.trim_end()) {
                if sent_password {
                    return Err(ConnectError::AuthenticationFailed(username.to_string()));
                }
                debug!("{} username requested", self.label);
                self.write(&format!("{username}\n")).await?;
                sent_user = true;
                out.clear();
                continue;
            }

            match self.step(&mut out).await? {
                LineKind::Password => {
                    if sent_password {
                        return Err(ConnectError::AuthenticationFailed(username.to_string()));
                    }
                    debug!("{} password requested (user sent: {sent_user})", self.label);
                    self.write(&format!("{password}\n")).await?;
                    sent_password = true;
                    out.clear();
                }
                LineKind::Prompt => return Ok(out),
                _ => {}
            }
        }
    }

    /// Sends a command and collects output up to the next prompt.
    pub async fn send_command(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<String, ConnectError> {
        // 1. Clear any residual data in the receiver
        while self.rx.try_recv().is_ok() {}

        self.write(&format!("{command}\n")).await?;

        let mut raw = String::new();
        let result = tokio::time::timeout(timeout, self.read_until_prompt(&mut raw)).await;
        match result {
            Err(_) => Err(ConnectError::ExecTimeout(normalize_partial(&raw, command))),
            Ok(Err(err)) => Err(err),
            Ok(Ok(_)) => Ok(normalize_output(&raw, command)),
        }
    }

    /// Sends a command and reads until the device stays quiet for the idle
    /// window or `max` elapses.
    pub async fn send_command_timing(
        &mut self,
        command: &str,
        max: Duration,
    ) -> Result<String, ConnectError> {
        while self.rx.try_recv().is_ok() {}
        self.write(&format!("{command}\n")).await?;

        let idle = if self.fast {
            TIMING_IDLE_FAST
        } else {
            TIMING_IDLE
        };
        let deadline = Instant::now() + max;
        let mut raw = String::new();
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match tokio::time::timeout(idle.min(deadline - now), self.rx.recv()).await {
                Err(_) => break,
                Ok(None) if raw.is_empty() => return Err(ConnectError::ChannelDisconnectError),
                Ok(None) => break,
                Ok(Some(data)) => {
                    trace!("{} {:?}", self.label, data);
                    raw.push_str(&data);
                    self.step(&mut raw).await?;
                }
            }
        }

        if self.matcher.is_prompt(tail_line(&raw)) {
            Ok(normalize_output(&raw, command))
        } else {
            Ok(normalize_partial(&raw, command))
        }
    }

    /// Enters privileged mode; a no-op when already privileged.
    pub async fn enable(&mut self, secret: &str) -> Result<(), ConnectError> {
        if self.matcher.is_privileged() {
            return Ok(());
        }
        let Some(command) = self.driver.enable_command else {
            return Ok(());
        };
        self.write(&format!("{command}\n")).await?;
        let mut out = String::new();
        let mut sent_secret = false;
        loop {
            match self.read_until_prompt(&mut out).await? {
                LineKind::Password if !sent_secret => {
                    self.write(&format!("{secret}\n")).await?;
                    sent_secret = true;
                    out.clear();
                }
                LineKind::Password => {
                    return Err(ConnectError::ElevationFailed(
                        "secret rejected".to_string(),
                    ));
                }
                _ => break,
            }
        }
        if self.matcher.is_privileged() {
            Ok(())
        } else {
            Err(ConnectError::ElevationFailed(format!(
                "still at prompt {}",
                self.matcher.current_prompt().unwrap_or_default()
            )))
        }
    }

    /// Sends an empty line and returns the prompt that answers it.
    pub async fn find_prompt(&mut self, timeout: Duration) -> Result<String, ConnectError> {
        while self.rx.try_recv().is_ok() {}
        self.write("\n").await?;
        let mut raw = String::new();
        match tokio::time::timeout(timeout, self.read_until_prompt(&mut raw)).await {
            Err(_) => Err(ConnectError::ExecTimeout(raw)),
            Ok(Err(err)) => Err(err),
            Ok(Ok(_)) => Ok(self.matcher.current_prompt().unwrap_or_default().to_string()),
        }
    }

    pub fn current_prompt(&self) -> Option<&str> {
        self.matcher.current_prompt()
    }

    /// Sends `exit` and stops reading. Never fails.
    pub async fn close(mut self) {
        self.rx.close();
        if let Err(e) = self.tx.send("exit\n".to_string()).await {
            debug!("{} failed to send exit command: {:?}", self.label, e);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        debug!("{} shell closed", self.label);
    }
}

/// Output cleanup when no trailing prompt was seen.
fn normalize_partial(raw: &str, command: &str) -> String {
    let mut text = normalize_output(&format!("{raw}\n"), command);
    while text.ends_with('\n') {
        text.pop();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates;
    use tokio::sync::mpsc;

    /// Scripted device: replies to each line written by the shell.
    fn scripted<F>(mut reply: F) -> Shell
    where
        F: FnMut(&str) -> Vec<String> + Send + 'static,
    {
        let (to_device, mut from_shell) = mpsc::channel::<String>(64);
        let (to_shell, from_device) = mpsc::channel::<String>(64);
        tokio::spawn(async move {
            while let Some(line) = from_shell.recv().await {
                for chunk in reply(&line) {
                    if to_shell.send(chunk).await.is_err() {
                        return;
                    }
                }
            }
        });
        Shell::new(to_device, from_device, templates::cisco_ios(), true, "test")
            .expect("cisco template")
    }

    #[tokio::test]
    async fn send_command_answers_pager_and_strips_echo() {
        let mut shell = scripted(|line| match line {
            "show version\n" => vec![
                "show version\r\nline one\r\n".to_string(),
                " --More-- ".to_string(),
            ],
            " " => vec!["\r          \rline two\r\nsw1#".to_string()],
            _ => vec![],
        });
        let out = shell
            .send_command("show version", Duration::from_secs(2))
            .await
            .expect("command output");
        assert_eq!(out, "line one\nline two");
        assert_eq!(shell.current_prompt(), Some("sw1#"));
    }

    #[tokio::test]
    async fn send_command_times_out_with_partial_output() {
        let mut shell = scripted(|line| match line {
            "show tech\n" => vec!["show tech\r\npartial".to_string()],
            _ => vec![],
        });
        let err = match shell
            .send_command("show tech", Duration::from_millis(200))
            .await
        {
            Ok(_) => panic!("command should time out"),
            Err(err) => err,
        };
        assert!(matches!(err, ConnectError::ExecTimeout(ref partial) if partial == "partial"));
    }

    #[tokio::test]
    async fn timing_send_returns_after_idle_window() {
        let mut shell = scripted(|line| match line {
            "show clock\n" => vec!["show clock\r\n12:00:00 UTC\r\nsw1#".to_string()],
            _ => vec![],
        });
        let out = shell
            .send_command_timing("show clock", Duration::from_secs(5))
            .await
            .expect("timing output");
        assert_eq!(out, "12:00:00 UTC");
    }

    #[tokio::test]
    async fn enable_sends_secret_and_checks_privileged_prompt() {
        let mut shell = scripted(|line| match line {
            "\n" => vec!["\r\nsw1>".to_string()],
            "enable\n" => vec!["enable\r\nPassword: ".to_string()],
            "s3cret\n" => vec!["\r\nsw1#".to_string()],
            _ => vec!["\r\nPassword: ".to_string()],
        });
        shell
            .find_prompt(Duration::from_secs(2))
            .await
            .expect("prompt");
        shell.enable("s3cret").await.expect("enable");
        assert_eq!(shell.current_prompt(), Some("sw1#"));
    }

    #[tokio::test]
    async fn enable_with_wrong_secret_fails() {
        let mut shell = scripted(|line| match line {
            "\n" => vec!["\r\nsw1>".to_string()],
            "enable\n" => vec!["enable\r\nPassword: ".to_string()],
            _ => vec!["\r\n% Access denied\r\nPassword: ".to_string()],
        });
        shell
            .find_prompt(Duration::from_secs(2))
            .await
            .expect("prompt");
        let err = match shell.enable("wrong").await {
            Ok(_) => panic!("enable should fail"),
            Err(err) => err,
        };
        assert!(matches!(err, ConnectError::ElevationFailed(_)));
    }

    #[tokio::test]
    async fn login_answers_username_and_password() {
        let (to_device, mut from_shell) = mpsc::channel::<String>(8);
        let (to_shell, from_device) = mpsc::channel::<String>(8);
        to_shell
            .send("\r\nUser Name:".to_string())
            .await
            .expect("banner");
        tokio::spawn(async move {
            while let Some(line) = from_shell.recv().await {
                let reply = match line.as_str() {
                    "admin\n" => "admin\r\nPassword:",
                    "pw\n" => "\r\nsw1#",
                    _ => continue,
                };
                if to_shell.send(reply.to_string()).await.is_err() {
                    return;
                }
            }
        });
        let mut shell = Shell::new(to_device, from_device, templates::eltex(), false, "test")
            .expect("eltex template");
        shell.login("admin", "pw").await.expect("login");
        assert_eq!(shell.current_prompt(), Some("sw1#"));
    }

    #[tokio::test]
    async fn repeated_login_prompt_is_an_auth_failure() {
        let (to_device, mut from_shell) = mpsc::channel::<String>(8);
        let (to_shell, from_device) = mpsc::channel::<String>(8);
        to_shell
            .send("login: ".to_string())
            .await
            .expect("banner");
        tokio::spawn(async move {
            while let Some(line) = from_shell.recv().await {
                let reply = match line.as_str() {
                    "admin\n" => "admin\r\nPassword: ",
                    _ => "\r\nLogin incorrect\r\nlogin: ",
                };
                if to_shell.send(reply.to_string()).await.is_err() {
                    return;
                }
            }
        });
        let mut shell = Shell::new(to_device, from_device, templates::cisco_ios(), false, "test")
            .expect("cisco template");
        let err = match shell.login("admin", "bad").await {
            Ok(_) => panic!("login should fail"),
            Err(err) => err,
        };
        assert!(matches!(err, ConnectError::AuthenticationFailed(_)));
    }
}
