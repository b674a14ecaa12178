use log::{debug, trace};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{SessionParams, Shell};
use crate::error::ConnectError;

const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;

const OPT_ECHO: u8 = 1;
const OPT_SGA: u8 = 3;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum State {
    #[default]
    Data,
    Iac,
    Negotiate(u8),
    Sub,
    SubIac,
}

/// Bytes of one decoded read.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Decoded {
    /// Application data with telnet commands removed.
    pub data: Vec<u8>,
    /// Negotiation answers to write back.
    pub replies: Vec<u8>,
}

/// Minimal telnet option handling.
///
/// Accepts the server's ECHO and SUPPRESS-GO-AHEAD, offers SGA, refuses
/// everything else and skips subnegotiation. State carries over between
/// reads so commands split across packets decode correctly.
#[derive(Debug, Default)]
pub struct TelnetDecoder {
    state: State,
}

impl TelnetDecoder {
    pub fn feed(&mut self, input: &[u8]) -> Decoded {
        let mut out = Decoded::default();
        for &byte in input {
            self.state = match (self.state, byte) {
                (State::Data, IAC) => State::Iac,
                (State::Data, 0) => State::Data,
                (State::Data, b) => {
                    out.data.push(b);
                    State::Data
                }
                (State::Iac, IAC) => {
                    out.data.push(IAC);
                    State::Data
                }
                (State::Iac, cmd @ (WILL | WONT | DO | DONT)) => State::Negotiate(cmd),
                (State::Iac, SB) => State::Sub,
                (State::Iac, _) => State::Data,
                (State::Negotiate(cmd), option) => {
                    if let Some(answer) = Self::answer(cmd, option) {
                        out.replies.extend_from_slice(&[IAC, answer, option]);
                    }
                    State::Data
                }
                (State::Sub, IAC) => State::SubIac,
                (State::Sub, _) => State::Sub,
                (State::SubIac, SE) => State::Data,
                (State::SubIac, _) => State::Sub,
            };
        }
        out
    }

    fn answer(cmd: u8, option: u8) -> Option<u8> {
        match (cmd, option) {
            (WILL, OPT_ECHO | OPT_SGA) => Some(DO),
            (WILL, _) => Some(DONT),
            (DO, OPT_SGA) => Some(WILL),
            (DO, _) => Some(WONT),
            _ => None,
        }
    }
}

/// Encodes shell input with CRLF line endings.
///
/// Valid UTF-8 never contains an IAC byte, so no escaping is needed.
pub fn encode(data: &str) -> Vec<u8> {
    data.replace('\n', "\r\n").into_bytes()
}

/// Connects and logs in over telnet.
///
/// The TCP connect is bounded by the connect timeout, the username and
/// password exchange plus the first prompt by the auth timeout.
pub(super) async fn open(params: &SessionParams) -> Result<(JoinHandle<()>, Shell), ConnectError> {
    let device_addr = format!("telnet://{}:{}", params.host, params.port);
    let stream = tokio::time::timeout(
        params.connect_timeout,
        TcpStream::connect((params.host.as_str(), params.port)),
    )
    .await
    .map_err(|_| ConnectError::ConnectTimeout(params.connect_timeout))??;
    debug!("{} TCP connection successful", device_addr);
    let started = Instant::now();

    let (mut reader, mut writer) = stream.into_split();
    let (sender_to_shell, mut receiver_from_user) = mpsc::channel::<String>(256);
    let (sender_to_user, receiver_from_shell) = mpsc::channel::<String>(256);

    let io_task_device_addr = device_addr.clone();
    let task = tokio::spawn(async move {
        let mut decoder = TelnetDecoder::default();
        let mut buf = [0u8; 4096];
        loop {
            tokio::select! {
                Some(data) = receiver_from_user.recv() => {
                    if let Err(e) = writer.write_all(&encode(&data)).await {
                        debug!("{} Failed to send data: {:?}", io_task_device_addr, e);
                        break;
                    }
                },
                read = reader.read(&mut buf) => {
                    let n = match read {
                        Ok(0) => {
                            debug!("{} remote closed the connection", io_task_device_addr);
                            break;
                        }
                        Ok(n) => n,
                        Err(e) => {
                            debug!("{} read failed: {:?}", io_task_device_addr, e);
                            break;
                        }
                    };
                    let decoded = decoder.feed(&buf[..n]);
                    if !decoded.replies.is_empty() {
                        trace!("{} negotiation {:?}", io_task_device_addr, decoded.replies);
                        if writer.write_all(&decoded.replies).await.is_err() {
                            break;
                        }
                    }
                    if !decoded.data.is_empty() {
                        let s = String::from_utf8_lossy(&decoded.data).into_owned();
                        if sender_to_user.send(s).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
        debug!("{} telnet I/O task ended.", io_task_device_addr);
    });

    let mut shell = match Shell::new(
        sender_to_shell,
        receiver_from_shell,
        params.driver,
        params.fast,
        device_addr.clone(),
    ) {
        Ok(shell) => shell,
        Err(err) => {
            task.abort();
            return Err(err);
        }
    };

    let remaining = params.auth_timeout.saturating_sub(started.elapsed());
    let login = tokio::time::timeout(
        remaining,
        shell.login(&params.credentials.username, params.credentials.password()),
    )
    .await;
    match login {
        Ok(Ok(_)) => Ok((task, shell)),
        Ok(Err(err)) => {
            task.abort();
            Err(err)
        }
        Err(_) => {
            task.abort();
            Err(ConnectError::AuthTimeout(format!("{device_addr} telnet login")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiation_is_answered_and_stripped() {
        let mut decoder = TelnetDecoder::default();
        let decoded = decoder.feed(&[
            IAC, WILL, OPT_ECHO, IAC, DO, 24, b'l', b'o', b'g', b'i', b'n', b':',
        ]);
        assert_eq!(decoded.data, b"login:".to_vec());
        assert_eq!(decoded.replies, vec![IAC, DO, OPT_ECHO, IAC, WONT, 24]);
    }

    #[test]
    fn command_split_across_reads_is_decoded() {
        let mut decoder = TelnetDecoder::default();
        let first = decoder.feed(&[b'a', IAC]);
        let second = decoder.feed(&[WILL, OPT_SGA, b'b']);
        assert_eq!(first.data, b"a".to_vec());
        assert_eq!(second.data, b"b".to_vec());
        assert_eq!(second.replies, vec![IAC, DO, OPT_SGA]);
    }

    #[test]
    fn subnegotiation_and_escaped_iac() {
        let mut decoder = TelnetDecoder::default();
        let decoded = decoder.feed(&[IAC, SB, 24, 1, IAC, SE, b'x', IAC, IAC, 0]);
        assert_eq!(decoded.data, vec![b'x', IAC]);
        assert!(decoded.replies.is_empty());
    }

    #[test]
    fn encode_uses_crlf() {
        assert_eq!(encode("show version\n"), b"show version\r\n".to_vec());
        assert_eq!(encode(" "), b" ".to_vec());
    }
}
