use std::sync::Arc;
use std::time::Duration;

use log::debug;
use russh::ChannelMsg;
use russh::client::{self, Handle};
use russh::keys::PublicKey;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{SecurityLevel, SessionParams, Shell};
use crate::error::ConnectError;

/// russh client handler.
///
/// Host keys are accepted without verification; collection targets are
/// usually never-seen switches without a known_hosts entry.
pub struct SshHandler {
    label: String,
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!(
            "{} host key {}",
            self.label,
            server_public_key.algorithm().as_str()
        );
        Ok(true)
    }
}

/// Connects, authenticates and opens an interactive shell.
///
/// The TCP connect is bounded by the connect timeout; handshake,
/// authentication, shell setup and the first prompt share the auth timeout.
pub(super) async fn open(
    params: &SessionParams,
    security: SecurityLevel,
) -> Result<(Handle<SshHandler>, Shell), ConnectError> {
    let device_addr = format!(
        "{}@{}:{}",
        params.credentials.username, params.host, params.port
    );

    let stream = tokio::time::timeout(
        params.connect_timeout,
        TcpStream::connect((params.host.as_str(), params.port)),
    )
    .await
    .map_err(|_| ConnectError::ConnectTimeout(params.connect_timeout))??;
    debug!("{} TCP connection successful", device_addr);

    let started = Instant::now();
    let config = Arc::new(client::Config {
        preferred: security.preferred(),
        inactivity_timeout: Some(Duration::from_secs(60)),
        ..Default::default()
    });
    let handler = SshHandler {
        label: device_addr.clone(),
    };

    let handshake = async {
        let mut handle = client::connect_stream(config, stream, handler).await?;
        let authenticated = handle
            .authenticate_password(&params.credentials.username, params.credentials.password())
            .await?
            .success();
        if !authenticated {
            return Err(ConnectError::AuthenticationFailed(
                params.credentials.username.clone(),
            ));
        }
        let channel = handle.channel_open_session().await?;
        channel
            .request_pty(false, "xterm", 200, 48, 0, 0, &[])
            .await?;
        channel.request_shell(false).await?;
        Ok::<_, ConnectError>((handle, channel))
    };
    let (handle, mut channel) = tokio::time::timeout(params.auth_timeout, handshake)
        .await
        .map_err(|_| ConnectError::AuthTimeout(format!("{device_addr} ssh handshake")))??;
    debug!("{} Shell request successful", device_addr);

    let (sender_to_shell, mut receiver_from_user) = mpsc::channel::<String>(256);
    let (sender_to_user, receiver_from_shell) = mpsc::channel::<String>(256);

    let io_task_device_addr = device_addr.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(data) = receiver_from_user.recv() => {
                    if let Err(e) = channel.data(data.as_bytes()).await {
                        debug!("{} Failed to send data to shell: {:?}", io_task_device_addr, e);
                        break;
                    }
                },
                Some(msg) = channel.wait() => {
                    match msg {
                        ChannelMsg::Data { ref data } => {
                            let s = String::from_utf8_lossy(data).into_owned();
                            if sender_to_user.send(s).await.is_err() {
                                debug!("{} Shell output receiver dropped. Closing task.", io_task_device_addr);
                                break;
                            }
                        }
                        ChannelMsg::ExitStatus { exit_status } => {
                            debug!("{} Shell exited with status code: {}", io_task_device_addr, exit_status);
                            let _ = channel.eof().await;
                            break;
                        }
                        ChannelMsg::Eof => {
                            debug!("{} Shell sent EOF.", io_task_device_addr);
                            break;
                        }
                        _ => {}
                    }
                }
                else => break,
            }
        }
        debug!("{} SSH I/O task ended.", io_task_device_addr);
    });

    let mut shell = Shell::new(
        sender_to_shell,
        receiver_from_shell,
        params.driver,
        params.fast,
        device_addr.clone(),
    )?;

    let remaining = params.auth_timeout.saturating_sub(started.elapsed());
    match tokio::time::timeout(
        remaining,
        shell.login(&params.credentials.username, params.credentials.password()),
    )
    .await
    {
        Ok(Ok(_)) => {}
        Ok(Err(err)) => {
            disconnect(handle).await;
            return Err(err);
        }
        Err(_) => {
            disconnect(handle).await;
            return Err(ConnectError::AuthTimeout(format!(
                "{device_addr} waiting for initial prompt"
            )));
        }
    }
    debug!("{} initial prompt {:?}", device_addr, shell.current_prompt());

    Ok((handle, shell))
}

/// Sends an SSH disconnect and ignores any failure.
pub(super) async fn disconnect(handle: Handle<SshHandler>) {
    if let Err(e) = handle
        .disconnect(russh::Disconnect::ByApplication, "", "en")
        .await
    {
        debug!("ssh disconnect failed: {:?}", e);
    }
}
