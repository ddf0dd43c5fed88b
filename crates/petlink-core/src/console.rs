// ── Device console ──
//
// Pairs the real-time channel with the REST command client: dispatch a
// command, then follow its status over the channel, falling back to REST
// polling while the channel is down.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use petlink_api::transport::{Connector, WsConnector};
use petlink_api::{CommandClient, SessionState, TokenStore};

use crate::channel::DeviceChannel;
use crate::config::ChannelConfig;
use crate::error::CoreError;
use crate::model::{CommandCreateRequest, CommandStatus, DeviceId};
use crate::poller::{DEFAULT_POLL_INTERVAL, Poller, Visibility};

/// REST commands plus the live channel for one backend.
pub struct DeviceConsole<C: Connector> {
    channel: DeviceChannel<C>,
    commands: CommandClient,
    poll_interval: Duration,
}

impl DeviceConsole<WsConnector> {
    /// Build both clients from `config`. Does NOT connect.
    pub fn new(config: &ChannelConfig, tokens: Arc<dyn TokenStore>) -> Result<Self, CoreError> {
        let commands = CommandClient::new(
            config.server.as_str(),
            &config.transport_config(),
            Arc::clone(&tokens),
        )?;
        let channel = DeviceChannel::from_config(config, tokens);
        Ok(Self::with_parts(channel, commands))
    }
}

impl<C: Connector> DeviceConsole<C> {
    pub fn with_parts(channel: DeviceChannel<C>, commands: CommandClient) -> Self {
        Self {
            channel,
            commands,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// REST polling period used while the channel is down.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn channel(&self) -> &DeviceChannel<C> {
        &self.channel
    }

    pub fn commands(&self) -> &CommandClient {
        &self.commands
    }

    // ── Commands ─────────────────────────────────────────────────

    pub async fn send_command(
        &self,
        device: &DeviceId,
        request: &CommandCreateRequest,
    ) -> Result<CommandStatus, CoreError> {
        Ok(self.commands.send_command(device.as_str(), request).await?)
    }

    pub async fn get_command(
        &self,
        device: &DeviceId,
        req_id: &str,
    ) -> Result<CommandStatus, CoreError> {
        Ok(self.commands.get_command(device.as_str(), req_id).await?)
    }

    pub async fn retry_command(
        &self,
        device: &DeviceId,
        req_id: &str,
    ) -> Result<CommandStatus, CoreError> {
        Ok(self.commands.retry_command(device.as_str(), req_id).await?)
    }

    /// Dispatch a command and wait up to `timeout` for a terminal status.
    ///
    /// Binds the channel to `device` first (if it is not already) so the
    /// acknowledgement cannot be missed.
    pub async fn send_and_wait(
        &self,
        device: &DeviceId,
        request: &CommandCreateRequest,
        timeout: Duration,
    ) -> Result<CommandStatus, CoreError> {
        if self.channel.current_device().as_ref() != Some(device) {
            self.channel.subscribe_device(device.clone());
        }
        self.channel.connect();

        let status = self.send_command(device, request).await?;
        info!(device = %device, req_id = %status.req_id, status = %status.status, "command accepted");
        if status.status.is_terminal() {
            return Ok(status);
        }
        self.wait_for_terminal(device, &status.req_id, timeout).await
    }

    /// Follow `req_id` until it reaches `ACKED`, `FAILED` or `TIMEOUT`.
    ///
    /// Watches the channel's command-status slot; whenever the channel is
    /// not connected, polls the REST endpoint instead. Each time the channel
    /// takes over, one REST check covers updates published before its
    /// subscription reached the broker.
    pub async fn wait_for_terminal(
        &self,
        device: &DeviceId,
        req_id: &str,
        timeout: Duration,
    ) -> Result<CommandStatus, CoreError> {
        let mut slot = self.channel.watch_command_status();
        if let Some(status) = matching_terminal(slot.latest().as_deref(), req_id) {
            return Ok(status);
        }

        let mut state = self.channel.connection_state();
        let initial = fallback_visibility(&state.borrow_and_update());
        let (visibility_tx, visibility_rx) = watch::channel(initial);

        let mut catch_up = JoinSet::new();
        if initial == Visibility::Hidden {
            catch_up.spawn(check_once(self.commands.clone(), device, req_id));
        }

        let (found_tx, mut found_rx) = mpsc::unbounded_channel();
        let commands = self.commands.clone();
        let device_id = device.as_str().to_owned();
        let req = req_id.to_owned();
        let _poller = Poller::spawn(self.poll_interval, visibility_rx, move || {
            let commands = commands.clone();
            let device_id = device_id.clone();
            let req = req.clone();
            let found = found_tx.clone();
            async move {
                let status = commands.get_command(&device_id, &req).await?;
                debug!(req_id = %req, status = %status.status, "polled command status");
                if status.status.is_terminal() {
                    let _ = found.send(status);
                }
                Ok::<_, petlink_api::Error>(())
            }
        });

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                () = &mut deadline => {
                    return Err(CoreError::Timeout {
                        operation: format!("waiting for command {req_id}"),
                        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    });
                }
                Some(latest) = slot.changed() => {
                    if let Some(status) = matching_terminal(latest.as_deref(), req_id) {
                        return Ok(status);
                    }
                }
                Ok(()) = state.changed() => {
                    let next = fallback_visibility(&state.borrow_and_update());
                    let previous = visibility_tx.send_replace(next);
                    if previous == Visibility::Visible && next == Visibility::Hidden {
                        catch_up.spawn(check_once(self.commands.clone(), device, req_id));
                    }
                }
                Some(status) = found_rx.recv() => return Ok(status),
                Some(checked) = catch_up.join_next() => {
                    if let Ok(Some(status)) = checked {
                        return Ok(status);
                    }
                }
            }
        }
    }
}

/// One REST lookup of `req_id`; `Some` only for a terminal status.
fn check_once(
    commands: CommandClient,
    device: &DeviceId,
    req_id: &str,
) -> impl Future<Output = Option<CommandStatus>> + Send + 'static {
    let device = device.as_str().to_owned();
    let req_id = req_id.to_owned();
    async move {
        match commands.get_command(&device, &req_id).await {
            Ok(status) if status.status.is_terminal() => Some(status),
            Ok(_) => None,
            Err(e) => {
                warn!(req_id = %req_id, error = %e, "command status check failed");
                None
            }
        }
    }
}

/// Poll over REST only while the channel cannot deliver updates.
fn fallback_visibility(state: &SessionState) -> Visibility {
    if *state == SessionState::Connected {
        Visibility::Hidden
    } else {
        Visibility::Visible
    }
}

fn matching_terminal(status: Option<&CommandStatus>, req_id: &str) -> Option<CommandStatus> {
    status
        .filter(|s| s.req_id == req_id && s.status.is_terminal())
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polls_only_while_channel_is_down() {
        assert_eq!(fallback_visibility(&SessionState::Connected), Visibility::Hidden);
        assert_eq!(fallback_visibility(&SessionState::Connecting), Visibility::Visible);
        assert_eq!(
            fallback_visibility(&SessionState::Reconnecting { attempt: 2 }),
            Visibility::Visible
        );
        assert_eq!(fallback_visibility(&SessionState::Failed), Visibility::Visible);
    }
}
