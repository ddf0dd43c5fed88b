// REST client for the device command endpoints.
//
// Complements the real-time channel: commands are created and retried over
// HTTP, and their status can be re-read when the channel is down.

use std::sync::Arc;

use reqwest::header::AUTHORIZATION;
use secrecy::ExposeSecret;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::credentials::TokenStore;
use crate::error::Error;
use crate::models::{CommandCreateRequest, CommandStatus, ErrorResponse};
use crate::transport::TransportConfig;

/// Backend error code for an expired or revoked token.
const TOKEN_EXPIRED_CODE: &str = "A0301";

/// Async client for `/api/devices/{id}/commands`.
#[derive(Clone)]
pub struct CommandClient {
    http: reqwest::Client,
    base_url: Url,
    tokens: Arc<dyn TokenStore>,
}

impl CommandClient {
    /// Build a client with its own HTTP stack.
    pub fn new(
        base_url: &str,
        transport: &TransportConfig,
        tokens: Arc<dyn TokenStore>,
    ) -> Result<Self, Error> {
        Self::with_client(base_url, transport.build_client()?, tokens)
    }

    /// Wrap an existing `reqwest::Client`.
    pub fn with_client(
        base_url: &str,
        http: reqwest::Client,
        tokens: Arc<dyn TokenStore>,
    ) -> Result<Self, Error> {
        Ok(Self {
            http,
            base_url: Url::parse(base_url)?,
            tokens,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── Endpoints ────────────────────────────────────────────────────

    /// `POST /api/devices/{id}/commands`
    pub async fn send_command(
        &self,
        device_id: &str,
        request: &CommandCreateRequest,
    ) -> Result<CommandStatus, Error> {
        let url = self.commands_url(device_id, &[])?;
        self.post(url, Some(request)).await
    }

    /// `GET /api/devices/{id}/commands/{reqId}`
    pub async fn get_command(&self, device_id: &str, req_id: &str) -> Result<CommandStatus, Error> {
        let url = self.commands_url(device_id, &[req_id])?;
        self.get(url).await
    }

    /// `POST /api/devices/{id}/commands/{reqId}/retry`
    pub async fn retry_command(
        &self,
        device_id: &str,
        req_id: &str,
    ) -> Result<CommandStatus, Error> {
        let url = self.commands_url(device_id, &[req_id, "retry"])?;
        self.post(url, None::<&()>).await
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// `{base}/api/devices/{id}/commands[/{extra}...]`, each segment escaped.
    fn commands_url(&self, device_id: &str, extra: &[&str]) -> Result<Url, Error> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|()| {
                Error::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase)
            })?;
            segments
                .pop_if_empty()
                .extend(["api", "devices", device_id, "commands"])
                .extend(extra);
        }
        Ok(url)
    }

    // ── Request helpers ──────────────────────────────────────────────

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        debug!("GET {}", url);

        let resp = self
            .authorize(self.http.get(url))
            .send()
            .await
            .map_err(Error::Transport)?;

        self.handle_response(resp).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        url: Url,
        body: Option<&impl Serialize>,
    ) -> Result<T, Error> {
        debug!("POST {}", url);

        let mut req = self.authorize(self.http.post(url));
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await.map_err(Error::Transport)?;

        self.handle_response(resp).await
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.tokens.token() {
            Some(token) => req.header(AUTHORIZATION, format!("Bearer {}", token.expose_secret())),
            None => req,
        }
    }

    /// Decode a success body, or map the error body onto [`Error`].
    ///
    /// A 401 or an `A0301` code clears the stored token before returning
    /// [`Error::Unauthorized`].
    async fn handle_response<T: DeserializeOwned>(
        &self,
        resp: reqwest::Response,
    ) -> Result<T, Error> {
        let status = resp.status();
        let body = resp.text().await.map_err(Error::Transport)?;

        if status.is_success() {
            return serde_json::from_str(&body).map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body,
            });
        }

        let parsed = serde_json::from_str::<ErrorResponse>(&body).ok();
        let code = parsed.as_ref().map(|e| e.code.clone());
        let message = parsed.map_or_else(
            || {
                status
                    .canonical_reason()
                    .map_or_else(|| format!("HTTP {}", status.as_u16()), str::to_owned)
            },
            |e| e.message,
        );

        if status == reqwest::StatusCode::UNAUTHORIZED
            || code.as_deref() == Some(TOKEN_EXPIRED_CODE)
        {
            debug!(status = status.as_u16(), ?code, "token rejected, clearing");
            self.tokens.clear();
            return Err(Error::Unauthorized { message });
        }

        Err(Error::Api {
            status: status.as_u16(),
            code,
            message,
        })
    }
}

impl std::fmt::Debug for CommandClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}
