use crate::constants::endpoints::{
    MANAGEMENT_HOST, SEKIN_EXECUTE_PATH, SEKIN_STATUS_PATH, SHIDAI_DASHBOARD_PATH,
    SHIDAI_STATUS_PATH, SHIDAI_VALIDATOR_PATH,
};
use crate::constants::network::{
    SHIDAI_DEFAULT_PORT, TIMEOUT_COMMAND_MS, TIMEOUT_DASHBOARD_MS, TIMEOUT_STATUS_MS,
};
use crate::errors::KenshoError;
use crate::tunnel::{TunnelClient, TunnelConnection, TunnelEventStream};
use crate::utils::feature_flags::read_timeout_ms;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Per-call-class request timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub status: Duration,
    pub dashboard: Duration,
    pub command: Duration,
}

impl Timeouts {
    pub fn from_env() -> Self {
        Self {
            status: Duration::from_millis(read_timeout_ms(
                "KENSHO_TIMEOUT_STATUS_MS",
                TIMEOUT_STATUS_MS,
            )),
            dashboard: Duration::from_millis(read_timeout_ms(
                "KENSHO_TIMEOUT_DASHBOARD_MS",
                TIMEOUT_DASHBOARD_MS,
            )),
            command: Duration::from_millis(read_timeout_ms(
                "KENSHO_TIMEOUT_COMMAND_MS",
                TIMEOUT_COMMAND_MS,
            )),
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            status: Duration::from_millis(TIMEOUT_STATUS_MS),
            dashboard: Duration::from_millis(TIMEOUT_DASHBOARD_MS),
            command: Duration::from_millis(TIMEOUT_COMMAND_MS),
        }
    }
}

#[derive(Debug, Serialize)]
struct ExecuteRequest<'a> {
    command: &'a str,
    #[serde(skip_serializing_if = "Value::is_null")]
    args: Value,
}

/// Typed calls against the node's management service, reached through the tunnel.
#[derive(Clone)]
pub struct NodeApi {
    client: TunnelClient,
    tunnel: Arc<dyn TunnelConnection>,
    port: u16,
    timeouts: Timeouts,
}

impl NodeApi {
    pub fn new(
        client: TunnelClient,
        tunnel: Arc<dyn TunnelConnection>,
        port: u16,
    ) -> Result<Self, KenshoError> {
        if port == 0 {
            return Err(KenshoError::invalid_params(format!(
                "<{}> is not a valid management port",
                port
            )));
        }
        Ok(Self {
            client,
            tunnel,
            port,
            timeouts: Timeouts::from_env(),
        })
    }

    pub fn with_default_port(
        client: TunnelClient,
        tunnel: Arc<dyn TunnelConnection>,
    ) -> Result<Self, KenshoError> {
        Self::new(client, tunnel, SHIDAI_DEFAULT_PORT)
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}:{}{}", MANAGEMENT_HOST, self.port, path)
    }

    async fn get_json(&self, path: &str, timeout: Duration) -> Result<Value, KenshoError> {
        let url = self.url(path);
        let body = self
            .client
            .request(self.tunnel.clone(), &url, "GET", None, timeout)
            .await?;
        parse_json(&url, &body)
    }

    pub async fn status(&self) -> Result<Value, KenshoError> {
        self.get_json(SHIDAI_STATUS_PATH, self.timeouts.status).await
    }

    pub async fn validator(&self) -> Result<Value, KenshoError> {
        self.get_json(SHIDAI_VALIDATOR_PATH, self.timeouts.dashboard)
            .await
    }

    pub async fn dashboard(&self) -> Result<Value, KenshoError> {
        self.get_json(SHIDAI_DASHBOARD_PATH, self.timeouts.dashboard)
            .await
    }

    pub async fn sekin_status(&self) -> Result<Value, KenshoError> {
        self.get_json(SEKIN_STATUS_PATH, self.timeouts.status).await
    }

    /// Posts `{"command": .., "args": ..}` and returns the raw output. A null
    /// `args` is omitted from the payload.
    pub async fn execute(&self, command: &str, args: Value) -> Result<Vec<u8>, KenshoError> {
        let command = command.trim();
        if command.is_empty() {
            return Err(KenshoError::invalid_params("command must not be empty"));
        }
        let payload = serde_json::to_vec(&ExecuteRequest { command, args }).map_err(|err| {
            KenshoError::invalid_params(format!("Failed to encode command payload: {}", err))
        })?;
        self.client
            .request(
                self.tunnel.clone(),
                &self.url(SEKIN_EXECUTE_PATH),
                "POST",
                Some(payload),
                self.timeouts.command,
            )
            .await
    }

    pub async fn start(&self) -> Result<Vec<u8>, KenshoError> {
        self.execute("start", Value::Null).await
    }

    pub async fn stop(&self) -> Result<Vec<u8>, KenshoError> {
        self.execute("stop", Value::Null).await
    }

    /// Runs `sekaid` on the node. Each argument is passed through as one argv entry.
    pub async fn sekaid<S: AsRef<str>>(&self, args: &[S]) -> Result<Vec<u8>, KenshoError> {
        let exec: Vec<&str> = std::iter::once("sekaid")
            .chain(args.iter().map(|arg| arg.as_ref()))
            .collect();
        self.execute("sekaid", serde_json::json!({ "exec": exec }))
            .await
    }

    /// Opens a server-sent event feed at `path`.
    pub async fn events(&self, path: &str) -> Result<TunnelEventStream, KenshoError> {
        if !path.starts_with('/') {
            return Err(KenshoError::invalid_params(format!(
                "event path must start with '/': {}",
                path
            )));
        }
        self.client
            .open_stream(self.tunnel.clone(), &self.url(path), self.timeouts.dashboard)
            .await
    }
}

/// A 2xx body that is not JSON is corrupt data, not a remote status.
fn parse_json(url: &str, body: &[u8]) -> Result<Value, KenshoError> {
    serde_json::from_slice(body).map_err(|err| {
        KenshoError::corrupt_data(format!("Invalid JSON from <{}>: {}", url, err))
    })
}
