// Copyright 2025 Selk S.L.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! IPC transport for the command surface, using parity-tokio-ipc and
//! MessagePack(-RPC style) framing.
//!
//! Requests carry `{method, arguments}`; replies are `true`, a
//! `{code, message}` error, or the not-implemented marker (error code
//! `NOT_IMPLEMENTED`). The event surface is not exposed here.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use log::{debug, error, info, warn};
use msgpack_rpc::{serve, Service, Value};
use parity_tokio_ipc::Endpoint;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinSet;
use tokio_util::compat::TokioAsyncReadCompatExt;

use crate::bridge::ScannerControl;
use crate::command::{dispatch_command, CommandReply};
use crate::definitions::ConfigOptions;

/// Wire code for the not-implemented reply; msgpack-rpc has no dedicated
/// marker, so it travels as an error value with this code.
pub const NOT_IMPLEMENTED_CODE: &str = "NOT_IMPLEMENTED";

/// Default endpoint resolver based on platform and optional
/// SCANBRIDGE_IPC_ENDPOINT override.
fn default_endpoint() -> String {
    if let Ok(override_ep) = std::env::var("SCANBRIDGE_IPC_ENDPOINT") {
        if !override_ep.trim().is_empty() {
            return override_ep;
        }
    }
    // Windows Named Pipe path or Unix Domain Socket path
    #[cfg(windows)]
    {
        r"\\.\pipe\scanbridge_v1".to_string()
    }
    #[cfg(unix)]
    {
        let base = std::env::var("XDG_RUNTIME_DIR").unwrap_or_else(|_| "/tmp".into());
        format!("{base}/scanbridge/scanbridge.sock")
    }
}

/// IPC server that exposes the scanner command surface over a local IPC
/// connection.
pub struct IpcServer {
    endpoint: String,
    bridge: Arc<dyn ScannerControl>,
}

impl IpcServer {
    /// Create a new IpcServer bound to the given bridge. Endpoint is taken
    /// from SCANBRIDGE_IPC_ENDPOINT or the platform default.
    pub fn new(bridge: Arc<dyn ScannerControl>) -> Self {
        Self {
            endpoint: default_endpoint(),
            bridge,
        }
    }

    /// Create with an explicit endpoint path (useful for tests).
    pub fn with_endpoint(bridge: Arc<dyn ScannerControl>, endpoint: String) -> Self {
        Self { endpoint, bridge }
    }

    /// Start serving and block until the accept loop terminates.
    pub async fn serve(&self) -> anyhow::Result<()> {
        let endpoint = &self.endpoint;
        info!("Scanner bridge IPC server listening on: {}", endpoint);

        #[cfg(unix)]
        {
            if let Some(parent) = std::path::Path::new(endpoint).parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            // Remove stale socket if any
            let _ = std::fs::remove_file(endpoint);
        }

        let mut incoming = Endpoint::new(endpoint.clone())
            .incoming()
            .map_err(|e| anyhow::anyhow!("Failed to start IPC endpoint: {e}"))?;

        let mut tasks = JoinSet::new();
        let bridge = self.bridge.clone();

        tokio::pin!(incoming);
        loop {
            match incoming.as_mut().next().await {
                Some(Ok(stream)) => {
                    let bridge = bridge.clone();
                    tasks.spawn(async move {
                        if let Err(e) = handle_connection(stream, bridge).await {
                            warn!("IPC connection handler ended with error: {e:?}");
                        }
                    });
                }
                Some(Err(e)) => {
                    error!("IPC accept failed: {}", e);
                    break;
                }
                None => {
                    // incoming stream ended
                    break;
                }
            }

            // Reap finished tasks to avoid memory growth
            while let Some(res) = tasks.try_join_next() {
                if let Err(e) = res {
                    warn!("IPC connection task panicked: {e:?}");
                }
            }
        }

        Ok(())
    }
}

/// Reads the first parameter as a string-keyed option map. Non-string scalar
/// values are stringified; anything else is skipped.
fn config_options_from_params(params: &[Value]) -> ConfigOptions {
    let mut options = ConfigOptions::new();
    if let Some(Value::Map(entries)) = params.first() {
        for (key, value) in entries {
            let Some(key) = key.as_str() else { continue };
            let value = match value.as_str() {
                Some(s) => s.to_string(),
                None => value.to_string(),
            };
            options.insert(key.to_string(), value);
        }
    }
    options
}

fn error_value(code: &str, message: String) -> Value {
    Value::Map(vec![
        (Value::from("code"), Value::from(code)),
        (Value::from("message"), Value::from(message)),
    ])
}

async fn handle_connection<S>(stream: S, bridge: Arc<dyn ScannerControl>) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    debug!("New IPC client connected");

    #[derive(Clone)]
    struct ScannerRpcService {
        bridge: Arc<dyn ScannerControl>,
    }

    impl Service for ScannerRpcService {
        type RequestFuture = Pin<Box<dyn Future<Output = Result<Value, Value>> + Send>>;

        fn handle_request(&mut self, method: &str, params: &[Value]) -> Self::RequestFuture {
            let bridge = self.bridge.clone();
            let method = method.to_string();
            let arguments = config_options_from_params(params);
            Box::pin(async move {
                match dispatch_command(bridge.as_ref(), &method, arguments).await {
                    CommandReply::Success(value) => Ok(Value::from(value)),
                    CommandReply::Error { code, message } => Err(error_value(&code, message)),
                    CommandReply::NotImplemented => Err(error_value(
                        NOT_IMPLEMENTED_CODE,
                        format!("unknown method: {method}"),
                    )),
                }
            })
        }

        fn handle_notification(&mut self, _method: &str, _params: &[Value]) {
            // The command channel is request/response only
        }
    }

    let service = ScannerRpcService { bridge };
    let mut compat_stream = stream.compat();
    serve(&mut compat_stream, service)
        .await
        .map_err(|e| anyhow::anyhow!("msgpack-rpc serve error: {}", e))
}
