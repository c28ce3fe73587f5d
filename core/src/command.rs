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

use log::debug;

use crate::bridge::ScannerControl;
use crate::definitions::ConfigOptions;

/// Outcome of one command-channel request.
///
/// `NotImplemented` is distinct from both success and error: the method name
/// is unknown to this bridge version, as opposed to a recognized method that
/// ran or failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReply {
    Success(bool),
    Error { code: String, message: String },
    NotImplemented,
}

/// Dispatch a named command to the bridge and fold its result into a reply.
///
/// Every bridge failure is recovered here into a structured error; nothing
/// propagates past the command boundary. Arguments are only meaningful to
/// `configure` and are ignored by the other methods.
pub async fn dispatch_command(
    bridge: &dyn ScannerControl,
    method: &str,
    arguments: ConfigOptions,
) -> CommandReply {
    debug!("Command received: {}", method);
    let result = match method {
        "initialize" => bridge.initialize().await,
        "startScan" => bridge.start_scan().await,
        "stopScan" => bridge.stop_scan().await,
        "configure" => bridge.configure(arguments).await,
        _ => return CommandReply::NotImplemented,
    };
    match result {
        Ok(value) => CommandReply::Success(value),
        Err(e) => CommandReply::Error {
            code: e.code().to_string(),
            message: e.to_string(),
        },
    }
}
