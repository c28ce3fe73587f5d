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

use std::sync::{Arc, Mutex};

use log::{debug, trace, warn};
use tokio::sync::mpsc;

use crate::definitions::{ScanCode, SCAN_DATA_ACTION, SCAN_DATA_EXTRA, SCAN_TYPE_EXTRA};
use crate::service::{spawn_service, ServiceHandle};
use crate::signal_bus::{RegistrationId, Signal, SignalBus, SignalBusError};

/// Destination for decoded codes. The slot is shared with the bridge so a
/// replaced subscriber takes effect without re-registering on the bus.
pub type ScanSink = Arc<Mutex<Option<mpsc::UnboundedSender<ScanCode>>>>;

/// Handle for the scan watch task
pub struct ScanWatchHandle {
    inner: ServiceHandle,
    registration_id: RegistrationId,
}

impl ScanWatchHandle {
    /// Bus registration owned by the watch task.
    pub fn registration_id(&self) -> RegistrationId {
        self.registration_id
    }

    /// Stop the watch task. The bus registration is removed before this
    /// returns.
    pub async fn shutdown(self) -> Result<(), tokio::task::JoinError> {
        self.inner.shutdown().await
    }
}

/// Extracts a scan from a vendor signal. A signal without the data extra
/// yields nothing.
pub(crate) fn scan_code_from_signal(signal: &Signal) -> Option<ScanCode> {
    let data = signal.extra(SCAN_DATA_EXTRA)?;
    Some(ScanCode {
        data: data.to_string(),
        symbology: signal.extra(SCAN_TYPE_EXTRA).map(str::to_string),
    })
}

fn deliver(signal: &Signal, sink: &ScanSink) {
    let Some(code) = scan_code_from_signal(signal) else {
        // Firmware occasionally fires the action with no payload
        trace!("Scan signal without data extra dropped");
        return;
    };
    let sink = sink.lock().unwrap();
    if let Some(sender) = sink.as_ref() {
        if sender.send(code).is_err() {
            debug!("Scan subscriber is gone; code dropped");
        }
    }
}

/// Registers for the vendor scan broadcast and forwards decoded codes to the
/// current sink until shutdown is requested or the bus closes the stream.
///
/// The registration lives exactly as long as the task: every exit path
/// removes it, so no registration can outlive the returned handle.
pub fn run_scan_watch(
    bus: Arc<dyn SignalBus>,
    sink: ScanSink,
) -> Result<ScanWatchHandle, SignalBusError> {
    let mut registration = bus.register(SCAN_DATA_ACTION)?;
    let registration_id = registration.id;

    let inner = spawn_service(move |mut stop| async move {
        loop {
            tokio::select! {
                maybe_signal = registration.signals.recv() => {
                    match maybe_signal {
                        Some(signal) => deliver(&signal, &sink),
                        None => {
                            debug!("Scan signal stream ended");
                            break;
                        }
                    }
                }
                _ = stop.signaled() => {
                    debug!("Shutdown requested, stopping scan watch task");
                    break;
                }
            }
        }
        if let Err(e) = bus.unregister(registration_id) {
            warn!("Failed to remove scan registration: {}", e);
        }
    });

    Ok(ScanWatchHandle {
        inner,
        registration_id,
    })
}
