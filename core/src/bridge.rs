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

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::definitions::{ConfigOptions, ScanCode, START_SCAN_ACTION, STOP_SCAN_ACTION};
use crate::errors::BridgeError;
use crate::scan_watch::{run_scan_watch, ScanSink, ScanWatchHandle};
use crate::signal_bus::{Signal, SignalBus, SignalBusError};

/// Live sequence of decoded codes handed to the active subscriber.
pub type ScanListener = mpsc::UnboundedReceiver<ScanCode>;

/// Abstraction over scanner bridge functionality that can be backed by the
/// in-process implementation or a remote one behind the IPC surface.
#[async_trait]
pub trait ScannerControl: Send + Sync {
    /// Reachability probe. Performs no action and always succeeds.
    async fn initialize(&self) -> Result<bool, BridgeError>;

    /// Fire the "start scanning" broadcast. Not idempotency-checked: two
    /// calls broadcast twice.
    async fn start_scan(&self) -> Result<bool, BridgeError>;

    /// Fire the "stop scanning" broadcast.
    async fn stop_scan(&self) -> Result<bool, BridgeError>;

    /// Accept configuration options. No option is applied yet; the contract
    /// promises acceptance so callers can ship options ahead of firmware
    /// support.
    async fn configure(&self, options: ConfigOptions) -> Result<bool, BridgeError>;

    /// Begin delivering scans and return the subscriber's listener.
    ///
    /// Single-subscriber surface: a second listen while one is active
    /// replaces the sink without adding a bus registration, so only the most
    /// recent subscriber receives codes.
    async fn listen(&self) -> Result<ScanListener, SignalBusError>;

    /// Stop delivering scans and drop the bus registration. A no-op when no
    /// subscription is active.
    async fn cancel(&self);
}

/// In-process scanner bridge bound to a system signal bus.
///
/// Idle/Listening state is the presence of the watch handle: holding one
/// means exactly one bus registration exists for the scan broadcast.
pub struct ScannerBridge {
    bus: Arc<dyn SignalBus>,
    sink: ScanSink,
    watch: Mutex<Option<ScanWatchHandle>>,
}

impl ScannerBridge {
    pub fn new(bus: Arc<dyn SignalBus>) -> Self {
        Self {
            bus,
            sink: Arc::new(Mutex::new(None)),
            watch: Mutex::new(None),
        }
    }

    /// Tear the bridge down before it goes away. Any active subscription is
    /// cancelled; no bus registration survives this call.
    pub async fn detach(&self) {
        self.cancel().await;
        info!("Scanner bridge detached");
    }
}

#[async_trait]
impl ScannerControl for ScannerBridge {
    async fn initialize(&self) -> Result<bool, BridgeError> {
        Ok(true)
    }

    async fn start_scan(&self) -> Result<bool, BridgeError> {
        self.bus
            .broadcast(Signal::new(START_SCAN_ACTION))
            .map_err(|e| BridgeError::StartScan(e.to_string()))?;
        debug!("Start scan signal broadcast");
        Ok(true)
    }

    async fn stop_scan(&self) -> Result<bool, BridgeError> {
        self.bus
            .broadcast(Signal::new(STOP_SCAN_ACTION))
            .map_err(|e| BridgeError::StopScan(e.to_string()))?;
        debug!("Stop scan signal broadcast");
        Ok(true)
    }

    async fn configure(&self, options: ConfigOptions) -> Result<bool, BridgeError> {
        // Accepted but not applied; option-to-firmware mapping does not
        // exist yet
        debug!("Scanner configuration accepted: {} option(s)", options.len());
        Ok(true)
    }

    async fn listen(&self) -> Result<ScanListener, SignalBusError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        {
            let mut sink = self.sink.lock().unwrap();
            if sink.replace(sender).is_some() {
                debug!("Scan subscriber replaced");
            }
        }
        {
            let mut watch = self.watch.lock().unwrap();
            if watch.is_none() {
                *watch = Some(run_scan_watch(self.bus.clone(), self.sink.clone())?);
                debug!("Scan listener registered");
            }
        }
        Ok(receiver)
    }

    async fn cancel(&self) {
        let handle = self.watch.lock().unwrap().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.shutdown().await {
                warn!("Scan watch task ended abnormally: {}", e);
            }
            debug!("Scan listener removed");
        }
        *self.sink.lock().unwrap() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::{SCAN_DATA_ACTION, SCAN_DATA_EXTRA, SCAN_TYPE_EXTRA};
    use crate::signal_bus::{RegistrationId, SignalRegistration};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use uuid::Uuid;

    /// Test double recording broadcasts and registration lifecycle calls.
    struct MockBus {
        broadcasts: Mutex<Vec<Signal>>,
        active: Mutex<HashMap<RegistrationId, (String, mpsc::UnboundedSender<Signal>)>>,
        register_calls: AtomicUsize,
        unregister_calls: AtomicUsize,
        reject_broadcasts: AtomicBool,
    }

    impl MockBus {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                broadcasts: Mutex::new(Vec::new()),
                active: Mutex::new(HashMap::new()),
                register_calls: AtomicUsize::new(0),
                unregister_calls: AtomicUsize::new(0),
                reject_broadcasts: AtomicBool::new(false),
            })
        }

        fn take_broadcasts(&self) -> Vec<Signal> {
            std::mem::take(&mut self.broadcasts.lock().unwrap())
        }

        fn active_registrations(&self) -> usize {
            self.active.lock().unwrap().len()
        }

        fn reject_broadcasts(&self) {
            self.reject_broadcasts.store(true, Ordering::SeqCst);
        }

        /// Simulate the scanner firmware firing a broadcast.
        fn emit(&self, signal: Signal) {
            for (action, sender) in self.active.lock().unwrap().values() {
                if *action == signal.action {
                    let _ = sender.send(signal.clone());
                }
            }
        }
    }

    impl SignalBus for MockBus {
        fn broadcast(&self, signal: Signal) -> Result<(), SignalBusError> {
            if self.reject_broadcasts.load(Ordering::SeqCst) {
                return Err(SignalBusError::Rejected("scanner service unavailable".into()));
            }
            self.broadcasts.lock().unwrap().push(signal);
            Ok(())
        }

        fn register(&self, action: &str) -> Result<SignalRegistration, SignalBusError> {
            self.register_calls.fetch_add(1, Ordering::SeqCst);
            let id = Uuid::new_v4();
            let (sender, receiver) = mpsc::unbounded_channel();
            self.active
                .lock()
                .unwrap()
                .insert(id, (action.to_string(), sender));
            Ok(SignalRegistration {
                id,
                signals: receiver,
            })
        }

        fn unregister(&self, id: RegistrationId) -> Result<(), SignalBusError> {
            self.unregister_calls.fetch_add(1, Ordering::SeqCst);
            self.active
                .lock()
                .unwrap()
                .remove(&id)
                .map(|_| ())
                .ok_or(SignalBusError::RegistrationNotFound(id))
        }
    }

    fn scan_signal(data: Option<&str>) -> Signal {
        let mut signal = Signal::new(SCAN_DATA_ACTION).with_extra(SCAN_TYPE_EXTRA, "CODE128");
        if let Some(data) = data {
            signal = signal.with_extra(SCAN_DATA_EXTRA, data);
        }
        signal
    }

    #[tokio::test]
    async fn initialize_always_succeeds() {
        let bus = MockBus::new();
        let bridge = ScannerBridge::new(bus.clone());

        assert_eq!(bridge.initialize().await.unwrap(), true);

        // Still true after state changes
        let _listener = bridge.listen().await.unwrap();
        assert_eq!(bridge.initialize().await.unwrap(), true);
        bridge.detach().await;
    }

    #[tokio::test]
    async fn start_scan_broadcasts_one_signal_without_payload() {
        let bus = MockBus::new();
        let bridge = ScannerBridge::new(bus.clone());

        assert_eq!(bridge.start_scan().await.unwrap(), true);

        let broadcasts = bus.take_broadcasts();
        assert_eq!(broadcasts.len(), 1);
        assert_eq!(broadcasts[0].action, START_SCAN_ACTION);
        assert!(broadcasts[0].extras.is_empty());
    }

    #[tokio::test]
    async fn stop_scan_broadcasts_one_signal_without_payload() {
        let bus = MockBus::new();
        let bridge = ScannerBridge::new(bus.clone());

        assert_eq!(bridge.stop_scan().await.unwrap(), true);

        let broadcasts = bus.take_broadcasts();
        assert_eq!(broadcasts.len(), 1);
        assert_eq!(broadcasts[0].action, STOP_SCAN_ACTION);
        assert!(broadcasts[0].extras.is_empty());
    }

    #[tokio::test]
    async fn start_scan_is_not_deduplicated() {
        let bus = MockBus::new();
        let bridge = ScannerBridge::new(bus.clone());

        bridge.start_scan().await.unwrap();
        bridge.start_scan().await.unwrap();

        assert_eq!(bus.take_broadcasts().len(), 2);
    }

    #[tokio::test]
    async fn rejected_start_maps_to_start_scan_error() {
        let bus = MockBus::new();
        bus.reject_broadcasts();
        let bridge = ScannerBridge::new(bus.clone());

        let err = bridge.start_scan().await.unwrap_err();
        assert_eq!(err.code(), "START_SCAN_ERROR");
        assert!(err.to_string().contains("scanner service unavailable"));

        let err = bridge.stop_scan().await.unwrap_err();
        assert_eq!(err.code(), "STOP_SCAN_ERROR");
    }

    #[tokio::test]
    async fn configure_accepts_arbitrary_options() {
        let bus = MockBus::new();
        let bridge = ScannerBridge::new(bus.clone());

        let mut options = ConfigOptions::new();
        options.insert("trigger_mode".into(), "continuous".into());
        options.insert("beep".into(), "false".into());

        assert_eq!(bridge.configure(options).await.unwrap(), true);
        // No configuration signal goes out
        assert!(bus.take_broadcasts().is_empty());
    }

    #[tokio::test]
    async fn listen_delivers_scan_data() {
        let bus = MockBus::new();
        let bridge = ScannerBridge::new(bus.clone());

        let mut listener = bridge.listen().await.unwrap();
        bus.emit(scan_signal(Some("ABC123")));

        let code = listener.recv().await.unwrap();
        assert_eq!(code.data, "ABC123");
        assert_eq!(code.symbology.as_deref(), Some("CODE128"));
        bridge.detach().await;
    }

    #[tokio::test]
    async fn signal_without_data_delivers_nothing() {
        let bus = MockBus::new();
        let bridge = ScannerBridge::new(bus.clone());

        let mut listener = bridge.listen().await.unwrap();
        bus.emit(scan_signal(None));
        // A follow-up valid scan proves the empty one was dropped, not queued
        bus.emit(scan_signal(Some("XYZ789")));

        let code = listener.recv().await.unwrap();
        assert_eq!(code.data, "XYZ789");
        bridge.detach().await;
    }

    #[tokio::test]
    async fn cancel_deregisters_listener() {
        let bus = MockBus::new();
        let bridge = ScannerBridge::new(bus.clone());

        let mut listener = bridge.listen().await.unwrap();
        assert_eq!(bus.active_registrations(), 1);

        bridge.cancel().await;
        assert_eq!(bus.active_registrations(), 0);
        assert_eq!(bus.unregister_calls.load(Ordering::SeqCst), 1);

        // Firmware keeps scanning; nothing reaches the cancelled subscriber
        bus.emit(scan_signal(Some("ABC123")));
        assert_eq!(listener.recv().await, None);
    }

    #[tokio::test]
    async fn relisten_after_cancel_resumes_delivery() {
        let bus = MockBus::new();
        let bridge = ScannerBridge::new(bus.clone());

        let _first = bridge.listen().await.unwrap();
        bridge.cancel().await;

        let mut second = bridge.listen().await.unwrap();
        assert_eq!(bus.register_calls.load(Ordering::SeqCst), 2);
        assert_eq!(bus.active_registrations(), 1);

        bus.emit(scan_signal(Some("ABC123")));
        assert_eq!(second.recv().await.unwrap().data, "ABC123");
        bridge.detach().await;
    }

    #[tokio::test]
    async fn second_listen_replaces_sink_without_new_registration() {
        let bus = MockBus::new();
        let bridge = ScannerBridge::new(bus.clone());

        let mut first = bridge.listen().await.unwrap();
        let mut second = bridge.listen().await.unwrap();
        assert_eq!(bus.register_calls.load(Ordering::SeqCst), 1);

        bus.emit(scan_signal(Some("ABC123")));
        assert_eq!(second.recv().await.unwrap().data, "ABC123");
        // The first subscriber's stream ended when its sink was replaced
        assert_eq!(first.recv().await, None);
        bridge.detach().await;
    }

    #[tokio::test]
    async fn detach_while_listening_leaves_no_registration() {
        let bus = MockBus::new();
        let bridge = ScannerBridge::new(bus.clone());

        let _listener = bridge.listen().await.unwrap();
        assert_eq!(bus.active_registrations(), 1);

        bridge.detach().await;
        assert_eq!(bus.active_registrations(), 0);
    }

    #[tokio::test]
    async fn detach_while_idle_is_a_no_op() {
        let bus = MockBus::new();
        let bridge = ScannerBridge::new(bus.clone());

        bridge.detach().await;
        assert_eq!(bus.active_registrations(), 0);
        assert_eq!(bus.unregister_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn events_before_listen_are_lost() {
        let bus = MockBus::new();
        let bridge = ScannerBridge::new(bus.clone());

        // Idle: no registration exists, so the emission is observed by no one
        bus.emit(scan_signal(Some("EARLY")));
        assert_eq!(bus.active_registrations(), 0);

        let mut listener = bridge.listen().await.unwrap();
        bus.emit(scan_signal(Some("LATE")));
        assert_eq!(listener.recv().await.unwrap().data, "LATE");
        bridge.detach().await;
    }
}
