use std::sync::Arc;

use scanbridge_core::ipc::IpcServer;
use scanbridge_core::{LoopbackSignalBus, ScannerBridge, ScannerControl};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let bus = Arc::new(LoopbackSignalBus::new());
    let bridge = Arc::new(ScannerBridge::new(bus));
    let control: Arc<dyn ScannerControl> = bridge.clone();
    let server = IpcServer::new(control);

    tokio::select! {
        res = server.serve() => res?,
        _ = tokio::signal::ctrl_c() => {}
    }

    bridge.detach().await;
    println!("Exiting...");
    Ok(())
}
