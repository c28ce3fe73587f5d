mod server;

pub use server::IpcServer;
