pub mod config;
pub mod device;
pub mod server;

pub use device::{DeviceHandle, SimError, run_telemetry};
pub use server::{AppState, router, serve};
