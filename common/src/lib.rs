pub mod am2320;
pub mod config;
pub mod connectivity;
pub mod position;
pub mod remote;
pub mod topics;
pub mod types;
pub mod windows;

pub use config::{ConnectivityConfig, NetworkConfig, RemoteConfig, ReporterConfig, RuntimeConfig};
pub use connectivity::{RetryBudget, RetryDecision};
pub use position::{NotSelectable, PositionTracker, SelectDirection, SelectionPlan};
pub use remote::{RemoteAction, RemoteButton};
pub use topics::*;
pub use types::{
    ConnectionState, SensorReading, WindowCommand, WindowId, WindowIdError, WindowStatePayload,
};
pub use windows::WindowStates;
