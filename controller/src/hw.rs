//! Seams between the device runtime and the platform it runs on.

use std::future::Future;

use thiserror::Error;
use velux_common::RemoteButton;

#[derive(Debug, Error)]
#[error("failed to drive {button:?} contact: {reason}")]
pub struct RemoteError {
    pub button: RemoteButton,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("broker session is down")]
    NotConnected,
    #[error("publish to `{topic}` rejected: {reason}")]
    Rejected { topic: String, reason: String },
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("broker refused the session: {0}")]
    Refused(String),
    #[error("broker session dropped: {0}")]
    Dropped(String),
    #[error("subscribe to `{topic}` failed: {reason}")]
    Subscribe { topic: String, reason: String },
}

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("network did not come up within {0} ms")]
    Timeout(u64),
    #[error("network association failed: {0}")]
    Association(String),
}

#[derive(Debug, Error)]
#[error("climate sensor read failed: {0}")]
pub struct SensorError(pub String);

/// Digital outputs bridged onto the remote's contacts.
pub trait RemoteOutputs: Send + 'static {
    fn set_level(&mut self, button: RemoteButton, high: bool) -> Result<(), RemoteError>;
}

/// Fire-and-forget publishing onto the broker session.
pub trait StatePublisher: Send + Sync + 'static {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError>;
}

pub trait ClimateSensor: Send + 'static {
    /// Returns `(temperature °C, relative humidity %)`.
    fn read(&mut self) -> Result<(f32, f32), SensorError>;
}

/// Station link: association, addressing and a trustworthy wall clock.
pub trait NetworkLink: Send + 'static {
    fn connect(&mut self) -> impl Future<Output = Result<(), NetworkError>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Broker session transport driven by the connectivity supervisor.
pub trait BrokerLink: Send + 'static {
    /// Runs one connect handshake under the device's fixed session identity.
    fn connect(&mut self) -> impl Future<Output = Result<(), LinkError>> + Send;

    /// Subscriptions do not survive a reconnect; called after every `connect`.
    fn subscribe(&mut self, topics: &[String]) -> Result<(), LinkError>;

    /// Waits for the next inbound publish. An error means the session is gone.
    fn next_message(&mut self) -> impl Future<Output = Result<InboundMessage, LinkError>> + Send;
}
