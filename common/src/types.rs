use thiserror::Error;

use crate::topics::{action_topic_suffix, PAYLOAD_CLOSED, PAYLOAD_OPEN};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowIdError {
    #[error("topic `{0}` is not a window command topic")]
    ForeignTopic(String),
    #[error("window id suffix `{0}` is not a number")]
    InvalidSuffix(String),
    #[error("window id {index} outside 0..{window_count}")]
    OutOfRange { index: usize, window_count: usize },
}

/// Index of a cover on the remote. The last id is the "all covers" alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WindowId(usize);

impl WindowId {
    pub fn new(index: usize, window_count: usize) -> Result<Self, WindowIdError> {
        if index >= window_count {
            return Err(WindowIdError::OutOfRange {
                index,
                window_count,
            });
        }
        Ok(Self(index))
    }

    pub fn alias(window_count: usize) -> Self {
        Self(window_count.saturating_sub(1))
    }

    pub fn from_topic(topic: &str, window_count: usize) -> Result<Self, WindowIdError> {
        let suffix =
            action_topic_suffix(topic).ok_or_else(|| WindowIdError::ForeignTopic(topic.into()))?;
        let index = suffix
            .parse::<usize>()
            .map_err(|_| WindowIdError::InvalidSuffix(suffix.into()))?;
        Self::new(index, window_count)
    }

    pub fn index(self) -> usize {
        self.0
    }

    pub fn is_alias(self, window_count: usize) -> bool {
        self.0 + 1 == window_count
    }
}

impl std::fmt::Display for WindowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowCommand {
    Open,
    Close,
}

impl WindowCommand {
    /// Anything other than the open sentinel, malformed bytes included, closes.
    pub fn from_payload(payload: &[u8]) -> Self {
        if payload == PAYLOAD_OPEN.as_bytes() {
            Self::Open
        } else {
            Self::Close
        }
    }

    pub fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Close => "CLOSE",
        }
    }
}

/// Published representation of a commanded window state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowStatePayload {
    pub percent: &'static str,
    pub state: &'static str,
}

impl WindowStatePayload {
    pub fn for_open(open: bool) -> Self {
        if open {
            Self {
                percent: "100",
                state: PAYLOAD_OPEN,
            }
        } else {
            Self {
                percent: "0",
                state: PAYLOAD_CLOSED,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Last climate sample. `valid` drops on a failed read while the values keep
/// the previous successful pair.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SensorReading {
    pub temperature_c: f32,
    pub humidity_pct: f32,
    pub valid: bool,
}

impl SensorReading {
    pub fn record_success(&mut self, temperature_c: f32, humidity_pct: f32) {
        self.temperature_c = temperature_c;
        self.humidity_pct = humidity_pct;
        self.valid = true;
    }

    pub fn record_failure(&mut self) {
        self.valid = false;
    }
}
