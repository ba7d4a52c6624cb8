pub const TOPIC_SENSOR_TEMP: &str = "sensor/temperature";
pub const TOPIC_SENSOR_HUMIDITY: &str = "sensor/humidity";

pub const TOPIC_WINDOW_ACTION_PREFIX: &str = "velux/action";
pub const TOPIC_WINDOW_PERCENT_PREFIX: &str = "velux/percent";
pub const TOPIC_WINDOW_STATE_PREFIX: &str = "velux/state";

pub const PAYLOAD_OPEN: &str = "ON";
pub const PAYLOAD_CLOSED: &str = "OFF";

pub fn action_topic(id: usize) -> String {
    format!("{TOPIC_WINDOW_ACTION_PREFIX}{id}")
}

pub fn percent_topic(id: usize) -> String {
    format!("{TOPIC_WINDOW_PERCENT_PREFIX}{id}")
}

pub fn state_topic(id: usize) -> String {
    format!("{TOPIC_WINDOW_STATE_PREFIX}{id}")
}

/// Every command topic, alias included.
pub fn action_topics(window_count: usize) -> Vec<String> {
    (0..window_count).map(action_topic).collect()
}

/// Raw numeric suffix of a command topic, or `None` for foreign topics.
pub fn action_topic_suffix(topic: &str) -> Option<&str> {
    topic.strip_prefix(TOPIC_WINDOW_ACTION_PREFIX)
}
