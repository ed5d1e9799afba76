use std::env;

#[derive(Debug, Clone)]
pub struct NotificationConfig {
    /// Topic install progress is published to
    pub topic: String,
    /// Per-topic buffer; slow observers skip messages beyond this
    pub capacity: usize,
}

impl NotificationConfig {
    pub fn from_env() -> Self {
        Self {
            topic: env::var("APPSTORE_NOTIFICATION_TOPIC")
                .unwrap_or_else(|_| "notifications".to_string()),
            capacity: env::var("APPSTORE_NOTIFICATION_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(64),
        }
    }
}
