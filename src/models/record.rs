use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{message::Channel, status::NotificationStatus};

/// Source-of-truth row for one notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: String,
    pub user_id: String,
    pub channel: Channel,
    pub template_code: String,
    pub priority: i32,
    pub status: NotificationStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationRecord {
    pub fn pending(
        id: String,
        user_id: String,
        channel: Channel,
        template_code: String,
        priority: i32,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id,
            channel,
            template_code,
            priority,
            status: NotificationStatus::Pending,
            error: None,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }
}
