use std::{
    collections::HashMap,
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

/// Transport header carrying the redelivery counter.
pub const RETRY_COUNT_HEADER: &str = "x-retry-count";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Push,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Email, Channel::Push];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Push => "push",
        }
    }

    /// Routing key on the direct exchange.
    pub fn routing_key(&self) -> &'static str {
        self.as_str()
    }

    /// Service scope for consumer-side idempotency keys.
    pub fn service_name(&self) -> &'static str {
        match self {
            Channel::Email => "email_service",
            Channel::Push => "push_service",
        }
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(Channel::Email),
            "push" => Ok(Channel::Push),
            other => Err(format!("unknown channel '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRequest {
    #[serde(default)]
    pub request_id: Option<String>,
    pub user_id: String,
    #[serde(alias = "notification_type")]
    pub channel: Channel,
    pub template_code: String,

    #[serde(default)]
    pub variables: HashMap<String, String>,

    #[serde(default = "default_priority")]
    pub priority: i32,

    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

fn default_priority() -> i32 {
    5
}

/// Body of a broker message. The channel travels as the routing key and the
/// retry counter as the `x-retry-count` header, neither is part of the body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub request_id: String,
    pub user_id: String,
    pub template_code: String,

    #[serde(default)]
    pub variables: HashMap<String, String>,

    #[serde(default = "default_priority")]
    pub priority: i32,

    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl QueueMessage {
    pub fn from_request(request_id: String, request: &NotificationRequest) -> Self {
        Self {
            request_id,
            user_id: request.user_id.clone(),
            template_code: request.template_code.clone(),
            variables: request.variables.clone(),
            priority: request.priority,
            metadata: request.metadata.clone(),
        }
    }
}

/// A message as handed out by the broker to a consumer.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub delivery_tag: u64,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub retry_count: u32,
    pub redelivered: bool,
}

impl InboundMessage {
    pub fn new(body: Vec<u8>, retry_count: u32) -> Self {
        Self {
            delivery_tag: 0,
            routing_key: String::new(),
            body,
            retry_count,
            redelivered: false,
        }
    }
}
