use serde::{Deserialize, Serialize};

use crate::models::message::Channel;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub push_token: Option<String>,

    #[serde(default = "enabled")]
    pub email_enabled: bool,

    #[serde(default = "enabled")]
    pub push_enabled: bool,
}

fn enabled() -> bool {
    true
}

impl UserProfile {
    pub fn accepts(&self, channel: Channel) -> bool {
        match channel {
            Channel::Email => self.email_enabled,
            Channel::Push => self.push_enabled,
        }
    }

    /// Address the channel delivers to, if the user has one.
    pub fn recipient(&self, channel: Channel) -> Option<&str> {
        let value = match channel {
            Channel::Email => self.email.as_deref(),
            Channel::Push => self.push_token.as_deref(),
        };
        value.filter(|v| !v.is_empty())
    }
}
