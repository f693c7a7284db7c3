use serde::Serialize;

/// SendGrid v3 `mail/send` payload.
#[derive(Debug, Clone, Serialize)]
pub struct SendGridMail {
    pub personalizations: Vec<SendGridPersonalization>,
    pub from: SendGridAddress,
    pub subject: String,
    pub content: Vec<SendGridContent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendGridPersonalization {
    pub to: Vec<SendGridAddress>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendGridAddress {
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendGridContent {
    #[serde(rename = "type")]
    pub content_type: String,
    pub value: String,
}

impl SendGridMail {
    pub fn html(from: &str, to: &str, subject: &str, body: &str) -> Self {
        Self {
            personalizations: vec![SendGridPersonalization {
                to: vec![SendGridAddress {
                    email: to.to_string(),
                }],
            }],
            from: SendGridAddress {
                email: from.to_string(),
            },
            subject: subject.to_string(),
            content: vec![SendGridContent {
                content_type: "text/html".to_string(),
                value: body.to_string(),
            }],
        }
    }
}
