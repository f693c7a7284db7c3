use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{error::NotificationError, models::message::Channel};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub code: String,

    #[serde(alias = "subject")]
    pub subject_template: String,

    #[serde(alias = "body")]
    pub body_template: String,

    #[serde(alias = "notification_type")]
    pub channel: Channel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedTemplate {
    pub subject: String,
    pub body: String,
}

impl Template {
    /// Substitutes `{{name}}` placeholders. A placeholder with no matching
    /// variable is reported as missing.
    pub fn render(
        &self,
        variables: &HashMap<String, String>,
    ) -> Result<RenderedTemplate, NotificationError> {
        Ok(RenderedTemplate {
            subject: replace_variables(&self.subject_template, variables)?,
            body: replace_variables(&self.body_template, variables)?,
        })
    }
}

fn replace_variables(
    template: &str,
    variables: &HashMap<String, String>,
) -> Result<String, NotificationError> {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;

    // Single left-to-right pass: substituted values are never scanned again.
    while let Some(open) = rest.find("{{") {
        let Some(close) = rest[open + 2..].find("}}") else {
            break;
        };

        let name = rest[open + 2..open + 2 + close].trim();
        let value = variables.get(name).ok_or_else(|| {
            NotificationError::validation(format!("missing template variable: {}", name))
        })?;

        result.push_str(&rest[..open]);
        result.push_str(value);
        rest = &rest[open + 2 + close + 2..];
    }

    result.push_str(rest);
    Ok(result)
}
