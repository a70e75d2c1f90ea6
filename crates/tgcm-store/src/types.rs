use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tgcm_common::{
    error::{Result, TgcmError},
    types::{ContactId, Recipient, TagId, TelegramId},
};

pub const MAX_TAG_NAME_CHARS: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub telegram_id: TelegramId,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    pub display_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub tag_ids: BTreeSet<TagId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    pub fn recipient(&self) -> Recipient {
        Recipient {
            contact_id: self.id,
            telegram_id: self.telegram_id,
            display_name: self.display_name.clone(),
        }
    }

    fn searchable_fields(&self) -> impl Iterator<Item = &str> {
        [
            self.username.as_deref(),
            self.first_name.as_deref(),
            self.last_name.as_deref(),
            Some(self.display_name.as_str()),
            self.phone.as_deref(),
            self.bio.as_deref(),
        ]
        .into_iter()
        .flatten()
    }

    pub fn matches(&self, needle_lowercase: &str) -> bool {
        self.searchable_fields()
            .any(|field| field.to_lowercase().contains(needle_lowercase))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TagSummary {
    #[serde(flatten)]
    pub tag: Tag,
    pub contact_count: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewContact {
    pub telegram_id: TelegramId,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
}

impl NewContact {
    pub fn validate(&self) -> Result<()> {
        if self.telegram_id <= 0 {
            return Err(TgcmError::validation(
                "telegram_id must be a positive integer",
            ));
        }
        Ok(())
    }

    /// Display name used when the caller did not supply one: full name, then
    /// username, then a placeholder built from the Telegram id.
    pub fn resolved_display_name(&self) -> String {
        if let Some(name) = non_blank(self.display_name.as_deref()) {
            return name.to_string();
        }

        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .filter_map(non_blank)
            .collect();
        if !parts.is_empty() {
            return parts.join(" ");
        }

        match non_blank(self.username.as_deref()) {
            Some(username) => username.to_string(),
            None => format!("User {}", self.telegram_id),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContactUpdate {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
}

impl ContactUpdate {
    pub fn validate(&self) -> Result<()> {
        if self
            .display_name
            .as_deref()
            .is_some_and(|name| name.trim().is_empty())
        {
            return Err(TgcmError::validation("display_name cannot be blank"));
        }
        Ok(())
    }

    pub fn apply(self, contact: &mut Contact) {
        if let Some(username) = self.username {
            contact.username = Some(username);
        }
        if let Some(first_name) = self.first_name {
            contact.first_name = Some(first_name);
        }
        if let Some(last_name) = self.last_name {
            contact.last_name = Some(last_name);
        }
        if let Some(display_name) = self.display_name {
            contact.display_name = display_name.trim().to_string();
        }
        if let Some(phone) = self.phone {
            contact.phone = Some(phone);
        }
        if let Some(bio) = self.bio {
            contact.bio = Some(bio);
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTag {
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TagUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

pub fn normalize_tag_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(TgcmError::validation(
            "tag name cannot be empty or only whitespace",
        ));
    }
    if name.chars().count() > MAX_TAG_NAME_CHARS {
        return Err(TgcmError::validation(format!(
            "tag name must be at most {MAX_TAG_NAME_CHARS} characters"
        )));
    }
    Ok(name.to_string())
}

/// Accepts `#RRGGBB` and returns it upper-cased.
pub fn normalize_color(color: &str) -> Result<String> {
    let color = color.trim();
    let valid = color
        .strip_prefix('#')
        .is_some_and(|hex| hex.len() == 6 && hex.chars().all(|ch| ch.is_ascii_hexdigit()));
    if !valid {
        return Err(TgcmError::validation(
            "color must be a valid hex color code (e.g. #FF5733)",
        ));
    }
    Ok(color.to_ascii_uppercase())
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
