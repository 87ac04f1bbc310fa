use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use redb::TableDefinition;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ordering::Ordered;
use super::tables::{FILES, IMAGES, TEXTS, VIDEOS};

// ============================================================================
// Accounts
// ============================================================================

/// An account able to sign in. Instructors are users holding course permissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: u64,
    pub username: String,
    pub password_hash: String,
    pub is_active: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
    /// Permission codenames such as `courses.add_course`.
    #[serde(default)]
    pub permissions: BTreeSet<String>,
    pub date_joined: DateTime<Utc>,
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
}

impl UserRecord {
    /// Inactive users hold no permissions; superusers hold all of them.
    pub fn has_perm(&self, perm: &str) -> bool {
        self.is_active && (self.is_superuser || self.permissions.contains(perm))
    }
}

/// A login session, keyed by the digest of its bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub user_id: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

// ============================================================================
// Catalog
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub id: u64,
    pub title: String,
    pub slug: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: u64,
    pub owner_id: u64,
    pub subject_id: u64,
    pub title: String,
    pub slug: String,
    pub overview: String,
    pub created_at: DateTime<Utc>,
}

/// Validated course input, shared by the instructor views and the admin.
#[derive(Debug, Clone, PartialEq)]
pub struct CourseFields {
    pub owner_id: u64,
    pub subject_id: u64,
    pub title: String,
    pub slug: String,
    pub overview: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub id: u64,
    pub course_id: u64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub order: Option<u32>,
}

impl Ordered for Module {
    fn scope_id(&self) -> u64 {
        self.course_id
    }

    fn order(&self) -> Option<u32> {
        self.order
    }

    fn set_order(&mut self, order: u32) {
        self.order = Some(order);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleFields {
    pub title: String,
    pub description: String,
}

/// One row of a module formset submission.
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleChange {
    Create(ModuleFields),
    Update(u64, ModuleFields),
    Delete(u64),
}

// ============================================================================
// Content
// ============================================================================

/// The closed set of concrete content types a module can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Text,
    File,
    Image,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown content type '{0}'")]
pub struct UnknownItemKind(pub String);

impl FromStr for ItemKind {
    type Err = UnknownItemKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(ItemKind::Text),
            "file" => Ok(ItemKind::File),
            "image" => Ok(ItemKind::Image),
            "video" => Ok(ItemKind::Video),
            other => Err(UnknownItemKind(other.to_string())),
        }
    }
}

impl ItemKind {
    pub const ALL: [ItemKind; 4] = [
        ItemKind::Text,
        ItemKind::File,
        ItemKind::Image,
        ItemKind::Video,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Text => "text",
            ItemKind::File => "file",
            ItemKind::Image => "image",
            ItemKind::Video => "video",
        }
    }

    /// Each kind lives in its own table with its own id sequence.
    pub(crate) fn table(&self) -> TableDefinition<'static, u64, &'static [u8]> {
        match self {
            ItemKind::Text => TEXTS,
            ItemKind::File => FILES,
            ItemKind::Image => IMAGES,
            ItemKind::Video => VIDEOS,
        }
    }

    pub(crate) fn sequence(&self) -> &'static str {
        match self {
            ItemKind::Text => "texts",
            ItemKind::File => "files",
            ItemKind::Image => "images",
            ItemKind::Video => "videos",
        }
    }

    /// Object store prefix for uploaded payloads, if the kind carries one.
    pub fn upload_to(&self) -> Option<&'static str> {
        match self {
            ItemKind::File => Some("files"),
            ItemKind::Image => Some("images"),
            ItemKind::Text | ItemKind::Video => None,
        }
    }

    /// Name of the payload form field.
    pub fn payload_field(&self) -> &'static str {
        match self {
            ItemKind::Text => "content",
            ItemKind::File | ItemKind::Image => "file",
            ItemKind::Video => "url",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An uploaded blob referenced by a file or image item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFile {
    /// Object store key, e.g. `images/<uuid>/diagram.png`.
    pub key: String,
    pub name: String,
    pub mime_type: String,
    pub byte_size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ItemBody {
    Text { content: String },
    File { file: StoredFile },
    Image { file: StoredFile },
    Video { url: String },
}

impl ItemBody {
    pub fn kind(&self) -> ItemKind {
        match self {
            ItemBody::Text { .. } => ItemKind::Text,
            ItemBody::File { .. } => ItemKind::File,
            ItemBody::Image { .. } => ItemKind::Image,
            ItemBody::Video { .. } => ItemKind::Video,
        }
    }

    pub fn stored_file(&self) -> Option<&StoredFile> {
        match self {
            ItemBody::File { file } | ItemBody::Image { file } => Some(file),
            ItemBody::Text { .. } | ItemBody::Video { .. } => None,
        }
    }
}

/// A concrete content item (text, file, image or video).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: u64,
    pub owner_id: u64,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub body: ItemBody,
}

impl Item {
    pub fn kind(&self) -> ItemKind {
        self.body.kind()
    }
}

/// Links a module to one item through a kind tag and the item's id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub id: u64,
    pub module_id: u64,
    pub kind: ItemKind,
    pub object_id: u64,
    #[serde(default)]
    pub order: Option<u32>,
}

impl Ordered for Content {
    fn scope_id(&self) -> u64 {
        self.module_id
    }

    fn order(&self) -> Option<u32> {
        self.order
    }

    fn set_order(&mut self, order: u32) {
        self.order = Some(order);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_item_kind_is_a_std_error() {
        let err = "audio".parse::<ItemKind>().unwrap_err();
        assert_eq!(err, UnknownItemKind("audio".to_string()));

        let boxed: Box<dyn std::error::Error> = Box::new(err);
        assert_eq!(boxed.to_string(), "unknown content type 'audio'");
    }

    #[test]
    fn item_kinds_parse_from_their_names() {
        for kind in ItemKind::ALL {
            assert_eq!(kind.to_string().parse::<ItemKind>(), Ok(kind));
        }
    }
}
