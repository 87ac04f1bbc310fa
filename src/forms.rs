//! Input validation with field-level error reporting.
//!
//! Each form cleans raw request input into the storage layer's field types,
//! collecting every problem into a [`FieldErrors`] map instead of stopping at
//! the first one.

use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::perms;
use crate::storage::models::{
    CourseFields, Item, ItemBody, ItemKind, ModuleChange, ModuleFields, StoredFile,
};
use crate::storage::{Database, DatabaseError};

pub const TITLE_MAX: usize = 200;
pub const SLUG_MAX: usize = 200;
pub const ITEM_TITLE_MAX: usize = 250;
pub const URL_MAX: usize = 200;
pub const USERNAME_MAX: usize = 150;
pub const MAX_FORMSET_FORMS: usize = 1000;

pub const COURSE_SLUG_TAKEN: &str = "Course with this Slug already exists.";

const REQUIRED: &str = "This field is required.";
const INVALID_CHOICE: &str = "Select a valid choice. That choice is not one of the available choices.";
const INVALID_SLUG: &str =
    "Enter a valid slug consisting of letters, numbers, underscores or hyphens.";

/// Field name -> messages. Serializes as a plain JSON object.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    /// Merge another form's errors under `prefix.field`.
    pub fn extend_prefixed(&mut self, prefix: &str, other: FieldErrors) {
        for (field, messages) in other.0 {
            self.0
                .entry(format!("{prefix}.{field}"))
                .or_default()
                .extend(messages);
        }
    }

    /// Merge another set of errors under the same field names.
    pub fn merge(&mut self, other: FieldErrors) {
        for (field, messages) in other.0 {
            self.0.entry(field).or_default().extend(messages);
        }
    }

    fn finish<T>(self, value: T) -> Result<T, FormError> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(FormError::Invalid(self))
        }
    }
}

#[derive(Debug, Error)]
pub enum FormError {
    #[error("Invalid form submission")]
    Invalid(FieldErrors),
    #[error(transparent)]
    Storage(#[from] DatabaseError),
}

// ============================================================================
// Field helpers
// ============================================================================

/// Trimmed, non-blank text of at most `max` characters.
fn required_text(errors: &mut FieldErrors, field: &str, value: &str, max: usize) -> String {
    let value = value.trim();
    if value.is_empty() {
        errors.add(field, REQUIRED);
    } else {
        check_length(errors, field, value, max);
    }
    value.to_string()
}

fn check_length(errors: &mut FieldErrors, field: &str, value: &str, max: usize) {
    let len = value.chars().count();
    if len > max {
        errors.add(
            field,
            format!("Ensure this value has at most {max} characters (it has {len})."),
        );
    }
}

pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Derive a slug from a title: lowercase ASCII words joined by hyphens.
pub fn slugify(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|ch| match ch {
            'a'..='z' | '0'..='9' | '_' => ch,
            _ => '-',
        })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Use the given slug, or one derived from `title` when it is blank.
fn slug_or_prepopulated(
    errors: &mut FieldErrors,
    slug: Option<&str>,
    title: &str,
) -> String {
    let slug = match slug.map(str::trim).filter(|s| !s.is_empty()) {
        Some(slug) => slug.to_string(),
        None => slugify(title),
    };
    if slug.is_empty() {
        errors.add("slug", REQUIRED);
    } else if !is_valid_slug(&slug) {
        errors.add("slug", INVALID_SLUG);
    } else {
        check_length(errors, "slug", &slug, SLUG_MAX);
    }
    slug
}

// ============================================================================
// Subject
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SubjectForm {
    pub title: String,
    /// Prepopulated from the title when omitted
    pub slug: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubjectFields {
    pub title: String,
    pub slug: String,
}

impl SubjectForm {
    pub fn clean(&self, db: &Database, instance: Option<u64>) -> Result<SubjectFields, FormError> {
        let mut errors = FieldErrors::new();
        let title = required_text(&mut errors, "title", &self.title, TITLE_MAX);
        let slug = slug_or_prepopulated(&mut errors, self.slug.as_deref(), &title);

        if errors.get("slug").is_none() {
            if let Some(holder) = db.subject_slug_owner(&slug)? {
                if Some(holder) != instance {
                    errors.add("slug", "Subject with this Slug already exists.");
                }
            }
        }

        errors.finish(SubjectFields { title, slug })
    }
}

// ============================================================================
// Course
// ============================================================================

/// Course fields an instructor edits. The owner is always the requester.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CourseForm {
    pub subject: Option<u64>,
    pub title: String,
    pub slug: String,
    pub overview: String,
}

impl CourseForm {
    pub fn clean(
        &self,
        db: &Database,
        owner_id: u64,
        instance: Option<u64>,
    ) -> Result<CourseFields, FormError> {
        let mut errors = FieldErrors::new();
        let subject_id = clean_subject(db, &mut errors, self.subject)?;
        let title = required_text(&mut errors, "title", &self.title, TITLE_MAX);

        let slug = self.slug.trim().to_string();
        if slug.is_empty() {
            errors.add("slug", REQUIRED);
        } else if !is_valid_slug(&slug) {
            errors.add("slug", INVALID_SLUG);
        } else {
            check_length(&mut errors, "slug", &slug, SLUG_MAX);
        }
        clean_course_slug(db, &mut errors, &slug, instance)?;

        let overview = self.overview.trim().to_string();
        if overview.is_empty() {
            errors.add("overview", REQUIRED);
        }

        errors.finish(CourseFields {
            owner_id,
            subject_id,
            title,
            slug,
            overview,
        })
    }
}

/// The admin's course form: every field, a prepopulated slug and inline modules.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AdminCourseForm {
    pub owner: Option<u64>,
    pub subject: Option<u64>,
    pub title: String,
    pub slug: Option<String>,
    pub overview: String,
    /// Inline module rows; `None` leaves the course's modules untouched
    pub modules: Option<Vec<ModuleForm>>,
}

impl AdminCourseForm {
    pub fn clean(
        &self,
        db: &Database,
        instance: Option<u64>,
    ) -> Result<(CourseFields, Vec<ModuleChange>), FormError> {
        let mut errors = FieldErrors::new();

        let owner_id = match self.owner {
            Some(id) if db.get_user(id)?.is_some() => id,
            Some(_) => {
                errors.add("owner", INVALID_CHOICE);
                0
            }
            None => {
                errors.add("owner", REQUIRED);
                0
            }
        };
        let subject_id = clean_subject(db, &mut errors, self.subject)?;
        let title = required_text(&mut errors, "title", &self.title, TITLE_MAX);
        let slug = slug_or_prepopulated(&mut errors, self.slug.as_deref(), &title);
        clean_course_slug(db, &mut errors, &slug, instance)?;

        let overview = self.overview.trim().to_string();
        if overview.is_empty() {
            errors.add("overview", REQUIRED);
        }

        let changes = match self.modules {
            Some(ref forms) => match clean_module_formset(forms) {
                Ok(changes) => changes,
                Err(formset_errors) => {
                    errors.merge(formset_errors);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        errors.finish((
            CourseFields {
                owner_id,
                subject_id,
                title,
                slug,
                overview,
            },
            changes,
        ))
    }
}

fn clean_subject(
    db: &Database,
    errors: &mut FieldErrors,
    subject: Option<u64>,
) -> Result<u64, DatabaseError> {
    match subject {
        Some(id) if db.get_subject(id)?.is_some() => Ok(id),
        Some(_) => {
            errors.add("subject", INVALID_CHOICE);
            Ok(0)
        }
        None => {
            errors.add("subject", REQUIRED);
            Ok(0)
        }
    }
}

fn clean_course_slug(
    db: &Database,
    errors: &mut FieldErrors,
    slug: &str,
    instance: Option<u64>,
) -> Result<(), DatabaseError> {
    if errors.get("slug").is_some() {
        return Ok(());
    }
    if let Some(holder) = db.course_slug_owner(slug)? {
        if Some(holder) != instance {
            errors.add("slug", COURSE_SLUG_TAKEN);
        }
    }
    Ok(())
}

// ============================================================================
// Module formset
// ============================================================================

/// One row of the module formset.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct ModuleForm {
    /// Existing module id; absent for new rows
    pub id: Option<u64>,
    pub title: String,
    pub description: String,
    /// Marks an existing row for deletion
    pub delete: bool,
}

impl ModuleForm {
    /// A new row the user never filled in.
    fn is_untouched_extra(&self) -> bool {
        self.id.is_none() && self.title.trim().is_empty() && self.description.trim().is_empty()
    }
}

/// Validate every row of a module formset, keyed `modules[i].field`.
///
/// Untouched extra rows and new rows marked for deletion are dropped. The
/// whole set fails if any row fails.
pub fn clean_module_formset(forms: &[ModuleForm]) -> Result<Vec<ModuleChange>, FieldErrors> {
    let mut errors = FieldErrors::new();
    if forms.len() > MAX_FORMSET_FORMS {
        errors.add(
            "modules",
            format!("Please submit at most {MAX_FORMSET_FORMS} forms."),
        );
        return Err(errors);
    }

    let mut seen = BTreeSet::new();
    let mut changes = Vec::new();
    for (i, form) in forms.iter().enumerate() {
        if form.is_untouched_extra() || (form.id.is_none() && form.delete) {
            continue;
        }

        let mut row = FieldErrors::new();
        if let Some(id) = form.id {
            if !seen.insert(id) {
                row.add("id", "Please correct the duplicate data for id.");
            }
        }

        if let (Some(id), true) = (form.id, form.delete) {
            if row.is_empty() {
                changes.push(ModuleChange::Delete(id));
            }
        } else {
            let title = required_text(&mut row, "title", &form.title, TITLE_MAX);
            let fields = ModuleFields {
                title,
                description: form.description.trim().to_string(),
            };
            changes.push(match form.id {
                Some(id) => ModuleChange::Update(id, fields),
                None => ModuleChange::Create(fields),
            });
        }

        errors.extend_prefixed(&format!("modules[{i}]"), row);
    }

    if errors.is_empty() {
        Ok(changes)
    } else {
        Err(errors)
    }
}

/// Errors for a formset whose row names a module outside the course.
pub fn foreign_module_errors(forms: &[ModuleForm], module_id: u64) -> FieldErrors {
    let index = forms
        .iter()
        .position(|f| f.id == Some(module_id))
        .unwrap_or_default();
    let mut errors = FieldErrors::new();
    errors.add(format!("modules[{index}].id"), INVALID_CHOICE);
    errors
}

// ============================================================================
// Content items
// ============================================================================

/// A file part received in a multipart submission.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl UploadedFile {
    /// The declared content type, or one guessed from the file name.
    pub fn mime_type(&self) -> String {
        self.content_type
            .clone()
            .filter(|ct| ct != "application/octet-stream")
            .or_else(|| {
                self.file_name
                    .as_deref()
                    .and_then(|n| mime_guess::from_path(n).first())
                    .map(|m| m.to_string())
            })
            .unwrap_or_else(|| "application/octet-stream".to_string())
    }
}

/// Raw fields of a content item submission. The form is dynamic: which
/// payload field applies depends on the item kind.
#[derive(Debug, Default, Clone)]
pub struct ItemForm {
    pub title: Option<String>,
    pub content: Option<String>,
    pub url: Option<String>,
    pub file: Option<UploadedFile>,
}

/// The payload of a cleaned item form.
#[derive(Debug, Clone)]
pub enum CleanPayload {
    Text(String),
    Video(String),
    /// A new upload that still has to be written to the object store
    Upload(UploadedFile),
    /// Keep the blob the item already references
    Keep(StoredFile),
}

#[derive(Debug, Clone)]
pub struct CleanItem {
    pub title: String,
    pub payload: CleanPayload,
}

impl CleanItem {
    /// Build the stored body once any upload has been placed at `stored`.
    pub fn into_body(self, kind: ItemKind, stored: Option<StoredFile>) -> Option<ItemBody> {
        let body = match (kind, self.payload) {
            (ItemKind::Text, CleanPayload::Text(content)) => ItemBody::Text { content },
            (ItemKind::Video, CleanPayload::Video(url)) => ItemBody::Video { url },
            (ItemKind::File, CleanPayload::Keep(file)) => ItemBody::File { file },
            (ItemKind::Image, CleanPayload::Keep(file)) => ItemBody::Image { file },
            (ItemKind::File, CleanPayload::Upload(_)) => ItemBody::File { file: stored? },
            (ItemKind::Image, CleanPayload::Upload(_)) => ItemBody::Image { file: stored? },
            _ => return None,
        };
        Some(body)
    }
}

impl ItemForm {
    /// Validate the fields relevant to `kind`. `existing` is the item being
    /// edited; a file item may then omit a new upload.
    pub fn clean(&self, kind: ItemKind, existing: Option<&Item>) -> Result<CleanItem, FieldErrors> {
        let mut errors = FieldErrors::new();
        let title = required_text(
            &mut errors,
            "title",
            self.title.as_deref().unwrap_or_default(),
            ITEM_TITLE_MAX,
        );

        let payload = match kind {
            ItemKind::Text => {
                let content = self.content.clone().unwrap_or_default();
                if content.trim().is_empty() {
                    errors.add("content", REQUIRED);
                }
                CleanPayload::Text(content)
            }
            ItemKind::Video => {
                let url = self.url.as_deref().unwrap_or_default().trim().to_string();
                if url.is_empty() {
                    errors.add("url", REQUIRED);
                } else {
                    if !is_valid_url(&url) {
                        errors.add("url", "Enter a valid URL.");
                    }
                    check_length(&mut errors, "url", &url, URL_MAX);
                }
                CleanPayload::Video(url)
            }
            ItemKind::File | ItemKind::Image => {
                let kept = existing.and_then(|item| item.body.stored_file()).cloned();
                match (&self.file, kept) {
                    (Some(upload), _) if upload.data.is_empty() => {
                        errors.add("file", "The submitted file is empty.");
                        CleanPayload::Upload(upload.clone())
                    }
                    (Some(upload), _) => CleanPayload::Upload(upload.clone()),
                    (None, Some(file)) => CleanPayload::Keep(file),
                    (None, None) => {
                        errors.add("file", REQUIRED);
                        CleanPayload::Text(String::new())
                    }
                }
            }
        };

        if errors.is_empty() {
            Ok(CleanItem { title, payload })
        } else {
            Err(errors)
        }
    }
}

/// http(s) or ftp(s) URL with a host.
pub fn is_valid_url(value: &str) -> bool {
    match url::Url::parse(value) {
        Ok(url) => {
            matches!(url.scheme(), "http" | "https" | "ftp" | "ftps") && url.host_str().is_some()
        }
        Err(_) => false,
    }
}

/// Describes one input of a dynamic item form.
#[derive(Debug, Clone, Serialize)]
pub struct FieldSpec {
    pub name: &'static str,
    pub input: &'static str,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
}

/// Inputs of the item form for `kind`. Owner, order and timestamps are
/// never user-editable.
pub fn item_form_fields(kind: ItemKind, editing: bool) -> Vec<FieldSpec> {
    let title = FieldSpec {
        name: "title",
        input: "text",
        required: true,
        max_length: Some(ITEM_TITLE_MAX),
    };
    let payload = match kind {
        ItemKind::Text => FieldSpec {
            name: "content",
            input: "textarea",
            required: true,
            max_length: None,
        },
        ItemKind::File | ItemKind::Image => FieldSpec {
            name: "file",
            input: "file",
            required: !editing,
            max_length: None,
        },
        ItemKind::Video => FieldSpec {
            name: "url",
            input: "url",
            required: true,
            max_length: Some(URL_MAX),
        },
    };
    vec![title, payload]
}

// ============================================================================
// Users
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UserForm {
    pub username: String,
    pub password: String,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct UserFields {
    pub username: String,
    pub password: String,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub permissions: BTreeSet<String>,
}

impl UserForm {
    pub fn clean(&self, db: &Database) -> Result<UserFields, FormError> {
        let mut errors = FieldErrors::new();

        let username = self.username.trim().to_string();
        if username.is_empty() {
            errors.add("username", REQUIRED);
        } else if !username
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_'))
        {
            errors.add(
                "username",
                "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters.",
            );
        } else {
            check_length(&mut errors, "username", &username, USERNAME_MAX);
            if db.get_user_by_username(&username)?.is_some() {
                errors.add("username", "A user with that username already exists.");
            }
        }

        if self.password.is_empty() {
            errors.add("password", REQUIRED);
        }

        let permissions = match clean_permissions(&self.permissions) {
            Ok(permissions) => permissions,
            Err(permission_errors) => {
                errors.merge(permission_errors);
                BTreeSet::new()
            }
        };

        errors.finish(UserFields {
            username,
            password: self.password.clone(),
            is_staff: self.is_staff,
            is_superuser: self.is_superuser,
            permissions,
        })
    }
}

/// Every codename must be one the API knows.
pub fn clean_permissions(codenames: &[String]) -> Result<BTreeSet<String>, FieldErrors> {
    let mut errors = FieldErrors::new();
    let mut permissions = BTreeSet::new();
    for codename in codenames {
        if perms::is_known(codename) {
            permissions.insert(codename.clone());
        } else {
            errors.add("permissions", format!("Unknown permission '{codename}'."));
        }
    }
    if errors.is_empty() {
        Ok(permissions)
    } else {
        Err(errors)
    }
}
