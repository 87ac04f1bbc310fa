use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::multipart::Field;
use axum::extract::{Multipart, State};
use axum::Json;
use serde::Serialize;

use super::courses::{
    course_to_response, module_to_response, CourseResponse, ModuleResponse, SavedResponse,
};
use super::{check_orders, object_store_error, storage_error};
use crate::api::auth::CurrentUser;
use crate::api::response::{ApiError, AppJson, AppPath, JSend};
use crate::forms::{
    item_form_fields, CleanItem, CleanPayload, FieldSpec, ItemForm, UploadedFile,
};
use crate::object_store::upload_key;
use crate::storage::models::{Content, Course, Item, ItemBody, ItemKind, Module, StoredFile};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct FileResponse {
    pub key: String,
    pub name: String,
    pub mime_type: String,
    pub byte_size: u64,
    /// Where the blob is served
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct ItemResponse {
    pub id: u64,
    pub kind: ItemKind,
    pub owner_id: u64,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<FileResponse>,
}

#[derive(Debug, Serialize)]
pub struct ContentResponse {
    pub id: u64,
    pub module_id: u64,
    pub kind: ItemKind,
    pub object_id: u64,
    pub order: Option<u32>,
    /// `None` when the referenced item no longer exists
    pub item: Option<ItemResponse>,
}

#[derive(Debug, Serialize)]
pub struct ModuleContentsResponse {
    pub course: CourseResponse,
    pub module: ModuleResponse,
    pub contents: Vec<ContentResponse>,
}

#[derive(Debug, Serialize)]
pub struct ContentFormResponse {
    pub module_id: u64,
    pub kind: ItemKind,
    pub fields: Vec<FieldSpec>,
    pub item: Option<ItemResponse>,
}

#[derive(Debug, Serialize)]
pub struct DeletedContentResponse {
    pub module_id: u64,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn module_content_list(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    AppPath(module_id): AppPath<u64>,
) -> Result<Json<JSend<ModuleContentsResponse>>, ApiError> {
    let (module, course) = owned_module(&state, module_id, &user)?;
    let rows = state
        .db
        .list_module_items(module.id)
        .map_err(storage_error)?;

    Ok(JSend::success(ModuleContentsResponse {
        course: course_to_response(&course),
        module: module_to_response(&module),
        contents: rows
            .iter()
            .map(|(content, item)| content_to_response(content, item.as_ref()))
            .collect(),
    }))
}

/// Describe the empty form for a new item of `model_name`.
pub async fn new_content_form(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    AppPath((module_id, model_name)): AppPath<(u64, String)>,
) -> Result<Json<JSend<ContentFormResponse>>, ApiError> {
    let (module, _) = owned_module(&state, module_id, &user)?;
    let kind = parse_kind(&model_name)?;

    Ok(JSend::success(ContentFormResponse {
        module_id: module.id,
        kind,
        fields: item_form_fields(kind, false),
        item: None,
    }))
}

/// Describe the edit form of an existing item, with its current values.
pub async fn edit_content_form(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    AppPath((module_id, model_name, id)): AppPath<(u64, String, u64)>,
) -> Result<Json<JSend<ContentFormResponse>>, ApiError> {
    let (module, _) = owned_module(&state, module_id, &user)?;
    let kind = parse_kind(&model_name)?;
    let item = owned_item(&state, kind, id, &user)?;

    Ok(JSend::success(ContentFormResponse {
        module_id: module.id,
        kind,
        fields: item_form_fields(kind, true),
        item: Some(item_to_response(&item)),
    }))
}

/// Create an item from multipart input and append it to the module.
pub async fn create_content(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    AppPath((module_id, model_name)): AppPath<(u64, String)>,
    mut multipart: Multipart,
) -> Result<Json<JSend<ContentResponse>>, ApiError> {
    let (module, _) = owned_module(&state, module_id, &user)?;
    let kind = parse_kind(&model_name)?;

    let form = read_item_form(&mut multipart, state.config.max_upload_size).await?;
    let clean = form.clean(kind, None).map_err(ApiError::invalid)?;
    let title = clean.title.clone();

    // Phase 1: upload the blob, if any
    let stored = store_upload(&state, kind, &clean).await?;
    let body = build_body(clean, kind, stored.clone())?;

    // Phase 2: item and content rows in one transaction
    let result = state
        .db
        .create_module_item(module.id, user.id(), &title, body);
    let (item, content) = match result {
        Ok(created) => created,
        Err(e) => {
            discard_blob(&state, stored.as_ref()).await;
            return Err(storage_error(e));
        }
    };

    Ok(JSend::success(content_to_response(&content, Some(&item))))
}

/// Replace an owned item's title and payload from multipart input.
pub async fn update_content(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    AppPath((module_id, model_name, id)): AppPath<(u64, String, u64)>,
    mut multipart: Multipart,
) -> Result<Json<JSend<ItemResponse>>, ApiError> {
    owned_module(&state, module_id, &user)?;
    let kind = parse_kind(&model_name)?;
    let existing = owned_item(&state, kind, id, &user)?;

    let form = read_item_form(&mut multipart, state.config.max_upload_size).await?;
    let clean = form
        .clean(kind, Some(&existing))
        .map_err(ApiError::invalid)?;
    let title = clean.title.clone();

    let stored = store_upload(&state, kind, &clean).await?;
    let body = build_body(clean, kind, stored.clone())?;

    let item = match state.db.update_item(kind, id, &title, body) {
        Ok(Some(item)) => item,
        Ok(None) => {
            discard_blob(&state, stored.as_ref()).await;
            return Err(ApiError::not_found("Item not found"));
        }
        Err(e) => {
            discard_blob(&state, stored.as_ref()).await;
            return Err(storage_error(e));
        }
    };

    // The old blob is unreferenced once a new upload replaced it
    if let Some(previous) = existing.body.stored_file() {
        if item.body.stored_file().map(|f| &f.key) != Some(&previous.key) {
            discard_blob(&state, Some(previous)).await;
        }
    }

    tracing::debug!(item_id = id, kind = %kind, module_id, "Updated content item");
    Ok(JSend::success(item_to_response(&item)))
}

/// Delete an owned content together with its item and blob.
pub async fn delete_content(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    AppPath(id): AppPath<u64>,
) -> Result<Json<JSend<DeletedContentResponse>>, ApiError> {
    let content = state
        .db
        .get_owned_content(id, user.id())
        .map_err(storage_error)?
        .ok_or_else(|| ApiError::not_found("Content not found"))?;

    let item = state
        .db
        .delete_item(content.kind, content.object_id)
        .map_err(storage_error)?;
    state.db.delete_content(id).map_err(storage_error)?;

    // Blob last, best-effort
    discard_blob(&state, item.as_ref().and_then(|i| i.body.stored_file())).await;

    tracing::debug!(
        content_id = id,
        module_id = content.module_id,
        kind = %content.kind,
        "Deleted content"
    );
    Ok(JSend::success(DeletedContentResponse {
        module_id: content.module_id,
    }))
}

/// Apply `{content_id: order}` pairs to the requester's contents. Other ids
/// are skipped.
pub async fn reorder_contents(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    AppJson(orders): AppJson<BTreeMap<u64, u32>>,
) -> Result<Json<SavedResponse>, ApiError> {
    check_orders(&orders)?;
    for (id, order) in orders {
        let updated = state
            .db
            .set_content_order(id, user.id(), order)
            .map_err(storage_error)?;
        if !updated {
            tracing::warn!(
                content_id = id,
                user_id = user.id(),
                "Skipped reorder of content not owned by requester"
            );
        }
    }
    Ok(SavedResponse::ok())
}

// ============================================================================
// Helpers
// ============================================================================

fn parse_kind(model_name: &str) -> Result<ItemKind, ApiError> {
    model_name
        .parse()
        .map_err(|_| ApiError::not_found(format!("Unknown content type '{model_name}'")))
}

fn owned_module(
    state: &AppState,
    module_id: u64,
    user: &CurrentUser,
) -> Result<(Module, Course), ApiError> {
    state
        .db
        .get_owned_module(module_id, user.id())
        .map_err(storage_error)?
        .ok_or_else(|| ApiError::not_found("Module not found"))
}

fn owned_item(
    state: &AppState,
    kind: ItemKind,
    id: u64,
    user: &CurrentUser,
) -> Result<Item, ApiError> {
    state
        .db
        .get_owned_item(kind, id, user.id())
        .map_err(storage_error)?
        .ok_or_else(|| ApiError::not_found("Item not found"))
}

/// Collect the item form fields from a multipart body. Unknown parts are ignored.
async fn read_item_form(
    multipart: &mut Multipart,
    max_upload_size: u64,
) -> Result<ItemForm, ApiError> {
    let mut form = ItemForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart data: {e}")))?
    {
        let field_name = field.name().unwrap_or("").to_string();

        match field_name.as_str() {
            "file" => {
                let file_name = field.file_name().map(|s| s.to_string());
                let content_type = field.content_type().map(|s| s.to_string());

                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read file: {e}")))?;

                if data.len() as u64 > max_upload_size {
                    return Err(ApiError::payload_too_large(format!(
                        "File exceeds maximum upload size of {max_upload_size} bytes"
                    )));
                }

                // Browsers send an empty, unnamed part when no file was chosen
                if data.is_empty() && file_name.as_deref().unwrap_or_default().is_empty() {
                    continue;
                }

                form.file = Some(UploadedFile {
                    file_name,
                    content_type,
                    data,
                });
            }
            "title" => form.title = Some(text_field(field, "title").await?),
            "content" => form.content = Some(text_field(field, "content").await?),
            "url" => form.url = Some(text_field(field, "url").await?),
            _ => {}
        }
    }

    Ok(form)
}

async fn text_field(field: Field<'_>, name: &str) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid {name}: {e}")))
}

/// Write a new upload to the object store under the kind's prefix.
async fn store_upload(
    state: &AppState,
    kind: ItemKind,
    clean: &CleanItem,
) -> Result<Option<StoredFile>, ApiError> {
    let CleanPayload::Upload(ref upload) = clean.payload else {
        return Ok(None);
    };
    let prefix = kind
        .upload_to()
        .ok_or_else(|| ApiError::internal(format!("{kind} items do not take uploads")))?;

    let key = upload_key(prefix, upload.file_name.as_deref());
    let mime_type = upload.mime_type();
    state
        .object_store
        .put(&key, upload.data.clone(), &mime_type)
        .await
        .map_err(object_store_error)?;

    let name = upload
        .file_name
        .clone()
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| key.rsplit('/').next().unwrap_or_default().to_string());

    tracing::debug!(key = %key, byte_size = upload.data.len(), "Stored upload");
    Ok(Some(StoredFile {
        key,
        name,
        mime_type,
        byte_size: upload.data.len() as u64,
    }))
}

fn build_body(
    clean: CleanItem,
    kind: ItemKind,
    stored: Option<StoredFile>,
) -> Result<ItemBody, ApiError> {
    clean
        .into_body(kind, stored)
        .ok_or_else(|| ApiError::internal(format!("Form payload does not fit a {kind} item")))
}

/// Best-effort removal of a blob nothing references any more.
async fn discard_blob(state: &AppState, file: Option<&StoredFile>) {
    let Some(file) = file else {
        return;
    };
    if let Err(e) = state.object_store.delete(&file.key).await {
        tracing::warn!(key = %file.key, error = %e, "Failed to delete blob from object storage");
    }
}

fn item_to_response(item: &Item) -> ItemResponse {
    let (content, url, file) = match &item.body {
        ItemBody::Text { content } => (Some(content.clone()), None, None),
        ItemBody::Video { url } => (None, Some(url.clone()), None),
        ItemBody::File { file } | ItemBody::Image { file } => (
            None,
            None,
            Some(FileResponse {
                key: file.key.clone(),
                name: file.name.clone(),
                mime_type: file.mime_type.clone(),
                byte_size: file.byte_size,
                url: format!("/media/{}", file.key),
            }),
        ),
    };

    ItemResponse {
        id: item.id,
        kind: item.kind(),
        owner_id: item.owner_id,
        title: item.title.clone(),
        created_at: item.created_at.to_rfc3339(),
        updated_at: item.updated_at.to_rfc3339(),
        content,
        url,
        file,
    }
}

fn content_to_response(content: &Content, item: Option<&Item>) -> ContentResponse {
    ContentResponse {
        id: content.id,
        module_id: content.module_id,
        kind: content.kind,
        object_id: content.object_id,
        order: content.order,
        item: item.map(item_to_response),
    }
}
