use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{check_orders, storage_error};
use crate::api::auth::CurrentUser;
use crate::api::response::{ApiError, AppJson, AppPath, JSend};
use crate::auth::perms;
use crate::forms::{
    clean_module_formset, foreign_module_errors, CourseForm, FieldErrors, ModuleForm,
    COURSE_SLUG_TAKEN,
};
use crate::storage::models::{Course, Module};
use crate::storage::{CourseRejection, FormsetRejection};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct CourseResponse {
    pub id: u64,
    pub owner_id: u64,
    pub subject_id: u64,
    pub title: String,
    pub slug: String,
    pub overview: String,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct ModuleResponse {
    pub id: u64,
    pub course_id: u64,
    pub title: String,
    pub description: String,
    pub order: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct CourseModulesResponse {
    pub course: CourseResponse,
    pub modules: Vec<ModuleResponse>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ModuleFormsetRequest {
    pub modules: Vec<ModuleForm>,
}

/// Acknowledgement returned by the reorder endpoints
#[derive(Debug, Serialize)]
pub struct SavedResponse {
    pub saved: &'static str,
}

impl SavedResponse {
    pub(super) fn ok() -> Json<SavedResponse> {
        Json(SavedResponse { saved: "OK" })
    }
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn list_courses(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Result<Json<JSend<Vec<CourseResponse>>>, ApiError> {
    user.require(perms::VIEW_COURSE)?;

    let courses = state
        .db
        .list_courses_by_owner(user.id())
        .map_err(storage_error)?;

    Ok(JSend::success(
        courses.iter().map(course_to_response).collect(),
    ))
}

pub async fn create_course(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    AppJson(form): AppJson<CourseForm>,
) -> Result<Json<JSend<CourseResponse>>, ApiError> {
    user.require(perms::ADD_COURSE)?;

    let fields = form.clean(&state.db, user.id(), None)?;
    let course = state
        .db
        .create_course(&fields)
        .map_err(storage_error)?
        .map_err(|rejection| course_rejection(&[], rejection))?;

    tracing::debug!(
        course_id = course.id,
        owner_id = user.id(),
        slug = %course.slug,
        "Created course"
    );
    Ok(JSend::success(course_to_response(&course)))
}

pub async fn get_course(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    AppPath(id): AppPath<u64>,
) -> Result<Json<JSend<CourseResponse>>, ApiError> {
    user.require(perms::CHANGE_COURSE)?;

    let course = owned_course(&state, id, &user)?;
    Ok(JSend::success(course_to_response(&course)))
}

pub async fn update_course(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    AppPath(id): AppPath<u64>,
    AppJson(form): AppJson<CourseForm>,
) -> Result<Json<JSend<CourseResponse>>, ApiError> {
    user.require(perms::CHANGE_COURSE)?;
    owned_course(&state, id, &user)?;

    let fields = form.clean(&state.db, user.id(), Some(id))?;
    let course = state
        .db
        .update_course(id, &fields)
        .map_err(storage_error)?
        .map_err(|rejection| course_rejection(&[], rejection))?;

    tracing::debug!(course_id = id, "Updated course");
    Ok(JSend::success(course_to_response(&course)))
}

pub async fn delete_course(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    AppPath(id): AppPath<u64>,
) -> Result<Json<JSend<()>>, ApiError> {
    user.require(perms::DELETE_COURSE)?;
    owned_course(&state, id, &user)?;

    state.db.delete_course(id).map_err(storage_error)?;

    tracing::debug!(course_id = id, "Deleted course");
    Ok(JSend::success(()))
}

pub async fn get_course_modules(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    AppPath(id): AppPath<u64>,
) -> Result<Json<JSend<CourseModulesResponse>>, ApiError> {
    let course = owned_course(&state, id, &user)?;
    let modules = state.db.list_modules(course.id).map_err(storage_error)?;

    Ok(JSend::success(CourseModulesResponse {
        course: course_to_response(&course),
        modules: modules.iter().map(module_to_response).collect(),
    }))
}

/// Validate and apply the whole module formset of an owned course.
pub async fn update_course_modules(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    AppPath(id): AppPath<u64>,
    AppJson(req): AppJson<ModuleFormsetRequest>,
) -> Result<Json<JSend<CourseModulesResponse>>, ApiError> {
    let course = owned_course(&state, id, &user)?;

    let changes = clean_module_formset(&req.modules).map_err(ApiError::invalid)?;
    let modules = state
        .db
        .apply_module_formset(course.id, &changes)
        .map_err(storage_error)?
        .map_err(|rejection| formset_rejection(&req.modules, rejection))?;

    Ok(JSend::success(CourseModulesResponse {
        course: course_to_response(&course),
        modules: modules.iter().map(module_to_response).collect(),
    }))
}

/// Apply `{module_id: order}` pairs to the requester's modules. Other ids
/// are skipped.
pub async fn reorder_modules(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    AppJson(orders): AppJson<BTreeMap<u64, u32>>,
) -> Result<Json<SavedResponse>, ApiError> {
    check_orders(&orders)?;
    for (id, order) in orders {
        let updated = state
            .db
            .set_module_order(id, user.id(), order)
            .map_err(storage_error)?;
        if !updated {
            tracing::warn!(
                module_id = id,
                user_id = user.id(),
                "Skipped reorder of module not owned by requester"
            );
        }
    }
    Ok(SavedResponse::ok())
}

// ============================================================================
// Helpers
// ============================================================================

fn owned_course(state: &AppState, id: u64, user: &CurrentUser) -> Result<Course, ApiError> {
    state
        .db
        .get_owned_course(id, user.id())
        .map_err(storage_error)?
        .ok_or_else(|| ApiError::not_found("Course not found"))
}

fn formset_rejection(forms: &[ModuleForm], rejection: FormsetRejection) -> ApiError {
    match rejection {
        FormsetRejection::CourseNotFound => ApiError::not_found("Course not found"),
        FormsetRejection::ForeignModule(module_id) => {
            ApiError::invalid(foreign_module_errors(forms, module_id))
        }
    }
}

/// Map a refused course write. `forms` are the inline module rows sent with it.
pub(super) fn course_rejection(forms: &[ModuleForm], rejection: CourseRejection) -> ApiError {
    match rejection {
        CourseRejection::NotFound => ApiError::not_found("Course not found"),
        CourseRejection::SlugTaken(_) => {
            let mut errors = FieldErrors::new();
            errors.add("slug", COURSE_SLUG_TAKEN);
            ApiError::invalid(errors)
        }
        CourseRejection::Modules(rejection) => formset_rejection(forms, rejection),
    }
}

pub(super) fn course_to_response(course: &Course) -> CourseResponse {
    CourseResponse {
        id: course.id,
        owner_id: course.owner_id,
        subject_id: course.subject_id,
        title: course.title.clone(),
        slug: course.slug.clone(),
        overview: course.overview.clone(),
        created_at: course.created_at.to_rfc3339(),
    }
}

pub(super) fn module_to_response(module: &Module) -> ModuleResponse {
    ModuleResponse {
        id: module.id,
        course_id: module.course_id,
        title: module.title.clone(),
        description: module.description.clone(),
        order: module.order,
    }
}
