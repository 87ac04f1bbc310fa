use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::courses::{
    course_rejection, course_to_response, module_to_response, CourseModulesResponse,
    CourseResponse,
};
use super::session::{user_to_response, UserResponse};
use super::storage_error;
use crate::api::auth::StaffUser;
use crate::api::response::{
    ApiError, AppJson, AppPath, AppQuery, JSend, JSendPaginated, Pagination,
};
use crate::auth::{hash_password, perms};
use crate::forms::{clean_permissions, AdminCourseForm, FieldErrors, SubjectForm, UserForm};
use crate::storage::models::{Course, Subject};
use crate::storage::{CourseSearch, NewUser};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct SubjectResponse {
    pub id: u64,
    pub title: String,
    pub slug: String,
}

/// A row of the admin course list
#[derive(Debug, Serialize)]
pub struct AdminCourseResponse {
    #[serde(flatten)]
    pub course: CourseResponse,
    pub subject: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

#[derive(Debug, Deserialize)]
pub struct AdminCourseParams {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub subject: Option<u64>,
    #[serde(default)]
    pub created: Option<CreatedFilter>,
}

/// Date ranges offered for filtering courses by creation time (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum CreatedFilter {
    #[serde(rename = "today")]
    Today,
    #[serde(rename = "past_7_days")]
    Past7Days,
    #[serde(rename = "this_month")]
    ThisMonth,
    #[serde(rename = "this_year")]
    ThisYear,
}

impl CreatedFilter {
    /// `[from, until)` for this range as seen at `now`.
    pub fn bounds(self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let today = now.date_naive();
        let tomorrow = today.succ_opt()?;
        let (from, until) = match self {
            CreatedFilter::Today => (today, tomorrow),
            CreatedFilter::Past7Days => (today - Duration::days(7), tomorrow),
            CreatedFilter::ThisMonth => {
                let first = today.with_day(1)?;
                let next = if first.month() == 12 {
                    NaiveDate::from_ymd_opt(first.year() + 1, 1, 1)?
                } else {
                    NaiveDate::from_ymd_opt(first.year(), first.month() + 1, 1)?
                };
                (first, next)
            }
            CreatedFilter::ThisYear => (
                NaiveDate::from_ymd_opt(today.year(), 1, 1)?,
                NaiveDate::from_ymd_opt(today.year() + 1, 1, 1)?,
            ),
        };
        Some((
            from.and_hms_opt(0, 0, 0)?.and_utc(),
            until.and_hms_opt(0, 0, 0)?.and_utc(),
        ))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PermissionsRequest {
    pub permissions: Vec<String>,
}

fn default_limit() -> u32 {
    100
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn health() -> Json<JSend<HealthResponse>> {
    JSend::success(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// --- Subjects ---------------------------------------------------------------

pub async fn admin_list_subjects(
    State(state): State<Arc<AppState>>,
    StaffUser(user): StaffUser,
    AppQuery(params): AppQuery<PageParams>,
) -> Result<Json<JSendPaginated<SubjectResponse>>, ApiError> {
    user.require(perms::VIEW_SUBJECT)?;
    if params.limit == 0 {
        return Err(ApiError::bad_request("limit must be greater than 0"));
    }

    let subjects = state.db.list_subjects().map_err(storage_error)?;
    Ok(paginate(&subjects, &params, subject_to_response))
}

pub async fn admin_get_subject(
    State(state): State<Arc<AppState>>,
    StaffUser(user): StaffUser,
    AppPath(id): AppPath<u64>,
) -> Result<Json<JSend<SubjectResponse>>, ApiError> {
    user.require(perms::VIEW_SUBJECT)?;

    let subject = existing_subject(&state, id)?;
    Ok(JSend::success(subject_to_response(&subject)))
}

pub async fn admin_create_subject(
    State(state): State<Arc<AppState>>,
    StaffUser(user): StaffUser,
    AppJson(form): AppJson<SubjectForm>,
) -> Result<Json<JSend<SubjectResponse>>, ApiError> {
    user.require(perms::ADD_SUBJECT)?;

    let fields = form.clean(&state.db, None)?;
    let subject = state
        .db
        .create_subject(&fields.title, &fields.slug)
        .map_err(storage_error)?;

    tracing::debug!(subject_id = subject.id, slug = %subject.slug, "Created subject");
    Ok(JSend::success(subject_to_response(&subject)))
}

pub async fn admin_update_subject(
    State(state): State<Arc<AppState>>,
    StaffUser(user): StaffUser,
    AppPath(id): AppPath<u64>,
    AppJson(form): AppJson<SubjectForm>,
) -> Result<Json<JSend<SubjectResponse>>, ApiError> {
    user.require(perms::CHANGE_SUBJECT)?;
    existing_subject(&state, id)?;

    let fields = form.clean(&state.db, Some(id))?;
    let subject = state
        .db
        .update_subject(id, &fields.title, &fields.slug)
        .map_err(storage_error)?
        .ok_or_else(|| ApiError::not_found("Subject not found"))?;

    tracing::debug!(subject_id = id, "Updated subject");
    Ok(JSend::success(subject_to_response(&subject)))
}

pub async fn admin_delete_subject(
    State(state): State<Arc<AppState>>,
    StaffUser(user): StaffUser,
    AppPath(id): AppPath<u64>,
) -> Result<Json<JSend<()>>, ApiError> {
    user.require(perms::DELETE_SUBJECT)?;

    if !state.db.delete_subject(id).map_err(storage_error)? {
        return Err(ApiError::not_found("Subject not found"));
    }

    tracing::debug!(subject_id = id, "Deleted subject");
    Ok(JSend::success(()))
}

// --- Courses ----------------------------------------------------------------

pub async fn admin_list_courses(
    State(state): State<Arc<AppState>>,
    StaffUser(user): StaffUser,
    AppQuery(params): AppQuery<AdminCourseParams>,
) -> Result<Json<JSendPaginated<AdminCourseResponse>>, ApiError> {
    user.require(perms::VIEW_COURSE)?;
    if params.limit == 0 {
        return Err(ApiError::bad_request("limit must be greater than 0"));
    }

    let (created_from, created_until) = match params.created {
        Some(filter) => filter
            .bounds(Utc::now())
            .map(|(from, until)| (Some(from), Some(until)))
            .ok_or_else(|| ApiError::bad_request("created filter is out of range"))?,
        None => (None, None),
    };
    let search = CourseSearch {
        subject_id: params.subject,
        created_from,
        created_until,
        text: params.q.clone().filter(|q| !q.trim().is_empty()),
    };

    let courses = state.db.search_courses(&search).map_err(storage_error)?;
    let subjects = state.db.list_subjects().map_err(storage_error)?;

    let page = PageParams {
        limit: params.limit,
        offset: params.offset,
    };
    Ok(paginate(&courses, &page, |course: &Course| {
        AdminCourseResponse {
            course: course_to_response(course),
            subject: subjects
                .iter()
                .find(|s| s.id == course.subject_id)
                .map(|s| s.title.clone()),
        }
    }))
}

/// A course with its inline modules
pub async fn admin_get_course(
    State(state): State<Arc<AppState>>,
    StaffUser(user): StaffUser,
    AppPath(id): AppPath<u64>,
) -> Result<Json<JSend<CourseModulesResponse>>, ApiError> {
    user.require(perms::VIEW_COURSE)?;

    let course = state
        .db
        .get_course(id)
        .map_err(storage_error)?
        .ok_or_else(|| ApiError::not_found("Course not found"))?;
    course_with_modules(&state, course)
}

pub async fn admin_create_course(
    State(state): State<Arc<AppState>>,
    StaffUser(user): StaffUser,
    AppJson(form): AppJson<AdminCourseForm>,
) -> Result<Json<JSend<CourseModulesResponse>>, ApiError> {
    user.require(perms::ADD_COURSE)?;

    let (fields, changes) = form.clean(&state.db, None)?;
    let forms = form.modules.unwrap_or_default();
    let course = state
        .db
        .save_course_with_modules(None, &fields, &changes)
        .map_err(storage_error)?
        .map_err(|rejection| course_rejection(&forms, rejection))?;

    tracing::debug!(course_id = course.id, owner_id = course.owner_id, "Created course from admin");
    course_with_modules(&state, course)
}

pub async fn admin_update_course(
    State(state): State<Arc<AppState>>,
    StaffUser(user): StaffUser,
    AppPath(id): AppPath<u64>,
    AppJson(form): AppJson<AdminCourseForm>,
) -> Result<Json<JSend<CourseModulesResponse>>, ApiError> {
    user.require(perms::CHANGE_COURSE)?;
    if state.db.get_course(id).map_err(storage_error)?.is_none() {
        return Err(ApiError::not_found("Course not found"));
    }

    let (fields, changes) = form.clean(&state.db, Some(id))?;
    let forms = form.modules.unwrap_or_default();
    let course = state
        .db
        .save_course_with_modules(Some(id), &fields, &changes)
        .map_err(storage_error)?
        .map_err(|rejection| course_rejection(&forms, rejection))?;

    tracing::debug!(course_id = id, "Updated course from admin");
    course_with_modules(&state, course)
}

pub async fn admin_delete_course(
    State(state): State<Arc<AppState>>,
    StaffUser(user): StaffUser,
    AppPath(id): AppPath<u64>,
) -> Result<Json<JSend<()>>, ApiError> {
    user.require(perms::DELETE_COURSE)?;

    if !state.db.delete_course(id).map_err(storage_error)? {
        return Err(ApiError::not_found("Course not found"));
    }

    tracing::debug!(course_id = id, "Deleted course from admin");
    Ok(JSend::success(()))
}

// --- Users ------------------------------------------------------------------

pub async fn admin_list_users(
    State(state): State<Arc<AppState>>,
    StaffUser(user): StaffUser,
) -> Result<Json<JSend<Vec<UserResponse>>>, ApiError> {
    user.require_superuser()?;

    let users = state.db.list_users().map_err(storage_error)?;
    Ok(JSend::success(users.iter().map(user_to_response).collect()))
}

pub async fn admin_create_user(
    State(state): State<Arc<AppState>>,
    StaffUser(user): StaffUser,
    AppJson(form): AppJson<UserForm>,
) -> Result<Json<JSend<UserResponse>>, ApiError> {
    user.require_superuser()?;

    let fields = form.clean(&state.db)?;
    let iterations = state.config.auth.password_hash_iterations;
    let password = fields.password.clone();
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password, iterations))
        .await
        .map_err(|e| ApiError::internal(format!("Password hashing failed: {e}")))?
        .map_err(|e| ApiError::internal(e.to_string()))?;

    let created = state
        .db
        .create_user(NewUser {
            username: fields.username,
            password_hash,
            is_staff: fields.is_staff,
            is_superuser: fields.is_superuser,
            permissions: fields.permissions,
        })
        .map_err(storage_error)?;

    let Some(created) = created else {
        let mut errors = FieldErrors::new();
        errors.add("username", "A user with that username already exists.");
        return Err(ApiError::invalid(errors));
    };

    tracing::debug!(user_id = created.id, username = %created.username, "Created user");
    Ok(JSend::success(user_to_response(&created)))
}

pub async fn admin_set_user_permissions(
    State(state): State<Arc<AppState>>,
    StaffUser(user): StaffUser,
    AppPath(id): AppPath<u64>,
    AppJson(req): AppJson<PermissionsRequest>,
) -> Result<Json<JSend<UserResponse>>, ApiError> {
    user.require_superuser()?;

    let permissions = clean_permissions(&req.permissions).map_err(ApiError::invalid)?;
    let updated = state
        .db
        .set_user_permissions(id, permissions)
        .map_err(storage_error)?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    tracing::debug!(user_id = id, permissions = updated.permissions.len(), "Set user permissions");
    Ok(JSend::success(user_to_response(&updated)))
}

// ============================================================================
// Helpers
// ============================================================================

fn existing_subject(state: &AppState, id: u64) -> Result<Subject, ApiError> {
    state
        .db
        .get_subject(id)
        .map_err(storage_error)?
        .ok_or_else(|| ApiError::not_found("Subject not found"))
}

fn course_with_modules(
    state: &AppState,
    course: Course,
) -> Result<Json<JSend<CourseModulesResponse>>, ApiError> {
    let modules = state.db.list_modules(course.id).map_err(storage_error)?;
    Ok(JSend::success(CourseModulesResponse {
        course: course_to_response(&course),
        modules: modules.iter().map(module_to_response).collect(),
    }))
}

fn paginate<T, R: Serialize>(
    rows: &[T],
    params: &PageParams,
    to_response: impl Fn(&T) -> R,
) -> Json<JSendPaginated<R>> {
    let total = rows.len() as u64;
    let items = rows
        .iter()
        .skip(params.offset as usize)
        .take(params.limit as usize)
        .map(to_response)
        .collect();

    JSendPaginated::success(
        items,
        Pagination {
            limit: params.limit,
            offset: params.offset,
            total,
        },
    )
}

fn subject_to_response(subject: &Subject) -> SubjectResponse {
    SubjectResponse {
        id: subject.id,
        title: subject.title.clone(),
        slug: subject.slug.clone(),
    }
}
