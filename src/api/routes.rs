use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Multipart framing on top of the largest allowed file
    let upload_limit = state.config.max_upload_size as usize + 64 * 1024;

    Router::new()
        // Authentication
        .route("/auth/login", post(handlers::login))
        .route("/auth/logout", post(handlers::logout))
        .route("/auth/me", get(handlers::me))
        // Instructor course management
        .route(
            "/courses",
            get(handlers::list_courses).post(handlers::create_course),
        )
        .route(
            "/courses/:id",
            get(handlers::get_course)
                .put(handlers::update_course)
                .delete(handlers::delete_course),
        )
        .route(
            "/courses/:id/modules",
            get(handlers::get_course_modules).put(handlers::update_course_modules),
        )
        // Module contents
        .route(
            "/modules/:module_id/contents",
            get(handlers::module_content_list),
        )
        .route(
            "/modules/:module_id/contents/:model_name",
            get(handlers::new_content_form)
                .post(handlers::create_content)
                .layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/modules/:module_id/contents/:model_name/:id",
            get(handlers::edit_content_form)
                .put(handlers::update_content)
                .layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/contents/:id", delete(handlers::delete_content))
        // Drag-and-drop ordering
        .route("/order/modules", post(handlers::reorder_modules))
        .route("/order/contents", post(handlers::reorder_contents))
        // Admin
        .route(
            "/admin/subjects",
            get(handlers::admin_list_subjects).post(handlers::admin_create_subject),
        )
        .route(
            "/admin/subjects/:id",
            get(handlers::admin_get_subject)
                .put(handlers::admin_update_subject)
                .delete(handlers::admin_delete_subject),
        )
        .route(
            "/admin/courses",
            get(handlers::admin_list_courses).post(handlers::admin_create_course),
        )
        .route(
            "/admin/courses/:id",
            get(handlers::admin_get_course)
                .put(handlers::admin_update_course)
                .delete(handlers::admin_delete_course),
        )
        .route(
            "/admin/users",
            get(handlers::admin_list_users).post(handlers::admin_create_user),
        )
        .route(
            "/admin/users/:id/permissions",
            put(handlers::admin_set_user_permissions),
        )
        // Uploaded media
        .route("/media/*key", get(handlers::serve_media))
        // Internal
        .route("/_internal/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
