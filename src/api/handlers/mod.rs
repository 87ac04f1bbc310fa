mod admin;
mod contents;
mod courses;
mod media;
mod session;

use std::collections::BTreeMap;

use crate::api::response::ApiError;
use crate::forms::FieldErrors;
use crate::object_store::ObjectStoreError;
use crate::storage::ordering::MAX_ORDER;
use crate::storage::DatabaseError;

pub use admin::{
    admin_create_course, admin_create_subject, admin_create_user, admin_delete_course,
    admin_delete_subject, admin_get_course, admin_get_subject, admin_list_courses,
    admin_list_subjects, admin_list_users, admin_set_user_permissions, admin_update_course,
    admin_update_subject, health,
};
pub use contents::{
    create_content, delete_content, edit_content_form, module_content_list, new_content_form,
    reorder_contents, update_content,
};
pub use courses::{
    create_course, delete_course, get_course, get_course_modules, list_courses, reorder_modules,
    update_course, update_course_modules,
};
pub use media::serve_media;
pub use session::{login, logout, me};

/// Map a storage failure to a 500, logging the cause. A scope whose order
/// range is used up is reported as a field error instead.
pub(crate) fn storage_error(e: DatabaseError) -> ApiError {
    if let DatabaseError::OrderExhausted(last) = e {
        tracing::warn!(last, "No order left for a new row");
        let mut errors = FieldErrors::new();
        errors.add("order", max_order_message());
        return ApiError::invalid(errors);
    }
    tracing::error!(error = %e, "Storage failure");
    ApiError::internal(e.to_string())
}

fn max_order_message() -> String {
    format!("Ensure this value is less than or equal to {MAX_ORDER}.")
}

/// Reject a reorder batch holding any order beyond [`MAX_ORDER`] before
/// anything is written. Errors are keyed by the row id.
fn check_orders(orders: &BTreeMap<u64, u32>) -> Result<(), ApiError> {
    let mut errors = FieldErrors::new();
    for (id, order) in orders {
        if *order > MAX_ORDER {
            errors.add(id.to_string(), max_order_message());
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ApiError::invalid(errors))
    }
}

fn object_store_error(e: ObjectStoreError) -> ApiError {
    match e {
        ObjectStoreError::NotFound(_) => ApiError::not_found("File content not found"),
        _ => {
            tracing::error!(error = %e, "Object store failure");
            ApiError::internal(format!("Failed to access file storage: {e}"))
        }
    }
}
