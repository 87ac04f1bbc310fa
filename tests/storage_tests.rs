use std::collections::BTreeSet;

use chrono::{Duration, Utc};
use course_manager::storage::models::{
    Course, CourseFields, ItemBody, ItemKind, ModuleChange, ModuleFields, SessionRecord,
    StoredFile,
};
use course_manager::storage::ordering::MAX_ORDER;
use course_manager::storage::{
    CourseRejection, CourseSearch, Database, DatabaseError, FormsetRejection, NewUser,
};

fn test_db() -> (tempfile::TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path().join("data")).unwrap();
    (dir, db)
}

fn test_user(db: &Database, username: &str) -> u64 {
    db.create_user(NewUser {
        username: username.to_string(),
        password_hash: "pbkdf2_sha256$1$c2FsdA$aGFzaA".to_string(),
        ..NewUser::default()
    })
    .unwrap()
    .expect("username should be free")
    .id
}

fn course_fields(owner_id: u64, subject_id: u64, slug: &str) -> CourseFields {
    CourseFields {
        owner_id,
        subject_id,
        title: "Django Basics".to_string(),
        slug: slug.to_string(),
        overview: "Learn Django".to_string(),
    }
}

fn module_fields(title: &str) -> ModuleFields {
    ModuleFields {
        title: title.to_string(),
        description: String::new(),
    }
}

fn text(content: &str) -> ItemBody {
    ItemBody::Text {
        content: content.to_string(),
    }
}

/// A subject, an owner and one of their courses
fn seeded_course(db: &Database) -> (u64, Course) {
    let owner = test_user(db, "alice");
    let subject = db.create_subject("Programming", "programming").unwrap();
    let course = db
        .create_course(&course_fields(owner, subject.id, "django-basics"))
        .unwrap()
        .unwrap();
    (owner, course)
}

// ============================================================================
// Ordering
// ============================================================================

#[test]
fn test_modules_get_sequential_order_from_zero() {
    let (_dir, db) = test_db();
    let (_, course) = seeded_course(&db);

    for title in ["Intro", "Models", "Views"] {
        db.create_module(course.id, &module_fields(title), None)
            .unwrap();
    }

    let orders: Vec<_> = db
        .list_modules(course.id)
        .unwrap()
        .iter()
        .map(|m| m.order)
        .collect();
    assert_eq!(orders, vec![Some(0), Some(1), Some(2)]);
}

#[test]
fn test_explicit_order_is_kept_and_next_follows_it() {
    let (_dir, db) = test_db();
    let (_, course) = seeded_course(&db);

    let pinned = db
        .create_module(course.id, &module_fields("Pinned"), Some(5))
        .unwrap();
    let next = db
        .create_module(course.id, &module_fields("Next"), None)
        .unwrap();

    assert_eq!(pinned.order, Some(5));
    assert_eq!(next.order, Some(6));
}

#[test]
fn test_order_is_scoped_per_course() {
    let (_dir, db) = test_db();
    let (owner, first) = seeded_course(&db);
    let second = db
        .create_course(&course_fields(owner, first.subject_id, "flask-basics"))
        .unwrap()
        .unwrap();

    db.create_module(first.id, &module_fields("A"), None).unwrap();
    db.create_module(first.id, &module_fields("B"), None).unwrap();
    let other = db
        .create_module(second.id, &module_fields("X"), None)
        .unwrap();

    assert_eq!(other.order, Some(0));
}

#[test]
fn test_contents_are_ordered_within_module() {
    let (_dir, db) = test_db();
    let (owner, course) = seeded_course(&db);
    let intro = db.create_module(course.id, &module_fields("Intro"), None).unwrap();
    let setup = db.create_module(course.id, &module_fields("Setup"), None).unwrap();

    let (_, first) = db.create_module_item(intro.id, owner, "Welcome", text("hi")).unwrap();
    let (_, second) = db.create_module_item(intro.id, owner, "Goals", text("goals")).unwrap();
    let (_, elsewhere) = db.create_module_item(setup.id, owner, "Install", text("pip")).unwrap();

    assert_eq!(first.order, Some(0));
    assert_eq!(second.order, Some(1));
    assert_eq!(elsewhere.order, Some(0));
}

#[test]
fn test_ties_in_order_fall_back_to_creation() {
    let (_dir, db) = test_db();
    let (_, course) = seeded_course(&db);
    let a = db.create_module(course.id, &module_fields("A"), Some(1)).unwrap();
    let b = db.create_module(course.id, &module_fields("B"), Some(1)).unwrap();
    let c = db.create_module(course.id, &module_fields("C"), Some(0)).unwrap();

    let ids: Vec<_> = db.list_modules(course.id).unwrap().iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![c.id, a.id, b.id]);
}

#[test]
fn test_next_order_after_max_is_refused() {
    let (_dir, db) = test_db();
    let (owner, course) = seeded_course(&db);
    let last = db.create_module(course.id, &module_fields("Last"), None).unwrap();
    assert!(db.set_module_order(last.id, owner, MAX_ORDER).unwrap());

    let result = db.create_module(course.id, &module_fields("Overflow"), None);
    assert!(matches!(result, Err(DatabaseError::OrderExhausted(MAX_ORDER))));

    let formset = db.apply_module_formset(
        course.id,
        &[ModuleChange::Create(module_fields("Overflow"))],
    );
    assert!(matches!(formset, Err(DatabaseError::OrderExhausted(_))));
    assert_eq!(db.list_modules(course.id).unwrap().len(), 1);
}

#[test]
fn test_module_order_just_below_max_still_advances() {
    let (_dir, db) = test_db();
    let (owner, course) = seeded_course(&db);
    let module = db.create_module(course.id, &module_fields("A"), None).unwrap();
    assert!(db.set_module_order(module.id, owner, MAX_ORDER - 1).unwrap());

    let next = db.create_module(course.id, &module_fields("B"), None).unwrap();
    assert_eq!(next.order, Some(MAX_ORDER));
}

#[test]
fn test_content_order_after_max_is_refused() {
    let (_dir, db) = test_db();
    let (owner, course) = seeded_course(&db);
    let module = db.create_module(course.id, &module_fields("Intro"), None).unwrap();
    let (item, content) = db.create_module_item(module.id, owner, "A", text("a")).unwrap();
    assert!(db.set_content_order(content.id, owner, MAX_ORDER).unwrap());

    let result = db.create_module_item(module.id, owner, "B", text("b"));
    assert!(matches!(result, Err(DatabaseError::OrderExhausted(MAX_ORDER))));
    assert_eq!(db.list_contents(module.id).unwrap().len(), 1);
    assert!(db.get_item(ItemKind::Text, item.id + 1).unwrap().is_none());
}

// ============================================================================
// Catalog
// ============================================================================

#[test]
fn test_subjects_are_listed_by_title() {
    let (_dir, db) = test_db();
    db.create_subject("Programming", "programming").unwrap();
    db.create_subject("Design", "design").unwrap();
    db.create_subject("Mathematics", "mathematics").unwrap();

    let titles: Vec<_> = db
        .list_subjects()
        .unwrap()
        .into_iter()
        .map(|s| s.title)
        .collect();
    assert_eq!(titles, vec!["Design", "Mathematics", "Programming"]);
}

#[test]
fn test_subject_slug_index_follows_updates() {
    let (_dir, db) = test_db();
    let subject = db.create_subject("Programming", "programming").unwrap();

    db.update_subject(subject.id, "Coding", "coding").unwrap().unwrap();

    assert_eq!(db.subject_slug_owner("programming").unwrap(), None);
    assert_eq!(db.subject_slug_owner("coding").unwrap(), Some(subject.id));
}

#[test]
fn test_owned_course_lookup_filters_by_owner() {
    let (_dir, db) = test_db();
    let (owner, course) = seeded_course(&db);
    let stranger = test_user(&db, "bob");

    assert!(db.get_owned_course(course.id, owner).unwrap().is_some());
    assert!(db.get_owned_course(course.id, stranger).unwrap().is_none());
    assert!(db.list_courses_by_owner(stranger).unwrap().is_empty());
}

#[test]
fn test_course_update_preserves_created_at_and_moves_slug() {
    let (_dir, db) = test_db();
    let (owner, course) = seeded_course(&db);

    let mut fields = course_fields(owner, course.subject_id, "django-intro");
    fields.title = "Django Intro".to_string();
    let updated = db.update_course(course.id, &fields).unwrap().unwrap();

    assert_eq!(updated.created_at, course.created_at);
    assert_eq!(updated.title, "Django Intro");
    assert_eq!(db.course_slug_owner("django-basics").unwrap(), None);
    assert_eq!(db.course_slug_owner("django-intro").unwrap(), Some(course.id));
}

#[test]
fn test_course_slug_is_unique_in_store() {
    let (_dir, db) = test_db();
    let (owner, course) = seeded_course(&db);

    let duplicate = db
        .create_course(&course_fields(owner, course.subject_id, "django-basics"))
        .unwrap();
    assert_eq!(duplicate, Err(CourseRejection::SlugTaken(course.id)));
    assert_eq!(db.list_courses().unwrap().len(), 1);

    let other = db
        .create_course(&course_fields(owner, course.subject_id, "flask-basics"))
        .unwrap()
        .unwrap();
    let stolen = db
        .update_course(other.id, &course_fields(owner, course.subject_id, "django-basics"))
        .unwrap();
    assert_eq!(stolen, Err(CourseRejection::SlugTaken(course.id)));
    assert_eq!(db.course_slug_owner("django-basics").unwrap(), Some(course.id));
    assert_eq!(db.course_slug_owner("flask-basics").unwrap(), Some(other.id));

    // Keeping its own slug is fine
    let kept = db
        .update_course(course.id, &course_fields(owner, course.subject_id, "django-basics"))
        .unwrap();
    assert!(kept.is_ok());
}

#[test]
fn test_update_of_missing_course_is_rejected() {
    let (_dir, db) = test_db();
    let owner = test_user(&db, "alice");
    let subject = db.create_subject("Programming", "programming").unwrap();

    let result = db
        .update_course(42, &course_fields(owner, subject.id, "ghost"))
        .unwrap();
    assert_eq!(result, Err(CourseRejection::NotFound));
    assert!(db.course_slug_owner("ghost").unwrap().is_none());
}

#[test]
fn test_save_course_with_taken_slug_writes_nothing() {
    let (_dir, db) = test_db();
    let (owner, course) = seeded_course(&db);

    let result = db
        .save_course_with_modules(
            None,
            &course_fields(owner, course.subject_id, "django-basics"),
            &[ModuleChange::Create(module_fields("Intro"))],
        )
        .unwrap();

    assert_eq!(result, Err(CourseRejection::SlugTaken(course.id)));
    assert_eq!(db.list_courses().unwrap().len(), 1);
    assert!(db.list_modules(course.id).unwrap().is_empty());
}

#[test]
fn test_subject_delete_cascades_to_courses_modules_and_contents() {
    let (_dir, db) = test_db();
    let (owner, course) = seeded_course(&db);
    let module = db.create_module(course.id, &module_fields("Intro"), None).unwrap();
    let (item, content) = db.create_module_item(module.id, owner, "Welcome", text("hi")).unwrap();

    assert!(db.delete_subject(course.subject_id).unwrap());

    assert!(db.get_course(course.id).unwrap().is_none());
    assert!(db.get_module(module.id).unwrap().is_none());
    assert!(db.get_content(content.id).unwrap().is_none());
    assert!(db.course_slug_owner("django-basics").unwrap().is_none());
    // Items are owned by users, not modules
    assert!(db.get_item(ItemKind::Text, item.id).unwrap().is_some());
}

#[test]
fn test_module_delete_keeps_items() {
    let (_dir, db) = test_db();
    let (owner, course) = seeded_course(&db);
    let module = db.create_module(course.id, &module_fields("Intro"), None).unwrap();
    let (item, content) = db.create_module_item(module.id, owner, "Welcome", text("hi")).unwrap();

    assert!(db.delete_module(module.id).unwrap());

    assert!(db.get_content(content.id).unwrap().is_none());
    assert!(db.list_contents(module.id).unwrap().is_empty());
    assert!(db.get_item(ItemKind::Text, item.id).unwrap().is_some());
}

#[test]
fn test_course_search_filters() {
    let (_dir, db) = test_db();
    let (owner, django) = seeded_course(&db);
    let design = db.create_subject("Design", "design").unwrap();
    let mut fields = course_fields(owner, design.id, "typography");
    fields.title = "Typography".to_string();
    fields.overview = "Choosing fonts for the web".to_string();
    let typography = db.create_course(&fields).unwrap().unwrap();

    let by_subject = CourseSearch {
        subject_id: Some(design.id),
        ..CourseSearch::default()
    };
    let found = db.search_courses(&by_subject).unwrap();
    assert_eq!(found, vec![typography.clone()]);

    let by_text = CourseSearch {
        text: Some("DJANGO learn".to_string()),
        ..CourseSearch::default()
    };
    assert_eq!(db.search_courses(&by_text).unwrap(), vec![django.clone()]);

    let future = CourseSearch {
        created_from: Some(Utc::now() + Duration::days(1)),
        ..CourseSearch::default()
    };
    assert!(db.search_courses(&future).unwrap().is_empty());

    // Newest first
    let all = db.search_courses(&CourseSearch::default()).unwrap();
    assert_eq!(all, vec![typography, django]);
}

// ============================================================================
// Module formset
// ============================================================================

#[test]
fn test_formset_applies_deletes_updates_and_creates() {
    let (_dir, db) = test_db();
    let (_, course) = seeded_course(&db);
    let intro = db.create_module(course.id, &module_fields("Intro"), None).unwrap();
    let models = db.create_module(course.id, &module_fields("Models"), None).unwrap();

    let modules = db
        .apply_module_formset(
            course.id,
            &[
                ModuleChange::Update(intro.id, module_fields("Introduction")),
                ModuleChange::Delete(models.id),
                ModuleChange::Create(module_fields("Views")),
            ],
        )
        .unwrap()
        .unwrap();

    let summary: Vec<_> = modules.iter().map(|m| (m.title.as_str(), m.order)).collect();
    assert_eq!(summary, vec![("Introduction", Some(0)), ("Views", Some(1))]);
}

#[test]
fn test_formset_with_foreign_module_changes_nothing() {
    let (_dir, db) = test_db();
    let (owner, course) = seeded_course(&db);
    let other = db
        .create_course(&course_fields(owner, course.subject_id, "other"))
        .unwrap()
        .unwrap();
    let foreign = db.create_module(other.id, &module_fields("Foreign"), None).unwrap();

    let result = db
        .apply_module_formset(
            course.id,
            &[
                ModuleChange::Create(module_fields("New")),
                ModuleChange::Delete(foreign.id),
            ],
        )
        .unwrap();

    assert_eq!(result, Err(FormsetRejection::ForeignModule(foreign.id)));
    assert!(db.list_modules(course.id).unwrap().is_empty());
    assert!(db.get_module(foreign.id).unwrap().is_some());
}

#[test]
fn test_formset_for_missing_course() {
    let (_dir, db) = test_db();
    let result = db
        .apply_module_formset(42, &[ModuleChange::Create(module_fields("New"))])
        .unwrap();
    assert_eq!(result, Err(FormsetRejection::CourseNotFound));
}

#[test]
fn test_save_course_with_modules_creates_both() {
    let (_dir, db) = test_db();
    let owner = test_user(&db, "alice");
    let subject = db.create_subject("Programming", "programming").unwrap();

    let course = db
        .save_course_with_modules(
            None,
            &course_fields(owner, subject.id, "django-basics"),
            &[
                ModuleChange::Create(module_fields("Intro")),
                ModuleChange::Create(module_fields("Models")),
            ],
        )
        .unwrap()
        .unwrap();

    let titles: Vec<_> = db
        .list_modules(course.id)
        .unwrap()
        .into_iter()
        .map(|m| m.title)
        .collect();
    assert_eq!(titles, vec!["Intro", "Models"]);
}

#[test]
fn test_save_course_with_rejected_modules_rolls_back_course() {
    let (_dir, db) = test_db();
    let (owner, course) = seeded_course(&db);
    let foreign = db.create_module(course.id, &module_fields("Intro"), None).unwrap();

    let result = db
        .save_course_with_modules(
            None,
            &course_fields(owner, course.subject_id, "new-course"),
            &[ModuleChange::Delete(foreign.id)],
        )
        .unwrap();

    assert_eq!(
        result,
        Err(CourseRejection::Modules(FormsetRejection::ForeignModule(
            foreign.id
        )))
    );
    assert!(db.course_slug_owner("new-course").unwrap().is_none());
    assert_eq!(db.list_courses().unwrap().len(), 1);
}

// ============================================================================
// Items and contents
// ============================================================================

#[test]
fn test_item_update_replaces_body_and_bumps_updated_at() {
    let (_dir, db) = test_db();
    let owner = test_user(&db, "alice");
    let file = StoredFile {
        key: "files/u1/notes.pdf".to_string(),
        name: "notes.pdf".to_string(),
        mime_type: "application/pdf".to_string(),
        byte_size: 3,
    };
    let item = db
        .create_item(owner, "Notes", ItemBody::File { file: file.clone() })
        .unwrap();

    let replacement = StoredFile {
        key: "files/u2/notes-v2.pdf".to_string(),
        ..file
    };
    let updated = db
        .update_item(
            ItemKind::File,
            item.id,
            "Notes v2",
            ItemBody::File {
                file: replacement.clone(),
            },
        )
        .unwrap()
        .unwrap();

    assert_eq!(updated.title, "Notes v2");
    assert_eq!(updated.body.stored_file(), Some(&replacement));
    assert_eq!(updated.created_at, item.created_at);
    assert!(updated.updated_at >= item.updated_at);
}

#[test]
fn test_item_ids_are_per_kind() {
    let (_dir, db) = test_db();
    let owner = test_user(&db, "alice");

    let note = db.create_item(owner, "Note", text("hi")).unwrap();
    let video = db
        .create_item(
            owner,
            "Lecture",
            ItemBody::Video {
                url: "https://example.com/v".to_string(),
            },
        )
        .unwrap();

    assert_eq!(note.id, 1);
    assert_eq!(video.id, 1);
    assert!(db.get_item(ItemKind::Video, note.id).unwrap().is_some());
    assert_eq!(db.get_item(ItemKind::Text, 1).unwrap().unwrap().title, "Note");
}

#[test]
fn test_owned_item_and_content_lookups() {
    let (_dir, db) = test_db();
    let (owner, course) = seeded_course(&db);
    let stranger = test_user(&db, "bob");
    let module = db.create_module(course.id, &module_fields("Intro"), None).unwrap();
    let (item, content) = db.create_module_item(module.id, owner, "Welcome", text("hi")).unwrap();

    assert!(db.get_owned_item(ItemKind::Text, item.id, owner).unwrap().is_some());
    assert!(db.get_owned_item(ItemKind::Text, item.id, stranger).unwrap().is_none());
    assert!(db.get_owned_content(content.id, owner).unwrap().is_some());
    assert!(db.get_owned_content(content.id, stranger).unwrap().is_none());
    assert!(db.get_owned_module(module.id, stranger).unwrap().is_none());
}

#[test]
fn test_dangling_content_lists_without_item() {
    let (_dir, db) = test_db();
    let (owner, course) = seeded_course(&db);
    let module = db.create_module(course.id, &module_fields("Intro"), None).unwrap();
    let (item, _) = db.create_module_item(module.id, owner, "Welcome", text("hi")).unwrap();

    db.delete_item(ItemKind::Text, item.id).unwrap();

    let rows = db.list_module_items(module.id).unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].1.is_none());
}

#[test]
fn test_content_delete_leaves_siblings() {
    let (_dir, db) = test_db();
    let (owner, course) = seeded_course(&db);
    let module = db.create_module(course.id, &module_fields("Intro"), None).unwrap();
    let (_, first) = db.create_module_item(module.id, owner, "A", text("a")).unwrap();
    let (_, second) = db.create_module_item(module.id, owner, "B", text("b")).unwrap();

    assert!(db.delete_content(first.id).unwrap());
    assert!(!db.delete_content(first.id).unwrap());

    let ids: Vec<_> = db.list_contents(module.id).unwrap().iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![second.id]);
}

// ============================================================================
// Reordering
// ============================================================================

#[test]
fn test_set_module_order_requires_ownership() {
    let (_dir, db) = test_db();
    let (owner, course) = seeded_course(&db);
    let stranger = test_user(&db, "bob");
    let module = db.create_module(course.id, &module_fields("Intro"), None).unwrap();

    assert!(!db.set_module_order(module.id, stranger, 7).unwrap());
    assert_eq!(db.get_module(module.id).unwrap().unwrap().order, Some(0));

    assert!(db.set_module_order(module.id, owner, 7).unwrap());
    assert_eq!(db.get_module(module.id).unwrap().unwrap().order, Some(7));

    assert!(!db.set_module_order(9999, owner, 1).unwrap());
}

#[test]
fn test_set_content_order_requires_ownership() {
    let (_dir, db) = test_db();
    let (owner, course) = seeded_course(&db);
    let stranger = test_user(&db, "bob");
    let module = db.create_module(course.id, &module_fields("Intro"), None).unwrap();
    let (_, content) = db.create_module_item(module.id, owner, "A", text("a")).unwrap();

    assert!(!db.set_content_order(content.id, stranger, 3).unwrap());
    assert!(db.set_content_order(content.id, owner, 3).unwrap());
    assert_eq!(db.get_content(content.id).unwrap().unwrap().order, Some(3));
}

// ============================================================================
// Users and sessions
// ============================================================================

#[test]
fn test_usernames_are_unique() {
    let (_dir, db) = test_db();
    test_user(&db, "alice");

    let duplicate = db
        .create_user(NewUser {
            username: "alice".to_string(),
            ..NewUser::default()
        })
        .unwrap();
    assert!(duplicate.is_none());
}

#[test]
fn test_superuser_is_staff_and_holds_every_permission() {
    let (_dir, db) = test_db();
    let admin = db
        .create_user(NewUser {
            username: "admin".to_string(),
            is_superuser: true,
            ..NewUser::default()
        })
        .unwrap()
        .unwrap();

    assert!(admin.is_staff);
    assert!(admin.has_perm("courses.delete_subject"));
}

#[test]
fn test_permissions_can_be_replaced() {
    let (_dir, db) = test_db();
    let id = test_user(&db, "alice");

    let perms: BTreeSet<String> = ["courses.add_course".to_string()].into();
    let user = db.set_user_permissions(id, perms).unwrap().unwrap();

    assert!(user.has_perm("courses.add_course"));
    assert!(!user.has_perm("courses.delete_course"));
    assert!(db.set_user_permissions(9999, BTreeSet::new()).unwrap().is_none());
}

#[test]
fn test_session_round_trip_and_delete() {
    let (_dir, db) = test_db();
    let user_id = test_user(&db, "alice");
    let now = Utc::now();
    let session = SessionRecord {
        user_id,
        created_at: now,
        expires_at: now + Duration::hours(1),
    };

    db.put_session("digest", &session).unwrap();
    let stored = db.get_session("digest").unwrap().unwrap();
    assert_eq!(stored.user_id, user_id);
    assert!(!stored.is_expired(now));
    assert!(stored.is_expired(now + Duration::hours(2)));

    assert!(db.delete_session("digest").unwrap());
    assert!(db.get_session("digest").unwrap().is_none());
}
