use chrono::{DateTime, Utc};
use redb::{ReadableTable, WriteTransaction};

use super::db::{load, load_all, next_id, store, Database, DatabaseError};
use super::models::{Course, CourseFields, ModuleChange, Subject};
use super::modules::{apply_formset_in, delete_module_in, FormsetRejection};
use super::tables::*;

/// Why a course write was refused. Nothing is written when one is returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CourseRejection {
    NotFound,
    /// The slug belongs to the course with this id.
    SlugTaken(u64),
    Modules(FormsetRejection),
}

/// Admin course list filters. Every set filter must match.
#[derive(Debug, Clone, Default)]
pub struct CourseSearch {
    pub subject_id: Option<u64>,
    /// Inclusive lower bound on `created_at`
    pub created_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`
    pub created_until: Option<DateTime<Utc>>,
    /// Whitespace-separated terms; each must occur in the title or overview,
    /// ignoring case
    pub text: Option<String>,
}

impl CourseSearch {
    pub fn matches(&self, course: &Course) -> bool {
        if self.subject_id.is_some_and(|id| id != course.subject_id) {
            return false;
        }
        if self.created_from.is_some_and(|from| course.created_at < from) {
            return false;
        }
        if self.created_until.is_some_and(|until| course.created_at >= until) {
            return false;
        }
        match self.text {
            Some(ref text) => {
                let title = course.title.to_lowercase();
                let overview = course.overview.to_lowercase();
                text.split_whitespace().map(str::to_lowercase).all(|term| {
                    title.contains(&term) || overview.contains(&term)
                })
            }
            None => true,
        }
    }
}

impl Database {
    // ========================================================================
    // Subject operations
    // ========================================================================

    pub fn create_subject(&self, title: &str, slug: &str) -> Result<Subject, DatabaseError> {
        debug_assert!(!slug.is_empty(), "subject slug must not be empty");

        let write_txn = self.begin_write()?;
        let subject = {
            let id = next_id(&write_txn, "subjects")?;
            let subject = Subject {
                id,
                title: title.to_string(),
                slug: slug.to_string(),
            };
            let mut subjects = write_txn.open_table(SUBJECTS)?;
            store(&mut subjects, id, &subject)?;
            let mut slugs = write_txn.open_table(SUBJECT_SLUGS)?;
            slugs.insert(slug, id)?;
            subject
        };
        write_txn.commit()?;
        Ok(subject)
    }

    pub fn get_subject(&self, id: u64) -> Result<Option<Subject>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(SUBJECTS)?;
        load(&table, id)
    }

    /// All subjects ordered by title
    pub fn list_subjects(&self) -> Result<Vec<Subject>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(SUBJECTS)?;
        let mut subjects: Vec<Subject> = load_all(&table)?;
        subjects.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));
        Ok(subjects)
    }

    /// Id of the subject using `slug`, if any
    pub fn subject_slug_owner(&self, slug: &str) -> Result<Option<u64>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(SUBJECT_SLUGS)?;
        let owner = table.get(slug)?.map(|v| v.value());
        Ok(owner)
    }

    pub fn update_subject(
        &self,
        id: u64,
        title: &str,
        slug: &str,
    ) -> Result<Option<Subject>, DatabaseError> {
        let write_txn = self.begin_write()?;
        let updated = {
            let mut subjects = write_txn.open_table(SUBJECTS)?;
            match load::<Subject, _>(&subjects, id)? {
                Some(mut subject) => {
                    if subject.slug != slug {
                        let mut slugs = write_txn.open_table(SUBJECT_SLUGS)?;
                        slugs.remove(subject.slug.as_str())?;
                        slugs.insert(slug, id)?;
                    }
                    subject.title = title.to_string();
                    subject.slug = slug.to_string();
                    store(&mut subjects, id, &subject)?;
                    Some(subject)
                }
                None => None,
            }
        };
        write_txn.commit()?;
        Ok(updated)
    }

    /// Delete a subject together with its courses, their modules and contents
    pub fn delete_subject(&self, id: u64) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;

        let subject: Option<Subject> = {
            let subjects = write_txn.open_table(SUBJECTS)?;
            let result = load(&subjects, id)?;
            result
        };

        let deleted = match subject {
            Some(subject) => {
                let course_ids: Vec<u64> = {
                    let courses = write_txn.open_table(COURSES)?;
                    let all: Vec<Course> = load_all(&courses)?;
                    all.into_iter()
                        .filter(|c| c.subject_id == id)
                        .map(|c| c.id)
                        .collect()
                };
                for course_id in course_ids {
                    delete_course_in(&write_txn, course_id)?;
                }

                let mut subjects = write_txn.open_table(SUBJECTS)?;
                subjects.remove(id)?;
                let mut slugs = write_txn.open_table(SUBJECT_SLUGS)?;
                slugs.remove(subject.slug.as_str())?;
                true
            }
            None => false,
        };

        write_txn.commit()?;
        Ok(deleted)
    }

    // ========================================================================
    // Course operations
    // ========================================================================

    pub fn create_course(
        &self,
        fields: &CourseFields,
    ) -> Result<Result<Course, CourseRejection>, DatabaseError> {
        let write_txn = self.begin_write()?;
        let course = match insert_course_in(&write_txn, fields)? {
            Ok(course) => course,
            Err(rejection) => return Ok(Err(rejection)),
        };
        write_txn.commit()?;
        Ok(Ok(course))
    }

    pub fn get_course(&self, id: u64) -> Result<Option<Course>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(COURSES)?;
        load(&table, id)
    }

    /// Get a course only if `owner_id` owns it
    pub fn get_owned_course(&self, id: u64, owner_id: u64) -> Result<Option<Course>, DatabaseError> {
        Ok(self.get_course(id)?.filter(|c| c.owner_id == owner_id))
    }

    /// All courses, newest first
    pub fn list_courses(&self) -> Result<Vec<Course>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(COURSES)?;
        let mut courses: Vec<Course> = load_all(&table)?;
        courses.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(courses)
    }

    /// Courses matching `search`, newest first
    pub fn search_courses(&self, search: &CourseSearch) -> Result<Vec<Course>, DatabaseError> {
        let mut courses = self.list_courses()?;
        courses.retain(|c| search.matches(c));
        Ok(courses)
    }

    /// Courses owned by `owner_id`, newest first
    pub fn list_courses_by_owner(&self, owner_id: u64) -> Result<Vec<Course>, DatabaseError> {
        let mut courses = self.list_courses()?;
        courses.retain(|c| c.owner_id == owner_id);
        Ok(courses)
    }

    /// Id of the course using `slug`, if any
    pub fn course_slug_owner(&self, slug: &str) -> Result<Option<u64>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(COURSE_SLUGS)?;
        let owner = table.get(slug)?.map(|v| v.value());
        Ok(owner)
    }

    /// Overwrite a course's editable fields; `created_at` is preserved
    pub fn update_course(
        &self,
        id: u64,
        fields: &CourseFields,
    ) -> Result<Result<Course, CourseRejection>, DatabaseError> {
        let write_txn = self.begin_write()?;
        let course = match update_course_in(&write_txn, id, fields)? {
            Ok(course) => course,
            Err(rejection) => return Ok(Err(rejection)),
        };
        write_txn.commit()?;
        Ok(Ok(course))
    }

    /// Create (`id` is `None`) or update a course and apply its inline module
    /// changes in a single transaction.
    pub fn save_course_with_modules(
        &self,
        id: Option<u64>,
        fields: &CourseFields,
        changes: &[ModuleChange],
    ) -> Result<Result<Course, CourseRejection>, DatabaseError> {
        let write_txn = self.begin_write()?;
        let saved = match id {
            Some(id) => update_course_in(&write_txn, id, fields)?,
            None => insert_course_in(&write_txn, fields)?,
        };
        let course = match saved {
            Ok(course) => course,
            Err(rejection) => return Ok(Err(rejection)),
        };
        if let Err(rejection) = apply_formset_in(&write_txn, course.id, changes)? {
            return Ok(Err(CourseRejection::Modules(rejection)));
        }
        write_txn.commit()?;

        tracing::debug!(course_id = course.id, changes = changes.len(), "Saved course with modules");
        Ok(Ok(course))
    }

    /// Delete a course together with its modules and their contents
    pub fn delete_course(&self, id: u64) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;
        let deleted = delete_course_in(&write_txn, id)?;
        write_txn.commit()?;
        Ok(deleted)
    }
}

fn insert_course_in(
    txn: &WriteTransaction,
    fields: &CourseFields,
) -> Result<Result<Course, CourseRejection>, DatabaseError> {
    debug_assert!(!fields.slug.is_empty(), "course slug must not be empty");

    if let Some(owner) = slug_owner_in(txn, &fields.slug)? {
        return Ok(Err(CourseRejection::SlugTaken(owner)));
    }

    let id = next_id(txn, "courses")?;
    let course = Course {
        id,
        owner_id: fields.owner_id,
        subject_id: fields.subject_id,
        title: fields.title.clone(),
        slug: fields.slug.clone(),
        overview: fields.overview.clone(),
        created_at: Utc::now(),
    };
    let mut courses = txn.open_table(COURSES)?;
    store(&mut courses, id, &course)?;
    let mut slugs = txn.open_table(COURSE_SLUGS)?;
    slugs.insert(course.slug.as_str(), id)?;
    Ok(Ok(course))
}

fn update_course_in(
    txn: &WriteTransaction,
    id: u64,
    fields: &CourseFields,
) -> Result<Result<Course, CourseRejection>, DatabaseError> {
    if let Some(owner) = slug_owner_in(txn, &fields.slug)?.filter(|owner| *owner != id) {
        return Ok(Err(CourseRejection::SlugTaken(owner)));
    }

    let mut courses = txn.open_table(COURSES)?;
    let Some(mut course) = load::<Course, _>(&courses, id)? else {
        return Ok(Err(CourseRejection::NotFound));
    };
    if course.slug != fields.slug {
        let mut slugs = txn.open_table(COURSE_SLUGS)?;
        slugs.remove(course.slug.as_str())?;
        slugs.insert(fields.slug.as_str(), id)?;
    }
    course.owner_id = fields.owner_id;
    course.subject_id = fields.subject_id;
    course.title = fields.title.clone();
    course.slug = fields.slug.clone();
    course.overview = fields.overview.clone();
    store(&mut courses, id, &course)?;
    Ok(Ok(course))
}

fn slug_owner_in(txn: &WriteTransaction, slug: &str) -> Result<Option<u64>, DatabaseError> {
    let slugs = txn.open_table(COURSE_SLUGS)?;
    let owner = slugs.get(slug)?.map(|v| v.value());
    Ok(owner)
}

pub(crate) fn delete_course_in(txn: &WriteTransaction, id: u64) -> Result<bool, DatabaseError> {
    let course: Option<Course> = {
        let courses = txn.open_table(COURSES)?;
        let result = load(&courses, id)?;
        result
    };
    let Some(course) = course else {
        return Ok(false);
    };

    let module_ids = {
        let index = txn.open_table(COURSE_MODULES)?;
        let result = super::db::read_index(&index, id)?;
        result
    };
    for module_id in module_ids {
        delete_module_in(txn, module_id)?;
    }

    let mut courses = txn.open_table(COURSES)?;
    courses.remove(id)?;
    let mut slugs = txn.open_table(COURSE_SLUGS)?;
    slugs.remove(course.slug.as_str())?;
    let mut index = txn.open_table(COURSE_MODULES)?;
    index.remove(id)?;
    Ok(true)
}
