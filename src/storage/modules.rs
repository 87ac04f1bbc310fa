use redb::WriteTransaction;

use super::db::{
    index_insert, index_remove, load, next_id, read_index, store, Database, DatabaseError,
};
use super::models::{Course, Module, ModuleChange, ModuleFields};
use super::ordering::{assign_order, sort_by_order};
use super::tables::*;

/// Why a formset could not be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormsetRejection {
    CourseNotFound,
    /// An update or delete names a module of another course.
    ForeignModule(u64),
}

impl Database {
    // ========================================================================
    // Module operations
    // ========================================================================

    /// Create a module in `course_id`. Without an explicit `order` it is
    /// placed after the course's last module.
    pub fn create_module(
        &self,
        course_id: u64,
        fields: &ModuleFields,
        order: Option<u32>,
    ) -> Result<Module, DatabaseError> {
        let write_txn = self.begin_write()?;
        let module = insert_module_in(&write_txn, course_id, fields, order)?;
        write_txn.commit()?;

        tracing::debug!(module_id = module.id, course_id, order = ?module.order, "Created module");
        Ok(module)
    }

    pub fn get_module(&self, id: u64) -> Result<Option<Module>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(MODULES)?;
        load(&table, id)
    }

    /// Get a module only if its course is owned by `owner_id`
    pub fn get_owned_module(
        &self,
        id: u64,
        owner_id: u64,
    ) -> Result<Option<(Module, Course)>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let modules = read_txn.open_table(MODULES)?;
        let Some(module) = load::<Module, _>(&modules, id)? else {
            return Ok(None);
        };

        let courses = read_txn.open_table(COURSES)?;
        let course = load::<Course, _>(&courses, module.course_id)?;
        Ok(course
            .filter(|c| c.owner_id == owner_id)
            .map(|c| (module, c)))
    }

    /// Modules of a course, by order
    pub fn list_modules(&self, course_id: u64) -> Result<Vec<Module>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let index = read_txn.open_table(COURSE_MODULES)?;
        let modules = read_txn.open_table(MODULES)?;

        let mut rows = Vec::new();
        for module_id in read_index(&index, course_id)? {
            if let Some(module) = load::<Module, _>(&modules, module_id)? {
                rows.push(module);
            }
        }
        sort_by_order(&mut rows, |m| m.id);
        Ok(rows)
    }

    /// Delete a module and its content associations. The items the contents
    /// point at are left in place.
    pub fn delete_module(&self, id: u64) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;
        let deleted = delete_module_in(&write_txn, id)?;
        write_txn.commit()?;
        Ok(deleted)
    }

    /// Apply a whole module formset for `course_id` in one transaction.
    ///
    /// Every update and delete must target a module of that course; if any
    /// does not, nothing is written. Returns the course's modules afterwards.
    pub fn apply_module_formset(
        &self,
        course_id: u64,
        changes: &[ModuleChange],
    ) -> Result<Result<Vec<Module>, FormsetRejection>, DatabaseError> {
        let write_txn = self.begin_write()?;
        {
            let courses = write_txn.open_table(COURSES)?;
            if load::<Course, _>(&courses, course_id)?.is_none() {
                return Ok(Err(FormsetRejection::CourseNotFound));
            }
        }
        if let Err(rejection) = apply_formset_in(&write_txn, course_id, changes)? {
            return Ok(Err(rejection));
        }
        write_txn.commit()?;

        tracing::debug!(course_id, changes = changes.len(), "Applied module formset");
        Ok(Ok(self.list_modules(course_id)?))
    }

    /// Set a module's order if its course is owned by `owner_id`.
    /// Returns whether the row was updated.
    pub fn set_module_order(
        &self,
        id: u64,
        owner_id: u64,
        order: u32,
    ) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;
        let updated = {
            let mut modules = write_txn.open_table(MODULES)?;
            let courses = write_txn.open_table(COURSES)?;
            match load::<Module, _>(&modules, id)? {
                Some(mut module) => {
                    let owned = load::<Course, _>(&courses, module.course_id)?
                        .is_some_and(|c| c.owner_id == owner_id);
                    if owned {
                        module.order = Some(order);
                        store(&mut modules, id, &module)?;
                    }
                    owned
                }
                None => false,
            }
        };
        write_txn.commit()?;
        Ok(updated)
    }
}

/// Check then apply formset changes inside `txn`. On rejection nothing has
/// been written and the caller must not commit.
pub(crate) fn apply_formset_in(
    txn: &WriteTransaction,
    course_id: u64,
    changes: &[ModuleChange],
) -> Result<Result<(), FormsetRejection>, DatabaseError> {
    let members = {
        let index = txn.open_table(COURSE_MODULES)?;
        let result = read_index(&index, course_id)?;
        result
    };
    for change in changes {
        if let ModuleChange::Update(module_id, _) | ModuleChange::Delete(module_id) = change {
            if !members.contains(module_id) {
                return Ok(Err(FormsetRejection::ForeignModule(*module_id)));
            }
        }
    }

    // Deletions first so new rows are ordered after the survivors
    for change in changes {
        if let ModuleChange::Delete(module_id) = change {
            delete_module_in(txn, *module_id)?;
        }
    }
    for change in changes {
        match change {
            ModuleChange::Update(module_id, fields) => {
                update_module_in(txn, *module_id, fields)?;
            }
            ModuleChange::Create(fields) => {
                insert_module_in(txn, course_id, fields, None)?;
            }
            ModuleChange::Delete(_) => {}
        }
    }
    Ok(Ok(()))
}

pub(crate) fn insert_module_in(
    txn: &WriteTransaction,
    course_id: u64,
    fields: &ModuleFields,
    order: Option<u32>,
) -> Result<Module, DatabaseError> {
    let id = next_id(txn, "modules")?;
    let mut module = Module {
        id,
        course_id,
        title: fields.title.clone(),
        description: fields.description.clone(),
        order,
    };

    let mut modules = txn.open_table(MODULES)?;
    let mut index = txn.open_table(COURSE_MODULES)?;
    assign_order(&modules, &index, &mut module)?;
    store(&mut modules, id, &module)?;
    index_insert(&mut index, course_id, id)?;
    Ok(module)
}

fn update_module_in(
    txn: &WriteTransaction,
    id: u64,
    fields: &ModuleFields,
) -> Result<Option<Module>, DatabaseError> {
    let mut modules = txn.open_table(MODULES)?;
    match load::<Module, _>(&modules, id)? {
        Some(mut module) => {
            module.title = fields.title.clone();
            module.description = fields.description.clone();
            store(&mut modules, id, &module)?;
            Ok(Some(module))
        }
        None => Ok(None),
    }
}

pub(crate) fn delete_module_in(txn: &WriteTransaction, id: u64) -> Result<bool, DatabaseError> {
    let module: Option<Module> = {
        let modules = txn.open_table(MODULES)?;
        let result = load(&modules, id)?;
        result
    };
    let Some(module) = module else {
        return Ok(false);
    };

    let content_ids = {
        let index = txn.open_table(MODULE_CONTENTS)?;
        let result = read_index(&index, id)?;
        result
    };
    {
        let mut contents = txn.open_table(CONTENTS)?;
        for content_id in content_ids {
            contents.remove(content_id)?;
        }
        let mut index = txn.open_table(MODULE_CONTENTS)?;
        index.remove(id)?;
    }

    let mut modules = txn.open_table(MODULES)?;
    modules.remove(id)?;
    let mut index = txn.open_table(COURSE_MODULES)?;
    index_remove(&mut index, module.course_id, id)?;
    Ok(true)
}
