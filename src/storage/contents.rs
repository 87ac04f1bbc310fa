use chrono::Utc;
use redb::{ReadableTable, WriteTransaction};

use super::db::{
    index_insert, index_remove, load, next_id, read_index, store, Database, DatabaseError,
};
use super::models::{Content, Course, Item, ItemBody, ItemKind, Module};
use super::ordering::{assign_order, sort_by_order};
use super::tables::*;

impl Database {
    // ========================================================================
    // Item operations
    // ========================================================================

    /// Store a new item of the body's kind, without linking it to a module
    pub fn create_item(
        &self,
        owner_id: u64,
        title: &str,
        body: ItemBody,
    ) -> Result<Item, DatabaseError> {
        let write_txn = self.begin_write()?;
        let item = insert_item_in(&write_txn, owner_id, title, body)?;
        write_txn.commit()?;
        Ok(item)
    }

    /// Store a new item and link it to `module_id` as the module's next content
    pub fn create_module_item(
        &self,
        module_id: u64,
        owner_id: u64,
        title: &str,
        body: ItemBody,
    ) -> Result<(Item, Content), DatabaseError> {
        let write_txn = self.begin_write()?;
        let item = insert_item_in(&write_txn, owner_id, title, body)?;
        let content = insert_content_in(&write_txn, module_id, item.kind(), item.id)?;
        write_txn.commit()?;

        tracing::debug!(
            content_id = content.id,
            module_id,
            kind = %item.kind(),
            item_id = item.id,
            "Created content"
        );
        Ok((item, content))
    }

    pub fn get_item(&self, kind: ItemKind, id: u64) -> Result<Option<Item>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(kind.table())?;
        load(&table, id)
    }

    /// Get an item only if `owner_id` owns it
    pub fn get_owned_item(
        &self,
        kind: ItemKind,
        id: u64,
        owner_id: u64,
    ) -> Result<Option<Item>, DatabaseError> {
        Ok(self.get_item(kind, id)?.filter(|i| i.owner_id == owner_id))
    }

    /// Replace an item's title and payload. The kind cannot change.
    pub fn update_item(
        &self,
        kind: ItemKind,
        id: u64,
        title: &str,
        body: ItemBody,
    ) -> Result<Option<Item>, DatabaseError> {
        debug_assert_eq!(body.kind(), kind, "item body must match its table");

        let write_txn = self.begin_write()?;
        let updated = {
            let mut table = write_txn.open_table(kind.table())?;
            match load::<Item, _>(&table, id)? {
                Some(mut item) => {
                    item.title = title.to_string();
                    item.body = body;
                    item.updated_at = Utc::now();
                    store(&mut table, id, &item)?;
                    Some(item)
                }
                None => None,
            }
        };
        write_txn.commit()?;
        Ok(updated)
    }

    /// Delete an item row, returning it so its blob can be cleaned up
    pub fn delete_item(&self, kind: ItemKind, id: u64) -> Result<Option<Item>, DatabaseError> {
        let write_txn = self.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(kind.table())?;
            let existing = load::<Item, _>(&table, id)?;
            if existing.is_some() {
                table.remove(id)?;
            }
            existing
        };
        write_txn.commit()?;
        Ok(removed)
    }

    // ========================================================================
    // Content operations
    // ========================================================================

    pub fn get_content(&self, id: u64) -> Result<Option<Content>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(CONTENTS)?;
        load(&table, id)
    }

    /// Get a content only if its module's course is owned by `owner_id`
    pub fn get_owned_content(
        &self,
        id: u64,
        owner_id: u64,
    ) -> Result<Option<Content>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let contents = read_txn.open_table(CONTENTS)?;
        let modules = read_txn.open_table(MODULES)?;
        let courses = read_txn.open_table(COURSES)?;
        owned_content(&contents, &modules, &courses, id, owner_id)
    }

    /// Contents of a module, by order
    pub fn list_contents(&self, module_id: u64) -> Result<Vec<Content>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let index = read_txn.open_table(MODULE_CONTENTS)?;
        let contents = read_txn.open_table(CONTENTS)?;

        let mut rows = Vec::new();
        for content_id in read_index(&index, module_id)? {
            if let Some(content) = load::<Content, _>(&contents, content_id)? {
                rows.push(content);
            }
        }
        sort_by_order(&mut rows, |c| c.id);
        Ok(rows)
    }

    /// Contents of a module resolved to their items. A content whose item is
    /// gone is paired with `None`.
    pub fn list_module_items(
        &self,
        module_id: u64,
    ) -> Result<Vec<(Content, Option<Item>)>, DatabaseError> {
        let contents = self.list_contents(module_id)?;
        let read_txn = self.begin_read()?;

        let mut rows = Vec::with_capacity(contents.len());
        for content in contents {
            let table = read_txn.open_table(content.kind.table())?;
            let item = load::<Item, _>(&table, content.object_id)?;
            rows.push((content, item));
        }
        Ok(rows)
    }

    /// Delete a content association. The referenced item is not touched.
    pub fn delete_content(&self, id: u64) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;
        let content: Option<Content> = {
            let contents = write_txn.open_table(CONTENTS)?;
            let result = load(&contents, id)?;
            result
        };

        let deleted = match content {
            Some(content) => {
                let mut contents = write_txn.open_table(CONTENTS)?;
                contents.remove(id)?;
                let mut index = write_txn.open_table(MODULE_CONTENTS)?;
                index_remove(&mut index, content.module_id, id)?;
                true
            }
            None => false,
        };

        write_txn.commit()?;
        Ok(deleted)
    }

    /// Set a content's order if its module's course is owned by `owner_id`.
    /// Returns whether the row was updated.
    pub fn set_content_order(
        &self,
        id: u64,
        owner_id: u64,
        order: u32,
    ) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;
        let updated = {
            let mut contents = write_txn.open_table(CONTENTS)?;
            let modules = write_txn.open_table(MODULES)?;
            let courses = write_txn.open_table(COURSES)?;
            match owned_content(&contents, &modules, &courses, id, owner_id)? {
                Some(mut content) => {
                    content.order = Some(order);
                    store(&mut contents, id, &content)?;
                    true
                }
                None => false,
            }
        };
        write_txn.commit()?;
        Ok(updated)
    }
}

fn owned_content<C, M, K>(
    contents: &C,
    modules: &M,
    courses: &K,
    id: u64,
    owner_id: u64,
) -> Result<Option<Content>, DatabaseError>
where
    C: ReadableTable<u64, &'static [u8]>,
    M: ReadableTable<u64, &'static [u8]>,
    K: ReadableTable<u64, &'static [u8]>,
{
    let Some(content) = load::<Content, _>(contents, id)? else {
        return Ok(None);
    };
    let Some(module) = load::<Module, _>(modules, content.module_id)? else {
        return Ok(None);
    };
    let owned = load::<Course, _>(courses, module.course_id)?.is_some_and(|c| c.owner_id == owner_id);
    Ok(owned.then_some(content))
}

fn insert_item_in(
    txn: &WriteTransaction,
    owner_id: u64,
    title: &str,
    body: ItemBody,
) -> Result<Item, DatabaseError> {
    let kind = body.kind();
    let id = next_id(txn, kind.sequence())?;
    let now = Utc::now();
    let item = Item {
        id,
        owner_id,
        title: title.to_string(),
        created_at: now,
        updated_at: now,
        body,
    };

    let mut table = txn.open_table(kind.table())?;
    store(&mut table, id, &item)?;
    Ok(item)
}

fn insert_content_in(
    txn: &WriteTransaction,
    module_id: u64,
    kind: ItemKind,
    object_id: u64,
) -> Result<Content, DatabaseError> {
    let id = next_id(txn, "contents")?;
    let mut content = Content {
        id,
        module_id,
        kind,
        object_id,
        order: None,
    };

    let mut contents = txn.open_table(CONTENTS)?;
    let mut index = txn.open_table(MODULE_CONTENTS)?;
    assign_order(&contents, &index, &mut content)?;
    store(&mut contents, id, &content)?;
    index_insert(&mut index, module_id, id)?;
    Ok(content)
}
