//! Scoped, automatically assigned `order` values.
//!
//! Modules are ordered within their course and contents within their module.
//! A row saved without an explicit order is placed after its last sibling.

use redb::ReadableTable;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::db::{load, read_index, DatabaseError};

/// Largest storable order, the range of a positive integer column.
pub const MAX_ORDER: u32 = i32::MAX as u32;

/// A row carrying an `order` that is assigned from its siblings when unset.
pub trait Ordered: Serialize + DeserializeOwned {
    /// Id of the parent row the sequence is scoped to.
    fn scope_id(&self) -> u64;
    fn order(&self) -> Option<u32>;
    fn set_order(&mut self, order: u32);
}

/// Fill in `row`'s order before it is written.
///
/// An explicit order is kept as given. Otherwise the row gets `1 + max(order)`
/// over the siblings listed in `index` under its scope, or `0` when it has
/// none. Must run inside the write transaction that stores the row. Fails
/// with [`DatabaseError::OrderExhausted`] when the last sibling already sits
/// at [`MAX_ORDER`].
pub(crate) fn assign_order<T, R, I>(rows: &R, index: &I, row: &mut T) -> Result<u32, DatabaseError>
where
    T: Ordered,
    R: ReadableTable<u64, &'static [u8]>,
    I: ReadableTable<u64, &'static [u8]>,
{
    if let Some(order) = row.order() {
        return Ok(order);
    }

    let mut last: Option<u32> = None;
    for sibling_id in read_index(index, row.scope_id())? {
        if let Some(sibling) = load::<T, _>(rows, sibling_id)? {
            last = last.max(sibling.order());
        }
    }

    let order = match last {
        None => 0,
        Some(last) => last
            .checked_add(1)
            .filter(|next| *next <= MAX_ORDER)
            .ok_or(DatabaseError::OrderExhausted(last))?,
    };
    row.set_order(order);
    Ok(order)
}

/// Sort rows by order, breaking ties by insertion id.
pub(crate) fn sort_by_order<T: Ordered>(rows: &mut [T], id: impl Fn(&T) -> u64) {
    rows.sort_by_key(|row| (row.order(), id(row)));
}
