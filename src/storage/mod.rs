mod catalog;
mod contents;
pub mod db;
pub mod models;
mod modules;
pub mod ordering;
mod tables;
mod users;

pub use catalog::{CourseRejection, CourseSearch};
pub use db::{Database, DatabaseError};
pub use modules::FormsetRejection;
pub use tables::*;
pub use users::NewUser;
