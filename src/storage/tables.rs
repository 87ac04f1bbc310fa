use redb::TableDefinition;

/// Per-table id sequences: table name -> last issued id
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

/// Users: id -> UserRecord (msgpack)
pub const USERS: TableDefinition<u64, &[u8]> = TableDefinition::new("users");

/// Username index: username -> user id
pub const USERNAMES: TableDefinition<&str, u64> = TableDefinition::new("usernames");

/// Sessions: base64 SHA-256 of the bearer token -> SessionRecord (msgpack)
pub const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");

/// Subjects: id -> Subject (msgpack)
pub const SUBJECTS: TableDefinition<u64, &[u8]> = TableDefinition::new("subjects");

/// Subject slug index: slug -> subject id
pub const SUBJECT_SLUGS: TableDefinition<&str, u64> = TableDefinition::new("subject_slugs");

/// Courses: id -> Course (msgpack)
pub const COURSES: TableDefinition<u64, &[u8]> = TableDefinition::new("courses");

/// Course slug index: slug -> course id
pub const COURSE_SLUGS: TableDefinition<&str, u64> = TableDefinition::new("course_slugs");

/// Modules: id -> Module (msgpack)
pub const MODULES: TableDefinition<u64, &[u8]> = TableDefinition::new("modules");

/// Course index: course id -> msgpack Vec of module ids
pub const COURSE_MODULES: TableDefinition<u64, &[u8]> = TableDefinition::new("course_modules");

/// Content associations: id -> Content (msgpack)
pub const CONTENTS: TableDefinition<u64, &[u8]> = TableDefinition::new("contents");

/// Module index: module id -> msgpack Vec of content ids
pub const MODULE_CONTENTS: TableDefinition<u64, &[u8]> = TableDefinition::new("module_contents");

/// Text items: id -> Item (msgpack)
pub const TEXTS: TableDefinition<u64, &[u8]> = TableDefinition::new("texts");

/// File items: id -> Item (msgpack)
pub const FILES: TableDefinition<u64, &[u8]> = TableDefinition::new("files");

/// Image items: id -> Item (msgpack)
pub const IMAGES: TableDefinition<u64, &[u8]> = TableDefinition::new("images");

/// Video items: id -> Item (msgpack)
pub const VIDEOS: TableDefinition<u64, &[u8]> = TableDefinition::new("videos");
