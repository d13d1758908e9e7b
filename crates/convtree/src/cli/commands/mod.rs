pub mod discover;
pub mod extract;
pub mod ingest;
pub mod validate;
