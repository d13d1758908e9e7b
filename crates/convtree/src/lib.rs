#![forbid(unsafe_code)]

pub mod cli;
pub mod config;
pub mod device;
pub mod discovery;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod logging;
pub mod models;
pub mod reconstruct;
pub mod report;
pub mod sqlite;
pub mod tree;
pub mod utils;
pub mod validate;

pub use cli::app::{Cli, Command};
pub use error::LoadError;
pub use reconstruct::{ReconstructOptions, Reconstruction, RootSelectionPolicy, reconstruct};
pub use tree::{ConversationDocument, MessageNode, load_document, load_document_str};
