//! Validation modules

pub mod file;

pub use file::{FileCategory, FileReport, FileValidator, MAX_FILE_NAME_LENGTH};
