pub mod bulk;
pub mod engine;
pub mod format;
pub mod staging;
