//! 通用工具模块

pub mod temp_file;

pub use temp_file::{TempFileGuard, TempFileManager};
