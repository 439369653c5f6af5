pub mod app;
pub mod assemble;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod download;
pub mod error;
pub mod format;
pub mod fs_util;
pub mod http;
pub mod integrity;
pub mod lock;
pub mod output;
pub mod preprocess;
pub mod progress;
pub mod store;
