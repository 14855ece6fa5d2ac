pub mod backup;
pub mod common;
pub mod completions;
pub mod config;
pub mod delete;
pub mod export;
pub mod get;
pub mod health;
pub mod list;
pub mod put;
pub mod recovery;
pub mod run;
pub mod sync;
