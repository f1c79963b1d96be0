pub mod config;
pub mod path;
pub mod protocol;
pub mod selector;
