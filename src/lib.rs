pub mod config;
pub mod error;
pub mod layout;
pub mod open_files;
pub mod registry;
pub mod shell;
pub mod simfs;
pub mod storage;
pub mod tree;
