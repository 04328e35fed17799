pub mod als;
pub mod composer;
pub mod config;
pub mod devices;
pub mod identity;
pub mod scanner;
pub mod structure;
pub mod validator;

/// Live Set file extension
pub const ALS_EXTENSION: &str = "als";

/// Folder Live writes automatic set backups into
pub const BACKUP_DIR: &str = "Backup";

/// Application name for XDG paths
pub const APP_NAME: &str = "alsdoctor";
