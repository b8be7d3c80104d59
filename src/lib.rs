pub mod agencies;
pub mod config;
pub mod leads;
pub mod notifications;
pub mod properties;
pub mod security;
pub mod shared;
