pub mod certbot;
pub mod command;
pub mod config;
pub mod domain;
pub mod nginx;
pub mod observability;
pub mod renewal;
pub mod state;
pub mod supervisor;
