pub mod config;
pub mod dispatch;
pub mod handlers;
pub mod mailbox;
pub mod registry;
pub mod server;
pub mod session;
