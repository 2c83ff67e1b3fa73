pub mod projects;
pub mod server;
