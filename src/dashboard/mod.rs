//! Status server

pub mod server;

pub use server::DashboardServer;
