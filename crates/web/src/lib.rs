//! SessionKit login web application
//!
//! The application that login scenarios are driven against: a login page
//! (regular form post or XHR), cookie sessions and a few protected pages.

pub mod pages;
pub mod server;

pub use server::{serve, LoginMode, WebServer, WebServerConfig};
