//! viewkit - convention-based view registry, layout negotiation and turbo
//! stream rendering on top of tera.

pub mod cli;
pub mod config;
pub mod logger;
pub mod serve;
pub mod views;
pub mod watch;
