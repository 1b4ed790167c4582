pub mod archive;
pub mod auth;
pub mod config;
pub mod driver;
pub mod error;
pub mod logging;
pub mod prompt;
pub mod runtime;
pub mod site;
pub mod webdriver;

#[cfg(test)]
mod fake_server;
#[cfg(test)]
mod testing;
