pub mod client_registry;
pub mod configuration;
pub mod controller;
pub mod error_handling;
pub mod proxy;
pub mod storage;
pub mod upload;
pub mod upstream;
pub mod web_interface;

pub use controller::Controller;

#[cfg(test)]
pub(crate) mod test_support;
