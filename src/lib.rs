//! Orion field agent: bridges locally attached sensors and cameras to the
//! Orion management server.

pub mod agent;
pub mod api_client;
pub mod capture;
pub mod command;
pub mod config;
pub mod drivers;
pub mod identity;
pub mod reading;
pub mod secret;
pub mod state;
pub mod version;
