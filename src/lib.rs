pub mod agent;
pub mod artifacts;
pub mod config;
pub mod errors;
pub mod events;
pub mod milestone;
pub mod notify;
pub mod phases;
pub mod pipeline;
pub mod pipeline_config;
pub mod state;
pub mod stream;
pub mod tracker;
pub mod util;
pub mod verification;
