//! CLI command implementations.
//!
//! | Module   | Commands handled         |
//! |----------|--------------------------|
//! | `run`    | `Run`                    |
//! | `status` | `Status`, `Reset`        |
//! | `config` | `Config`                 |

pub mod config;
pub mod run;
pub mod status;

pub use config::cmd_config;
pub use run::{RunArgs, cmd_run};
pub use status::{cmd_reset, cmd_status};
