//! CLI command implementations.
//!
//! | Module    | Commands handled |
//! |-----------|------------------|
//! | `run`     | `Run`            |
//! | `apply`   | `Apply`, `Send`  |
//! | `history` | `History`        |
//! | `config`  | `Config`         |
//! | `serve`   | `ServeMock`      |

pub mod apply;
pub mod config;
pub mod history;
pub mod run;
pub mod serve;

pub use apply::{cmd_apply, cmd_send};
pub use config::cmd_config;
pub use history::cmd_history;
pub use run::cmd_run;
pub use serve::cmd_serve_mock;
