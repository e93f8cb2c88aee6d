//! CLI command implementations

mod agent;
mod ops;
mod tunnel;

pub use agent::{ping_command, stop_command};
pub use ops::{cat_command, exec_command, ip_command, probe_command};
pub use tunnel::{tunnel_add_command, tunnel_list_command, tunnel_rm_command};
