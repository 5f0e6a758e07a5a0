//! CLI commands

pub mod firewall;
pub mod ip;
pub mod link;
pub mod restore;
pub mod save;
pub mod show;
pub mod status;
pub mod validate;

pub use firewall::FirewallCommand;
pub use ip::IpCommand;
pub use link::{LinkAction, LinkCommand};
pub use restore::RestoreCommand;
pub use save::SaveCommand;
pub use show::{OutputFormat, ShowCommand};
pub use status::StatusCommand;
pub use validate::ValidateCommand;
