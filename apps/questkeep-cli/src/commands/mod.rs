pub mod config;
pub mod records;
pub mod replay;

pub use config::ConfigCmd;
pub use records::{ListArgs, ShowArgs};
pub use replay::ReplayArgs;
