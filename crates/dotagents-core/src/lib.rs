//! Plan, apply and undo symlinks from a canonical `.agents` directory into
//! the per-client locations coding agents read.

pub mod apply;
pub mod backup;
pub mod config;
pub mod fsops;
pub mod mappings;
pub mod migration;
pub mod plan;
pub mod roots;
pub mod skills;
pub mod undo;

#[cfg(test)]
mod test_env;

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
