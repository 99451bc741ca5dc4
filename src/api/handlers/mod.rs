pub mod health;
pub mod me;
pub mod session;
pub mod state;
pub mod types;

pub(crate) mod utils;
