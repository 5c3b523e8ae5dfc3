//! Runtime state shared by every clone of a communicator

mod init;
mod state;

pub use init::InitializationData;
pub(crate) use state::RuntimeState;
