//! Server startup: logging, node assembly and shutdown handling

pub mod logging;
pub mod node;
pub mod shutdown;

pub use logging::init_logging;
pub use node::LockNode;
pub use shutdown::{ShutdownSignal, wait_for_shutdown_signal};
