mod supervisor;

pub use supervisor::ReconnectHandle;
pub use supervisor::ReconnectionTask;
pub use supervisor::ReconnectionTaskHandle;
