//! Adapter lifecycle: event dispatch, isolated initialization,
//! configuration, and supervision of in-flight bring-up tasks.

pub mod configure;
pub mod dispatch;
pub mod init;
pub mod supervisor;

pub use configure::{DeviceConfigurator, NoServiceClasses, ServiceClassSource, StartOutcome};
pub use dispatch::{start_host, HostCommand, HostContext, HostHandle, LifecycleDispatcher};
pub use supervisor::{ChildSupervisor, InitCompletion};
