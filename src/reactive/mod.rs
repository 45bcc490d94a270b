//! Reactive update runtime: wire protocol, registries, sessions and the
//! transport-independent handler.

pub mod dispatch;
pub mod handler;
pub mod protocol;
pub mod registry;
pub mod session;

pub use dispatch::{DispatchOutcome, dispatch};
pub use handler::{ReactiveConfig, ReactiveHandler, Transport};
pub use protocol::{ActionReply, ActionRequest, ComponentUpdate, DispatchError, ServerFrame};
pub use registry::{ComponentRegistry, RegistryError, SharedComponent, share};
pub use session::{Outbound, ReactiveSession, SessionRegistry};
