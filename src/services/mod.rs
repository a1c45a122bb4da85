pub mod lifecycle;
pub mod presenter;
pub mod state;

pub(crate) use lifecycle::ServerLifecycleController;
pub(crate) use presenter::{Command, CommandBridge};
pub(crate) use state::{StateStore, StateUpdate};
