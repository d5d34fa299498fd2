//! Composition root for the control panel.
//!
//! [`orchestrator::Orchestrator`] owns the service client and the terminal
//! session, forwards remote calls, and relays session events outward as
//! [`events::PanelEvent`]s. [`context`] asks an external helper what the
//! desktop currently shows so it can be folded into assistant launches.

pub mod context;
pub mod events;
pub mod orchestrator;

pub use context::{
    source_from_config, ContextError, ContextSource, HelperCommandSource, NoContext, UiContext,
};
pub use events::PanelEvent;
pub use orchestrator::Orchestrator;
