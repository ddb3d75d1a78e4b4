//! Host service boundary
//!
//! The engine never draws, prints, or dialogs; everything user-facing
//! crosses this trait. Every method defaults to a no-op so headless
//! hosts implement nothing.

use super::error::EngineError;
use super::job::JobOwner;

/// Callbacks the engine makes into its embedding host.
pub trait HostServices: Send {
    /// A job finished or the display may be stale; `force` requests an
    /// unconditional redraw.
    fn update_display(&mut self, force: bool) {
        let _ = force;
    }

    /// Called between agent steps at switch points so a GUI can stay
    /// responsive. Headless hosts no-op.
    fn breathe(&mut self) {}

    /// The last job belonging to `owner` has been removed.
    fn owner_finished(&mut self, owner: &JobOwner) {
        let _ = owner;
    }

    /// The periodic secondary-work tick fired.
    fn periodic_update(&mut self) {}

    /// A job owned by `owner` died with `error`. The host decides how to
    /// present it; the engine has already contained the failure.
    fn runtime_error(&mut self, owner: &JobOwner, error: &EngineError) {
        let _ = (owner, error);
    }
}

/// Host that ignores every callback, for headless embedding and tests.
#[derive(Debug, Default)]
pub struct NullHost;

impl HostServices for NullHost {}
