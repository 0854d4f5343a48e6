//! Lifecycle state shared between the sink and its observers

use serde::{Deserialize, Serialize};

/// Sink lifecycle state
///
/// `Closed → Opened → Started → {Playing ⇄ Paused} → Stopped → Closed`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// No hardware resources held
    Closed,
    /// Hardware opened and ring buffer allocated; not yet accepting audio
    Opened,
    /// Hardware playing, staging area allocated, no pause/resume issued yet
    Started,
    /// Resumed after a pause
    Playing,
    /// Hardware paused; buffered content retained
    Paused,
    /// Hardware stopped and queue torn down
    Stopped,
}

impl LifecycleState {
    /// Whether audio may be written and drained in this state
    pub fn accepts_audio(self) -> bool {
        matches!(
            self,
            LifecycleState::Started | LifecycleState::Playing | LifecycleState::Paused
        )
    }

    /// Whether the hardware is expected to be consuming units
    pub fn is_running(self) -> bool {
        matches!(self, LifecycleState::Started | LifecycleState::Playing)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Closed => write!(f, "closed"),
            LifecycleState::Opened => write!(f, "opened"),
            LifecycleState::Started => write!(f, "started"),
            LifecycleState::Playing => write!(f, "playing"),
            LifecycleState::Paused => write!(f, "paused"),
            LifecycleState::Stopped => write!(f, "stopped"),
        }
    }
}
