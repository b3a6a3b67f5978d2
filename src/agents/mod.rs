// Agent session seam: liveness and wake-up of the agent working an operation

mod memory;
mod sessions;

pub use memory::MemorySessions;
pub use sessions::ProcessSessions;

use crate::error::Result;
use crate::models::Operation;

/// External agent sessions
pub trait AgentSessions: Send + Sync {
    /// Whether an agent is still working in the operation's worktree
    fn is_running(&self, operation: &Operation) -> Result<bool>;

    /// Wake the agent so it can pick up open issues or newly unblocked work
    fn resume(&self, operation: &Operation) -> Result<()>;
}
