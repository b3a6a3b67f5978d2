// In-process agent sessions for tests and dry runs

use std::collections::BTreeSet;
use std::sync::Mutex;

use super::AgentSessions;
use crate::error::Result;
use crate::models::Operation;
use crate::utils::lock_mutex_recover;

#[derive(Debug, Default)]
pub struct MemorySessions {
    running: Mutex<BTreeSet<String>>,
    resumed: Mutex<Vec<String>>,
}

impl MemorySessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_running(&self, name: &str, running: bool) {
        let mut set = lock_mutex_recover(&self.running);
        if running {
            set.insert(name.to_string());
        } else {
            set.remove(name);
        }
    }

    /// Operations resumed so far, in call order
    pub fn resumed(&self) -> Vec<String> {
        lock_mutex_recover(&self.resumed).clone()
    }
}

impl AgentSessions for MemorySessions {
    fn is_running(&self, operation: &Operation) -> Result<bool> {
        Ok(lock_mutex_recover(&self.running).contains(&operation.name))
    }

    fn resume(&self, operation: &Operation) -> Result<()> {
        lock_mutex_recover(&self.resumed).push(operation.name.clone());
        Ok(())
    }
}
