//! Action notifications.  Observers see the outcome of every archive
//! operation and never influence control flow.

use log::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionType {
    Added,
    Extracted,
    Removed,
    Listed,
    Dumped,
    Compacted,
}

impl ActionType {
    pub fn name(self) -> &'static str {
        match self {
            ActionType::Added     => "add",
            ActionType::Extracted => "extract",
            ActionType::Removed   => "remove",
            ActionType::Listed    => "list",
            ActionType::Dumped    => "dump",
            ActionType::Compacted => "compact",
        }
    }
}

pub trait ArchiveObserver {
    /// `target` is empty for archive-wide actions.
    fn notify(&self, action: ActionType, target: &str, ok: bool);
}

impl<F: Fn(ActionType, &str, bool)> ArchiveObserver for F {
    fn notify(&self, action: ActionType, target: &str, ok: bool) {
        self(action, target, ok)
    }
}

/// Reports every action through the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl ArchiveObserver for LogObserver {
    fn notify(&self, action: ActionType, target: &str, ok: bool) {
        if ok {
            info!("observed {} {target}", action.name());
        } else {
            warn!("observed failed {} {target}", action.name());
        }
    }
}
