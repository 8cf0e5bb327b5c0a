//! Sync status reported to the UI

use serde::{Deserialize, Serialize};

use crate::types::ConnectionStatus;

/// "N changes waiting to sync" plus the realtime connection snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncStatus {
    pub connection: ConnectionStatus,
    /// Unsynced operations that will still be sent.
    pub pending_count: usize,
    /// Operations the remote rejected, awaiting skip or retry.
    pub dead_letter_count: usize,
}
