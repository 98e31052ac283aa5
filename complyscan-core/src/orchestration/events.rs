use std::fmt;

use complyscan_model::{ScanId, ScanProgress, TenantId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Lifecycle notifications for scan jobs. Published after the matching
/// repository write has landed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScanEvent {
    Started {
        scan_id: ScanId,
        tenant_id: TenantId,
    },
    Progress {
        scan_id: ScanId,
        tenant_id: TenantId,
        progress: ScanProgress,
    },
    Completed {
        scan_id: ScanId,
        tenant_id: TenantId,
        total_findings: usize,
        compliance_score: f64,
    },
    Failed {
        scan_id: ScanId,
        tenant_id: TenantId,
        error: String,
    },
    Cancelled {
        scan_id: ScanId,
        tenant_id: TenantId,
    },
}

impl ScanEvent {
    pub fn scan_id(&self) -> ScanId {
        match self {
            ScanEvent::Started { scan_id, .. }
            | ScanEvent::Progress { scan_id, .. }
            | ScanEvent::Completed { scan_id, .. }
            | ScanEvent::Failed { scan_id, .. }
            | ScanEvent::Cancelled { scan_id, .. } => *scan_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanEvent::Completed { .. }
                | ScanEvent::Failed { .. }
                | ScanEvent::Cancelled { .. }
        )
    }
}

/// In-process fan-out of [`ScanEvent`]s. Publishing never blocks and never
/// fails; events sent while nobody listens are dropped.
pub struct ScanEventBus {
    sender: broadcast::Sender<ScanEvent>,
    capacity: usize,
}

impl fmt::Debug for ScanEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanEventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl ScanEventBus {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: ScanEvent) {
        let _ = self.sender.send(event);
    }
}
