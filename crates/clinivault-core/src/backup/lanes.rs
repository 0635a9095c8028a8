//! Per-tenant FIFO run lanes.
//!
//! Each tenant gets one lane; backup and restore runs of that tenant take the
//! lane in arrival order, while runs of different tenants proceed
//! independently. A lane is dropped from the map once nobody holds or waits
//! on it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

use super::types::LaneState;

type LaneMap = Arc<Mutex<HashMap<String, Arc<Lane>>>>;

#[derive(Default)]
struct Lane {
    slot: Arc<tokio::sync::Mutex<()>>,
    waiting: AtomicUsize,
    running: AtomicBool,
}

/// Remove `lane` from the map if the caller's handle is the last one outside
/// the map. Handles are only cloned under the map lock, so the count cannot
/// grow behind our back.
fn release(lanes: &LaneMap, tenant_id: &str, lane: &Arc<Lane>) {
    let mut map = lanes.lock().unwrap_or_else(|e| e.into_inner());
    let unused = map
        .get(tenant_id)
        .is_some_and(|current| Arc::ptr_eq(current, lane) && Arc::strong_count(lane) == 2);
    if unused {
        map.remove(tenant_id);
    }
}

/// A queued acquire. Dropping it, whether after getting the slot or because
/// the waiting future was cancelled, leaves the queue.
struct Waiter {
    lanes: LaneMap,
    tenant_id: String,
    lane: Arc<Lane>,
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.lane.waiting.fetch_sub(1, Ordering::SeqCst);
        release(&self.lanes, &self.tenant_id, &self.lane);
    }
}

/// Exclusive hold on a tenant's lane; released on drop.
pub struct LaneGuard {
    lanes: LaneMap,
    tenant_id: String,
    lane: Arc<Lane>,
    _slot: OwnedMutexGuard<()>,
}

impl Drop for LaneGuard {
    fn drop(&mut self) {
        self.lane.running.store(false, Ordering::SeqCst);
        release(&self.lanes, &self.tenant_id, &self.lane);
    }
}

#[derive(Default)]
pub struct TenantLanes {
    lanes: LaneMap,
}

impl TenantLanes {
    pub fn new() -> Self {
        Self::default()
    }

    fn enqueue(&self, tenant_id: &str) -> Waiter {
        let mut lanes = self.lanes.lock().unwrap_or_else(|e| e.into_inner());
        let lane = Arc::clone(lanes.entry(tenant_id.to_string()).or_default());
        lane.waiting.fetch_add(1, Ordering::SeqCst);
        Waiter {
            lanes: Arc::clone(&self.lanes),
            tenant_id: tenant_id.to_string(),
            lane,
        }
    }

    /// Wait for the tenant's lane. Waiters are served first come, first served.
    pub async fn acquire(&self, tenant_id: &str) -> LaneGuard {
        let waiter = self.enqueue(tenant_id);
        let slot = Arc::clone(&waiter.lane.slot).lock_owned().await;
        let lane = Arc::clone(&waiter.lane);
        lane.running.store(true, Ordering::SeqCst);
        drop(waiter);
        LaneGuard {
            lanes: Arc::clone(&self.lanes),
            tenant_id: tenant_id.to_string(),
            lane,
            _slot: slot,
        }
    }

    pub fn state(&self, tenant_id: &str) -> LaneState {
        let lanes = self.lanes.lock().unwrap_or_else(|e| e.into_inner());
        let Some(lane) = lanes.get(tenant_id) else {
            return LaneState::Idle;
        };
        let waiting = lane.waiting.load(Ordering::SeqCst);
        if waiting > 0 {
            LaneState::Queued(waiting)
        } else if lane.running.load(Ordering::SeqCst) {
            LaneState::Running
        } else {
            LaneState::Idle
        }
    }
}
