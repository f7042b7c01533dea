//! Event log: bounded in-memory ring for the API, append-only persistence
//! in the store. A store failure never blocks the control path; the event
//! still lands in the ring and the process log.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::Local;
use tracing::{error, info};

use crate::store::StateStore;

const RING_CAPACITY: usize = 100;

#[derive(Clone)]
pub struct EventLog {
    store: StateStore,
    ring: Arc<Mutex<VecDeque<(String, String)>>>,
}

impl EventLog {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            ring: Arc::new(Mutex::new(VecDeque::with_capacity(RING_CAPACITY))),
        }
    }

    pub fn log(&self, text: &str) {
        if let Err(e) = self.store.append_event(text) {
            error!("event persistence failed: {}", e);
        }

        // A panicking writer must not poison the log for the rest of the
        // process; the ring holds plain owned data, so recover and go on.
        let mut ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
        if ring.len() == RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back((Local::now().format("%H:%M:%S").to_string(), text.to_string()));

        info!("{}", text);
    }

    /// Most recent events, oldest first.
    pub fn recent(&self, count: usize) -> Vec<(String, String)> {
        let ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
        ring.iter()
            .rev()
            .take(count)
            .rev()
            .cloned()
            .collect()
    }
}
