use rusqlite::Connection;
use std::sync::{Arc, Mutex};

use crate::db;
use crate::error::Result;
use crate::models::Staff;
use crate::settings::Settings;

struct VolunteerRing {
    staffs: Vec<Staff>,
    counter: usize,
}

/// Round-robin volunteer picker. Pure rotation: no affinity, no load metric.
/// The ring caches the stable-ordered volunteer list; staff add/enable/
/// disable invalidates it.
#[derive(Clone)]
pub struct AssignmentEngine {
    ring: Arc<Mutex<Option<VolunteerRing>>>,
}

impl Default for AssignmentEngine {
    fn default() -> Self {
        AssignmentEngine {
            ring: Arc::new(Mutex::new(None)),
        }
    }
}

impl AssignmentEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the cached volunteer list; the next pick rebuilds it.
    pub fn invalidate(&self) {
        let mut ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
        *ring = None;
    }

    /// Pick the next volunteer and persist the subscription edge. Returns
    /// None when auto-assignment is disabled or no eligible agent exists.
    pub fn assign(
        &self,
        conn: &Connection,
        settings: &Settings,
        visitor_id: &str,
        current_staff_ids: &[String],
        exclude_staff_id: Option<&str>,
    ) -> Result<Option<Staff>> {
        if settings.auto_assign == 0 {
            return Ok(None);
        }

        let mut guard = self.ring.lock().unwrap_or_else(|e| e.into_inner());
        if guard.as_ref().is_none_or(|r| r.staffs.is_empty()) {
            let staffs = db::all_volunteers(conn);
            if staffs.is_empty() {
                *guard = None;
                return Ok(None);
            }
            *guard = Some(VolunteerRing { staffs, counter: 0 });
        }
        let Some(ring) = guard.as_mut() else {
            return Ok(None);
        };

        let len = ring.staffs.len();
        let start = ring.counter % len;
        for step in 0..len {
            let index = (start + step) % len;
            let candidate = &ring.staffs[index];
            if current_staff_ids.iter().any(|id| id == &candidate.id) {
                continue;
            }
            if exclude_staff_id == Some(candidate.id.as_str()) {
                continue;
            }
            let chosen = candidate.clone();
            ring.counter = index + 1;
            db::add_subscription(conn, &chosen.id, visitor_id)?;
            return Ok(Some(chosen));
        }
        // Full revolution without a match.
        Ok(None)
    }

    /// Drop every current subscription for the visitor, then pick one fresh
    /// agent, excluding the staff that was holding the chat.
    pub fn reassign(
        &self,
        conn: &Connection,
        settings: &Settings,
        visitor_id: &str,
    ) -> Result<Option<Staff>> {
        let prior = db::subscribed_staffs(conn, visitor_id);
        db::remove_subscriptions_for_visitor(conn, visitor_id)?;
        let exclude = prior.first().map(|s| s.id.clone());
        self.assign(conn, settings, visitor_id, &[], exclude.as_deref())
    }
}
