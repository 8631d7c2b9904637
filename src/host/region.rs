//! Region monitor driven by the daemon's own location samples.
//!
//! Each registered circle remembers whether the last sample was inside it.
//! A sample that lands inside a circle the previous sample was outside of (or
//! the first sample after registration that lands inside) produces an enter
//! event, the same initial-trigger behavior platform geofencing offers.

use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::alarm::GeoPoint;
use crate::collaborators::RegionMonitor;
use crate::normalizer::RawEvent;
use crate::tracker::haversine_meters;

#[derive(Debug, Clone, Copy)]
struct Region {
    center: GeoPoint,
    radius_meters: f64,
    inside: bool,
}

#[derive(Default)]
pub struct SoftwareRegionMonitor {
    regions: Mutex<BTreeMap<String, Region>>,
}

impl SoftwareRegionMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn regions(&self) -> MutexGuard<'_, BTreeMap<String, Region>> {
        self.regions.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Feed a location sample; returns an enter event for every circle the
    /// sample has just crossed into.
    pub fn observe(&self, position: GeoPoint, timestamp_ms: i64) -> Vec<RawEvent> {
        if !position.is_valid() {
            return Vec::new();
        }

        let mut entered = Vec::new();
        for (request_id, region) in self.regions().iter_mut() {
            let inside = haversine_meters(position, region.center) <= region.radius_meters;
            if inside && !region.inside {
                entered.push(RawEvent::RegionEnter {
                    request_id: request_id.clone(),
                    timestamp_ms: Some(timestamp_ms),
                });
            }
            region.inside = inside;
        }
        entered
    }

    pub fn registered(&self) -> Vec<String> {
        self.regions().keys().cloned().collect()
    }
}

impl RegionMonitor for SoftwareRegionMonitor {
    fn register(&self, request_id: &str, center: GeoPoint, radius_meters: f64) -> Result<()> {
        self.regions().insert(
            request_id.to_string(),
            Region {
                center,
                radius_meters,
                inside: false,
            },
        );
        log_debug!("Region {request_id} registered ({radius_meters} m)");
        Ok(())
    }

    fn unregister(&self, request_id: &str) -> Result<()> {
        if self.regions().remove(request_id).is_some() {
            log_debug!("Region {request_id} unregistered");
        }
        Ok(())
    }
}
