// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The health ring.
//!
//! Health relays report slowly (~1 Hz): each report is a JSON object
//! merged over whatever keys the hardware exposes. The radar only
//! stores and timestamps them; aggregation is someone else's job.

use serde::{Deserialize, Serialize};

use crate::foundation::Ring;

/// Status bit a health report carries once complete.
pub const HEALTH_READY: u32 = 1;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Health {
    /// All-time monotonic health id.
    pub i: u64,
    pub time_double: f64,
    /// The raw JSON blob from the relay.
    pub json: String,
}

impl Health {
    /// Parse the payload; a relay that emits junk yields None rather
    /// than an error, since health is advisory.
    pub fn value(&self) -> Option<serde_json::Value> {
        serde_json::from_str(&self.json).ok()
    }
}

/// Allocate the health ring.
pub fn health_ring(depth: usize) -> Ring<Health> {
    Ring::new(depth, |_| Health::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn junk_payloads_are_advisory() {
        let good = Health {
            i: 0,
            time_double: 0.0,
            json: r#"{"Transceiver":{"Value":true,"Enum":0}}"#.to_string(),
        };
        assert!(good.value().is_some());
        let junk = Health {
            i: 1,
            time_double: 0.0,
            json: "not json".to_string(),
        };
        assert!(junk.value().is_none());
    }
}
