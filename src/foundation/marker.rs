// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Scan, sweep and volume markers. Position producers set these; the
//! tagger copies them onto pulses, the moment engine copies them onto
//! rays, and the sweep engine keys its state machine off them.

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct Marker: u32 {
        const SWEEP_BEGIN   = 1 << 0;
        const SWEEP_END     = 1 << 1;
        const VOLUME_BEGIN  = 1 << 2;
        const VOLUME_END    = 1 << 3;
        const PPI_SCAN      = 1 << 8;
        const RHI_SCAN      = 1 << 9;
        const POINT_SCAN    = 1 << 10;

        const SCAN_TYPE_MASK = Self::PPI_SCAN.bits()
            | Self::RHI_SCAN.bits()
            | Self::POINT_SCAN.bits();
    }
}

impl Marker {
    /// The scan-geometry bits only.
    pub fn scan_type(self) -> Marker {
        self & Marker::SCAN_TYPE_MASK
    }

    pub fn is_ppi(self) -> bool {
        self.contains(Marker::PPI_SCAN)
    }

    pub fn is_rhi(self) -> bool {
        self.contains(Marker::RHI_SCAN)
    }
}
