// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Status words gating slot visibility between pipeline stages, and the
//! lifecycle states shared by all engines.

use bitflags::bitflags;

bitflags! {
    /// The pulse status lattice. Bits are only ever added to a live slot;
    /// a stage may read a pulse once every bit it requires is present.
    /// `get_vacant` is the single point that clears the word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PulseStatus: u32 {
        /// Raw samples are in place (transceiver).
        const HAS_IQ_DATA  = 1 << 0;
        /// Azimuth/elevation stamped (position tagger).
        const HAS_POSITION = 1 << 1;
        /// Matched filter applied in place (compressor).
        const COMPRESSED   = 1 << 2;
        /// Consumed by the moment engine; the recorder may archive it.
        const PROCESSED    = 1 << 3;
        /// Visible to downstream consumers.
        const READY        = 1 << 4;
        /// No bracketing position arrived in time; skip this pulse.
        const DISCARDED    = 1 << 5;
    }
}

bitflags! {
    /// Ray status bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RayStatus: u32 {
        const PROCESSED = 1 << 0;
        const READY     = 1 << 1;
        /// Consumed by the sweep engine.
        const USED      = 1 << 2;
    }
}

/// Lifecycle of an engine. Workers start in `Allocated`, move through
/// `Activating` to `Active`, and return to `Allocated` via
/// `Deactivating` when stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Allocated,
    Activating,
    Active,
    Deactivating,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_lattice_is_monotone() {
        let mut s = PulseStatus::empty();
        s |= PulseStatus::HAS_IQ_DATA;
        s |= PulseStatus::COMPRESSED;
        s |= PulseStatus::HAS_POSITION | PulseStatus::READY;
        assert!(s.contains(PulseStatus::HAS_IQ_DATA | PulseStatus::COMPRESSED));
        assert!(s.contains(PulseStatus::READY));
        assert!(!s.contains(PulseStatus::DISCARDED));
    }
}
