#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Shared status flags for the firmware target.
//!
//! The radio stack and the update service run outside the node loop. They
//! publish their state through these atomics and the loop reads them through
//! the `node_core` collaborator traits, so nothing shares mutable state
//! directly. On target a signal also wakes the node task when a flag changes
//! while it sleeps.

use node_core::node::UpdateFlag;
use node_core::sensor::Reading;
use portable_atomic::{AtomicBool, AtomicU32, Ordering};
#[cfg(target_os = "none")]
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, signal::Signal};

/// Encoded last reading (0 == none yet).
const NO_READING: u32 = 0;

/// A firmware image is streaming in.
static UPDATE_IN_PROGRESS: AtomicBool = AtomicBool::new(false);
/// A peer is connected with notifications enabled.
static LINK_NOTIFY: AtomicBool = AtomicBool::new(false);
/// The radio stack has queued events waiting for service.
static RADIO_PENDING: AtomicBool = AtomicBool::new(false);
/// Last published reading, packed by [`encode_reading`].
static LAST_READING: AtomicU32 = AtomicU32::new(NO_READING);

/// Raised whenever a flag the loop reacts to changes.
#[cfg(target_os = "none")]
static STATUS_CHANGED: Signal<CriticalSectionRawMutex, ()> = Signal::new();

/// [`UpdateFlag`] backed by the shared atomic.
#[derive(Copy, Clone, Debug, Default)]
pub struct UpdateStatus;

impl UpdateFlag for UpdateStatus {
    fn is_update_in_progress(&self) -> bool {
        UPDATE_IN_PROGRESS.load(Ordering::Relaxed)
    }
}

/// Written by the firmware-update service, which is not linked in yet.
#[cfg_attr(target_os = "none", allow(dead_code))]
pub(crate) fn set_update_in_progress(active: bool) {
    UPDATE_IN_PROGRESS.store(active, Ordering::Relaxed);
    signal_change();
}

/// Written by the BLE stack when a peer toggles notifications.
#[cfg_attr(target_os = "none", allow(dead_code))]
pub(crate) fn set_link_notify(enabled: bool) {
    LINK_NOTIFY.store(enabled, Ordering::Relaxed);
    signal_change();
}

pub fn link_notify() -> bool {
    LINK_NOTIFY.load(Ordering::Relaxed)
}

pub fn set_radio_pending(pending: bool) {
    RADIO_PENDING.store(pending, Ordering::Relaxed);
    if pending {
        signal_change();
    }
}

pub fn radio_pending() -> bool {
    RADIO_PENDING.load(Ordering::Relaxed)
}

/// Resolves once any setter above has run since the last wait.
#[cfg(target_os = "none")]
pub async fn wait_for_change() {
    STATUS_CHANGED.wait().await;
}

fn signal_change() {
    #[cfg(target_os = "none")]
    STATUS_CHANGED.signal(());
}

/// Stores the reading most recently pushed to the radio.
pub fn record_reading(reading: Reading) {
    LAST_READING.store(encode_reading(reading), Ordering::Relaxed);
}

/// Returns the reading most recently pushed to the radio, if any.
pub fn last_reading() -> Option<Reading> {
    decode_reading(LAST_READING.load(Ordering::Relaxed))
}

// Temperature in the high half, humidity + 1 in the low half so that zero
// stays free as the "unknown" marker.
fn encode_reading(reading: Reading) -> u32 {
    let [t_hi, t_lo] = reading.temperature_centi_c.to_be_bytes();
    let [h_hi, h_lo] = reading.humidity_centi_pct.saturating_add(1).to_be_bytes();
    u32::from_be_bytes([t_hi, t_lo, h_hi, h_lo])
}

fn decode_reading(raw: u32) -> Option<Reading> {
    if raw == NO_READING {
        return None;
    }
    let [t_hi, t_lo, h_hi, h_lo] = raw.to_be_bytes();
    let humidity = u16::from_be_bytes([h_hi, h_lo]).checked_sub(1)?;
    Some(Reading::new(i16::from_be_bytes([t_hi, t_lo]), humidity))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reading_encoding_keeps_zero_as_unknown() {
        assert_eq!(decode_reading(NO_READING), None);

        let freezing_and_dry = Reading::new(0, 0);
        let raw = encode_reading(freezing_and_dry);
        assert_ne!(raw, NO_READING);
        assert_eq!(decode_reading(raw), Some(freezing_and_dry));

        let cold = Reading::new(-1_234, 5_678);
        assert_eq!(decode_reading(encode_reading(cold)), Some(cold));
    }

    #[test]
    fn update_status_reads_the_shared_flag() {
        set_update_in_progress(true);
        assert!(UpdateStatus.is_update_in_progress());
        set_update_in_progress(false);
        assert!(!UpdateStatus.is_update_in_progress());
    }

    #[test]
    fn link_notify_follows_the_radio_stack() {
        set_link_notify(true);
        assert!(link_notify());
        set_link_notify(false);
        assert!(!link_notify());
    }
}
