/// Per-watch state machine: Idle → Live-NotAccepting ⇄ Live-Accepting → Idle.
///
/// `alerted_accepting_for_id` is an edge-triggered latch: once set for an
/// activity, further "accepting" observations stay silent until the activity
/// locks again, changes identity, or disappears.
use std::fmt;

use crate::extract::Extraction;
use crate::state::WatchState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    WentLive,
    NowAccepting,
    WentDown,
}

impl Transition {
    pub fn is_alert(self) -> bool {
        self != Transition::None
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Transition::None => "none",
            Transition::WentLive => "went_live",
            Transition::NowAccepting => "now_accepting",
            Transition::WentDown => "went_down",
        };
        f.write_str(s)
    }
}

/// Decides what `extraction` means relative to `prior`. Caching tokens are copied
/// through untouched; the caller owns them.
pub fn decide(prior: &WatchState, extraction: &Extraction) -> (Transition, WatchState) {
    let mut next = prior.clone();
    let seen = prior.last_seen_id.as_deref();
    let latched = prior.alerted_accepting_for_id.as_deref();

    let transition = match extraction.activity_id.as_deref() {
        Some(id) if seen != Some(id) => {
            next.last_seen_id = Some(id.to_string());
            // The accepting alert for a brand-new activity rides on the live alert.
            next.alerted_accepting_for_id = extraction.accepting.then(|| id.to_string());
            Transition::WentLive
        }
        Some(id) if extraction.accepting => {
            if latched == Some(id) {
                Transition::None
            } else {
                next.alerted_accepting_for_id = Some(id.to_string());
                Transition::NowAccepting
            }
        }
        Some(id) => {
            // Locked again: re-arm so a reopening of the same activity alerts.
            if latched == Some(id) {
                next.alerted_accepting_for_id = None;
            }
            Transition::None
        }
        None if seen.is_some() => {
            next.last_seen_id = None;
            next.alerted_accepting_for_id = None;
            Transition::WentDown
        }
        None => Transition::None,
    };

    (transition, next)
}
