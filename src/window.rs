//! Sliding-window event list and the three windowed predicates built on top
//! of it: cumulative (`on_time`), single-duration (`sustain_window`), and
//! frequency (`intensity`) — SPEC_FULL.md §4.4.

use crate::timestamp::Timestamp;

const NANOS_PER_MS: i64 = 1_000_000;

fn ms_to_ns(ms: u64) -> i64 {
    ms as i64 * NANOS_PER_MS
}

fn ns_to_ms(ns: i64) -> i64 {
    ns / NANOS_PER_MS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    Set,
    Clear,
}

/// The result of evaluating a windowed predicate: the flipped-to state, and
/// the number of milliseconds from `now` until the predicate would flip
/// again assuming no further events arrive (`None` means stable).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlipResult {
    pub set: bool,
    pub next_flip_ms: Option<i64>,
}

/// A single input's rolling event history, newest-first. See SPEC_FULL.md
/// §4.4 for the anchor invariant this type maintains.
#[derive(Debug, Clone, Default)]
pub struct Window {
    events: Vec<(Timestamp, EventState)>,
}

impl Window {
    pub fn new() -> Self {
        Window { events: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The most recently recorded state, or `Clear` for an empty (never
    /// observed) window — matching the "empty list ≡ Clear" invariant.
    pub fn current_state(&self) -> EventState {
        self.events
            .first()
            .map(|(_, s)| *s)
            .unwrap_or(EventState::Clear)
    }

    /// Record a transition and garbage-collect entries that have aged out of
    /// the window, preserving the anchor invariant (SPEC_FULL.md §4.4).
    pub fn add_event(&mut self, new_state: EventState, now: Timestamp, period_ms: u64) {
        if let Some((last_ts, last_state)) = self.events.first() {
            assert!(
                now >= *last_ts,
                "window events must arrive in non-decreasing timestamp order"
            );
            if *last_state == new_state {
                self.gc(now, period_ms);
                return;
            }
        }
        self.events.insert(0, (now, new_state));
        self.gc(now, period_ms);
    }

    fn gc(&mut self, now: Timestamp, period_ms: u64) {
        let cutoff = now - ms_to_ns(period_ms);
        let mut truncate_at = self.events.len();
        let mut past_cutoff = false;
        for (i, (ts, state)) in self.events.iter().enumerate() {
            if !past_cutoff && *ts < cutoff {
                past_cutoff = true;
            }
            if past_cutoff && *state == EventState::Set {
                truncate_at = i + 1;
                break;
            }
        }
        self.events.truncate(truncate_at);
    }

    /// Clipped, newest-first maximal same-state spans within `[now - period,
    /// now]`. The newest span's end is always `now`.
    fn segments(&self, now: Timestamp, period_ms: u64) -> Vec<(Timestamp, Timestamp, bool)> {
        let window_start = now - ms_to_ns(period_ms);
        let mut segs = Vec::new();
        let mut boundary = now;
        for (ts, state) in &self.events {
            let clipped_start = (*ts).max(window_start);
            let clipped_end = boundary;
            if clipped_end > clipped_start {
                segs.push((clipped_start, clipped_end, *state == EventState::Set));
            }
            boundary = *ts;
            if *ts <= window_start {
                break;
            }
        }
        segs
    }

    /// Cumulative predicate backing `on_time`: total `Set` coverage over the
    /// window must reach `on_ms`.
    pub fn cumulative(&self, now: Timestamp, period_ms: u64, on_ms: u64) -> FlipResult {
        let on_ns = ms_to_ns(on_ms);
        let segs = self.segments(now, period_ms);
        let total_set: i64 = segs.iter().filter(|(_, _, set)| *set).map(|(s, e, _)| e - s).sum();

        if total_set >= on_ns {
            let mut running = 0i64;
            let mut onset = now;
            for (s, e, set) in &segs {
                if *set {
                    let before = running;
                    running += e - s;
                    if running >= on_ns {
                        let needed = on_ns - before;
                        onset = e - needed;
                        break;
                    }
                }
            }
            let flip_at = onset + ms_to_ns(period_ms);
            FlipResult {
                set: true,
                next_flip_ms: Some(ns_to_ms((flip_at - now).max(0))),
            }
        } else if self.current_state() == EventState::Set {
            let deficit = on_ns - total_set;
            FlipResult {
                set: false,
                next_flip_ms: Some(ns_to_ms(deficit.max(0))),
            }
        } else {
            FlipResult { set: false, next_flip_ms: None }
        }
    }

    /// Single-duration predicate backing `sustain_window`: some contiguous
    /// `Set` span within the window must reach `on_ms`.
    pub fn single_duration(&self, now: Timestamp, period_ms: u64, on_ms: u64) -> FlipResult {
        let on_ns = ms_to_ns(on_ms);
        let segs = self.segments(now, period_ms);

        let qualifying = segs.iter().find(|(s, e, set)| *set && (e - s) >= on_ns);
        if let Some((_, e, _)) = qualifying {
            let onset = e - on_ns;
            let flip_at = onset + ms_to_ns(period_ms);
            FlipResult {
                set: true,
                next_flip_ms: Some(ns_to_ms((flip_at - now).max(0))),
            }
        } else if let Some((ts, EventState::Set)) = self.events.first() {
            let open_len = now - ts;
            let deficit = on_ns - open_len;
            FlipResult {
                set: false,
                next_flip_ms: Some(ns_to_ms(deficit.max(0))),
            }
        } else {
            FlipResult { set: false, next_flip_ms: None }
        }
    }

    /// Frequency predicate backing `intensity`: at least `count` distinct
    /// `Set` transitions within the window.
    pub fn frequency(&self, now: Timestamp, period_ms: u64, count: u32) -> FlipResult {
        let window_start = now - ms_to_ns(period_ms);
        let transitions: Vec<Timestamp> = self
            .events
            .iter()
            .filter(|(ts, state)| *state == EventState::Set && *ts >= window_start)
            .map(|(ts, _)| *ts)
            .collect();

        if transitions.len() >= count as usize && count > 0 {
            let oldest_needed = transitions[count as usize - 1];
            let flip_at = oldest_needed + ms_to_ns(period_ms);
            FlipResult {
                set: true,
                next_flip_ms: Some(ns_to_ms((flip_at - now).max(0))),
            }
        } else {
            FlipResult { set: false, next_flip_ms: None }
        }
    }
}
