//! Diff Engine: change events between two successive snapshots

use crate::snapshot::{Direction, Snapshot};

/// Which channels a report or diff should consider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelFilter {
    /// All channels
    All,
    /// Playback channels only
    OutputOnly,
}

impl ChannelFilter {
    /// True if a channel with this direction passes the filter.
    pub fn admits(self, direction: Direction) -> bool {
        match self {
            ChannelFilter::All => true,
            ChannelFilter::OutputOnly => direction == Direction::Output,
        }
    }
}

/// One human-relevant change observed between two poll ticks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Name of the channel the event belongs to
    pub name: String,
    /// Direction of that channel
    pub direction: Direction,
    /// Current cumulative xrun count
    pub xruns: u64,
    /// Increase since the previous tick; `None` for a first occurrence
    /// (no prior observation, or the prior count was 0)
    pub delta: Option<u64>,
}

/// Compare `current` against the previous tick's snapshot and collect the
/// changes worth reporting.
///
/// A channel produces an event only if its current count is nonzero and
/// either there is no previous snapshot or the count differs from the
/// previous one. Channels are matched by name; when a snapshot carries
/// duplicate names the first match wins.
///
/// Pure function: no I/O, no state between calls.
pub fn diff(
    previous: Option<&Snapshot>,
    current: &Snapshot,
    filter: ChannelFilter,
) -> Vec<ChangeEvent> {
    let mut events = Vec::new();

    for chan in &current.channels {
        if !filter.admits(chan.direction) || chan.xruns == 0 {
            continue;
        }

        let prev = previous.and_then(|snapshot| {
            snapshot
                .channels
                .iter()
                .find(|p| p.name == chan.name)
                .map(|p| p.xruns)
        });

        let delta = match prev {
            Some(p) if p == chan.xruns => continue,
            // A channel first seen mid-watch reports its full count, not a
            // delta against an implied zero.
            Some(0) | None => None,
            // Counters are monotonic; a device reset shows up as a wrapped
            // delta rather than being corrected here.
            Some(p) => Some(chan.xruns.wrapping_sub(p)),
        };

        events.push(ChangeEvent {
            name: chan.name.clone(),
            direction: chan.direction,
            xruns: chan.xruns,
            delta,
        });
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Channel;

    fn snapshot(channels: &[(&str, Direction, u64)]) -> Snapshot {
        Snapshot {
            unit: 0,
            devname: "pcm0:test".into(),
            channels: channels
                .iter()
                .map(|(name, direction, xruns)| Channel {
                    name: (*name).into(),
                    direction: *direction,
                    xruns: *xruns,
                })
                .collect(),
        }
    }

    #[test]
    fn test_identical_snapshots_yield_nothing() {
        let current = snapshot(&[
            ("dsp0.p0", Direction::Output, 5),
            ("dsp0.r0", Direction::Input, 2),
        ]);
        assert!(diff(Some(&current), &current, ChannelFilter::All).is_empty());
    }

    #[test]
    fn test_first_occurrence_has_no_delta() {
        let current = snapshot(&[("dsp0.p0", Direction::Output, 5)]);
        let events = diff(None, &current, ChannelFilter::All);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "dsp0.p0");
        assert_eq!(events[0].xruns, 5);
        assert_eq!(events[0].delta, None);
    }

    #[test]
    fn test_delta_arithmetic() {
        let previous = snapshot(&[("dsp0.p0", Direction::Output, 3)]);
        let current = snapshot(&[("dsp0.p0", Direction::Output, 10)]);
        let events = diff(Some(&previous), &current, ChannelFilter::All);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].xruns, 10);
        assert_eq!(events[0].delta, Some(7));
    }

    #[test]
    fn test_counter_regression_reports_wrapped_delta() {
        // A device reset drops the counter; the event is still emitted and
        // the delta wraps like the unsigned arithmetic it comes from.
        let previous = snapshot(&[("dsp0.p0", Direction::Output, 9)]);
        let current = snapshot(&[("dsp0.p0", Direction::Output, 4)]);
        let events = diff(Some(&previous), &current, ChannelFilter::All);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].xruns, 4);
        assert_eq!(events[0].delta, Some(4u64.wrapping_sub(9)));
    }

    #[test]
    fn test_rise_from_zero_has_no_delta() {
        let previous = snapshot(&[("dsp0.p0", Direction::Output, 0)]);
        let current = snapshot(&[("dsp0.p0", Direction::Output, 4)]);
        let events = diff(Some(&previous), &current, ChannelFilter::All);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].delta, None);
    }

    #[test]
    fn test_zero_count_never_reports() {
        let previous = snapshot(&[("dsp0.p0", Direction::Output, 9)]);
        let current = snapshot(&[("dsp0.p0", Direction::Output, 0)]);
        assert!(diff(Some(&previous), &current, ChannelFilter::All).is_empty());
        assert!(diff(None, &current, ChannelFilter::All).is_empty());
    }

    #[test]
    fn test_channel_missing_from_previous_snapshot() {
        let previous = snapshot(&[("dsp0.p0", Direction::Output, 3)]);
        let current = snapshot(&[
            ("dsp0.p0", Direction::Output, 3),
            ("dsp0.vp0", Direction::Output, 6),
        ]);
        let events = diff(Some(&previous), &current, ChannelFilter::All);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "dsp0.vp0");
        assert_eq!(events[0].delta, None);
    }

    #[test]
    fn test_output_only_filter() {
        let current = snapshot(&[
            ("dsp0.p0", Direction::Output, 5),
            ("dsp0.r0", Direction::Input, 5),
        ]);
        let events = diff(None, &current, ChannelFilter::OutputOnly);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "dsp0.p0");
        assert_eq!(events[0].direction, Direction::Output);
    }

    #[test]
    fn test_duplicate_names_first_match_wins() {
        let previous = snapshot(&[
            ("dsp0.p0", Direction::Output, 2),
            ("dsp0.p0", Direction::Output, 7),
        ]);
        let current = snapshot(&[("dsp0.p0", Direction::Output, 9)]);
        let events = diff(Some(&previous), &current, ChannelFilter::All);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].delta, Some(7));
    }
}
