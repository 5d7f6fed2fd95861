//! Reporter: text rendering of snapshots and change events

use chrono::Local;

use crate::diff::{ChangeEvent, ChannelFilter};
use crate::snapshot::Snapshot;

/// Wall-clock timestamp in local time, millisecond precision (HH:MM:SS.mmm).
pub fn timestamp() -> String {
    Local::now().format("%H:%M:%S%.3f").to_string()
}

/// Render one line per filtered channel: `"<name>: <count> xruns"`, with an
/// optional timestamp prefix. Channel order is preserved.
pub fn render_snapshot(
    snapshot: &Snapshot,
    filter: ChannelFilter,
    with_timestamp: bool,
) -> Vec<String> {
    let ts = if with_timestamp {
        Some(timestamp())
    } else {
        None
    };

    snapshot
        .channels
        .iter()
        .filter(|chan| filter.admits(chan.direction))
        .map(|chan| match &ts {
            Some(ts) => format!("{ts} {}: {} xruns", chan.name, chan.xruns),
            None => format!("{}: {} xruns", chan.name, chan.xruns),
        })
        .collect()
}

/// Render one line per change event, in input order.
///
/// With a delta: `"<ts> <name>: <count> xruns (+<delta>)"`; first
/// occurrences drop the parenthesized part.
pub fn render_events(events: &[ChangeEvent], with_timestamp: bool) -> Vec<String> {
    events
        .iter()
        .map(|event| {
            let mut line = String::new();
            if with_timestamp {
                line.push_str(&timestamp());
                line.push(' ');
            }
            line.push_str(&format!("{}: {} xruns", event.name, event.xruns));
            if let Some(delta) = event.delta {
                line.push_str(&format!(" (+{delta})"));
            }
            line
        })
        .collect()
}
