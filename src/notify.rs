//! Outbound contract to notification sinks (spec.md §6). The core is
//! fire-and-forget here: sinks never get a reference to mutable state,
//! only the rendered message.

/// Closed set of event kinds a sink can receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    StreamerOnline,
    StreamerOffline,
    BetWin,
    BetLose,
    BetRefund,
    BetStart,
    BetFilters,
    BetGeneral,
    BetFailed,
    DropClaim,
    DropStatus,
    BonusClaim,
    MomentClaim,
    JoinRaid,
    GainFor,
    ChatMention,
}

pub trait NotificationSink: Send + Sync {
    fn send(&self, event: EventKind, message: &str);
}

/// Default sink: routes every notification through `tracing`. Real chat
/// bot / push / email sinks are excluded collaborators (spec.md §1) and
/// live outside this crate.
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn send(&self, event: EventKind, message: &str) {
        tracing::info!(?event, "{message}");
    }
}

/// Fan out to every registered sink; used by the Miner as the single
/// point all components call through.
pub struct SinkList(pub Vec<Box<dyn NotificationSink>>);

impl SinkList {
    pub fn send(&self, event: EventKind, message: &str) {
        for sink in &self.0 {
            sink.send(event, message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct RecordingSink(Arc<Mutex<Vec<(EventKind, String)>>>);
    impl NotificationSink for RecordingSink {
        fn send(&self, event: EventKind, message: &str) {
            self.0.lock().unwrap().push((event, message.to_owned()));
        }
    }

    #[test]
    fn fan_out_reaches_every_sink() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sinks = SinkList(vec![
            Box::new(RecordingSink(log.clone())),
            Box::new(RecordingSink(log.clone())),
        ]);
        sinks.send(EventKind::BetWin, "won 100");
        assert_eq!(log.lock().unwrap().len(), 2);
    }
}
