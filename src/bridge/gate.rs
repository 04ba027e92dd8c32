//! Publication gate: suppress repeats of the last payload within a cooldown

use crate::protocol::payload::Payload;
use std::time::Duration;
use tokio::time::Instant;

/// Last payload sent and when
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRecord {
    pub payload: Payload,
    pub at: Instant,
}

#[derive(Debug, Clone)]
pub struct PublishGate {
    cooldown: Duration,
    last: Option<PublishRecord>,
}

impl PublishGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last: None,
        }
    }

    /// A candidate passes when it differs from the last payload or the
    /// cooldown since that payload has run out
    pub fn should_publish(&self, candidate: &Payload, now: Instant) -> bool {
        match &self.last {
            None => true,
            Some(record) => {
                record.payload != *candidate
                    || now.saturating_duration_since(record.at) >= self.cooldown
            }
        }
    }

    pub fn record(&mut self, candidate: Payload, now: Instant) {
        self.last = Some(PublishRecord {
            payload: candidate,
            at: now,
        });
    }

    pub fn last(&self) -> Option<&PublishRecord> {
        self.last.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::payload::TextPolicy;
    use crate::tag::transceiver::BlockData;
    use proptest::prelude::*;

    const COOLDOWN: Duration = Duration::from_millis(5000);

    fn payload(text: &str) -> Payload {
        Payload::from_block(&BlockData::from_text(text).unwrap(), 2, TextPolicy::Trim)
    }

    #[test]
    fn test_first_payload_passes() {
        let gate = PublishGate::new(COOLDOWN);
        assert!(gate.should_publish(&payload("A"), Instant::now()));
        assert!(gate.last().is_none());
    }

    #[test]
    fn test_repeat_within_cooldown_suppressed() {
        let start = Instant::now();
        let mut gate = PublishGate::new(COOLDOWN);
        gate.record(payload("MERT2025GMLK9999"), start);

        let repeat = start + Duration::from_millis(200);
        assert!(!gate.should_publish(&payload("MERT2025GMLK9999"), repeat));
        assert!(gate.should_publish(&payload("OTHER"), repeat));
        assert!(gate.should_publish(&payload("MERT2025GMLK9999"), start + COOLDOWN));
    }

    proptest! {
        #[test]
        fn equal_within_cooldown_is_suppressed(
            text in "[A-Z0-9]{1,16}",
            elapsed_ms in 0u64..5000,
        ) {
            let start = Instant::now();
            let mut gate = PublishGate::new(COOLDOWN);
            gate.record(payload(&text), start);
            prop_assert!(!gate.should_publish(&payload(&text), start + Duration::from_millis(elapsed_ms)));
        }

        #[test]
        fn equal_after_cooldown_is_released(
            text in "[A-Z0-9]{1,16}",
            extra_ms in 0u64..1_000_000,
        ) {
            let start = Instant::now();
            let mut gate = PublishGate::new(COOLDOWN);
            gate.record(payload(&text), start);
            let later = start + COOLDOWN + Duration::from_millis(extra_ms);
            prop_assert!(gate.should_publish(&payload(&text), later));
        }

        #[test]
        fn change_always_publishes(
            a in "[A-Z0-9]{1,16}",
            b in "[A-Z0-9]{1,16}",
            elapsed_ms in 0u64..10_000,
        ) {
            prop_assume!(a != b);
            let start = Instant::now();
            let mut gate = PublishGate::new(COOLDOWN);
            gate.record(payload(&a), start);
            prop_assert!(gate.should_publish(&payload(&b), start + Duration::from_millis(elapsed_ms)));
        }
    }
}
