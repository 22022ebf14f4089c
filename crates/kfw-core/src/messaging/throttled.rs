use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::UserId,
    messaging::{
        port::MessagingPort,
        types::{MessagingCapabilities, OutgoingMessage},
    },
    Result,
};

/// Spacing rules for notification fan-out.
#[derive(Clone, Copy, Debug)]
pub struct SendPacing {
    /// Gap between any two sends, whoever the recipient is.
    pub any_send: Duration,
    /// Gap between two sends to the same recipient.
    pub same_recipient: Duration,
}

impl Default for SendPacing {
    /// Stays under Telegram's bulk limit (~30 msg/s) and its one message per
    /// second per chat.
    fn default() -> Self {
        Self {
            any_send: Duration::from_millis(40),
            same_recipient: Duration::from_millis(1050),
        }
    }
}

/// Hands out send slots at least `gap` apart.
#[derive(Debug)]
struct SlotClock {
    gap: Duration,
    free_at: Instant,
}

impl SlotClock {
    fn new(gap: Duration) -> Self {
        Self {
            gap,
            free_at: Instant::now(),
        }
    }

    /// Claim the earliest free slot; returns how long to wait for it.
    fn claim(&mut self) -> Duration {
        let now = Instant::now();
        let slot = self.free_at.max(now);
        self.free_at = slot + self.gap;
        slot.saturating_duration_since(now)
    }
}

/// MessagingPort decorator that paces sends.
///
/// A burst of new listings for one query can mean dozens of messages to the
/// same subscribers within a second, which Telegram answers with 429s.
pub struct ThrottledMessenger {
    inner: Arc<dyn MessagingPort>,
    pacing: SendPacing,
    any_send: Mutex<SlotClock>,
    recipients: Mutex<HashMap<UserId, Arc<Mutex<SlotClock>>>>,
}

impl ThrottledMessenger {
    pub fn new(inner: Arc<dyn MessagingPort>, pacing: SendPacing) -> Self {
        Self {
            inner,
            pacing,
            any_send: Mutex::new(SlotClock::new(pacing.any_send)),
            recipients: Mutex::new(HashMap::new()),
        }
    }

    async fn recipient_clock(&self, to: UserId) -> Arc<Mutex<SlotClock>> {
        let mut clocks = self.recipients.lock().await;
        clocks
            .entry(to)
            .or_insert_with(|| Arc::new(Mutex::new(SlotClock::new(self.pacing.same_recipient))))
            .clone()
    }

    async fn wait_turn(&self, to: UserId) {
        let global = self.any_send.lock().await.claim();
        let own = {
            let clock = self.recipient_clock(to).await;
            let mut clock = clock.lock().await;
            clock.claim()
        };

        let wait = global.max(own);
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }
}

#[async_trait::async_trait]
impl MessagingPort for ThrottledMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        self.inner.capabilities()
    }

    async fn send(&self, to: UserId, message: &OutgoingMessage) -> Result<()> {
        self.wait_turn(to).await;
        self.inner.send(to, message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct Recorder {
        sent: StdMutex<Vec<i64>>,
    }

    #[async_trait::async_trait]
    impl MessagingPort for Recorder {
        fn capabilities(&self) -> MessagingCapabilities {
            MessagingCapabilities {
                supports_photos: false,
                max_caption_len: 512,
            }
        }

        async fn send(&self, to: UserId, _message: &OutgoingMessage) -> Result<()> {
            self.sent.lock().unwrap().push(to.0);
            Ok(())
        }
    }

    fn text() -> OutgoingMessage {
        OutgoingMessage::Text {
            html: "hi".to_string(),
            button: None,
        }
    }

    #[test]
    fn clock_spaces_consecutive_claims() {
        let mut clock = SlotClock::new(Duration::from_secs(10));
        assert!(clock.claim().is_zero());
        assert!(clock.claim() > Duration::from_secs(9));
    }

    #[tokio::test]
    async fn forwards_sends_and_capabilities() {
        let inner = Arc::new(Recorder::default());
        let throttled = ThrottledMessenger::new(
            inner.clone(),
            SendPacing {
                any_send: Duration::ZERO,
                same_recipient: Duration::ZERO,
            },
        );
        throttled.send(UserId(1), &text()).await.unwrap();
        throttled.send(UserId(2), &text()).await.unwrap();
        assert_eq!(*inner.sent.lock().unwrap(), vec![1, 2]);
        assert_eq!(throttled.capabilities(), inner.capabilities());
    }

    #[tokio::test]
    async fn repeat_recipient_waits_for_its_gap() {
        let inner = Arc::new(Recorder::default());
        let throttled = ThrottledMessenger::new(
            inner.clone(),
            SendPacing {
                any_send: Duration::ZERO,
                same_recipient: Duration::from_millis(80),
            },
        );

        let started = std::time::Instant::now();
        throttled.send(UserId(1), &text()).await.unwrap();
        throttled.send(UserId(2), &text()).await.unwrap();
        let after_two = started.elapsed();
        throttled.send(UserId(1), &text()).await.unwrap();

        assert!(after_two < Duration::from_millis(80));
        assert!(started.elapsed() >= Duration::from_millis(75));
        assert_eq!(*inner.sent.lock().unwrap(), vec![1, 2, 1]);
    }
}
