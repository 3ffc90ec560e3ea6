use tokio::time::Instant;

/// Clock is the ticker's only source of time, so tests can drive ticks by hand.
#[async_trait::async_trait]
pub(crate) trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
    async fn sleep_until(&mut self, deadline: Instant);
}

#[derive(Copy, Clone)]
pub(crate) struct RealClock;

#[async_trait::async_trait]
impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep_until(&mut self, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
    }
}

#[cfg(test)]
pub(crate) use mock::{mocked_clock, MockClock, MockClockController};

#[cfg(test)]
mod mock {
    use super::Clock;
    use tokio::sync::watch;
    use tokio::time::{Duration, Instant};

    pub(crate) fn mocked_clock() -> (MockClock, MockClockController) {
        let (tx, rx) = watch::channel(Instant::now());

        (MockClock { now: rx }, MockClockController { now: tx })
    }

    #[derive(Clone)]
    pub(crate) struct MockClock {
        now: watch::Receiver<Instant>,
    }

    #[async_trait::async_trait]
    impl Clock for MockClock {
        fn now(&self) -> Instant {
            *self.now.borrow()
        }

        async fn sleep_until(&mut self, deadline: Instant) {
            while *self.now.borrow() < deadline {
                if self.now.changed().await.is_err() {
                    // Controller is gone; time stands still forever.
                    std::future::pending::<()>().await;
                }
            }
        }
    }

    pub(crate) struct MockClockController {
        now: watch::Sender<Instant>,
    }

    impl MockClockController {
        pub(crate) fn now(&self) -> Instant {
            *self.now.borrow()
        }

        /// Moves time forward. Sleepers wake once their deadline is at or before the new time,
        /// so advance in steps no larger than the granularity under test.
        pub(crate) fn advance(&self, duration: Duration) {
            let next = self.now() + duration;
            let _ = self.now.send(next);
        }
    }
}
