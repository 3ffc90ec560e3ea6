use crate::actor::client::WeakActorClient;
use crate::actor::time::Clock;
use tokio::time::Duration;

/// Ticker drives the replica's logical clock. Election and heartbeat timeouts are counted in
/// ticks by the replica itself.
pub(crate) struct Ticker<C: Clock> {
    logger: slog::Logger,
    tick_duration: Duration,
    actor_client: WeakActorClient,
    clock: C,
}

impl<C: Clock> Ticker<C> {
    pub(crate) fn new(logger: slog::Logger, tick_duration: Duration, actor_client: WeakActorClient, clock: C) -> Self {
        Ticker {
            logger,
            tick_duration,
            actor_client,
            clock,
        }
    }

    /// Runs until the actor exits.
    pub(crate) async fn run(mut self) {
        let mut next_wake = self.clock.now();
        loop {
            next_wake += self.tick_duration;
            self.clock.sleep_until(next_wake).await;

            if self.actor_client.tick().await.is_err() {
                slog::debug!(self.logger, "Actor exited. Stopping ticker.");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::client::{ActorClient, Event};
    use crate::actor::time::mocked_clock;
    use tokio::sync::mpsc;

    async fn assert_ticks(receiver: &mut mpsc::Receiver<Event>, count: usize) {
        for _ in 0..count {
            let event = tokio::time::timeout(Duration::from_secs(5), receiver.recv())
                .await
                .expect("Expected a tick");
            assert!(matches!(event, Some(Event::Tick)));
        }
    }

    async fn assert_no_tick(receiver: &mut mpsc::Receiver<Event>) {
        tokio::time::timeout(Duration::from_millis(20), receiver.recv())
            .await
            .expect_err("Expected no tick");
    }

    #[tokio::test]
    async fn ticks_follow_the_clock() {
        let tick = Duration::from_millis(100);
        let (client, mut receiver) = ActorClient::new(16);
        let (clock, controller) = mocked_clock();
        let logger = slog::Logger::root(slog::Discard, slog::o!());
        tokio::spawn(Ticker::new(logger, tick, client.weak(), clock).run());

        // Half a tick offset to stay clear of boundaries.
        controller.advance(tick / 2);
        assert_no_tick(&mut receiver).await;

        controller.advance(tick);
        assert_ticks(&mut receiver, 1).await;
        assert_no_tick(&mut receiver).await;

        // Small steps, so each deadline is observed.
        for _ in 0..3 {
            controller.advance(tick);
            assert_ticks(&mut receiver, 1).await;
        }
        assert_no_tick(&mut receiver).await;
    }

    #[tokio::test]
    async fn stops_when_actor_is_gone() {
        let tick = Duration::from_millis(100);
        let (client, receiver) = ActorClient::new(16);
        let (clock, controller) = mocked_clock();
        let logger = slog::Logger::root(slog::Discard, slog::o!());
        let ticker = tokio::spawn(Ticker::new(logger, tick, client.weak(), clock).run());

        drop(client);
        drop(receiver);
        controller.advance(tick * 2);

        tokio::time::timeout(Duration::from_secs(5), ticker)
            .await
            .expect("Ticker should exit")
            .unwrap();
    }
}
