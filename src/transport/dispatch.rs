use crate::replica::Message;
use crate::transport::Transport;
use std::sync::Arc;
use tokio::sync::mpsc;

/// DispatchWorker hands persisted messages to the transport, in batch order.
pub(crate) struct DispatchWorker {
    logger: slog::Logger,
    receiver: mpsc::Receiver<Vec<Message>>,
    transport: Arc<dyn Transport>,
}

impl DispatchWorker {
    pub(crate) fn new(logger: slog::Logger, receiver: mpsc::Receiver<Vec<Message>>, transport: Arc<dyn Transport>) -> Self {
        DispatchWorker {
            logger,
            receiver,
            transport,
        }
    }

    pub(crate) async fn run(mut self) {
        while let Some(messages) = self.receiver.recv().await {
            for message in messages {
                slog::trace!(
                    self.logger,
                    "Sending {} to {:?} (term {:?})",
                    message.body.name(),
                    message.to,
                    message.term
                );
                self.transport.send(message);
            }
        }

        slog::debug!(self.logger, "Dispatch worker exiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replica::{MessageBody, ReplicaId, Term};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<Message>>,
    }

    impl Transport for RecordingTransport {
        fn send(&self, message: Message) {
            self.sent.lock().unwrap().push(message);
        }
    }

    fn heartbeat_response(to: &str) -> Message {
        Message {
            from: ReplicaId::new("a"),
            to: ReplicaId::new(to),
            term: Term::new(1),
            body: MessageBody::HeartbeatResponse { read_context: None },
        }
    }

    #[tokio::test]
    async fn forwards_in_order() {
        let transport = Arc::new(RecordingTransport::default());
        let (tx, rx) = mpsc::channel(4);
        let logger = slog::Logger::root(slog::Discard, slog::o!());
        let worker = tokio::spawn(DispatchWorker::new(logger, rx, transport.clone()).run());

        tx.send(vec![heartbeat_response("b"), heartbeat_response("c")]).await.unwrap();
        tx.send(vec![heartbeat_response("d")]).await.unwrap();
        drop(tx);
        worker.await.unwrap();

        let recipients: Vec<_> = transport
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.to.as_str().to_string())
            .collect();
        assert_eq!(recipients, vec!["b", "c", "d"]);
    }
}
