use crate::actor::WeakActorClient;
use crate::grpc::grpc_raft_client::GrpcRaftClient;
use crate::grpc::ProtoMessageBatch;
use crate::replica::{message_to_proto, Message, MessageBody, ReplicaId};
use crate::transport::Transport;
use std::cmp;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tonic::codegen::http::uri;
use tonic::transport::{Channel, Endpoint};

// Messages coalesced into one DeliverMessages call.
const MAX_MESSAGES_PER_CALL: usize = 64;

#[derive(Clone, Debug)]
pub(crate) struct PeerOptions {
    pub(crate) queue_capacity: usize,
    pub(crate) initial_backoff: Duration,
    pub(crate) max_backoff: Duration,
    pub(crate) max_send_attempts: u32,
}

/// GrpcTransport keeps one sender task per peer. Each task owns an ordered, bounded queue and a
/// lazily (re)connected gRPC channel.
pub(crate) struct GrpcTransport {
    logger: slog::Logger,
    options: PeerOptions,
    actor_client: WeakActorClient,
    peers: Mutex<HashMap<ReplicaId, mpsc::Sender<Message>>>,
}

impl GrpcTransport {
    pub(crate) fn new(logger: slog::Logger, options: PeerOptions, actor_client: WeakActorClient) -> Self {
        GrpcTransport {
            logger,
            options,
            actor_client,
            peers: Mutex::new(HashMap::new()),
        }
    }

    fn report_dropped(&self, message: &Message) {
        let _ = self.actor_client.try_report_unreachable(message.to.clone());
        if let MessageBody::InstallSnapshot { .. } = message.body {
            let _ = self.actor_client.try_report_snapshot(message.to.clone(), false);
        }
    }
}

impl Transport for GrpcTransport {
    fn send(&self, message: Message) {
        let queue = {
            let peers = self.peers.lock().expect("Peer map lock poisoned");
            peers.get(&message.to).cloned()
        };

        match queue {
            Some(queue) => {
                if let Err(e) = queue.try_send(message) {
                    let message = match e {
                        mpsc::error::TrySendError::Full(m) => m,
                        mpsc::error::TrySendError::Closed(m) => m,
                    };
                    slog::debug!(self.logger, "Queue to {:?} unavailable. Dropping {}", message.to, message.body.name());
                    self.report_dropped(&message);
                }
            }
            None => {
                slog::debug!(self.logger, "No address for {:?}. Dropping {}", message.to, message.body.name());
                self.report_dropped(&message);
            }
        }
    }

    fn add_peer(&self, replica_id: &ReplicaId, address: &str) {
        let mut peers = self.peers.lock().expect("Peer map lock poisoned");
        if peers.contains_key(replica_id) {
            return;
        }

        let (tx, rx) = mpsc::channel(self.options.queue_capacity);
        let sender = PeerSender {
            logger: self.logger.new(slog::o!("Peer" => replica_id.to_string())),
            peer_id: replica_id.clone(),
            url: format!("http://{}", address),
            receiver: rx,
            client: None,
            options: self.options.clone(),
            actor_client: self.actor_client.clone(),
        };
        tokio::spawn(sender.run());
        peers.insert(replica_id.clone(), tx);

        slog::info!(self.logger, "Added peer {:?} at {}", replica_id, address);
    }

    fn remove_peer(&self, replica_id: &ReplicaId) {
        // Dropping the queue's only sender stops the peer's task once its queue drains.
        let removed = self.peers.lock().expect("Peer map lock poisoned").remove(replica_id);
        if removed.is_some() {
            slog::info!(self.logger, "Removed peer {:?}", replica_id);
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum SendError {
    #[error("Invalid peer URI: {0}")]
    InvalidUri(#[from] uri::InvalidUri),
    #[error("Connect failure: {0}")]
    Connect(#[from] tonic::transport::Error),
    #[error("RPC failure: {0}")]
    Rpc(#[from] tonic::Status),
}

struct PeerSender {
    logger: slog::Logger,
    peer_id: ReplicaId,
    url: String,
    receiver: mpsc::Receiver<Message>,
    client: Option<GrpcRaftClient<Channel>>,
    options: PeerOptions,
    actor_client: WeakActorClient,
}

impl PeerSender {
    /// Runs until the peer is removed or the transport is dropped.
    async fn run(mut self) {
        while let Some(first) = self.receiver.recv().await {
            let mut batch = vec![first];
            while batch.len() < MAX_MESSAGES_PER_CALL {
                match self.receiver.try_recv() {
                    Ok(message) => batch.push(message),
                    Err(_) => break,
                }
            }

            if self.deliver(batch).await.is_err() {
                break;
            }
        }

        slog::debug!(self.logger, "Peer sender exiting");
    }

    /// Errors only if the actor is gone.
    async fn deliver(&mut self, batch: Vec<Message>) -> Result<(), ()> {
        let has_snapshot = batch
            .iter()
            .any(|m| matches!(m.body, MessageBody::InstallSnapshot { .. }));
        let request = ProtoMessageBatch {
            messages: batch.into_iter().map(message_to_proto).collect(),
        };

        let mut backoff = self.options.initial_backoff;
        for attempt in 1..=self.options.max_send_attempts {
            match self.try_deliver(request.clone()).await {
                Ok(()) => {
                    if has_snapshot {
                        self.actor_client
                            .report_snapshot(self.peer_id.clone(), true)
                            .await
                            .map_err(|_| ())?;
                    }
                    return Ok(());
                }
                Err(e) => {
                    slog::debug!(self.logger, "Delivery attempt {} failed: {}", attempt, e);
                    if attempt < self.options.max_send_attempts {
                        tokio::time::sleep(backoff).await;
                        backoff = cmp::min(backoff * 2, self.options.max_backoff);
                    }
                }
            }
        }

        slog::info!(
            self.logger,
            "Dropping {} message(s) after {} attempts",
            request.messages.len(),
            self.options.max_send_attempts
        );
        self.actor_client
            .report_unreachable(self.peer_id.clone())
            .await
            .map_err(|_| ())?;
        if has_snapshot {
            self.actor_client
                .report_snapshot(self.peer_id.clone(), false)
                .await
                .map_err(|_| ())?;
        }
        Ok(())
    }

    async fn try_deliver(&mut self, request: ProtoMessageBatch) -> Result<(), SendError> {
        // A failed call leaves the client unset, so the next attempt reconnects.
        let mut client = match self.client.take() {
            Some(client) => client,
            None => {
                let endpoint = Endpoint::from_shared(self.url.clone())?;
                let connection = endpoint.connect().await?;
                slog::debug!(self.logger, "Connected to {}", self.url);
                GrpcRaftClient::new(connection)
            }
        };

        client.deliver_messages(request).await?;
        self.client = Some(client);
        Ok(())
    }
}
