use crate::actor::WeakActorClient;
use crate::grpc::grpc_raft_server::{GrpcRaft, GrpcRaftServer};
use crate::grpc::{ProtoDeliveryAck, ProtoMessageBatch};
use crate::replica::{message_from_proto, ReplicaId};
use std::net::SocketAddr;
use tokio::sync::oneshot;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

/// Stops the server once dropped.
pub(crate) struct RpcServerShutdownHandle {
    _tx: oneshot::Sender<()>,
}

/// RpcServer receives peer messages and steps them into the local replica. It never waits on the
/// replica: a full event queue drops the message, and the sender's retry (or the protocol's own
/// retransmission) covers the loss.
pub(crate) struct RpcServer {
    logger: slog::Logger,
    my_replica_id: ReplicaId,
    local_replica: WeakActorClient,
}

impl RpcServer {
    pub(crate) fn new(logger: slog::Logger, my_replica_id: ReplicaId, local_replica: WeakActorClient) -> Self {
        RpcServer {
            logger,
            my_replica_id,
            local_replica,
        }
    }

    pub(crate) fn shutdown_handle() -> (RpcServerShutdownHandle, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (RpcServerShutdownHandle { _tx: tx }, rx)
    }

    pub(crate) async fn run(self, socket_addr: SocketAddr, shutdown: oneshot::Receiver<()>) {
        let logger = self.logger.clone();
        slog::info!(logger, "Listening on '{:?}'", socket_addr);

        let result = Server::builder()
            .add_service(GrpcRaftServer::new(self))
            .serve_with_shutdown(socket_addr, async {
                // Sent or dropped, both mean stop.
                let _ = shutdown.await;
            })
            .await;

        match result {
            Ok(()) => slog::info!(logger, "Server has exited"),
            Err(e) => slog::error!(logger, "Server has failed: {}", e),
        }
    }

    fn handle_batch(&self, batch: ProtoMessageBatch) -> Result<ProtoDeliveryAck, Status> {
        let mut accepted = 0;
        for proto_message in batch.messages {
            let message = match message_from_proto(proto_message) {
                Ok(message) => message,
                Err(e) => {
                    slog::debug!(self.logger, "Dropping malformed message: {}", e);
                    continue;
                }
            };
            if message.to != self.my_replica_id {
                slog::debug!(self.logger, "Dropping message addressed to {:?}", message.to);
                continue;
            }

            self.local_replica
                .try_step(message)
                .map_err(|_| Status::unavailable("Replica has exited"))?;
            accepted += 1;
        }

        Ok(ProtoDeliveryAck { accepted })
    }
}

#[async_trait::async_trait]
impl GrpcRaft for RpcServer {
    async fn deliver_messages(
        &self,
        rpc_request_wrapped: Request<ProtoMessageBatch>,
    ) -> Result<Response<ProtoDeliveryAck>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::trace!(self.logger, "ServerWire - {} message(s)", rpc_request.messages.len());
        self.handle_batch(rpc_request).map(Response::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{ActorClient, Event};
    use crate::replica::{message_to_proto, Message, MessageBody, Term};

    fn server(client: &ActorClient) -> RpcServer {
        RpcServer::new(
            slog::Logger::root(slog::Discard, slog::o!()),
            ReplicaId::new("b"),
            client.weak(),
        )
    }

    fn message(to: &str) -> Message {
        Message {
            from: ReplicaId::new("a"),
            to: ReplicaId::new(to),
            term: Term::new(3),
            body: MessageBody::RequestVoteResponse { vote_granted: true },
        }
    }

    #[tokio::test]
    async fn steps_valid_messages_and_drops_the_rest() {
        let (client, mut receiver) = ActorClient::new(8);
        let server = server(&client);

        let mut malformed = message_to_proto(message("b"));
        malformed.body = None;
        let batch = ProtoMessageBatch {
            messages: vec![message_to_proto(message("b")), malformed, message_to_proto(message("c"))],
        };

        let ack = server.handle_batch(batch).unwrap();
        assert_eq!(ack.accepted, 1);
        match receiver.recv().await {
            Some(Event::Step(stepped)) => assert_eq!(stepped, message("b")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn unavailable_once_replica_exits() {
        let (client, receiver) = ActorClient::new(8);
        let server = server(&client);
        drop(client);
        drop(receiver);

        let batch = ProtoMessageBatch {
            messages: vec![message_to_proto(message("b"))],
        };
        let status = server.handle_batch(batch).unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unavailable);
    }
}
