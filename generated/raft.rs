#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoLogEntry {
    #[prost(uint64, tag = "1")]
    pub term: u64,
    #[prost(uint64, tag = "2")]
    pub index: u64,
    #[prost(enumeration = "ProtoEntryKind", tag = "3")]
    pub kind: i32,
    #[prost(bytes = "vec", tag = "4")]
    pub data: ::prost::alloc::vec::Vec<u8>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoHardState {
    #[prost(uint64, tag = "1")]
    pub term: u64,
    /// Empty means no vote this term.
    #[prost(string, tag = "2")]
    pub voted_for: ::prost::alloc::string::String,
    #[prost(uint64, tag = "3")]
    pub commit: u64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoConfigState {
    #[prost(string, repeated, tag = "1")]
    pub voters: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(string, repeated, tag = "2")]
    pub learners: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(string, repeated, tag = "3")]
    pub voters_outgoing: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoSnapshotMetadata {
    #[prost(uint64, tag = "1")]
    pub index: u64,
    #[prost(uint64, tag = "2")]
    pub term: u64,
    #[prost(message, optional, tag = "3")]
    pub config_state: ::core::option::Option<ProtoConfigState>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoSnapshot {
    #[prost(message, optional, tag = "1")]
    pub metadata: ::core::option::Option<ProtoSnapshotMetadata>,
    #[prost(bytes = "vec", tag = "2")]
    pub data: ::prost::alloc::vec::Vec<u8>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoConfChangeSingle {
    #[prost(enumeration = "ProtoConfChangeKind", tag = "1")]
    pub kind: i32,
    #[prost(string, tag = "2")]
    pub replica_id: ::prost::alloc::string::String,
    /// Empty when the peer address is already known or not needed.
    #[prost(string, tag = "3")]
    pub address: ::prost::alloc::string::String,
}
/// No changes means "leave the joint configuration".
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoConfChange {
    #[prost(message, repeated, tag = "1")]
    pub changes: ::prost::alloc::vec::Vec<ProtoConfChangeSingle>,
}
/// Written to the WAL when the log is replaced by an installed snapshot.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoLogReset {
    #[prost(uint64, tag = "1")]
    pub index: u64,
    #[prost(uint64, tag = "2")]
    pub term: u64,
}
// ------- Messages -------

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoReadContext {
    #[prost(string, tag = "1")]
    pub origin: ::prost::alloc::string::String,
    #[prost(uint64, tag = "2")]
    pub id: u64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoRequestVote {
    #[prost(uint64, tag = "1")]
    pub last_log_index: u64,
    #[prost(uint64, tag = "2")]
    pub last_log_term: u64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoRequestVoteResponse {
    #[prost(bool, tag = "1")]
    pub vote_granted: bool,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoAppendEntries {
    #[prost(uint64, tag = "1")]
    pub prev_log_index: u64,
    #[prost(uint64, tag = "2")]
    pub prev_log_term: u64,
    #[prost(message, repeated, tag = "3")]
    pub entries: ::prost::alloc::vec::Vec<ProtoLogEntry>,
    #[prost(uint64, tag = "4")]
    pub leader_commit: u64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoAppendEntriesResponse {
    #[prost(bool, tag = "1")]
    pub success: bool,
    /// Success: last index now matching the leader. Rejection: the rejected prev_log_index.
    #[prost(uint64, tag = "2")]
    pub index: u64,
    #[prost(uint64, tag = "3")]
    pub reject_hint: u64,
    #[prost(uint64, tag = "4")]
    pub hint_term: u64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoInstallSnapshot {
    #[prost(message, optional, tag = "1")]
    pub snapshot: ::core::option::Option<ProtoSnapshot>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoHeartbeat {
    #[prost(uint64, tag = "1")]
    pub leader_commit: u64,
    #[prost(message, optional, tag = "2")]
    pub read_context: ::core::option::Option<ProtoReadContext>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoHeartbeatResponse {
    #[prost(message, optional, tag = "1")]
    pub read_context: ::core::option::Option<ProtoReadContext>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoReadIndex {
    #[prost(message, optional, tag = "1")]
    pub read_context: ::core::option::Option<ProtoReadContext>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoReadIndexResponse {
    #[prost(message, optional, tag = "1")]
    pub read_context: ::core::option::Option<ProtoReadContext>,
    #[prost(uint64, tag = "2")]
    pub read_index: u64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoMessage {
    #[prost(string, tag = "1")]
    pub from: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub to: ::prost::alloc::string::String,
    #[prost(uint64, tag = "3")]
    pub term: u64,
    #[prost(oneof = "proto_message::Body", tags = "4, 5, 6, 7, 8, 9, 10, 11, 12")]
    pub body: ::core::option::Option<proto_message::Body>,
}
/// Nested message and enum types in `ProtoMessage`.
pub mod proto_message {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Body {
        #[prost(message, tag = "4")]
        RequestVote(super::ProtoRequestVote),
        #[prost(message, tag = "5")]
        RequestVoteResponse(super::ProtoRequestVoteResponse),
        #[prost(message, tag = "6")]
        AppendEntries(super::ProtoAppendEntries),
        #[prost(message, tag = "7")]
        AppendEntriesResponse(super::ProtoAppendEntriesResponse),
        #[prost(message, tag = "8")]
        InstallSnapshot(super::ProtoInstallSnapshot),
        #[prost(message, tag = "9")]
        Heartbeat(super::ProtoHeartbeat),
        #[prost(message, tag = "10")]
        HeartbeatResponse(super::ProtoHeartbeatResponse),
        #[prost(message, tag = "11")]
        ReadIndex(super::ProtoReadIndex),
        #[prost(message, tag = "12")]
        ReadIndexResponse(super::ProtoReadIndexResponse),
    }
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoMessageBatch {
    #[prost(message, repeated, tag = "1")]
    pub messages: ::prost::alloc::vec::Vec<ProtoMessage>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoDeliveryAck {
    #[prost(uint32, tag = "1")]
    pub accepted: u32,
}
// ------- Reference key-value state machine -------

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoKvCommand {
    #[prost(oneof = "proto_kv_command::Command", tags = "1, 2")]
    pub command: ::core::option::Option<proto_kv_command::Command>,
}
/// Nested message and enum types in `ProtoKvCommand`.
pub mod proto_kv_command {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Command {
        #[prost(message, tag = "1")]
        Put(super::ProtoKvPut),
        #[prost(message, tag = "2")]
        Delete(super::ProtoKvDelete),
    }
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoKvPut {
    #[prost(string, tag = "1")]
    pub key: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "2")]
    pub value: ::prost::alloc::vec::Vec<u8>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoKvDelete {
    #[prost(string, tag = "1")]
    pub key: ::prost::alloc::string::String,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoKvPair {
    #[prost(string, tag = "1")]
    pub key: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "2")]
    pub value: ::prost::alloc::vec::Vec<u8>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoKvSnapshot {
    #[prost(uint64, tag = "1")]
    pub applied_index: u64,
    #[prost(message, repeated, tag = "2")]
    pub pairs: ::prost::alloc::vec::Vec<ProtoKvPair>,
}
// ------- Log and state types -------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ProtoEntryKind {
    Normal = 0,
    ConfChange = 1,
}
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ProtoConfChangeKind {
    AddVoter = 0,
    AddLearner = 1,
    RemoveNode = 2,
}
#[doc = r" Generated client implementations."]
pub mod grpc_raft_client {
    #![allow(unused_variables, dead_code, missing_docs)]
    use tonic::codegen::*;
    #[doc = " Peer to peer delivery of raft messages. Messages are one-way; responses"]
    #[doc = " travel back as their own messages."]
    pub struct GrpcRaftClient<T> {
        inner: tonic::client::Grpc<T>,
    }
    impl GrpcRaftClient<tonic::transport::Channel> {
        #[doc = r" Attempt to create a new client by connecting to a given endpoint."]
        pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
        where
            D: std::convert::TryInto<tonic::transport::Endpoint>,
            D::Error: Into<StdError>,
        {
            let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
            Ok(Self::new(conn))
        }
    }
    impl<T> GrpcRaftClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::ResponseBody: Body + HttpBody + Send + 'static,
        T::Error: Into<StdError>,
        <T::ResponseBody as HttpBody>::Error: Into<StdError> + Send,
    {
        pub fn new(inner: T) -> Self {
            let inner = tonic::client::Grpc::new(inner);
            Self { inner }
        }
        pub fn with_interceptor(inner: T, interceptor: impl Into<tonic::Interceptor>) -> Self {
            let inner = tonic::client::Grpc::with_interceptor(inner, interceptor);
            Self { inner }
        }
        pub async fn deliver_messages(
            &mut self,
            request: impl tonic::IntoRequest<super::ProtoMessageBatch>,
        ) -> Result<tonic::Response<super::ProtoDeliveryAck>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/raft.GrpcRaft/DeliverMessages");
            self.inner.unary(request.into_request(), path, codec).await
        }
    }
    impl<T: Clone> Clone for GrpcRaftClient<T> {
        fn clone(&self) -> Self {
            Self {
                inner: self.inner.clone(),
            }
        }
    }
    impl<T> std::fmt::Debug for GrpcRaftClient<T> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "GrpcRaftClient {{ ... }}")
        }
    }
}
#[doc = r" Generated server implementations."]
pub mod grpc_raft_server {
    #![allow(unused_variables, dead_code, missing_docs)]
    use tonic::codegen::*;
    #[doc = "Generated trait containing gRPC methods that should be implemented for use with GrpcRaftServer."]
    #[async_trait]
    pub trait GrpcRaft: Send + Sync + 'static {
        async fn deliver_messages(
            &self,
            request: tonic::Request<super::ProtoMessageBatch>,
        ) -> Result<tonic::Response<super::ProtoDeliveryAck>, tonic::Status>;
    }
    #[doc = " Peer to peer delivery of raft messages. Messages are one-way; responses"]
    #[doc = " travel back as their own messages."]
    #[derive(Debug)]
    pub struct GrpcRaftServer<T: GrpcRaft> {
        inner: _Inner<T>,
    }
    struct _Inner<T>(Arc<T>, Option<tonic::Interceptor>);
    impl<T: GrpcRaft> GrpcRaftServer<T> {
        pub fn new(inner: T) -> Self {
            let inner = Arc::new(inner);
            let inner = _Inner(inner, None);
            Self { inner }
        }
        pub fn with_interceptor(inner: T, interceptor: impl Into<tonic::Interceptor>) -> Self {
            let inner = Arc::new(inner);
            let inner = _Inner(inner, Some(interceptor.into()));
            Self { inner }
        }
    }
    impl<T, B> Service<http::Request<B>> for GrpcRaftServer<T>
    where
        T: GrpcRaft,
        B: HttpBody + Send + Sync + 'static,
        B::Error: Into<StdError> + Send + 'static,
    {
        type Response = http::Response<tonic::body::BoxBody>;
        type Error = Never;
        type Future = BoxFuture<Self::Response, Self::Error>;
        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
        fn call(&mut self, req: http::Request<B>) -> Self::Future {
            let inner = self.inner.clone();
            match req.uri().path() {
                "/raft.GrpcRaft/DeliverMessages" => {
                    #[allow(non_camel_case_types)]
                    struct DeliverMessagesSvc<T: GrpcRaft>(pub Arc<T>);
                    impl<T: GrpcRaft> tonic::server::UnaryService<super::ProtoMessageBatch> for DeliverMessagesSvc<T> {
                        type Response = super::ProtoDeliveryAck;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::ProtoMessageBatch>,
                        ) -> Self::Future {
                            let inner = self.0.clone();
                            let fut = async move { (*inner).deliver_messages(request).await };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let interceptor = inner.1.clone();
                        let inner = inner.0;
                        let method = DeliverMessagesSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = if let Some(interceptor) = interceptor {
                            tonic::server::Grpc::with_interceptor(codec, interceptor)
                        } else {
                            tonic::server::Grpc::new(codec)
                        };
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                _ => Box::pin(async move {
                    Ok(http::Response::builder()
                        .status(200)
                        .header("grpc-status", "12")
                        .header("content-type", "application/grpc")
                        .body(tonic::body::BoxBody::empty())
                        .unwrap())
                }),
            }
        }
    }
    impl<T: GrpcRaft> Clone for GrpcRaftServer<T> {
        fn clone(&self) -> Self {
            let inner = self.inner.clone();
            Self { inner }
        }
    }
    impl<T: GrpcRaft> Clone for _Inner<T> {
        fn clone(&self) -> Self {
            Self(self.0.clone(), self.1.clone())
        }
    }
    impl<T: std::fmt::Debug> std::fmt::Debug for _Inner<T> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self.0)
        }
    }
    impl<T: GrpcRaft> tonic::transport::NamedService for GrpcRaftServer<T> {
        const NAME: &'static str = "raft.GrpcRaft";
    }
}
