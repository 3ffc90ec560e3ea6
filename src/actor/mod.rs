mod client;
mod persist_worker;
mod replica_actor;
mod ticker;
mod time;

pub(crate) use client::{ActorClient, ActorExited, Callback, Event, ReadIndexRejection, WeakActorClient};
pub(crate) use persist_worker::{PersistTask, PersistWorker};
pub(crate) use replica_actor::ReplicaActor;
pub(crate) use ticker::Ticker;
pub(crate) use time::RealClock;
