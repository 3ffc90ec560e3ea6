mod apply_worker;
mod proposals;
mod state_machine;

pub use proposals::ProposalError;
pub use state_machine::StateMachine;
pub use state_machine::StateMachineError;
pub use state_machine::StateMachineOutput;

pub(crate) use apply_worker::{ApplyBatch, ApplyWorker, ApplyWorkerConfig};
pub(crate) use proposals::{proposal_registry, EnqueuedProposal, ProposalRegistrar, ProposalRegistry};
