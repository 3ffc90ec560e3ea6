use crate::apply::state_machine::StateMachineOutput;
use crate::commitlog::Index;
use crate::replica::Term;
use std::collections::BTreeMap;
use tokio::sync::{mpsc, oneshot};

/// Creates the two ends of proposal tracking. The registrar lives with the replica actor, which
/// learns each proposal's (index, term). The registry lives with the apply worker, which learns
/// what was actually applied at each index.
///
/// The channel is unbounded so the actor never waits on the apply worker. Registrations are sent
/// before the ready batch carrying the entry, and the apply worker drains the channel before
/// each batch, so a registration is always seen before its entry is applied.
pub(crate) fn proposal_registry() -> (ProposalRegistrar, ProposalRegistry) {
    let (tx, rx) = mpsc::unbounded_channel();

    (
        ProposalRegistrar { sender: tx },
        ProposalRegistry {
            receiver: rx,
            pending: BTreeMap::new(),
        },
    )
}

#[derive(Debug, thiserror::Error, Eq, PartialEq)]
pub enum ProposalError {
    /// The entry may or may not have been committed, e.g. leadership changed while it was in
    /// flight. Re-read state to find out.
    #[error("Proposal outcome unknown")]
    OutcomeUnknown,
    // Replica logic runs on a background task. This error is returned if the task has exited.
    #[error("Replica task has exited")]
    ReplicaExited,
}

type ProposalResult = Result<StateMachineOutput, ProposalError>;

enum RegistryCommand {
    Register {
        index: Index,
        term: Term,
        responder: oneshot::Sender<ProposalResult>,
    },
    AbandonAll,
}

/// A proposal appended to the leader's log, waiting to be applied.
#[derive(Debug)]
pub(crate) struct EnqueuedProposal {
    pub(crate) index: Index,
    pub(crate) term: Term,
    pub(crate) completion: oneshot::Receiver<ProposalResult>,
}

pub(crate) struct ProposalRegistrar {
    sender: mpsc::UnboundedSender<RegistryCommand>,
}

impl ProposalRegistrar {
    pub(crate) fn register(&self, index: Index, term: Term) -> EnqueuedProposal {
        let (tx, rx) = oneshot::channel();
        // If the apply worker is gone, the sender drops and the waiter sees ReplicaExited.
        let _ = self.sender.send(RegistryCommand::Register {
            index,
            term,
            responder: tx,
        });

        EnqueuedProposal {
            index,
            term,
            completion: rx,
        }
    }

    /// Leadership was lost. Nothing this replica proposed has a known outcome anymore.
    pub(crate) fn abandon_all(&self) {
        let _ = self.sender.send(RegistryCommand::AbandonAll);
    }
}

struct Registration {
    term: Term,
    responder: oneshot::Sender<ProposalResult>,
}

impl Registration {
    fn respond(self, result: ProposalResult) {
        // Caller may have stopped waiting.
        let _ = self.responder.send(result);
    }
}

pub(crate) struct ProposalRegistry {
    receiver: mpsc::UnboundedReceiver<RegistryCommand>,
    pending: BTreeMap<Index, Registration>,
}

impl ProposalRegistry {
    /// Takes in every registration sent so far.
    pub(crate) fn sync(&mut self) {
        while let Ok(command) = self.receiver.try_recv() {
            self.handle(command);
        }
    }

    /// Waits for the next command from the registrar and takes it in. Returns false once the
    /// registrar is gone.
    ///
    /// Abandonment has to be acted on while no entries are being applied, e.g. by a leader that
    /// was deposed behind a partition.
    pub(crate) async fn recv(&mut self) -> bool {
        match self.receiver.recv().await {
            Some(command) => {
                self.handle(command);
                true
            }
            None => false,
        }
    }

    fn handle(&mut self, command: RegistryCommand) {
        match command {
            RegistryCommand::Register {
                index,
                term,
                responder,
            } => {
                let registration = Registration { term, responder };
                if let Some(replaced) = self.pending.insert(index, registration) {
                    replaced.respond(Err(ProposalError::OutcomeUnknown));
                }
            }
            RegistryCommand::AbandonAll => {
                for (_, registration) in std::mem::take(&mut self.pending) {
                    registration.respond(Err(ProposalError::OutcomeUnknown));
                }
            }
        }
    }

    /// The entry (index, term) was applied with `output`.
    pub(crate) fn resolve(&mut self, index: Index, term: Term, output: StateMachineOutput) {
        self.resolve_unknown_before(index);
        if let Some(registration) = self.pending.remove(&index) {
            if registration.term == term {
                registration.respond(Ok(output));
            } else {
                // Our entry was overwritten by another leader's.
                registration.respond(Err(ProposalError::OutcomeUnknown));
            }
        }
    }

    /// Everything through `index` was skipped (e.g. covered by an installed snapshot) without
    /// this replica seeing the output.
    pub(crate) fn resolve_unknown_through(&mut self, index: Index) {
        self.resolve_unknown_before(index.plus(1));
    }

    fn resolve_unknown_before(&mut self, index: Index) {
        let remaining = self.pending.split_off(&index);
        for (_, registration) in std::mem::replace(&mut self.pending, remaining) {
            registration.respond(Err(ProposalError::OutcomeUnknown));
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.pending.len()
    }
}
