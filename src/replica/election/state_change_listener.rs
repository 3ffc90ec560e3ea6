use crate::replica::ready::SoftState;
use tokio::sync::watch;

pub(crate) fn new(initial_state: SoftState) -> (ElectionStateChangeNotifier, ElectionStateChangeListener) {
    let (snd, rcv) = watch::channel(initial_state);

    (ElectionStateChangeNotifier { snd }, ElectionStateChangeListener { rcv })
}

pub(crate) struct ElectionStateChangeNotifier {
    snd: watch::Sender<SoftState>,
}

impl ElectionStateChangeNotifier {
    pub(crate) fn notify_new_state(&self, new_state: SoftState) {
        let _ = self.snd.send(new_state);
    }
}

/// Observes role, term and leader changes of one replica.
#[derive(Clone)]
pub struct ElectionStateChangeListener {
    rcv: watch::Receiver<SoftState>,
}

impl ElectionStateChangeListener {
    /// Waits for the next change. Returns None once the replica has shut down.
    pub async fn next(&mut self) -> Option<SoftState> {
        match self.rcv.changed().await {
            Ok(_) => Some(self.rcv.borrow().clone()),
            Err(_) => None,
        }
    }

    pub fn current(&self) -> SoftState {
        self.rcv.borrow().clone()
    }
}
