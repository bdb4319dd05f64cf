use crate::peers::PieceIndex;
use crate::torrent::Bitfield;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        (self.completed * 100 / self.total) as u8
    }

    pub fn is_done(&self) -> bool {
        self.completed == self.total
    }
}

#[derive(Debug)]
struct CompletionState {
    completed: Bitfield,
    n_completed: usize,
}

/// which pieces are durably written. a set bit is never cleared.
#[derive(Debug)]
pub struct CompletionTracker {
    state: Mutex<CompletionState>,
}

impl CompletionTracker {
    pub fn new(n_pieces: usize) -> Self {
        let mut completed = Bitfield::new();
        completed.resize(n_pieces, false);

        Self {
            state: Mutex::new(CompletionState {
                completed,
                n_completed: 0,
            }),
        }
    }

    // the state stays consistent even if a holder panicked, every update is a single bit flip
    // plus counter.
    fn lock(&self) -> MutexGuard<'_, CompletionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// marks `index` written and returns the progress after the update. marking twice counts once.
    pub fn mark_complete(&self, index: PieceIndex) -> Progress {
        let mut state = self.lock();
        if index < state.completed.len() && !state.completed[index] {
            state.completed.set(index, true);
            state.n_completed += 1;
        }

        Progress {
            completed: state.n_completed,
            total: state.completed.len(),
        }
    }

    pub fn is_complete(&self, index: PieceIndex) -> bool {
        self.lock().completed.get(index).is_some_and(|bit| *bit)
    }

    pub fn progress(&self) -> Progress {
        let state = self.lock();
        Progress {
            completed: state.n_completed,
            total: state.completed.len(),
        }
    }

    pub fn snapshot(&self) -> Vec<bool> {
        self.lock().completed.iter().by_vals().collect()
    }
}
