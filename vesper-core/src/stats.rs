use serde::{Deserialize, Serialize};

/// Per-file restore progress. Terminal states: `Excluded`, `Reassembled`, `Failed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestoreState {
    Pending,
    ProbeTested,
    /// The passphrase does not reproduce this record's probe.
    Excluded,
    Decrypting,
    Reassembled,
    Failed,
}

impl RestoreState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RestoreState::Excluded | RestoreState::Reassembled | RestoreState::Failed
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Failure {
    pub name: String,
    pub reason: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoreSummary {
    pub files: u64,
    pub dirs: u64,
    pub chunks: u64,
    pub bytes: u64,
    pub ignored: u64,
    pub failed: Vec<Failure>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RestoreSummary {
    pub files: u64,
    pub dirs: u64,
    pub bytes: u64,
    pub excluded: u64,
    pub failed: Vec<Failure>,
    /// Terminal state of every record, in index order.
    pub outcomes: Vec<(String, RestoreState)>,
}

impl RestoreSummary {
    pub fn state_of(&self, name: &str) -> Option<RestoreState> {
        self.outcomes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| *s)
    }
}
