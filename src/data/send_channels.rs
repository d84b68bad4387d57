use crossbeam_channel::{Receiver, Sender};
use crate::training::EpochSummary;

/// Driver side of the progress channel.
#[derive(Debug, Clone)]
pub struct ProgressState {
    pub summary_tx: Sender<EpochSummary>,
}

/// Observer side of the progress channel.
#[derive(Debug)]
pub struct ObserveState {
    pub summary_rx: Receiver<EpochSummary>,
}

pub fn progress_channel() -> (ProgressState, ObserveState) {
    let (summary_tx, summary_rx) = crossbeam_channel::unbounded();
    (ProgressState { summary_tx }, ObserveState { summary_rx })
}
