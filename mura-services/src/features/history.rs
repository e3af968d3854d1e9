//! History page: settled trades from `profit_table`

use serde::Serialize;

use mura_core::{Envelope, Request, TradeRow};

use super::{Effect, FeatureKind, Phase, Reducer, Status, Step};

/// Rows requested per load
pub const HISTORY_LIMIT: u32 = 20;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistoryState {
    status: Status,
    rows: Vec<TradeRow>,
}

impl HistoryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[TradeRow] {
        &self.rows
    }
}

impl Reducer for HistoryState {
    const KIND: FeatureKind = FeatureKind::History;

    fn status(&self) -> &Status {
        &self.status
    }

    fn status_mut(&mut self) -> &mut Status {
        &mut self.status
    }

    fn start(mut self) -> Step<Self> {
        self.status.enter(Phase::Authorizing);
        Step::with(self, vec![Effect::Authorize])
    }

    fn apply(mut self, envelope: &Envelope) -> Step<Self> {
        match envelope {
            Envelope::Authorize(_) if self.status.phase() == Phase::Authorizing => {
                self.status.enter(Phase::Subscribing);
                Step::with(
                    self,
                    vec![Effect::Send(Request::profit_table(HISTORY_LIMIT))],
                )
            }
            Envelope::ProfitTable(table) => {
                self.rows = table.transactions.iter().map(TradeRow::from).collect();
                self.status.enter(Phase::Ready);
                Step::new(self)
            }
            _ => Step::new(self),
        }
    }
}
