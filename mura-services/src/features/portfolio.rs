//! Orders page: open positions

use serde::Serialize;

use mura_core::{Contract, Envelope, Request};

use super::{Effect, FeatureKind, Phase, Reducer, Status, Step};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PortfolioState {
    status: Status,
    contracts: Vec<Contract>,
}

impl PortfolioState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contracts(&self) -> &[Contract] {
        &self.contracts
    }
}

impl Reducer for PortfolioState {
    const KIND: FeatureKind = FeatureKind::Portfolio;

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
                Step::with(self, vec![Effect::Send(Request::portfolio())])
            }
            Envelope::Portfolio(portfolio) => {
                self.contracts = portfolio.contracts.iter().map(Contract::from).collect();
                self.status.enter(Phase::Ready);
                Step::new(self)
            }
            _ => Step::new(self),
        }
    }
}
