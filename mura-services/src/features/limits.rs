//! Account limits page

use serde::Serialize;

use mura_core::{AccountLimits, Envelope, Request};

use super::{Effect, FeatureKind, Phase, Reducer, Status, Step};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LimitsState {
    status: Status,
    limits: Option<AccountLimits>,
}

impl LimitsState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limits(&self) -> Option<&AccountLimits> {
        self.limits.as_ref()
    }
}

impl Reducer for LimitsState {
    const KIND: FeatureKind = FeatureKind::Limits;

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
                Step::with(self, vec![Effect::Send(Request::get_limits())])
            }
            Envelope::GetLimits(limits) => {
                self.limits = Some(limits.clone());
                self.status.enter(Phase::Ready);
                Step::new(self)
            }
            _ => Step::new(self),
        }
    }
}
