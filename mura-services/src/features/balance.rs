//! Balance card: account balance from `authorize`, then live `balance` pushes

use serde::Serialize;

use mura_core::{
    AccountBalance, ApiError, Envelope, EnvelopeKind, SubscriptionKey, SubscriptionKind,
    ALREADY_SUBSCRIBED,
};

use super::{Effect, FeatureKind, Phase, Reducer, Status, Step};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BalanceState {
    status: Status,
    balance: Option<AccountBalance>,
    loginid: Option<String>,
}

impl BalanceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self) -> Option<&AccountBalance> {
        self.balance.as_ref()
    }

    pub fn loginid(&self) -> Option<&str> {
        self.loginid.as_deref()
    }
}

impl Reducer for BalanceState {
    const KIND: FeatureKind = FeatureKind::Balance;

    fn status(&self) -> &Status {
        &self.status
    }

    fn status_mut(&mut self) -> &mut Status {
        &mut self.status
    }

    fn start(mut self) -> Step<Self> {
        self.status.enter(Phase::Authorizing);
        Step::with(
            self,
            vec![
                Effect::ForgetAll(SubscriptionKind::Balance),
                Effect::Authorize,
            ],
        )
    }

    fn apply(mut self, envelope: &Envelope) -> Step<Self> {
        let mut effects = Vec::new();
        match envelope {
            Envelope::Authorize(account) if self.status.phase() == Phase::Authorizing => {
                self.balance = Some(AccountBalance::from(account));
                self.loginid = Some(account.loginid.clone());
                self.status.enter(Phase::Subscribing);
                effects.push(Effect::Subscribe(SubscriptionKey::Balance));
            }
            Envelope::Balance(update) => {
                self.balance = Some(AccountBalance::from(update));
                self.status.enter(Phase::Ready);
            }
            _ => {}
        }
        Step::with(self, effects)
    }

    // The balance stream is already open server-side
    fn confirm(mut self, confirmation: &ApiError) -> Step<Self> {
        if confirmation.code == ALREADY_SUBSCRIBED
            && confirmation.concerns(EnvelopeKind::Balance)
            && self.status.phase() == Phase::Subscribing
        {
            self.status.enter(Phase::Ready);
        }
        Step::new(self)
    }
}
