//! Response router
//!
//! Decides, for each decoded envelope, which features receive it. Routing is
//! a pure lookup over the closed envelope union: data kinds go to every
//! feature that declared interest, `error` envelopes are classified first.

use indexmap::IndexMap;
use tracing::debug;

use mura_core::{ApiError, Envelope, EnvelopeKind};

use crate::error_policy::{ErrorPolicy, FeatureError, Verdict};
use crate::features::FeatureKind;

/// Routing decision for one envelope
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Data for the interested features (possibly none)
    Deliver {
        kind: EnvelopeKind,
        targets: Vec<FeatureKind>,
    },
    /// Benign error, passed as a confirmation to the candidate features
    Confirm {
        error: ApiError,
        targets: Vec<FeatureKind>,
    },
    /// Fatal error for the candidate features; the session fails those
    /// still waiting on a request
    Fail {
        error: FeatureError,
        reset_auth: bool,
        targets: Vec<FeatureKind>,
    },
    /// `forget_all` acknowledgement
    Acknowledge,
    /// `ping` reply
    Heartbeat,
    /// Unrecognized shape
    Drop,
}

/// Interest table of the mounted features
#[derive(Debug, Default)]
pub struct Router {
    policy: ErrorPolicy,
    /// Mounted feature -> declared envelope kinds, in mount order
    interests: IndexMap<FeatureKind, &'static [EnvelopeKind]>,
}

impl Router {
    pub fn new(policy: ErrorPolicy) -> Self {
        Self {
            policy,
            interests: IndexMap::new(),
        }
    }

    /// Register a mounted feature's interests
    pub fn declare(&mut self, feature: FeatureKind) {
        self.interests.insert(feature, feature.interests());
    }

    pub fn withdraw(&mut self, feature: FeatureKind) {
        self.interests.shift_remove(&feature);
    }

    pub fn is_declared(&self, feature: FeatureKind) -> bool {
        self.interests.contains_key(&feature)
    }

    pub fn policy(&self) -> &ErrorPolicy {
        &self.policy
    }

    pub fn route(&self, envelope: &Envelope) -> Dispatch {
        let kind = match envelope {
            Envelope::Authorize(_) => EnvelopeKind::Authorize,
            Envelope::ActiveSymbols(_) => EnvelopeKind::ActiveSymbols,
            Envelope::Tick(_) => EnvelopeKind::Tick,
            Envelope::Balance(_) => EnvelopeKind::Balance,
            Envelope::Portfolio(_) => EnvelopeKind::Portfolio,
            Envelope::ProfitTable(_) => EnvelopeKind::ProfitTable,
            Envelope::Buy(_) => EnvelopeKind::Buy,
            Envelope::GetLimits(_) => EnvelopeKind::GetLimits,
            Envelope::Error(error) => return self.route_error(error),
            Envelope::ForgetAll(_) => return Dispatch::Acknowledge,
            Envelope::Ping => return Dispatch::Heartbeat,
            Envelope::Unrecognized { keys } => {
                debug!("[Router] Dropping unrecognized envelope {:?}", keys);
                return Dispatch::Drop;
            }
        };

        Dispatch::Deliver {
            kind,
            targets: self.interested_in(kind),
        }
    }

    // Candidates are the features interested in the failed request's kind,
    // or every mounted feature when the frame does not name one
    fn route_error(&self, error: &ApiError) -> Dispatch {
        let targets = match error.request_kind() {
            Some(kind) => self.interested_in(kind),
            None => self.mounted(),
        };
        match self.policy.classify(error) {
            Verdict::Benign => Dispatch::Confirm {
                error: error.clone(),
                targets,
            },
            Verdict::Fatal(feature_error) => Dispatch::Fail {
                error: feature_error,
                reset_auth: self.policy.resets_auth(error),
                targets,
            },
        }
    }

    fn interested_in(&self, kind: EnvelopeKind) -> Vec<FeatureKind> {
        self.interests
            .iter()
            .filter(|(_, kinds)| kinds.contains(&kind))
            .map(|(feature, _)| *feature)
            .collect()
    }

    fn mounted(&self) -> Vec<FeatureKind> {
        self.interests.keys().copied().collect()
    }
}
