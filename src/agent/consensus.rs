use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use super::oracle::DecisionOracle;
use super::protocol::ArbitrationRequest;
use crate::config::ThresholdConfig;
use crate::domain::{Ballot, ConsensusResult, Decision, NonVote, OracleVote, Tally};
use crate::error::OracleError;

/// Rules for turning ballots into one decision
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsensusPolicy {
    /// Shared deadline for the whole fan-out
    pub timeout: Duration,
    /// Fraction of configured oracles that must return a counted vote
    pub min_agreement_ratio: f64,
    /// Decision for ties, quorum shortfalls and empty ballots
    pub fail_safe: Decision,
}

impl ConsensusPolicy {
    pub fn from_thresholds(thresholds: &ThresholdConfig) -> Self {
        Self {
            timeout: Duration::from_millis(thresholds.arbitration_timeout_ms),
            min_agreement_ratio: thresholds.min_agreement_ratio,
            fail_safe: thresholds.fail_safe,
        }
    }
}

fn non_vote(err: OracleError) -> NonVote {
    match err {
        OracleError::Timeout { .. } => NonVote::Timeout,
        OracleError::MalformedResponse { reason, .. } => NonVote::Malformed(reason),
        other => NonVote::Failed(other.to_string()),
    }
}

/// Reduce ballots to a decision.
///
/// Majority of counted votes wins. A tie, fewer counted votes than
/// `min_agreement_ratio × total_oracles`, or no counted votes at all resolve
/// to the policy's fail-safe decision.
pub fn reduce(votes: Vec<OracleVote>, total_oracles: usize, policy: &ConsensusPolicy) -> ConsensusResult {
    let mut tally = Tally::default();
    for vote in &votes {
        match vote.recommendation() {
            Some(Decision::CloseAll) => tally.close_all += 1,
            Some(Decision::Hold) => tally.hold += 1,
            None => {}
        }
    }

    let counted = tally.counted();
    let agreement_ratio = if counted == 0 {
        0.0
    } else {
        f64::from(tally.max()) / f64::from(counted)
    };

    let quorum = policy.min_agreement_ratio * total_oracles as f64;
    let majority = if counted == 0 || f64::from(counted) < quorum || tally.close_all == tally.hold {
        None
    } else if tally.close_all > tally.hold {
        Some(Decision::CloseAll)
    } else {
        Some(Decision::Hold)
    };

    ConsensusResult {
        votes,
        tally,
        decision: majority.unwrap_or(policy.fail_safe),
        agreement_ratio,
        fail_safe: majority.is_none(),
    }
}

/// Fans an arbitration request out to every oracle under one deadline.
pub struct ConsensusAggregator {
    oracles: Vec<Arc<dyn DecisionOracle>>,
}

impl ConsensusAggregator {
    pub fn new(oracles: Vec<Arc<dyn DecisionOracle>>) -> Self {
        Self { oracles }
    }

    pub fn len(&self) -> usize {
        self.oracles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.oracles.is_empty()
    }

    /// Consult all oracles concurrently and reduce their ballots.
    ///
    /// Calls still outstanding at the deadline are aborted and recorded as
    /// timeouts. Votes are returned in oracle configuration order.
    #[instrument(skip_all, fields(oracles = self.oracles.len(), breach = %request.breach_kind))]
    pub async fn arbitrate(&self, request: &ArbitrationRequest, policy: &ConsensusPolicy) -> ConsensusResult {
        let started = Instant::now();
        let deadline = started + policy.timeout;
        let request = Arc::new(request.clone());

        let mut tasks = JoinSet::new();
        for (index, oracle) in self.oracles.iter().enumerate() {
            let oracle = Arc::clone(oracle);
            let request = Arc::clone(&request);
            tasks.spawn(async move {
                let result = oracle.consult(&request).await;
                (index, result, started.elapsed())
            });
        }

        let mut slots: Vec<Option<(Ballot, u64)>> = vec![None; self.oracles.len()];
        let mut expired = false;
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((index, result, elapsed)))) => {
                    let ballot = match result {
                        Ok(reply) => Ballot::Vote {
                            recommendation: reply.recommendation,
                            rationale: reply.rationale,
                        },
                        Err(e) => {
                            warn!(oracle = self.oracles[index].id(), "oracle did not vote: {}", e);
                            Ballot::Abstain(non_vote(e))
                        }
                    };
                    slots[index] = Some((ballot, elapsed.as_millis() as u64));
                }
                Ok(Some(Err(e))) => warn!("oracle task failed: {}", e),
                Ok(None) => break,
                Err(_) => {
                    expired = true;
                    tasks.abort_all();
                    break;
                }
            }
        }

        let timeout_ms = policy.timeout.as_millis() as u64;
        let votes: Vec<OracleVote> = self
            .oracles
            .iter()
            .zip(slots)
            .map(|(oracle, slot)| {
                let (ballot, latency_ms) = slot.unwrap_or_else(|| {
                    if expired {
                        (Ballot::Abstain(NonVote::Timeout), timeout_ms)
                    } else {
                        (Ballot::Abstain(NonVote::Failed("oracle task aborted".into())), 0)
                    }
                });
                OracleVote {
                    oracle_id: oracle.id().to_string(),
                    ballot,
                    latency_ms,
                }
            })
            .collect();

        let result = reduce(votes, self.oracles.len(), policy);
        info!(
            decision = %result.decision,
            close_all = result.tally.close_all,
            hold = result.tally.hold,
            agreement_ratio = result.agreement_ratio,
            fail_safe = result.fail_safe,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "arbitration complete"
        );
        result
    }
}
