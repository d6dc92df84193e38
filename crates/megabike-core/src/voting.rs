//! Weighted vote aggregation.
//!
//! Every primitive takes a weight per voter and a ballot per voter. A ballot
//! maps candidates to a real contribution; a candidate's score is the sum of
//! `weight * contribution` over all voters. Voters missing from the weight
//! map carry weight zero. Iteration is over ordered maps, so every result is
//! deterministic.

use std::collections::BTreeMap;

use megabike_types::{AgentId, Governance};

/// Per-voter weight.
pub type Weights = BTreeMap<AgentId, f64>;

/// One voter's contribution per candidate.
pub type Ballot<C> = BTreeMap<C, f64>;

/// Errors raised while aggregating votes.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VotingError {
    /// A weight, contribution, or total was NaN or infinite.
    #[error("non-finite value {value} in vote from {voter}")]
    NonFiniteValue {
        /// The voter whose input (or whose total) degenerated.
        voter: AgentId,
        /// The offending value.
        value: f64,
    },

    /// A voter was given a negative weight.
    #[error("negative weight {weight} for voter {voter}")]
    NegativeWeight {
        /// The voter.
        voter: AgentId,
        /// The rejected weight.
        weight: f64,
    },

    /// An allocation ballot gave a candidate a negative share.
    #[error("negative share {value} in allocation from {voter}")]
    NegativeShare {
        /// The voter.
        voter: AgentId,
        /// The rejected contribution.
        value: f64,
    },
}

/// Uniform weight of 1.0 for every voter.
pub fn uniform_weights<'a>(voters: impl IntoIterator<Item = &'a AgentId>) -> Weights {
    voters.into_iter().map(|&id| (id, 1.0)).collect()
}

fn voter_weight(weights: &Weights, voter: AgentId) -> Result<f64, VotingError> {
    let weight = weights.get(&voter).copied().unwrap_or(0.0);
    if !weight.is_finite() {
        return Err(VotingError::NonFiniteValue {
            voter,
            value: weight,
        });
    }
    if weight < 0.0 {
        return Err(VotingError::NegativeWeight { voter, weight });
    }
    Ok(weight)
}

/// Weighted score per candidate.
fn tally<C: Ord + Copy>(
    weights: &Weights,
    ballots: &BTreeMap<AgentId, Ballot<C>>,
) -> Result<BTreeMap<C, f64>, VotingError> {
    let mut totals = BTreeMap::new();
    for (&voter, ballot) in ballots {
        let weight = voter_weight(weights, voter)?;
        for (&candidate, &contribution) in ballot {
            let score = weight * contribution;
            if !score.is_finite() {
                return Err(VotingError::NonFiniteValue {
                    voter,
                    value: contribution,
                });
            }
            *totals.entry(candidate).or_insert(0.0) += score;
        }
    }
    Ok(totals)
}

/// The candidate with the highest weighted score.
///
/// Ties go to the lowest candidate. Returns `None` when no ballot names any
/// candidate.
pub fn winner_from_dist<C: Ord + Copy>(
    weights: &Weights,
    ballots: &BTreeMap<AgentId, Ballot<C>>,
) -> Result<Option<C>, VotingError> {
    let totals = tally(weights, ballots)?;
    let mut best: Option<(C, f64)> = None;
    for (candidate, score) in totals {
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((candidate, score)),
        }
    }
    Ok(best.map(|(candidate, _)| candidate))
}

/// Each candidate's share of the total weighted score.
///
/// Shares are allocations, so every contribution must be non-negative.
/// Returns an empty map when the total is not positive, meaning nothing is
/// distributed.
pub fn cumulative_dist<C: Ord + Copy>(
    weights: &Weights,
    ballots: &BTreeMap<AgentId, Ballot<C>>,
) -> Result<BTreeMap<C, f64>, VotingError> {
    let totals = tally(weights, ballots)?;
    for (&voter, ballot) in ballots {
        if let Some(&value) = ballot.values().find(|&&value| value < 0.0) {
            return Err(VotingError::NegativeShare { voter, value });
        }
    }
    let sum: f64 = totals.values().sum();
    if sum <= 0.0 {
        return Ok(BTreeMap::new());
    }
    Ok(totals
        .into_iter()
        .map(|(candidate, score)| (candidate, score / sum))
        .collect())
}

/// Count founding governance choices. Every mode appears, possibly with zero.
pub fn tally_founding_votes(choices: &BTreeMap<AgentId, Governance>) -> BTreeMap<Governance, usize> {
    let mut counts: BTreeMap<Governance, usize> =
        Governance::ALL.iter().map(|&mode| (mode, 0)).collect();
    for mode in choices.values() {
        let count = counts.entry(*mode).or_insert(0);
        *count = count.saturating_add(1);
    }
    counts
}

/// Rank applicants by weighted approval.
///
/// Only applicants with positive support are returned, ordered by support
/// (highest first) and then by id.
pub fn acceptance_ranking(
    weights: &Weights,
    ballots: &BTreeMap<AgentId, BTreeMap<AgentId, bool>>,
    applicants: &[AgentId],
) -> Result<Vec<AgentId>, VotingError> {
    let approvals: BTreeMap<AgentId, Ballot<AgentId>> = ballots
        .iter()
        .map(|(&voter, ballot)| {
            let yes = ballot
                .iter()
                .filter(|&(applicant, &accept)| accept && applicants.contains(applicant))
                .map(|(&applicant, _)| (applicant, 1.0))
                .collect();
            (voter, yes)
        })
        .collect();
    let mut ranked: Vec<(AgentId, f64)> = tally(weights, &approvals)?
        .into_iter()
        .filter(|&(_, support)| support > 0.0)
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    Ok(ranked.into_iter().map(|(id, _)| id).collect())
}

/// Members whose weighted kick votes exceed half of `member_count`.
///
/// Each nomination counts once per voter at the voter's weight.
pub fn majority_expulsions(
    weights: &Weights,
    nominations: &BTreeMap<AgentId, Vec<AgentId>>,
    member_count: usize,
) -> Result<Vec<AgentId>, VotingError> {
    let ballots: BTreeMap<AgentId, Ballot<AgentId>> = nominations
        .iter()
        .map(|(&voter, targets)| (voter, targets.iter().map(|&t| (t, 1.0)).collect()))
        .collect();
    #[allow(clippy::cast_precision_loss)]
    let threshold = member_count as f64 / 2.0;
    Ok(tally(weights, &ballots)?
        .into_iter()
        .filter(|&(_, votes)| votes > threshold)
        .map(|(id, _)| id)
        .collect())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn agent(n: u128) -> AgentId {
        AgentId::from(Uuid::from_u128(n))
    }

    fn single(candidate: AgentId) -> Ballot<AgentId> {
        BTreeMap::from([(candidate, 1.0)])
    }

    #[test]
    fn heavier_backing_wins() {
        let (a, b) = (agent(100), agent(200));
        let mut weights = Weights::new();
        let mut ballots = BTreeMap::new();
        for n in 1..=2 {
            weights.insert(agent(n), 1.0);
            ballots.insert(agent(n), single(a));
        }
        for n in 3..=5 {
            weights.insert(agent(n), 0.5);
            ballots.insert(agent(n), single(b));
        }
        assert_eq!(winner_from_dist(&weights, &ballots).unwrap(), Some(a));

        for n in 3..=5 {
            weights.insert(agent(n), 1.0);
        }
        assert_eq!(winner_from_dist(&weights, &ballots).unwrap(), Some(b));
    }

    #[test]
    fn ties_go_to_lowest_candidate() {
        let (low, high) = (agent(10), agent(20));
        let weights = uniform_weights(&[agent(1), agent(2)]);
        let ballots = BTreeMap::from([(agent(1), single(high)), (agent(2), single(low))]);
        assert_eq!(winner_from_dist(&weights, &ballots).unwrap(), Some(low));
    }

    #[test]
    fn missing_weight_counts_as_zero() {
        let (a, b) = (agent(10), agent(20));
        let weights = BTreeMap::from([(agent(1), 1.0)]);
        let ballots = BTreeMap::from([
            (agent(1), single(b)),
            (agent(2), single(a)),
            (agent(3), single(a)),
        ]);
        assert_eq!(winner_from_dist(&weights, &ballots).unwrap(), Some(b));
    }

    #[test]
    fn empty_ballots_have_no_winner() {
        let weights = uniform_weights(&[agent(1)]);
        let ballots: BTreeMap<AgentId, Ballot<AgentId>> = BTreeMap::from([(agent(1), Ballot::new())]);
        assert_eq!(winner_from_dist(&weights, &ballots).unwrap(), None);
    }

    #[test]
    fn non_finite_input_is_rejected() {
        let weights = uniform_weights(&[agent(1)]);
        let ballots = BTreeMap::from([(agent(1), BTreeMap::from([(agent(9), f64::NAN)]))]);
        assert!(matches!(
            winner_from_dist(&weights, &ballots),
            Err(VotingError::NonFiniteValue { .. })
        ));

        let bad_weights = BTreeMap::from([(agent(1), f64::INFINITY)]);
        let ok_ballots = BTreeMap::from([(agent(1), single(agent(9)))]);
        assert!(cumulative_dist(&bad_weights, &ok_ballots).is_err());
    }

    #[test]
    fn negative_weight_is_rejected() {
        let weights = BTreeMap::from([(agent(1), -1.0)]);
        let ballots = BTreeMap::from([(agent(1), single(agent(9)))]);
        assert_eq!(
            winner_from_dist(&weights, &ballots).unwrap_err(),
            VotingError::NegativeWeight {
                voter: agent(1),
                weight: -1.0
            }
        );
    }

    #[test]
    fn cumulative_dist_normalizes() {
        let (x, y) = (agent(10), agent(20));
        let weights = BTreeMap::from([(agent(1), 1.0), (agent(2), 3.0)]);
        let ballots = BTreeMap::from([
            (agent(1), BTreeMap::from([(x, 1.0)])),
            (agent(2), BTreeMap::from([(x, 0.5), (y, 0.5)])),
        ]);
        let shares = cumulative_dist(&weights, &ballots).unwrap();
        assert!((shares[&x] - 2.5 / 4.0).abs() < 1e-12);
        assert!((shares[&y] - 1.5 / 4.0).abs() < 1e-12);
    }

    #[test]
    fn negative_share_is_rejected() {
        let (x, y) = (agent(10), agent(20));
        let weights = BTreeMap::from([(agent(1), 1.0)]);
        let ballots = BTreeMap::from([(agent(1), BTreeMap::from([(x, 2.0), (y, -1.0)]))]);
        assert_eq!(
            cumulative_dist(&weights, &ballots).unwrap_err(),
            VotingError::NegativeShare {
                voter: agent(1),
                value: -1.0
            }
        );
    }

    #[test]
    fn zero_total_distributes_nothing() {
        let weights = BTreeMap::from([(agent(1), 0.0)]);
        let ballots = BTreeMap::from([(agent(1), single(agent(10)))]);
        assert!(cumulative_dist(&weights, &ballots).unwrap().is_empty());
    }

    #[test]
    fn founding_tally_counts_every_mode() {
        let choices = BTreeMap::from([
            (agent(1), Governance::Leadership),
            (agent(2), Governance::Leadership),
            (agent(3), Governance::Dictatorship),
        ]);
        let counts = tally_founding_votes(&choices);
        assert_eq!(counts[&Governance::Democracy], 0);
        assert_eq!(counts[&Governance::Leadership], 2);
        assert_eq!(counts[&Governance::Dictatorship], 1);
    }

    #[test]
    fn acceptance_ranks_by_support_then_id() {
        let (p, q, r) = (agent(30), agent(10), agent(20));
        let weights = BTreeMap::from([(agent(1), 2.0), (agent(2), 1.0)]);
        let ballots = BTreeMap::from([
            (agent(1), BTreeMap::from([(p, true), (q, false), (r, true)])),
            (agent(2), BTreeMap::from([(p, true), (q, false), (r, false), (agent(99), true)])),
        ]);
        let ranked = acceptance_ranking(&weights, &ballots, &[p, q, r]).unwrap();
        assert_eq!(ranked, vec![p, r]);
    }

    #[test]
    fn expulsion_needs_more_than_half() {
        let members = [agent(1), agent(2), agent(3)];
        let weights = uniform_weights(&members);
        let two_votes = BTreeMap::from([
            (agent(1), vec![agent(3)]),
            (agent(2), vec![agent(3)]),
            (agent(3), Vec::new()),
        ]);
        assert_eq!(
            majority_expulsions(&weights, &two_votes, members.len()).unwrap(),
            vec![agent(3)]
        );

        let one_vote = BTreeMap::from([(agent(1), vec![agent(3)])]);
        assert!(majority_expulsions(&weights, &one_vote, members.len())
            .unwrap()
            .is_empty());
    }
}
