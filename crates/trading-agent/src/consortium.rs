use anyhow::Result;
use core_types::{Agent, Decision, TradeAction};

use crate::agent::{self, TickContext, TickOutcome};
use crate::whitelist::{self, WhitelistOutcome};

/// How individual agents' raw decisions are folded into one consortium vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsortiumMode {
    /// Plurality of decisions; ties broken by average confidence.
    Vote,
    /// Performance-weighted score per action. Default.
    Weighted,
}

impl Default for ConsortiumMode {
    fn default() -> Self {
        ConsortiumMode::Weighted
    }
}

/// One agent's raw (pre-gate) decision plus the context the consortium needs
/// to weigh it.
pub struct Ballot {
    pub agent_id: String,
    pub decision: Decision,
    pub performance_pct: f64,
}

const MEAN_CONFIDENCE_HOLD_THRESHOLD: f64 = 55.0;

pub fn combine_ballots(ballots: &[Ballot], mode: ConsortiumMode) -> Decision {
    if ballots.is_empty() {
        return Decision::hold("no agent ballots to combine");
    }
    match mode {
        ConsortiumMode::Vote => vote_plurality(ballots),
        ConsortiumMode::Weighted => vote_weighted(ballots),
    }
}

fn vote_plurality(ballots: &[Ballot]) -> Decision {
    let mut buy = 0u32;
    let mut sell = 0u32;
    let mut hold = 0u32;
    for b in ballots {
        match b.decision.decision {
            TradeAction::Buy => buy += 1,
            TradeAction::Sell => sell += 1,
            TradeAction::Hold => hold += 1,
        }
    }

    let winner = [(TradeAction::Buy, buy), (TradeAction::Sell, sell), (TradeAction::Hold, hold)]
        .into_iter()
        .max_by(|a, b| {
            a.1.cmp(&b.1).then_with(|| {
                avg_confidence_for(ballots, a.0)
                    .partial_cmp(&avg_confidence_for(ballots, b.0))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
        })
        .map(|(action, _)| action)
        .unwrap_or(TradeAction::Hold);

    if winner == TradeAction::Hold {
        return Decision::hold(format!(
            "plurality vote: {buy} buy / {sell} sell / {hold} hold, HOLD wins"
        ));
    }

    let best = ballots
        .iter()
        .filter(|b| b.decision.decision == winner)
        .max_by(|a, b| a.decision.confidence.partial_cmp(&b.decision.confidence).unwrap_or(std::cmp::Ordering::Equal))
        .expect("winner action has at least one ballot");

    Decision {
        decision: winner,
        symbol: best.decision.symbol.clone(),
        quantity: best.decision.quantity,
        reasoning: format!(
            "consortium vote ({buy} buy / {sell} sell / {hold} hold): {}",
            best.decision.reasoning
        ),
        confidence: avg_confidence_for(ballots, winner),
        risk_level: best.decision.risk_level,
        target_price: best.decision.target_price,
        stop_loss: best.decision.stop_loss,
    }
}

fn avg_confidence_for(ballots: &[Ballot], action: TradeAction) -> f64 {
    let matching: Vec<f64> = ballots
        .iter()
        .filter(|b| b.decision.decision == action)
        .map(|b| b.decision.confidence)
        .collect();
    if matching.is_empty() {
        return 0.0;
    }
    matching.iter().sum::<f64>() / matching.len() as f64
}

/// weight_i = max(0, performance_pct_i) + 1, normalized across ballots.
/// score(action) = sum(weight_i * confidence_i/100) over ballots voting that action.
/// Falls back to HOLD when the weighted mean confidence is below the threshold.
fn vote_weighted(ballots: &[Ballot]) -> Decision {
    let raw_weights: Vec<f64> = ballots.iter().map(|b| b.performance_pct.max(0.0) + 1.0).collect();
    let total_weight: f64 = raw_weights.iter().sum();
    let weights: Vec<f64> = raw_weights.iter().map(|w| w / total_weight).collect();

    let mut scores = [0.0f64; 3]; // Buy, Sell, Hold
    let mut weighted_confidence = 0.0f64;

    for (b, w) in ballots.iter().zip(weights.iter()) {
        let idx = match b.decision.decision {
            TradeAction::Buy => 0,
            TradeAction::Sell => 1,
            TradeAction::Hold => 2,
        };
        scores[idx] += w * (b.decision.confidence / 100.0);
        weighted_confidence += w * b.decision.confidence;
    }

    let winner_idx = scores
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(2);
    let winner = match winner_idx {
        0 => TradeAction::Buy,
        1 => TradeAction::Sell,
        _ => TradeAction::Hold,
    };

    if winner == TradeAction::Hold || weighted_confidence < MEAN_CONFIDENCE_HOLD_THRESHOLD {
        return Decision::hold(format!(
            "weighted vote: scores buy={:.2} sell={:.2} hold={:.2}, mean confidence {:.1}",
            scores[0], scores[1], scores[2], weighted_confidence
        ));
    }

    let (best, best_weight) = ballots
        .iter()
        .zip(weights.iter())
        .filter(|(b, _)| b.decision.decision == winner)
        .max_by(|(a, aw), (b, bw)| {
            (a.decision.confidence * *aw)
                .partial_cmp(&(b.decision.confidence * *bw))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .expect("winner action has at least one ballot");
    let _ = best_weight;

    Decision {
        decision: winner,
        symbol: best.decision.symbol.clone(),
        quantity: best.decision.quantity,
        reasoning: format!(
            "consortium weighted vote (score {:.2}, mean confidence {:.1}): {}",
            scores[winner_idx], weighted_confidence, best.decision.reasoning
        ),
        confidence: weighted_confidence,
        risk_level: best.decision.risk_level,
        target_price: best.decision.target_price,
        stop_loss: best.decision.stop_loss,
    }
}

/// Runs the combined decision through the same whitelist/gates/sizing/
/// execution path a solo agent's decision goes through.
pub async fn run_consortium_tick(
    consortium: &mut Agent,
    ballots: &[Ballot],
    mode: ConsortiumMode,
    ctx: &TickContext<'_>,
) -> Result<TickOutcome> {
    let mut decision = combine_ballots(ballots, mode);

    if let Err(reason) = decision.validate() {
        decision = Decision::hold(reason);
    }

    if decision.decision == TradeAction::Hold {
        return Ok(TickOutcome {
            decision: agent::enriched_hold(decision),
            order_id: None,
        });
    }

    match whitelist::enforce(&decision.symbol, ctx.whitelist_policy) {
        WhitelistOutcome::Rejected { reason } => {
            return Ok(TickOutcome {
                decision: agent::enriched_hold(Decision::hold(reason)),
                order_id: None,
            });
        }
        WhitelistOutcome::Substituted { substitute, .. } => decision.symbol = substitute,
        WhitelistOutcome::Allowed(_) => {}
    }

    agent::execute_trade_decision(consortium, decision, ctx).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::RiskLevel;

    fn ballot(action: TradeAction, symbol: &str, confidence: f64, performance_pct: f64) -> Ballot {
        Ballot {
            agent_id: symbol.to_string(),
            decision: Decision {
                decision: action,
                symbol: symbol.to_string(),
                quantity: 10.0,
                reasoning: "test".to_string(),
                confidence,
                risk_level: RiskLevel::Medium,
                target_price: None,
                stop_loss: None,
            },
            performance_pct,
        }
    }

    #[test]
    fn plurality_picks_the_majority_action() {
        let ballots = vec![
            ballot(TradeAction::Buy, "AAPL", 80.0, 0.0),
            ballot(TradeAction::Buy, "AAPL", 70.0, 0.0),
            ballot(TradeAction::Sell, "MSFT", 90.0, 0.0),
        ];
        let decision = combine_ballots(&ballots, ConsortiumMode::Vote);
        assert_eq!(decision.decision, TradeAction::Buy);
        assert_eq!(decision.symbol, "AAPL");
    }

    #[test]
    fn weighted_vote_favors_the_better_performing_agent() {
        let ballots = vec![
            ballot(TradeAction::Buy, "AAPL", 90.0, 50.0),
            ballot(TradeAction::Sell, "MSFT", 90.0, -20.0),
        ];
        let decision = combine_ballots(&ballots, ConsortiumMode::Weighted);
        assert_eq!(decision.decision, TradeAction::Buy);
    }

    #[test]
    fn low_mean_confidence_falls_back_to_hold() {
        let ballots = vec![
            ballot(TradeAction::Buy, "AAPL", 40.0, 0.0),
            ballot(TradeAction::Sell, "MSFT", 45.0, 0.0),
        ];
        let decision = combine_ballots(&ballots, ConsortiumMode::Weighted);
        assert_eq!(decision.decision, TradeAction::Hold);
    }
}
