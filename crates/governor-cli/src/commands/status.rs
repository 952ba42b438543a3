use clap::ArgMatches;
use governor_core::config::Config;
use governor_core::finality::{self, FinalityThresholds};
use governor_core::governance::pending_review::{PendingReviewRegistry, PgPendingReviewRegistry};
use governor_core::graph::postgres::PgGraphStore;
use governor_core::state_machine::{PgStateMachine, StateMachine};

pub async fn run(matches: &ArgMatches) -> anyhow::Result<()> {
    let scope_id = matches.get_one::<String>("scope").expect("required").clone();
    let config = Config::from_env()?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;

    let state_machine = PgStateMachine::new(pool.clone());
    let graph = PgGraphStore::new(pool.clone());
    let pending_review = PgPendingReviewRegistry::new(pool.clone());

    println!("Scope: {scope_id}\n");

    match state_machine.get_state(&scope_id).await? {
        Some(state) => {
            println!("State machine:");
            println!("  run_id: {}", state.run_id);
            println!("  last_node: {:?}", state.last_node);
            println!("  epoch: {}", state.epoch);
            println!("  updated_at: {}", state.updated_at);
        }
        None => println!("State machine: no run bootstrapped for this scope"),
    }

    let thresholds = FinalityThresholds {
        near: config.finality_thresholds.near,
        auto: config.finality_thresholds.auto,
    };
    let snapshot = finality::evaluate(&scope_id, &graph, &thresholds).await?;
    println!("\nFinality:");
    println!("  outcome: {:?}", snapshot.outcome);
    println!("  goal_score_total: {:.3}", snapshot.goal_score_total);
    println!(
        "  dimensions: claim={:.2} contradiction={:.2} goal={:.2} risk={:.2}",
        snapshot.dimension_scores.claim_confidence,
        snapshot.dimension_scores.contradiction_resolution,
        snapshot.dimension_scores.goal_completion,
        snapshot.dimension_scores.risk_score_inverse,
    );
    if snapshot.blockers.is_empty() {
        println!("  blockers: none");
    } else {
        println!("  blockers:");
        for blocker in &snapshot.blockers {
            println!("    - {blocker}");
        }
    }

    if pending_review.is_pending(&scope_id).await? {
        if let Some(review) = pending_review.get_pending(&scope_id).await? {
            println!("\nPending review since {}:", review.created_at);
            println!("  proposal_id: {}", review.proposal_id);
        }
    } else {
        println!("\nPending review: none");
    }

    Ok(())
}
