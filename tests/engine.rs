use anyhow::Result;
use indexmap::IndexMap;

use multimatch::{
    build_sync_model, GmModel, Graph, MatchingOrder, MgmModel, MgmSolution, OptimizationLevel,
    ParallelGenerator, RunConfig, Runner, SequentialGenerator, SolutionReader, SolutionWriter,
};

const GRAPHS: usize = 4;
const NODES: usize = 10;

fn canonical_pairs() -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    for g1 in 0..GRAPHS {
        for g2 in (g1 + 1)..GRAPHS {
            pairs.push((g1, g2));
        }
    }
    pairs
}

/// Dense model where the identity matching is clearly optimal: every
/// assignment exists, identity is rewarded, everything else is mildly
/// penalized, and edges reward consistent identity choices.
fn synthetic_complete() -> MgmModel {
    let graphs = (0..GRAPHS).map(|id| Graph::new(id, NODES)).collect();
    let mut model = MgmModel::new(graphs).unwrap();
    for (g1, g2) in canonical_pairs() {
        let mut gm = GmModel::new(Graph::new(g1, NODES), Graph::new(g2, NODES));
        for n1 in 0..NODES {
            for n2 in 0..NODES {
                let cost = if n1 == n2 { -2.0 } else { 0.3 };
                gm.add_assignment(n1, n2, cost).unwrap();
            }
        }
        for i in 0..NODES - 1 {
            gm.add_edge((i, i), (i + 1, i + 1), -0.1).unwrap();
        }
        model.add_model(gm).unwrap();
    }
    model
}

/// Incomplete model: diagonal candidates only, and node 9 has no candidate
/// anywhere, so no fully dense matching is representable.
fn hotel_like() -> MgmModel {
    let graphs = (0..GRAPHS).map(|id| Graph::new(id, NODES)).collect();
    let mut model = MgmModel::new(graphs).unwrap();
    for (g1, g2) in canonical_pairs() {
        let mut gm = GmModel::new(Graph::new(g1, NODES), Graph::new(g2, NODES));
        for n in 0..NODES - 1 {
            gm.add_assignment(n, n, -1.0).unwrap();
        }
        model.add_model(gm).unwrap();
    }
    model
}

fn solve(model: &MgmModel, level: OptimizationLevel) -> Result<MgmSolution> {
    let config = RunConfig {
        level,
        ..RunConfig::default()
    };
    let solution = Runner::new(model, config).run()?;
    solution.validate(model)?;
    Ok(solution)
}

#[test]
fn synthetic_complete_is_fully_assigned_under_exhaustive() -> Result<()> {
    let model = synthetic_complete();
    let solution = solve(&model, OptimizationLevel::Exhaustive)?;
    for (pair, labeling) in &solution.labelings {
        for (node, label) in labeling.iter().enumerate() {
            assert!(
                label.is_some(),
                "node {node} of pair {pair:?} left unmatched"
            );
        }
    }
    assert!(solution.evaluate(&model) < 0.0);
    assert!(solution.is_cycle_consistent(&model));
    Ok(())
}

#[test]
fn hotel_like_keeps_a_sentinel_at_every_level() -> Result<()> {
    let model = hotel_like();
    for level in [
        OptimizationLevel::Fast,
        OptimizationLevel::Incremental,
        OptimizationLevel::Balanced,
        OptimizationLevel::Exhaustive,
    ] {
        let solution = solve(&model, level)?;
        let sentinels = solution
            .labelings
            .values()
            .flat_map(|l| l.iter())
            .filter(|l| l.is_none())
            .count();
        assert!(sentinels > 0, "no sentinel under {level:?}");
    }
    Ok(())
}

#[test]
fn incremental_level_stays_consistent_on_a_shuffled_order() -> Result<()> {
    // Four graphs, so the leading subset covers them all and the improvement
    // sweep runs mid-construction; the result must still be a proper
    // partition-backed solution.
    let model = synthetic_complete();
    let config = RunConfig {
        level: OptimizationLevel::Incremental,
        seed: Some(11),
        ..RunConfig::default()
    };
    let solution = Runner::new(&model, config).run()?;
    solution.validate(&model)?;
    assert!(solution.is_cycle_consistent(&model));
    assert!(solution.evaluate(&model) < 0.0);
    Ok(())
}

#[test]
fn optimization_levels_are_monotone() -> Result<()> {
    for model in [synthetic_complete(), hotel_like()] {
        let fast = solve(&model, OptimizationLevel::Fast)?.evaluate(&model);
        let balanced = solve(&model, OptimizationLevel::Balanced)?.evaluate(&model);
        let exhaustive = solve(&model, OptimizationLevel::Exhaustive)?.evaluate(&model);
        assert!(fast >= balanced);
        assert!(balanced >= exhaustive);
    }
    Ok(())
}

#[test]
fn save_and_load_round_trip() -> Result<()> {
    let model = synthetic_complete();
    let solution = solve(&model, OptimizationLevel::Balanced)?;

    let dir = tempfile::tempdir()?;
    let written = SolutionWriter::save(&dir.path().join("result"), &model, &solution)?;
    let restored = SolutionReader::load(&written, &model)?;

    assert_eq!(restored.labelings, solution.labelings);
    let delta = (restored.evaluate(&model) - solution.evaluate(&model)).abs();
    assert!(delta < 1e-9);
    Ok(())
}

#[test]
fn parallel_construction_matches_sequential() -> Result<()> {
    let model = synthetic_complete();
    let order = MatchingOrder::random(&model, 7);

    let sequential = SequentialGenerator::new(&model)
        .generate(&order)?
        .export_solution(&model);
    let parallel = ParallelGenerator::new(&model, 4)
        .generate(&order)?
        .export_solution(&model);
    assert_eq!(sequential.evaluate(&model), parallel.evaluate(&model));
    Ok(())
}

#[test]
fn parallel_run_stays_valid() -> Result<()> {
    let model = synthetic_complete();
    let config = RunConfig {
        level: OptimizationLevel::Balanced,
        seed: Some(3),
        threads: 4,
    };
    let solution = Runner::new(&model, config).run()?;
    solution.validate(&model)?;
    assert!(solution.evaluate(&model) < 0.0);
    Ok(())
}

#[test]
fn synchronization_restores_cycle_consistency() -> Result<()> {
    let model = synthetic_complete();

    // Identity everywhere except pair (0, 1), which is cyclically shifted;
    // composing 0->1 with 1->2 then disagrees with 0->2.
    let mut labelings = IndexMap::new();
    for (g1, g2) in canonical_pairs() {
        let labeling: Vec<Option<usize>> = if (g1, g2) == (0, 1) {
            (0..NODES).map(|n| Some((n + 1) % NODES)).collect()
        } else {
            (0..NODES).map(Some).collect()
        };
        labelings.insert((g1, g2), labeling);
    }
    let broken = MgmSolution { labelings };
    assert!(!broken.is_cycle_consistent(&model));

    let sync_model = build_sync_model(&model, &broken, true)?;
    let config = RunConfig::default();
    let synced = Runner::new(&sync_model, config).run()?;
    assert!(synced.is_cycle_consistent(&model));
    Ok(())
}

#[test]
fn infeasible_sync_may_widen_the_candidate_set() -> Result<()> {
    let model = hotel_like();
    let solution = solve(&model, OptimizationLevel::Fast)?;

    let feasible = build_sync_model(&model, &solution, true)?;
    let infeasible = build_sync_model(&model, &solution, false)?;
    for (g1, g2) in canonical_pairs() {
        assert_eq!(
            feasible.model_for((g1, g2)).unwrap().assignment_count(),
            NODES - 1
        );
        assert_eq!(
            infeasible.model_for((g1, g2)).unwrap().assignment_count(),
            NODES * NODES
        );
    }
    Ok(())
}
