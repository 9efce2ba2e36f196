//   Copyright 2024 The Meridian Project
//   SPDX-License-Identifier: BSD-3-Clause

use meridian_common_types::{LedgerValue, SlotIndex};
use meridian_consensus::{messages::StatementKind, ConsensusConfig, ConsensusOrchestrator, SlotPhase};
use rand::{rngs::StdRng, SeedableRng};

use crate::support::{shared_qset_config, test_value, TestNetwork};

fn three_node_configs() -> Vec<ConsensusConfig> {
    (1..=3).map(|n| shared_qset_config(n, 2, &[1, 2, 3])).collect()
}

/// A single node whose quorum set is itself walks through all three
/// statement kinds and externalizes its own proposal.
#[test]
fn single_node_network_externalizes_own_proposal() {
    let mut net = TestNetwork::build(vec![shared_qset_config(1, 1, &[1])]);
    let v0 = test_value(0xaa);
    net.propose(0, v0);

    let node = net.node(0);
    let kinds: Vec<StatementKind> = node.sent.iter().map(|signed| signed.statement.kind()).collect();
    assert_eq!(kinds, vec![
        StatementKind::Prepare,
        StatementKind::Confirm,
        StatementKind::Externalize,
    ]);
    for signed in &node.sent {
        assert_eq!(signed.statement.ballot.counter, 1);
        assert_eq!(signed.statement.ballot.value_hash, v0.hash());
    }
    assert_eq!(node.externalized.len(), 1);
    assert_eq!(node.committed_value(SlotIndex(0)), Some(v0));
}

/// Three honest nodes proposing the same value commit it with exactly one
/// statement per phase each.
#[test]
fn three_honest_nodes_commit_unanimously() {
    let mut net = TestNetwork::build(three_node_configs());
    let v0 = test_value(0xaa);
    for index in 0..3 {
        net.propose(index, v0);
    }
    net.deliver_all();

    for index in 0..3 {
        let node = net.node(index);
        assert_eq!(node.committed_value(SlotIndex(0)), Some(v0), "node {} disagrees", index);
        assert_eq!(node.externalized.len(), 1);
        assert_eq!(net.sent_for_slot(index, SlotIndex(0)), 3, "node {} chattered", index);
    }
}

/// Two conflicting proposals: the undecided node prepares the
/// lexicographically-least value by hash, the quorum follows it, and the
/// outvoted proposer abandons its ballot on timeout, re-joining at counter 2.
#[test]
fn conflicting_proposals_resolve_by_bump() {
    let mut net = TestNetwork::build(three_node_configs());
    let va = test_value(0xa1);
    let vb = test_value(0xb2);
    net.register_tx_set(va.tx_set_hash);
    net.register_tx_set(vb.tx_set_hash);

    let (least, other, least_proposer, other_proposer) = if va.hash() < vb.hash() {
        (va, vb, 0usize, 1usize)
    } else {
        (vb, va, 1, 0)
    };
    net.propose(least_proposer, least);
    net.propose(other_proposer, other);
    net.deliver_all();

    // The least-hash side commits; the outvoted proposer is still stuck on
    // its own ballot
    assert_eq!(net.node(least_proposer).committed_value(SlotIndex(0)), Some(least));
    assert_eq!(net.node(2).committed_value(SlotIndex(0)), Some(least));
    assert_eq!(net.node(other_proposer).committed_value(SlotIndex(0)), None);

    // Its ballot timer fires: bump the counter, adopt the value the
    // v-blocking majority stands behind, and catch up
    net.advance_time(2_000);
    net.deliver_all();

    for index in 0..3 {
        assert_eq!(net.node(index).committed_value(SlotIndex(0)), Some(least), "node {}", index);
    }
    assert_eq!(net.node(other_proposer).committed_counter(SlotIndex(0)), Some(2));

    // Validity: the decided value was one of the proposed ones
    assert!(least == va || least == vb);
}

/// A non-validating replica originates nothing but still tracks the quorum
/// and externalizes what it commits.
#[test]
fn non_validator_follows_the_quorum() {
    let mut configs = three_node_configs();
    configs[2].validating = false;
    let mut net = TestNetwork::build(configs);
    let v0 = test_value(0xaa);
    net.register_tx_set(v0.tx_set_hash);
    net.propose(0, v0);
    net.propose(1, v0);
    net.deliver_all();

    assert!(net.node(2).sent.is_empty(), "non-validator must not originate statements");
    assert_eq!(net.node(2).committed_value(SlotIndex(0)), Some(v0));
    assert_eq!(net.node(0).committed_value(SlotIndex(0)), Some(v0));
    assert_eq!(net.node(1).committed_value(SlotIndex(0)), Some(v0));
}

/// After a slot closes, the successor stays throttled until the close
/// interval elapses, then runs to a decision.
#[test]
fn successive_slots_respect_the_close_throttle() {
    let mut net = TestNetwork::build(three_node_configs());
    let v0 = test_value(0xaa);
    for index in 0..3 {
        net.propose(index, v0);
    }
    net.deliver_all();
    for index in 0..3 {
        assert_eq!(net.node(index).orchestrator().current_slot(), SlotIndex(1));
        assert_eq!(
            net.node(index).orchestrator().slot_phase(SlotIndex(1)),
            Some(SlotPhase::Waiting)
        );
    }

    let v1 = test_value(0xbb);
    net.advance_time(2_500);
    for index in 0..3 {
        net.propose(index, v1);
    }
    net.deliver_all();
    for index in 0..3 {
        assert_eq!(net.node(index).committed_value(SlotIndex(1)), Some(v1));
    }
}

/// Agreement survives arbitrary message orderings: whatever subset commits,
/// it commits one value.
#[test]
fn agreement_holds_under_shuffled_delivery() {
    for seed in 0..8u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut net = TestNetwork::build(three_node_configs());
        let va = test_value(0xa1);
        let vb = test_value(0xb2);
        net.register_tx_set(va.tx_set_hash);
        net.register_tx_set(vb.tx_set_hash);
        net.propose(0, va);
        net.propose(1, vb);
        net.deliver_shuffled(&mut rng);

        // Let ballot timers resolve any standoff
        for _ in 0..10 {
            let all_committed = (0..3).all(|index| net.node(index).committed_value(SlotIndex(0)).is_some());
            if all_committed {
                break;
            }
            net.advance_time(10_000);
            net.deliver_shuffled(&mut rng);
        }

        let decided: Vec<LedgerValue> = (0..3)
            .filter_map(|index| net.node(index).committed_value(SlotIndex(0)))
            .collect();
        assert!(!decided.is_empty(), "seed {}: nobody decided", seed);
        assert!(
            decided.windows(2).all(|pair| pair[0] == pair[1]),
            "seed {}: divergent decisions {:?}",
            seed,
            decided
        );
    }
}

/// Replaying a node's captured inbound stream against a fresh core yields
/// bit-identical outbound statements.
#[test]
fn replay_is_deterministic() {
    let mut net = TestNetwork::build(three_node_configs());
    let va = test_value(0xa1);
    let vb = test_value(0xb2);
    net.register_tx_set(va.tx_set_hash);
    net.register_tx_set(vb.tx_set_hash);
    net.propose(0, va);
    net.propose(1, vb);
    net.deliver_all();
    net.advance_time(2_000);
    net.deliver_all();

    for index in 0..3 {
        let node = net.node(index);
        assert!(!node.calls.is_empty());
        assert_eq!(
            node.replayed_output(),
            node.sent,
            "node {} replay diverged",
            index
        );
    }
}

/// Phases never regress over a whole contested run.
#[test]
fn phases_are_monotone() {
    let mut net = TestNetwork::build(three_node_configs());
    let va = test_value(0xa1);
    let vb = test_value(0xb2);
    net.register_tx_set(va.tx_set_hash);
    net.register_tx_set(vb.tx_set_hash);
    net.propose(0, va);
    net.propose(1, vb);

    let mut last: Vec<Option<SlotPhase>> = vec![None; 3];
    for round in 0..6 {
        if round > 0 {
            net.advance_time(5_000);
        }
        net.deliver_all();
        for index in 0..3 {
            let phase = net.node(index).orchestrator().slot_phase(SlotIndex(0));
            if let (Some(previous), Some(current)) = (last[index], phase) {
                assert!(current >= previous, "node {} regressed {} -> {}", index, previous, current);
            }
            if phase.is_some() {
                last[index] = phase;
            }
        }
    }
}

/// The full construction path rejects a quorum set whose threshold exceeds
/// its membership, before the node ever joins a network. Such a set can only
/// arrive through deserialization, which is exactly how operator configs
/// come in.
#[test]
fn invalid_quorum_set_is_fatal_at_load() {
    let json = format!("{{\"threshold\": 9, \"members\": [\"{}\"]}}", "11".repeat(32));
    let bad_qset: meridian_common_types::QuorumSet = serde_json::from_str(&json).unwrap();

    let mut config = shared_qset_config(1, 2, &[1, 2, 3]);
    config.quorum_set = bad_qset;
    assert!(ConsensusOrchestrator::new(config).is_err());
}
