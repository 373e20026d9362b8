//! End-to-end block processing against an in-memory store and a manual clock.

mod common;

use braid_common::events::DAGEvent;
use braid_common::params::DAGParams;
use braid_common::{Address, BlockStatus, Outpoint, Transaction, TxId, TxOutput};
use braid_module_blockdag::dag::{BehaviorFlags, BlockOutcome};
use braid_module_blockdag::dag_error::{DAGError, UTXOError, ViolationKind};
use braid_module_blockdag::virtual_manager::{RejectionReason, TxOutcome};
use braid_notifications::{ChannelRoute, EventKind, Notification, NotificationManager};
use common::{block, block_at, spend, TestDAG, NOW};
use std::sync::Arc;
use std::time::Duration;

const TRUSTED: BehaviorFlags = BehaviorFlags::NO_POW_CHECK;

#[test]
fn new_dag_holds_only_genesis() {
    let test = TestDAG::new();
    let dag = &test.dag;
    assert_eq!(dag.block_count(), 1);
    assert_eq!(dag.tips(), vec![test.genesis()]);
    assert_eq!(dag.selected_tip(), test.genesis());
    assert_eq!(dag.virtual_parents(), vec![test.genesis()]);
    assert_eq!(dag.finality_point(), test.genesis());
    assert!(dag.lookup_utxo(&test.genesis_output()).is_some());
}

#[test]
fn spend_along_the_chain_updates_the_virtual_utxo() {
    let test = TestDAG::new();
    let dag = &test.dag;
    let first = spend(test.genesis_output(), 50, 0xa1);
    let a = block(&[test.genesis()], 1, 0, vec![first.clone()]);
    let second = spend(first.outpoint(0), 50, 0xb2);
    let b = block(&[a.hash()], 2, 0, vec![second.clone()]);

    assert_eq!(dag.process_block(a.clone(), TRUSTED).unwrap(), BlockOutcome::Accepted);
    assert_eq!(dag.process_block(b.clone(), TRUSTED).unwrap(), BlockOutcome::Accepted);

    assert_eq!(dag.selected_chain(), vec![test.genesis(), a.hash(), b.hash()]);
    assert_eq!(dag.blue_score(&b.hash()).unwrap(), 2);
    assert!(dag.is_ancestor_of(&a.hash(), &b.hash()));
    assert!(dag.lookup_utxo(&second.outpoint(0)).is_some());
    assert!(dag.lookup_utxo(&first.outpoint(0)).is_none());
    assert!(dag.lookup_utxo(&test.genesis_output()).is_none());
    assert_eq!(dag.utxo_count(), 1);
}

#[test]
fn sibling_double_spend_keeps_the_selected_parent_spend() {
    let test = TestDAG::new();
    let dag = &test.dag;
    let left = spend(test.genesis_output(), 50, 0xa1);
    let right = spend(test.genesis_output(), 50, 0xa2);
    let a = block(&[test.genesis()], 1, 0, vec![left.clone()]);
    let b = block(&[test.genesis()], 2, 0, vec![right.clone()]);
    dag.process_block(a.clone(), TRUSTED).unwrap();
    dag.process_block(b.clone(), TRUSTED).unwrap();

    let mut parents = dag.virtual_parents();
    parents.sort();
    let mut expected = vec![a.hash(), b.hash()];
    expected.sort();
    assert_eq!(parents, expected);

    let (winner, loser) = if dag.selected_tip() == a.hash() {
        (left, right)
    } else {
        (right, left)
    };
    assert!(dag.lookup_utxo(&winner.outpoint(0)).is_some());
    assert!(dag.lookup_utxo(&loser.outpoint(0)).is_none());

    let acceptance = dag.virtual_acceptance_data();
    let outcome = |id: TxId| acceptance.iter().find(|entry| entry.tx_id == id).map(|entry| entry.outcome);
    assert_eq!(outcome(winner.id()), Some(TxOutcome::Accepted));
    assert_eq!(
        outcome(loser.id()),
        Some(TxOutcome::Rejected(RejectionReason::AlreadySpent))
    );
}

#[test]
fn heavier_tie_break_reorganises_the_chain() {
    let test = TestDAG::new();
    let dag = &test.dag;
    let a = block(&[test.genesis()], 1, 0, vec![]);
    dag.process_block(a.clone(), TRUSTED).unwrap();

    // Equal blue score, so the higher hash wins. Both spend the genesis output.
    let mut siblings = [
        block(&[a.hash()], 2, 0, vec![spend(test.genesis_output(), 50, 0xa1)]),
        block(&[a.hash()], 2, 1, vec![spend(test.genesis_output(), 50, 0xa2)]),
    ];
    siblings.sort_by_key(|b| b.hash());
    let [low, high] = siblings;
    let low_spend = low.transactions[0].clone();
    let high_spend = high.transactions[0].clone();

    dag.process_block(low.clone(), TRUSTED).unwrap();
    assert_eq!(dag.selected_tip(), low.hash());
    assert!(dag.lookup_utxo(&low_spend.outpoint(0)).is_some());
    test.events.take();

    dag.process_block(high.clone(), TRUSTED).unwrap();
    assert_eq!(dag.selected_chain(), vec![test.genesis(), a.hash(), high.hash()]);
    assert!(!dag.is_in_selected_chain(&low.hash()));
    assert!(dag.lookup_utxo(&high_spend.outpoint(0)).is_some());
    assert!(dag.lookup_utxo(&low_spend.outpoint(0)).is_none());
    assert!(dag.lookup_utxo(&test.genesis_output()).is_none());

    let acceptance = dag.virtual_acceptance_data();
    let outcome = |id: TxId| acceptance.iter().find(|entry| entry.tx_id == id).map(|entry| entry.outcome);
    assert_eq!(outcome(high_spend.id()), Some(TxOutcome::Accepted));
    assert_eq!(
        outcome(low_spend.id()),
        Some(TxOutcome::Rejected(RejectionReason::AlreadySpent))
    );

    let change = test
        .events
        .take()
        .into_iter()
        .find_map(|event| match event {
            DAGEvent::ChainChanged(change) => Some(change),
            _ => None,
        })
        .unwrap();
    assert_eq!(change.removed_chain_block_hashes, vec![low.hash()]);
    assert_eq!(change.added_chain_block_hashes, vec![high.hash()]);
}

#[test]
fn side_chain_forking_below_a_recreated_coinbase_takes_over() {
    let test = TestDAG::new();
    let dag = &test.dag;
    let reward = Transaction::coinbase(
        vec![TxOutput {
            value: 50,
            script_public_key: vec![0xc1],
        }],
        vec![7],
    );

    // The reward output is spent by b and minted again by c with a new entry
    let a = block(&[test.genesis()], 1, 0, vec![reward.clone()]);
    let b = block(&[a.hash()], 2, 0, vec![spend(reward.outpoint(0), 50, 0xb1)]);
    let c = block(&[b.hash()], 3, 0, vec![reward.clone()]);
    let d = block(&[c.hash()], 4, 0, vec![]);
    for main in [&a, &b, &c, &d] {
        assert_eq!(dag.process_block(main.clone(), TRUSTED).unwrap(), BlockOutcome::Accepted);
    }
    let recreated = dag.lookup_utxo(&reward.outpoint(0)).unwrap();
    assert_eq!(recreated.block_blue_score, dag.blue_score(&c.hash()).unwrap());

    let mut parent = test.genesis();
    for n in 1..=5 {
        let side = block(&[parent], 100 + n, 1, vec![]);
        assert_eq!(dag.process_block(side.clone(), TRUSTED).unwrap(), BlockOutcome::Accepted);
        parent = side.hash();
    }

    assert_eq!(dag.selected_tip(), parent);
    assert!(!dag.is_in_selected_chain(&d.hash()));
    assert_eq!(dag.orphan_count(), 0);
    assert!(dag.lookup_utxo(&test.genesis_output()).is_some());
}

#[test]
fn events_follow_processing_order() {
    let test = TestDAG::new();
    let dag = &test.dag;
    let tx = spend(test.genesis_output(), 50, 0xa1);
    let a = block(&[test.genesis()], 1, 0, vec![tx.clone()]);
    dag.process_block(a.clone(), TRUSTED).unwrap();

    let events = test.events.take();
    assert!(matches!(&events[0], DAGEvent::BlockAdded(e) if e.block_hash == a.hash() && e.blue_score == 1));
    assert!(matches!(&events[1], DAGEvent::TransactionAdded(e) if e.tx_ids().eq([tx.id()])));
    assert!(matches!(&events[2], DAGEvent::ChainChanged(e) if e.added_chain_block_hashes == vec![a.hash()]));
    match &events[3] {
        DAGEvent::UTXOOfAddressChanged(e) => {
            assert!(e.changed_addresses.contains(&Address::from_script(&[0x51])));
            assert!(e.changed_addresses.contains(&Address::from_script(&[0xa1])));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(events.len(), 4);
}

#[test]
fn orphan_is_connected_when_its_parent_arrives() {
    let test = TestDAG::new();
    let dag = &test.dag;
    let a = block(&[test.genesis()], 1, 0, vec![]);
    let b = block(&[a.hash()], 2, 0, vec![]);

    assert_eq!(
        dag.process_block(b.clone(), TRUSTED).unwrap(),
        BlockOutcome::Orphan {
            missing: vec![a.hash()]
        }
    );
    assert_eq!(dag.block_status(&b.hash()), Some(BlockStatus::OrphanPending));
    assert_eq!(dag.orphan_count(), 1);
    assert!(matches!(
        dag.process_block(b.clone(), TRUSTED),
        Err(DAGError::DAGViolation {
            kind: ViolationKind::DuplicateBlock,
            ..
        })
    ));

    dag.process_block(a.clone(), TRUSTED).unwrap();
    assert_eq!(dag.orphan_count(), 0);
    assert_eq!(dag.selected_tip(), b.hash());
    assert_eq!(dag.block_status(&b.hash()), Some(BlockStatus::Valid));
}

#[test]
fn orphans_expire() {
    let mut params = DAGParams::default();
    params.orphan_expiration_ms = 10_000;
    let test = TestDAG::with_params(params);
    let dag = &test.dag;
    let missing = block(&[test.genesis()], 1, 0, vec![]);
    dag.process_block(block(&[missing.hash()], 2, 0, vec![]), TRUSTED).unwrap();
    assert_eq!(dag.orphan_count(), 1);

    test.clock.advance(10_001);
    dag.process_delayed_blocks();
    assert_eq!(dag.orphan_count(), 0);
}

#[test]
fn future_block_waits_for_the_clock() {
    let test = TestDAG::new();
    let dag = &test.dag;
    let deviation = test.params.timestamp_deviation_ms;
    let early = block_at(&[test.genesis()], NOW + deviation + 60_000, vec![]);
    let child = block_at(&[early.hash()], NOW, vec![]);

    assert_eq!(
        dag.process_block(early.clone(), TRUSTED).unwrap(),
        BlockOutcome::Delayed {
            process_at: NOW + 60_000
        }
    );
    // A child never runs ahead of its delayed parent
    assert_eq!(
        dag.process_block(child.clone(), TRUSTED).unwrap(),
        BlockOutcome::Delayed {
            process_at: NOW + 60_001
        }
    );
    assert_eq!(dag.delayed_count(), 2);
    assert!(!dag.contains_block(&early.hash()));

    test.clock.advance(60_000);
    let results = dag.process_delayed_blocks();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, early.hash());
    assert!(matches!(results[0].1, Ok(BlockOutcome::Accepted)));
    assert_eq!(dag.next_delayed_time(), Some(NOW + 60_001));

    test.clock.advance(1);
    dag.process_delayed_blocks();
    assert_eq!(dag.delayed_count(), 0);
    assert_eq!(dag.selected_tip(), child.hash());
}

#[tokio::test]
async fn background_task_drains_ready_delayed_blocks() {
    let test = TestDAG::new();
    let dag = &test.dag;
    let deviation = test.params.timestamp_deviation_ms;
    let early = block_at(&[test.genesis()], NOW + deviation + 5_000, vec![]);
    dag.process_block(early.clone(), TRUSTED).unwrap();

    test.clock.advance(5_000);
    let handle = dag.spawn_delayed_processing().unwrap();
    dag.shutdown().await;
    handle.await.unwrap();

    assert!(dag.contains_block(&early.hash()));
    assert_eq!(dag.delayed_count(), 0);
}

#[tokio::test]
async fn shutdown_does_not_wait_out_a_distant_delay() {
    let test = TestDAG::new();
    let dag = &test.dag;
    let deviation = test.params.timestamp_deviation_ms;
    let distant = block_at(&[test.genesis()], NOW + deviation + 3_600_000, vec![]);
    let later = block_at(&[test.genesis()], NOW + deviation + 7_200_000, vec![]);
    dag.process_block(distant.clone(), TRUSTED).unwrap();

    let handle = dag.spawn_delayed_processing().unwrap();
    dag.process_block(later, TRUSTED).unwrap();
    // One drain task serves every delayed block
    assert!(dag.spawn_delayed_processing().is_none());

    let stopped = tokio::time::timeout(Duration::from_secs(2), dag.shutdown()).await;
    assert!(stopped.is_ok());
    handle.await.unwrap();
    assert_eq!(dag.delayed_count(), 2);
    assert!(!dag.contains_block(&distant.hash()));
}

#[test]
fn invalid_block_stays_invalid() {
    let test = TestDAG::new();
    let dag = &test.dag;
    let unknown = Outpoint::new(TxId::new([9; 32]), 0);
    let bad = block(&[test.genesis()], 1, 0, vec![spend(unknown, 1, 0xa1)]);

    assert!(matches!(
        dag.process_block(bad.clone(), TRUSTED),
        Err(DAGError::UTXO(UTXOError::MissingInput { .. }))
    ));
    assert!(!dag.contains_block(&bad.hash()));
    assert_eq!(dag.block_status(&bad.hash()), Some(BlockStatus::Invalid));
    assert!(matches!(
        dag.process_block(bad.clone(), TRUSTED),
        Err(DAGError::KnownInvalid { .. })
    ));

    let child = block(&[bad.hash()], 2, 0, vec![]);
    assert!(matches!(
        dag.process_block(child, TRUSTED),
        Err(DAGError::DAGViolation {
            kind: ViolationKind::InvalidParent(_),
            ..
        })
    ));
    assert_eq!(dag.block_count(), 1);
    assert_eq!(dag.selected_tip(), test.genesis());
}

#[test]
fn structural_checks_reject_bad_parent_lists() {
    let test = TestDAG::new();
    let dag = &test.dag;
    let genesis = test.genesis();

    assert!(matches!(
        dag.process_block(block(&[], 1, 0, vec![]), TRUSTED),
        Err(DAGError::DAGViolation {
            kind: ViolationKind::NoParents,
            ..
        })
    ));
    assert!(matches!(
        dag.process_block(block(&[genesis, genesis], 1, 0, vec![]), TRUSTED),
        Err(DAGError::DAGViolation {
            kind: ViolationKind::DuplicateParent(_),
            ..
        })
    ));
}

#[test]
fn proof_of_work_is_checked_unless_trusted() {
    let test = TestDAG::new();
    let dag = &test.dag;
    // Target of one: no real hash meets it
    let hard = braid_common::Block::new(vec![test.genesis()], NOW, 0x0300_0001, 0, vec![]);

    assert!(matches!(
        dag.process_block(hard.clone(), BehaviorFlags::NONE),
        Err(DAGError::InvalidProofOfWork { .. })
    ));
    assert!(matches!(
        dag.process_block(hard, TRUSTED),
        Err(DAGError::KnownInvalid { .. })
    ));
}

/// Main chain of four blocks and a longer side chain from genesis, with a
/// finality depth of two
fn conflicting_chains() -> (TestDAG, Vec<braid_common::Block>, Vec<braid_common::Block>) {
    let mut params = DAGParams::default();
    params.finality_depth = 2;
    let test = TestDAG::with_params(params);

    let mut main = Vec::new();
    let mut parent = test.genesis();
    for n in 1..=4 {
        let b = block(&[parent], n, 0, vec![]);
        parent = b.hash();
        test.dag.process_block(b.clone(), TRUSTED).unwrap();
        main.push(b);
    }

    let mut side = Vec::new();
    let mut parent = test.genesis();
    for n in 1..=6 {
        let b = block(&[parent], 100 + n, 1, vec![]);
        parent = b.hash();
        test.dag.process_block(b.clone(), TRUSTED).unwrap();
        side.push(b);
    }
    (test, main, side)
}

#[test]
fn chain_leaving_the_finality_point_is_disqualified() {
    let (test, main, side) = conflicting_chains();
    let dag = &test.dag;

    assert_eq!(dag.finality_point(), main[1].hash());
    assert_eq!(dag.selected_tip(), main[3].hash());
    let side_tip = side[5].hash();
    assert_eq!(dag.block_status(&side_tip), Some(BlockStatus::Disqualified));
    assert!(dag.pending_finality_conflicts().contains(&side_tip));
    assert!(test
        .events
        .take()
        .iter()
        .any(|e| matches!(e, DAGEvent::FinalityConflict(c) if c.violating_block_hash == side_tip)));
}

#[test]
fn resolution_switches_to_the_winning_chain_and_survives_restart() {
    let (test, main, side) = conflicting_chains();
    let dag = &test.dag;
    test.events.take();

    dag.resolve_finality_conflict(side[0].hash()).unwrap();
    assert_eq!(dag.selected_tip(), side[5].hash());
    assert!(dag.pending_finality_conflicts().is_empty());
    assert!(dag.is_in_selected_chain(&dag.finality_point()));
    assert_eq!(dag.block_status(&main[3].hash()), Some(BlockStatus::Disqualified));

    let events = test.events.take();
    assert!(matches!(
        &events[0],
        DAGEvent::FinalityConflictResolved(e) if e.finality_block_hash == side[0].hash()
    ));
    assert!(events.iter().any(|e| matches!(
        e,
        DAGEvent::ChainChanged(c) if c.removed_chain_block_hashes.contains(&main[0].hash())
    )));

    let reopened = test.reopen();
    assert_eq!(reopened.dag.selected_tip(), dag.selected_tip());
    assert_eq!(reopened.dag.finality_point(), dag.finality_point());
    assert_eq!(reopened.dag.block_count(), dag.block_count());
}

#[test]
fn resolution_without_conflict_is_refused() {
    let test = TestDAG::new();
    assert!(matches!(
        test.dag.resolve_finality_conflict(test.genesis()),
        Err(DAGError::NoFinalityConflict)
    ));
}

#[test]
fn restart_replays_the_stored_dag() {
    let test = TestDAG::new();
    let dag = &test.dag;
    let first = spend(test.genesis_output(), 50, 0xa1);
    let a = block(&[test.genesis()], 1, 0, vec![first.clone()]);
    let b = block(&[test.genesis()], 2, 0, vec![]);
    let second = spend(first.outpoint(0), 50, 0xc3);
    let c = block(&[a.hash(), b.hash()], 3, 0, vec![second.clone()]);
    for blk in [a, b, c.clone()] {
        dag.process_block(blk, TRUSTED).unwrap();
    }
    // A block record and an order record per block, plus the count; UTXO
    // state is rebuilt from the blocks
    assert_eq!(test.store.len(), 2 * 4 + 1);

    let reopened = test.reopen();
    let restored = &reopened.dag;
    assert_eq!(restored.block_count(), 4);
    assert_eq!(restored.tips(), vec![c.hash()]);
    assert_eq!(restored.selected_chain(), dag.selected_chain());
    assert_eq!(restored.virtual_blue_score(), dag.virtual_blue_score());
    assert_eq!(restored.utxo_count(), dag.utxo_count());
    assert_eq!(
        restored.lookup_utxo(&second.outpoint(0)),
        dag.lookup_utxo(&second.outpoint(0))
    );
    assert!(restored.get_block(&c.hash()).is_some());
    assert_eq!(test.store.len(), 2 * 4 + 1);
}

#[test]
fn notification_manager_observes_the_dag() {
    let test = TestDAG::new();
    let dag = &test.dag;
    let manager = Arc::new(NotificationManager::new());
    dag.register_observer(manager.clone());

    let (route, mut receiver) = ChannelRoute::new();
    let listener = manager.add_listener(Arc::new(route));
    manager.subscribe(listener, EventKind::BlockAdded).unwrap();
    let tx = spend(test.genesis_output(), 50, 0xa1);
    manager.watch_transaction(listener, tx.id()).unwrap();

    let a = block(&[test.genesis()], 1, 0, vec![tx.clone()]);
    dag.process_block(a.clone(), TRUSTED).unwrap();

    assert!(matches!(
        receiver.try_recv(),
        Ok(Notification::BlockAdded(e)) if e.block_hash == a.hash()
    ));
    assert!(matches!(
        receiver.try_recv(),
        Ok(Notification::TransactionAdded { block_hash, transaction })
            if block_hash == a.hash() && transaction.id() == tx.id()
    ));
    assert!(receiver.try_recv().is_err());
}
