//! Battles driven through the public API the way peers and controllers
//! drive them.

use proptest::prelude::*;
use serde_json::json;
use skirmish_core::data::{ActorPlacement, Scenario};
use skirmish_core::math::Vec3Fixed;
use skirmish_core::orders::Command;
use skirmish_core::relay::LoopbackRelay;
use skirmish_test_utils::determinism::find_lockstep_divergence;
use skirmish_test_utils::determinism::strategies::{arb_order_stream, TestOrder};
use skirmish_test_utils::fixtures::{duel_scenario, load_battle, skirmish_scenario};

fn overlapping_pair(first_team: u32, second_team: u32) -> Scenario {
    Scenario::from_value(&json!({
        "battlefield": {"size": [400, 400]},
        "actors": [
            {"type": "Tank", "team": first_team, "pos": [100, 100]},
            {"type": "Tank", "team": second_team, "pos": [105, 100]}
        ]
    }))
    .unwrap()
}

#[test]
fn test_wire_order_matches_local_order() {
    let mut local = load_battle(&duel_scenario()).unwrap();
    local.step().unwrap();
    local.step().unwrap();
    let scheduled = local.add_order(0_u64, Command::Move, Some(Vec3Fixed::from_ints(10, 10)), None);
    assert_eq!(scheduled.tick, 5);

    let mut peer = load_battle(&duel_scenario()).unwrap();
    let (relay, remote) = LoopbackRelay::pair();
    peer.attach_relay(Box::new(relay));
    remote
        .raw_sender()
        .send(r#"{"action": "issue_order", "actor": 0, "cmd": "move", "pos": [10, 10], "tick": 5}"#.to_string())
        .unwrap();
    peer.step().unwrap();

    assert_eq!(peer.scheduler().pending(5).0, vec![&scheduled.order]);
    assert_eq!(peer.recorded_orders(), &[scheduled]);
}

#[test]
fn test_handle_and_id_orders_share_the_delay() {
    let mut sim = load_battle(&duel_scenario()).unwrap();
    sim.step().unwrap();
    let handle = sim
        .place_actor(&ActorPlacement::new("Scout", 1, [200.0, 200.0]).with_completion(100.0), &[])
        .unwrap();

    let by_handle = sim.add_order(handle, Command::Move, Some(Vec3Fixed::from_ints(250, 200)), None);
    let by_id = sim.add_order(handle.id(), Command::Stop, None, None);
    assert_eq!(by_handle.tick, 4);
    assert_eq!(by_id.tick, 4);
    assert_eq!(by_handle.order.actor, by_id.order.actor);

    sim.run_until(6).unwrap();
    let scout = sim.actor(handle).unwrap();
    assert!(scout.is_idle());
    assert_eq!(scout.pos, Vec3Fixed::from_ints(200, 200));
}

#[test]
fn test_collision_pair_is_lower_id_first() {
    for (first, second) in [(1, 2), (2, 1)] {
        let mut sim = load_battle(&overlapping_pair(first, second)).unwrap();
        let mut resolved = Vec::new();
        while resolved.is_empty() && sim.tick() < 20 {
            resolved = sim.step().unwrap().collisions;
        }
        assert_eq!(resolved, vec![(0, 1)]);
    }
}

#[test]
fn test_collision_pushes_actors_apart() {
    let mut sim = load_battle(&overlapping_pair(1, 1)).unwrap();
    let before = sim.actors().get(1).unwrap().pos.x - sim.actors().get(0).unwrap().pos.x;
    while sim.step().unwrap().collisions.is_empty() && sim.tick() < 20 {}
    let after = sim.actors().get(1).unwrap().pos.x - sim.actors().get(0).unwrap().pos.x;
    assert!(after > before);
}

#[test]
fn test_peers_ordering_one_actor_on_the_same_tick_agree() {
    let (left_end, right_end) = LoopbackRelay::pair();
    let mut left = load_battle(&duel_scenario()).unwrap();
    let mut right = load_battle(&duel_scenario()).unwrap();
    left.attach_relay(Box::new(left_end));
    right.attach_relay(Box::new(right_end));

    left.run_until(2).unwrap();
    right.run_until(2).unwrap();
    let from_left = left.add_order(0_u64, Command::Move, Some(Vec3Fixed::from_ints(100, 100)), None);
    let from_right = right.add_order(0_u64, Command::Move, Some(Vec3Fixed::from_ints(100, 500)), None);
    assert_eq!(from_left.tick, from_right.tick);
    assert_eq!((from_left.origin, from_right.origin), (Some(0), Some(1)));

    for _ in 0..30 {
        left.step().unwrap();
        right.step().unwrap();
        assert_eq!(left.state_hash(), right.state_hash(), "tick {}", left.tick());
    }
    let tank = left.actors().get(0).unwrap();
    assert_eq!(tank.current_order.as_ref().and_then(|o| o.pos), from_right.order.pos);
}

#[test]
fn test_queued_orders_from_two_peers_keep_each_senders_sequence() {
    let (left_end, right_end) = LoopbackRelay::pair();
    let mut left = load_battle(&duel_scenario()).unwrap();
    let mut right = load_battle(&duel_scenario()).unwrap();
    left.attach_relay(Box::new(left_end));
    right.attach_relay(Box::new(right_end));

    left.run_until(2).unwrap();
    right.run_until(2).unwrap();
    let waypoint = |x, y| Some(Vec3Fixed::from_ints(x, y));
    right.queue_order(0_u64, Command::Move, waypoint(500, 100), None);
    left.queue_order(0_u64, Command::Move, waypoint(300, 100), None);
    right.queue_order(0_u64, Command::Move, waypoint(500, 500), None);
    left.queue_order(0_u64, Command::Move, waypoint(300, 300), None);

    left.run_until(6).unwrap();
    right.run_until(6).unwrap();
    assert_eq!(left.state_hash(), right.state_hash());
    let tank = right.actors().get(0).unwrap();
    let route: Vec<_> = tank
        .current_order
        .iter()
        .chain(tank.order_queue.iter())
        .map(|o| o.pos)
        .collect();
    assert_eq!(
        route,
        vec![waypoint(300, 100), waypoint(300, 300), waypoint(500, 100), waypoint(500, 500)]
    );
}

fn split_alternating(script: &[TestOrder]) -> (Vec<TestOrder>, Vec<TestOrder>) {
    let (left, right): (Vec<_>, Vec<_>) = script
        .iter()
        .cloned()
        .enumerate()
        .partition(|(i, _)| i % 2 == 0);
    (
        left.into_iter().map(|(_, o)| o).collect(),
        right.into_iter().map(|(_, o)| o).collect(),
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn prop_relayed_peers_never_diverge(
        script in arb_order_stream(24, 40, 1200, 1200, 8)
    ) {
        let (left, right) = split_alternating(&script);
        let divergence = find_lockstep_divergence(
            || load_battle(&skirmish_scenario(2)),
            &left,
            &right,
            60,
        )
        .unwrap();
        prop_assert_eq!(divergence, None);
    }
}
