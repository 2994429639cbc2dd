//! End-to-end runs of the headless runner, as a library and as a binary.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde_json::{json, Value};
use skirmish_core::data::{AiAssignment, Scenario};
use skirmish_headless::runner::{check_determinism, play_replay, PROCESS_AGENT_CLASS};
use skirmish_headless::{run_match, MatchInputs, MatchOptions};
use skirmish_test_utils::fixtures::{duel_scenario, sample_game_data_value, skirmish_scenario};
use tempfile::TempDir;

const BIN: &str = env!("CARGO_BIN_EXE_skirmish-headless");

struct Fixture {
    dir: TempDir,
    data: PathBuf,
    scenario: PathBuf,
}

impl Fixture {
    fn new(scenario: &Scenario) -> Self {
        let dir = TempDir::new().unwrap();
        let data = dir.path().join("data.json");
        std::fs::write(&data, sample_game_data_value().to_string()).unwrap();
        let path = dir.path().join("duel.json");
        std::fs::write(&path, serde_json::to_string(scenario).unwrap()).unwrap();
        Self {
            dir,
            data,
            scenario: path,
        }
    }

    fn inputs(&self) -> MatchInputs {
        MatchInputs::load(&self.data, &self.scenario, None).unwrap()
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

fn with_ai(mut scenario: Scenario, team: u32, kind: &str) -> Scenario {
    scenario.ais.insert(
        team,
        AiAssignment {
            kind: kind.to_string(),
            settings: serde_json::Map::new(),
        },
    );
    scenario
}

fn run_binary(args: &[&str]) -> Value {
    let output = Command::new(BIN).args(args).output().unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

fn str_path(path: &Path) -> &str {
    path.to_str().unwrap()
}

#[test]
fn test_match_replay_reproduces_final_hash() {
    let fixture = Fixture::new(&with_ai(duel_scenario(), 2, "basic"));
    let replay_path = fixture.path("duel.replay");
    let report = run_match(
        &fixture.inputs(),
        &MatchOptions {
            ticks: 120,
            replay_out: Some(replay_path.clone()),
            ..MatchOptions::default()
        },
    )
    .unwrap();

    assert_eq!(report.scenario, "duel");
    assert_eq!(report.ticks, 120);
    assert!(!report.ended_early);
    assert_eq!(report.player_number, None);
    assert_eq!(report.teams.len(), 2);

    let replayed = play_replay(&replay_path, true).unwrap();
    assert!(replayed.verified);
    assert_eq!(replayed.final_tick, 120);
    assert_eq!(replayed.hash, report.final_hash);
    assert_eq!(replayed.orders, report.recorded_orders);
}

#[test]
fn test_repeated_runs_agree() {
    let fixture = Fixture::new(&skirmish_scenario(3));
    let report = check_determinism(&fixture.inputs(), 3, 200).unwrap();
    assert_eq!(report.hashes.len(), 3);
    assert!(report.hashes.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn test_missing_data_file_is_error() {
    let fixture = Fixture::new(&duel_scenario());
    assert!(MatchInputs::load(&fixture.path("nope.json"), &fixture.scenario, None).is_err());
}

#[test]
fn test_binary_runs_match_with_process_ai() {
    let fixture = Fixture::new(&with_ai(duel_scenario(), 2, PROCESS_AGENT_CLASS));
    let report = run_binary(&[
        "run",
        "--data",
        str_path(&fixture.data),
        "--scenario",
        str_path(&fixture.scenario),
        "--ticks",
        "60",
    ]);
    assert_eq!(report["ticks"], 60);
    assert_eq!(report["scenario"], "duel");
}

#[test]
fn test_binary_verifies_replay() {
    let fixture = Fixture::new(&duel_scenario());
    let replay_path = fixture.path("duel.replay");
    let report = run_binary(&[
        "run",
        "--data",
        str_path(&fixture.data),
        "--scenario",
        str_path(&fixture.scenario),
        "--ticks",
        "30",
        "--replay-out",
        str_path(&replay_path),
    ]);
    let replayed = run_binary(&["replay", "--file", str_path(&replay_path), "--verify"]);
    assert_eq!(replayed["hash"], report["final_hash"]);
}

#[test]
fn test_binary_agent_speaks_json_lines() {
    let mut child = Command::new(BIN)
        .args(["agent", "--ai", "basic", "--ttl-secs", "30"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let mut stdin = child.stdin.take().unwrap();
    writeln!(stdin, "{}", json!({"cmd": "init", "team": 2, "settings": {}})).unwrap();
    writeln!(stdin, "{}", json!({"cmd": "quit"})).unwrap();
    drop(stdin);

    let stdout = BufReader::new(child.stdout.take().unwrap());
    let first: Value = serde_json::from_str(&stdout.lines().next().unwrap().unwrap()).unwrap();
    assert_eq!(first["data_type"], "prefs");
    assert!(child.wait().unwrap().success());
}

#[test]
fn test_binary_rejects_unknown_agent() {
    let output = Command::new(BIN)
        .args(["agent", "--ai", "oracle"])
        .stdin(Stdio::null())
        .output()
        .unwrap();
    assert!(!output.status.success());
}
