#![allow(dead_code)]

use std::{fs, path::PathBuf};

use ledger_core::{Chain, ChainState};
use serde_json::{json, Value};
use tempfile::{tempdir, TempDir};

pub fn create_temp_chain_path() -> (TempDir, PathBuf) {
    // Create a temporary directory holding the chain file
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let path = temp_dir.path().join("data").join("blockchain_chain.json");
    (temp_dir, path)
}

pub fn read_json(path: &PathBuf) -> Value {
    let raw = fs::read_to_string(path).expect("chain file should be readable");
    serde_json::from_str(&raw).expect("chain file should be valid JSON")
}

pub fn write_state(path: &PathBuf, state: &ChainState) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, serde_json::to_vec_pretty(state).unwrap()).unwrap();
}

pub fn anchored_chain(difficulty: u32, anchors: usize) -> Chain {
    let mut chain = Chain::new(difficulty).expect("genesis mined");
    for i in 0..anchors {
        chain.add_transaction(json!({ "type": "trace_event", "batch_number": format!("B-{i}") }));
        chain.mine_pending("system").unwrap();
    }
    chain
}
