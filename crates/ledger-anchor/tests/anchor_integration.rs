use anyhow::anyhow;
use ledger_anchor::{init_logging, AnchorService, LedgerConfig};
use ledger_core::{
    constants::MAX_DIFFICULTY, now_secs, Block, CancelToken, Chain, ChainState, ChainStore,
    LedgerError,
};
use ledger_storage::{load_or_init, MemoryStore, OnCorrupt, StorageError};
use serde_json::json;
use std::{collections::HashSet, fs, sync::Arc, thread, time::Duration};
use tempfile::tempdir;

fn config_in(dir: &std::path::Path, difficulty: u32) -> LedgerConfig {
    LedgerConfig {
        chain_path: dir.join("data").join("blockchain_chain.json"),
        difficulty,
        ..LedgerConfig::default()
    }
}

fn memory_service(difficulty: u32) -> AnchorService<MemoryStore> {
    let config = LedgerConfig {
        difficulty,
        ..LedgerConfig::default()
    };
    let store = Arc::new(MemoryStore::new());
    let chain = load_or_init(store.as_ref(), difficulty, OnCorrupt::Fail).unwrap();
    AnchorService::with_store(chain, store, &config)
}

/// A chain whose difficulty can never be met, built without mining.
fn unmineable_state() -> ChainState {
    ChainState {
        difficulty: 64,
        chain: vec![Block::new(0, now_secs(), json!({ "message": "genesis" }), "0").to_record()],
        pending_transactions: vec![],
    }
}

struct FailingStore;

impl ChainStore for FailingStore {
    fn load(&self) -> anyhow::Result<Option<ChainState>> {
        Ok(None)
    }

    fn save(&self, _state: &ChainState) -> anyhow::Result<()> {
        Err(anyhow!("disk full"))
    }
}

#[tokio::test]
async fn test_anchor_batch_create_on_fresh_chain() -> anyhow::Result<()> {
    init_logging("info");
    let temp_dir = tempdir()?;
    let service = AnchorService::open(&config_in(temp_dir.path(), 2))?;

    let receipt = service.anchor(json!({ "type": "batch_create", "batch_number": "B-1" }))?;
    assert_eq!(receipt.block_index, 1);
    assert!(receipt.block_hash.starts_with("00"));
    assert_eq!(receipt.tx_id.len(), 32);
    assert!(service.verify_chain());

    let as_json = serde_json::to_value(&receipt)?;
    for key in ["tx_id", "block_hash", "block_index", "timestamp"] {
        assert!(as_json.get(key).is_some(), "receipt missing {key}");
    }
    Ok(())
}

#[tokio::test]
async fn test_verify_fresh_chain() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let service = AnchorService::open(&config_in(temp_dir.path(), 2))?;
    assert!(service.verify_chain());
    assert_eq!(service.summary()?.height, 0);
    Ok(())
}

#[tokio::test]
async fn test_sequential_anchors_link() -> anyhow::Result<()> {
    let service = memory_service(1);
    let first = service.anchor(json!({ "event_type": "planting", "batch_number": "B-7" }))?;
    let second = service.anchor(json!({ "event_type": "harvest", "batch_number": "B-7" }))?;
    assert_eq!(first.block_index, 1);
    assert_eq!(second.block_index, 2);

    let state = service.export_state()?;
    assert_eq!(state.chain[2].previous_hash, first.block_hash);
    assert_eq!(state.chain[1].previous_hash, state.chain[0].hash);
    assert_eq!(state.chain[2].hash, second.block_hash);
    assert_eq!(state.chain[2].data["transactions"][0]["tx_id"], second.tx_id.as_str());
    assert_eq!(state.chain[2].data["miner"], "system");
    assert!(state.pending_transactions.is_empty());
    assert!(service.verify_chain());
    Ok(())
}

#[tokio::test]
async fn test_anchor_persists_across_reopen() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let config = config_in(temp_dir.path(), 1);
    let receipt = {
        let service = AnchorService::open(&config)?;
        service.anchor(json!({ "type": "trace_event", "batch_number": "B-2" }))?
    };

    let raw = fs::read_to_string(&config.chain_path)?;
    assert!(raw.contains(&receipt.tx_id));

    let reopened = AnchorService::open(&config)?;
    let summary = reopened.summary()?;
    assert_eq!(summary.height, 1);
    assert_eq!(summary.tip_hash.as_deref(), Some(receipt.block_hash.as_str()));
    assert!(reopened.verify_chain());
    Ok(())
}

#[tokio::test]
async fn test_tampered_file_fails_verification() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let config = config_in(temp_dir.path(), 1);
    {
        let service = AnchorService::open(&config)?;
        service.anchor(json!({ "batch_number": "B-3", "quantity": 100 }))?;
    }
    let raw = fs::read_to_string(&config.chain_path)?;
    fs::write(&config.chain_path, raw.replace("\"quantity\": 100", "\"quantity\": 900"))?;

    let reopened = AnchorService::open(&config)?;
    assert_eq!(reopened.summary()?.height, 1);
    assert!(!reopened.verify_chain());
    Ok(())
}

#[tokio::test]
async fn test_corrupt_file_with_fail_policy() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let config = LedgerConfig {
        on_corrupt: OnCorrupt::Fail,
        ..config_in(temp_dir.path(), 1)
    };
    fs::create_dir_all(config.chain_path.parent().unwrap())?;
    fs::write(&config.chain_path, "not json")?;

    let err = match AnchorService::open(&config) {
        Ok(_) => panic!("corrupt file must not open in fail mode"),
        Err(err) => err,
    };
    assert!(err.downcast_ref::<StorageError>().is_some());

    let reset = AnchorService::open(&LedgerConfig {
        on_corrupt: OnCorrupt::Reset,
        ..config
    })?;
    assert!(reset.verify_chain());
    Ok(())
}

#[tokio::test]
async fn test_concurrent_anchors_are_serialized() -> anyhow::Result<()> {
    let service = memory_service(1);
    let mut handles = Vec::new();
    for i in 0..16 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service
                .anchor_async(json!({ "batch_number": format!("B-{i}") }))
                .await
        }));
    }

    let mut indices = HashSet::new();
    for handle in handles {
        let receipt = handle.await??;
        assert!(indices.insert(receipt.block_index));
    }
    assert_eq!(indices, (1..=16).collect::<HashSet<u64>>());
    assert!(service.verify_chain());

    let stored = service.store().snapshot().expect("state saved");
    assert_eq!(stored.chain.len(), 17);
    Ok(())
}

#[tokio::test]
async fn test_mining_cap_rolls_back_anchor() -> anyhow::Result<()> {
    let config = LedgerConfig {
        max_mining_attempts: Some(200),
        ..LedgerConfig::default()
    };
    let store = Arc::new(MemoryStore::new());
    let chain = Chain::import_state(unmineable_state())?;
    let service = AnchorService::with_store(chain, store, &config);

    let err = service.anchor(json!({ "batch_number": "B-4" })).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<LedgerError>(),
        Some(LedgerError::MiningAborted { attempts: 200 })
    ));
    let summary = service.summary()?;
    assert_eq!(summary.height, 0);
    assert_eq!(summary.pending, 0);
    assert!(service.store().snapshot().is_none(), "nothing persisted");
    Ok(())
}

#[tokio::test]
async fn test_cancelled_anchor_rolls_back() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let chain = Chain::import_state(unmineable_state())?;
    let service = AnchorService::with_store(chain, store, &LedgerConfig::default());

    let token = CancelToken::new();
    token.cancel();
    let err = service
        .anchor_with_cancel(json!({ "batch_number": "B-5" }), token)
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<LedgerError>(),
        Some(LedgerError::MiningCancelled { .. })
    ));
    assert_eq!(service.summary()?.pending, 0);
    Ok(())
}

#[tokio::test]
async fn test_save_failure_is_reported() -> anyhow::Result<()> {
    let service = AnchorService::with_store(
        Chain::new(0)?,
        Arc::new(FailingStore),
        &LedgerConfig::default(),
    );
    let err = service.anchor(json!({ "batch_number": "B-6" })).unwrap_err();
    assert!(format!("{err:#}").contains("disk full"));

    // The block was mined before the save failed and stays in memory.
    let summary = service.summary()?;
    assert_eq!(summary.height, 1);
    assert_eq!(summary.pending, 0);
    assert_eq!(service.trace_history("B-6")?.len(), 1);
    assert!(service.verify_chain());
    Ok(())
}

#[tokio::test]
async fn test_trace_history_by_batch() -> anyhow::Result<()> {
    let service = memory_service(1);
    service.anchor(json!({ "type": "batch_create", "batch_number": "B-8" }))?;
    service.anchor(json!({ "type": "batch_create", "batch_number": "B-9" }))?;
    service.anchor(json!({ "type": "trace_event", "batch_number": "B-8" }))?;

    let history = service.trace_history("B-8")?;
    let indices: Vec<u64> = history.iter().map(|r| r.index).collect();
    assert_eq!(indices, vec![1, 3]);
    assert_eq!(
        history[1].data["transactions"][0]["payload"]["type"],
        "trace_event"
    );
    assert!(service.trace_history("B-0")?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_open_honors_mining_cap_for_genesis() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let config = LedgerConfig {
        max_mining_attempts: Some(10),
        ..config_in(temp_dir.path(), MAX_DIFFICULTY)
    };
    let (tx, rx) = std::sync::mpsc::channel();
    let worker_config = config.clone();
    thread::spawn(move || {
        let _ = tx.send(AnchorService::open(&worker_config).map(|_| ()));
    });
    let err = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("open returned within the attempt cap")
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<LedgerError>(),
        Some(LedgerError::MiningAborted { attempts: 10 })
    ));
    assert!(!config.chain_path.exists(), "nothing persisted");

    let err = match AnchorService::open(&config_in(temp_dir.path(), MAX_DIFFICULTY + 1)) {
        Ok(_) => panic!("difficulty above the hash width must be rejected"),
        Err(err) => err,
    };
    assert!(matches!(
        err.downcast_ref::<LedgerError>(),
        Some(LedgerError::InvalidDifficulty { difficulty: 65, .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_record_event_persists_direct_payload() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let config = config_in(temp_dir.path(), 1);
    let event = json!({ "batch_number": "B-10", "event_type": "planting" });
    let record = {
        let service = AnchorService::open(&config)?;
        service.anchor(json!({ "type": "batch_create", "batch_number": "B-10" }))?;
        service.record_event(event.clone())?
    };
    assert_eq!(record.index, 2);
    assert_eq!(record.data, event);

    let reopened = AnchorService::open(&config)?;
    let history = reopened.trace_history("B-10")?;
    assert_eq!(history.len(), 2);
    assert_eq!(history[1], record);
    assert!(reopened.verify_chain());
    Ok(())
}
