use dualdb::model::{key_criteria, NodeRole, QueryOptions, Record, SortOrder};
use dualdb::replication::{MergeCache, ReplicationCoordinator};
use dualdb::store::{MemoryDatastore, StoreOp};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn record(value: Value) -> Record {
    value.as_object().cloned().unwrap()
}

fn stores() -> (Arc<MemoryDatastore>, Arc<MemoryDatastore>) {
    (
        Arc::new(MemoryDatastore::new("local")),
        Arc::new(MemoryDatastore::new("virtual")),
    )
}

fn primary(local: &Arc<MemoryDatastore>, remote: &Arc<MemoryDatastore>) -> ReplicationCoordinator {
    ReplicationCoordinator::new(local.clone(), remote.clone(), NodeRole::Primary)
}

#[tokio::test]
async fn dual_create_tolerates_one_failing_store() {
    let (local, remote) = stores();
    local.fail_operation(StoreOp::Create);
    let coordinator = primary(&local, &remote);

    let result = coordinator
        .dual_create("assets", &record(json!({"asset_id": 1, "name": "Laptop"})))
        .await;

    assert!(result.success);
    assert!(result.local_result.is_none());
    assert_eq!(result.virtual_result.unwrap()["name"], "Laptop");
    assert!(result.error.is_none());
    assert_eq!(remote.rows("assets").len(), 1);
    assert_eq!(coordinator.stats().partial_failures, 1);
}

#[tokio::test]
async fn dual_create_reports_total_failure() {
    let (local, remote) = stores();
    local.fail_operation(StoreOp::Create);
    remote.fail_operation(StoreOp::Create);
    let coordinator = primary(&local, &remote);

    let result = coordinator
        .dual_create("assets", &record(json!({"asset_id": 1})))
        .await;

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("Both databases failed to create record"));
    assert!(result.local_result.is_none());
    assert!(result.virtual_result.is_none());
}

#[tokio::test]
async fn dual_writes_reach_both_stores_on_primary() {
    let (local, remote) = stores();
    let coordinator = primary(&local, &remote);
    let criteria = key_criteria("asset_id", json!(1));

    let created = coordinator
        .dual_create("assets", &record(json!({"asset_id": 1, "name": "Laptop"})))
        .await;
    assert!(created.success);
    assert!(created.local_result.is_some() && created.virtual_result.is_some());

    let updated = coordinator
        .dual_update("assets", &criteria, &record(json!({"name": "Laptop Pro"})))
        .await;
    assert!(updated.success);
    assert_eq!(local.rows("assets")[0]["name"], "Laptop Pro");
    assert_eq!(remote.rows("assets")[0]["name"], "Laptop Pro");

    let deleted = coordinator.dual_delete("assets", &criteria).await;
    assert!(deleted.success);
    assert!(local.rows("assets").is_empty());
    assert!(remote.rows("assets").is_empty());
    assert_eq!(coordinator.stats().partial_failures, 0);
}

#[tokio::test]
async fn merged_read_prefers_virtual_record_on_key_collision() {
    let (local, remote) = stores();
    local.seed("assets", vec![record(json!({"asset_id": 1, "name": "A"}))]);
    remote.seed("assets", vec![record(json!({"asset_id": 1, "name": "B"}))]);
    let coordinator = primary(&local, &remote);

    let rows = coordinator
        .get_merged_data("assets", &QueryOptions::new())
        .await
        .unwrap();

    assert_eq!(rows, vec![record(json!({"asset_id": 1, "name": "B"}))]);
}

#[tokio::test]
async fn merged_read_keeps_non_colliding_records() {
    let (local, remote) = stores();
    local.seed("assets", vec![record(json!({"asset_id": 1}))]);
    remote.seed("assets", vec![record(json!({"asset_id": 2}))]);
    let coordinator = primary(&local, &remote);

    let rows = coordinator
        .get_merged_data("assets", &QueryOptions::new())
        .await
        .unwrap();

    assert_eq!(
        rows,
        vec![record(json!({"asset_id": 1})), record(json!({"asset_id": 2}))]
    );
}

#[tokio::test]
async fn merged_read_passes_query_options_to_both_stores() {
    let (local, remote) = stores();
    local.seed(
        "assets",
        vec![
            record(json!({"asset_id": 1, "status": "active"})),
            record(json!({"asset_id": 2, "status": "retired"})),
        ],
    );
    remote.seed("assets", vec![record(json!({"asset_id": 3, "status": "active"}))]);
    let coordinator = primary(&local, &remote);

    let options = QueryOptions::new()
        .filter_eq("status", "active")
        .order_by("asset_id", SortOrder::Desc);
    let rows = coordinator.get_merged_data("assets", &options).await.unwrap();

    let ids: Vec<_> = rows.iter().map(|r| r["asset_id"].clone()).collect();
    assert_eq!(ids, vec![json!(1), json!(3)]);
}

#[tokio::test]
async fn cache_hit_suppresses_store_calls_until_ttl_expires() {
    let (local, remote) = stores();
    remote.seed("assets", vec![record(json!({"asset_id": 1}))]);
    let coordinator =
        primary(&local, &remote).with_cache(MergeCache::new(Duration::from_millis(150), 64));
    let options = QueryOptions::new();

    coordinator.get_merged_data("assets", &options).await.unwrap();
    coordinator.get_merged_data("assets", &options).await.unwrap();
    assert_eq!(local.stats().lists, 1);
    assert_eq!(remote.stats().lists, 1);

    tokio::time::sleep(Duration::from_millis(300)).await;
    coordinator.get_merged_data("assets", &options).await.unwrap();
    assert_eq!(local.stats().lists, 2);
    assert_eq!(remote.stats().lists, 2);

    let stats = coordinator.stats();
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.cache_misses, 2);
}

#[tokio::test]
async fn merged_read_stays_stale_after_write_by_default() {
    let (local, remote) = stores();
    let coordinator = primary(&local, &remote);

    let before = coordinator
        .get_merged_data("assets", &QueryOptions::new())
        .await
        .unwrap();
    coordinator
        .dual_create("assets", &record(json!({"asset_id": 1})))
        .await;
    let after = coordinator
        .get_merged_data("assets", &QueryOptions::new())
        .await
        .unwrap();

    assert!(before.is_empty());
    assert!(after.is_empty());
}

#[tokio::test]
async fn member_node_only_talks_to_virtual_store() {
    let (local, remote) = stores();
    local.seed("assets", vec![record(json!({"asset_id": 9, "name": "local only"}))]);
    let coordinator = ReplicationCoordinator::new(local.clone(), remote.clone(), NodeRole::Member);
    let criteria = key_criteria("asset_id", json!(1));

    let created = coordinator
        .dual_create("assets", &record(json!({"asset_id": 1, "name": "Laptop"})))
        .await;
    assert!(created.success);
    assert!(created.local_result.is_none());
    assert!(created.virtual_result.is_some());

    assert!(
        coordinator
            .dual_update("assets", &criteria, &record(json!({"name": "Desk"})))
            .await
            .success
    );

    let first = coordinator
        .get_merged_data("assets", &QueryOptions::new())
        .await
        .unwrap();
    coordinator
        .get_merged_data("assets", &QueryOptions::new())
        .await
        .unwrap();
    assert_eq!(first, vec![record(json!({"asset_id": 1, "name": "Desk"}))]);

    assert!(coordinator.dual_delete("assets", &criteria).await.success);

    assert_eq!(local.stats().total(), 0);
    assert_eq!(remote.stats().lists, 2);
    assert_eq!(coordinator.stats().cache_misses, 0);
    assert_eq!(coordinator.cache().entry_count(), 0);
}

#[tokio::test]
async fn member_node_surfaces_virtual_store_error() {
    let (local, remote) = stores();
    remote.fail_operation(StoreOp::Create);
    let coordinator = ReplicationCoordinator::new(local.clone(), remote, NodeRole::Member);

    let result = coordinator
        .dual_create("assets", &record(json!({"asset_id": 1})))
        .await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("injected create failure"));
    assert_eq!(local.stats().total(), 0);
}

#[test]
fn operation_result_uses_camel_case_fields() {
    let result = dualdb::OperationResult::succeeded(Some(json!({"asset_id": 1})), None);
    let value = serde_json::to_value(&result).unwrap();

    assert_eq!(value["success"], true);
    assert_eq!(value["localResult"]["asset_id"], 1);
    assert!(value["virtualResult"].is_null());
}
