mod common;

use rust_decimal_macros::dec;
use uuid::Uuid;

use common::{item_row, stock_row, ScriptedConnector, TestApp};
use stocktake::config::{AppConfig, ErpConnectionSettings};
use stocktake::models::count::{
    AddCountItemRequest, CountItemStatus, CountStatus, CreateCountRequest, UpdateCountItemRequest, UpsertOutcome,
    VarianceStatus,
};
use stocktake::models::item_record::{LoadItemsRequest, LoadSource};
use stocktake::models::mapping::DatasetType;
use stocktake::repositories::CountRepository;
use stocktake::services::query::SqlDialect;

async fn draft_count(app: &TestApp) -> stocktake::models::count::InventoryCount {
    app.state
        .count_service()
        .create_count(
            app.tenant_id,
            CreateCountRequest {
                warehouse_id: Uuid::new_v4(),
                name: Some("Main warehouse".to_string()),
                notes: None,
            },
            app.user_id,
        )
        .await
        .expect("create count")
}

#[tokio::test]
async fn test_fan_out_rows_merge_into_one_item_and_recount() {
    let connector = ScriptedConnector::new()
        .answer("FROM items", vec![item_row("SKU-1", "Widget")])
        .answer(
            "FROM stock",
            vec![stock_row("SKU-1", 10), stock_row("SKU-1", 5), stock_row("SKU-1", 2)],
        );
    let app = TestApp::new(connector);
    app.configure_items_and_stock().await;
    let count = draft_count(&app).await;

    let summary = app
        .state
        .loader_service()
        .load_items(app.tenant_id, count.id, LoadItemsRequest::default())
        .await
        .unwrap();

    assert_eq!(summary.source, LoadSource::ConfiguredMappings);
    assert_eq!(summary.rows_read, 4);
    assert_eq!(summary.items, 1);
    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.failed, 0);

    let counts = app.state.count_service();
    let items = counts.list_items(app.tenant_id, count.id, None).await.unwrap();
    assert_eq!(items.len(), 1);
    let item = &items[0];
    assert_eq!(item.item_code, "SKU-1");
    assert_eq!(item.item_name, "Widget");
    assert_eq!(item.system_qty, dec!(17));
    assert_eq!(item.location_id, count.warehouse_id);

    counts.start_count(app.tenant_id, count.id, app.user_id).await.unwrap();
    counts
        .update_item(
            app.tenant_id,
            count.id,
            item.id,
            UpdateCountItemRequest { counted_qty: dec!(15) },
            app.user_id,
        )
        .await
        .unwrap();

    let submitted = counts.complete_count(app.tenant_id, count.id, app.user_id).await.unwrap();
    assert_eq!(submitted.status, CountStatus::Submitted);

    let items = counts.list_items(app.tenant_id, count.id, None).await.unwrap();
    assert_eq!(items[0].status, CountItemStatus::Variance);
    assert_eq!(items[0].difference, Some(dec!(-2)));

    let outcome = counts.create_new_version(app.tenant_id, count.id, app.user_id).await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.new_version, Some(2));
    assert_eq!(outcome.pending_items, 1);
    assert_eq!(outcome.count.status, CountStatus::Active);

    let recount = counts.list_items(app.tenant_id, count.id, Some(2)).await.unwrap();
    assert_eq!(recount.len(), 1);
    assert_eq!(recount[0].status, CountItemStatus::Pending);
    assert_eq!(recount[0].counted_qty, None);
    assert_eq!(recount[0].previous_counted_qty, Some(dec!(15)));
}

#[tokio::test]
async fn test_reload_updates_instead_of_duplicating() {
    let connector = ScriptedConnector::new()
        .answer("FROM items", vec![item_row("SKU-1", "Widget"), item_row("SKU-2", "Gadget")])
        .answer("FROM stock", vec![stock_row("SKU-1", 4), stock_row("SKU-2", 9)]);
    let app = TestApp::new(connector);
    app.configure_items_and_stock().await;
    let count = draft_count(&app).await;
    let loader = app.state.loader_service();

    let first = loader
        .load_items(app.tenant_id, count.id, LoadItemsRequest::default())
        .await
        .unwrap();
    assert_eq!(first.inserted, 2);

    let second = loader
        .load_items(app.tenant_id, count.id, LoadItemsRequest::default())
        .await
        .unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.updated, 2);

    let items = app.state.count_service().list_items(app.tenant_id, count.id, None).await.unwrap();
    assert_eq!(items.len(), 2);
}

#[tokio::test]
async fn test_reload_refreshes_variance_of_counted_items() {
    let app = TestApp::new(ScriptedConnector::new());
    let count = draft_count(&app).await;
    let counts = app.state.count_service();
    let item = counts
        .add_item(
            app.tenant_id,
            count.id,
            AddCountItemRequest {
                location_id: count.warehouse_id,
                item_code: "SKU-1".to_string(),
                item_name: "Widget".to_string(),
                uom: None,
                pack_qty: None,
                system_qty: dec!(10),
                counted_qty: Some(dec!(8)),
            },
            app.user_id,
        )
        .await
        .unwrap();
    assert_eq!(counts.list_variances(app.tenant_id, count.id, None).await.unwrap().len(), 1);

    let mut reload = item.clone();
    reload.id = Uuid::new_v4();
    reload.counted_qty = None;
    reload.system_qty = dec!(8);
    let (saved, outcome) = app.state.counts.upsert_item(reload.clone()).await.unwrap();
    assert_eq!(outcome, UpsertOutcome::Updated);
    assert_eq!(saved.id, item.id);
    assert_eq!(saved.counted_qty, Some(dec!(8)));
    assert_eq!(saved.difference, Some(dec!(0)));
    assert_eq!(saved.variance_percent, Some(dec!(0)));
    assert!(!saved.has_variance);
    assert!(counts.list_variances(app.tenant_id, count.id, None).await.unwrap().is_empty());

    reload.system_qty = dec!(12);
    let (saved, _) = app.state.counts.upsert_item(reload).await.unwrap();
    assert_eq!(saved.difference, Some(dec!(-4)));
    assert!(saved.has_variance);

    let reports = counts.list_variances(app.tenant_id, count.id, None).await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].system_qty, dec!(12));
    assert_eq!(reports[0].difference, dec!(-4));
    assert_eq!(reports[0].status, VarianceStatus::Pending);
}

#[tokio::test]
async fn test_raw_mapping_load_is_limited() {
    let connector = ScriptedConnector::new().answer("FROM items", vec![item_row("SKU-1", "Widget")]);
    let app = TestApp::new(connector);
    let mut request = app.mapping_request(
        DatasetType::Items,
        "items",
        &[("ItemCode", "itemCode"), ("ItemName", "itemName")],
    );
    request.raw_query = Some("SELECT ItemCode AS \"itemCode\", ItemName AS \"itemName\" FROM items".to_string());
    let mapping = app.state.mapping_service().create(app.tenant_id, request, app.user_id).await.unwrap();
    let count = draft_count(&app).await;

    let summary = app
        .state
        .loader_service()
        .load_items(
            app.tenant_id,
            count.id,
            LoadItemsRequest {
                mapping_id: Some(mapping.id),
                limit: Some(5),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(summary.inserted, 1);

    let statements = app.connector.statements();
    assert_eq!(statements.len(), 1);
    assert!(statements[0].0.starts_with("SELECT * FROM (SELECT ItemCode"));
    assert!(statements[0].0.ends_with(") q LIMIT 5"));
}

#[tokio::test]
async fn test_rows_without_item_code_are_dropped() {
    let connector = ScriptedConnector::new()
        .answer(
            "FROM items",
            vec![item_row("SKU-1", "Widget"), item_row("", "Nameless"), item_row("   ", "Blank")],
        )
        .answer("FROM stock", vec![stock_row("SKU-1", 3)]);
    let app = TestApp::new(connector);
    app.configure_items_and_stock().await;
    let count = draft_count(&app).await;

    let summary = app
        .state
        .loader_service()
        .load_items(app.tenant_id, count.id, LoadItemsRequest::default())
        .await
        .unwrap();

    assert_eq!(summary.rows_dropped, 2);
    assert_eq!(summary.items, 1);
}

#[tokio::test]
async fn test_falls_back_to_manual_entry_without_mappings() {
    let app = TestApp::new(ScriptedConnector::new());
    let count = draft_count(&app).await;

    let summary = app
        .state
        .loader_service()
        .load_items(app.tenant_id, count.id, LoadItemsRequest::default())
        .await
        .unwrap();

    assert_eq!(summary.source, LoadSource::ManualEntry);
    assert_eq!(summary.items, 0);
    let sources: Vec<LoadSource> = summary.attempts.iter().map(|a| a.source).collect();
    assert_eq!(
        sources,
        vec![LoadSource::ConfiguredMappings, LoadSource::LegacyTable, LoadSource::ManualEntry]
    );
    assert!(!summary.attempts[0].success);
}

#[tokio::test]
async fn test_stock_mapping_alone_does_not_load() {
    let connector = ScriptedConnector::new().answer("FROM stock", vec![stock_row("SKU-1", 3)]);
    let app = TestApp::new(connector);
    app.state
        .mapping_service()
        .create(
            app.tenant_id,
            app.mapping_request(DatasetType::Stock, "stock", &[("ItemCode", "itemCode"), ("OnHand", "systemQty")]),
            app.user_id,
        )
        .await
        .unwrap();
    let count = draft_count(&app).await;

    let summary = app
        .state
        .loader_service()
        .load_items(app.tenant_id, count.id, LoadItemsRequest::default())
        .await
        .unwrap();

    assert_eq!(summary.source, LoadSource::ManualEntry);
    assert_eq!(app.connector.connects(), 0);
}

#[tokio::test]
async fn test_legacy_table_fallback() {
    let mut config = AppConfig::in_memory(common::JWT_SECRET);
    let connection_id = Uuid::new_v4();
    config.erp.legacy_items_table = Some("legacy_items".to_string());
    config.erp.default_connection = Some(ErpConnectionSettings {
        id: connection_id,
        url: "postgres://erp.invalid/erp".to_string(),
        dialect: SqlDialect::Postgres,
    });

    let connector = std::sync::Arc::new(
        ScriptedConnector::new().answer("legacy_items", vec![serde_json::json!({"item_code": "OLD-1", "quantity": 6})]),
    );
    let registry = stocktake::services::erp::ConnectionRegistry::new();
    registry.register_shared(connection_id, connector.clone());
    let state = stocktake::AppState::in_memory(config, std::sync::Arc::new(registry));

    let tenant_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();
    let count = state
        .count_service()
        .create_count(
            tenant_id,
            CreateCountRequest {
                warehouse_id: Uuid::new_v4(),
                name: None,
                notes: None,
            },
            user_id,
        )
        .await
        .unwrap();

    let summary = state
        .loader_service()
        .load_items(tenant_id, count.id, LoadItemsRequest::default())
        .await
        .unwrap();

    assert_eq!(summary.source, LoadSource::LegacyTable);
    assert_eq!(summary.inserted, 1);
    assert_eq!(connector.connects(), connector.disconnects());

    let items = state.count_service().list_items(tenant_id, count.id, None).await.unwrap();
    assert_eq!(items[0].item_code, "OLD-1");
    assert_eq!(items[0].system_qty, dec!(6));
}

#[tokio::test]
async fn test_load_rejected_after_submission() {
    let app = TestApp::new(ScriptedConnector::new());
    let count = draft_count(&app).await;
    let counts = app.state.count_service();
    counts.complete_count(app.tenant_id, count.id, app.user_id).await.unwrap();

    let err = app
        .state
        .loader_service()
        .load_items(app.tenant_id, count.id, LoadItemsRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_state");
}

#[tokio::test]
async fn test_sessions_released_after_load() {
    let connector = ScriptedConnector::new()
        .answer("FROM items", vec![item_row("SKU-1", "Widget")])
        .answer("FROM stock", vec![stock_row("SKU-1", 1)]);
    let app = TestApp::new(connector);
    app.configure_items_and_stock().await;
    let count = draft_count(&app).await;

    app.state
        .loader_service()
        .load_items(app.tenant_id, count.id, LoadItemsRequest::default())
        .await
        .unwrap();

    assert_eq!(app.connector.connects(), 2);
    assert_eq!(app.connector.disconnects(), 2);
}
