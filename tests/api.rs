mod common;

use axum::http::{header, HeaderValue, StatusCode};
use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use serde_json::{json, Value};
use uuid::Uuid;

use common::{item_row, stock_row, ScriptedConnector, TestApp, JWT_SECRET};
use stocktake::create_app;
use stocktake::middleware::auth::JwtService;

struct Api {
    server: TestServer,
    bearer: HeaderValue,
    app: TestApp,
}

impl Api {
    fn new(connector: ScriptedConnector) -> Self {
        let app = TestApp::new(connector);
        let token = JwtService::new(JWT_SECRET)
            .generate_token(app.user_id, app.tenant_id, "counter@example.com", 3600)
            .unwrap();
        let server = TestServer::new(create_app(app.state.clone())).unwrap();
        Self {
            server,
            bearer: HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
            app,
        }
    }

    async fn post(&self, path: &str, body: Value) -> axum_test::TestResponse {
        self.server
            .post(path)
            .add_header(header::AUTHORIZATION, self.bearer.clone())
            .json(&body)
            .await
    }

    async fn get(&self, path: &str) -> axum_test::TestResponse {
        self.server
            .get(path)
            .add_header(header::AUTHORIZATION, self.bearer.clone())
            .await
    }

    async fn create_count(&self) -> Value {
        let response = self
            .post("/api/counts", json!({ "warehouse_id": Uuid::new_v4(), "name": "Aisle 4" }))
            .await;
        response.assert_status(StatusCode::CREATED);
        response.json::<Value>()
    }
}

#[tokio::test]
async fn test_health_and_metrics_are_public() {
    let api = Api::new(ScriptedConnector::new());

    let health = api.server.get("/health").await;
    health.assert_status_ok();
    assert_eq!(health.json::<Value>()["status"], "ok");

    api.server.get("/metrics").await.assert_status_ok();
}

#[tokio::test]
async fn test_api_requires_bearer_token() {
    let api = Api::new(ScriptedConnector::new());

    api.server
        .get("/api/counts")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    let forged = JwtService::new("some-other-secret")
        .generate_token(Uuid::new_v4(), Uuid::new_v4(), "x@example.com", 3600)
        .unwrap();
    api.server
        .get("/api/counts")
        .add_header(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", forged)).unwrap(),
        )
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_count_lifecycle_over_http() {
    let api = Api::new(ScriptedConnector::new());
    let count = api.create_count().await;
    let id = count["id"].as_str().unwrap().to_string();
    assert_eq!(count["status"], "DRAFT");

    let item = api
        .post(
            &format!("/api/counts/{}/items", id),
            json!({
                "location_id": count["warehouse_id"],
                "item_code": "SKU-9",
                "item_name": "Sprocket",
                "system_qty": "12",
            }),
        )
        .await;
    item.assert_status(StatusCode::CREATED);
    let item_id = item.json::<Value>()["id"].as_str().unwrap().to_string();

    api.post(&format!("/api/counts/{}/start", id), json!({})).await.assert_status_ok();

    let summary = api
        .post(
            &format!("/api/counts/{}/versions/1/submit", id),
            json!({ "entries": [{ "item_id": item_id, "counted_qty": "10" }] }),
        )
        .await;
    summary.assert_status_ok();
    assert_eq!(summary.json::<Value>()["updated"], 1);

    let completed = api.post(&format!("/api/counts/{}/complete", id), json!({})).await;
    completed.assert_status_ok();
    assert_eq!(completed.json::<Value>()["status"], "SUBMITTED");

    let variances = api.get(&format!("/api/counts/{}/variances", id)).await;
    variances.assert_status_ok();
    let reports = variances.json::<Vec<Value>>();
    assert_eq!(reports.len(), 1);

    let resolved = api
        .post(
            &format!("/api/counts/{}/variances/{}/resolve", id, reports[0]["id"].as_str().unwrap()),
            json!({ "approve": false, "reason": "Recount requested" }),
        )
        .await;
    resolved.assert_status_ok();
    assert_eq!(resolved.json::<Value>()["status"], "REJECTED");

    let recount = api.post(&format!("/api/counts/{}/versions", id), json!({})).await;
    recount.assert_status_ok();
    assert_eq!(recount.json::<Value>()["new_version"], 2);

    let history = api.get(&format!("/api/counts/{}/versions", id)).await;
    history.assert_status_ok();
    assert_eq!(history.json::<Value>()["versions"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_invalid_transition_is_conflict() {
    let api = Api::new(ScriptedConnector::new());
    let count = api.create_count().await;
    let id = count["id"].as_str().unwrap();

    let response = api.post(&format!("/api/counts/{}/resume", id), json!({})).await;
    response.assert_status(StatusCode::CONFLICT);
    assert_eq!(response.json::<Value>()["kind"], "invalid_state");
}

#[tokio::test]
async fn test_unknown_count_is_not_found() {
    let api = Api::new(ScriptedConnector::new());
    api.get(&format!("/api/counts/{}", Uuid::new_v4()))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_load_and_export_over_http() {
    let connector = ScriptedConnector::new()
        .answer("FROM items", vec![item_row("SKU-1", "Widget")])
        .answer("FROM stock", vec![stock_row("SKU-1", 10), stock_row("SKU-1", 5), stock_row("SKU-1", 2)]);
    let api = Api::new(connector);

    for (dataset, table, fields) in [
        ("ITEMS", "items", json!([{"source": "ItemCode", "target": "itemCode"}, {"source": "ItemName", "target": "itemName"}])),
        ("STOCK", "stock", json!([{"source": "ItemCode", "target": "itemCode"}, {"source": "OnHand", "target": "systemQty"}])),
    ] {
        api.post(
            "/api/mappings",
            json!({
                "erp_connection_id": api.app.connection_id,
                "dataset_type": dataset,
                "name": format!("{} mapping", table),
                "main_table": table,
                "field_mappings": fields,
                "is_active": true,
            }),
        )
        .await
        .assert_status(StatusCode::CREATED);
    }

    let count = api.create_count().await;
    let id = count["id"].as_str().unwrap();

    let load = api.post(&format!("/api/counts/{}/load", id), json!({})).await;
    load.assert_status_ok();
    let summary = load.json::<Value>();
    assert_eq!(summary["source"], "configured_mappings");
    assert_eq!(summary["inserted"], 1);

    let export = api.get(&format!("/api/counts/{}/export", id)).await;
    export.assert_status_ok();
    let csv = export.text();
    let mut lines = csv.lines();
    assert!(lines.next().unwrap().contains("itemCode"));
    let row = lines.next().unwrap();
    assert!(row.starts_with("SKU-1,Widget"));
    assert!(row.contains("17"));
}

#[tokio::test]
async fn test_file_import_over_http() {
    let api = Api::new(ScriptedConnector::new());
    let count = api.create_count().await;
    let id = count["id"].as_str().unwrap();

    let csv = "item_code,item_name,quantity\nA-1,Bolt,4\nA-1,Bolt,6\nA-2,Nut,1\n";
    let form = MultipartForm::new().add_part(
        "file",
        Part::bytes(csv.as_bytes().to_vec()).file_name("stock.csv").mime_type("text/csv"),
    );

    let response = api
        .server
        .post(&format!("/api/counts/{}/import", id))
        .add_header(header::AUTHORIZATION, api.bearer.clone())
        .multipart(form)
        .await;
    response.assert_status_ok();

    let summary = response.json::<Value>();
    assert_eq!(summary["file_type"], "csv");
    assert_eq!(summary["source"], "file");
    assert_eq!(summary["rows_read"], 3);
    assert_eq!(summary["inserted"], 2);

    let items = api.get(&format!("/api/counts/{}/items", id)).await.json::<Vec<Value>>();
    let bolt = items.iter().find(|i| i["item_code"] == "A-1").unwrap();
    assert_eq!(bolt["system_qty"], "10");
}

#[tokio::test]
async fn test_import_without_file_is_rejected() {
    let api = Api::new(ScriptedConnector::new());
    let count = api.create_count().await;
    let id = count["id"].as_str().unwrap();

    let form = MultipartForm::new().add_text("location_id", Uuid::new_v4().to_string());
    api.server
        .post(&format!("/api/counts/{}/import", id))
        .add_header(header::AUTHORIZATION, api.bearer.clone())
        .multipart(form)
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}
