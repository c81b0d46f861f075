//! In-memory stand-in for the catalog service.
//!
//! Implements just enough of the REST surface for the client: login, catalog
//! listing, category/term search, asset search and the `column_info`
//! attribute (create, read, JSON-patch `add`, delete). Every request is
//! recorded so tests can assert on call counts and payloads.

#![allow(dead_code)]

use serde_json::{json, Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use wkc_client::{
    ApiRequest, ApiResponse, ClientConfig, DirectTokenSource, HttpBackend, Method, RetryPolicy,
    TransportError, WkcClient,
};

pub const HOST: &str = "https://cpd.test";
pub const USERNAME: &str = "admin";
pub const PASSWORD: &str = "pw";
pub const TOKEN: &str = "fake-token";

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

#[derive(Debug, Clone)]
struct FakeCategory {
    name: String,
    id: String,
    parent: Option<String>,
}

#[derive(Debug, Clone)]
struct FakeTerm {
    name: String,
    id: String,
    category_id: String,
    artifact_type: String,
}

#[derive(Debug, Clone)]
struct FakeAsset {
    catalog_id: String,
    name: String,
    id: String,
}

#[derive(Default)]
struct FakeState {
    catalogs: Vec<(String, String)>,
    categories: Vec<FakeCategory>,
    terms: Vec<FakeTerm>,
    assets: Vec<FakeAsset>,
    attributes: HashMap<String, Map<String, Value>>,
    calls: Vec<RecordedCall>,
    injected: HashMap<(Method, String), VecDeque<u16>>,
    network_down_on: Option<(Method, String)>,
}

#[derive(Default)]
pub struct FakeCatalogService {
    state: Mutex<FakeState>,
}

impl FakeCatalogService {
    pub fn new() -> Self {
        Self::default()
    }

    /// CAT1 (c-1) holding orders.csv (a-1) and customers.csv (a-2);
    /// categories Sales (cat-1) and Sales>>Customer (cat-9) with two terms.
    pub fn scenario() -> Self {
        Self::new()
            .with_catalog("CAT1", "c-1")
            .with_catalog("CAT2", "c-2")
            .with_asset("c-1", "orders.csv", "a-1")
            .with_asset("c-1", "orders.csv.bak", "a-9")
            .with_asset("c-1", "customers.csv", "a-2")
            .with_category("Sales", "cat-1", None)
            .with_category("Customer", "cat-9", Some("Sales"))
            .with_category("Customer", "cat-77", Some("Support"))
            .with_term("Customer Identifier", "t-42", "cat-9")
            .with_term("Customer Name", "t-43", "cat-9")
            .with_term("Order Amount", "t-50", "cat-1")
    }

    pub fn with_catalog(self, name: &str, id: &str) -> Self {
        self.lock().catalogs.push((name.to_string(), id.to_string()));
        self
    }

    pub fn with_category(self, name: &str, id: &str, parent: Option<&str>) -> Self {
        self.lock().categories.push(FakeCategory {
            name: name.to_string(),
            id: id.to_string(),
            parent: parent.map(str::to_string),
        });
        self
    }

    pub fn with_term(self, name: &str, id: &str, category_id: &str) -> Self {
        self.with_artifact(name, id, category_id, "glossary_term")
    }

    /// A governance artifact of any type (rule, data_class, ...) filed
    /// under a category; it shows up in the same searches as terms.
    pub fn with_artifact(
        self,
        name: &str,
        id: &str,
        category_id: &str,
        artifact_type: &str,
    ) -> Self {
        self.lock().terms.push(FakeTerm {
            name: name.to_string(),
            id: id.to_string(),
            category_id: category_id.to_string(),
            artifact_type: artifact_type.to_string(),
        });
        self
    }

    pub fn with_asset(self, catalog_id: &str, name: &str, id: &str) -> Self {
        self.lock().assets.push(FakeAsset {
            catalog_id: catalog_id.to_string(),
            name: name.to_string(),
            id: id.to_string(),
        });
        self
    }

    pub fn with_attribute(self, asset_id: &str, entity: Value) -> Self {
        let entity = entity.as_object().cloned().unwrap_or_default();
        self.lock().attributes.insert(asset_id.to_string(), entity);
        self
    }

    /// The next calls to (method, path) answer with `statuses`, in order.
    pub fn inject_statuses(&self, method: Method, path: &str, statuses: &[u16]) {
        self.lock()
            .injected
            .entry((method, path.to_string()))
            .or_default()
            .extend(statuses.iter().copied());
    }

    /// Every call to (method, path) fails with a network error.
    pub fn network_down_on(&self, method: Method, path: &str) {
        self.lock().network_down_on = Some((method, path.to_string()));
    }

    pub fn attribute(&self, asset_id: &str) -> Option<Value> {
        self.lock()
            .attributes
            .get(asset_id)
            .map(|entity| Value::Object(entity.clone()))
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn count(&self, method: Method, path: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.method == method && c.path == path)
            .count()
    }

    pub fn count_prefix(&self, method: Method, prefix: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.method == method && c.path.starts_with(prefix))
            .count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    fn handle(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let mut state = self.lock();
        state.calls.push(RecordedCall {
            method: request.method,
            path: request.path.clone(),
            query: request.query.clone(),
            body: request.body.clone(),
        });

        if state.network_down_on.as_ref() == Some(&(request.method, request.path.clone())) {
            return Err(TransportError::Network {
                url: request.url.clone(),
                message: "connection reset by peer".to_string(),
            });
        }
        let key = (request.method, request.path.clone());
        if let Some(status) = state.injected.get_mut(&key).and_then(VecDeque::pop_front) {
            return Ok(ApiResponse::json_body(status, &json!({"message": "injected"})));
        }

        if request.path == "/icp4d-api/v1/authorize" {
            return Ok(authorize(request));
        }
        if request.bearer.as_deref() != Some(TOKEN) {
            return Ok(ApiResponse::json_body(401, &json!({"message": "unauthorized"})));
        }

        let segments: Vec<&str> = request.path.trim_start_matches('/').split('/').collect();
        let response = match (request.method, segments.as_slice()) {
            (Method::Get, ["v2", "catalogs"]) => state.list_catalogs(),
            (Method::Post, ["v3", "search"]) => state.search(request),
            (Method::Post, ["v2", "asset_types", "asset", "search"]) => {
                state.search_assets(request)
            }
            (Method::Get, ["v2", "assets", asset_id]) => state.asset_info(asset_id, request),
            (Method::Post, ["v2", "assets", asset_id, "attributes"]) => {
                state.create_attribute(asset_id, request)
            }
            (Method::Get, ["v2", "assets", asset_id, "attributes", "column_info"]) => {
                state.read_attribute(asset_id)
            }
            (Method::Patch, ["v2", "assets", asset_id, "attributes", "column_info"]) => {
                state.patch_attribute(asset_id, request)
            }
            (Method::Delete, ["v2", "assets", asset_id, "attributes", "column_info"]) => {
                match state.attributes.remove(*asset_id) {
                    Some(_) => ApiResponse::new(204, ""),
                    None => not_found("attribute"),
                }
            }
            _ => not_found("route"),
        };
        Ok(response)
    }
}

impl HttpBackend for FakeCatalogService {
    fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        self.handle(request)
    }
}

fn authorize(request: &ApiRequest) -> ApiResponse {
    let body = request.body.clone().unwrap_or(Value::Null);
    if body["username"] == USERNAME && body["password"] == PASSWORD {
        ApiResponse::json_body(200, &json!({"token": TOKEN}))
    } else {
        ApiResponse::json_body(401, &json!({"message": "invalid credentials"}))
    }
}

fn not_found(what: &str) -> ApiResponse {
    ApiResponse::json_body(404, &json!({"message": format!("{what} not found")}))
}

fn unescape_pointer(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}

impl FakeState {
    fn list_catalogs(&self) -> ApiResponse {
        let catalogs: Vec<Value> = self
            .catalogs
            .iter()
            .map(|(name, id)| json!({"entity": {"name": name}, "metadata": {"guid": id}}))
            .collect();
        ApiResponse::json_body(200, &json!({ "catalogs": catalogs }))
    }

    fn search(&self, request: &ApiRequest) -> ApiResponse {
        let body = request.body.clone().unwrap_or(Value::Null);
        let bool_query = &body["query"]["bool"];

        if let Some(must) = bool_query["must"].as_array() {
            // Category search: text match on the last segment of the name.
            let wanted = must
                .iter()
                .find_map(|clause| clause["match"]["metadata.name"].as_str())
                .unwrap_or("");
            let leaf = wanted.rsplit(">>").next().unwrap_or("").trim();
            let rows: Vec<Value> = self
                .categories
                .iter()
                .filter(|c| c.name == leaf)
                .map(|c| {
                    let mut row = json!({
                        "artifact_id": c.id,
                        "metadata": {"name": c.name, "artifact_type": "category"},
                    });
                    if let Some(parent) = &c.parent {
                        row["categories"] = json!({"primary_category_name": parent});
                    }
                    row
                })
                .collect();
            return ApiResponse::json_body(200, &json!({"size": rows.len(), "rows": rows}));
        }

        let category_id = bool_query["filter"]["bool"]["should"]
            .as_array()
            .and_then(|should| {
                should
                    .iter()
                    .find_map(|c| c["term"]["categories.primary_category_id"].as_str())
            })
            .unwrap_or("");
        let size = body["size"].as_u64().unwrap_or(10) as usize;
        let rows: Vec<Value> = self
            .terms
            .iter()
            .filter(|t| t.category_id == category_id)
            .take(size)
            .map(|t| {
                json!({
                    "artifact_id": t.id,
                    "metadata": {"name": t.name, "artifact_type": t.artifact_type},
                    "categories": {"primary_category_id": t.category_id},
                })
            })
            .collect();
        ApiResponse::json_body(200, &json!({"size": rows.len(), "rows": rows}))
    }

    fn search_assets(&self, request: &ApiRequest) -> ApiResponse {
        let catalog_id = request.query_param("catalog_id").unwrap_or("");
        let body = request.body.clone().unwrap_or(Value::Null);
        let query = body["query"].as_str().unwrap_or("");
        let limit = body["limit"].as_u64().map(|l| l as usize).unwrap_or(usize::MAX);
        let prefix = query.strip_prefix("asset.name:");

        let results: Vec<Value> = self
            .assets
            .iter()
            .filter(|a| a.catalog_id == catalog_id)
            .filter(|a| match prefix {
                Some(prefix) => a.name.starts_with(prefix),
                None => query == "*:*",
            })
            .take(limit)
            .map(|a| json!({"metadata": {"name": a.name, "asset_id": a.id}}))
            .collect();
        ApiResponse::json_body(200, &json!({"total_rows": results.len(), "results": results}))
    }

    fn find_asset(&self, asset_id: &str, request: &ApiRequest) -> Option<&FakeAsset> {
        let catalog_id = request.query_param("catalog_id").unwrap_or("");
        self.assets
            .iter()
            .find(|a| a.id == asset_id && a.catalog_id == catalog_id)
    }

    fn asset_info(&self, asset_id: &str, request: &ApiRequest) -> ApiResponse {
        let Some(asset) = self.find_asset(asset_id, request) else {
            return not_found("asset");
        };
        let mut entity = json!({"data_asset": {"mime_type": "text/csv"}});
        if let Some(info) = self.attributes.get(asset_id) {
            entity["column_info"] = Value::Object(info.clone());
        }
        ApiResponse::json_body(
            200,
            &json!({
                "metadata": {
                    "asset_id": asset.id,
                    "name": asset.name,
                    "catalog_id": asset.catalog_id,
                },
                "entity": entity,
            }),
        )
    }

    fn create_attribute(&mut self, asset_id: &str, request: &ApiRequest) -> ApiResponse {
        if self.find_asset(asset_id, request).is_none() {
            return not_found("asset");
        }
        let body = request.body.clone().unwrap_or(Value::Null);
        if body["name"] != "column_info" {
            return ApiResponse::json_body(400, &json!({"message": "unsupported attribute"}));
        }
        if self.attributes.contains_key(asset_id) {
            return ApiResponse::json_body(409, &json!({"message": "attribute already exists"}));
        }
        let entity = body["entity"].as_object().cloned().unwrap_or_default();
        self.attributes.insert(asset_id.to_string(), entity.clone());
        ApiResponse::json_body(201, &json!({"column_info": entity}))
    }

    fn read_attribute(&self, asset_id: &str) -> ApiResponse {
        match self.attributes.get(asset_id) {
            Some(entity) => ApiResponse::json_body(200, &json!({"column_info": entity})),
            None => not_found("attribute"),
        }
    }

    fn patch_attribute(&mut self, asset_id: &str, request: &ApiRequest) -> ApiResponse {
        let Some(entity) = self.attributes.get_mut(asset_id) else {
            return not_found("attribute");
        };
        let Some(ops) = request.body.as_ref().and_then(Value::as_array) else {
            return ApiResponse::json_body(400, &json!({"message": "expected a JSON patch array"}));
        };
        for op in ops {
            let path = op["path"].as_str().unwrap_or("");
            if op["op"] != "add" || !path.starts_with('/') {
                return ApiResponse::json_body(400, &json!({"message": "unsupported patch op"}));
            }
            entity.insert(unescape_pointer(&path[1..]), op["value"].clone());
        }
        ApiResponse::json_body(200, &Value::Object(entity.clone()))
    }
}

pub fn test_config() -> ClientConfig {
    let mut config = ClientConfig::new(HOST);
    config.retry = RetryPolicy::default().with_total(3).immediate();
    config.update_retry = RetryPolicy::default().with_total(5).immediate();
    config
}

/// Logged-in client over `fake`, with zero-delay retries.
pub fn connect(fake: &Arc<FakeCatalogService>) -> WkcClient {
    let backend: Arc<dyn HttpBackend> = fake.clone();
    WkcClient::connect(
        test_config(),
        backend,
        &DirectTokenSource::new(USERNAME, PASSWORD),
    )
    .expect("login against the fake service")
}

pub const WORKLIST_HEADER: &str = "Catalog,DataAsset,ColumnHeader,BusinessTerm,Category,Done";

pub fn worklist_csv(rows: &[&str]) -> String {
    let mut text = String::from(WORKLIST_HEADER);
    text.push('\n');
    for row in rows {
        text.push_str(row);
        text.push('\n');
    }
    text
}
