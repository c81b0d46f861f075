//! The `column_info` asset attribute: column name → attached business terms.
//!
//! The attribute lives only on the server. Nothing here caches its contents;
//! every read goes back to the service.

use crate::config::CallKind;
use crate::error::WkcResult;
use crate::resolver::AssetTarget;
use crate::transport::{Call, Session};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

pub const COLUMN_INFO: &str = "column_info";

/// Status returned when creating an attribute the asset already carries.
const ALREADY_EXISTS: u16 = 409;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermRef {
    pub term_display_name: String,
    pub term_id: String,
}

impl TermRef {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            term_display_name: name.into(),
            term_id: id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnTerms {
    pub column_terms: Vec<TermRef>,
}

impl ColumnTerms {
    pub fn single(term: TermRef) -> Self {
        Self {
            column_terms: vec![term],
        }
    }
}

/// One JSON-patch operation on `column_info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOp {
    pub op: String,
    pub path: String,
    pub value: ColumnTerms,
}

impl PatchOp {
    /// `add` replaces the column's whole term list with `[term]`.
    pub fn add_column(column: &str, term: TermRef) -> Self {
        Self {
            op: "add".to_string(),
            path: column_pointer(column),
            value: ColumnTerms::single(term),
        }
    }
}

/// JSON pointer for a column name (RFC 6901 escaping of `~` and `/`).
pub fn column_pointer(column: &str) -> String {
    let escaped = column.trim().replace('~', "~0").replace('/', "~1");
    format!("/{escaped}")
}

/// A complete `column_info` value built client-side (bulk mapping).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub columns: BTreeMap<String, ColumnTerms>,
}

impl ColumnInfo {
    /// Last assignment for a column wins.
    pub fn assign(&mut self, column: &str, term: TermRef) {
        self.columns
            .insert(column.trim().to_string(), ColumnTerms::single(term));
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn to_patch_ops(&self) -> Vec<PatchOp> {
        self.columns
            .iter()
            .map(|(column, terms)| PatchOp {
                op: "add".to_string(),
                path: column_pointer(column),
                value: terms.clone(),
            })
            .collect()
    }

    fn entity(&self) -> WkcResult<Value> {
        Ok(serde_json::to_value(&self.columns)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// The attribute already exists on the asset.
    Rejected { status: u16 },
}

pub struct AttributeManager {
    session: Arc<Session>,
}

impl AttributeManager {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    fn attributes_path(target: &AssetTarget) -> String {
        format!("/v2/assets/{}/attributes", target.asset_id)
    }

    fn column_info_path(target: &AssetTarget) -> String {
        format!("/v2/assets/{}/attributes/{COLUMN_INFO}", target.asset_id)
    }

    /// Create an empty `column_info`. Safe to repeat: a conflict with an
    /// existing attribute is logged and reported, not raised. Any other
    /// refusal is an error.
    pub fn create(&self, target: &AssetTarget) -> WkcResult<CreateOutcome> {
        self.create_with(target, &ColumnInfo::default())
    }

    /// Create `column_info` pre-populated with `info`.
    pub fn create_with(&self, target: &AssetTarget, info: &ColumnInfo) -> WkcResult<CreateOutcome> {
        info!(
            asset_id = %target.asset_id,
            columns = info.len(),
            "creating {COLUMN_INFO} attribute.."
        );
        let payload = json!({
            "name": COLUMN_INFO,
            "entity": info.entity()?,
        });
        let response = self.session.send(
            Call::post(Self::attributes_path(target))
                .query("catalog_id", target.catalog_id.as_str())
                .json(payload),
        )?;
        if response.status == ALREADY_EXISTS {
            warn!(
                asset_id = %target.asset_id,
                status = response.status,
                "{COLUMN_INFO} not created, already present: {}",
                response.body
            );
            return Ok(CreateOutcome::Rejected {
                status: response.status,
            });
        }
        response.ensure_success("create column_info")?;
        Ok(CreateOutcome::Created)
    }

    pub fn read(&self, target: &AssetTarget) -> WkcResult<Value> {
        info!(asset_id = %target.asset_id, "getting {COLUMN_INFO} attribute..");
        self.session
            .send(
                Call::get(Self::column_info_path(target))
                    .query("catalog_id", target.catalog_id.as_str()),
            )?
            .ensure_success("read column_info")?
            .value("read column_info")
    }

    /// The whole asset document, for display.
    pub fn read_asset(&self, target: &AssetTarget) -> WkcResult<Value> {
        info!(asset_id = %target.asset_id, "getting asset info..");
        self.session
            .send(
                Call::get(format!("/v2/assets/{}", target.asset_id))
                    .query("catalog_id", target.catalog_id.as_str()),
            )?
            .ensure_success("read asset")?
            .value("read asset")
    }

    /// Set `column`'s term list to exactly `[term]`.
    pub fn update(&self, target: &AssetTarget, column: &str, term: TermRef) -> WkcResult<()> {
        info!(
            asset_id = %target.asset_id,
            column = column.trim(),
            term = %term.term_display_name,
            "updating {COLUMN_INFO} attribute.."
        );
        self.patch(target, &[PatchOp::add_column(column, term)])
    }

    pub fn patch(&self, target: &AssetTarget, ops: &[PatchOp]) -> WkcResult<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let payload = serde_json::to_value(ops)?;
        self.session
            .send(
                Call::patch(Self::column_info_path(target))
                    .query("catalog_id", target.catalog_id.as_str())
                    .json(payload)
                    .kind(CallKind::Update),
            )?
            .ensure_success("patch column_info")?;
        Ok(())
    }

    pub fn delete(&self, target: &AssetTarget) -> WkcResult<()> {
        info!(asset_id = %target.asset_id, "deleting {COLUMN_INFO} attribute..");
        self.session
            .send(
                Call::delete(Self::column_info_path(target))
                    .query("catalog_id", target.catalog_id.as_str()),
            )?
            .ensure_success("delete column_info")?;
        Ok(())
    }
}
