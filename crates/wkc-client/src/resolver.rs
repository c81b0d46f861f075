//! Name → id resolution with an in-process memo.
//!
//! Every lookup follows the same shape: check the cache, otherwise query the
//! service, record the answer (hits and misses alike), and report a miss as
//! [`Unresolved`] plus a log line. Transport and server failures are errors and
//! are never cached. Entries live as long as the resolver; nothing is evicted.
//!
//! Cache layout:
//! - catalog name → catalog id
//! - category path → category id
//! - category path → {business term name → term id}
//! - (catalog name, asset name) → asset id

use crate::config::CallKind;
use crate::error::{Resolved, Unresolved, WkcResult};
use crate::transport::{Call, Session};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

pub const CATALOGS_PATH: &str = "/v2/catalogs";
pub const SEARCH_PATH: &str = "/v3/search";
pub const ASSET_SEARCH_PATH: &str = "/v2/asset_types/asset/search";

pub const CATEGORY_SEPARATOR: &str = ">>";

const GLOSSARY_TERM: &str = "glossary_term";

/// A `>>`-delimited category hierarchy, whitespace-trimmed per segment.
///
/// Only the last two segments matter for matching: the leaf is the category's
/// own name, the one before it the required parent. A single segment is a
/// root category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryPath {
    segments: Vec<String>,
}

impl CategoryPath {
    pub fn parse(path: &str) -> Self {
        let segments = path
            .split(CATEGORY_SEPARATOR)
            .map(|segment| segment.trim().to_string())
            .collect();
        Self { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn leaf(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or("")
    }

    pub fn parent(&self) -> Option<&str> {
        if self.segments.len() < 2 {
            return None;
        }
        self.segments
            .get(self.segments.len() - 2)
            .map(String::as_str)
    }

    pub fn is_root(&self) -> bool {
        self.segments.len() == 1
    }

    /// Does a search hit named `name` with recorded parent `parent` denote this path?
    pub fn matches(&self, name: &str, parent: Option<&str>) -> bool {
        if name != self.leaf() {
            return false;
        }
        match self.parent() {
            None => true,
            Some(expected) => parent == Some(expected),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetTarget {
    pub asset_id: String,
    pub catalog_id: String,
}

impl AssetTarget {
    pub fn new(asset_id: impl Into<String>, catalog_id: impl Into<String>) -> Self {
        Self {
            asset_id: asset_id.into(),
            catalog_id: catalog_id.into(),
        }
    }
}

// ============================================================================
// Wire shapes (only the fields the resolver reads)
// ============================================================================

#[derive(Deserialize)]
struct CatalogList {
    #[serde(default)]
    catalogs: Vec<CatalogEntry>,
}

#[derive(Deserialize)]
struct CatalogEntry {
    entity: CatalogEntity,
    metadata: CatalogMetadata,
}

#[derive(Deserialize)]
struct CatalogEntity {
    name: String,
}

#[derive(Deserialize)]
struct CatalogMetadata {
    guid: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    rows: Vec<SearchRow>,
}

#[derive(Deserialize)]
struct SearchRow {
    #[serde(default)]
    artifact_id: String,
    #[serde(default)]
    metadata: RowMetadata,
    #[serde(default)]
    categories: Option<RowCategories>,
}

#[derive(Deserialize, Default)]
struct RowMetadata {
    #[serde(default)]
    name: String,
    #[serde(default)]
    artifact_type: String,
}

#[derive(Deserialize)]
struct RowCategories {
    #[serde(default)]
    primary_category_name: Option<String>,
}

#[derive(Deserialize)]
struct AssetSearchResponse {
    #[serde(default)]
    results: Vec<AssetHit>,
}

#[derive(Deserialize)]
struct AssetHit {
    metadata: AssetHitMetadata,
}

#[derive(Deserialize)]
struct AssetHitMetadata {
    name: String,
    asset_id: String,
}

/// Business term name → term id for one category.
pub type TermMap = Arc<BTreeMap<String, String>>;

#[derive(Default)]
struct ResolutionCache {
    catalogs: HashMap<String, Option<String>>,
    categories: HashMap<String, Option<String>>,
    terms: HashMap<String, TermMap>,
    assets: HashMap<(String, String), Option<String>>,
}

pub struct Resolver {
    session: Arc<Session>,
    cache: Mutex<ResolutionCache>,
}

impl Resolver {
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            cache: Mutex::new(ResolutionCache::default()),
        }
    }

    /// Catalog id by exact name, from the full catalog listing.
    pub fn catalog_id(&self, catalog_name: &str) -> WkcResult<Resolved<String>> {
        let cached = self.cache.lock().catalogs.get(catalog_name).cloned();
        let found = match cached {
            Some(found) => found,
            None => {
                info!("getting catalog id of {catalog_name}..");
                let response = self
                    .session
                    .send(Call::get(CATALOGS_PATH))?
                    .ensure_success("list catalogs")?;
                let list: CatalogList = response.json("list catalogs")?;
                let found = list
                    .catalogs
                    .into_iter()
                    .find(|c| c.entity.name == catalog_name)
                    .map(|c| c.metadata.guid);
                self.cache
                    .lock()
                    .catalogs
                    .insert(catalog_name.to_string(), found.clone());
                found
            }
        };
        Ok(found.ok_or_else(|| {
            let missing = Unresolved::Catalog {
                name: catalog_name.to_string(),
            };
            warn!("{missing}");
            missing
        }))
    }

    /// Category id for a `>>` path; the first hit whose leaf name and parent
    /// name both match wins.
    pub fn category_id(&self, category_path: &str) -> WkcResult<Resolved<String>> {
        let cached = self.cache.lock().categories.get(category_path).cloned();
        let found = match cached {
            Some(found) => found,
            None => {
                let found = self.search_category(category_path)?;
                self.cache
                    .lock()
                    .categories
                    .insert(category_path.to_string(), found.clone());
                found
            }
        };
        Ok(found.ok_or_else(|| {
            let missing = Unresolved::Category {
                path: category_path.to_string(),
            };
            warn!("{missing}");
            missing
        }))
    }

    fn search_category(&self, category_path: &str) -> WkcResult<Option<String>> {
        let path = CategoryPath::parse(category_path);
        if path.leaf().is_empty() {
            return Ok(None);
        }
        info!("searching category id of {category_path}..");
        let payload = json!({
            "_source": ["artifact_id", "metadata.name", "categories"],
            "query": {
                "bool": {
                    "must": [
                        {"match": {"metadata.name": category_path}},
                        {"match": {"metadata.artifact_type": "category"}}
                    ]
                }
            }
        });
        let response = self
            .session
            .send(
                Call::post(SEARCH_PATH)
                    .json(payload)
                    .kind(CallKind::Search)
                    .no_cache(),
            )?
            .ensure_success("search category")?;
        let parsed: SearchResponse = response.json("search category")?;

        Ok(parsed
            .rows
            .into_iter()
            .find(|row| {
                let parent = row
                    .categories
                    .as_ref()
                    .and_then(|c| c.primary_category_name.as_deref());
                path.matches(&row.metadata.name, parent)
            })
            .map(|row| row.artifact_id))
    }

    /// Every business term whose primary category is `category_path`, as
    /// name → id. Fetched with one search (first page only) and cached whole.
    /// Rules, data classes and other artifacts filed under the same category
    /// are left out.
    pub fn term_map(&self, category_path: &str) -> WkcResult<Resolved<TermMap>> {
        if let Some(map) = self.cache.lock().terms.get(category_path) {
            return Ok(Ok(Arc::clone(map)));
        }

        let category_id = match self.category_id(category_path)? {
            Ok(id) => id,
            Err(missing) => return Ok(Err(missing)),
        };

        info!("searching business terms in {category_path}..");
        let payload = json!({
            "size": self.session.config().term_page_size,
            "from": 0,
            "_source": [
                "artifact_id",
                "metadata.artifact_type",
                "metadata.name",
                "metadata.description",
                "categories",
                "entity.artifacts"
            ],
            "query": {
                "bool": {
                    "filter": {
                        "bool": {
                            "should": [
                                {"term": {"categories.primary_category_id": category_id}}
                            ],
                            "must_not": {
                                "terms": {"metadata.artifact_type": ["category"]}
                            }
                        }
                    }
                }
            }
        });
        let response = self
            .session
            .send(
                Call::post(SEARCH_PATH)
                    .json(payload)
                    .kind(CallKind::Search)
                    .no_cache(),
            )?
            .ensure_success("search business terms")?;
        let parsed: SearchResponse = response.json("search business terms")?;

        let map: TermMap = Arc::new(
            parsed
                .rows
                .into_iter()
                .filter(|row| row.metadata.artifact_type == GLOSSARY_TERM)
                .map(|row| (row.metadata.name, row.artifact_id))
                .collect(),
        );
        self.cache
            .lock()
            .terms
            .insert(category_path.to_string(), Arc::clone(&map));
        Ok(Ok(map))
    }

    /// Business term id within a category. A missing term leaves the
    /// category's map cached, so asking again costs no remote call.
    pub fn term_id(&self, term: &str, category_path: &str) -> WkcResult<Resolved<String>> {
        let map = match self.term_map(category_path)? {
            Ok(map) => map,
            Err(missing) => return Ok(Err(missing)),
        };
        Ok(map.get(term).cloned().ok_or_else(|| {
            let missing = Unresolved::BusinessTerm {
                term: term.to_string(),
                category: category_path.to_string(),
            };
            warn!("{missing}");
            missing
        }))
    }

    /// Asset id by exact name within a catalog. An unknown catalog
    /// short-circuits without searching.
    pub fn asset_id(&self, asset_name: &str, catalog_name: &str) -> WkcResult<Resolved<String>> {
        let catalog_id = match self.catalog_id(catalog_name)? {
            Ok(id) => id,
            Err(missing) => return Ok(Err(missing)),
        };

        let key = (catalog_name.to_string(), asset_name.to_string());
        let cached = self.cache.lock().assets.get(&key).cloned();
        let found = match cached {
            Some(found) => found,
            None => {
                info!("searching asset id of {asset_name} in {catalog_name}..");
                let response = self
                    .session
                    .send(
                        Call::post(ASSET_SEARCH_PATH)
                            .query("catalog_id", catalog_id)
                            .json(json!({ "query": format!("asset.name:{asset_name}") }))
                            .kind(CallKind::Search),
                    )?
                    .ensure_success("search assets")?;
                let parsed: AssetSearchResponse = response.json("search assets")?;
                let found = parsed
                    .results
                    .into_iter()
                    .find(|hit| hit.metadata.name == asset_name)
                    .map(|hit| hit.metadata.asset_id);
                self.cache.lock().assets.insert(key, found.clone());
                found
            }
        };
        Ok(found.ok_or_else(|| {
            let missing = Unresolved::Asset {
                asset: asset_name.to_string(),
                catalog: catalog_name.to_string(),
            };
            warn!("{missing}");
            missing
        }))
    }

    /// Both ids an attribute call needs.
    pub fn resolve_target(
        &self,
        asset_name: &str,
        catalog_name: &str,
    ) -> WkcResult<Resolved<AssetTarget>> {
        let catalog_id = match self.catalog_id(catalog_name)? {
            Ok(id) => id,
            Err(missing) => return Ok(Err(missing)),
        };
        Ok(self
            .asset_id(asset_name, catalog_name)?
            .map(|asset_id| AssetTarget::new(asset_id, catalog_id)))
    }

    /// (name, id) of every asset in a catalog, up to the configured limit.
    pub fn list_assets(&self, catalog_name: &str) -> WkcResult<Resolved<Vec<(String, String)>>> {
        let catalog_id = match self.catalog_id(catalog_name)? {
            Ok(id) => id,
            Err(missing) => return Ok(Err(missing)),
        };
        info!("listing assets in {catalog_name}..");
        let response = self
            .session
            .send(
                Call::post(ASSET_SEARCH_PATH)
                    .query("catalog_id", catalog_id)
                    .json(json!({
                        "query": "*:*",
                        "limit": self.session.config().asset_list_limit,
                    }))
                    .kind(CallKind::Search),
            )?
            .ensure_success("list assets")?;
        let parsed: AssetSearchResponse = response.json("list assets")?;
        Ok(Ok(parsed
            .results
            .into_iter()
            .map(|hit| (hit.metadata.name, hit.metadata.asset_id))
            .collect()))
    }
}
