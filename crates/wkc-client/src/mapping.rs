//! Batch mapping driver: applies a [`Worklist`] of column → business-term
//! assignments to the catalog.
//!
//! Two strategies:
//! - [`Strategy::RowByRow`]: per data asset, sweep the pending rows up to
//!   `max_sweeps` times, issuing create → read → patch for each row.
//! - [`Strategy::Bulk`]: per (catalog, data asset), build the whole
//!   `column_info` client-side and send it in one create call, falling back to
//!   a single JSON-patch array when the attribute already exists.
//!
//! A row is marked `Done` only after its patch/create succeeded. Unresolved
//! names and non-fatal server rejections leave the row pending and are
//! recorded in the [`MappingReport`]. Transport errors and cancellation stop
//! the run; [`MappingDriver::run_file`] persists the worklist before
//! surfacing them.

use crate::attributes::{ColumnInfo, CreateOutcome, TermRef};
use crate::client::WkcClient;
use crate::error::{Resolved, WkcError, WkcResult};
use crate::resolver::{AssetTarget, CategoryPath};
use crate::worklist::{MappingRow, Worklist};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    #[default]
    RowByRow,
    Bulk,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingOptions {
    pub strategy: Strategy,
    /// Upper bound on passes over one asset's pending rows (row-by-row only).
    pub max_sweeps: u32,
    /// Resolve terms under the category's leaf segment instead of the full path.
    pub leaf_category_only: bool,
}

impl Default for MappingOptions {
    fn default() -> Self {
        Self {
            strategy: Strategy::RowByRow,
            max_sweeps: 5,
            leaf_category_only: true,
        }
    }
}

impl MappingOptions {
    /// The category path terms are looked up under.
    pub fn category_key(&self, category: &str) -> String {
        if self.leaf_category_only {
            CategoryPath::parse(category).leaf().to_string()
        } else {
            category.trim().to_string()
        }
    }
}

/// Cooperative cancellation, checked before every row (or asset, in bulk).
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// The underlying flag, for signal handlers.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRow {
    pub index: usize,
    pub data_asset: String,
    pub column_header: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssetSummary {
    pub catalog: Option<String>,
    pub data_asset: String,
    pub sweeps: u32,
    pub mapped: usize,
    pub pending: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MappingReport {
    pub strategy: Strategy,
    pub total_rows: usize,
    /// Rows already `Done` when the run started.
    pub already_done: usize,
    pub mapped: usize,
    pub pending: Vec<PendingRow>,
    pub assets: Vec<AssetSummary>,
    pub elapsed: Duration,
}

impl MappingReport {
    fn new(strategy: Strategy, worklist: &Worklist) -> Self {
        Self {
            strategy,
            total_rows: worklist.len(),
            already_done: worklist.len() - worklist.pending_count(),
            mapped: 0,
            pending: Vec::new(),
            assets: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    /// Rows this run had to look at.
    pub fn attempted(&self) -> usize {
        self.total_rows - self.already_done
    }

    pub fn seconds_per_row(&self) -> Option<f64> {
        match self.attempted() {
            0 => None,
            n => Some(self.elapsed.as_secs_f64() / n as f64),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }

    fn record_pending(&mut self, reasons: BTreeMap<usize, String>, worklist: &Worklist) {
        for (index, reason) in reasons {
            let row = worklist.row(index);
            if row.is_done() {
                continue;
            }
            self.pending.push(PendingRow {
                index,
                data_asset: row.data_asset.clone(),
                column_header: row.column_header.clone(),
                reason,
            });
        }
    }
}

pub struct MappingDriver<'a> {
    client: &'a WkcClient,
    options: MappingOptions,
    cancel: CancelToken,
}

impl<'a> MappingDriver<'a> {
    pub fn new(client: &'a WkcClient, options: MappingOptions) -> Self {
        Self {
            client,
            options,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn options(&self) -> &MappingOptions {
        &self.options
    }

    /// Load `path`, run, and write the `Done` flags back whatever the outcome.
    pub fn run_file(&self, path: impl AsRef<Path>) -> WkcResult<MappingReport> {
        let path = path.as_ref();
        let mut worklist = Worklist::load(path)?;
        info!(
            rows = worklist.len(),
            pending = worklist.pending_count(),
            "loaded worklist {}",
            path.display()
        );

        let result = self.run(&mut worklist);
        match worklist.save(path) {
            Ok(()) => info!("saved worklist {}", path.display()),
            Err(save_err) => {
                error!("failed to save worklist {}: {save_err}", path.display());
                if result.is_ok() {
                    return Err(save_err);
                }
            }
        }
        result
    }

    /// Apply every pending row of `worklist`, flipping `Done` in place.
    pub fn run(&self, worklist: &mut Worklist) -> WkcResult<MappingReport> {
        let started = Instant::now();
        let mut report = MappingReport::new(self.options.strategy, worklist);
        match self.options.strategy {
            Strategy::RowByRow => self.run_row_by_row(worklist, &mut report)?,
            Strategy::Bulk => self.run_bulk(worklist, &mut report)?,
        }
        report.elapsed = started.elapsed();

        info!(
            mapped = report.mapped,
            pending = report.pending.len(),
            "mapping finished in {:.2}s",
            report.elapsed.as_secs_f64()
        );
        Ok(report)
    }

    fn check_cancel(&self) -> WkcResult<()> {
        if self.cancel.is_cancelled() {
            warn!("cancellation requested, stopping at row boundary");
            return Err(WkcError::Cancelled);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Row by row
    // ------------------------------------------------------------------

    fn run_row_by_row(&self, worklist: &mut Worklist, report: &mut MappingReport) -> WkcResult<()> {
        for (asset, indices) in worklist.groups_by_asset() {
            let started = Instant::now();
            let mut sweeps = 0;
            let mut mapped = 0;
            let mut reasons: BTreeMap<usize, String> = BTreeMap::new();

            while sweeps < self.options.max_sweeps {
                let pending: Vec<usize> = indices
                    .iter()
                    .copied()
                    .filter(|&i| !worklist.row(i).is_done())
                    .collect();
                if pending.is_empty() {
                    break;
                }
                sweeps += 1;
                info!(sweep = sweeps, rows = pending.len(), "mapping columns of {asset}..");

                for index in pending {
                    self.check_cancel()?;
                    match self.map_row(worklist.row(index)) {
                        Ok(Ok(())) => {
                            worklist.mark_done(index);
                            reasons.remove(&index);
                            mapped += 1;
                        }
                        Ok(Err(missing)) => {
                            reasons.insert(index, missing.to_string());
                        }
                        Err(e) if e.is_fatal() => {
                            error!("row {index} of {asset} failed: {e}");
                            return Err(e);
                        }
                        Err(e) => {
                            error!("row {index} of {asset} failed: {e}");
                            reasons.insert(index, e.to_string());
                        }
                    }
                }
            }

            let left = indices.iter().filter(|&&i| !worklist.row(i).is_done()).count();
            let elapsed = started.elapsed();
            if sweeps > 0 {
                info!(
                    mapped,
                    pending = left,
                    "{asset}: done in {:.2}s",
                    elapsed.as_secs_f64()
                );
            }
            report.mapped += mapped;
            report.record_pending(reasons, worklist);
            report.assets.push(AssetSummary {
                catalog: None,
                data_asset: asset,
                sweeps,
                mapped,
                pending: left,
                elapsed,
            });
        }
        Ok(())
    }

    fn map_row(&self, row: &MappingRow) -> WkcResult<Resolved<()>> {
        let resolver = self.client.resolver();
        let attributes = self.client.attributes();

        let catalog_id = match resolver.catalog_id(&row.catalog)? {
            Ok(id) => id,
            Err(missing) => return Ok(Err(missing)),
        };
        let category = self.options.category_key(&row.category);
        let term_id = match resolver.term_id(&row.business_term, &category)? {
            Ok(id) => id,
            Err(missing) => return Ok(Err(missing)),
        };
        let asset_id = match resolver.asset_id(&row.data_asset, &row.catalog)? {
            Ok(id) => id,
            Err(missing) => return Ok(Err(missing)),
        };

        let target = AssetTarget::new(asset_id, catalog_id);
        attributes.create(&target)?;
        let current = attributes.read(&target)?;
        debug!(asset_id = %target.asset_id, "current column_info: {current}");
        attributes.update(
            &target,
            &row.column_header,
            TermRef::new(row.business_term.as_str(), term_id),
        )?;
        Ok(Ok(()))
    }

    // ------------------------------------------------------------------
    // Bulk
    // ------------------------------------------------------------------

    fn run_bulk(&self, worklist: &mut Worklist, report: &mut MappingReport) -> WkcResult<()> {
        for ((catalog, asset), indices) in worklist.groups_by_catalog_asset() {
            let pending: Vec<usize> = indices
                .iter()
                .copied()
                .filter(|&i| !worklist.row(i).is_done())
                .collect();
            if pending.is_empty() {
                continue;
            }
            self.check_cancel()?;

            let started = Instant::now();
            info!(rows = pending.len(), "bulk mapping columns of {asset} in {catalog}..");
            let mut reasons: BTreeMap<usize, String> = BTreeMap::new();
            let mut mapped = 0;

            match self.map_asset_bulk(worklist, &catalog, &asset, &pending, &mut reasons) {
                Ok(done) => {
                    for index in done {
                        worklist.mark_done(index);
                        mapped += 1;
                    }
                }
                Err(e) if e.is_fatal() => {
                    error!("bulk mapping of {asset} failed: {e}");
                    return Err(e);
                }
                Err(e) => {
                    error!("bulk mapping of {asset} failed: {e}");
                    for &index in &pending {
                        reasons.entry(index).or_insert_with(|| e.to_string());
                    }
                }
            }

            let elapsed = started.elapsed();
            info!(mapped, "{asset}: done in {:.2}s", elapsed.as_secs_f64());
            report.mapped += mapped;
            report.record_pending(reasons, worklist);
            report.assets.push(AssetSummary {
                catalog: Some(catalog),
                data_asset: asset,
                sweeps: 1,
                mapped,
                pending: pending.len() - mapped,
                elapsed,
            });
        }
        Ok(())
    }

    /// Returns the rows that made it into the attribute. Rows that did not
    /// resolve get a reason in `reasons`.
    fn map_asset_bulk(
        &self,
        worklist: &Worklist,
        catalog: &str,
        asset: &str,
        pending: &[usize],
        reasons: &mut BTreeMap<usize, String>,
    ) -> WkcResult<Vec<usize>> {
        let resolver = self.client.resolver();
        let attributes = self.client.attributes();

        let target = match resolver.resolve_target(asset, catalog)? {
            Ok(target) => target,
            Err(missing) => {
                for &index in pending {
                    reasons.insert(index, missing.to_string());
                }
                return Ok(Vec::new());
            }
        };

        let mut info = ColumnInfo::default();
        let mut included = Vec::new();
        for &index in pending {
            let row = worklist.row(index);
            let category = self.options.category_key(&row.category);
            match resolver.term_id(&row.business_term, &category)? {
                Ok(term_id) => {
                    info.assign(
                        &row.column_header,
                        TermRef::new(row.business_term.as_str(), term_id),
                    );
                    included.push(index);
                }
                Err(missing) => {
                    reasons.insert(index, missing.to_string());
                }
            }
        }
        if info.is_empty() {
            return Ok(Vec::new());
        }

        match attributes.create_with(&target, &info)? {
            CreateOutcome::Created => {}
            CreateOutcome::Rejected { status } => {
                info!(status, "column_info exists on {asset}, patching {} columns", info.len());
                attributes.patch(&target, &info.to_patch_ops())?;
            }
        }
        Ok(included)
    }
}
