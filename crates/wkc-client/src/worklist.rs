//! CSV mapping worklist.
//!
//! Columns: `Catalog, DataAsset, ColumnHeader, BusinessTerm, Category, Done`.
//! `Done` is the only state of a batch job; it only ever moves from `N` to `Y`.
//! Any other columns in the file are carried through a save untouched.

use crate::error::{WkcError, WkcResult};
use csv::StringRecord;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

pub const DONE_COLUMN: &str = "Done";

const HEADER: [&str; 6] = [
    "Catalog",
    "DataAsset",
    "ColumnHeader",
    "BusinessTerm",
    "Category",
    DONE_COLUMN,
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DoneFlag {
    #[default]
    No,
    Yes,
}

impl DoneFlag {
    pub fn as_str(self) -> &'static str {
        match self {
            DoneFlag::Yes => "Y",
            DoneFlag::No => "N",
        }
    }
}

impl Serialize for DoneFlag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DoneFlag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.trim().to_ascii_uppercase().as_str() {
            "Y" | "YES" | "TRUE" => Ok(DoneFlag::Yes),
            "" | "N" | "NO" | "FALSE" => Ok(DoneFlag::No),
            other => Err(serde::de::Error::custom(format!(
                "Done must be Y or N, got {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRow {
    #[serde(rename = "Catalog")]
    pub catalog: String,
    #[serde(rename = "DataAsset")]
    pub data_asset: String,
    #[serde(rename = "ColumnHeader")]
    pub column_header: String,
    #[serde(rename = "BusinessTerm")]
    pub business_term: String,
    #[serde(rename = "Category")]
    pub category: String,
    #[serde(rename = "Done", default)]
    pub done: DoneFlag,
}

impl MappingRow {
    pub fn is_done(&self) -> bool {
        self.done == DoneFlag::Yes
    }

    fn to_record(&self) -> StringRecord {
        StringRecord::from(vec![
            self.catalog.as_str(),
            self.data_asset.as_str(),
            self.column_header.as_str(),
            self.business_term.as_str(),
            self.category.as_str(),
            self.done.as_str(),
        ])
    }
}

/// Parsed rows plus the raw records they came from. Saving writes the raw
/// records back, so only the `Done` cell of a row ever changes.
#[derive(Debug, Clone)]
pub struct Worklist {
    rows: Vec<MappingRow>,
    headers: StringRecord,
    records: Vec<StringRecord>,
    done_col: usize,
    source: Option<PathBuf>,
}

impl Default for Worklist {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl Worklist {
    pub fn new(rows: Vec<MappingRow>) -> Self {
        let records = rows.iter().map(MappingRow::to_record).collect();
        Self {
            rows,
            headers: StringRecord::from(HEADER.to_vec()),
            records,
            done_col: HEADER.len() - 1,
            source: None,
        }
    }

    pub fn load(path: impl AsRef<Path>) -> WkcResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            WkcError::Worklist(format!("failed to open {}: {e}", path.display()))
        })?;
        let mut worklist = Self::from_reader(file)?;
        worklist.source = Some(path.to_path_buf());
        Ok(worklist)
    }

    pub fn from_reader<R: Read>(reader: R) -> WkcResult<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut headers = rdr.headers()?.clone();
        if headers.is_empty() {
            return Ok(Self::default());
        }
        let missing_done = !headers.iter().any(|h| h == DONE_COLUMN);
        if missing_done {
            headers.push_field(DONE_COLUMN);
        }
        let done_col = headers
            .iter()
            .position(|h| h == DONE_COLUMN)
            .unwrap_or(headers.len() - 1);

        let mut rows = Vec::new();
        let mut records = Vec::new();
        for (idx, record) in rdr.records().enumerate() {
            let mut record =
                record.map_err(|e| WkcError::Worklist(format!("row {}: {e}", idx + 1)))?;
            if missing_done {
                record.push_field(DoneFlag::No.as_str());
            }
            let row: MappingRow = record
                .deserialize(Some(&headers))
                .map_err(|e| WkcError::Worklist(format!("row {}: {e}", idx + 1)))?;
            rows.push(row);
            records.push(record);
        }
        Ok(Self {
            rows,
            headers,
            records,
            done_col,
            source: None,
        })
    }

    /// The header line is written even when there are no rows.
    pub fn write_to<W: Write>(&self, writer: W) -> WkcResult<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(&self.headers)?;
        for record in &self.records {
            wtr.write_record(record)?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// Write to a sibling temp file, then rename it over `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> WkcResult<()> {
        let path = path.as_ref();
        let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        tmp_name.push(".tmp");
        let tmp = path.with_file_name(tmp_name);
        {
            let file = File::create(&tmp)?;
            self.write_to(file)?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Back to the file this worklist was loaded from.
    pub fn save_to_source(&self) -> WkcResult<()> {
        match &self.source {
            Some(path) => self.save(path),
            None => Err(WkcError::Worklist(
                "worklist was not loaded from a file".to_string(),
            )),
        }
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn rows(&self) -> &[MappingRow] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> &MappingRow {
        &self.rows[index]
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn mark_done(&mut self, index: usize) {
        let done_col = self.done_col;
        let Some(record) = self.records.get_mut(index) else {
            return;
        };
        *record = record
            .iter()
            .enumerate()
            .map(|(col, field)| {
                if col == done_col {
                    DoneFlag::Yes.as_str()
                } else {
                    field
                }
            })
            .collect();
        if let Some(row) = self.rows.get_mut(index) {
            row.done = DoneFlag::Yes;
        }
    }

    /// Column names in file order.
    pub fn headers(&self) -> &StringRecord {
        &self.headers
    }

    pub fn pending_count(&self) -> usize {
        self.rows.iter().filter(|r| !r.is_done()).count()
    }

    /// Row indices per data asset, ordered by asset name.
    pub fn groups_by_asset(&self) -> BTreeMap<String, Vec<usize>> {
        let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (idx, row) in self.rows.iter().enumerate() {
            groups.entry(row.data_asset.clone()).or_default().push(idx);
        }
        groups
    }

    /// Row indices per (catalog, data asset).
    pub fn groups_by_catalog_asset(&self) -> BTreeMap<(String, String), Vec<usize>> {
        let mut groups: BTreeMap<(String, String), Vec<usize>> = BTreeMap::new();
        for (idx, row) in self.rows.iter().enumerate() {
            groups
                .entry((row.catalog.clone(), row.data_asset.clone()))
                .or_default()
                .push(idx);
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Catalog,DataAsset,ColumnHeader,BusinessTerm,Category,Done
CAT1,orders.csv,cust_id,Customer Identifier,Sales>>Customer,N
CAT1, customers.csv ,name,Customer Name,Sales>>Customer,Y
CAT2,orders.csv,amount,Order Amount,Sales,n
";

    #[test]
    fn parses_rows_and_done_flags() {
        let worklist = Worklist::from_reader(SAMPLE.as_bytes()).unwrap();
        assert_eq!(worklist.len(), 3);
        assert_eq!(worklist.row(1).data_asset, "customers.csv");
        assert!(worklist.row(1).is_done());
        assert!(!worklist.row(2).is_done());
        assert_eq!(worklist.pending_count(), 2);
    }

    #[test]
    fn missing_done_column_defaults_to_pending() {
        let csv = "Catalog,DataAsset,ColumnHeader,BusinessTerm,Category\nC,A,col,T,Cat\n";
        let worklist = Worklist::from_reader(csv.as_bytes()).unwrap();
        assert!(!worklist.row(0).is_done());
    }

    #[test]
    fn bad_done_value_is_rejected() {
        let csv = "Catalog,DataAsset,ColumnHeader,BusinessTerm,Category,Done\n\
                   C,A,col,T,Cat,maybe\n";
        let err = Worklist::from_reader(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, WkcError::Worklist(_)));
    }

    #[test]
    fn groups_are_sorted_by_asset() {
        let worklist = Worklist::from_reader(SAMPLE.as_bytes()).unwrap();
        let groups = worklist.groups_by_asset();
        let names: Vec<&String> = groups.keys().collect();
        assert_eq!(names, ["customers.csv", "orders.csv"]);
        assert_eq!(groups["orders.csv"], vec![0, 2]);

        let by_catalog = worklist.groups_by_catalog_asset();
        assert_eq!(by_catalog.len(), 3);
    }

    #[test]
    fn save_writes_done_flags_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.csv");
        fs::write(&path, SAMPLE).unwrap();

        let mut worklist = Worklist::load(&path).unwrap();
        worklist.mark_done(0);
        worklist.save_to_source().unwrap();

        let reloaded = Worklist::load(&path).unwrap();
        assert!(reloaded.row(0).is_done());
        assert!(reloaded.row(1).is_done());
        assert!(!reloaded.row(2).is_done());
        assert!(!dir.path().join("map.csv.tmp").exists());

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Catalog,DataAsset,ColumnHeader,BusinessTerm,Category,Done"));
    }

    #[test]
    fn missing_done_column_is_added_on_save() {
        let csv = "Catalog,DataAsset,ColumnHeader,BusinessTerm,Category\nC,A,col,T,Cat\n";
        let mut worklist = Worklist::from_reader(csv.as_bytes()).unwrap();
        worklist.mark_done(0);

        let mut out = Vec::new();
        worklist.write_to(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Catalog,DataAsset,ColumnHeader,BusinessTerm,Category,Done\nC,A,col,T,Cat,Y\n"
        );
    }

    #[test]
    fn extra_columns_survive_a_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.csv");
        fs::write(
            &path,
            "Owner,Catalog,DataAsset,ColumnHeader,BusinessTerm,Done,Category,Notes\n\
             alice,CAT1,orders.csv,cust_id,Customer Identifier,N,Sales>>Customer,check pk\n\
             bob,CAT1,orders.csv,cust_name,Customer Name,N,Sales>>Customer,\n",
        )
        .unwrap();

        let mut worklist = Worklist::load(&path).unwrap();
        assert_eq!(worklist.headers().len(), 8);
        assert_eq!(worklist.row(0).category, "Sales>>Customer");
        worklist.mark_done(1);
        worklist.save_to_source().unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "Owner,Catalog,DataAsset,ColumnHeader,BusinessTerm,Done,Category,Notes\n\
             alice,CAT1,orders.csv,cust_id,Customer Identifier,N,Sales>>Customer,check pk\n\
             bob,CAT1,orders.csv,cust_name,Customer Name,Y,Sales>>Customer,\n"
        );
        let reloaded = Worklist::load(&path).unwrap();
        assert!(!reloaded.row(0).is_done());
        assert!(reloaded.row(1).is_done());
    }

    #[test]
    fn empty_worklist_keeps_its_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.csv");
        let header = "Catalog,DataAsset,ColumnHeader,BusinessTerm,Category,Done,Owner\n";
        fs::write(&path, header).unwrap();

        let worklist = Worklist::load(&path).unwrap();
        assert!(worklist.is_empty());
        worklist.save_to_source().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), header);

        let mut out = Vec::new();
        Worklist::new(Vec::new()).write_to(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Catalog,DataAsset,ColumnHeader,BusinessTerm,Category,Done\n"
        );
    }
}
