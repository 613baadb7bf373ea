//! Snapshot storage and the on-disk observation layout.
//!
//! ```text
//! <output>/events.jsonl
//! <output>/summary.json
//! <output>/observations/uncovered.json
//! <output>/observations/methods/<i>/method.json
//! <output>/observations/methods/<i>/original/points/point-<hash>.json
//! <output>/observations/methods/<i>/original-<s>/points/point-<hash>.json
//! <output>/observations/methods/<i>/<k>/mutation.json
//! <output>/observations/methods/<i>/<k>/points/point-<hash>.json
//! <output>/observations/methods/<i>/<k>/diff.json
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::probe::ExecutionPointId;
use crate::snapshot::Snapshot;

/// Persistence failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("io error at {path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// Malformed or unserializable JSON.
    #[error("invalid json at {path}: {source}")]
    Json {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn json(path: &Path, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Which artifact variant produced an observation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum VariantLabel {
    /// The unmodified artifact with the probe inserted.
    Original,
    /// The original run against one candidate's test set only. Used when tests share
    /// a runner process, where invocation counters span the whole run.
    OriginalSubset {
        /// Index of the distinct test set within its method.
        set: usize,
    },
    /// One mutant of the method.
    Mutant {
        /// Position of the candidate within its method.
        ordinal: usize,
        /// Candidate id.
        id: String,
    },
}

impl VariantLabel {
    /// Directory name below the method folder.
    pub fn dir_name(&self) -> String {
        match self {
            Self::Original => "original".to_string(),
            Self::OriginalSubset { set } => format!("original-{set}"),
            Self::Mutant { ordinal, .. } => ordinal.to_string(),
        }
    }

    /// Label handed to the probe and written into point files.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Original | Self::OriginalSubset { .. } => "original",
            Self::Mutant { id, .. } => id,
        }
    }
}

impl fmt::Display for VariantLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OriginalSubset { set } => write!(f, "original-{set}"),
            _ => f.write_str(self.as_str()),
        }
    }
}

/// Content of one point file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointRecord {
    /// Variant label the probe was started with.
    pub variant: String,
    /// Execution point.
    pub point: ExecutionPointId,
    /// Captured state.
    pub snapshot: Snapshot,
}

/// File name of the point file for `point`.
pub fn point_file_name(point: &ExecutionPointId) -> String {
    format!("point-{:016x}.json", point.stable_hash())
}

/// Write `record` into `points_dir`, creating the directory if needed.
///
/// The file is written under a temporary name and renamed, so readers never see a
/// partial point file.
pub fn write_point_record(points_dir: &Path, record: &PointRecord) -> Result<PathBuf, StoreError> {
    fs::create_dir_all(points_dir).map_err(|e| StoreError::io(points_dir, e))?;
    let path = points_dir.join(point_file_name(&record.point));
    let staging = path.with_extension("json.tmp");
    let json = serde_json::to_vec(record).map_err(|e| StoreError::json(&path, e))?;
    fs::write(&staging, json).map_err(|e| StoreError::io(&staging, e))?;
    fs::rename(&staging, &path).map_err(|e| StoreError::io(&path, e))?;
    Ok(path)
}

/// Read every point file in `points_dir`, ordered by execution point.
///
/// A missing directory means no point was observed.
pub fn read_point_records(points_dir: &Path) -> Result<Vec<PointRecord>, StoreError> {
    let entries = match fs::read_dir(points_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(StoreError::io(points_dir, err)),
    };

    let mut records = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| StoreError::io(points_dir, e))?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        records.push(read_json::<PointRecord>(&path)?);
    }
    records.sort_by(|a, b| a.point.cmp(&b.point));
    Ok(records)
}

/// Serialize `value` as pretty JSON to `path`, creating parent directories.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    let json = serde_json::to_vec_pretty(value).map_err(|e| StoreError::json(path, e))?;
    fs::write(path, json).map_err(|e| StoreError::io(path, e))
}

/// Deserialize JSON from `path`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let bytes = fs::read(path).map_err(|e| StoreError::io(path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| StoreError::json(path, e))
}

/// In-memory snapshots of the method being processed, keyed by variant and point.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    snapshots: BTreeMap<VariantLabel, BTreeMap<ExecutionPointId, Snapshot>>,
}

impl SnapshotStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `snapshot`, replacing any earlier one for the same variant and point.
    pub fn save(&mut self, variant: &VariantLabel, point: ExecutionPointId, snapshot: Snapshot) {
        self.snapshots
            .entry(variant.clone())
            .or_default()
            .insert(point, snapshot);
    }

    /// Snapshot of `point` under `variant`.
    pub fn load(&self, variant: &VariantLabel, point: &ExecutionPointId) -> Option<&Snapshot> {
        self.snapshots.get(variant)?.get(point)
    }

    /// Points observed under `variant`, in order.
    pub fn points(&self, variant: &VariantLabel) -> Vec<&ExecutionPointId> {
        self.snapshots
            .get(variant)
            .map(|points| points.keys().collect())
            .unwrap_or_default()
    }

    /// Load every point file of `points_dir` under `variant`; returns the points read.
    pub fn ingest(
        &mut self,
        variant: &VariantLabel,
        points_dir: &Path,
    ) -> Result<Vec<ExecutionPointId>, StoreError> {
        let records = read_point_records(points_dir)?;
        let mut points = Vec::with_capacity(records.len());
        for record in records {
            if record.variant != variant.as_str() {
                tracing::warn!(
                    expected = %variant,
                    found = %record.variant,
                    point = %record.point,
                    "point file carries a different variant label"
                );
            }
            points.push(record.point.clone());
            self.save(variant, record.point, record.snapshot);
        }
        Ok(points)
    }

    /// Drop all snapshots of `variant`.
    pub fn discard(&mut self, variant: &VariantLabel) {
        self.snapshots.remove(variant);
    }

    /// Total number of stored snapshots.
    pub fn len(&self) -> usize {
        self.snapshots.values().map(BTreeMap::len).sum()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Paths of one run's output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservationLayout {
    root: PathBuf,
}

impl ObservationLayout {
    /// Layout rooted at `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: output_dir.into(),
        }
    }

    /// Output directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Append-only event log.
    pub fn events_path(&self) -> PathBuf {
        self.root.join("events.jsonl")
    }

    /// Final run summary.
    pub fn summary_path(&self) -> PathBuf {
        self.root.join("summary.json")
    }

    /// Methods without test coverage, forwarded from the report.
    pub fn uncovered_path(&self) -> PathBuf {
        self.root.join("observations").join("uncovered.json")
    }

    /// Folder of the `index`-th observed method.
    pub fn method_dir(&self, index: usize) -> PathBuf {
        self.root
            .join("observations")
            .join("methods")
            .join(index.to_string())
    }

    /// Description of the method.
    pub fn method_info_path(&self, index: usize) -> PathBuf {
        self.method_dir(index).join("method.json")
    }

    /// Folder of one variant of a method.
    pub fn variant_dir(&self, index: usize, variant: &VariantLabel) -> PathBuf {
        self.method_dir(index).join(variant.dir_name())
    }

    /// Where the probe writes point files for one variant.
    pub fn points_dir(&self, index: usize, variant: &VariantLabel) -> PathBuf {
        self.variant_dir(index, variant).join("points")
    }

    /// Description of the mutation installed for a variant.
    pub fn mutation_info_path(&self, index: usize, variant: &VariantLabel) -> PathBuf {
        self.variant_dir(index, variant).join("mutation.json")
    }

    /// Diff results of a mutant variant.
    pub fn diff_path(&self, index: usize, variant: &VariantLabel) -> PathBuf {
        self.variant_dir(index, variant).join("diff.json")
    }

    /// Output of the test runner for a variant.
    pub fn runner_log_path(&self, index: usize, variant: &VariantLabel) -> PathBuf {
        self.variant_dir(index, variant).join("runner.log")
    }

    /// Remove the event log, summary and observations of an earlier run.
    pub fn reset_run(&self) -> Result<(), StoreError> {
        for file in [self.events_path(), self.summary_path()] {
            match fs::remove_file(&file) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(StoreError::io(&file, err)),
            }
        }
        let observations = self.root.join("observations");
        match fs::remove_dir_all(&observations) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(StoreError::io(&observations, err)),
        }
        fs::create_dir_all(&self.root).map_err(|e| StoreError::io(&self.root, e))
    }

    /// Remove leftovers of an earlier run and recreate the method folder.
    pub fn reset_method(&self, index: usize) -> Result<PathBuf, StoreError> {
        let dir = self.method_dir(index);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(StoreError::io(&dir, err)),
        }
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        Ok(dir)
    }

    /// Delete the point files of one variant, keeping everything else.
    pub fn prune_points(&self, index: usize, variant: &VariantLabel) -> Result<(), StoreError> {
        let dir = self.points_dir(index, variant);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StoreError::io(&dir, err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::snapshot::{Link, Root, ScalarValue, SnapshotBuilder};

    fn point(scope: &str, invocation: u32) -> ExecutionPointId {
        ExecutionPointId {
            scope: scope.to_string(),
            class: "pkg.Calc".to_string(),
            method: "add".to_string(),
            descriptor: "(II)I".to_string(),
            invocation,
        }
    }

    fn returning(value: i64) -> Snapshot {
        let mut b = SnapshotBuilder::new();
        let r = b.scalar("int", ScalarValue::Int(value));
        b.return_value(Root::node(r));
        b.build()
    }

    fn mutant(ordinal: usize) -> VariantLabel {
        VariantLabel::Mutant {
            ordinal,
            id: format!("pkg.Calc.add(II)I:MATH#{ordinal}"),
        }
    }

    #[test]
    fn store_keeps_variants_apart() {
        let mut store = SnapshotStore::new();
        store.save(&VariantLabel::Original, point("t", 0), returning(3));
        store.save(&mutant(0), point("t", 0), returning(4));

        assert_eq!(
            store.load(&VariantLabel::Original, &point("t", 0)),
            Some(&returning(3))
        );
        assert_eq!(store.load(&mutant(0), &point("t", 0)), Some(&returning(4)));
        assert_eq!(store.load(&mutant(1), &point("t", 0)), None);
        assert_eq!(store.len(), 2);

        store.discard(&mutant(0));
        assert_eq!(store.len(), 1);
        assert_eq!(store.points(&VariantLabel::Original), vec![&point("t", 0)]);
    }

    #[test]
    fn ingest_reads_point_files_in_point_order() {
        let tmp = tempdir().expect("tempdir should be created");
        for invocation in [2, 0, 1] {
            write_point_record(
                tmp.path(),
                &PointRecord {
                    variant: "original".to_string(),
                    point: point("t", invocation),
                    snapshot: returning(invocation as i64),
                },
            )
            .expect("point should write");
        }
        std::fs::write(tmp.path().join("notes.txt"), "ignored").expect("stray file should write");

        let mut store = SnapshotStore::new();
        let points = store
            .ingest(&VariantLabel::Original, tmp.path())
            .expect("ingest should succeed");
        let order: Vec<u32> = points.iter().map(|p| p.invocation).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert_eq!(
            store.load(&VariantLabel::Original, &point("t", 2)),
            Some(&returning(2))
        );
    }

    #[test]
    fn point_files_keep_non_finite_floats() {
        let tmp = tempdir().expect("tempdir should be created");
        let values = [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, -0.0];
        let mut b = SnapshotBuilder::new();
        let elements = values
            .iter()
            .map(|v| Link::Node(b.scalar("double", ScalarValue::Float(*v))))
            .collect();
        let seq = b.sequence("double[]", elements);
        b.return_value(Root::node(seq));
        let snapshot = b.build();

        write_point_record(
            tmp.path(),
            &PointRecord {
                variant: "original".to_string(),
                point: point("t", 0),
                snapshot: snapshot.clone(),
            },
        )
        .expect("point should write");

        let records = read_point_records(tmp.path()).expect("point file should read back");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].snapshot, snapshot);
        assert_eq!(crate::diff::diff(&snapshot, &records[0].snapshot).differences.len(), 0);
    }

    #[test]
    fn missing_points_dir_reads_as_empty_and_corrupt_file_errors() {
        let tmp = tempdir().expect("tempdir should be created");
        let records = read_point_records(&tmp.path().join("absent")).expect("absent dir is empty");
        assert!(records.is_empty());

        std::fs::write(tmp.path().join("point-bad.json"), "{oops").expect("corrupt file should write");
        assert!(matches!(
            read_point_records(tmp.path()),
            Err(StoreError::Json { .. })
        ));
    }

    #[test]
    fn layout_names_method_and_variant_folders() {
        let layout = ObservationLayout::new("/out");
        assert_eq!(
            layout.points_dir(3, &VariantLabel::Original),
            PathBuf::from("/out/observations/methods/3/original/points")
        );
        assert_eq!(
            layout.diff_path(3, &mutant(1)),
            PathBuf::from("/out/observations/methods/3/1/diff.json")
        );
        assert_eq!(mutant(1).as_str(), "pkg.Calc.add(II)I:MATH#1");

        let subset = VariantLabel::OriginalSubset { set: 2 };
        assert_eq!(
            layout.points_dir(3, &subset),
            PathBuf::from("/out/observations/methods/3/original-2/points")
        );
        assert_eq!(subset.as_str(), "original");
        assert_eq!(subset.to_string(), "original-2");
    }

    #[test]
    fn reset_method_clears_previous_contents() {
        let tmp = tempdir().expect("tempdir should be created");
        let layout = ObservationLayout::new(tmp.path());
        let stale = layout.mutation_info_path(0, &mutant(0));
        write_json(&stale, &serde_json::json!({"stale": true})).expect("stale file should write");

        layout.reset_method(0).expect("reset should succeed");
        assert!(!stale.exists());
        assert!(layout.method_dir(0).is_dir());
    }
}
