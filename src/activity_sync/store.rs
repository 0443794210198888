use std::collections::HashSet;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use function_timer::time;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::metrics_helper;
use crate::normalize::{HEADER, Record};

const ID_COLUMN: &str = "Activity ID";

/// How new records are merged with the rows already on disk. A store must be
/// written with one strategy for its whole life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum MergeStrategy {
    /// Rewrite the file with new records on top, newest first.
    #[default]
    Prepend,
    /// Append new records at the end of the file.
    Append,
}

/// The activity CSV plus the set of IDs it already holds.
#[derive(Debug)]
pub struct ActivityStore {
    path: PathBuf,
    known: HashSet<String>,
}

impl ActivityStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let known = Self::known_ids(path)?;
        info!("Loaded {} known activities from {}", known.len(), path.display());
        Ok(Self {
            path: path.to_path_buf(),
            known,
        })
    }

    /// IDs in the `Activity ID` column; empty when the file does not exist yet.
    pub fn known_ids(path: &Path) -> Result<HashSet<String>, StoreError> {
        if !path.exists() {
            return Ok(HashSet::new());
        }

        let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
        let headers = reader.headers()?.clone();
        if headers.is_empty() {
            return Ok(HashSet::new());
        }

        let id_index = headers
            .iter()
            .position(|h| h == ID_COLUMN)
            .ok_or_else(|| StoreError::MissingIdColumn(path.display().to_string()))?;

        let mut ids = HashSet::new();
        for row in reader.records() {
            if let Some(id) = row?.get(id_index) {
                ids.insert(id.to_string());
            }
        }
        Ok(ids)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, activity_id: &str) -> bool {
        self.known.contains(activity_id)
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// Write the records whose IDs are not yet stored, keeping their order.
    /// Returns how many were written; with nothing new the file is not touched.
    #[time("store_commit_duration")]
    pub fn commit(&mut self, records: &[Record], strategy: MergeStrategy) -> Result<usize, StoreError> {
        let mut batch_ids = HashSet::new();
        let fresh: Vec<&Record> = records
            .iter()
            .filter(|&r| !self.known.contains(&r.activity_id) && batch_ids.insert(r.activity_id.as_str()))
            .collect();

        if fresh.is_empty() {
            debug!("Nothing new to commit to {}", self.path.display());
            return Ok(0);
        }

        self.ensure_parent_dir()?;
        let result = match strategy {
            MergeStrategy::Append => self.append(&fresh),
            MergeStrategy::Prepend => self.prepend(&fresh),
        };

        match result {
            Ok(()) => {
                metrics_helper::increment_store_commit_success();
                self.known.extend(fresh.iter().map(|r| r.activity_id.clone()));
                Ok(fresh.len())
            }
            Err(e) => {
                metrics_helper::increment_store_commit_failure();
                Err(e)
            }
        }
    }

    fn ensure_parent_dir(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    fn is_new_file(&self) -> Result<bool, StoreError> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len() == 0),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether the last byte of a non-empty file is something other than `\n`.
    fn missing_final_newline(&self) -> Result<bool, StoreError> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::End(-1))?;
        let mut last = [0u8; 1];
        file.read_exact(&mut last)?;
        Ok(last[0] != b'\n')
    }

    fn append(&self, records: &[&Record]) -> Result<(), StoreError> {
        let write_header = self.is_new_file()?;
        let close_last_row = !write_header && self.missing_final_newline()?;
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        if close_last_row {
            debug!("{} has no trailing line break, adding one", self.path.display());
            file.write_all(b"\r\n")?;
        }
        let mut writer = csv_writer(file);

        if write_header {
            writer.write_record(HEADER)?;
        }
        for record in records {
            writer.write_record(record.to_row())?;
        }
        writer.flush()?;

        info!("Appended {} records to {}", records.len(), self.path.display());
        Ok(())
    }

    /// Full rewrite through a sibling temp file, so a failed write leaves the
    /// old file in place.
    fn prepend(&self, records: &[&Record]) -> Result<(), StoreError> {
        let existing = self.read_rows()?;
        let tmp_path = self.tmp_path();

        if let Err(e) = self.write_rows(&tmp_path, records, &existing) {
            fs::remove_file(&tmp_path).ok();
            return Err(e);
        }
        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            fs::remove_file(&tmp_path).ok();
            return Err(e.into());
        }

        info!(
            "Wrote {} new records above {} existing rows in {}",
            records.len(),
            existing.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Header, then `records`, then `existing`, synced to disk at `tmp`.
    fn write_rows(
        &self,
        tmp: &Path,
        records: &[&Record],
        existing: &[csv::StringRecord],
    ) -> Result<(), StoreError> {
        let mut writer = csv_writer(File::create(tmp)?);
        writer.write_record(HEADER)?;
        for record in records {
            writer.write_record(record.to_row())?;
        }
        for row in existing {
            writer.write_record(row)?;
        }
        let mut file = writer
            .into_inner()
            .map_err(|e| StoreError::Io(e.into_error()))?;
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }

    fn read_rows(&self) -> Result<Vec<csv::StringRecord>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(&self.path)?;
        Ok(reader.records().collect::<Result<Vec<_>, _>>()?)
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".tmp");
        PathBuf::from(name)
    }
}

fn csv_writer<W: Write>(inner: W) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::CRLF)
        .from_writer(inner)
}
