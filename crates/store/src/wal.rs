// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSONL mutation write-ahead log.
//!
//! Each entry is a single line of JSON: `{"seq":N,"mutation":{...}}\n`.
//! Appends are fsynced at the end of each store transaction: the flush
//! is the commit point. On open the whole log is scanned; a corrupt tail
//! is rotated to `.bak` keeping the valid prefix.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::StoreError;
use crate::mutation::Mutation;

/// Serialization helper for writing WAL entries without cloning the mutation.
#[derive(serde::Serialize)]
struct WalRecordRef<'a> {
    seq: u64,
    mutation: &'a Mutation,
}

/// Deserialization helper for reading WAL entries.
#[derive(serde::Deserialize)]
struct WalRecord {
    seq: u64,
    mutation: Mutation,
}

/// A single WAL entry with sequence number.
#[derive(Debug, Clone)]
pub struct WalEntry {
    pub seq: u64,
    pub mutation: Mutation,
}

/// JSONL WAL for durable mutation storage.
pub struct Wal {
    file: File,
    path: PathBuf,
    /// Sequence number of the last written entry
    seq: u64,
}

impl Wal {
    /// Open or create a WAL, returning it along with all entries whose
    /// sequence number is greater than `after_seq` (the snapshot's seq).
    ///
    /// A corrupt tail is rotated to `.bak`; the valid prefix is kept.
    pub fn open(path: &Path, after_seq: u64) -> Result<(Self, Vec<WalEntry>), StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let (entries, valid_lines, corrupt) = Self::scan(&file)?;

        let file = if corrupt {
            drop(file);
            let bak_path = crate::snapshot::rotate_bak_path(path);
            warn!(
                path = %path.display(),
                bak = %bak_path.display(),
                valid_entries = valid_lines.len(),
                "corrupt WAL tail detected, rotating to .bak and keeping valid prefix",
            );
            std::fs::rename(path, &bak_path)?;

            {
                let mut new_file = File::create(path)?;
                for line in &valid_lines {
                    new_file.write_all(line.as_bytes())?;
                    new_file.write_all(b"\n")?;
                }
                new_file.sync_all()?;
            }

            OpenOptions::new()
                .create(true)
                .read(true)
                .append(true)
                .open(path)?
        } else {
            file
        };

        let seq = entries.last().map(|e| e.seq).unwrap_or(0).max(after_seq);
        let replay = entries.into_iter().filter(|e| e.seq > after_seq).collect();

        Ok((
            Self {
                file,
                path: path.to_owned(),
                seq,
            },
            replay,
        ))
    }

    /// Scan all entries, stopping at the first unparseable line.
    ///
    /// Returns `(entries, valid_lines, corrupt)`.
    fn scan(file: &File) -> Result<(Vec<WalEntry>, Vec<String>, bool), StoreError> {
        let mut reader = BufReader::new(file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;

        let mut entries = Vec::new();
        let mut valid_lines = Vec::new();
        let mut corrupt = false;
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    corrupt = true;
                    break;
                }
                Err(e) => return Err(e.into()),
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let record: WalRecord = match serde_json::from_str(trimmed) {
                Ok(r) => r,
                Err(_) => {
                    corrupt = true;
                    break;
                }
            };

            entries.push(WalEntry {
                seq: record.seq,
                mutation: record.mutation,
            });
            valid_lines.push(trimmed.to_string());
        }

        Ok((entries, valid_lines, corrupt))
    }

    /// Append mutations and fsync. This is the commit point: after this
    /// returns, the transaction is durable.
    ///
    /// Returns the sequence number of the last entry written.
    pub fn commit(&mut self, mutations: &[Mutation]) -> Result<u64, StoreError> {
        for mutation in mutations {
            self.seq += 1;
            let record = WalRecordRef {
                seq: self.seq,
                mutation,
            };
            let mut json_bytes = serde_json::to_vec(&record)?;
            json_bytes.push(b'\n');
            self.file.write_all(&json_bytes)?;
        }
        self.file.sync_all()?;
        Ok(self.seq)
    }

    /// Sequence number of the last written entry.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Drop all entries. Called after a snapshot has been made durable;
    /// the sequence counter keeps counting from where it was.
    pub fn truncate(&mut self) -> Result<(), StoreError> {
        let tmp_path = self.path.with_extension("tmp");
        {
            let tmp_file = File::create(&tmp_path)?;
            tmp_file.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;

        self.file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "wal_tests.rs"]
mod tests;
