//! Operator sweep reconciling blob reference counts, file records and the
//! blob store.
//!
//! Drift between the stores is tolerated on the request path (a failed blob
//! delete, a crash between two writes). The sweep finds it:
//! - stored reference counts that disagree with the records pointing at a blob
//! - records whose blob is missing from the store (reported, never deleted)
//! - stored blobs nothing tracks or references, and counter rows at zero

use crate::error::{ServiceError, ServiceResult};
use crate::metrics;
use depot_core::ContentRef;
use depot_metadata::MetadataStore;
use depot_storage::BlobStore;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// How much the sweep is allowed to change.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepMode {
    /// Report only.
    #[default]
    DryRun,
    /// Rewrite reference counts to match the records.
    Correct,
    /// Also delete orphaned blobs and unreferenced counter rows.
    Aggressive,
}

impl SweepMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DryRun => "dry_run",
            Self::Correct => "correct",
            Self::Aggressive => "aggressive",
        }
    }

    fn corrects(&self) -> bool {
        matches!(self, Self::Correct | Self::Aggressive)
    }
}

impl fmt::Display for SweepMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SweepMode {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "dry_run" | "dryrun" => Ok(Self::DryRun),
            "correct" => Ok(Self::Correct),
            "aggressive" => Ok(Self::Aggressive),
            other => Err(ServiceError::InvalidInput(format!(
                "unknown sweep mode: {other} (expected dry_run, correct or aggressive)"
            ))),
        }
    }
}

/// What a sweep found and what it changed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub mode: SweepMode,
    pub blob_refs_checked: u64,
    pub refcount_mismatches: u64,
    pub refcounts_corrected: u64,
    /// Records point at these, but the blob store does not have them.
    pub missing_blobs: Vec<ContentRef>,
    /// Stored blobs with neither a counter row nor a record.
    pub orphan_blobs: Vec<ContentRef>,
    pub orphan_blobs_deleted: u64,
    /// Counter rows no record references.
    pub unreferenced_rows: Vec<ContentRef>,
    pub unreferenced_rows_deleted: u64,
    /// Referenced blobs without a counter row.
    pub untracked_refs: Vec<ContentRef>,
    pub errors: u64,
}

impl SweepReport {
    /// True when the stores agree.
    pub fn is_clean(&self) -> bool {
        self.refcount_mismatches == 0
            && self.missing_blobs.is_empty()
            && self.orphan_blobs.is_empty()
            && self.unreferenced_rows.is_empty()
            && self.untracked_refs.is_empty()
    }
}

pub struct Sweeper {
    blobs: Arc<dyn BlobStore>,
    metadata: Arc<dyn MetadataStore>,
}

impl Sweeper {
    pub fn new(blobs: Arc<dyn BlobStore>, metadata: Arc<dyn MetadataStore>) -> Self {
        Self { blobs, metadata }
    }

    /// Run one pass. Meant for quiet periods: uploads racing the sweep can
    /// be reported as drift.
    pub async fn run(&self, mode: SweepMode) -> ServiceResult<SweepReport> {
        let mut report = SweepReport {
            mode,
            ..SweepReport::default()
        };
        tracing::info!(mode = %mode, backend = self.blobs.backend_name(), "starting sweep");

        let references = self.metadata.reference_counts().await?;
        let tracked = self.metadata.list_blob_refs().await?;
        let stored: HashSet<ContentRef> = self.blobs.list().await?.into_iter().collect();

        let mut tracked_refs = HashSet::with_capacity(tracked.len());
        for blob in tracked {
            report.blob_refs_checked += 1;
            tracked_refs.insert(blob.content_ref.clone());
            let actual = references.get(&blob.content_ref).copied().unwrap_or(0);

            if actual == 0 {
                report.unreferenced_rows.push(blob.content_ref.clone());
                if mode == SweepMode::Aggressive {
                    if self.remove_unreferenced(&blob.content_ref, &stored).await {
                        report.unreferenced_rows_deleted += 1;
                    } else {
                        report.errors += 1;
                    }
                    continue;
                }
            }

            if actual != blob.refcount {
                report.refcount_mismatches += 1;
                if mode.corrects() {
                    match self
                        .metadata
                        .set_blob_refcount(&blob.content_ref, actual)
                        .await
                    {
                        Ok(_) => {
                            report.refcounts_corrected += 1;
                            tracing::info!(
                                content_ref = %blob.content_ref,
                                stored = blob.refcount,
                                actual,
                                "reference count corrected"
                            );
                        }
                        Err(err) => {
                            report.errors += 1;
                            tracing::warn!(content_ref = %blob.content_ref, error = %err, "failed to correct reference count");
                        }
                    }
                } else {
                    tracing::info!(
                        content_ref = %blob.content_ref,
                        stored = blob.refcount,
                        actual,
                        "DRY-RUN: reference count mismatch"
                    );
                }
            }
        }

        for content_ref in references.keys() {
            if !stored.contains(content_ref) {
                tracing::warn!(content_ref = %content_ref, "records reference a missing blob");
                report.missing_blobs.push(content_ref.clone());
            }
            if !tracked_refs.contains(content_ref) {
                report.untracked_refs.push(content_ref.clone());
            }
        }

        for content_ref in &stored {
            if tracked_refs.contains(content_ref) || references.contains_key(content_ref) {
                continue;
            }
            report.orphan_blobs.push(content_ref.clone());
            if mode == SweepMode::Aggressive {
                match self.blobs.delete(content_ref).await {
                    Ok(()) => {
                        metrics::BLOB_DELETES.inc();
                        report.orphan_blobs_deleted += 1;
                        tracing::info!(content_ref = %content_ref, "orphaned blob deleted");
                    }
                    Err(err) => {
                        report.errors += 1;
                        tracing::warn!(content_ref = %content_ref, error = %err, "failed to delete orphaned blob");
                    }
                }
            } else {
                tracing::info!(content_ref = %content_ref, "orphaned blob found");
            }
        }

        // Deterministic output
        report.missing_blobs.sort();
        report.orphan_blobs.sort();
        report.unreferenced_rows.sort();
        report.untracked_refs.sort();

        tracing::info!(
            mode = %mode,
            checked = report.blob_refs_checked,
            mismatches = report.refcount_mismatches,
            missing = report.missing_blobs.len(),
            orphans = report.orphan_blobs.len(),
            errors = report.errors,
            "sweep finished"
        );
        Ok(report)
    }

    /// Drop a counter row nothing references, and its blob.
    async fn remove_unreferenced(&self, content_ref: &ContentRef, stored: &HashSet<ContentRef>) -> bool {
        if let Err(err) = self.metadata.delete_blob_ref(content_ref).await {
            tracing::warn!(content_ref = %content_ref, error = %err, "failed to delete counter row");
            return false;
        }
        if stored.contains(content_ref) {
            if let Err(err) = self.blobs.delete(content_ref).await {
                tracing::warn!(content_ref = %content_ref, error = %err, "failed to delete unreferenced blob");
                return false;
            }
            metrics::BLOB_DELETES.inc();
        }
        tracing::info!(content_ref = %content_ref, "unreferenced blob removed");
        true
    }
}
