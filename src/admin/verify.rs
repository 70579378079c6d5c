use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::primitives::pager::{FilePageManager, PageManager};
use crate::storage::alloc::{Allocator, DbItemReference};
use crate::storage::heading::Heading;
use crate::storage::index::{open_index, ConsistencyReport, IndexEngine};
use crate::storage::mvcc::{TransactionInventory, VersionedRecord};
use crate::types::{PageId, Result};

const MAX_FINDINGS: usize = 32;

/// Indicates the severity level of a verification finding.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifySeverity {
    /// Suspicious but readable.
    Warning,
    /// Data cannot be read back as stored.
    Error,
}

/// A single issue discovered during verification.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyFinding {
    /// The severity level of this finding.
    pub severity: VerifySeverity,
    /// Human-readable description of the issue.
    pub message: String,
}

/// Complete report of a verification run.
#[derive(Clone, Debug, Default, Serialize)]
pub struct VerifyReport {
    /// `true` when no error was found.
    pub success: bool,
    /// Issues found, capped at a fixed number.
    pub findings: Vec<VerifyFinding>,
    /// Live pages whose checksum and kind were read back.
    pub pages_checked: u64,
    /// Keys whose value blobs were read back.
    pub keys_checked: u64,
    /// Index consistency check, when the index could be opened.
    pub index: Option<ConsistencyReport>,
}

impl VerifyReport {
    fn push(&mut self, severity: VerifySeverity, message: impl Into<String>) {
        if self.findings.len() < MAX_FINDINGS {
            self.findings.push(VerifyFinding {
                severity,
                message: message.into(),
            });
        }
    }

    fn error(&mut self, message: impl Into<String>) {
        self.push(VerifySeverity::Error, message);
    }

    fn finish(mut self) -> Self {
        self.success = !self
            .findings
            .iter()
            .any(|f| f.severity == VerifySeverity::Error);
        self
    }
}

/// Reads back every page, checks the index structure and decodes every stored value.
///
/// Only a store that cannot be opened at all is an `Err`; everything else is a finding.
pub fn verify(path: impl AsRef<Path>) -> Result<VerifyReport> {
    let pager: Arc<dyn PageManager> = Arc::new(FilePageManager::open(path.as_ref(), false)?);
    let mut report = VerifyReport::default();

    let page_count = pager.stats().page_count;
    for index in (0..page_count).map(PageId) {
        if !pager.page_exists(index) {
            continue;
        }
        match pager.fetch_page(index).and_then(|page| page.kind()) {
            Ok(_) => report.pages_checked += 1,
            Err(err) => report.error(format!("page {}: {err}", index.0)),
        }
    }

    let heading = match Heading::load(pager.as_ref()) {
        Ok(heading) => heading,
        Err(err) => {
            report.error(format!("heading: {err}"));
            return Ok(report.finish());
        }
    };
    let alloc = Allocator::new(Arc::clone(&pager));
    let index = match open_index(&heading, Arc::clone(&pager), &alloc) {
        Ok(index) => index,
        Err(err) => {
            report.error(format!("index: {err}"));
            return Ok(report.finish());
        }
    };
    let consistency = index.check_consistency(&alloc)?;
    if !consistency.ok {
        report.error(format!("index: {}", consistency.message));
    }
    let walkable = consistency.ok;
    report.index = Some(consistency);

    if heading.versioned {
        if let Some(item) = heading.inventory {
            if let Err(err) = alloc
                .get(item)
                .and_then(|bytes| TransactionInventory::decode(&bytes, u64::MAX - 1))
            {
                report.error(format!("transaction inventory at {item}: {err}"));
            }
        } else {
            report.push(
                VerifySeverity::Warning,
                "versioned store has no persisted transaction inventory",
            );
        }
    }

    if walkable {
        check_values(index.as_ref(), &alloc, heading.versioned, &mut report)?;
    }
    Ok(report.finish())
}

fn check_blob(alloc: &Allocator, item: DbItemReference) -> std::result::Result<(), String> {
    alloc
        .get_length(item)
        .map(|_| ())
        .map_err(|err| format!("blob {item}: {err}"))
}

fn check_values(
    index: &dyn IndexEngine,
    alloc: &Allocator,
    versioned: bool,
    report: &mut VerifyReport,
) -> Result<()> {
    let mut entry = index.min(alloc)?;
    while let Some((key, item)) = entry {
        let outcome = if versioned {
            alloc
                .get(item)
                .and_then(|bytes| VersionedRecord::decode(&bytes))
                .map_err(|err| format!("version chain {item}: {err}"))
                .and_then(|record| {
                    record
                        .versions
                        .iter()
                        .try_for_each(|version| check_blob(alloc, version.body))
                })
        } else {
            check_blob(alloc, item)
        };
        if let Err(message) = outcome {
            report.error(format!("key {}: {message}", hex::encode(&key)));
        }
        report.keys_checked += 1;
        entry = index.next_to(alloc, &key)?;
    }
    Ok(())
}
