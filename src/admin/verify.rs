use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::primitives::pager::{KeyFormatKind, Pager, TreeMeta};
use crate::storage::btree::{
    BytesLayout, CheckOptions, CheckStats, ConsistencyChecker, Defect, DefectKind, Layout,
    U64Layout,
};
use crate::storage::freelist::FreeList;
use crate::types::{PageId, TreeError};

use crate::admin::error::{AdminError, Result};
use crate::admin::options::AdminOpenOptions;
use crate::admin::util::open_image;

/// Specifies which checks a verification runs.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyLevel {
    /// Structural walk of the tree only.
    Tree,
    /// Page-space accounting only.
    Space,
    /// Both checks.
    Full,
}

impl VerifyLevel {
    fn walks_tree(self) -> bool {
        matches!(self, VerifyLevel::Tree | VerifyLevel::Full)
    }

    fn accounts_space(self) -> bool {
        matches!(self, VerifyLevel::Space | VerifyLevel::Full)
    }
}

/// Indicates the severity level of a verification finding.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifySeverity {
    /// Informational message about the verification process.
    Info,
    /// Unusual but legal state, such as a followed heir pointer.
    Warning,
    /// Structural defect or an aborted walk.
    Error,
}

/// Represents a single issue discovered during verification.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyFinding {
    /// The severity level of this finding.
    pub severity: VerifySeverity,
    /// Defect category, absent for findings that are not defects.
    pub kind: Option<DefectKind>,
    /// Page the finding concerns.
    pub page: Option<PageId>,
    /// Tree level the finding concerns.
    pub level: Option<usize>,
    /// Human-readable description of the issue.
    pub message: String,
}

impl VerifyFinding {
    fn error(message: impl Into<String>) -> Self {
        Self {
            severity: VerifySeverity::Error,
            kind: None,
            page: None,
            level: None,
            message: message.into(),
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: VerifySeverity::Warning,
            ..Self::error(message)
        }
    }
}

impl From<Defect> for VerifyFinding {
    fn from(defect: Defect) -> Self {
        Self {
            severity: VerifySeverity::Error,
            kind: Some(defect.kind),
            page: defect.page,
            level: defect.level,
            message: defect.message,
        }
    }
}

/// Statistics collected during the verification process.
#[derive(Clone, Debug, Default, Serialize)]
pub struct VerifyCounts {
    /// Pages in the store.
    pub pages: u64,
    /// Nodes visited per level, root first.
    pub nodes_per_level: Vec<u64>,
    /// Leaves visited.
    pub leaves: u64,
    /// Internal nodes visited.
    pub internal_nodes: u64,
    /// Heir pointers followed.
    pub heirs_followed: u64,
    /// Torn reads replayed.
    pub retries: u64,
    /// Tree pages accounted for by the space check.
    pub live_pages: u64,
    /// Free-list pages and ids accounted for.
    pub free_ids: u64,
    /// Defects found, including any past the findings cap.
    pub defects: u64,
}

impl VerifyCounts {
    fn absorb(&mut self, stats: &CheckStats) {
        self.nodes_per_level = stats.nodes_per_level.clone();
        self.leaves = stats.leaves;
        self.internal_nodes = stats.internal_nodes;
        self.heirs_followed = stats.heirs_followed;
        self.retries = stats.retries;
        self.live_pages = stats.live_pages;
        self.free_ids = stats.free_ids;
    }
}

/// Complete report of a verification operation.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyReport {
    /// The verification level that was performed.
    pub level: VerifyLevel,
    /// Whether every selected check finished and found no defect.
    pub success: bool,
    /// Findings, capped at the configured maximum.
    pub findings: Vec<VerifyFinding>,
    /// Statistics about the structures examined.
    pub counts: VerifyCounts,
}

/// Verifies the tree stored in the page image at `path`.
///
/// # Errors
///
/// Returns an error if the image cannot be opened or decoded. Problems found
/// inside the tree, including walks that had to stop early, are reported as
/// findings instead.
pub fn verify(
    path: impl AsRef<Path>,
    opts: &AdminOpenOptions,
    level: VerifyLevel,
) -> Result<VerifyReport> {
    let (pager, meta) = open_image(path.as_ref())?;
    verify_pager(&pager, &meta, opts, level)
}

/// Verifies the tree described by `meta` inside an open pager.
///
/// # Errors
///
/// Returns an error if the key format or checker options are unusable.
pub fn verify_pager(
    pager: &Pager,
    meta: &TreeMeta,
    opts: &AdminOpenOptions,
    level: VerifyLevel,
) -> Result<VerifyReport> {
    let check = opts.check_options(meta);
    let format = meta.key_format;
    match format.kind {
        KeyFormatKind::U64 => {
            if format.key_size != 8 {
                return Err(AdminError::Message(format!(
                    "u64 key format with key size {}",
                    format.key_size
                )));
            }
            let layout = U64Layout::new(format.value_size as usize);
            run(pager, meta, &layout, check, opts.max_findings, level)
        }
        KeyFormatKind::Bytes => {
            let layout = BytesLayout::new(format.key_size as usize, format.value_size as usize)?;
            run(pager, meta, &layout, check, opts.max_findings, level)
        }
    }
}

fn run<L: Layout>(
    pager: &Pager,
    meta: &TreeMeta,
    layout: &L,
    check: CheckOptions,
    max_findings: usize,
    level: VerifyLevel,
) -> Result<VerifyReport> {
    let mut checker = ConsistencyChecker::new(pager, layout, check)?;
    let mut aborted = Vec::new();

    if level.walks_tree() {
        if let Err(err) = checker.check(meta.root, meta.root_generation) {
            aborted.push(format!("tree walk aborted: {err}"));
        }
    }
    if level.accounts_space() {
        if let Err(err) = account_space(pager, meta, &mut checker) {
            aborted.push(format!("space check aborted: {err}"));
        }
    }

    let mut counts = VerifyCounts {
        pages: pager.page_count(),
        ..VerifyCounts::default()
    };
    counts.absorb(checker.stats());
    let defects = checker.take_defects();
    counts.defects = defects.len() as u64;

    let success = aborted.is_empty() && defects.is_empty();
    let mut findings = Vec::new();
    for message in aborted {
        push_finding(&mut findings, max_findings, VerifyFinding::error(message));
    }
    for defect in defects {
        push_finding(&mut findings, max_findings, defect.into());
    }
    if counts.heirs_followed > 0 {
        push_finding(
            &mut findings,
            max_findings,
            VerifyFinding::warning(format!(
                "{} heir pointer(s) followed during the walk",
                counts.heirs_followed
            )),
        );
    }

    info!(?level, success, defects = counts.defects, "verify finished");
    Ok(VerifyReport {
        level,
        success,
        findings,
        counts,
    })
}

fn account_space<L: Layout>(
    pager: &Pager,
    meta: &TreeMeta,
    checker: &mut ConsistencyChecker<'_, L>,
) -> std::result::Result<bool, TreeError> {
    let free = FreeList::open(pager, meta.free_list_head).ids()?;
    let last = pager
        .last_page_id()
        .ok_or(TreeError::Corruption("image holds no pages"))?;
    checker.check_space(meta.root, last, free)
}

fn push_finding(findings: &mut Vec<VerifyFinding>, max: usize, finding: VerifyFinding) {
    if findings.len() < max {
        findings.push(finding);
    }
}
