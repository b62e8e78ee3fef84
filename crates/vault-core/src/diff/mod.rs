//! Diff and merge between two vault subtrees.
//!
//! `diff` compares the tree under `left_path` in one vault with the tree
//! under `right_path` in another and lists what must change on the right to
//! mirror the left. `merge` computes the same list (always deep) and applies
//! it to the right vault.
//!
//! Op paths are relative to the anchors. The manifest (`/vault.json`) never
//! appears in either direction.

mod tree;

pub(crate) use tree::remove_all;

use crate::fs::{FileSystem, FsError};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Vault manifest, excluded from every diff and merge.
pub const MANIFEST_PATH: &str = "/vault.json";

#[derive(Debug, Error)]
pub enum DiffError {
    #[error("Diff anchor not found: {0}")]
    AnchorNotFound(String),

    #[error("Diff anchor is not a directory: {0}")]
    AnchorNotADirectory(String),

    #[error("Invalid change kind: {0}")]
    InvalidChangeKind(String),

    #[error(transparent)]
    Fs(#[from] FsError),
}

pub type Result<T> = std::result::Result<T, DiffError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Add,
    Mod,
    Del,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChangeKind::Add => "add",
            ChangeKind::Mod => "mod",
            ChangeKind::Del => "del",
        })
    }
}

impl FromStr for ChangeKind {
    type Err = DiffError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "add" => Ok(ChangeKind::Add),
            "mod" => Ok(ChangeKind::Mod),
            "del" => Ok(ChangeKind::Del),
            other => Err(DiffError::InvalidChangeKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    File,
    Dir,
}

impl NodeType {
    fn of(is_dir: bool) -> Self {
        if is_dir { NodeType::Dir } else { NodeType::File }
    }
}

/// One change to apply on the right side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiffOp {
    pub change: ChangeKind,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub path: String,
}

impl DiffOp {
    pub fn new(change: ChangeKind, node_type: NodeType, path: impl Into<String>) -> Self {
        Self {
            change,
            node_type,
            path: path.into(),
        }
    }
}

/// Returns `true` for paths that should be left out.
pub type PathFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

#[derive(Clone, Default)]
pub struct DiffOptions {
    /// Classify files as modified only when their bytes differ. Otherwise
    /// size or mtime differences are enough.
    pub compare_content: bool,
    /// Do not descend into subtrees that exist on one side only.
    pub shallow: bool,
    /// Custom exclusion predicate. Replaces the `paths` allow-list.
    pub filter: Option<PathFilter>,
    /// Allow-list of paths; a path passes if it equals one of these or lies
    /// beneath one. Empty allows everything.
    pub paths: Vec<String>,
    /// Change kinds to keep. Empty keeps all.
    pub ops: Vec<ChangeKind>,
}

impl fmt::Debug for DiffOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiffOptions")
            .field("compare_content", &self.compare_content)
            .field("shallow", &self.shallow)
            .field("filter", &self.filter.as_ref().map(|_| "<fn>"))
            .field("paths", &self.paths)
            .field("ops", &self.ops)
            .finish()
    }
}

impl DiffOptions {
    /// The effective exclusion predicate: the manifest first, then the custom
    /// filter or the `paths` allow-list.
    pub(crate) fn exclusion(&self) -> PathFilter {
        let custom = self.filter.clone();
        let targets: Vec<String> = self.paths.iter().map(|p| paths::normalize(p)).collect();

        Arc::new(move |path: &str| {
            let path = paths::tonix(path);
            if path == MANIFEST_PATH {
                return true;
            }
            if let Some(filter) = &custom {
                return filter(&path);
            }
            !targets.is_empty() && !targets.iter().any(|target| paths::is_within(&path, target))
        })
    }
}

/// List the changes that would make `right_path` in `right` mirror
/// `left_path` in `left`.
pub async fn diff(
    left: &dyn FileSystem,
    left_path: &str,
    right: &dyn FileSystem,
    right_path: &str,
    options: &DiffOptions,
) -> Result<Vec<DiffOp>> {
    let left_root = anchor(left, left_path).await?;
    let right_root = anchor(right, right_path).await?;

    let exclude = options.exclusion();
    let walk = tree::Walk {
        left,
        left_root: &left_root,
        right,
        right_root: &right_root,
        compare_content: options.compare_content,
        shallow: options.shallow,
        exclude: exclude.as_ref(),
    };
    let mut changes = walk.run().await?;

    if !options.ops.is_empty() {
        changes.retain(|op| options.ops.contains(&op.change));
    }

    debug!(
        "Diffed {} against {}: {} change(s)",
        left_root,
        right_root,
        changes.len()
    );
    Ok(changes)
}

/// Diff deeply, then apply every listed change to the right side.
pub async fn merge(
    left: &dyn FileSystem,
    left_path: &str,
    right: &dyn FileSystem,
    right_path: &str,
    options: &DiffOptions,
) -> Result<Vec<DiffOp>> {
    let options = DiffOptions {
        shallow: false,
        ..options.clone()
    };
    let changes = diff(left, left_path, right, right_path, &options).await?;

    let left_root = paths::normalize(left_path);
    let right_root = paths::normalize(right_path);
    tree::apply(left, &left_root, right, &right_root, &changes).await?;

    info!(
        "Merged {} into {}: {} change(s)",
        left_root,
        right_root,
        changes.len()
    );
    Ok(changes)
}

async fn anchor(fs: &dyn FileSystem, path: &str) -> Result<String> {
    let path = paths::normalize(path);
    match fs.stat(&path).await {
        Ok(stat) if stat.is_dir => Ok(path),
        Ok(_) => Err(DiffError::AnchorNotADirectory(path)),
        Err(FsError::NotFound(_)) => Err(DiffError::AnchorNotFound(path)),
        Err(e) => Err(e.into()),
    }
}
