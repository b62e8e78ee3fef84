//! Tree comparison and application.

use super::{ChangeKind, DiffOp, NodeType, Result};
use crate::fs::{FileEntry, FileSystem, FsError};
use crate::paths;
use std::collections::BTreeMap;

pub(super) struct Walk<'a> {
    pub left: &'a dyn FileSystem,
    pub left_root: &'a str,
    pub right: &'a dyn FileSystem,
    pub right_root: &'a str,
    pub compare_content: bool,
    pub shallow: bool,
    pub exclude: &'a (dyn Fn(&str) -> bool + Send + Sync),
}

impl Walk<'_> {
    pub async fn run(&self) -> Result<Vec<DiffOp>> {
        let mut changes = Vec::new();
        self.compare_dirs("/", &mut changes).await?;
        Ok(changes)
    }

    /// Compare two directories that exist on both sides. Right-only names are
    /// deleted first, then left names are added or compared.
    async fn compare_dirs(&self, rel: &str, out: &mut Vec<DiffOp>) -> Result<()> {
        let left = children(self.left, &paths::join(self.left_root, rel)).await?;
        let right = children(self.right, &paths::join(self.right_root, rel)).await?;

        for (name, is_dir) in &right {
            let child = paths::join(rel, name);
            if left.contains_key(name) || (self.exclude)(&child) {
                continue;
            }
            Box::pin(self.delete_tree(&child, *is_dir, out)).await?;
        }

        for (name, left_is_dir) in &left {
            let child = paths::join(rel, name);
            if (self.exclude)(&child) {
                continue;
            }

            match right.get(name) {
                None => Box::pin(self.add_tree(&child, *left_is_dir, out)).await?,
                Some(true) if *left_is_dir => Box::pin(self.compare_dirs(&child, out)).await?,
                Some(right_is_dir) if right_is_dir != left_is_dir => {
                    Box::pin(self.delete_tree(&child, *right_is_dir, out)).await?;
                    Box::pin(self.add_tree(&child, *left_is_dir, out)).await?;
                }
                Some(_) => {
                    if self.files_differ(&child).await? {
                        out.push(DiffOp::new(ChangeKind::Mod, NodeType::File, child));
                    }
                }
            }
        }
        Ok(())
    }

    /// Parent first, then its left-side children.
    async fn add_tree(&self, rel: &str, is_dir: bool, out: &mut Vec<DiffOp>) -> Result<()> {
        out.push(DiffOp::new(ChangeKind::Add, NodeType::of(is_dir), rel));
        if !is_dir || self.shallow {
            return Ok(());
        }

        let left = children(self.left, &paths::join(self.left_root, rel)).await?;
        for (name, child_is_dir) in left {
            let child = paths::join(rel, &name);
            if !(self.exclude)(&child) {
                Box::pin(self.add_tree(&child, child_is_dir, out)).await?;
            }
        }
        Ok(())
    }

    /// Right-side children first, then the node itself.
    async fn delete_tree(&self, rel: &str, is_dir: bool, out: &mut Vec<DiffOp>) -> Result<()> {
        if is_dir && !self.shallow {
            let right = children(self.right, &paths::join(self.right_root, rel)).await?;
            for (name, child_is_dir) in right {
                let child = paths::join(rel, &name);
                if !(self.exclude)(&child) {
                    Box::pin(self.delete_tree(&child, child_is_dir, out)).await?;
                }
            }
        }
        out.push(DiffOp::new(ChangeKind::Del, NodeType::of(is_dir), rel));
        Ok(())
    }

    async fn files_differ(&self, rel: &str) -> Result<bool> {
        let left_path = paths::join(self.left_root, rel);
        let right_path = paths::join(self.right_root, rel);

        if self.compare_content {
            let left = self.left.read(&left_path).await?;
            let right = self.right.read(&right_path).await?;
            return Ok(left != right);
        }

        let left = self.left.stat(&left_path).await?;
        let right = self.right.stat(&right_path).await?;
        Ok(left.size != right.size || left.mtime_millis != right.mtime_millis)
    }
}

/// Directory listing keyed (and so sorted) by name.
async fn children(fs: &dyn FileSystem, path: &str) -> Result<BTreeMap<String, bool>> {
    Ok(fs
        .list(path)
        .await?
        .into_iter()
        .map(|FileEntry { name, is_dir }| (name, is_dir))
        .collect())
}

/// Apply `changes` (paths relative to the roots) to the right side.
pub(super) async fn apply(
    left: &dyn FileSystem,
    left_root: &str,
    right: &dyn FileSystem,
    right_root: &str,
    changes: &[DiffOp],
) -> Result<()> {
    for op in changes {
        let source = paths::join(left_root, &op.path);
        let target = paths::join(right_root, &op.path);

        match (op.change, op.node_type) {
            (ChangeKind::Add, NodeType::Dir) | (ChangeKind::Mod, NodeType::Dir) => {
                if matches!(right.stat(&target).await, Ok(stat) if !stat.is_dir) {
                    right.delete(&target).await?;
                }
                right.mkdir(&target).await?;
            }
            (ChangeKind::Add, NodeType::File) | (ChangeKind::Mod, NodeType::File) => {
                if matches!(right.stat(&target).await, Ok(stat) if stat.is_dir) {
                    remove_all(right, &target).await?;
                }
                let content = left.read(&source).await?;
                right.write(&target, &content).await?;
            }
            (ChangeKind::Del, _) => remove_all(right, &target).await?,
        }
    }
    Ok(())
}

/// Delete `path` and everything beneath it. Missing paths are fine.
pub(crate) async fn remove_all(fs: &dyn FileSystem, path: &str) -> crate::fs::Result<()> {
    let stat = match fs.stat(path).await {
        Ok(stat) => stat,
        Err(FsError::NotFound(_)) => return Ok(()),
        Err(e) => return Err(e),
    };

    if stat.is_dir {
        for entry in fs.list(path).await? {
            Box::pin(remove_all(fs, &paths::join(path, &entry.name))).await?;
        }
    }
    fs.delete(path).await
}
