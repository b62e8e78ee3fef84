//! Glob matching for watched paths.

use crate::paths;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

/// A set of glob patterns over vault paths.
///
/// `*` never crosses a `/`. Patterns without a leading slash are anchored at
/// the vault root, so `*.md` and `/*.md` are the same pattern. An empty set
/// matches every path.
#[derive(Debug, Clone, Default)]
pub struct PathMatcher {
    set: Option<GlobSet>,
}

impl PathMatcher {
    pub fn new<I, S>(patterns: I) -> Result<Self, globset::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = GlobSetBuilder::new();
        let mut count = 0;
        for pattern in patterns {
            let pattern = paths::tonix(pattern.as_ref());
            let anchored = if pattern.starts_with('/') {
                pattern
            } else {
                format!("/{}", pattern)
            };
            builder.add(GlobBuilder::new(&anchored).literal_separator(true).build()?);
            count += 1;
        }

        if count == 0 {
            return Ok(Self::any());
        }
        Ok(Self {
            set: Some(builder.build()?),
        })
    }

    /// Matches everything.
    pub fn any() -> Self {
        Self { set: None }
    }

    pub fn is_match(&self, path: &str) -> bool {
        match &self.set {
            None => true,
            Some(set) => set.is_match(paths::tonix(path)),
        }
    }
}
