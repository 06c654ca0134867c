#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `relay_filters` decides which filesystem entries participate in a
//! synchronization run. A [`FilterRules`] record arrives from configuration
//! (include and exclude globs, a stock "smart" exclusion list, hidden-file
//! handling, size bounds, and optional gitignore support) and is compiled
//! once into a [`FilterSet`] that the scanner consults for every entry.
//!
//! # Design
//!
//! - [`FilterRules`] is the plain configuration record. It is
//!   `Deserialize`-able so external collaborators can hydrate it from any
//!   textual format.
//! - [`FilterSet::compile`] turns the rules into compiled [`globset`]
//!   matchers plus an optional gitignore matcher rooted at the source tree.
//!   Compilation failures name the offending pattern.
//! - [`FilterSet::matches`] evaluates one entry. Exclusions always win;
//!   include globs, when present, act as a whitelist for regular files;
//!   size bounds apply to regular files only so directory traversal is never
//!   cut short by them.
//!
//! # Invariants
//!
//! - Matching is performed on paths relative to the scanned root, never on
//!   absolute paths, so rules behave identically for source and destination
//!   trees.
//! - A default-constructed rule set accepts every entry.
//!
//! # Examples
//!
//! ```
//! use relay_filters::{FilterRules, FilterSet};
//! use std::path::Path;
//!
//! let rules = FilterRules {
//!     exclude: vec!["*.tmp".to_string()],
//!     ..FilterRules::default()
//! };
//! let set = FilterSet::compile(&rules, None).unwrap();
//! assert!(set.matches(Path::new("notes.txt"), 10, false));
//! assert!(!set.matches(Path::new("build/scratch.tmp"), 10, false));
//! ```

use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::gitignore::Gitignore;
use serde::Deserialize;

/// Directory and file names excluded by the stock "smart" rule set.
///
/// Mirrors what sync tools conventionally skip: VCS metadata, dependency
/// caches, build output, and editor or OS droppings.
const SMART_EXCLUDED_NAMES: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "__pycache__",
    ".DS_Store",
    "Thumbs.db",
];

/// File-name suffixes excluded by the stock "smart" rule set.
const SMART_EXCLUDED_SUFFIXES: &[&str] = &[".tmp", ".temp", ".swp", "~"];

/// Filtering rules as they appear in a configuration record.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FilterRules {
    /// Glob patterns a regular file must match to be included. Empty means
    /// "include everything not otherwise excluded".
    pub include: Vec<String>,
    /// Glob patterns that exclude matching entries outright.
    pub exclude: Vec<String>,
    /// Enables the stock exclusion list for VCS metadata, caches, and
    /// temporary files.
    pub smart: bool,
    /// Applies `<root>/.gitignore` after the explicit rules.
    pub respect_gitignore: bool,
    /// Drops entries with any dot-prefixed path component.
    pub ignore_hidden: bool,
    /// Minimum size in bytes for regular files.
    pub min_file_size: Option<u64>,
    /// Maximum size in bytes for regular files.
    pub max_file_size: Option<u64>,
}

/// Compiled form of [`FilterRules`], cheap to consult per entry.
#[derive(Debug)]
pub struct FilterSet {
    include: Option<GlobSet>,
    exclude: GlobSet,
    smart: bool,
    ignore_hidden: bool,
    min_file_size: Option<u64>,
    max_file_size: Option<u64>,
    gitignore: Option<Gitignore>,
}

impl FilterSet {
    /// Compiles a rule set. `root` anchors gitignore loading and may be
    /// omitted when `respect_gitignore` is off.
    pub fn compile(rules: &FilterRules, root: Option<&Path>) -> Result<Self, FilterError> {
        let include = if rules.include.is_empty() {
            None
        } else {
            Some(build_glob_set(&rules.include)?)
        };
        let exclude = build_glob_set(&rules.exclude)?;

        let gitignore = match (rules.respect_gitignore, root) {
            (true, Some(root)) => {
                let (matcher, error) = Gitignore::new(root.join(".gitignore"));
                if let Some(error) = error {
                    return Err(FilterError::Gitignore(error));
                }
                Some(matcher)
            }
            _ => None,
        };

        Ok(Self {
            include,
            exclude,
            smart: rules.smart,
            ignore_hidden: rules.ignore_hidden,
            min_file_size: rules.min_file_size,
            max_file_size: rules.max_file_size,
            gitignore,
        })
    }

    /// Reports whether the entry at `rel_path` participates in the run.
    #[must_use]
    pub fn matches(&self, rel_path: &Path, size: u64, is_dir: bool) -> bool {
        if self.exclude.is_match(rel_path) {
            return false;
        }

        if self.smart && smart_excluded(rel_path) {
            return false;
        }

        if self.ignore_hidden && has_hidden_component(rel_path) {
            return false;
        }

        if let Some(gitignore) = &self.gitignore {
            if gitignore
                .matched_path_or_any_parents(rel_path, is_dir)
                .is_ignore()
            {
                return false;
            }
        }

        if !is_dir {
            if let Some(include) = &self.include {
                if !include.is_match(rel_path) {
                    return false;
                }
            }
            if let Some(min) = self.min_file_size {
                if size < min {
                    return false;
                }
            }
            if let Some(max) = self.max_file_size {
                if size > max {
                    return false;
                }
            }
        }

        true
    }
}

fn build_glob_set(patterns: &[String]) -> Result<GlobSet, FilterError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|source| FilterError::Pattern {
            pattern: pattern.clone(),
            source,
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| FilterError::Pattern {
        pattern: String::new(),
        source,
    })
}

fn smart_excluded(rel_path: &Path) -> bool {
    for component in rel_path.components() {
        let Some(name) = component.as_os_str().to_str() else {
            continue;
        };
        if SMART_EXCLUDED_NAMES.contains(&name) {
            return true;
        }
    }

    rel_path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| {
            SMART_EXCLUDED_SUFFIXES
                .iter()
                .any(|suffix| name.ends_with(suffix))
        })
}

fn has_hidden_component(rel_path: &Path) -> bool {
    rel_path.components().any(|component| {
        component
            .as_os_str()
            .to_str()
            .is_some_and(|name| name.starts_with('.'))
    })
}

/// Error raised while compiling a rule set.
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    /// An include or exclude glob failed to compile.
    #[error("invalid filter pattern '{pattern}': {source}")]
    Pattern {
        /// The pattern that failed to compile.
        pattern: String,
        /// The underlying globset error.
        #[source]
        source: globset::Error,
    },
    /// The gitignore file could not be loaded or parsed.
    #[error("failed to load gitignore rules: {0}")]
    Gitignore(#[source] ignore::Error),
}
