//! Pattern validation and alternation merging.
//!
//! Small pattern sets are evaluated one regex per pattern. Past a threshold
//! the patterns are packed greedily into `(?:a)|(?:b)|...` alternation groups
//! so a filter pass costs a handful of regex evaluations instead of hundreds,
//! with a source-length ceiling per group to keep each compiled program small.

use regex::Regex;
use tracing::debug;

use crate::error::{GondolaError, Result};

/// A validated pattern set compiled into one or more evaluation groups.
///
/// A name matches the filter when any group finds the pattern anywhere in
/// the name (search semantics, same as the catalog's REGEXP operator).
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    sources: Vec<String>,
    groups: Vec<Regex>,
}

impl CompiledFilter {
    /// The original input patterns, in order.
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// The compiled evaluation groups.
    pub fn groups(&self) -> &[Regex] {
        &self.groups
    }

    /// Pattern strings of the evaluation groups, for handing to the
    /// catalog's REGEXP operator as bind parameters.
    pub fn group_sources(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|g| g.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// True when any group matches anywhere in `name`.
    pub fn matches(&self, name: &str) -> bool {
        self.groups.iter().any(|g| g.is_match(name))
    }
}

/// Validates every pattern against the regex engine, failing fast on the
/// first invalid one with its 1-based position and the engine's reason.
pub fn validate_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<()> {
    for (i, pattern) in patterns.iter().enumerate() {
        Regex::new(pattern.as_ref()).map_err(|e| GondolaError::InvalidPattern {
            index: i + 1,
            reason: e.to_string(),
        })?;
    }
    Ok(())
}

/// Validates `patterns` and compiles them into a [`CompiledFilter`].
///
/// Below `merge_threshold` patterns each gets its own group. At or above it,
/// patterns are wrapped as `(?:p)` and packed greedily into alternations no
/// longer than `max_group_len` source characters; a pattern that alone
/// exceeds the ceiling still becomes its own group. A merged group that the
/// engine rejects (patterns can be individually valid yet clash when
/// combined, duplicate named captures for instance) falls back to one group
/// per member, so merging never changes which names match.
pub fn compile_patterns<S: AsRef<str>>(
    patterns: &[S],
    merge_threshold: usize,
    max_group_len: usize,
) -> Result<CompiledFilter> {
    validate_patterns(patterns)?;
    let sources: Vec<String> = patterns.iter().map(|p| p.as_ref().to_string()).collect();

    if sources.len() < merge_threshold {
        let mut groups = Vec::with_capacity(sources.len());
        for source in &sources {
            groups.push(compile_one(source)?);
        }
        return Ok(CompiledFilter { sources, groups });
    }

    let mut groups = Vec::new();
    for members in pack_members(&sources, max_group_len) {
        if members.len() == 1 {
            groups.push(compile_one(members[0])?);
            continue;
        }
        let merged = members
            .iter()
            .map(|p| format!("(?:{p})"))
            .collect::<Vec<_>>()
            .join("|");
        match Regex::new(&merged) {
            Ok(group) => groups.push(group),
            Err(e) => {
                debug!(
                    members = members.len(),
                    error = %e,
                    "merged group failed to compile, using individual patterns"
                );
                for member in members {
                    groups.push(compile_one(member)?);
                }
            }
        }
    }
    debug!(
        patterns = sources.len(),
        groups = groups.len(),
        "compiled pattern filter"
    );
    Ok(CompiledFilter { sources, groups })
}

fn compile_one(source: &str) -> Result<Regex> {
    // Already validated; kept fallible so a slip surfaces as an error,
    // not a panic.
    Regex::new(source).map_err(|e| GondolaError::InvalidPattern {
        index: 1,
        reason: e.to_string(),
    })
}

/// Greedy packing: consecutive patterns share a group while the merged
/// source (wrapped members plus `|` separators) stays under `max_group_len`.
fn pack_members(sources: &[String], max_group_len: usize) -> Vec<Vec<&String>> {
    let mut packed: Vec<Vec<&String>> = Vec::new();
    let mut current: Vec<&String> = Vec::new();
    let mut current_len = 0usize;

    for source in sources {
        // "(?:" + source + ")" plus a "|" separator when not first.
        let wrapped_len = source.len() + 4;
        if !current.is_empty() && current_len + 1 + wrapped_len > max_group_len {
            packed.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current_len += if current.is_empty() {
            wrapped_len
        } else {
            1 + wrapped_len
        };
        current.push(source);
    }
    if !current.is_empty() {
        packed.push(current);
    }
    packed
}
