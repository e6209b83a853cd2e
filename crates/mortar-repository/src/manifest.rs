//! Package and repository manifests.
//!
//! Manifests are line-oriented `key: value` documents. A package manifest
//! carries the package identity, its type, its `depends` clauses, and the
//! per-distribution system package name mapping. Multiple manifests in one
//! file are separated by `:` lines.
//!
//! The `depends` value grammar:
//!
//! ```text
//! depends  := ['*'] alternative { '|' alternative }
//! alternative := deps [constraint] ['?' '(' expr ')'] block*
//! deps     := dep | '{' dep+ '}'
//! dep      := name [constraint]
//! block    := 'prefer' '{' assignments '}' 'accept' '(' expr ')'
//!           | 'require' '{' assignments '}'
//!           | 'reflect' '{' assignments '}'
//! ```
//!
//! A constraint after a `{...}` group applies to every dependency in the
//! group. A leading `*` marks the clause as build-time. Expressions and
//! assignments are kept as text; the resolver's package skeleton evaluates
//! them against its candidate configuration.

use crate::error::{RepositoryError, Result};
use crate::location::RepositoryLocation;
use mortar_core::{PackageName, Version, VersionConstraint};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Names that denote the toolchain itself in build-time dependencies.
/// Such dependencies are satisfied externally and never collected.
pub const TOOLCHAIN_NAMES: &[&str] = &["mortar", "brick"];

/// A single dependency: a package name with an optional constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// Dependency package name.
    pub name: PackageName,
    /// Version constraint, absent means any version.
    pub constraint: Option<VersionConstraint>,
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.constraint {
            Some(c) => write!(f, "{} {c}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// One `|`-separated choice inside a `depends` clause.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DependencyAlternative {
    /// The dependencies this alternative brings in.
    pub dependencies: Vec<Dependency>,
    /// Enable condition; the alternative is considered only when it holds.
    pub enable: Option<String>,
    /// Variable assignments applied after the alternative is selected.
    pub reflect: Option<String>,
    /// Preferred dependency configuration, negotiable.
    pub prefer: Option<String>,
    /// Acceptance condition for a negotiated configuration.
    pub accept: Option<String>,
    /// Non-negotiable dependency configuration.
    pub require: Option<String>,
}

impl DependencyAlternative {
    /// Whether this alternative carries dependency configuration
    /// (a `prefer`/`accept` pair or a `require` block).
    #[must_use]
    pub fn has_config(&self) -> bool {
        self.prefer.is_some() || self.require.is_some()
    }
}

/// One `depends` clause: a sequence of alternatives.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DependencyAlternatives {
    /// Whether this is a build-time dependency clause.
    pub buildtime: bool,
    /// Trailing clause comment.
    pub comment: String,
    /// The alternatives, in manifest order.
    pub alternatives: Vec<DependencyAlternative>,
}

impl DependencyAlternatives {
    /// Whether this is a toolchain build-time clause (satisfied externally).
    #[must_use]
    pub fn is_toolchain(&self) -> bool {
        self.buildtime
            && self.alternatives.iter().all(|a| {
                a.dependencies
                    .iter()
                    .all(|d| TOOLCHAIN_NAMES.contains(&d.name.as_str()))
            })
    }
}

/// Package type, from the manifest `type` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageType {
    /// A library.
    Lib,
    /// An executable.
    #[default]
    Exe,
    /// Something else.
    Other,
}

/// A package manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    /// Package name.
    pub name: PackageName,
    /// Package version.
    pub version: Version,
    /// One-line summary.
    pub summary: String,
    /// Package type.
    pub r#type: PackageType,
    /// Whether a library is header-only (`binless` type sub-option).
    pub binless: bool,
    /// The `depends` clauses, in manifest order.
    pub depends: Vec<DependencyAlternatives>,
    /// System package name mapping: manifest key (`debian-name`,
    /// `debian_12-name`, ...) to the space-separated system package names.
    pub system_names: BTreeMap<String, String>,
}

impl PackageManifest {
    /// Parse a single package manifest.
    pub fn parse(text: &str) -> Result<Self> {
        let mut docs = parse_documents(text)?;
        match docs.len() {
            1 => Ok(docs.remove(0)),
            n => Err(RepositoryError::manifest(format!(
                "expected one package manifest, found {n}"
            ))),
        }
    }

    /// Parse a multi-package manifest file (documents separated by `:`
    /// lines), e.g. the `packages.manifest` of a repository fragment.
    pub fn parse_all(text: &str) -> Result<Vec<Self>> {
        parse_documents(text)
    }
}

fn parse_documents(text: &str) -> Result<Vec<PackageManifest>> {
    let mut docs = Vec::new();
    let mut current: Vec<(usize, &str, &str)> = Vec::new();

    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line == ":" || line.starts_with(": ") {
            if !current.is_empty() {
                docs.push(build_manifest(&current)?);
                current.clear();
            }
            continue;
        }
        let (key, value) = line.split_once(':').ok_or_else(|| {
            RepositoryError::manifest_at(lineno + 1, format!("expected 'key: value', got '{line}'"))
        })?;
        current.push((lineno + 1, key.trim(), value.trim()));
    }
    if !current.is_empty() {
        docs.push(build_manifest(&current)?);
    }
    Ok(docs)
}

fn build_manifest(entries: &[(usize, &str, &str)]) -> Result<PackageManifest> {
    let mut name = None;
    let mut version = None;
    let mut summary = String::new();
    let mut r#type = PackageType::default();
    let mut binless = false;
    let mut depends = Vec::new();
    let mut system_names = BTreeMap::new();

    for &(line, key, value) in entries {
        match key {
            "name" => {
                name = Some(
                    PackageName::parse(value)
                        .map_err(|e| RepositoryError::manifest_at(line, e.to_string()))?,
                );
            }
            "version" => {
                version = Some(
                    Version::parse(value)
                        .map_err(|e| RepositoryError::manifest_at(line, e.to_string()))?,
                );
            }
            "summary" => summary = value.to_string(),
            "type" => {
                let mut opts = value.split(',').map(str::trim);
                r#type = match opts.next() {
                    Some("lib") => PackageType::Lib,
                    Some("exe") | None => PackageType::Exe,
                    Some(_) => PackageType::Other,
                };
                binless = opts.any(|o| o == "binless");
            }
            "depends" => {
                depends.push(
                    parse_depends(value)
                        .map_err(|e| RepositoryError::manifest_at(line, e.to_string()))?,
                );
            }
            k if k.ends_with("-name") => {
                system_names.insert(k.to_string(), value.to_string());
            }
            // Unknown keys are ignored for forward compatibility.
            _ => {}
        }
    }

    Ok(PackageManifest {
        name: name.ok_or_else(|| RepositoryError::manifest("missing 'name'"))?,
        version: version.ok_or_else(|| RepositoryError::manifest("missing 'version'"))?,
        summary,
        r#type,
        binless,
        depends,
        system_names,
    })
}

/// Parse one `depends` clause value.
pub fn parse_depends(value: &str) -> Result<DependencyAlternatives> {
    let mut s = value.trim();

    let buildtime = if let Some(rest) = s.strip_prefix('*') {
        s = rest.trim_start();
        true
    } else {
        false
    };

    // A trailing `; comment` outside any block is a clause comment.
    let (body, comment) = split_comment(s);

    let mut alternatives = Vec::new();
    for alt in split_top_level(body, '|') {
        alternatives.push(parse_alternative(alt.trim())?);
    }
    if alternatives.is_empty() {
        return Err(RepositoryError::manifest("empty depends clause"));
    }

    Ok(DependencyAlternatives {
        buildtime,
        comment,
        alternatives,
    })
}

/// Split off a trailing top-level `; comment`.
fn split_comment(s: &str) -> (&str, String) {
    let mut depth = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '{' | '(' | '[' => depth += 1,
            '}' | ')' | ']' => depth = depth.saturating_sub(1),
            ';' if depth == 0 => {
                return (s[..i].trim_end(), s[i + 1..].trim().to_string());
            }
            _ => {}
        }
    }
    (s, String::new())
}

/// Split on a separator at brace/paren/bracket depth zero.
fn split_top_level(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '{' | '(' | '[' => depth += 1,
            '}' | ')' | ']' => depth = depth.saturating_sub(1),
            c if c == sep && depth == 0 => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

struct Cursor<'a> {
    s: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(s: &'a str) -> Self {
        Self { s, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.s[self.pos..]
    }

    fn skip_ws(&mut self) {
        let rest = self.rest();
        let trimmed = rest.trim_start();
        self.pos += rest.len() - trimmed.len();
    }

    fn eof(&mut self) -> bool {
        self.skip_ws();
        self.pos >= self.s.len()
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_ws();
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.rest().chars().next()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    /// Read a bare word (up to whitespace or a delimiter).
    fn word(&mut self) -> &'a str {
        self.skip_ws();
        let rest = self.rest();
        let end = rest
            .find(|c: char| c.is_whitespace() || matches!(c, '{' | '}' | '(' | ')' | '|' | '?'))
            .unwrap_or(rest.len());
        self.pos += end;
        &rest[..end]
    }

    /// Expect and consume the given delimiter, then read the balanced body
    /// up to its matching close.
    fn balanced(&mut self, open: char, close: char) -> Result<&'a str> {
        self.skip_ws();
        if self.peek() != Some(open) {
            return Err(RepositoryError::manifest(format!(
                "expected '{open}' at '{}'",
                self.rest()
            )));
        }
        self.bump();
        let start = self.pos;
        let mut depth = 1usize;
        while let Some(c) = self.bump() {
            if c == open {
                depth += 1;
            } else if c == close {
                depth -= 1;
                if depth == 0 {
                    return Ok(self.s[start..self.pos - close.len_utf8()].trim());
                }
            }
        }
        Err(RepositoryError::manifest(format!(
            "unbalanced '{open}' in depends clause"
        )))
    }
}

const BLOCK_KEYWORDS: &[&str] = &["prefer", "accept", "require", "reflect"];

fn parse_alternative(s: &str) -> Result<DependencyAlternative> {
    let mut cur = Cursor::new(s);
    let mut alt = DependencyAlternative::default();

    // Dependencies: either a braced group or a single name.
    if cur.peek() == Some('{') {
        let group = cur.balanced('{', '}')?;
        let mut inner = Cursor::new(group);
        while !inner.eof() {
            let name = inner.word();
            alt.dependencies.push(Dependency {
                name: PackageName::parse(name)
                    .map_err(|e| RepositoryError::manifest(e.to_string()))?,
                constraint: None,
            });
        }
        if alt.dependencies.is_empty() {
            return Err(RepositoryError::manifest("empty dependency group"));
        }
        // A constraint after the group applies to every member.
        if let Some(c) = parse_constraint_text(&mut cur)? {
            for dep in &mut alt.dependencies {
                dep.constraint = Some(c.clone());
            }
        }
    } else {
        let name = cur.word();
        if name.is_empty() {
            return Err(RepositoryError::manifest("missing dependency name"));
        }
        let name =
            PackageName::parse(name).map_err(|e| RepositoryError::manifest(e.to_string()))?;
        let constraint = parse_constraint_text(&mut cur)?;
        alt.dependencies.push(Dependency { name, constraint });
    }

    // Enable condition.
    if cur.peek() == Some('?') {
        cur.bump();
        alt.enable = Some(cur.balanced('(', ')')?.to_string());
    }

    // Configuration blocks.
    while !cur.eof() {
        let kw = cur.word();
        match kw {
            "prefer" => {
                alt.prefer = Some(cur.balanced('{', '}')?.to_string());
            }
            "accept" => {
                alt.accept = Some(cur.balanced('(', ')')?.to_string());
            }
            "require" => {
                alt.require = Some(cur.balanced('{', '}')?.to_string());
            }
            "reflect" => {
                alt.reflect = Some(cur.balanced('{', '}')?.to_string());
            }
            other => {
                return Err(RepositoryError::manifest(format!(
                    "unexpected '{other}' in depends clause"
                )));
            }
        }
    }

    // `prefer` and `accept` come in pairs; `require` excludes both.
    if alt.prefer.is_some() != alt.accept.is_some() {
        return Err(RepositoryError::manifest(
            "'prefer' requires a matching 'accept'",
        ));
    }
    if alt.require.is_some() && alt.prefer.is_some() {
        return Err(RepositoryError::manifest(
            "'require' cannot be combined with 'prefer'/'accept'",
        ));
    }

    Ok(alt)
}

/// Read an optional constraint: everything up to `?`, a block keyword, or
/// the end of the alternative.
fn parse_constraint_text(cur: &mut Cursor<'_>) -> Result<Option<VersionConstraint>> {
    cur.skip_ws();
    let start = cur.pos;
    let mut end = start;

    loop {
        cur.skip_ws();
        if cur.pos >= cur.s.len() {
            break;
        }
        let rest = cur.rest();
        if rest.starts_with('?') {
            break;
        }
        // A range constraint is a single balanced token.
        if rest.starts_with('[') || rest.starts_with('(') {
            let open = if rest.starts_with('[') { '[' } else { '(' };
            let close = if open == '[' { ']' } else { ')' };
            // Scan to the matching close, accepting either bracket kind
            // to support half-open ranges like `[1.0 2.0)`.
            let mut found = None;
            for (i, c) in rest.char_indices().skip(1) {
                if c == close || c == ']' || c == ')' {
                    found = Some(i + c.len_utf8());
                    break;
                }
            }
            let Some(len) = found else {
                return Err(RepositoryError::manifest(format!(
                    "unbalanced '{open}' in constraint"
                )));
            };
            cur.pos += len;
            end = cur.pos;
            continue;
        }
        let word_start = cur.pos;
        let word = cur.word();
        if word.is_empty() || BLOCK_KEYWORDS.contains(&word) {
            cur.pos = word_start;
            break;
        }
        end = cur.pos;
    }

    let text = cur.s[start..end].trim();
    if text.is_empty() {
        return Ok(None);
    }
    VersionConstraint::parse(text)
        .map(Some)
        .map_err(|e| RepositoryError::manifest(e.to_string()))
}

/// Role of a repository named by another repository's manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryRole {
    /// The repository itself.
    Base,
    /// Must be fetched to satisfy this repository's dependencies.
    Prerequisite,
    /// Part of the same logical repository.
    Complement,
}

/// One entry of a fragment's `repositories.manifest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryManifest {
    /// Referenced repository location.
    pub location: RepositoryLocation,
    /// Relationship to the declaring repository.
    pub role: RepositoryRole,
}

impl RepositoryManifest {
    /// Parse a `repositories.manifest` file.
    pub fn parse_all(text: &str) -> Result<Vec<Self>> {
        let mut out = Vec::new();
        let mut location: Option<RepositoryLocation> = None;
        let mut role = RepositoryRole::Prerequisite;

        let mut flush = |location: &mut Option<RepositoryLocation>,
                         role: &mut RepositoryRole,
                         out: &mut Vec<Self>| {
            if let Some(loc) = location.take() {
                out.push(Self {
                    location: loc,
                    role: *role,
                });
            }
            *role = RepositoryRole::Prerequisite;
        };

        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line == ":" || line.starts_with(": ") {
                flush(&mut location, &mut role, &mut out);
                continue;
            }
            let (key, value) = line.split_once(':').ok_or_else(|| {
                RepositoryError::manifest_at(lineno + 1, format!("expected 'key: value', got '{line}'"))
            })?;
            match key.trim() {
                "location" => location = Some(RepositoryLocation::parse(value.trim())?),
                "role" => {
                    role = match value.trim() {
                        "base" => RepositoryRole::Base,
                        "prerequisite" => RepositoryRole::Prerequisite,
                        "complement" => RepositoryRole::Complement,
                        other => {
                            return Err(RepositoryError::manifest_at(
                                lineno + 1,
                                format!("unknown role '{other}'"),
                            ));
                        }
                    };
                }
                _ => {}
            }
        }
        flush(&mut location, &mut role, &mut out);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_minimal_manifest() {
        let m = PackageManifest::parse(
            ": 1\nname: libfoo\nversion: 1.2.3\nsummary: Foo library\ntype: lib\n",
        )
        .unwrap();
        assert_eq!(m.name.as_str(), "libfoo");
        assert_eq!(m.version, Version::parse("1.2.3").unwrap());
        assert_eq!(m.r#type, PackageType::Lib);
        assert!(!m.binless);
        assert!(m.depends.is_empty());
    }

    #[test]
    fn test_parse_binless_suboption() {
        let m =
            PackageManifest::parse("name: libhdr\nversion: 1.0.0\ntype: lib,binless\n").unwrap();
        assert!(m.binless);
    }

    #[test]
    fn test_parse_multiple_documents() {
        let all = PackageManifest::parse_all(
            ": 1\nname: libfoo\nversion: 1.0.0\n:\nname: libbar\nversion: 2.0.0\n",
        )
        .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].name.as_str(), "libbar");
    }

    #[test]
    fn test_depends_simple() {
        let d = parse_depends("libbar >= 1.0.0").unwrap();
        assert!(!d.buildtime);
        assert_eq!(d.alternatives.len(), 1);
        let dep = &d.alternatives[0].dependencies[0];
        assert_eq!(dep.name.as_str(), "libbar");
        assert_eq!(
            dep.constraint,
            Some(VersionConstraint::parse(">= 1.0.0").unwrap())
        );
    }

    #[test]
    fn test_depends_buildtime_toolchain() {
        let d = parse_depends("* brick >= 0.15.0").unwrap();
        assert!(d.buildtime);
        assert!(d.is_toolchain());
    }

    #[test]
    fn test_depends_alternatives() {
        let d = parse_depends("libssl >= 1.1.0 | libcrypto >= 1.1.0").unwrap();
        assert_eq!(d.alternatives.len(), 2);
        assert_eq!(d.alternatives[1].dependencies[0].name.as_str(), "libcrypto");
    }

    #[test]
    fn test_depends_group_constraint() {
        let d = parse_depends("{libfoo libbar} ^1.2.0").unwrap();
        let deps = &d.alternatives[0].dependencies;
        assert_eq!(deps.len(), 2);
        assert!(deps.iter().all(|dep| dep.constraint.is_some()));
    }

    #[test]
    fn test_depends_enable_and_reflect() {
        let d = parse_depends(
            "libbar ^1.0.0 ? (config.libfoo.extras) reflect { config.libfoo.with_bar = true }",
        )
        .unwrap();
        let alt = &d.alternatives[0];
        assert_eq!(alt.enable.as_deref(), Some("config.libfoo.extras"));
        assert_eq!(
            alt.reflect.as_deref(),
            Some("config.libfoo.with_bar = true")
        );
    }

    #[test]
    fn test_depends_prefer_accept() {
        let d = parse_depends(
            "libcommon prefer { config.libcommon.shared = true } accept (config.libcommon.shared)",
        )
        .unwrap();
        let alt = &d.alternatives[0];
        assert!(alt.has_config());
        assert_eq!(
            alt.prefer.as_deref(),
            Some("config.libcommon.shared = true")
        );
        assert_eq!(alt.accept.as_deref(), Some("config.libcommon.shared"));
    }

    #[test]
    fn test_depends_require() {
        let d = parse_depends("libcommon require { config.libcommon.fast = true }").unwrap();
        assert!(d.alternatives[0].has_config());
    }

    #[test]
    fn test_depends_prefer_without_accept_rejected() {
        assert!(parse_depends("libcommon prefer { x = true }").is_err());
    }

    #[test]
    fn test_depends_range_constraint() {
        let d = parse_depends("libbar [1.0.0 2.0.0)").unwrap();
        let c = d.alternatives[0].dependencies[0].constraint.clone().unwrap();
        assert!(c.satisfies(&Version::parse("1.5.0").unwrap()));
        assert!(!c.satisfies(&Version::parse("2.0.0").unwrap()));
    }

    #[test]
    fn test_depends_comment() {
        let d = parse_depends("libbar; Bar is optional in theory.").unwrap();
        assert_eq!(d.comment, "Bar is optional in theory.");
        assert_eq!(d.alternatives[0].dependencies[0].name.as_str(), "libbar");
    }

    #[test]
    fn test_system_name_keys() {
        let m = PackageManifest::parse(
            "name: libfoo\nversion: 1.0.0\ndebian-name: libfoo-dev\ndebian_12-name: libfoo12-dev\n",
        )
        .unwrap();
        assert_eq!(m.system_names.get("debian-name").unwrap(), "libfoo-dev");
        assert_eq!(
            m.system_names.get("debian_12-name").unwrap(),
            "libfoo12-dev"
        );
    }

    #[test]
    fn test_repositories_manifest() {
        let rs = RepositoryManifest::parse_all(
            ": 1\nlocation: git+https://example.org/foo.git\nrole: complement\n:\nlocation: dir+/srv/repo\nrole: prerequisite\n",
        )
        .unwrap();
        assert_eq!(rs.len(), 2);
        assert_eq!(rs[0].role, RepositoryRole::Complement);
        assert_eq!(rs[1].role, RepositoryRole::Prerequisite);
    }
}
