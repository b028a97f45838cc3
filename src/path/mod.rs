//! Immutable path values and the service that creates and compares them.

mod flavor;

pub use flavor::{ParsedPath, PathFlavor};

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use moka::sync::Cache;
use regex::Regex;

use crate::error::{FsError, FsResult};
use crate::name::{normalize, Name, Normalization};

/// An immutable path: an optional root token plus a list of names.
///
/// A path is absolute iff it carries a root. Rendering, URI conversion,
/// equality and ordering all delegate to the owning [`PathService`].
#[derive(Clone)]
pub struct FsPath {
    service: Arc<PathService>,
    root: Option<Name>,
    names: Vec<Name>,
}

impl FsPath {
    /// True iff the path carries a root token.
    pub fn is_absolute(&self) -> bool {
        self.root.is_some()
    }

    /// The root token, if any.
    pub fn root(&self) -> Option<&Name> {
        self.root.as_ref()
    }

    /// The name components, in order.
    pub fn names(&self) -> &[Name] {
        &self.names
    }

    /// The final name component, if any.
    pub fn file_name(&self) -> Option<&Name> {
        self.names.last()
    }

    /// The parent path: same root, all but the last name. `None` when there
    /// is nothing to drop.
    pub fn parent(&self) -> Option<FsPath> {
        if self.names.is_empty() {
            return None;
        }
        let mut names = self.names.clone();
        names.pop();
        if names.is_empty() && self.root.is_none() {
            return None;
        }
        Some(FsPath { service: self.service.clone(), root: self.root.clone(), names })
    }

    /// Resolves `other` against this path: an absolute `other` wins,
    /// otherwise its names append to this path's.
    pub fn resolve(&self, other: &FsPath) -> FsPath {
        if other.is_absolute() {
            return other.clone();
        }
        let mut names = self.names.clone();
        names.extend(other.names.iter().cloned());
        FsPath { service: self.service.clone(), root: self.root.clone(), names }
    }

    /// Resolves a single child name against this path.
    pub fn child(&self, name: Name) -> FsPath {
        let mut names = self.names.clone();
        names.push(name);
        FsPath { service: self.service.clone(), root: self.root.clone(), names }
    }

    /// The service this path belongs to.
    pub fn service(&self) -> &Arc<PathService> {
        &self.service
    }

    /// Emits the URI form of this absolute path, appended to `prefix`
    /// (e.g. `memfs://test`). Directories get a trailing `/`.
    pub fn to_uri(&self, prefix: &str, directory: bool) -> FsResult<String> {
        let root = self
            .root
            .as_ref()
            .ok_or_else(|| FsError::illegal(format!("cannot build a URI from relative path {self}")))?;
        let names: Vec<&str> = self.names.iter().map(Name::display).collect();
        Ok(format!(
            "{prefix}{}",
            self.service.flavor.to_uri_path(root.display(), &names, directory)
        ))
    }

    fn comparison_keys(&self) -> (Option<&str>, Vec<&str>) {
        if self.service.equality_uses_canonical {
            (self.root.as_ref().map(Name::canonical), self.names.iter().map(Name::canonical).collect())
        } else {
            (self.root.as_ref().map(Name::display), self.names.iter().map(Name::display).collect())
        }
    }
}

impl PartialEq for FsPath {
    fn eq(&self, other: &Self) -> bool {
        self.comparison_keys() == other.comparison_keys()
    }
}

impl Eq for FsPath {}

impl Hash for FsPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.comparison_keys().hash(state);
    }
}

impl PartialOrd for FsPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FsPath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.comparison_keys().cmp(&other.comparison_keys())
    }
}

impl fmt::Display for FsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.service.render(self))
    }
}

impl fmt::Debug for FsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FsPath({self})")
    }
}

/// Matcher produced from a `glob:` or `regex:` pattern specification.
#[derive(Clone)]
pub struct PathMatcher {
    regex: Arc<Regex>,
    canonical: bool,
}

impl PathMatcher {
    /// True iff the whole rendered path matches the pattern.
    pub fn matches(&self, path: &FsPath) -> bool {
        let rendered = if self.canonical {
            path.service.render_canonical(path)
        } else {
            path.service.render(path)
        };
        self.regex.is_match(&rendered)
    }
}

/// Factory and comparator for [`FsPath`] values, binding a path flavor to
/// the configured name normalizations.
pub struct PathService {
    flavor: PathFlavor,
    canonical_normalizations: Vec<Normalization>,
    display_normalizations: Vec<Normalization>,
    equality_uses_canonical: bool,
    matcher_cache: Cache<String, Arc<Regex>>,
}

impl PathService {
    /// Creates a service for `flavor` with the given canonical and display
    /// normalization lists.
    pub fn new(
        flavor: PathFlavor,
        canonical_normalizations: Vec<Normalization>,
        display_normalizations: Vec<Normalization>,
        equality_uses_canonical: bool,
    ) -> Arc<Self> {
        Arc::new(PathService {
            flavor,
            canonical_normalizations,
            display_normalizations,
            equality_uses_canonical,
            matcher_cache: Cache::new(64),
        })
    }

    /// The path flavor this service speaks.
    pub fn flavor(&self) -> PathFlavor {
        self.flavor
    }

    /// Builds a [`Name`] from raw input, applying both normalization forms.
    pub fn name(&self, raw: &str) -> Name {
        let display = normalize(raw, &self.display_normalizations).into_owned();
        let canonical = normalize(raw, &self.canonical_normalizations).into_owned();
        Name::new(display, canonical)
    }

    /// Parses a path string into an [`FsPath`].
    pub fn parse(self: &Arc<Self>, input: &str) -> FsResult<FsPath> {
        let parsed = self.flavor.parse(input)?;
        Ok(self.from_parsed(parsed))
    }

    /// Builds a path from an already-split root and name list.
    pub fn from_parsed(self: &Arc<Self>, parsed: ParsedPath) -> FsPath {
        let root = parsed.root.map(|r| self.name(&r));
        let names = parsed.names.iter().map(|n| self.name(n)).collect();
        FsPath { service: self.clone(), root, names }
    }

    /// Builds an absolute or relative path directly from names.
    pub fn path(self: &Arc<Self>, root: Option<Name>, names: Vec<Name>) -> FsPath {
        FsPath { service: self.clone(), root, names }
    }

    /// Builds a relative path of a single name.
    pub fn single(self: &Arc<Self>, name: Name) -> FsPath {
        FsPath { service: self.clone(), root: None, names: vec![name] }
    }

    /// Renders a path using display forms.
    pub fn render(&self, path: &FsPath) -> String {
        let names: Vec<&str> = path.names.iter().map(Name::display).collect();
        self.flavor.render(path.root.as_ref().map(Name::display), &names)
    }

    /// Renders a path using canonical forms; used by canonical matchers.
    pub fn render_canonical(&self, path: &FsPath) -> String {
        let names: Vec<&str> = path.names.iter().map(Name::canonical).collect();
        self.flavor.render(path.root.as_ref().map(Name::canonical), &names)
    }

    /// Parses a URI path (the part after the authority) into an absolute
    /// path.
    pub fn from_uri(self: &Arc<Self>, uri_path: &str) -> FsResult<FsPath> {
        let parsed = self.flavor.from_uri_path(uri_path)?;
        if parsed.root.is_none() {
            return Err(FsError::illegal(format!("URI path {uri_path:?} has no root")));
        }
        Ok(self.from_parsed(parsed))
    }

    /// Compiles a `glob:pattern` or `regex:pattern` specification into a
    /// [`PathMatcher`]. Compiled patterns are cached per specification.
    pub fn path_matcher(&self, specification: &str) -> FsResult<PathMatcher> {
        if let Some(regex) = self.matcher_cache.get(specification) {
            return Ok(PathMatcher { regex, canonical: self.equality_uses_canonical });
        }
        let (syntax, pattern) = specification
            .split_once(':')
            .ok_or_else(|| FsError::illegal(format!("no syntax in matcher spec {specification:?}")))?;
        let raw = match syntax {
            "glob" => crate::glob::to_regex(pattern, self.flavor.separators())?,
            "regex" => pattern.to_string(),
            other => {
                return Err(FsError::unsupported(format!("unknown matcher syntax {other:?}")))
            }
        };
        let compiled = Regex::new(&format!("\\A(?:{raw})\\z")).map_err(|e| FsError::PatternSyntax {
            message: e.to_string(),
            index: 0,
        })?;
        let regex = Arc::new(compiled);
        self.matcher_cache.insert(specification.to_string(), regex.clone());
        Ok(PathMatcher { regex, canonical: self.equality_uses_canonical })
    }
}

impl fmt::Debug for PathService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathService")
            .field("flavor", &self.flavor)
            .field("canonical", &self.canonical_normalizations)
            .field("display", &self.display_normalizations)
            .field("equality_uses_canonical", &self.equality_uses_canonical)
            .finish()
    }
}
