//! Filesystem configuration: a validated builder plus a TOML front end.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::attr::{AttrValue, ProviderRef};
use crate::disk::{DEFAULT_BLOCK_SIZE, DEFAULT_MAX_SIZE};
use crate::error::{FsError, FsResult};
use crate::name::Normalization;
use crate::path::PathFlavor;
use crate::time::{FileTimeSource, SystemTimeSource};
use crate::watch::PollingWatchService;

/// Polling configuration for watch services created by the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchConfig {
    /// Interval between directory re-snapshots.
    pub interval: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        WatchConfig { interval: PollingWatchService::DEFAULT_INTERVAL }
    }
}

/// Immutable, validated configuration of a filesystem instance.
#[derive(Clone)]
pub struct Config {
    pub(crate) path_flavor: PathFlavor,
    pub(crate) roots: Vec<String>,
    pub(crate) working_directory: String,
    pub(crate) name_canonical_normalization: Vec<Normalization>,
    pub(crate) name_display_normalization: Vec<Normalization>,
    pub(crate) path_equality_uses_canonical_form: bool,
    pub(crate) block_size: u64,
    pub(crate) max_size: u64,
    pub(crate) max_cache_size: Option<u64>,
    pub(crate) attribute_views: BTreeSet<String>,
    pub(crate) attribute_providers: Vec<ProviderRef>,
    pub(crate) default_attribute_values: HashMap<String, AttrValue>,
    pub(crate) watch: WatchConfig,
    pub(crate) time_source: Arc<dyn FileTimeSource>,
}

impl Config {
    /// A builder for the given path flavor, preloaded with that flavor's
    /// conventional root and working directory.
    pub fn builder(flavor: PathFlavor) -> ConfigBuilder {
        match flavor {
            PathFlavor::Posix => ConfigBuilder::new(flavor, "/", "/work"),
            PathFlavor::Windows => ConfigBuilder::new(flavor, "C:\\", "C:\\work"),
        }
    }

    /// A plain POSIX filesystem: root `/`, no name normalization.
    pub fn unix() -> ConfigBuilder {
        Config::builder(PathFlavor::Posix)
    }

    /// A Windows-like filesystem: root `C:\`, ASCII-case-insensitive names,
    /// path equality on the canonical form.
    pub fn windows() -> ConfigBuilder {
        Config::builder(PathFlavor::Windows)
            .name_canonical_normalization(&[Normalization::CaseFoldAscii])
            .path_equality_uses_canonical_form(true)
    }

    /// An OS-X-like filesystem: POSIX syntax, decomposed case-insensitive
    /// canonical form, composed display form.
    pub fn osx() -> ConfigBuilder {
        Config::builder(PathFlavor::Posix)
            .name_canonical_normalization(&[Normalization::Nfd, Normalization::CaseFoldAscii])
            .name_display_normalization(&[Normalization::Nfc])
            .path_equality_uses_canonical_form(false)
    }

    /// Parses a TOML document into a validated configuration.
    pub fn from_toml_str(input: &str) -> FsResult<Config> {
        let raw: RawConfig = toml::from_str(input)
            .map_err(|error| FsError::illegal(format!("invalid configuration: {error}")))?;
        raw.into_builder()?.build()
    }

    pub fn path_flavor(&self) -> PathFlavor {
        self.path_flavor
    }

    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    pub fn working_directory(&self) -> &str {
        &self.working_directory
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    pub fn watch(&self) -> WatchConfig {
        self.watch
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("path_flavor", &self.path_flavor)
            .field("roots", &self.roots)
            .field("working_directory", &self.working_directory)
            .field("block_size", &self.block_size)
            .field("max_size", &self.max_size)
            .field("attribute_views", &self.attribute_views)
            .finish()
    }
}

/// Builder for [`Config`]; every option validates at [`build`]
/// (ConfigBuilder::build) time.
pub struct ConfigBuilder {
    path_flavor: PathFlavor,
    roots: Vec<String>,
    working_directory: String,
    name_canonical_normalization: Vec<Normalization>,
    name_display_normalization: Vec<Normalization>,
    path_equality_uses_canonical_form: bool,
    block_size: u64,
    max_size: u64,
    max_cache_size: Option<u64>,
    attribute_views: BTreeSet<String>,
    attribute_providers: Vec<ProviderRef>,
    default_attribute_values: HashMap<String, AttrValue>,
    watch: WatchConfig,
    time_source: Arc<dyn FileTimeSource>,
}

impl ConfigBuilder {
    fn new(flavor: PathFlavor, root: &str, working_directory: &str) -> Self {
        ConfigBuilder {
            path_flavor: flavor,
            roots: vec![root.to_string()],
            working_directory: working_directory.to_string(),
            name_canonical_normalization: Vec::new(),
            name_display_normalization: Vec::new(),
            path_equality_uses_canonical_form: false,
            block_size: DEFAULT_BLOCK_SIZE,
            max_size: DEFAULT_MAX_SIZE,
            max_cache_size: None,
            attribute_views: ["basic".to_string()].into_iter().collect(),
            attribute_providers: Vec::new(),
            default_attribute_values: HashMap::new(),
            watch: WatchConfig::default(),
            time_source: Arc::new(SystemTimeSource),
        }
    }

    /// Replaces the set of root tokens.
    pub fn roots(mut self, roots: &[&str]) -> Self {
        self.roots = roots.iter().map(|root| root.to_string()).collect();
        self
    }

    /// Sets the directory relative paths resolve against; must be absolute
    /// and under a configured root.
    pub fn working_directory(mut self, path: &str) -> Self {
        self.working_directory = path.to_string();
        self
    }

    /// Normalizations applied to produce a name's canonical form.
    pub fn name_canonical_normalization(mut self, normalizations: &[Normalization]) -> Self {
        self.name_canonical_normalization = normalizations.to_vec();
        self
    }

    /// Normalizations applied to produce a name's display form.
    pub fn name_display_normalization(mut self, normalizations: &[Normalization]) -> Self {
        self.name_display_normalization = normalizations.to_vec();
        self
    }

    /// Whether path equality and hashing use the canonical form (true) or
    /// the display form (false).
    pub fn path_equality_uses_canonical_form(mut self, canonical: bool) -> Self {
        self.path_equality_uses_canonical_form = canonical;
        self
    }

    pub fn block_size(mut self, bytes: u64) -> Self {
        self.block_size = bytes;
        self
    }

    /// Total disk capacity; rounded down to a block multiple.
    pub fn max_size(mut self, bytes: u64) -> Self {
        self.max_size = bytes;
        self
    }

    /// Bound on cached freed blocks; `None` keeps the cache unbounded.
    pub fn max_cache_size(mut self, blocks: Option<u64>) -> Self {
        self.max_cache_size = blocks;
        self
    }

    /// Enables the named attribute views (e.g. `posix`, `dos`); `basic` is
    /// always enabled.
    pub fn attribute_views(mut self, views: &[&str]) -> Self {
        self.attribute_views.extend(views.iter().map(|view| view.to_string()));
        self
    }

    /// Registers an extra user-supplied attribute provider.
    pub fn attribute_provider(mut self, provider: ProviderRef) -> Self {
        self.attribute_providers.push(provider);
        self
    }

    /// Overrides the initial value of an attribute, keyed `view:attr`.
    pub fn default_attribute_value(mut self, key: &str, value: AttrValue) -> Self {
        self.default_attribute_values.insert(key.to_string(), value);
        self
    }

    /// Polling configuration for watch services.
    pub fn watch_service_configuration(mut self, watch: WatchConfig) -> Self {
        self.watch = watch;
        self
    }

    /// Substitutes the clock used for file timestamps.
    pub fn file_time_source(mut self, source: Arc<dyn FileTimeSource>) -> Self {
        self.time_source = source;
        self
    }

    /// Validates every option and produces the configuration.
    pub fn build(self) -> FsResult<Config> {
        if self.roots.is_empty() {
            return Err(FsError::illegal("at least one root is required"));
        }
        for root in &self.roots {
            if !self.path_flavor.is_valid_root(root) {
                return Err(FsError::illegal(format!(
                    "invalid root {root:?} for {:?} paths",
                    self.path_flavor
                )));
            }
        }

        check_normalizations(&self.name_canonical_normalization)?;
        check_normalizations(&self.name_display_normalization)?;

        if self.block_size == 0 {
            return Err(FsError::illegal("block size must be positive"));
        }
        if self.max_size < self.block_size {
            return Err(FsError::illegal("max size must hold at least one block"));
        }

        let parsed_workdir = self.path_flavor.parse(&self.working_directory)?;
        let workdir_root = parsed_workdir
            .root
            .ok_or_else(|| {
                FsError::illegal(format!(
                    "working directory {:?} must be absolute",
                    self.working_directory
                ))
            })?;
        let canonical_root = |root: &str| {
            crate::name::normalize(root, &self.name_canonical_normalization).into_owned()
        };
        let workdir_root_canonical = canonical_root(&workdir_root);
        if !self.roots.iter().any(|root| canonical_root(root) == workdir_root_canonical) {
            return Err(FsError::illegal(format!(
                "working directory {:?} is not under a configured root",
                self.working_directory
            )));
        }

        for key in self.default_attribute_values.keys() {
            let well_formed = match key.split_once(':') {
                Some((view, attribute)) => {
                    !view.is_empty() && !attribute.is_empty() && !attribute.contains(':')
                }
                None => false,
            };
            if !well_formed {
                return Err(FsError::illegal(format!(
                    "malformed default attribute key {key:?}"
                )));
            }
        }

        Ok(Config {
            path_flavor: self.path_flavor,
            roots: self.roots,
            working_directory: self.working_directory,
            name_canonical_normalization: self.name_canonical_normalization,
            name_display_normalization: self.name_display_normalization,
            path_equality_uses_canonical_form: self.path_equality_uses_canonical_form,
            block_size: self.block_size,
            max_size: self.max_size,
            max_cache_size: self.max_cache_size,
            attribute_views: self.attribute_views,
            attribute_providers: self.attribute_providers,
            default_attribute_values: self.default_attribute_values,
            watch: self.watch,
            time_source: self.time_source,
        })
    }
}

fn check_normalizations(normalizations: &[Normalization]) -> FsResult<()> {
    let forms = normalizations.iter().filter(|n| n.is_unicode_form()).count();
    let folds = normalizations.iter().filter(|n| n.is_case_fold()).count();
    if forms > 1 || folds > 1 {
        return Err(FsError::illegal(format!(
            "conflicting normalizations {normalizations:?}: at most one form and one case fold"
        )));
    }
    Ok(())
}

/// Serde shape of the TOML configuration file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawConfig {
    path_type: RawPathType,
    roots: Option<Vec<String>>,
    working_directory: Option<String>,
    #[serde(default)]
    name_canonical_normalization: Vec<Normalization>,
    #[serde(default)]
    name_display_normalization: Vec<Normalization>,
    #[serde(default)]
    path_equality_uses_canonical_form: bool,
    block_size: Option<u64>,
    max_size: Option<u64>,
    /// `-1` keeps the cache unbounded.
    max_cache_size: Option<i64>,
    #[serde(default)]
    attribute_views: Vec<String>,
    watch_service: Option<RawWatchConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum RawPathType {
    Posix,
    Windows,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawWatchConfig {
    polling_interval_ms: u64,
}

impl RawConfig {
    fn into_builder(self) -> FsResult<ConfigBuilder> {
        let flavor = match self.path_type {
            RawPathType::Posix => PathFlavor::Posix,
            RawPathType::Windows => PathFlavor::Windows,
        };
        let mut builder = Config::builder(flavor);
        if let Some(roots) = self.roots {
            let refs: Vec<&str> = roots.iter().map(String::as_str).collect();
            builder = builder.roots(&refs);
        }
        if let Some(working_directory) = self.working_directory {
            builder = builder.working_directory(&working_directory);
        }
        builder = builder
            .name_canonical_normalization(&self.name_canonical_normalization)
            .name_display_normalization(&self.name_display_normalization)
            .path_equality_uses_canonical_form(self.path_equality_uses_canonical_form);
        if let Some(block_size) = self.block_size {
            builder = builder.block_size(block_size);
        }
        if let Some(max_size) = self.max_size {
            builder = builder.max_size(max_size);
        }
        if let Some(max_cache_size) = self.max_cache_size {
            builder = builder.max_cache_size(if max_cache_size < 0 {
                None
            } else {
                Some(max_cache_size as u64)
            });
        }
        if !self.attribute_views.is_empty() {
            let refs: Vec<&str> = self.attribute_views.iter().map(String::as_str).collect();
            builder = builder.attribute_views(&refs);
        }
        if let Some(watch) = self.watch_service {
            builder = builder.watch_service_configuration(WatchConfig {
                interval: Duration::from_millis(watch.polling_interval_ms),
            });
        }
        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_build() {
        assert!(Config::unix().build().is_ok());
        assert!(Config::windows().build().is_ok());
        assert!(Config::osx().build().is_ok());
    }

    #[test]
    fn invalid_root_for_flavor_is_rejected() {
        let result = Config::builder(PathFlavor::Posix).roots(&["C:\\"]).build();
        assert!(matches!(result, Err(FsError::IllegalArgument(_))));

        let result = Config::builder(PathFlavor::Windows)
            .roots(&["/"])
            .working_directory("C:\\work")
            .build();
        assert!(matches!(result, Err(FsError::IllegalArgument(_))));
    }

    #[test]
    fn relative_working_directory_is_rejected() {
        let result = Config::unix().working_directory("work").build();
        assert!(matches!(result, Err(FsError::IllegalArgument(_))));
    }

    #[test]
    fn working_directory_outside_roots_is_rejected() {
        let result = Config::builder(PathFlavor::Windows)
            .roots(&["C:\\"])
            .working_directory("D:\\work")
            .build();
        assert!(matches!(result, Err(FsError::IllegalArgument(_))));
    }

    #[test]
    fn duplicate_normalization_groups_are_rejected() {
        let result = Config::unix()
            .name_canonical_normalization(&[Normalization::Nfc, Normalization::Nfd])
            .build();
        assert!(matches!(result, Err(FsError::IllegalArgument(_))));

        let result = Config::unix()
            .name_display_normalization(&[
                Normalization::CaseFoldAscii,
                Normalization::CaseFoldUnicode,
            ])
            .build();
        assert!(matches!(result, Err(FsError::IllegalArgument(_))));
    }

    #[test]
    fn malformed_default_attribute_keys_are_rejected() {
        let result = Config::unix()
            .default_attribute_value("permissions", AttrValue::Bool(true))
            .build();
        assert!(matches!(result, Err(FsError::IllegalArgument(_))));

        let result = Config::unix()
            .default_attribute_value("posix:a:b", AttrValue::Bool(true))
            .build();
        assert!(matches!(result, Err(FsError::IllegalArgument(_))));
    }

    #[test]
    fn toml_round_trip_covers_the_surface() {
        let config = Config::from_toml_str(
            r#"
            path-type = "posix"
            roots = ["/"]
            working-directory = "/home"
            block-size = 1024
            max-size = 65536
            max-cache-size = -1
            name-canonical-normalization = ["nfd", "case-fold-ascii"]
            name-display-normalization = ["nfc"]
            attribute-views = ["posix", "user"]

            [watch-service]
            polling-interval-ms = 20
            "#,
        )
        .unwrap();
        assert_eq!(config.block_size(), 1024);
        assert_eq!(config.working_directory(), "/home");
        assert_eq!(config.watch().interval, Duration::from_millis(20));
        assert!(config.attribute_views.contains("posix"));
    }

    #[test]
    fn toml_with_unknown_keys_fails() {
        let result = Config::from_toml_str("path-type = \"posix\"\nnot-an-option = 3\n");
        assert!(matches!(result, Err(FsError::IllegalArgument(_))));
    }
}
