//! Per-file metadata grouped into attribute views.
//!
//! A view (`basic`, `owner`, `posix`, `unix`, `dos`, `acl`, `user`) is
//! implemented by an [`AttributeProvider`]; the [`AttributeService`]
//! composes the enabled providers, seeds default values onto new files and
//! routes string-keyed reads and writes of the form `view:attribute`.

mod acl;
mod basic;
mod dos;
mod owner;
mod posix;
mod provider;
mod unix;
mod user;

pub use acl::{AclEntry, AclEntryKind};
pub use posix::PosixPermissions;
pub use provider::{AttributeProvider, ProviderRef};

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::error::{FsError, FsResult};
use crate::file::File;
use crate::time::FileTime;

/// A named user, identified by name only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserPrincipal(pub String);

/// A named group, identified by name only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupPrincipal(pub String);

/// The runtime value of an attribute.
///
/// Setters accept a small set of compatible representations per attribute
/// (`Int` widens to `Long`, `String` forms are parsed where a canonical
/// parse exists).
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Bool(bool),
    Int(i32),
    Long(i64),
    String(String),
    Time(FileTime),
    Bytes(Vec<u8>),
    Permissions(PosixPermissions),
    User(UserPrincipal),
    Group(GroupPrincipal),
    Acl(Vec<AclEntry>),
}

impl AttrValue {
    /// Reads this value as a 64-bit integer, widening `Int`.
    pub fn as_long(&self) -> Option<i64> {
        match self {
            AttrValue::Int(value) => Some(*value as i64),
            AttrValue::Long(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<FileTime> {
        match self {
            AttrValue::Time(value) => Some(*value),
            _ => None,
        }
    }
}

/// A parsed `view:attribute` key; a missing view defaults to `basic`.
#[derive(Debug, PartialEq, Eq)]
struct AttrSpec<'a> {
    view: &'a str,
    attribute: &'a str,
}

fn parse_spec(input: &str) -> FsResult<AttrSpec<'_>> {
    let (view, attribute) = match input.split_once(':') {
        Some((view, attribute)) => (view, attribute),
        None => ("basic", input),
    };
    if view.is_empty() || attribute.is_empty() || attribute.contains(':') {
        return Err(FsError::illegal(format!("invalid attribute key {input:?}")));
    }
    Ok(AttrSpec { view, attribute })
}

/// Routes attribute reads and writes to the enabled view providers.
pub struct AttributeService {
    providers: HashMap<&'static str, ProviderRef>,
    defaults: Vec<(&'static str, String, AttrValue)>,
}

impl AttributeService {
    /// Builds a service for the given view names plus any user-supplied
    /// providers. Inherited views are enabled transitively; `basic` is
    /// always enabled. Default values come from the providers, overridden
    /// by `default_values` entries keyed `view:attr`.
    pub fn new(
        views: &BTreeSet<String>,
        extra_providers: Vec<ProviderRef>,
        default_values: &HashMap<String, AttrValue>,
    ) -> FsResult<AttributeService> {
        let mut providers: HashMap<&'static str, ProviderRef> = HashMap::new();
        let mut pending: Vec<ProviderRef> = vec![Arc::new(basic::BasicAttributeProvider)];
        for view in views {
            pending.push(standard_provider(view)?);
        }
        pending.extend(extra_providers);

        while let Some(provider) = pending.pop() {
            if providers.contains_key(provider.view()) {
                continue;
            }
            for inherited in provider.inherits() {
                if !providers.contains_key(inherited) {
                    pending.push(standard_provider(inherited)?);
                }
            }
            providers.insert(provider.view(), provider);
        }

        let mut defaults = Vec::new();
        let mut ordered: Vec<&ProviderRef> = providers.values().collect();
        ordered.sort_by(|a, b| a.view().cmp(b.view()));
        for provider in ordered {
            for (attribute, value) in provider.defaults(default_values)? {
                defaults.push((provider.view(), attribute, value));
            }
        }
        Ok(AttributeService { providers, defaults })
    }

    /// The names of every enabled view.
    pub fn supported_views(&self) -> BTreeSet<String> {
        self.providers.keys().map(|view| view.to_string()).collect()
    }

    /// True when `view` is enabled.
    pub fn supports_view(&self, view: &str) -> bool {
        self.providers.contains_key(view)
    }

    /// Seeds the configured default attribute values onto a new file.
    pub fn seed_initial_attributes(&self, file: &File) {
        for (view, attribute, value) in &self.defaults {
            file.set_stored_attribute(view, attribute, value.clone());
        }
    }

    fn provider(&self, view: &str) -> FsResult<&ProviderRef> {
        self.providers
            .get(view)
            .ok_or_else(|| FsError::unsupported(format!("attribute view {view:?} is not supported")))
    }

    fn lookup(&self, provider: &ProviderRef, file: &File, attribute: &str) -> Option<AttrValue> {
        if let Some(value) = provider.get(file, attribute) {
            return Some(value);
        }
        for inherited in provider.inherits() {
            if let Some(inherited_provider) = self.providers.get(inherited) {
                if let Some(value) = inherited_provider.get(file, attribute) {
                    return Some(value);
                }
            }
        }
        None
    }

    /// Reads a single attribute addressed as `view:attr` (or `attr`, which
    /// defaults to the basic view).
    pub fn get_attribute(&self, file: &File, key: &str) -> FsResult<AttrValue> {
        let spec = parse_spec(key)?;
        if spec.attribute == "*" {
            return Err(FsError::illegal(format!("invalid attribute key {key:?}")));
        }
        let provider = self.provider(spec.view)?;
        self.lookup(provider, file, spec.attribute)
            .ok_or_else(|| FsError::illegal(format!("attribute {key:?} is not recognized")))
    }

    /// Writes a single attribute addressed as `view:attr`.
    pub fn set_attribute(
        &self,
        file: &File,
        key: &str,
        value: AttrValue,
        create: bool,
    ) -> FsResult<()> {
        let spec = parse_spec(key)?;
        if spec.attribute == "*" {
            return Err(FsError::illegal(format!("invalid attribute key {key:?}")));
        }
        let provider = self.provider(spec.view)?;
        provider.set(file, spec.view, spec.attribute, value, create)
    }

    /// Reads a set of attributes: `view:*` for everything the view exposes
    /// (its own and inherited attributes), or `view:a,b,c` for a subset.
    pub fn read_attributes(
        &self,
        file: &File,
        specification: &str,
    ) -> FsResult<BTreeMap<String, AttrValue>> {
        let spec = parse_spec(specification)?;
        let provider = self.provider(spec.view)?;
        let mut result = BTreeMap::new();

        if spec.attribute == "*" {
            let mut names: Vec<String> = provider.attribute_names(file);
            for inherited in provider.inherits() {
                if let Some(inherited_provider) = self.providers.get(inherited) {
                    names.extend(inherited_provider.attribute_names(file));
                }
            }
            for name in names {
                if let Some(value) = self.lookup(provider, file, &name) {
                    result.insert(name, value);
                }
            }
            return Ok(result);
        }

        let mut seen = BTreeSet::new();
        for attribute in spec.attribute.split(',') {
            if attribute == "*" || attribute.is_empty() {
                return Err(FsError::illegal(format!(
                    "invalid attribute list {specification:?}"
                )));
            }
            if !seen.insert(attribute) {
                return Err(FsError::illegal(format!(
                    "duplicate attribute {attribute:?} in {specification:?}"
                )));
            }
            let value = self.lookup(provider, file, attribute).ok_or_else(|| {
                FsError::illegal(format!(
                    "attribute {:?} is not recognized for view {:?}",
                    attribute, spec.view
                ))
            })?;
            result.insert(attribute.to_string(), value);
        }
        Ok(result)
    }

    /// Typed snapshot of the basic view; always available.
    pub fn basic_attributes(&self, file: &File) -> BasicAttributes {
        BasicAttributes::read(file)
    }

    /// Typed snapshot of the posix view.
    pub fn posix_attributes(&self, file: &File) -> FsResult<PosixAttributes> {
        self.provider("posix")?;
        Ok(PosixAttributes {
            basic: BasicAttributes::read(file),
            owner: match file.get_stored_attribute("owner", "owner") {
                Some(AttrValue::User(user)) => user,
                _ => UserPrincipal(String::new()),
            },
            group: match file.get_stored_attribute("posix", "group") {
                Some(AttrValue::Group(group)) => group,
                _ => GroupPrincipal(String::new()),
            },
            permissions: match file.get_stored_attribute("posix", "permissions") {
                Some(AttrValue::Permissions(permissions)) => permissions,
                _ => PosixPermissions::empty(),
            },
        })
    }

    /// Typed snapshot of the dos view.
    pub fn dos_attributes(&self, file: &File) -> FsResult<DosAttributes> {
        self.provider("dos")?;
        let flag = |attribute: &str| {
            file.get_stored_attribute("dos", attribute).and_then(|v| v.as_bool()).unwrap_or(false)
        };
        Ok(DosAttributes {
            basic: BasicAttributes::read(file),
            read_only: flag("readonly"),
            hidden: flag("hidden"),
            archive: flag("archive"),
            system: flag("system"),
        })
    }
}

impl fmt::Debug for AttributeService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeService").field("views", &self.supported_views()).finish()
    }
}

fn standard_provider(view: &str) -> FsResult<ProviderRef> {
    Ok(match view {
        "basic" => Arc::new(basic::BasicAttributeProvider),
        "owner" => Arc::new(owner::OwnerAttributeProvider),
        "posix" => Arc::new(posix::PosixAttributeProvider),
        "unix" => Arc::new(unix::UnixAttributeProvider),
        "dos" => Arc::new(dos::DosAttributeProvider),
        "acl" => Arc::new(acl::AclAttributeProvider),
        "user" => Arc::new(user::UserAttributeProvider),
        other => {
            return Err(FsError::illegal(format!("unknown attribute view {other:?}")));
        }
    })
}

/// Snapshot of the basic view.
#[derive(Debug, Clone, PartialEq)]
pub struct BasicAttributes {
    pub creation_time: FileTime,
    pub last_access_time: FileTime,
    pub last_modified_time: FileTime,
    pub size: u64,
    pub is_directory: bool,
    pub is_regular_file: bool,
    pub is_symbolic_link: bool,
    pub file_key: u64,
}

impl BasicAttributes {
    fn read(file: &File) -> Self {
        let times = file.times();
        BasicAttributes {
            creation_time: times.created,
            last_access_time: times.accessed,
            last_modified_time: times.modified,
            size: file.size(),
            is_directory: file.is_directory(),
            is_regular_file: file.is_regular(),
            is_symbolic_link: file.is_symlink(),
            file_key: file.id(),
        }
    }
}

/// Snapshot of the posix view.
#[derive(Debug, Clone, PartialEq)]
pub struct PosixAttributes {
    pub basic: BasicAttributes,
    pub owner: UserPrincipal,
    pub group: GroupPrincipal,
    pub permissions: PosixPermissions,
}

/// Snapshot of the dos view.
#[derive(Debug, Clone, PartialEq)]
pub struct DosAttributes {
    pub basic: BasicAttributes,
    pub read_only: bool,
    pub hidden: bool,
    pub archive: bool,
    pub system: bool,
}
