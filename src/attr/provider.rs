//! The provider seam of the attribute service: one provider per view.

use std::collections::HashMap;
use std::sync::Arc;

use crate::attr::AttrValue;
use crate::error::{FsError, FsResult};
use crate::file::File;

/// Implements one attribute view.
///
/// A provider declares its view name, the views it inherits (whose
/// attributes are readable through it), its fixed attribute set and default
/// values, and the get/set behavior for the attributes it owns.
pub trait AttributeProvider: Send + Sync {
    /// The view name, e.g. `posix`.
    fn view(&self) -> &'static str;

    /// Views whose attributes are readable through this one.
    fn inherits(&self) -> &'static [&'static str] {
        &[]
    }

    /// The attributes this provider owns. Empty for dynamic views.
    fn fixed_attributes(&self) -> &'static [&'static str];

    /// Initial values seeded onto every new file, after applying the
    /// user-configured overrides (keyed `view:attr`).
    fn defaults(
        &self,
        _overrides: &HashMap<String, AttrValue>,
    ) -> FsResult<Vec<(String, AttrValue)>> {
        Ok(Vec::new())
    }

    /// Reads an attribute owned by this provider, or `None` when the name
    /// is not one of its attributes.
    fn get(&self, file: &File, attribute: &str) -> Option<AttrValue>;

    /// Writes an attribute. `view` is the name the caller addressed (may be
    /// an inheriting view); `create` marks a set happening as part of file
    /// creation.
    fn set(
        &self,
        file: &File,
        view: &str,
        attribute: &str,
        value: AttrValue,
        create: bool,
    ) -> FsResult<()>;

    /// Attribute names readable right now, including dynamic ones.
    fn attribute_names(&self, _file: &File) -> Vec<String> {
        self.fixed_attributes().iter().map(|name| name.to_string()).collect()
    }
}

/// Shared handle type for providers.
pub type ProviderRef = Arc<dyn AttributeProvider>;

/// Fails with *unsupported-operation* when an attribute that cannot be set
/// at file-creation time is set with `create`.
pub(crate) fn check_not_create(view: &str, attribute: &str, create: bool) -> FsResult<()> {
    if create {
        Err(FsError::unsupported(format!(
            "cannot set attribute {view}:{attribute} during file creation"
        )))
    } else {
        Ok(())
    }
}

/// The error for setting an attribute the provider does not allow setting.
pub(crate) fn unsettable(view: &str, attribute: &str) -> FsError {
    FsError::illegal(format!("attribute {view}:{attribute} cannot be set"))
}

/// The error for a set with a value of the wrong runtime type.
pub(crate) fn invalid_type(view: &str, attribute: &str, value: &AttrValue) -> FsError {
    FsError::illegal(format!("invalid value {value:?} for attribute {view}:{attribute}"))
}
