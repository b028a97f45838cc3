//! The `posix` view: group and permission bits, on top of basic and owner.

use std::collections::HashMap;
use std::fmt;

use bitflags::bitflags;

use crate::attr::provider::{check_not_create, invalid_type, unsettable, AttributeProvider};
use crate::attr::{AttrValue, GroupPrincipal};
use crate::error::{FsError, FsResult};
use crate::file::File;

pub(super) const DEFAULT_GROUP: &str = "group";
pub(super) const DEFAULT_PERMISSIONS: &str = "rw-r--r--";

bitflags! {
    /// POSIX permission bits in their conventional octal positions.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct PosixPermissions: u32 {
        const OWNER_READ = 0o400;
        const OWNER_WRITE = 0o200;
        const OWNER_EXECUTE = 0o100;
        const GROUP_READ = 0o040;
        const GROUP_WRITE = 0o020;
        const GROUP_EXECUTE = 0o010;
        const OTHERS_READ = 0o004;
        const OTHERS_WRITE = 0o002;
        const OTHERS_EXECUTE = 0o001;
    }
}

impl PosixPermissions {
    /// The numeric mode, e.g. `0o644`.
    pub fn mode(self) -> u32 {
        self.bits()
    }

    /// Builds from a numeric mode, ignoring bits above `0o777`.
    pub fn from_mode(mode: u32) -> Self {
        PosixPermissions::from_bits_truncate(mode)
    }

    /// Parses the nine-character `rwxrwxrwx` form.
    pub fn parse(input: &str) -> FsResult<Self> {
        let chars: Vec<char> = input.chars().collect();
        if chars.len() != 9 {
            return Err(FsError::illegal(format!("invalid permissions string {input:?}")));
        }
        let mut bits = 0u32;
        for (i, &c) in chars.iter().enumerate() {
            let expected = ['r', 'w', 'x'][i % 3];
            let bit = 0o400 >> i;
            match c {
                '-' => {}
                c if c == expected => bits |= bit,
                _ => {
                    return Err(FsError::illegal(format!(
                        "invalid permissions string {input:?}"
                    )))
                }
            }
        }
        Ok(PosixPermissions::from_bits_truncate(bits))
    }
}

impl fmt::Display for PosixPermissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in 0..9 {
            let bit = 0o400 >> i;
            let symbol = ['r', 'w', 'x'][i % 3];
            let c = if self.bits() & bit != 0 { symbol } else { '-' };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

pub(super) struct PosixAttributeProvider;

impl AttributeProvider for PosixAttributeProvider {
    fn view(&self) -> &'static str {
        "posix"
    }

    fn inherits(&self) -> &'static [&'static str] {
        &["basic", "owner"]
    }

    fn fixed_attributes(&self) -> &'static [&'static str] {
        &["group", "permissions"]
    }

    fn defaults(
        &self,
        overrides: &HashMap<String, AttrValue>,
    ) -> FsResult<Vec<(String, AttrValue)>> {
        let group = match overrides.get("posix:group") {
            None => GroupPrincipal(DEFAULT_GROUP.to_string()),
            Some(AttrValue::Group(group)) => group.clone(),
            Some(AttrValue::String(name)) => GroupPrincipal(name.clone()),
            Some(other) => {
                return Err(FsError::illegal(format!(
                    "invalid default value {other:?} for posix:group"
                )))
            }
        };
        let permissions = match overrides.get("posix:permissions") {
            None => PosixPermissions::parse(DEFAULT_PERMISSIONS)?,
            Some(AttrValue::Permissions(permissions)) => *permissions,
            Some(AttrValue::String(text)) => PosixPermissions::parse(text)?,
            Some(other) => {
                return Err(FsError::illegal(format!(
                    "invalid default value {other:?} for posix:permissions"
                )))
            }
        };
        Ok(vec![
            ("group".to_string(), AttrValue::Group(group)),
            ("permissions".to_string(), AttrValue::Permissions(permissions)),
        ])
    }

    fn get(&self, file: &File, attribute: &str) -> Option<AttrValue> {
        match attribute {
            "group" | "permissions" => file.get_stored_attribute("posix", attribute),
            _ => None,
        }
    }

    fn set(
        &self,
        file: &File,
        view: &str,
        attribute: &str,
        value: AttrValue,
        create: bool,
    ) -> FsResult<()> {
        match attribute {
            "group" => {
                check_not_create(view, attribute, create)?;
                let group = match value {
                    AttrValue::Group(group) => group,
                    AttrValue::String(name) => GroupPrincipal(name),
                    other => return Err(invalid_type(view, attribute, &other)),
                };
                file.set_stored_attribute("posix", "group", AttrValue::Group(group));
                Ok(())
            }
            // Permissions may be supplied at creation time.
            "permissions" => {
                let permissions = match value {
                    AttrValue::Permissions(permissions) => permissions,
                    AttrValue::String(text) => PosixPermissions::parse(&text)?,
                    other => return Err(invalid_type(view, attribute, &other)),
                };
                file.set_stored_attribute(
                    "posix",
                    "permissions",
                    AttrValue::Permissions(permissions),
                );
                Ok(())
            }
            _ => Err(unsettable(view, attribute)),
        }
    }
}
