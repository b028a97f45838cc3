//! The `unix` view: synthetic read-only attributes derived from the basic,
//! owner and posix views plus the file's link count.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::attr::provider::AttributeProvider;
use crate::attr::{AttrValue, PosixPermissions};
use crate::error::{FsError, FsResult};
use crate::file::File;

pub(super) struct UnixAttributeProvider;

const ATTRIBUTES: &[&str] = &["uid", "ino", "dev", "nlink", "rdev", "ctime", "mode", "gid"];

/// Stable numeric id derived from a principal name.
fn principal_id(name: &str) -> i64 {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    (hasher.finish() & 0x7fff_ffff) as i64
}

impl AttributeProvider for UnixAttributeProvider {
    fn view(&self) -> &'static str {
        "unix"
    }

    fn inherits(&self) -> &'static [&'static str] {
        &["basic", "owner", "posix"]
    }

    fn fixed_attributes(&self) -> &'static [&'static str] {
        ATTRIBUTES
    }

    fn get(&self, file: &File, attribute: &str) -> Option<AttrValue> {
        match attribute {
            "uid" => match file.get_stored_attribute("owner", "owner") {
                Some(AttrValue::User(user)) => Some(AttrValue::Long(principal_id(&user.0))),
                _ => None,
            },
            "gid" => match file.get_stored_attribute("posix", "group") {
                Some(AttrValue::Group(group)) => Some(AttrValue::Long(principal_id(&group.0))),
                _ => None,
            },
            "mode" => match file.get_stored_attribute("posix", "permissions") {
                Some(AttrValue::Permissions(permissions)) => {
                    Some(AttrValue::Long(permissions.mode() as i64))
                }
                _ => Some(AttrValue::Long(PosixPermissions::empty().mode() as i64)),
            },
            "ino" => Some(AttrValue::Long(file.id() as i64)),
            "dev" => Some(AttrValue::Long(1)),
            "rdev" => Some(AttrValue::Long(0)),
            "nlink" => Some(AttrValue::Long(file.link_count() as i64)),
            "ctime" => Some(AttrValue::Time(file.times().created)),
            _ => None,
        }
    }

    fn set(
        &self,
        _file: &File,
        view: &str,
        attribute: &str,
        _value: AttrValue,
        create: bool,
    ) -> FsResult<()> {
        if create {
            Err(FsError::unsupported(format!(
                "cannot set attribute {view}:{attribute} during file creation"
            )))
        } else {
            Err(FsError::illegal(format!("attribute {view}:{attribute} cannot be set")))
        }
    }
}
