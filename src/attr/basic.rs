//! The `basic` view: timestamps, size, kind flags and the file key.

use crate::attr::provider::{check_not_create, invalid_type, unsettable, AttributeProvider};
use crate::attr::AttrValue;
use crate::error::FsResult;
use crate::file::File;

pub(super) struct BasicAttributeProvider;

const ATTRIBUTES: &[&str] = &[
    "size",
    "fileKey",
    "isDirectory",
    "isRegularFile",
    "isSymbolicLink",
    "isOther",
    "creationTime",
    "lastAccessTime",
    "lastModifiedTime",
];

impl AttributeProvider for BasicAttributeProvider {
    fn view(&self) -> &'static str {
        "basic"
    }

    fn fixed_attributes(&self) -> &'static [&'static str] {
        ATTRIBUTES
    }

    fn get(&self, file: &File, attribute: &str) -> Option<AttrValue> {
        let times = file.times();
        match attribute {
            "size" => Some(AttrValue::Long(file.size() as i64)),
            "fileKey" => Some(AttrValue::Long(file.id() as i64)),
            "isDirectory" => Some(AttrValue::Bool(file.is_directory())),
            "isRegularFile" => Some(AttrValue::Bool(file.is_regular())),
            "isSymbolicLink" => Some(AttrValue::Bool(file.is_symlink())),
            "isOther" => Some(AttrValue::Bool(false)),
            "creationTime" => Some(AttrValue::Time(times.created)),
            "lastAccessTime" => Some(AttrValue::Time(times.accessed)),
            "lastModifiedTime" => Some(AttrValue::Time(times.modified)),
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
            "creationTime" | "lastAccessTime" | "lastModifiedTime" => {
                check_not_create(view, attribute, create)?;
                let time = value.as_time().ok_or_else(|| invalid_type(view, attribute, &value))?;
                match attribute {
                    "creationTime" => file.set_creation_time(time),
                    "lastAccessTime" => file.set_access_time(time),
                    _ => file.set_modified_time(time),
                }
                Ok(())
            }
            _ => Err(unsettable(view, attribute)),
        }
    }
}
