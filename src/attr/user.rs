//! The `user` view: free-form byte-array attributes under user-chosen names.

use crate::attr::provider::{check_not_create, invalid_type, AttributeProvider};
use crate::attr::AttrValue;
use crate::error::FsResult;
use crate::file::File;

pub(super) struct UserAttributeProvider;

impl AttributeProvider for UserAttributeProvider {
    fn view(&self) -> &'static str {
        "user"
    }

    fn fixed_attributes(&self) -> &'static [&'static str] {
        &[]
    }

    fn get(&self, file: &File, attribute: &str) -> Option<AttrValue> {
        file.get_stored_attribute("user", attribute)
    }

    fn set(
        &self,
        file: &File,
        view: &str,
        attribute: &str,
        value: AttrValue,
        create: bool,
    ) -> FsResult<()> {
        check_not_create(view, attribute, create)?;
        let bytes = match value {
            AttrValue::Bytes(bytes) => bytes,
            AttrValue::String(text) => text.into_bytes(),
            other => return Err(invalid_type(view, attribute, &other)),
        };
        file.set_stored_attribute("user", attribute, AttrValue::Bytes(bytes));
        Ok(())
    }

    fn attribute_names(&self, file: &File) -> Vec<String> {
        file.stored_attribute_names("user")
    }
}
