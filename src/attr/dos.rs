//! The `dos` view: archive/hidden/readonly/system flags.

use std::collections::HashMap;

use crate::attr::provider::{check_not_create, invalid_type, unsettable, AttributeProvider};
use crate::attr::AttrValue;
use crate::error::{FsError, FsResult};
use crate::file::File;

pub(super) struct DosAttributeProvider;

const ATTRIBUTES: &[&str] = &["readonly", "hidden", "archive", "system"];

impl AttributeProvider for DosAttributeProvider {
    fn view(&self) -> &'static str {
        "dos"
    }

    fn inherits(&self) -> &'static [&'static str] {
        &["basic", "owner"]
    }

    fn fixed_attributes(&self) -> &'static [&'static str] {
        ATTRIBUTES
    }

    fn defaults(
        &self,
        overrides: &HashMap<String, AttrValue>,
    ) -> FsResult<Vec<(String, AttrValue)>> {
        let mut defaults = Vec::new();
        for attribute in ATTRIBUTES {
            let key = format!("dos:{attribute}");
            let value = match overrides.get(&key) {
                None => AttrValue::Bool(false),
                Some(AttrValue::Bool(flag)) => AttrValue::Bool(*flag),
                Some(other) => {
                    return Err(FsError::illegal(format!(
                        "invalid default value {other:?} for {key}"
                    )))
                }
            };
            defaults.push((attribute.to_string(), value));
        }
        Ok(defaults)
    }

    fn get(&self, file: &File, attribute: &str) -> Option<AttrValue> {
        if ATTRIBUTES.contains(&attribute) {
            file.get_stored_attribute("dos", attribute)
        } else {
            None
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
        if !ATTRIBUTES.contains(&attribute) {
            return Err(unsettable(view, attribute));
        }
        check_not_create(view, attribute, create)?;
        let flag = value.as_bool().ok_or_else(|| invalid_type(view, attribute, &value))?;
        file.set_stored_attribute("dos", attribute, AttrValue::Bool(flag));
        Ok(())
    }
}
