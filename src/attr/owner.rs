//! The `owner` view: a single owning user principal.

use std::collections::HashMap;

use crate::attr::provider::{check_not_create, invalid_type, unsettable, AttributeProvider};
use crate::attr::{AttrValue, UserPrincipal};
use crate::error::{FsError, FsResult};
use crate::file::File;

pub(super) const DEFAULT_OWNER: &str = "user";

pub(super) struct OwnerAttributeProvider;

impl AttributeProvider for OwnerAttributeProvider {
    fn view(&self) -> &'static str {
        "owner"
    }

    fn fixed_attributes(&self) -> &'static [&'static str] {
        &["owner"]
    }

    fn defaults(
        &self,
        overrides: &HashMap<String, AttrValue>,
    ) -> FsResult<Vec<(String, AttrValue)>> {
        let owner = match overrides.get("owner:owner") {
            None => UserPrincipal(DEFAULT_OWNER.to_string()),
            Some(AttrValue::User(user)) => user.clone(),
            Some(AttrValue::String(name)) => UserPrincipal(name.clone()),
            Some(other) => {
                return Err(FsError::illegal(format!(
                    "invalid default value {other:?} for owner:owner"
                )))
            }
        };
        Ok(vec![("owner".to_string(), AttrValue::User(owner))])
    }

    fn get(&self, file: &File, attribute: &str) -> Option<AttrValue> {
        match attribute {
            "owner" => file.get_stored_attribute("owner", "owner"),
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
        if attribute != "owner" {
            return Err(unsettable(view, attribute));
        }
        check_not_create(view, attribute, create)?;
        let owner = match value {
            AttrValue::User(user) => user,
            AttrValue::String(name) => UserPrincipal(name),
            other => return Err(invalid_type(view, attribute, &other)),
        };
        file.set_stored_attribute("owner", "owner", AttrValue::User(owner));
        Ok(())
    }
}
