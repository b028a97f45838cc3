//! The `acl` view: a list of access-control entries.

use std::collections::HashMap;

use crate::attr::provider::{check_not_create, invalid_type, unsettable, AttributeProvider};
use crate::attr::{AttrValue, UserPrincipal};
use crate::error::{FsError, FsResult};
use crate::file::File;

/// Whether an ACL entry grants, denies or audits access.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum AclEntryKind {
    Allow,
    Deny,
    Audit,
    Alarm,
}

/// One access-control entry.
#[derive(Debug, Clone, PartialEq)]
pub struct AclEntry {
    pub kind: AclEntryKind,
    pub principal: UserPrincipal,
    pub permissions: Vec<String>,
    pub flags: Vec<String>,
}

pub(super) struct AclAttributeProvider;

impl AttributeProvider for AclAttributeProvider {
    fn view(&self) -> &'static str {
        "acl"
    }

    fn inherits(&self) -> &'static [&'static str] {
        &["owner"]
    }

    fn fixed_attributes(&self) -> &'static [&'static str] {
        &["acl"]
    }

    fn defaults(
        &self,
        overrides: &HashMap<String, AttrValue>,
    ) -> FsResult<Vec<(String, AttrValue)>> {
        let acl = match overrides.get("acl:acl") {
            None => AttrValue::Acl(Vec::new()),
            Some(value @ AttrValue::Acl(_)) => value.clone(),
            Some(other) => {
                return Err(FsError::illegal(format!(
                    "invalid default value {other:?} for acl:acl"
                )))
            }
        };
        Ok(vec![("acl".to_string(), acl)])
    }

    fn get(&self, file: &File, attribute: &str) -> Option<AttrValue> {
        match attribute {
            "acl" => file.get_stored_attribute("acl", "acl"),
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
        if attribute != "acl" {
            return Err(unsettable(view, attribute));
        }
        check_not_create(view, attribute, create)?;
        match value {
            AttrValue::Acl(entries) => {
                file.set_stored_attribute("acl", "acl", AttrValue::Acl(entries));
                Ok(())
            }
            other => Err(invalid_type(view, attribute, &other)),
        }
    }
}
