//! Change records: normalized descriptions of one entry mutation.
//!
//! A [`ChangeRecord`] is a tagged variant over add, modify, delete and
//! modify-DN, each carrying only the payload its operation needs.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::dn;
use crate::error::{ModificationError, ModificationResult};
use crate::ldif::{self, RenderOptions};

/// OID of the ManageDsaIT control, sent when the target itself is a referral
/// object so the server modifies it instead of returning a referral.
pub const OID_MANAGE_DSA_IT: &str = "2.16.840.1.113730.3.4.2";

/// OID of the subentries control (RFC 3672).
pub const OID_SUBENTRIES: &str = "1.3.6.1.4.1.4203.1.10.1";

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Text(String),
    Binary(Vec<u8>),
}

impl AttributeValue {
    /// Raw bytes as sent on the wire.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            AttributeValue::Text(s) => s.as_bytes(),
            AttributeValue::Binary(b) => b,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            AttributeValue::Binary(_) => None,
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, AttributeValue::Binary(_))
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::Text(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::Text(s)
    }
}

impl From<Vec<u8>> for AttributeValue {
    fn from(b: Vec<u8>) -> Self {
        AttributeValue::Binary(b)
    }
}

/// An attribute with its values, as carried by an add record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub values: Vec<AttributeValue>,
}

impl Attribute {
    pub fn new<I, V>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<AttributeValue>,
    {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn single(name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self {
            name: name.into(),
            values: vec![value.into()],
        }
    }
}

/// Kind of a modify edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModKind {
    Add,
    Replace,
    Delete,
}

impl ModKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModKind::Add => "add",
            ModKind::Replace => "replace",
            ModKind::Delete => "delete",
        }
    }
}

/// One edit in a modify record.
///
/// A `Delete` with no values removes the whole attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeEdit {
    pub kind: ModKind,
    pub attribute: String,
    pub values: Vec<AttributeValue>,
}

impl AttributeEdit {
    pub fn add_value(attribute: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self {
            kind: ModKind::Add,
            attribute: attribute.into(),
            values: vec![value.into()],
        }
    }

    pub fn replace_value(attribute: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self {
            kind: ModKind::Replace,
            attribute: attribute.into(),
            values: vec![value.into()],
        }
    }

    pub fn delete_value(attribute: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self {
            kind: ModKind::Delete,
            attribute: attribute.into(),
            values: vec![value.into()],
        }
    }

    pub fn delete_attribute(attribute: impl Into<String>) -> Self {
        Self {
            kind: ModKind::Delete,
            attribute: attribute.into(),
            values: Vec::new(),
        }
    }
}

/// An opaque request control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Control {
    pub oid: String,
    pub critical: bool,
    pub value: Option<Vec<u8>>,
}

impl Control {
    pub fn new(oid: impl Into<String>, critical: bool, value: Option<Vec<u8>>) -> Self {
        Self {
            oid: oid.into(),
            critical,
            value,
        }
    }

    /// ManageDsaIT, critical, no value.
    pub fn manage_dsa_it() -> Self {
        Self::new(OID_MANAGE_DSA_IT, true, None)
    }

    /// Subentries visibility control.
    pub fn subentries(visible: bool) -> Self {
        // BER-encoded BOOLEAN
        let value = vec![0x01, 0x01, if visible { 0xFF } else { 0x00 }];
        Self::new(OID_SUBENTRIES, true, Some(value))
    }
}

/// Operation kind of a change record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Add,
    Modify,
    Delete,
    ModifyDn,
}

impl ChangeType {
    /// Keyword used on the `changetype:` line.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Add => "add",
            ChangeType::Modify => "modify",
            ChangeType::Delete => "delete",
            ChangeType::ModifyDn => "modrdn",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation-specific payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "changetype", rename_all = "snake_case")]
pub enum Change {
    /// Create an entry with its full initial attribute set.
    Add { attributes: Vec<Attribute> },
    /// Apply attribute edits in order.
    Modify { edits: Vec<AttributeEdit> },
    /// Remove the entry.
    Delete,
    /// Rename and/or move the entry.
    ModifyDn {
        new_rdn: String,
        delete_old_rdn: bool,
        new_superior: Option<String>,
    },
}

impl Change {
    pub fn change_type(&self) -> ChangeType {
        match self {
            Change::Add { .. } => ChangeType::Add,
            Change::Modify { .. } => ChangeType::Modify,
            Change::Delete => ChangeType::Delete,
            Change::ModifyDn { .. } => ChangeType::ModifyDn,
        }
    }
}

/// A normalized mutation of one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    dn: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    controls: Vec<Control>,
    change: Change,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sequence: Option<u64>,
}

impl ChangeRecord {
    pub fn new(dn: impl Into<String>, change: Change) -> Self {
        Self {
            dn: dn.into(),
            controls: Vec::new(),
            change,
            sequence: None,
        }
    }

    pub fn add(dn: impl Into<String>, attributes: Vec<Attribute>) -> Self {
        Self::new(dn, Change::Add { attributes })
    }

    pub fn modify(dn: impl Into<String>, edits: Vec<AttributeEdit>) -> Self {
        Self::new(dn, Change::Modify { edits })
    }

    pub fn delete(dn: impl Into<String>) -> Self {
        Self::new(dn, Change::Delete)
    }

    pub fn modify_dn(
        dn: impl Into<String>,
        new_rdn: impl Into<String>,
        delete_old_rdn: bool,
        new_superior: Option<String>,
    ) -> Self {
        Self::new(
            dn,
            Change::ModifyDn {
                new_rdn: new_rdn.into(),
                delete_old_rdn,
                new_superior,
            },
        )
    }

    pub fn with_control(mut self, control: Control) -> Self {
        self.controls.push(control);
        self
    }

    pub fn with_controls(mut self, controls: impl IntoIterator<Item = Control>) -> Self {
        self.controls.extend(controls);
        self
    }

    pub fn dn(&self) -> &str {
        &self.dn
    }

    pub fn controls(&self) -> &[Control] {
        &self.controls
    }

    pub fn change(&self) -> &Change {
        &self.change
    }

    pub fn change_type(&self) -> ChangeType {
        self.change.change_type()
    }

    /// Sequence number assigned when the record was enqueued.
    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    pub(crate) fn assign_sequence(&mut self, sequence: u64) {
        self.sequence = Some(sequence);
    }

    /// The entry's DN once this record has been applied.
    pub fn target_dn_after(&self) -> String {
        match &self.change {
            Change::ModifyDn {
                new_rdn,
                new_superior,
                ..
            } => {
                let parent = new_superior.as_deref().or_else(|| dn::parent(&self.dn));
                dn::compose(new_rdn, parent)
            }
            _ => self.dn.clone(),
        }
    }

    /// Check the payload invariants of the operation kind.
    pub fn validate(&self) -> ModificationResult<()> {
        // The root DSE has an empty DN and may only be modified.
        if self.dn.trim().is_empty() && self.change_type() != ChangeType::Modify {
            return Err(ModificationError::invalid_operation(format!(
                "{} requires a target DN",
                self.change_type()
            )));
        }
        match &self.change {
            Change::Add { attributes } => {
                if attributes.is_empty() {
                    return Err(ModificationError::invalid_operation(format!(
                        "add of '{}' carries no attributes",
                        self.dn
                    )));
                }
                if let Some(empty) = attributes.iter().find(|a| a.values.is_empty()) {
                    return Err(ModificationError::invalid_operation(format!(
                        "add of '{}' has no values for attribute '{}'",
                        self.dn, empty.name
                    )));
                }
            }
            Change::Modify { edits } => {
                if edits.is_empty() {
                    return Err(ModificationError::invalid_operation(format!(
                        "modify of '{}' carries no edits",
                        self.dn
                    )));
                }
                if let Some(edit) = edits
                    .iter()
                    .find(|e| e.kind == ModKind::Add && e.values.is_empty())
                {
                    return Err(ModificationError::invalid_operation(format!(
                        "add edit on '{}' carries no values",
                        edit.attribute
                    )));
                }
            }
            Change::Delete => {}
            Change::ModifyDn { new_rdn, .. } => {
                if !new_rdn.contains('=') {
                    return Err(ModificationError::invalid_operation(format!(
                        "'{new_rdn}' is not a valid relative name"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Canonical text form used by the audit log and bulk export.
    pub fn render(&self, options: &RenderOptions) -> String {
        ldif::render_record(self, options)
    }
}

impl fmt::Display for ChangeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(&RenderOptions::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_type_keywords() {
        assert_eq!(ChangeRecord::delete("cn=a,dc=test").change_type().as_str(), "delete");
        let rename = ChangeRecord::modify_dn("cn=a,dc=test", "cn=b", true, None);
        assert_eq!(rename.change_type().as_str(), "modrdn");
    }

    #[test]
    fn test_target_dn_after_rename_and_move() {
        let rename = ChangeRecord::modify_dn("cn=a,ou=x,dc=test", "cn=b", true, None);
        assert_eq!(rename.target_dn_after(), "cn=b,ou=x,dc=test");

        let moved = ChangeRecord::modify_dn(
            "cn=a,ou=x,dc=test",
            "cn=a",
            false,
            Some("ou=y,dc=test".to_string()),
        );
        assert_eq!(moved.target_dn_after(), "cn=a,ou=y,dc=test");

        let delete = ChangeRecord::delete("cn=a,dc=test");
        assert_eq!(delete.target_dn_after(), "cn=a,dc=test");
    }

    #[test]
    fn test_validate_rejects_empty_payloads() {
        assert!(ChangeRecord::add("cn=a,dc=test", vec![]).validate().is_err());
        assert!(ChangeRecord::add("cn=a,dc=test", vec![Attribute::new("cn", Vec::<String>::new())])
            .validate()
            .is_err());
        assert!(ChangeRecord::modify("cn=a,dc=test", vec![]).validate().is_err());
        assert!(ChangeRecord::modify_dn("cn=a,dc=test", "nonsense", true, None)
            .validate()
            .is_err());
        assert!(ChangeRecord::delete("").validate().is_err());
    }

    #[test]
    fn test_validate_accepts_attribute_delete() {
        let record = ChangeRecord::modify(
            "cn=a,dc=test",
            vec![AttributeEdit::delete_attribute("description")],
        );
        assert!(record.validate().is_ok());
    }

    #[test]
    fn test_serialization_tags_changetype() {
        let record = ChangeRecord::delete("cn=a,dc=test").with_control(Control::manage_dsa_it());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["change"]["changetype"], "delete");
        assert_eq!(json["controls"][0]["oid"], OID_MANAGE_DSA_IT);
        assert!(json.get("sequence").is_none());
    }
}
