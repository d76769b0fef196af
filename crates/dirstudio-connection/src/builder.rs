//! Turns high-level mutation requests into change records.

use crate::dn;
use crate::error::{ModificationError, ModificationResult};
use crate::record::{Attribute, AttributeEdit, AttributeValue, ChangeRecord, Control};

/// The entry a request targets, plus any request controls it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryTarget {
    dn: String,
    controls: Vec<Control>,
}

impl EntryTarget {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            controls: Vec::new(),
        }
    }

    /// Target a referral object itself rather than the entry it points to.
    pub fn referral_object(dn: impl Into<String>) -> Self {
        Self::new(dn).with_control(Control::manage_dsa_it())
    }

    pub fn with_control(mut self, control: Control) -> Self {
        self.controls.push(control);
        self
    }

    pub fn dn(&self) -> &str {
        &self.dn
    }

    pub fn controls(&self) -> &[Control] {
        &self.controls
    }

    fn record(&self, record: ChangeRecord) -> ModificationResult<ChangeRecord> {
        let record = record.with_controls(self.controls.iter().cloned());
        record.validate()?;
        Ok(record)
    }
}

impl From<&str> for EntryTarget {
    fn from(dn: &str) -> Self {
        Self::new(dn)
    }
}

impl From<String> for EntryTarget {
    fn from(dn: String) -> Self {
        Self::new(dn)
    }
}

/// Builds validated [`ChangeRecord`]s. Every method fails with
/// [`ModificationError::InvalidOperation`] on a malformed request, before
/// anything can be enqueued.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeRecordBuilder;

impl ChangeRecordBuilder {
    /// Add one value to an attribute.
    pub fn create_value(
        target: &EntryTarget,
        attribute: &str,
        value: impl Into<AttributeValue>,
    ) -> ModificationResult<ChangeRecord> {
        target.record(ChangeRecord::modify(
            target.dn(),
            vec![AttributeEdit::add_value(attribute, value)],
        ))
    }

    /// Change one value of an attribute in place.
    ///
    /// `value_count` is the number of values the attribute currently holds.
    /// A single-valued attribute is replaced. For a multi-valued attribute the
    /// new value is added before the old one is deleted, so the attribute is
    /// never momentarily empty.
    pub fn modify_value(
        target: &EntryTarget,
        attribute: &str,
        value_count: usize,
        old_value: impl Into<AttributeValue>,
        new_value: impl Into<AttributeValue>,
    ) -> ModificationResult<ChangeRecord> {
        let old_value = old_value.into();
        let new_value = new_value.into();
        let edits = match value_count {
            0 => {
                return Err(ModificationError::invalid_operation(format!(
                    "cannot modify a value of '{attribute}' on '{}': attribute has no values",
                    target.dn()
                )))
            }
            1 => vec![AttributeEdit::replace_value(attribute, new_value)],
            _ => {
                if old_value == new_value {
                    return Err(ModificationError::invalid_operation(format!(
                        "new value of '{attribute}' equals the old value"
                    )));
                }
                vec![
                    AttributeEdit::add_value(attribute, new_value),
                    AttributeEdit::delete_value(attribute, old_value),
                ]
            }
        };
        target.record(ChangeRecord::modify(target.dn(), edits))
    }

    /// Remove one value of an attribute.
    pub fn delete_value(
        target: &EntryTarget,
        attribute: &str,
        value: impl Into<AttributeValue>,
    ) -> ModificationResult<ChangeRecord> {
        target.record(ChangeRecord::modify(
            target.dn(),
            vec![AttributeEdit::delete_value(attribute, value)],
        ))
    }

    /// Remove an attribute with all its values.
    pub fn delete_attribute(
        target: &EntryTarget,
        attribute: &str,
    ) -> ModificationResult<ChangeRecord> {
        target.record(ChangeRecord::modify(
            target.dn(),
            vec![AttributeEdit::delete_attribute(attribute)],
        ))
    }

    /// Create a new entry from its full initial attribute set.
    pub fn create_entry(
        target: &EntryTarget,
        attributes: Vec<Attribute>,
    ) -> ModificationResult<ChangeRecord> {
        target.record(ChangeRecord::add(target.dn(), attributes))
    }

    /// Give an entry a new RDN under the same parent.
    pub fn rename_entry(
        target: &EntryTarget,
        new_rdn: &str,
        delete_old_rdn: bool,
    ) -> ModificationResult<ChangeRecord> {
        target.record(ChangeRecord::modify_dn(
            target.dn(),
            new_rdn,
            delete_old_rdn,
            None,
        ))
    }

    /// Move an entry, keeping its RDN, under a new parent.
    pub fn move_entry(target: &EntryTarget, new_parent: &str) -> ModificationResult<ChangeRecord> {
        if new_parent.trim().is_empty() {
            return Err(ModificationError::invalid_operation(format!(
                "no new parent given for '{}'",
                target.dn()
            )));
        }
        let rdn = dn::rdn(target.dn());
        target.record(ChangeRecord::modify_dn(
            target.dn(),
            rdn,
            false,
            Some(new_parent.to_string()),
        ))
    }

    pub fn delete_entry(target: &EntryTarget) -> ModificationResult<ChangeRecord> {
        target.record(ChangeRecord::delete(target.dn()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Change, ModKind, OID_MANAGE_DSA_IT};

    fn edits(record: &ChangeRecord) -> Vec<(ModKind, String)> {
        match record.change() {
            Change::Modify { edits } => edits
                .iter()
                .map(|e| {
                    let value = e
                        .values
                        .first()
                        .and_then(AttributeValue::as_text)
                        .unwrap_or_default()
                        .to_string();
                    (e.kind, value)
                })
                .collect(),
            other => panic!("expected modify, got {other:?}"),
        }
    }

    #[test]
    fn test_single_valued_modify_is_one_replace() {
        let target = EntryTarget::new("cn=john,dc=test");
        let record =
            ChangeRecordBuilder::modify_value(&target, "sn", 1, "Smith", "Smyth").unwrap();
        assert_eq!(edits(&record), vec![(ModKind::Replace, "Smyth".to_string())]);
    }

    #[test]
    fn test_multi_valued_modify_adds_then_deletes() {
        let target = EntryTarget::new("cn=john,dc=test");
        let record =
            ChangeRecordBuilder::modify_value(&target, "mail", 3, "old@test", "new@test").unwrap();
        assert_eq!(
            edits(&record),
            vec![
                (ModKind::Add, "new@test".to_string()),
                (ModKind::Delete, "old@test".to_string()),
            ]
        );
    }

    #[test]
    fn test_modify_without_values_is_invalid() {
        let target = EntryTarget::new("cn=john,dc=test");
        let err = ChangeRecordBuilder::modify_value(&target, "mail", 0, "a", "b").unwrap_err();
        assert!(matches!(err, ModificationError::InvalidOperation { .. }));
    }

    #[test]
    fn test_move_keeps_rdn() {
        let target = EntryTarget::new("cn=a,ou=x,dc=test");
        let record = ChangeRecordBuilder::move_entry(&target, "ou=y,dc=test").unwrap();
        assert_eq!(
            record.change(),
            &Change::ModifyDn {
                new_rdn: "cn=a".to_string(),
                delete_old_rdn: false,
                new_superior: Some("ou=y,dc=test".to_string()),
            }
        );
    }

    #[test]
    fn test_rename_passes_delete_old_flag() {
        let target = EntryTarget::new("cn=a,ou=x,dc=test");
        let record = ChangeRecordBuilder::rename_entry(&target, "cn=b", true).unwrap();
        assert_eq!(
            record.change(),
            &Change::ModifyDn {
                new_rdn: "cn=b".to_string(),
                delete_old_rdn: true,
                new_superior: None,
            }
        );
    }

    #[test]
    fn test_referral_object_carries_manage_dsa_it() {
        let target = EntryTarget::referral_object("cn=ref,dc=test");
        let record = ChangeRecordBuilder::delete_entry(&target).unwrap();
        assert_eq!(record.controls().len(), 1);
        assert_eq!(record.controls()[0].oid, OID_MANAGE_DSA_IT);
    }

    #[test]
    fn test_create_entry_requires_attributes() {
        let target = EntryTarget::new("cn=new,dc=test");
        assert!(ChangeRecordBuilder::create_entry(&target, vec![]).is_err());
        assert!(ChangeRecordBuilder::create_entry(
            &target,
            vec![Attribute::new("objectClass", ["top", "person"])]
        )
        .is_ok());
    }
}
