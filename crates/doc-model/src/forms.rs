use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;

use crate::{FieldValue, FormField};

/// Role the viewer is opened with (e.g. the recipient role of a signing session).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextRole(String);

impl ContextRole {
    pub fn new(role: impl Into<String>) -> Self {
        Self(role.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Owner of field values and validation. The viewer only forwards edits and reads back.
pub trait FormDataStore {
    fn on_field_change(&self, name: &str, value: FieldValue);
    fn get_field_value(&self, name: &str) -> Option<FieldValue>;
}

/// Owner of hide rules. Consulted once per field-set change, never per frame.
pub trait FieldVisibilityPolicy {
    fn should_hide_field(&self, field: &FormField, role: &ContextRole) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ShowAllFields;

impl FieldVisibilityPolicy for ShowAllFields {
    fn should_hide_field(&self, _field: &FormField, _role: &ContextRole) -> bool {
        false
    }
}

/// Hides fields assigned to a role other than the viewing one. Unassigned fields stay visible.
#[derive(Debug, Clone, Default)]
pub struct AssignedRolePolicy {
    assignments: HashMap<String, ContextRole>,
}

impl AssignedRolePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(mut self, field_name: impl Into<String>, role: ContextRole) -> Self {
        self.assignments.insert(field_name.into(), role);
        self
    }
}

impl FieldVisibilityPolicy for AssignedRolePolicy {
    fn should_hide_field(&self, field: &FormField, role: &ContextRole) -> bool {
        self.assignments.get(&field.name).is_some_and(|assigned| assigned != role)
    }
}

/// In-memory store that records every change it receives.
#[derive(Debug, Default)]
pub struct MemoryFormStore {
    values: RefCell<HashMap<String, FieldValue>>,
    changes: RefCell<Vec<(String, FieldValue)>>,
}

impl MemoryFormStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(self, name: impl Into<String>, value: FieldValue) -> Self {
        self.values.borrow_mut().insert(name.into(), value);
        self
    }

    pub fn changes(&self) -> Vec<(String, FieldValue)> {
        self.changes.borrow().clone()
    }
}

impl FormDataStore for MemoryFormStore {
    fn on_field_change(&self, name: &str, value: FieldValue) {
        self.changes.borrow_mut().push((name.to_owned(), value.clone()));
        self.values.borrow_mut().insert(name.to_owned(), value);
    }

    fn get_field_value(&self, name: &str) -> Option<FieldValue> {
        self.values.borrow().get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FieldAppearance, FieldId, FieldRect, FieldType};

    fn field(name: &str) -> FormField {
        FormField {
            id: FieldId::new(format!("{name}-1")),
            name: name.to_owned(),
            page: 1,
            rect: FieldRect::new(0.0, 0.0, 10.0, 10.0),
            field_type: FieldType::Text,
            value: FieldValue::Empty,
            appearance: FieldAppearance::default(),
        }
    }

    #[test]
    fn assigned_role_policy_hides_other_recipients_fields() {
        let signer = ContextRole::new("signer");
        let approver = ContextRole::new("approver");
        let policy = AssignedRolePolicy::new()
            .assign("signature", signer.clone())
            .assign("approval", approver.clone());

        assert!(!policy.should_hide_field(&field("signature"), &signer));
        assert!(policy.should_hide_field(&field("approval"), &signer));
        assert!(!policy.should_hide_field(&field("notes"), &signer));
        assert!(!ShowAllFields.should_hide_field(&field("approval"), &signer));
    }

    #[test]
    fn memory_store_records_changes_verbatim() {
        let store = MemoryFormStore::new().with_value("name", FieldValue::Text("Ada".to_owned()));
        assert_eq!(store.get_field_value("name"), Some(FieldValue::Text("Ada".to_owned())));

        store.on_field_change("agree", FieldValue::Checked(true));
        assert_eq!(store.get_field_value("agree"), Some(FieldValue::Checked(true)));
        assert_eq!(store.changes(), vec![("agree".to_owned(), FieldValue::Checked(true))]);
        assert_eq!(store.get_field_value("missing"), None);
    }
}
