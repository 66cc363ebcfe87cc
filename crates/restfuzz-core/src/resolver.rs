//! Placeholder substitution against the identifier table.

use restfuzz_types::{FieldRef, Request, Slot};

use crate::errors::UnresolvedDependency;
use crate::id_table::{DynamicIdTable, KeyMatch, ValuePolicy};

/// Fills placeholders from a [`DynamicIdTable`].
///
/// Resolution is all-or-nothing: if any key is missing nothing is substituted
/// and the first missing key (in key order) is reported. The table is never
/// written.
#[derive(Debug, Clone, Copy, Default)]
pub struct Resolver {
    pub key_match: KeyMatch,
    pub value_policy: ValuePolicy,
}

impl Resolver {
    pub fn new(key_match: KeyMatch, value_policy: ValuePolicy) -> Self {
        Self {
            key_match,
            value_policy,
        }
    }

    /// Whether every key would resolve against `table`.
    pub fn can_resolve<'a>(
        &self,
        keys: impl IntoIterator<Item = &'a String>,
        table: &DynamicIdTable,
    ) -> bool {
        keys.into_iter()
            .all(|k| table.find_key(k, self.key_match).is_some())
    }

    pub fn resolve(
        &self,
        draft: &Request,
        table: &DynamicIdTable,
    ) -> Result<Request, UnresolvedDependency> {
        let pending: Vec<(FieldRef, String)> = draft
            .leaves()
            .into_iter()
            .filter_map(|(field, slot)| slot.placeholder_key().map(|k| (field, k.to_string())))
            .collect();

        for key in draft.placeholder_keys() {
            if table
                .lookup(&key, self.key_match, self.value_policy)
                .is_none()
            {
                return Err(UnresolvedDependency::new(&key));
            }
        }

        let mut resolved = draft.clone();
        for (field, key) in pending {
            let value = table
                .lookup(&key, self.key_match, self.value_policy)
                .cloned()
                .ok_or_else(|| UnresolvedDependency::new(&key))?;
            if let Some(slot) = resolved.slot_mut(&field) {
                *slot = Slot::Concrete(value);
            }
        }
        resolved.path = resolved
            .render_path()
            .map_err(|key| UnresolvedDependency::new(&key))?;
        Ok(resolved)
    }
}
