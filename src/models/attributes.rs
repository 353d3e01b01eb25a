use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Attribute selections of a product or variant: attribute id -> choice value id.
///
/// Persisted as a JSON object. JSON object keys are strings, so ids are
/// written as decimal strings and parsed back on load.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult,
)]
#[serde(transparent)]
pub struct AttributeMap(BTreeMap<i32, i32>);

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, attribute_id: i32, choice_id: i32) -> Self {
        self.0.insert(attribute_id, choice_id);
        self
    }

    pub fn choice_for(&self, attribute_id: i32) -> Option<i32> {
        self.0.get(&attribute_id).copied()
    }

    pub fn choice_ids(&self) -> impl Iterator<Item = i32> + '_ {
        self.0.values().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        self.0.iter().map(|(a, c)| (*a, *c))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl FromIterator<(i32, i32)> for AttributeMap {
    fn from_iter<T: IntoIterator<Item = (i32, i32)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
