//! Search and filter bar for item lists

use crate::models::{Category, Item, Location};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemFilter {
    /// Case-insensitive text matched against title and description
    pub search: String,
    pub category: Option<Category>,
    pub location: Option<Location>,
}

impl ItemFilter {
    pub fn is_active(&self) -> bool {
        !self.search.trim().is_empty() || self.category.is_some() || self.location.is_some()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn matches(&self, item: &Item) -> bool {
        let needle = self.search.trim().to_lowercase();
        let text_match = needle.is_empty()
            || item.title.to_lowercase().contains(&needle)
            || item.description.to_lowercase().contains(&needle);
        text_match
            && self.category.map_or(true, |c| item.category == c)
            && self.location.map_or(true, |l| item.location == l)
    }

    /// Matching items, order kept.
    pub fn apply(&self, items: &[Item]) -> Vec<Item> {
        items.iter().filter(|i| self.matches(i)).cloned().collect()
    }
}
