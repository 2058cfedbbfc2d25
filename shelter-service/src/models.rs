use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use shared::{Category, DonationStatus, RequestStatus, Unit};
use uuid::Uuid;

use crate::error::{ShelterError, ShelterResult};

/// Accepted length of an item or donation name, after trimming.
pub const NAME_LENGTH: std::ops::RangeInclusive<usize> = 2..=100;

/// A stock record. `quantity` is owned by the ledger and is never written
/// through `ItemDetails`.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Insertable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::inventory)]
pub struct InventoryItem {
    pub id: Uuid,
    pub name: String,
    pub category: Category,
    pub quantity: i32,
    pub unit: Unit,
    pub description: Option<String>,
    pub available: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Catalog fields an administrator may rewrite directly.
#[derive(Debug, Clone, PartialEq, Eq, AsChangeset)]
#[diesel(table_name = crate::schema::inventory)]
#[diesel(treat_none_as_null = true)]
pub struct ItemDetails {
    pub name: String,
    pub category: Category,
    pub unit: Unit,
    pub description: Option<String>,
    pub available: bool,
    pub updated_at: DateTime<Utc>,
}

impl InventoryItem {
    pub fn key(&self) -> ItemKey {
        ItemKey::new(&self.name, self.category, self.unit)
    }

    pub fn details(&self) -> ItemDetails {
        ItemDetails {
            name: self.name.clone(),
            category: self.category,
            unit: self.unit,
            description: self.description.clone(),
            available: self.available,
            updated_at: self.updated_at,
        }
    }
}

/// Match key between donated goods and stock records: name compared
/// trimmed and case-insensitively, category and unit exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemKey {
    pub name: String,
    pub category: Category,
    pub unit: Unit,
}

impl ItemKey {
    pub fn new(name: &str, category: Category, unit: Unit) -> Self {
        Self {
            name: name.trim().to_string(),
            category,
            unit,
        }
    }

    pub fn matches(&self, item: &InventoryItem) -> bool {
        item.category == self.category
            && item.unit == self.unit
            && item.name.trim().to_lowercase() == self.name.to_lowercase()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ItemFilter {
    pub available: Option<bool>,
    pub category: Option<Category>,
}

impl ItemFilter {
    pub fn accepts(&self, item: &InventoryItem) -> bool {
        self.available.map_or(true, |a| item.available == a)
            && self.category.map_or(true, |c| item.category == c)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Insertable, Identifiable, AsChangeset, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::donations)]
#[diesel(treat_none_as_null = true)]
pub struct Donation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub item_name: String,
    pub category: Category,
    pub quantity: i32,
    pub unit: Unit,
    pub status: DonationStatus,
    pub description: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Donation {
    pub fn item_key(&self) -> ItemKey {
        ItemKey::new(&self.item_name, self.category, self.unit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Insertable, Identifiable, AsChangeset, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::requests)]
#[diesel(treat_none_as_null = true)]
pub struct Request {
    pub id: Uuid,
    pub user_id: Uuid,
    pub item_id: Uuid,
    pub quantity: i32,
    pub status: RequestStatus,
    pub rejection_reason: Option<String>,
    pub description: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Trims `raw` and checks it against [`NAME_LENGTH`].
pub fn normalize_name(raw: &str) -> ShelterResult<String> {
    let name = raw.trim();
    if !NAME_LENGTH.contains(&name.chars().count()) {
        return Err(ShelterError::Validation(format!(
            "name must be {} to {} characters, got {:?}",
            NAME_LENGTH.start(),
            NAME_LENGTH.end(),
            name
        )));
    }
    Ok(name.to_string())
}

/// Keeps `current` unless `incoming` carries non-blank text.
pub(crate) fn merge_text(current: Option<String>, incoming: Option<String>) -> Option<String> {
    match incoming.map(|s| s.trim().to_string()) {
        Some(s) if !s.is_empty() => Some(s),
        _ => current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str) -> InventoryItem {
        let now = Utc::now();
        InventoryItem {
            id: Uuid::new_v4(),
            name: name.to_string(),
            category: Category::DogFood,
            quantity: 0,
            unit: Unit::Kilograms,
            description: None,
            available: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn key_matches_case_insensitively() {
        let key = ItemKey::new("  dog food ", Category::DogFood, Unit::Kilograms);
        assert!(key.matches(&item("Dog Food")));
        assert!(!key.matches(&item("Dog Foods")));
        let other_unit = ItemKey::new("Dog Food", Category::DogFood, Unit::Packages);
        assert!(!other_unit.matches(&item("Dog Food")));
    }

    #[test]
    fn filter_combines_conditions() {
        let mut hidden = item("Collar");
        hidden.available = false;
        let filter = ItemFilter {
            available: Some(true),
            category: None,
        };
        assert!(filter.accepts(&item("Collar")));
        assert!(!filter.accepts(&hidden));
        assert!(ItemFilter::default().accepts(&hidden));
    }

    #[test]
    fn names_are_measured_after_trimming() {
        assert_eq!(normalize_name("  Dog Food ").as_deref(), Ok("Dog Food"));
        assert!(matches!(normalize_name("    "), Err(ShelterError::Validation(_))));
        assert!(matches!(normalize_name(" x "), Err(ShelterError::Validation(_))));
        assert!(normalize_name(&"a".repeat(101)).is_err());
    }

    #[test]
    fn merge_text_ignores_blank_updates() {
        let kept = merge_text(Some("old".into()), Some("   ".into()));
        assert_eq!(kept.as_deref(), Some("old"));
        let replaced = merge_text(Some("old".into()), Some(" new ".into()));
        assert_eq!(replaced.as_deref(), Some("new"));
        assert_eq!(merge_text(None, None), None);
    }
}
