use chrono::Utc;
use serde::Serialize;
use shared::{Category, Principal, Unit};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::coordinator::Coordinator;
use crate::error::{ShelterError, ShelterResult};
use crate::ledger;
use crate::models::{merge_text, normalize_name, InventoryItem, ItemFilter, ItemKey};
use crate::store::{Session, Store};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewItem {
    pub name: String,
    pub category: Category,
    pub quantity: i32,
    pub unit: Unit,
    pub description: Option<String>,
}

/// Partial update; absent fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemPatch {
    pub name: Option<String>,
    pub category: Option<Category>,
    pub quantity: Option<i32>,
    pub unit: Option<Unit>,
    pub description: Option<String>,
    pub available: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryStock {
    pub category: Category,
    pub count: usize,
    pub total_quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InventoryStats {
    pub total: usize,
    pub available: usize,
    pub out_of_stock: usize,
    pub by_category: Vec<CategoryStock>,
}

fn require_admin(principal: &Principal) -> ShelterResult<()> {
    if principal.is_admin() {
        Ok(())
    } else {
        Err(ShelterError::forbidden("administrator role required"))
    }
}

/// Catalog operations on inventory items. Quantity changes are delegated
/// to the ledger.
pub struct InventoryService<S> {
    coordinator: Coordinator<S>,
}

impl<S> Clone for InventoryService<S> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
        }
    }
}

impl<S: Store> InventoryService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            coordinator: Coordinator::new(store),
        }
    }

    pub async fn list(&self, _principal: &Principal, filter: ItemFilter) -> ShelterResult<Vec<InventoryItem>> {
        self.coordinator
            .run_atomic("inventory.list", move |tx| {
                Box::pin(async move { tx.list_items(&filter).await })
            })
            .await
    }

    pub async fn get(&self, _principal: &Principal, id: Uuid) -> ShelterResult<InventoryItem> {
        self.coordinator
            .run_atomic("inventory.get", move |tx| {
                Box::pin(async move {
                    tx.item(id)
                        .await?
                        .ok_or(ShelterError::NotFound("inventory item"))
                })
            })
            .await
    }

    pub async fn create(&self, principal: &Principal, new: NewItem) -> ShelterResult<InventoryItem> {
        require_admin(principal)?;
        self.coordinator
            .run_atomic("inventory.create", move |tx| Box::pin(create_item(tx, new)))
            .await
    }

    pub async fn update(&self, principal: &Principal, id: Uuid, patch: ItemPatch) -> ShelterResult<InventoryItem> {
        require_admin(principal)?;
        self.coordinator
            .run_atomic("inventory.update", move |tx| Box::pin(update_item(tx, id, patch)))
            .await
    }

    pub async fn delete(&self, principal: &Principal, id: Uuid) -> ShelterResult<()> {
        require_admin(principal)?;
        self.coordinator
            .run_atomic("inventory.delete", move |tx| Box::pin(delete_item(tx, id)))
            .await
    }

    /// Manual stock correction: `operation` is `add` or `subtract`.
    pub async fn adjust(
        &self,
        principal: &Principal,
        id: Uuid,
        amount: i32,
        operation: &str,
    ) -> ShelterResult<InventoryItem> {
        require_admin(principal)?;
        let operation = ledger::parse_operation(operation)?;
        self.coordinator
            .run_atomic("inventory.adjust", move |tx| {
                Box::pin(async move { ledger::adjust(tx, id, amount, operation).await })
            })
            .await
    }

    pub async fn stats(&self, principal: &Principal) -> ShelterResult<InventoryStats> {
        require_admin(principal)?;
        let items = self
            .coordinator
            .run_atomic("inventory.stats", |tx| {
                Box::pin(async move { tx.list_items(&ItemFilter::default()).await })
            })
            .await?;
        Ok(summarize(&items))
    }
}

async fn create_item(tx: &mut dyn Session, new: NewItem) -> ShelterResult<InventoryItem> {
    let key = ItemKey::new(&normalize_name(&new.name)?, new.category, new.unit);
    if let Some(existing) = ledger::find_matching_item(tx, &key).await? {
        return Err(ShelterError::DuplicateItem {
            id: existing.id,
            name: existing.name,
            quantity: existing.quantity,
        });
    }
    let description = merge_text(None, new.description);
    ledger::open_item(tx, &key, new.quantity, description).await
}

async fn update_item(tx: &mut dyn Session, id: Uuid, patch: ItemPatch) -> ShelterResult<InventoryItem> {
    let item = tx
        .lock_item(id)
        .await?
        .ok_or(ShelterError::NotFound("inventory item"))?;

    let mut details = item.details();
    if let Some(name) = patch.name.as_deref().filter(|n| !n.trim().is_empty()) {
        details.name = normalize_name(name)?;
    }
    if let Some(category) = patch.category {
        details.category = category;
    }
    if let Some(unit) = patch.unit {
        details.unit = unit;
    }
    if let Some(description) = patch.description {
        details.description = Some(description.trim().to_string()).filter(|d| !d.is_empty());
    }
    if let Some(available) = patch.available {
        details.available = available;
    }
    details.updated_at = Utc::now();

    let key = ItemKey::new(&details.name, details.category, details.unit);
    if key != item.key() {
        if let Some(other) = ledger::find_matching_item(tx, &key).await? {
            if other.id != id {
                return Err(ShelterError::DuplicateItem {
                    id: other.id,
                    name: other.name,
                    quantity: other.quantity,
                });
            }
        }
    }

    let mut updated = tx
        .update_item_details(id, &details)
        .await?
        .ok_or(ShelterError::NotFound("inventory item"))?;
    if let Some(quantity) = patch.quantity {
        updated = ledger::set_quantity(tx, id, quantity).await?;
    }
    info!(item_id = %id, "Updated inventory item {}", updated.name);
    Ok(updated)
}

async fn delete_item(tx: &mut dyn Session, id: Uuid) -> ShelterResult<()> {
    let item = tx
        .lock_item(id)
        .await?
        .ok_or(ShelterError::NotFound("inventory item"))?;
    let pending = tx.count_active_requests_for_item(id).await?;
    if pending > 0 {
        return Err(ShelterError::invalid_state(format!(
            "{} is referenced by {pending} active request(s)",
            item.name
        )));
    }
    tx.delete_item(id).await?;
    info!(item_id = %id, "Deleted inventory item {}", item.name);
    Ok(())
}

fn summarize(items: &[InventoryItem]) -> InventoryStats {
    let mut by_category: BTreeMap<Category, CategoryStock> = BTreeMap::new();
    for item in items {
        let entry = by_category.entry(item.category).or_insert(CategoryStock {
            category: item.category,
            count: 0,
            total_quantity: 0,
        });
        entry.count += 1;
        entry.total_quantity += i64::from(item.quantity);
    }
    InventoryStats {
        total: items.len(),
        available: items.iter().filter(|i| i.available && i.quantity > 0).count(),
        out_of_stock: items.iter().filter(|i| i.quantity == 0).count(),
        by_category: by_category.into_values().collect(),
    }
}
