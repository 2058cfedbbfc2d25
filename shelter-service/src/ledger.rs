//! Inventory ledger: the only code that changes `InventoryItem::quantity`.
//!
//! Every function here runs inside an atomic unit and takes the unit's
//! session. Quantities never go below zero: debits are checked against the
//! locked row and applied with a conditional update, so a concurrent
//! depletion surfaces as `InsufficientStock` rather than a negative count.

use chrono::Utc;
use shared::AdjustOperation;
use tracing::info;
use uuid::Uuid;

use crate::error::{ShelterError, ShelterResult};
use crate::models::{InventoryItem, ItemKey};
use crate::store::Session;

fn ensure_positive(amount: i32) -> ShelterResult<()> {
    if amount <= 0 {
        return Err(ShelterError::invalid_operation(format!(
            "amount must be positive, got {amount}"
        )));
    }
    Ok(())
}

fn insufficient(item: &InventoryItem, requested: i32) -> ShelterError {
    ShelterError::InsufficientStock {
        requested,
        available: item.quantity,
        unit: item.unit,
    }
}

async fn locked(tx: &mut dyn Session, item_id: Uuid) -> ShelterResult<InventoryItem> {
    tx.lock_item(item_id)
        .await?
        .ok_or(ShelterError::NotFound("inventory item"))
}

/// Parses an adjustment direction; anything but `add`/`subtract` is an
/// `InvalidOperation`.
pub fn parse_operation(raw: &str) -> ShelterResult<AdjustOperation> {
    raw.parse::<AdjustOperation>().map_err(|_| {
        ShelterError::invalid_operation(format!(
            "unknown adjustment {raw:?}; use \"add\" or \"subtract\""
        ))
    })
}

pub async fn find_matching_item(
    tx: &mut dyn Session,
    key: &ItemKey,
) -> ShelterResult<Option<InventoryItem>> {
    tx.find_item(key).await
}

/// Inserts a new stock record holding `quantity`.
pub async fn open_item(
    tx: &mut dyn Session,
    key: &ItemKey,
    quantity: i32,
    description: Option<String>,
) -> ShelterResult<InventoryItem> {
    if quantity < 0 {
        return Err(ShelterError::invalid_operation("quantity cannot be negative"));
    }
    let now = Utc::now();
    let item = InventoryItem {
        id: Uuid::new_v4(),
        name: key.name.clone(),
        category: key.category,
        quantity,
        unit: key.unit,
        description,
        available: true,
        created_at: now,
        updated_at: now,
    };
    tx.insert_item(&item).await?;
    info!(item_id = %item.id, quantity, "Opened inventory item {}", item.name);
    Ok(item)
}

pub async fn credit(tx: &mut dyn Session, item_id: Uuid, amount: i32) -> ShelterResult<InventoryItem> {
    ensure_positive(amount)?;
    let item = locked(tx, item_id).await?;
    if item.quantity.checked_add(amount).is_none() {
        return Err(ShelterError::invalid_operation("quantity would overflow"));
    }
    let updated = tx
        .shift_quantity(item_id, amount, Utc::now())
        .await?
        .ok_or(ShelterError::NotFound("inventory item"))?;
    info!(
        item_id = %item_id,
        amount,
        quantity = updated.quantity,
        "Credited inventory"
    );
    Ok(updated)
}

/// Credits the item matching `key`, creating it with `amount` when no
/// match exists.
pub async fn credit_by_key(
    tx: &mut dyn Session,
    key: &ItemKey,
    amount: i32,
    description: Option<&str>,
) -> ShelterResult<InventoryItem> {
    ensure_positive(amount)?;
    match find_matching_item(tx, key).await? {
        Some(existing) => credit(tx, existing.id, amount).await,
        None => {
            let description = description
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string);
            open_item(tx, key, amount, description).await
        }
    }
}

pub async fn debit(tx: &mut dyn Session, item_id: Uuid, amount: i32) -> ShelterResult<InventoryItem> {
    ensure_positive(amount)?;
    let item = locked(tx, item_id).await?;
    if amount > item.quantity {
        return Err(insufficient(&item, amount));
    }
    let updated = tx
        .shift_quantity(item_id, -amount, Utc::now())
        .await?
        .ok_or_else(|| insufficient(&item, amount))?;
    info!(
        item_id = %item_id,
        amount,
        quantity = updated.quantity,
        "Debited inventory"
    );
    Ok(updated)
}

pub async fn adjust(
    tx: &mut dyn Session,
    item_id: Uuid,
    amount: i32,
    operation: AdjustOperation,
) -> ShelterResult<InventoryItem> {
    match operation {
        AdjustOperation::Add => credit(tx, item_id, amount).await,
        AdjustOperation::Subtract => debit(tx, item_id, amount).await,
    }
}

/// Moves an item to `target` by crediting or debiting the difference.
pub async fn set_quantity(tx: &mut dyn Session, item_id: Uuid, target: i32) -> ShelterResult<InventoryItem> {
    if target < 0 {
        return Err(ShelterError::invalid_operation("quantity cannot be negative"));
    }
    let item = locked(tx, item_id).await?;
    let delta = target - item.quantity;
    if delta > 0 {
        credit(tx, item_id, delta).await
    } else if delta < 0 {
        debit(tx, item_id, -delta).await
    } else {
        Ok(item)
    }
}
