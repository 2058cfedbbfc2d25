use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Session, Store, UnitFuture};
use crate::error::{ShelterError, ShelterResult};
use crate::models::{Donation, InventoryItem, ItemDetails, ItemFilter, ItemKey, Request};

#[derive(Debug, Clone, Default)]
struct Tables {
    inventory: HashMap<Uuid, InventoryItem>,
    donations: HashMap<Uuid, Donation>,
    requests: HashMap<Uuid, Request>,
}

/// Process-local store. Atomic units run one at a time against a copy of
/// the tables, and the copy replaces the live tables only on success.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn atomic<T, F>(&self, unit: F) -> ShelterResult<T>
    where
        T: Send + 'static,
        F: for<'s> FnOnce(&'s mut dyn Session) -> UnitFuture<'s, T> + Send + 'static,
    {
        let mut live = self.tables.lock().await;
        let mut working = live.clone();
        let result = {
            let mut session = MemorySession {
                tables: &mut working,
            };
            unit(&mut session).await
        };
        if result.is_ok() {
            *live = working;
        }
        result
    }
}

struct MemorySession<'t> {
    tables: &'t mut Tables,
}

fn newest_first<T>(rows: &mut [T], created_at: impl Fn(&T) -> DateTime<Utc>) {
    rows.sort_by(|a, b| created_at(b).cmp(&created_at(a)));
}

#[async_trait]
impl<'t> Session for MemorySession<'t> {
    async fn item(&mut self, id: Uuid) -> ShelterResult<Option<InventoryItem>> {
        Ok(self.tables.inventory.get(&id).cloned())
    }

    async fn lock_item(&mut self, id: Uuid) -> ShelterResult<Option<InventoryItem>> {
        self.item(id).await
    }

    async fn find_item(&mut self, key: &ItemKey) -> ShelterResult<Option<InventoryItem>> {
        Ok(self
            .tables
            .inventory
            .values()
            .find(|item| key.matches(item))
            .cloned())
    }

    async fn list_items(&mut self, filter: &ItemFilter) -> ShelterResult<Vec<InventoryItem>> {
        let mut items: Vec<InventoryItem> = self
            .tables
            .inventory
            .values()
            .filter(|item| filter.accepts(item))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }

    async fn insert_item(&mut self, item: &InventoryItem) -> ShelterResult<()> {
        self.tables.inventory.insert(item.id, item.clone());
        Ok(())
    }

    async fn update_item_details(
        &mut self,
        id: Uuid,
        details: &ItemDetails,
    ) -> ShelterResult<Option<InventoryItem>> {
        let Some(item) = self.tables.inventory.get_mut(&id) else {
            return Ok(None);
        };
        item.name = details.name.clone();
        item.category = details.category;
        item.unit = details.unit;
        item.description = details.description.clone();
        item.available = details.available;
        item.updated_at = details.updated_at;
        Ok(Some(item.clone()))
    }

    async fn shift_quantity(
        &mut self,
        id: Uuid,
        delta: i32,
        at: DateTime<Utc>,
    ) -> ShelterResult<Option<InventoryItem>> {
        let Some(item) = self.tables.inventory.get_mut(&id) else {
            return Ok(None);
        };
        match item.quantity.checked_add(delta) {
            Some(next) if next >= 0 => {
                item.quantity = next;
                item.updated_at = at;
                Ok(Some(item.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn delete_item(&mut self, id: Uuid) -> ShelterResult<bool> {
        Ok(self.tables.inventory.remove(&id).is_some())
    }

    async fn insert_donation(&mut self, donation: &Donation) -> ShelterResult<()> {
        self.tables.donations.insert(donation.id, donation.clone());
        Ok(())
    }

    async fn donation(&mut self, id: Uuid) -> ShelterResult<Option<Donation>> {
        Ok(self.tables.donations.get(&id).cloned())
    }

    async fn list_donations(&mut self, owner: Option<Uuid>) -> ShelterResult<Vec<Donation>> {
        let mut rows: Vec<Donation> = self
            .tables
            .donations
            .values()
            .filter(|d| owner.map_or(true, |o| d.user_id == o))
            .cloned()
            .collect();
        newest_first(&mut rows, |d| d.created_at);
        Ok(rows)
    }

    async fn save_donation(&mut self, donation: &Donation) -> ShelterResult<()> {
        match self.tables.donations.get_mut(&donation.id) {
            Some(row) => {
                *row = donation.clone();
                Ok(())
            }
            None => Err(ShelterError::NotFound("donation")),
        }
    }

    async fn delete_donation(&mut self, id: Uuid) -> ShelterResult<bool> {
        Ok(self.tables.donations.remove(&id).is_some())
    }

    async fn insert_request(&mut self, request: &Request) -> ShelterResult<()> {
        if request.status.is_active() {
            let taken = self
                .tables
                .requests
                .values()
                .any(|r| r.user_id == request.user_id && r.status.is_active());
            if taken {
                return Err(ShelterError::ActiveRequestExists);
            }
        }
        self.tables.requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn request(&mut self, id: Uuid) -> ShelterResult<Option<Request>> {
        Ok(self.tables.requests.get(&id).cloned())
    }

    async fn active_request(&mut self, user_id: Uuid) -> ShelterResult<Option<Request>> {
        Ok(self
            .tables
            .requests
            .values()
            .find(|r| r.user_id == user_id && r.status.is_active())
            .cloned())
    }

    async fn count_active_requests_for_item(&mut self, item_id: Uuid) -> ShelterResult<i64> {
        let count = self
            .tables
            .requests
            .values()
            .filter(|r| r.item_id == item_id && r.status.is_active())
            .count();
        Ok(count as i64)
    }

    async fn list_requests(&mut self, owner: Option<Uuid>) -> ShelterResult<Vec<Request>> {
        let mut rows: Vec<Request> = self
            .tables
            .requests
            .values()
            .filter(|r| owner.map_or(true, |o| r.user_id == o))
            .cloned()
            .collect();
        newest_first(&mut rows, |r| r.created_at);
        Ok(rows)
    }

    async fn save_request(&mut self, request: &Request) -> ShelterResult<()> {
        match self.tables.requests.get_mut(&request.id) {
            Some(row) => {
                *row = request.clone();
                Ok(())
            }
            None => Err(ShelterError::NotFound("request")),
        }
    }

    async fn delete_request(&mut self, id: Uuid) -> ShelterResult<bool> {
        Ok(self.tables.requests.remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Category, RequestStatus, Unit};

    fn item(quantity: i32) -> InventoryItem {
        let now = Utc::now();
        InventoryItem {
            id: Uuid::new_v4(),
            name: "Dog Food".to_string(),
            category: Category::DogFood,
            quantity,
            unit: Unit::Kilograms,
            description: None,
            available: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn request(user_id: Uuid, status: RequestStatus) -> Request {
        let now = Utc::now();
        Request {
            id: Uuid::new_v4(),
            user_id,
            item_id: Uuid::new_v4(),
            quantity: 1,
            status,
            rejection_reason: None,
            description: None,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn committed_unit_is_visible_afterwards() {
        let store = MemoryStore::new();
        let stock = item(4);
        let id = stock.id;
        store
            .atomic(move |tx| Box::pin(async move { tx.insert_item(&stock).await }))
            .await
            .unwrap();

        let found = store
            .atomic(move |tx| Box::pin(async move { tx.item(id).await }))
            .await
            .unwrap();
        assert_eq!(found.map(|i| i.quantity), Some(4));
    }

    #[tokio::test]
    async fn failed_unit_leaves_no_trace() {
        let store = MemoryStore::new();
        let stock = item(4);
        let id = stock.id;
        store
            .atomic(move |tx| Box::pin(async move { tx.insert_item(&stock).await }))
            .await
            .unwrap();

        let result: ShelterResult<()> = store
            .atomic(move |tx| {
                Box::pin(async move {
                    tx.shift_quantity(id, 10, Utc::now()).await?;
                    Err(ShelterError::storage("disk on fire"))
                })
            })
            .await;
        assert_eq!(result, Err(ShelterError::storage("disk on fire")));

        let found = store
            .atomic(move |tx| Box::pin(async move { tx.item(id).await }))
            .await
            .unwrap();
        assert_eq!(found.map(|i| i.quantity), Some(4));
    }

    #[tokio::test]
    async fn shift_quantity_refuses_to_go_negative() {
        let store = MemoryStore::new();
        let stock = item(3);
        let id = stock.id;
        let (refused, emptied) = store
            .atomic(move |tx| {
                Box::pin(async move {
                    tx.insert_item(&stock).await?;
                    let refused = tx.shift_quantity(id, -4, Utc::now()).await?;
                    let emptied = tx.shift_quantity(id, -3, Utc::now()).await?;
                    Ok((refused, emptied))
                })
            })
            .await
            .unwrap();
        assert!(refused.is_none());
        assert_eq!(emptied.map(|i| i.quantity), Some(0));
    }

    #[tokio::test]
    async fn second_active_request_is_refused() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let first = request(user, RequestStatus::Pending);
        let second = request(user, RequestStatus::Pending);
        let closed = request(user, RequestStatus::Received);

        let result = store
            .atomic(move |tx| {
                Box::pin(async move {
                    tx.insert_request(&first).await?;
                    tx.insert_request(&closed).await?;
                    tx.insert_request(&second).await
                })
            })
            .await;
        assert_eq!(result, Err(ShelterError::ActiveRequestExists));
    }
}
