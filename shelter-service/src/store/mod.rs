//! Storage sessions and atomic units.
//!
//! A [`Session`] is every read and write the core performs, scoped to one
//! atomic unit. [`Store::atomic`] opens a session, runs the unit, and either
//! commits everything it wrote or discards all of it.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use uuid::Uuid;

use crate::error::ShelterResult;
use crate::models::{Donation, InventoryItem, ItemDetails, ItemFilter, ItemKey, Request};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Future returned by an atomic unit; borrows the session for `'s`.
pub type UnitFuture<'s, T> = BoxFuture<'s, ShelterResult<T>>;

#[async_trait]
pub trait Session: Send {
    async fn item(&mut self, id: Uuid) -> ShelterResult<Option<InventoryItem>>;

    /// Reads an item and holds it against concurrent writers until the
    /// unit ends.
    async fn lock_item(&mut self, id: Uuid) -> ShelterResult<Option<InventoryItem>>;

    async fn find_item(&mut self, key: &ItemKey) -> ShelterResult<Option<InventoryItem>>;

    /// Sorted by name.
    async fn list_items(&mut self, filter: &ItemFilter) -> ShelterResult<Vec<InventoryItem>>;

    async fn insert_item(&mut self, item: &InventoryItem) -> ShelterResult<()>;

    async fn update_item_details(
        &mut self,
        id: Uuid,
        details: &ItemDetails,
    ) -> ShelterResult<Option<InventoryItem>>;

    /// Applies `quantity += delta` only when the result stays non-negative.
    /// Returns `None` when the item is missing or the guard refused.
    async fn shift_quantity(
        &mut self,
        id: Uuid,
        delta: i32,
        at: DateTime<Utc>,
    ) -> ShelterResult<Option<InventoryItem>>;

    async fn delete_item(&mut self, id: Uuid) -> ShelterResult<bool>;

    async fn insert_donation(&mut self, donation: &Donation) -> ShelterResult<()>;

    /// Reads a donation and holds it until the unit ends.
    async fn donation(&mut self, id: Uuid) -> ShelterResult<Option<Donation>>;

    /// Newest first; `owner = None` lists every donation.
    async fn list_donations(&mut self, owner: Option<Uuid>) -> ShelterResult<Vec<Donation>>;

    async fn save_donation(&mut self, donation: &Donation) -> ShelterResult<()>;

    async fn delete_donation(&mut self, id: Uuid) -> ShelterResult<bool>;

    /// Fails with `ActiveRequestExists` if the request is active and its
    /// owner already holds another active request.
    async fn insert_request(&mut self, request: &Request) -> ShelterResult<()>;

    /// Reads a request and holds it until the unit ends.
    async fn request(&mut self, id: Uuid) -> ShelterResult<Option<Request>>;

    async fn active_request(&mut self, user_id: Uuid) -> ShelterResult<Option<Request>>;

    async fn count_active_requests_for_item(&mut self, item_id: Uuid) -> ShelterResult<i64>;

    /// Newest first; `owner = None` lists every request.
    async fn list_requests(&mut self, owner: Option<Uuid>) -> ShelterResult<Vec<Request>>;

    async fn save_request(&mut self, request: &Request) -> ShelterResult<()>;

    async fn delete_request(&mut self, id: Uuid) -> ShelterResult<bool>;
}

#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Runs `unit` against a fresh session. Everything the unit wrote is
    /// committed when it returns `Ok` and discarded when it returns `Err`;
    /// the caller receives the unit's own error.
    async fn atomic<T, F>(&self, unit: F) -> ShelterResult<T>
    where
        T: Send + 'static,
        F: for<'s> FnOnce(&'s mut dyn Session) -> UnitFuture<'s, T> + Send + 'static;
}
