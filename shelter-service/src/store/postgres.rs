use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::async_connection_wrapper::AsyncConnectionWrapper;
use diesel_async::pooled_connection::bb8::Pool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use shared::RequestStatus;
use tracing::info;
use uuid::Uuid;

use super::{Session, Store, UnitFuture};
use crate::error::{ShelterError, ShelterResult};
use crate::models::{Donation, InventoryItem, ItemDetails, ItemFilter, ItemKey, Request};
use crate::schema::*;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

const ACTIVE_REQUEST_INDEX: &str = "requests_one_active_per_user";

type DbPool = Pool<AsyncPgConnection>;

/// Postgres-backed store. Each atomic unit is one database transaction.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, pool_size: u32) -> ShelterResult<Self> {
        let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(config)
            .await
            .map_err(|e| ShelterError::storage(format!("building connection pool: {e}")))?;
        Ok(Self { pool })
    }
}

/// Applies pending migrations over a blocking wrapper connection.
pub async fn run_migrations(database_url: &str) -> ShelterResult<()> {
    let url = database_url.to_string();
    tokio::task::spawn_blocking(move || -> ShelterResult<()> {
        let mut conn = AsyncConnectionWrapper::<AsyncPgConnection>::establish(&url)
            .map_err(|e| ShelterError::storage(format!("migration connection: {e}")))?;
        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| ShelterError::storage(format!("migration error: {e}")))?;
        for version in applied {
            info!("Applied migration {}", version);
        }
        Ok(())
    })
    .await
    .map_err(|e| ShelterError::storage(format!("migration task: {e}")))?
}

#[async_trait]
impl Store for PgStore {
    async fn atomic<T, F>(&self, unit: F) -> ShelterResult<T>
    where
        T: Send + 'static,
        F: for<'s> FnOnce(&'s mut dyn Session) -> UnitFuture<'s, T> + Send + 'static,
    {
        let mut pooled = self.pool.get().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;
        conn.transaction::<T, ShelterError, _>(|conn| {
            Box::pin(async move {
                let mut session = PgSession { conn };
                unit(&mut session).await
            })
        })
        .await
    }
}

struct PgSession<'c> {
    conn: &'c mut AsyncPgConnection,
}

/// Escapes `%`, `_` and `\` so a name can be matched with `ILIKE` exactly.
fn like_exact(name: &str) -> String {
    let mut pattern = String::with_capacity(name.len());
    for c in name.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern
}

fn active_states() -> Vec<RequestStatus> {
    RequestStatus::ACTIVE.to_vec()
}

#[async_trait]
impl<'c> Session for PgSession<'c> {
    async fn item(&mut self, id: Uuid) -> ShelterResult<Option<InventoryItem>> {
        let conn = &mut *self.conn;
        let item = inventory::table
            .find(id)
            .get_result::<InventoryItem>(conn)
            .await
            .optional()?;
        Ok(item)
    }

    async fn lock_item(&mut self, id: Uuid) -> ShelterResult<Option<InventoryItem>> {
        let conn = &mut *self.conn;
        let item = inventory::table
            .find(id)
            .for_update()
            .get_result::<InventoryItem>(conn)
            .await
            .optional()?;
        Ok(item)
    }

    async fn find_item(&mut self, key: &ItemKey) -> ShelterResult<Option<InventoryItem>> {
        let conn = &mut *self.conn;
        let item = inventory::table
            .filter(inventory::name.ilike(like_exact(&key.name)))
            .filter(inventory::category.eq(key.category))
            .filter(inventory::unit.eq(key.unit))
            .for_update()
            .first::<InventoryItem>(conn)
            .await
            .optional()?;
        Ok(item)
    }

    async fn list_items(&mut self, filter: &ItemFilter) -> ShelterResult<Vec<InventoryItem>> {
        let conn = &mut *self.conn;
        let mut query = inventory::table.into_boxed();
        if let Some(available) = filter.available {
            query = query.filter(inventory::available.eq(available));
        }
        if let Some(category) = filter.category {
            query = query.filter(inventory::category.eq(category));
        }
        let items = query
            .order(inventory::name.asc())
            .load::<InventoryItem>(conn)
            .await?;
        Ok(items)
    }

    async fn insert_item(&mut self, item: &InventoryItem) -> ShelterResult<()> {
        let conn = &mut *self.conn;
        diesel::insert_into(inventory::table)
            .values(item)
            .execute(conn)
            .await?;
        Ok(())
    }

    async fn update_item_details(
        &mut self,
        id: Uuid,
        details: &ItemDetails,
    ) -> ShelterResult<Option<InventoryItem>> {
        let conn = &mut *self.conn;
        let item = diesel::update(inventory::table.find(id))
            .set(details)
            .get_result::<InventoryItem>(conn)
            .await
            .optional()?;
        Ok(item)
    }

    async fn shift_quantity(
        &mut self,
        id: Uuid,
        delta: i32,
        at: DateTime<Utc>,
    ) -> ShelterResult<Option<InventoryItem>> {
        let conn = &mut *self.conn;
        let item = diesel::update(
            inventory::table
                .filter(inventory::id.eq(id))
                .filter((inventory::quantity + delta).ge(0)),
        )
        .set((
            inventory::quantity.eq(inventory::quantity + delta),
            inventory::updated_at.eq(at),
        ))
        .get_result::<InventoryItem>(conn)
        .await
        .optional()?;
        Ok(item)
    }

    async fn delete_item(&mut self, id: Uuid) -> ShelterResult<bool> {
        let conn = &mut *self.conn;
        let deleted = diesel::delete(inventory::table.find(id))
            .execute(conn)
            .await?;
        Ok(deleted > 0)
    }

    async fn insert_donation(&mut self, donation: &Donation) -> ShelterResult<()> {
        let conn = &mut *self.conn;
        diesel::insert_into(donations::table)
            .values(donation)
            .execute(conn)
            .await?;
        Ok(())
    }

    async fn donation(&mut self, id: Uuid) -> ShelterResult<Option<Donation>> {
        let conn = &mut *self.conn;
        let donation = donations::table
            .find(id)
            .for_update()
            .get_result::<Donation>(conn)
            .await
            .optional()?;
        Ok(donation)
    }

    async fn list_donations(&mut self, owner: Option<Uuid>) -> ShelterResult<Vec<Donation>> {
        let conn = &mut *self.conn;
        let mut query = donations::table.into_boxed();
        if let Some(owner) = owner {
            query = query.filter(donations::user_id.eq(owner));
        }
        let rows = query
            .order(donations::created_at.desc())
            .load::<Donation>(conn)
            .await?;
        Ok(rows)
    }

    async fn save_donation(&mut self, donation: &Donation) -> ShelterResult<()> {
        let conn = &mut *self.conn;
        let updated = diesel::update(donations::table.find(donation.id))
            .set(donation)
            .execute(conn)
            .await?;
        if updated == 0 {
            return Err(ShelterError::NotFound("donation"));
        }
        Ok(())
    }

    async fn delete_donation(&mut self, id: Uuid) -> ShelterResult<bool> {
        let conn = &mut *self.conn;
        let deleted = diesel::delete(donations::table.find(id))
            .execute(conn)
            .await?;
        Ok(deleted > 0)
    }

    async fn insert_request(&mut self, request: &Request) -> ShelterResult<()> {
        let conn = &mut *self.conn;
        let inserted = diesel::insert_into(requests::table)
            .values(request)
            .execute(conn)
            .await;
        match inserted {
            Ok(_) => Ok(()),
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info))
                if info.constraint_name() == Some(ACTIVE_REQUEST_INDEX) =>
            {
                Err(ShelterError::ActiveRequestExists)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn request(&mut self, id: Uuid) -> ShelterResult<Option<Request>> {
        let conn = &mut *self.conn;
        let request = requests::table
            .find(id)
            .for_update()
            .get_result::<Request>(conn)
            .await
            .optional()?;
        Ok(request)
    }

    async fn active_request(&mut self, user_id: Uuid) -> ShelterResult<Option<Request>> {
        let conn = &mut *self.conn;
        let request = requests::table
            .filter(requests::user_id.eq(user_id))
            .filter(requests::status.eq_any(active_states()))
            .first::<Request>(conn)
            .await
            .optional()?;
        Ok(request)
    }

    async fn count_active_requests_for_item(&mut self, item_id: Uuid) -> ShelterResult<i64> {
        let conn = &mut *self.conn;
        let count = requests::table
            .filter(requests::item_id.eq(item_id))
            .filter(requests::status.eq_any(active_states()))
            .count()
            .get_result::<i64>(conn)
            .await?;
        Ok(count)
    }

    async fn list_requests(&mut self, owner: Option<Uuid>) -> ShelterResult<Vec<Request>> {
        let conn = &mut *self.conn;
        let mut query = requests::table.into_boxed();
        if let Some(owner) = owner {
            query = query.filter(requests::user_id.eq(owner));
        }
        let rows = query
            .order(requests::created_at.desc())
            .load::<Request>(conn)
            .await?;
        Ok(rows)
    }

    async fn save_request(&mut self, request: &Request) -> ShelterResult<()> {
        let conn = &mut *self.conn;
        let updated = diesel::update(requests::table.find(request.id))
            .set(request)
            .execute(conn)
            .await?;
        if updated == 0 {
            return Err(ShelterError::NotFound("request"));
        }
        Ok(())
    }

    async fn delete_request(&mut self, id: Uuid) -> ShelterResult<bool> {
        let conn = &mut *self.conn;
        let deleted = diesel::delete(requests::table.find(id))
            .execute(conn)
            .await?;
        Ok(deleted > 0)
    }
}
