use chrono::Utc;
use serde::Serialize;
use shared::{Category, Principal, RequestStatus, Unit};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::coordinator::Coordinator;
use crate::error::{ShelterError, ShelterResult};
use crate::ledger;
use crate::models::{merge_text, InventoryItem, Request};
use crate::store::{Session, Store};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRequest {
    pub item_id: Uuid,
    pub quantity: i32,
    pub description: Option<String>,
}

/// Owner edit of a pending request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestEdit {
    pub quantity: Option<i32>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusChange {
    pub status: Option<RequestStatus>,
    pub rejection_reason: Option<String>,
    pub notes: Option<String>,
}

/// What a request shows about its item. The item may have left the
/// catalog since, so views carry it as optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemSummary {
    pub id: Uuid,
    pub name: String,
    pub category: Category,
    pub unit: Unit,
    pub quantity: i32,
}

impl From<&InventoryItem> for ItemSummary {
    fn from(item: &InventoryItem) -> Self {
        Self {
            id: item.id,
            name: item.name.clone(),
            category: item.category,
            unit: item.unit,
            quantity: item.quantity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestView {
    #[serde(flatten)]
    pub request: Request,
    pub item: Option<ItemSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Effect {
    Unchanged,
    Transition,
    Debit,
    CreditBack,
}

/// Request transition table. Only `pendiente -> aceptada` takes stock and
/// only `aceptada -> rechazada` returns it.
fn plan(from: RequestStatus, to: RequestStatus) -> ShelterResult<Effect> {
    use RequestStatus::*;
    match (from, to) {
        (a, b) if a == b => Ok(Effect::Unchanged),
        (Pending, Accepted) => Ok(Effect::Debit),
        (Accepted, Rejected) => Ok(Effect::CreditBack),
        (Pending, Rejected) => Ok(Effect::Transition),
        (Accepted, Shipped) | (Accepted, Received) | (Shipped, Received) => Ok(Effect::Transition),
        (from, to) => Err(ShelterError::invalid_state(format!(
            "a request cannot move from {from} to {to}"
        ))),
    }
}

fn ensure_quantity(quantity: i32) -> ShelterResult<()> {
    if quantity <= 0 {
        return Err(ShelterError::invalid_operation(format!(
            "quantity must be positive, got {quantity}"
        )));
    }
    Ok(())
}

/// Stock check applied at creation and on owner edits. Approval re-checks
/// inside the ledger debit.
fn ensure_in_stock(item: &InventoryItem, quantity: i32) -> ShelterResult<()> {
    if quantity > item.quantity {
        return Err(ShelterError::InsufficientStock {
            requested: quantity,
            available: item.quantity,
            unit: item.unit,
        });
    }
    Ok(())
}

pub struct RequestService<S> {
    coordinator: Coordinator<S>,
}

impl<S> Clone for RequestService<S> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
        }
    }
}

impl<S: Store> RequestService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            coordinator: Coordinator::new(store),
        }
    }

    pub async fn create(&self, principal: &Principal, new: NewRequest) -> ShelterResult<RequestView> {
        let user_id = principal.user_id;
        self.coordinator
            .run_atomic("request.create", move |tx| {
                Box::pin(create_request(tx, user_id, new))
            })
            .await
    }

    pub async fn list(&self, principal: &Principal) -> ShelterResult<Vec<RequestView>> {
        let owner = principal.visible_owner();
        self.coordinator
            .run_atomic("request.list", move |tx| {
                Box::pin(async move {
                    let requests = tx.list_requests(owner).await?;
                    with_items(tx, requests).await
                })
            })
            .await
    }

    pub async fn get(&self, principal: &Principal, id: Uuid) -> ShelterResult<RequestView> {
        let view = self
            .coordinator
            .run_atomic("request.get", move |tx| {
                Box::pin(async move {
                    let request = tx
                        .request(id)
                        .await?
                        .ok_or(ShelterError::NotFound("request"))?;
                    let item = tx.item(request.item_id).await?;
                    Ok(RequestView {
                        item: item.as_ref().map(ItemSummary::from),
                        request,
                    })
                })
            })
            .await?;
        if !principal.can_view(view.request.user_id) {
            return Err(ShelterError::forbidden("not allowed to view this request"));
        }
        Ok(view)
    }

    /// Owner edit; only pending requests can change, and the request stays
    /// pending for another review.
    pub async fn update(&self, principal: &Principal, id: Uuid, edit: RequestEdit) -> ShelterResult<Request> {
        let principal = *principal;
        self.coordinator
            .run_atomic("request.update", move |tx| {
                Box::pin(edit_request(tx, principal, id, edit))
            })
            .await
    }

    /// Administrator review. Approval debits the item and a rejection after
    /// approval credits it back, each in the same unit as the status write.
    pub async fn update_status(
        &self,
        principal: &Principal,
        id: Uuid,
        change: StatusChange,
    ) -> ShelterResult<Request> {
        if !principal.is_admin() {
            return Err(ShelterError::forbidden(
                "only administrators can review requests",
            ));
        }
        self.coordinator
            .run_atomic("request.update_status", move |tx| {
                Box::pin(apply_status(tx, id, change))
            })
            .await
    }

    pub async fn delete(&self, principal: &Principal, id: Uuid) -> ShelterResult<()> {
        let principal = *principal;
        self.coordinator
            .run_atomic("request.delete", move |tx| {
                Box::pin(delete_request(tx, principal, id))
            })
            .await
    }
}

/// Attaches item summaries, reading each referenced item once.
async fn with_items(tx: &mut dyn Session, requests: Vec<Request>) -> ShelterResult<Vec<RequestView>> {
    let mut items: HashMap<Uuid, Option<ItemSummary>> = HashMap::new();
    let mut views = Vec::with_capacity(requests.len());
    for request in requests {
        let item = match items.get(&request.item_id) {
            Some(item) => item.clone(),
            None => {
                let item = tx.item(request.item_id).await?.as_ref().map(ItemSummary::from);
                items.insert(request.item_id, item.clone());
                item
            }
        };
        views.push(RequestView { request, item });
    }
    Ok(views)
}

async fn create_request(tx: &mut dyn Session, user_id: Uuid, new: NewRequest) -> ShelterResult<RequestView> {
    ensure_quantity(new.quantity)?;
    if tx.active_request(user_id).await?.is_some() {
        return Err(ShelterError::ActiveRequestExists);
    }
    let item = tx
        .item(new.item_id)
        .await?
        .ok_or(ShelterError::NotFound("inventory item"))?;
    if !item.available {
        return Err(ShelterError::Unavailable(item.name));
    }
    ensure_in_stock(&item, new.quantity)?;

    let now = Utc::now();
    let request = Request {
        id: Uuid::new_v4(),
        user_id,
        item_id: item.id,
        quantity: new.quantity,
        status: RequestStatus::Pending,
        rejection_reason: None,
        description: merge_text(None, new.description),
        notes: None,
        created_at: now,
        updated_at: now,
    };
    tx.insert_request(&request).await?;
    info!(
        request_id = %request.id,
        %user_id,
        item_id = %item.id,
        quantity = request.quantity,
        "Created request for {}",
        item.name
    );
    Ok(RequestView {
        item: Some(ItemSummary::from(&item)),
        request,
    })
}

async fn edit_request(
    tx: &mut dyn Session,
    principal: Principal,
    id: Uuid,
    edit: RequestEdit,
) -> ShelterResult<Request> {
    let mut request = tx.request(id).await?.ok_or(ShelterError::NotFound("request"))?;
    if !principal.owns(request.user_id) {
        return Err(ShelterError::forbidden("only the owner can edit a request"));
    }
    if request.status != RequestStatus::Pending {
        return Err(ShelterError::invalid_state(format!(
            "only pending requests can be edited; this one is {}",
            request.status
        )));
    }

    if let Some(quantity) = edit.quantity {
        ensure_quantity(quantity)?;
        request.quantity = quantity;
    }
    let item = tx
        .item(request.item_id)
        .await?
        .ok_or(ShelterError::NotFound("inventory item"))?;
    ensure_in_stock(&item, request.quantity)?;

    request.description = merge_text(request.description.take(), edit.description);
    request.status = RequestStatus::Pending;
    request.updated_at = Utc::now();
    tx.save_request(&request).await?;
    info!(request_id = %id, quantity = request.quantity, "Updated request");
    Ok(request)
}

async fn apply_status(tx: &mut dyn Session, id: Uuid, change: StatusChange) -> ShelterResult<Request> {
    let mut request = tx.request(id).await?.ok_or(ShelterError::NotFound("request"))?;
    let from = request.status;
    let to = change.status.unwrap_or(from);
    let effect = plan(from, to)?;

    if to == RequestStatus::Rejected && effect != Effect::Unchanged {
        let reason = merge_text(None, change.rejection_reason.clone()).ok_or_else(|| {
            ShelterError::invalid_operation("a rejection reason is required")
        })?;
        request.rejection_reason = Some(reason);
    } else {
        request.rejection_reason =
            merge_text(request.rejection_reason.take(), change.rejection_reason);
    }

    match effect {
        Effect::Debit => {
            let item = ledger::debit(tx, request.item_id, request.quantity).await?;
            info!(request_id = %id, item_id = %item.id, quantity = item.quantity, "Stock allocated to request");
        }
        Effect::CreditBack => {
            let item = ledger::credit(tx, request.item_id, request.quantity).await?;
            info!(request_id = %id, item_id = %item.id, quantity = item.quantity, "Stock returned from request");
        }
        Effect::Unchanged | Effect::Transition => {}
    }

    request.status = to;
    request.notes = merge_text(request.notes.take(), change.notes);
    request.updated_at = Utc::now();
    tx.save_request(&request).await?;
    if effect != Effect::Unchanged {
        info!(request_id = %id, %from, %to, "Request status changed");
    }
    Ok(request)
}

async fn delete_request(tx: &mut dyn Session, principal: Principal, id: Uuid) -> ShelterResult<()> {
    let request = tx.request(id).await?.ok_or(ShelterError::NotFound("request"))?;
    if !principal.is_admin() {
        if !principal.owns(request.user_id) {
            return Err(ShelterError::forbidden("not allowed to delete this request"));
        }
        if request.status != RequestStatus::Pending {
            return Err(ShelterError::invalid_state(
                "only pending requests can be withdrawn",
            ));
        }
    }

    if request.status == RequestStatus::Accepted {
        if tx.lock_item(request.item_id).await?.is_some() {
            ledger::credit(tx, request.item_id, request.quantity).await?;
        } else {
            warn!(
                request_id = %id,
                item_id = %request.item_id,
                "Item no longer exists; allocated stock not returned"
            );
        }
    }
    tx.delete_request(id).await?;
    info!(request_id = %id, status = %request.status, "Deleted request");
    Ok(())
}
