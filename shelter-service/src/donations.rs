use chrono::Utc;
use serde::Serialize;
use shared::{Category, DonationStatus, Principal, Unit};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::coordinator::Coordinator;
use crate::error::{ShelterError, ShelterResult};
use crate::ledger;
use crate::models::{merge_text, normalize_name, Donation};
use crate::store::{Session, Store};

/// Number of donations returned in `DonationStats::recent`.
pub const RECENT_DONATIONS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDonation {
    pub item_name: String,
    pub category: Category,
    pub quantity: i32,
    pub unit: Unit,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusCount {
    pub status: DonationStatus,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryTotal {
    pub category: Category,
    pub count: usize,
    pub total_quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DonationStats {
    pub total: usize,
    pub by_status: Vec<StatusCount>,
    pub by_category: Vec<CategoryTotal>,
    pub recent: Vec<Donation>,
}

/// What a status change does to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Effect {
    Unchanged,
    Transition,
    CreditInventory,
}

/// Donation transition table. Re-applying the current state is accepted
/// and changes nothing, which keeps the receipt credit to a single
/// application per donation.
fn plan(from: DonationStatus, to: DonationStatus) -> ShelterResult<Effect> {
    use DonationStatus::*;
    match (from, to) {
        (a, b) if a == b => Ok(Effect::Unchanged),
        (Pending, Accepted) | (Pending, Rejected) => Ok(Effect::Transition),
        (Pending, Received) | (Accepted, Received) => Ok(Effect::CreditInventory),
        (Received, _) => Err(ShelterError::invalid_state(
            "received donations are final; their stock is already in the inventory",
        )),
        (from, to) => Err(ShelterError::invalid_state(format!(
            "a donation cannot move from {from} to {to}"
        ))),
    }
}

pub struct DonationService<S> {
    coordinator: Coordinator<S>,
}

impl<S> Clone for DonationService<S> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
        }
    }
}

impl<S: Store> DonationService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            coordinator: Coordinator::new(store),
        }
    }

    /// Records a donation offer in `pendiente`.
    pub async fn create(&self, principal: &Principal, new: NewDonation) -> ShelterResult<Donation> {
        let item_name = normalize_name(&new.item_name)?;
        let now = Utc::now();
        let donation = Donation {
            id: Uuid::new_v4(),
            user_id: principal.user_id,
            item_name,
            category: new.category,
            quantity: new.quantity,
            unit: new.unit,
            status: DonationStatus::Pending,
            description: merge_text(None, new.description),
            notes: None,
            created_at: now,
            updated_at: now,
        };
        let donation = self
            .coordinator
            .run_atomic("donation.create", move |tx| {
                Box::pin(async move {
                    tx.insert_donation(&donation).await?;
                    Ok(donation)
                })
            })
            .await?;
        info!(
            donation_id = %donation.id,
            user_id = %donation.user_id,
            quantity = donation.quantity,
            "Created donation of {}",
            donation.item_name
        );
        Ok(donation)
    }

    pub async fn list(&self, principal: &Principal) -> ShelterResult<Vec<Donation>> {
        let owner = principal.visible_owner();
        self.coordinator
            .run_atomic("donation.list", move |tx| {
                Box::pin(async move { tx.list_donations(owner).await })
            })
            .await
    }

    pub async fn get(&self, principal: &Principal, id: Uuid) -> ShelterResult<Donation> {
        let donation = self
            .coordinator
            .run_atomic("donation.get", move |tx| {
                Box::pin(async move {
                    tx.donation(id)
                        .await?
                        .ok_or(ShelterError::NotFound("donation"))
                })
            })
            .await?;
        if !principal.can_view(donation.user_id) {
            return Err(ShelterError::forbidden("not allowed to view this donation"));
        }
        Ok(donation)
    }

    /// Moves a donation along its lifecycle. Reaching `recibida` credits the
    /// inventory in the same atomic unit as the status write.
    pub async fn update_status(
        &self,
        principal: &Principal,
        id: Uuid,
        status: DonationStatus,
        notes: Option<String>,
    ) -> ShelterResult<Donation> {
        require_admin(principal)?;
        self.coordinator
            .run_atomic("donation.update_status", move |tx| {
                Box::pin(apply_status(tx, id, status, notes))
            })
            .await
    }

    /// Removes a donation that has not reached the inventory.
    pub async fn delete(&self, principal: &Principal, id: Uuid) -> ShelterResult<()> {
        require_admin(principal)?;
        self.coordinator
            .run_atomic("donation.delete", move |tx| Box::pin(delete_donation(tx, id)))
            .await
    }

    pub async fn stats(&self, principal: &Principal) -> ShelterResult<DonationStats> {
        require_admin(principal)?;
        let donations = self
            .coordinator
            .run_atomic("donation.stats", |tx| {
                Box::pin(async move { tx.list_donations(None).await })
            })
            .await?;
        Ok(summarize(donations))
    }
}

fn require_admin(principal: &Principal) -> ShelterResult<()> {
    if principal.is_admin() {
        Ok(())
    } else {
        Err(ShelterError::forbidden("only administrators can manage donations"))
    }
}

async fn apply_status(
    tx: &mut dyn Session,
    id: Uuid,
    status: DonationStatus,
    notes: Option<String>,
) -> ShelterResult<Donation> {
    let mut donation = tx
        .donation(id)
        .await?
        .ok_or(ShelterError::NotFound("donation"))?;
    let from = donation.status;
    let effect = plan(from, status)?;

    if effect == Effect::CreditInventory {
        let item = ledger::credit_by_key(
            tx,
            &donation.item_key(),
            donation.quantity,
            donation.description.as_deref(),
        )
        .await?;
        info!(
            donation_id = %donation.id,
            item_id = %item.id,
            quantity = item.quantity,
            "Donation received into inventory"
        );
    }

    donation.status = status;
    donation.notes = merge_text(donation.notes.take(), notes);
    donation.updated_at = Utc::now();
    tx.save_donation(&donation).await?;

    if effect != Effect::Unchanged {
        info!(donation_id = %donation.id, %from, to = %status, "Donation status changed");
    }
    Ok(donation)
}

async fn delete_donation(tx: &mut dyn Session, id: Uuid) -> ShelterResult<()> {
    let donation = tx
        .donation(id)
        .await?
        .ok_or(ShelterError::NotFound("donation"))?;
    if donation.status == DonationStatus::Received {
        return Err(ShelterError::invalid_state(
            "received donations cannot be deleted",
        ));
    }
    tx.delete_donation(id).await?;
    info!(donation_id = %id, "Deleted donation");
    Ok(())
}

/// `donations` must be newest first.
fn summarize(donations: Vec<Donation>) -> DonationStats {
    let mut by_status: BTreeMap<DonationStatus, usize> = BTreeMap::new();
    let mut by_category: BTreeMap<Category, CategoryTotal> = BTreeMap::new();
    for donation in &donations {
        *by_status.entry(donation.status).or_default() += 1;
        let entry = by_category
            .entry(donation.category)
            .or_insert(CategoryTotal {
                category: donation.category,
                count: 0,
                total_quantity: 0,
            });
        entry.count += 1;
        entry.total_quantity += i64::from(donation.quantity);
    }
    DonationStats {
        total: donations.len(),
        by_status: by_status
            .into_iter()
            .map(|(status, count)| StatusCount { status, count })
            .collect(),
        by_category: by_category.into_values().collect(),
        recent: donations.into_iter().take(RECENT_DONATIONS).collect(),
    }
}
