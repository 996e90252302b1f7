use chrono::Utc;
use serde::{Deserialize, Serialize};
use shared::application::{self, ApplicationDocuments, ApplicationForm, ApplicationOutcome};
use shared::auth::{self, Action, Landing};
use shared::catalog::{self, OfferingUpdate, StoreDraft, StoreListing};
use shared::evidence::{EvidenceKind, Upload};
use shared::reservation::{self, ReservationChange};
use shared::limits;
use shared::standing;
use shared::*;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::evidence::EvidenceStore;
use crate::store::{DashboardCounts, MarketStore, ReservationFilter, StoreFilter};

#[derive(Debug, Clone, Deserialize)]
pub struct Signup {
    pub username: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    pub actor: Actor,
    pub landing: Landing,
    pub unread_notifications: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreDetail {
    pub store: Store,
    /// Only offerings a customer can reserve right now.
    pub offerings: Vec<TankOffering>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SellerStoreView {
    pub store: Store,
    pub offerings: Vec<TankOffering>,
    pub open_orders: Vec<Reservation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransitionResult {
    pub reservation_id: Uuid,
    pub status: ReservationStatus,
    pub notifications_queued: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Inbox {
    pub notifications: Vec<Notification>,
    pub marked_read: usize,
}

/// Uploaded seller documents, before they reach the blob store.
#[derive(Debug, Clone, Default)]
pub struct SellerDocuments {
    pub business_permit: Option<Upload>,
    pub dti_certificate: Option<Upload>,
    pub mayors_permit: Option<Upload>,
    pub valid_id: Option<Upload>,
}

/// Entry point for every actor action.
///
/// Each method takes the actor loaded for the current request, plans the
/// change with the pure core and hands the plan to the store in one call.
#[derive(Clone)]
pub struct Marketplace {
    store: Arc<dyn MarketStore>,
    evidence: Arc<dyn EvidenceStore>,
}

impl Marketplace {
    pub fn new(store: Arc<dyn MarketStore>, evidence: Arc<dyn EvidenceStore>) -> Self {
        Self { store, evidence }
    }

    pub async fn actor(&self, id: Uuid) -> Result<Actor, MarketError> {
        self.store.actor(id).await
    }

    pub async fn signup(&self, request: Signup) -> Result<Actor, MarketError> {
        let username = request.username.trim();
        if username.is_empty() {
            return Err(MarketError::validation("Username is required."));
        }
        limits::ensure_fits("Username", username, limits::USERNAME)?;
        let phone = non_empty(request.phone);
        if let Some(phone) = &phone {
            limits::ensure_fits("Phone number", phone, limits::PHONE)?;
        }
        if self.store.actor_by_username(username).await?.is_some() {
            return Err(MarketError::validation("That username is already taken."));
        }

        let actor = Actor {
            phone,
            address: non_empty(request.address),
            ..Actor::customer(username)
        };
        self.store.insert_actor(&actor).await?;
        info!("Registered customer {} ({})", actor.username, actor.id);
        Ok(actor)
    }

    /// Makes sure the configured admin account exists.
    pub async fn seed_admin(&self, username: &str) -> Result<Actor, MarketError> {
        limits::ensure_fits("Username", username, limits::USERNAME)?;
        if let Some(existing) = self.store.actor_by_username(username).await? {
            if existing.is_admin() {
                return Ok(existing);
            }
            return Err(MarketError::validation(format!(
                "Username {username} belongs to a non-admin account."
            )));
        }
        let admin = Actor::admin(username);
        self.store.insert_actor(&admin).await?;
        info!("Seeded admin account {} ({})", admin.username, admin.id);
        Ok(admin)
    }

    pub async fn profile(&self, actor: &Actor) -> Result<Profile, MarketError> {
        Ok(Profile {
            landing: auth::landing(actor.role, actor.seller_status),
            unread_notifications: self.store.unread_count(actor.id).await?,
            actor: actor.clone(),
        })
    }

    // customer portal

    pub async fn browse_stores(&self, actor: &Actor) -> Result<Vec<Store>, MarketError> {
        auth::ensure(actor, Action::BrowseStores)?;
        self.store.stores(StoreFilter::Active).await
    }

    pub async fn store_detail(&self, actor: &Actor, store_id: Uuid) -> Result<StoreDetail, MarketError> {
        auth::ensure(actor, Action::BrowseStores)?;
        let store = self.store.store(store_id).await?;
        if !store.active {
            return Err(MarketError::NotFound);
        }
        let offerings = self
            .store
            .offerings(store.id)
            .await?
            .into_iter()
            .filter(TankOffering::is_available)
            .collect();
        Ok(StoreDetail { store, offerings })
    }

    pub async fn reserve(
        &self,
        customer: &Actor,
        tank_id: Uuid,
        name: &str,
    ) -> Result<Reservation, MarketError> {
        let tank = self.store.offering(tank_id).await?;
        let store = self.store.store(tank.store_id).await?;
        let placement = reservation::place(customer, &store, &tank, name, Utc::now())?;

        let reservation = self.store.place_reservation(&placement).await?;
        info!(
            "Reservation {} placed by {} for {} at store {}",
            reservation.id, customer.id, tank.tank_type, store.id
        );
        Ok(reservation)
    }

    pub async fn cancel_reservation(
        &self,
        customer: &Actor,
        reservation_id: Uuid,
    ) -> Result<TransitionResult, MarketError> {
        let reservation = self.store.reservation(reservation_id).await?;
        let store = self.store.store(reservation.store_id).await?;
        let change = reservation::cancel(customer, &reservation, &store)?;
        self.commit(change).await
    }

    pub async fn my_orders(&self, customer: &Actor) -> Result<Vec<Reservation>, MarketError> {
        auth::ensure(customer, Action::ViewOrders)?;
        self.store
            .reservations(&ReservationFilter::for_customer(customer.id))
            .await
    }

    pub async fn receipt(
        &self,
        customer: &Actor,
        reservation_id: Uuid,
    ) -> Result<Reservation, MarketError> {
        auth::ensure(customer, Action::ViewOrders)?;
        let reservation = self.store.reservation(reservation_id).await?;
        if reservation.customer_id != customer.id {
            return Err(MarketError::NotFound);
        }
        Ok(reservation)
    }

    /// Lists the actor's notifications newest first and marks the listed ones
    /// read.
    pub async fn notifications(&self, actor: &Actor) -> Result<Inbox, MarketError> {
        auth::ensure(actor, Action::ViewNotifications)?;
        let notifications = self.store.notifications(actor.id).await?;
        let unread: Vec<Uuid> = notifications
            .iter()
            .filter(|n| !n.read)
            .map(|n| n.id)
            .collect();
        let marked_read = self.store.mark_read(actor.id, &unread).await?;
        Ok(Inbox {
            notifications,
            marked_read,
        })
    }

    pub async fn unread_count(&self, actor: &Actor) -> Result<i64, MarketError> {
        auth::ensure(actor, Action::ViewNotifications)?;
        self.store.unread_count(actor.id).await
    }

    // seller applications

    pub async fn apply_as_seller(
        &self,
        actor: &Actor,
        form: ApplicationForm,
        documents: SellerDocuments,
    ) -> Result<SellerApplication, MarketError> {
        let existing = self.store.application_for(actor.id).await?;
        application::ensure_can_apply(actor, existing.as_ref())?;
        application::validate_form(&form)?;

        let mut stored = Vec::new();
        let outcome = async {
            let references = self.put_documents(documents, &mut stored).await?;
            let submitted =
                application::submit(actor, existing.as_ref(), &form, references, Utc::now())?;
            self.store.save_application(&submitted).await?;
            Ok::<_, MarketError>(submitted)
        }
        .await;

        match outcome {
            Ok(submitted) => {
                info!(
                    "Seller application {} submitted by {}",
                    submitted.id, actor.id
                );
                Ok(submitted)
            }
            Err(e) => {
                self.discard(&stored).await;
                Err(e)
            }
        }
    }

    pub async fn my_application(
        &self,
        actor: &Actor,
    ) -> Result<Option<SellerApplication>, MarketError> {
        self.store.application_for(actor.id).await
    }

    async fn put_documents(
        &self,
        documents: SellerDocuments,
        stored: &mut Vec<String>,
    ) -> Result<ApplicationDocuments, MarketError> {
        let mut references = ApplicationDocuments::default();
        let slots = [
            (
                EvidenceKind::BusinessPermit,
                documents.business_permit,
                &mut references.business_permit,
            ),
            (
                EvidenceKind::DtiCertificate,
                documents.dti_certificate,
                &mut references.dti_certificate,
            ),
            (
                EvidenceKind::MayorsPermit,
                documents.mayors_permit,
                &mut references.mayors_permit,
            ),
            (EvidenceKind::ValidId, documents.valid_id, &mut references.valid_id),
        ];

        for (kind, upload, slot) in slots {
            if let Some(upload) = upload {
                let reference = self.evidence.put(kind, &upload).await?;
                stored.push(reference.clone());
                *slot = Some(reference);
            }
        }
        Ok(references)
    }

    /// Removes blobs written for an operation that did not commit.
    async fn discard(&self, references: &[String]) {
        for reference in references {
            if let Err(e) = self.evidence.remove(reference).await {
                warn!("Failed to remove orphaned evidence {}: {}", reference, e);
            }
        }
    }

    // seller portal

    pub async fn create_store(
        &self,
        seller: &Actor,
        draft: StoreDraft,
        owner_photo: Option<Upload>,
    ) -> Result<StoreListing, MarketError> {
        auth::ensure(seller, Action::ManageStores)?;
        let photo =
            owner_photo.ok_or_else(|| MarketError::validation("Owner photo is required."))?;
        let reference = self.evidence.put(EvidenceKind::OwnerPhoto, &photo).await?;

        let outcome = async {
            let listing = catalog::open_store(seller, &draft, reference.clone(), Utc::now())?;
            self.store.insert_listing(&listing).await?;
            Ok::<_, MarketError>(listing)
        }
        .await;

        match outcome {
            Ok(listing) => {
                info!(
                    "Store {} opened by {} with {} offerings",
                    listing.store.id,
                    seller.id,
                    listing.offerings.len()
                );
                Ok(listing)
            }
            Err(e) => {
                self.discard(&[reference]).await;
                Err(e)
            }
        }
    }

    pub async fn seller_stores(&self, seller: &Actor) -> Result<Vec<Store>, MarketError> {
        auth::ensure(seller, Action::ManageStores)?;
        self.store.stores(StoreFilter::OwnedBy(seller.id)).await
    }

    pub async fn seller_store(
        &self,
        seller: &Actor,
        store_id: Uuid,
    ) -> Result<SellerStoreView, MarketError> {
        let store = self.store.store(store_id).await?;
        catalog::ensure_owner(seller, &store)?;

        let offerings = self.store.offerings(store.id).await?;
        let open_orders = self
            .store
            .reservations(&ReservationFilter {
                store_id: Some(store.id),
                statuses: ReservationStatus::OPEN.to_vec(),
                ..Default::default()
            })
            .await?;
        Ok(SellerStoreView {
            store,
            offerings,
            open_orders,
        })
    }

    pub async fn delete_store(&self, seller: &Actor, store_id: Uuid) -> Result<(), MarketError> {
        let store = self.store.store(store_id).await?;
        catalog::ensure_owner(seller, &store)?;

        self.store.delete_store(store.id).await?;
        if let Some(photo) = &store.owner_photo {
            self.discard(std::slice::from_ref(photo)).await;
        }
        info!("Store {} deleted by {}", store.id, seller.id);
        Ok(())
    }

    pub async fn update_offering(
        &self,
        seller: &Actor,
        tank_id: Uuid,
        update: OfferingUpdate,
    ) -> Result<TankOffering, MarketError> {
        let tank = self.store.offering(tank_id).await?;
        let store = self.store.store(tank.store_id).await?;
        catalog::ensure_owner(seller, &store)?;
        let update = catalog::validate_update(&update)?;

        let updated = self.store.update_offering(tank.id, &update).await?;
        info!(
            "Offering {} updated: price {}, active {}",
            updated.id, updated.price, updated.active
        );
        Ok(updated)
    }

    pub async fn upload_pickup_proof(
        &self,
        seller: &Actor,
        reservation_id: Uuid,
        upload: Option<Upload>,
    ) -> Result<TransitionResult, MarketError> {
        let reservation = self.store.reservation(reservation_id).await?;
        let store = self.store.store(reservation.store_id).await?;
        reservation::ensure_proof_accepted(seller, &reservation, &store)?;

        let upload =
            upload.ok_or_else(|| MarketError::validation("Please select a pickup proof image."))?;
        let proof = self.evidence.put(EvidenceKind::PickupProof, &upload).await?;

        let outcome = async {
            let change =
                reservation::attach_proof(seller, &reservation, &store, proof.clone(), Utc::now())?;
            self.commit(change).await
        }
        .await;
        if outcome.is_err() {
            self.discard(&[proof]).await;
        }
        outcome
    }

    // admin portal

    pub async fn dashboard(&self, admin: &Actor) -> Result<DashboardCounts, MarketError> {
        auth::ensure(admin, Action::ViewReports)?;
        self.store.dashboard().await
    }

    pub async fn applications(
        &self,
        admin: &Actor,
        status: Option<ApplicationStatus>,
    ) -> Result<Vec<SellerApplication>, MarketError> {
        auth::ensure(admin, Action::ReviewApplication)?;
        self.store.applications(status).await
    }

    /// Approves the application and promotes the applicant in one step.
    pub async fn approve_application(
        &self,
        admin: &Actor,
        application_id: Uuid,
    ) -> Result<ApplicationOutcome, MarketError> {
        let pending = self.store.application(application_id).await?;
        let change = application::approve(admin, &pending, Utc::now())?;
        self.commit_application(change).await
    }

    pub async fn reject_application(
        &self,
        admin: &Actor,
        application_id: Uuid,
        reason: &str,
    ) -> Result<ApplicationOutcome, MarketError> {
        let pending = self.store.application(application_id).await?;
        let change = application::reject(admin, &pending, reason, Utc::now())?;
        self.commit_application(change).await
    }

    async fn commit_application(
        &self,
        change: application::ApplicationChange,
    ) -> Result<ApplicationOutcome, MarketError> {
        let application = self.store.commit_application(&change).await?;
        info!(
            "Seller application {} {} by {}",
            application.id, application.status, change.reviewer
        );
        Ok(ApplicationOutcome {
            application,
            actor_promoted: change.promote,
            notifications_queued: change.notices.len(),
        })
    }

    pub async fn sellers(
        &self,
        admin: &Actor,
        status: SellerStatus,
    ) -> Result<Vec<Actor>, MarketError> {
        auth::ensure(admin, Action::ManageSellers)?;
        self.store.sellers(status).await
    }

    pub async fn toggle_seller_suspension(
        &self,
        admin: &Actor,
        seller_id: Uuid,
    ) -> Result<Actor, MarketError> {
        auth::ensure(admin, Action::ManageSellers)?;
        let seller = self.store.actor(seller_id).await?;
        let change = standing::toggle_suspension(admin, &seller)?;

        let updated = self.store.commit_standing(&change).await?;
        info!(
            "Seller {} moved {} -> {} by {}",
            updated.id, change.expected, change.next, admin.id
        );
        Ok(updated)
    }

    pub async fn all_stores(&self, admin: &Actor) -> Result<Vec<Store>, MarketError> {
        auth::ensure(admin, Action::ViewReports)?;
        self.store.stores(StoreFilter::All).await
    }

    pub async fn toggle_store(&self, admin: &Actor, store_id: Uuid) -> Result<Store, MarketError> {
        auth::ensure(admin, Action::ToggleStore)?;
        let store = self.store.store(store_id).await?;

        let updated = self
            .store
            .set_store_active(store.id, store.active, !store.active)
            .await?;
        info!(
            "Store {} {} by {}",
            updated.id,
            if updated.active { "activated" } else { "deactivated" },
            admin.id
        );
        Ok(updated)
    }

    pub async fn reservations_for_review(
        &self,
        admin: &Actor,
        status: Option<ReservationStatus>,
    ) -> Result<Vec<Reservation>, MarketError> {
        auth::ensure(admin, Action::ReviewPickup)?;
        self.store
            .reservations(&ReservationFilter {
                statuses: status.into_iter().collect(),
                ..Default::default()
            })
            .await
    }

    pub async fn approve_pickup(
        &self,
        admin: &Actor,
        reservation_id: Uuid,
    ) -> Result<TransitionResult, MarketError> {
        let reservation = self.store.reservation(reservation_id).await?;
        let store = self.store.store(reservation.store_id).await?;
        let change = reservation::approve(admin, &reservation, &store, Utc::now())?;
        self.commit(change).await
    }

    pub async fn reject_pickup(
        &self,
        admin: &Actor,
        reservation_id: Uuid,
        reason: &str,
    ) -> Result<TransitionResult, MarketError> {
        let reservation = self.store.reservation(reservation_id).await?;
        let store = self.store.store(reservation.store_id).await?;
        let change = reservation::reject(admin, &reservation, &store, reason, Utc::now())?;
        self.commit(change).await
    }

    async fn commit(&self, change: ReservationChange) -> Result<TransitionResult, MarketError> {
        let reservation = self.store.commit_reservation(&change).await?;
        info!(
            "Reservation {} moved {} -> {} on {:?}",
            reservation.id, change.expected, change.next, change.event
        );
        Ok(TransitionResult {
            reservation_id: reservation.id,
            status: reservation.status,
            notifications_queued: change.notices.len(),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::LocalEvidenceStore;
    use crate::outbox::NotificationDispatcher;
    use crate::store::MemoryStore;
    use bigdecimal::BigDecimal;
    use shared::catalog::OfferingTerms;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Harness {
        market: Marketplace,
        dispatcher: NotificationDispatcher,
        admin: Actor,
        media: TempDir,
    }

    async fn harness() -> Harness {
        let media = tempfile::tempdir().unwrap();
        let store: Arc<dyn MarketStore> = Arc::new(MemoryStore::new());
        let market = Marketplace::new(
            store.clone(),
            Arc::new(LocalEvidenceStore::new(media.path())),
        );
        let admin = market.seed_admin("admin").await.unwrap();
        Harness {
            market,
            dispatcher: NotificationDispatcher::new(store, Duration::from_secs(1)),
            admin,
            media,
        }
    }

    fn image(name: &str) -> Upload {
        Upload::new(name, vec![0x89u8; 64])
    }

    fn application_form(name: &str) -> ApplicationForm {
        ApplicationForm {
            business_name: format!("{name} LPG Trading"),
            business_address: "12 Rizal St, Quezon City".to_string(),
            tin_number: None,
            phone: "+639171234567".to_string(),
            email: format!("{name}@example.com"),
        }
    }

    fn documents() -> SellerDocuments {
        SellerDocuments {
            business_permit: Some(Upload::new("permit.pdf", b"%PDF-1.4".to_vec())),
            valid_id: Some(image("id.jpg")),
            ..Default::default()
        }
    }

    async fn customer(h: &Harness, username: &str) -> Actor {
        h.market
            .signup(Signup {
                username: username.to_string(),
                phone: None,
                address: None,
            })
            .await
            .unwrap()
    }

    async fn approved_seller(h: &Harness, username: &str) -> Actor {
        let applicant = customer(h, username).await;
        let submitted = h
            .market
            .apply_as_seller(&applicant, application_form(username), documents())
            .await
            .unwrap();
        h.market
            .approve_application(&h.admin, submitted.id)
            .await
            .unwrap();
        h.market.actor(applicant.id).await.unwrap()
    }

    async fn listing(h: &Harness, seller: &Actor, stock: i32) -> StoreListing {
        let draft = StoreDraft {
            name: "Gasul Corner".to_string(),
            description: None,
            latitude: 14.6,
            longitude: 121.0,
            tanks_to_sell: vec![TankType::PolValveGasul],
            terms: BTreeMap::from([(
                TankType::PolValveGasul,
                OfferingTerms {
                    price: Some(BigDecimal::from(920)),
                    stock: Some(stock),
                },
            )]),
        };
        h.market
            .create_store(seller, draft, Some(image("owner.png")))
            .await
            .unwrap()
    }

    async fn stock_of(h: &Harness, tank_id: Uuid) -> i32 {
        h.market.store.offering(tank_id).await.unwrap().stock
    }

    #[tokio::test]
    async fn signup_refuses_values_wider_than_their_columns() {
        let h = harness().await;

        let err = h
            .market
            .signup(Signup {
                username: "u".repeat(limits::USERNAME + 1),
                phone: None,
                address: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::Validation(_)));

        let err = h
            .market
            .signup(Signup {
                username: "juan".to_string(),
                phone: Some("0".repeat(limits::PHONE + 1)),
                address: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::Validation(_)));
        assert!(h.market.store.actor_by_username("juan").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn approval_promotes_applicant_exactly_once() {
        let h = harness().await;
        let applicant = customer(&h, "maria").await;
        let submitted = h
            .market
            .apply_as_seller(&applicant, application_form("maria"), documents())
            .await
            .unwrap();
        assert_eq!(submitted.status, ApplicationStatus::Pending);

        let outcome = h
            .market
            .approve_application(&h.admin, submitted.id)
            .await
            .unwrap();
        assert!(outcome.actor_promoted);
        assert_eq!(outcome.notifications_queued, 1);
        assert_eq!(outcome.application.status, ApplicationStatus::Approved);

        let promoted = h.market.actor(applicant.id).await.unwrap();
        assert_eq!(promoted.role, Role::Seller);
        assert_eq!(promoted.seller_status, Some(SellerStatus::Approved));

        let err = h
            .market
            .approve_application(&h.admin, submitted.id)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MarketError::GuardViolation(Guard::Application { .. })
        ));
        assert_eq!(h.dispatcher.dispatch_pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn rejected_applicant_may_apply_again() {
        let h = harness().await;
        let applicant = customer(&h, "pedro").await;
        let first = h
            .market
            .apply_as_seller(&applicant, application_form("pedro"), documents())
            .await
            .unwrap();

        let err = h
            .market
            .apply_as_seller(&applicant, application_form("pedro"), documents())
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::GuardViolation(Guard::Ineligible(_))));

        let outcome = h
            .market
            .reject_application(&h.admin, first.id, "blurry permit")
            .await
            .unwrap();
        assert!(!outcome.actor_promoted);
        assert_eq!(
            outcome.application.rejection_reason.as_deref(),
            Some("blurry permit")
        );

        let second = h
            .market
            .apply_as_seller(&applicant, application_form("pedro"), documents())
            .await
            .unwrap();
        assert_eq!(second.status, ApplicationStatus::Pending);
        assert_eq!(
            h.market.my_application(&applicant).await.unwrap().map(|a| a.id),
            Some(second.id)
        );
        assert_eq!(
            h.market.applications(&h.admin, None).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn incomplete_application_leaves_no_documents_behind() {
        let h = harness().await;
        let applicant = customer(&h, "ana").await;
        let missing_id = SellerDocuments {
            valid_id: None,
            ..documents()
        };

        let err = h
            .market
            .apply_as_seller(&applicant, application_form("ana"), missing_id)
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::Validation(_)));

        let permits = h.media.path().join("seller_documents/permits");
        let leftover = std::fs::read_dir(&permits)
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(leftover, 0);
    }

    #[tokio::test]
    async fn rejection_and_resubmission_scenario() {
        let h = harness().await;
        let seller = approved_seller(&h, "tindera").await;
        let shop = listing(&h, &seller, 3).await;
        let tank = shop.offerings[0].id;
        let buyer = customer(&h, "juan").await;
        h.dispatcher.dispatch_pending().await.unwrap();

        let placed = h.market.reserve(&buyer, tank, "Juan").await.unwrap();
        assert_eq!(placed.status, ReservationStatus::Pending);
        assert_eq!(stock_of(&h, tank).await, 2);

        let uploaded = h
            .market
            .upload_pickup_proof(&seller, placed.id, Some(image("proof.png")))
            .await
            .unwrap();
        assert_eq!(uploaded.status, ReservationStatus::PendingApproval);
        assert_eq!(uploaded.notifications_queued, 1);

        let rejected = h
            .market
            .reject_pickup(&h.admin, placed.id, "blurry photo")
            .await
            .unwrap();
        assert_eq!(rejected.status, ReservationStatus::Rejected);
        assert_eq!(rejected.notifications_queued, 2);
        assert_eq!(stock_of(&h, tank).await, 3);

        // new order, proof uploaded, proof rejected
        assert_eq!(h.dispatcher.dispatch_pending().await.unwrap(), 4);
        let seller_inbox = h.market.notifications(&seller).await.unwrap();
        assert!(seller_inbox.notifications[0]
            .message
            .contains("Reason: blurry photo"));
        assert_eq!(h.market.unread_count(&buyer).await.unwrap(), 2);

        let err = h
            .market
            .cancel_reservation(&buyer, placed.id)
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::GuardViolation(_)));

        let resubmitted = h
            .market
            .upload_pickup_proof(&seller, placed.id, Some(image("proof-2.jpg")))
            .await
            .unwrap();
        assert_eq!(resubmitted.status, ReservationStatus::PendingApproval);

        let approved = h.market.approve_pickup(&h.admin, placed.id).await.unwrap();
        assert_eq!(approved.status, ReservationStatus::Approved);
        assert_eq!(approved.notifications_queued, 2);
        assert_eq!(stock_of(&h, tank).await, 3);

        let receipt = h.market.receipt(&buyer, placed.id).await.unwrap();
        assert_eq!(receipt.status, ReservationStatus::Approved);
        assert_eq!(receipt.reviewed_by, Some(h.admin.id));
        assert_eq!(receipt.rejection_reason.as_deref(), Some("blurry photo"));
    }

    #[tokio::test]
    async fn last_unit_goes_to_exactly_one_customer() {
        let h = harness().await;
        let seller = approved_seller(&h, "tindera").await;
        let shop = listing(&h, &seller, 1).await;
        let tank = shop.offerings[0].id;

        let mut buyers = Vec::new();
        for i in 0..8 {
            buyers.push(customer(&h, &format!("buyer{i}")).await);
        }
        let attempts = futures::future::join_all(
            buyers
                .iter()
                .map(|buyer| h.market.reserve(buyer, tank, &buyer.username)),
        )
        .await;

        let won = attempts.iter().filter(|r| r.is_ok()).count();
        let exhausted = attempts
            .iter()
            .filter(|r| matches!(r, Err(MarketError::ResourceExhausted(_))))
            .count();
        assert_eq!(won, 1);
        assert_eq!(exhausted, 7);
        assert_eq!(stock_of(&h, tank).await, 0);
    }

    #[derive(Debug, Clone, Copy)]
    enum Step {
        Reserve,
        Cancel,
        UploadProof,
        Approve,
        Reject,
    }

    const STEPS: [Step; 5] = [
        Step::Reserve,
        Step::Cancel,
        Step::UploadProof,
        Step::Approve,
        Step::Reject,
    ];

    #[tokio::test]
    async fn no_step_sequence_breaks_the_stock_balance() {
        const INITIAL: i32 = 2;
        // long enough for reserve, upload, reject, re-upload, approve
        const LENGTH: u32 = 5;

        let h = harness().await;
        let seller = approved_seller(&h, "tindera").await;
        let buyer = customer(&h, "juan").await;

        for n in 0..STEPS.len().pow(LENGTH) {
            let sequence: Vec<Step> = (0..LENGTH)
                .map(|i| STEPS[n / STEPS.len().pow(i) % STEPS.len()])
                .collect();
            let shop = listing(&h, &seller, INITIAL).await;
            let tank = shop.offerings[0].id;
            let mut placed: Vec<Uuid> = Vec::new();
            let mut unreleased = 0;

            for step in &sequence {
                // everything but Reserve acts on the newest reservation
                let outcome = match (step, placed.last().copied()) {
                    (Step::Reserve, _) => h
                        .market
                        .reserve(&buyer, tank, "Juan")
                        .await
                        .map(|r| placed.push(r.id)),
                    (_, None) => continue,
                    (Step::Cancel, Some(id)) => {
                        h.market.cancel_reservation(&buyer, id).await.map(drop)
                    }
                    (Step::UploadProof, Some(id)) => h
                        .market
                        .upload_pickup_proof(&seller, id, Some(image("proof.jpg")))
                        .await
                        .map(drop),
                    (Step::Approve, Some(id)) => {
                        h.market.approve_pickup(&h.admin, id).await.map(drop)
                    }
                    (Step::Reject, Some(id)) => h
                        .market
                        .reject_pickup(&h.admin, id, "unclear")
                        .await
                        .map(drop),
                };
                match (step, outcome) {
                    (Step::Reserve, Ok(())) => unreleased += 1,
                    (Step::Cancel | Step::Reject, Ok(())) => unreleased -= 1,
                    (_, Ok(())) => {}
                    (_, Err(err)) => assert!(
                        matches!(
                            err,
                            MarketError::GuardViolation(_) | MarketError::ResourceExhausted(_)
                        ),
                        "{sequence:?}: unexpected {err:?}"
                    ),
                }

                let stock = stock_of(&h, tank).await;
                assert!(stock >= 0, "{sequence:?}: stock went to {stock}");
                assert_eq!(stock, INITIAL - unreleased, "{sequence:?} after {step:?}");

                // a hold is released by cancel or rejection and never retaken
                let holding = h
                    .market
                    .store
                    .reservations(&ReservationFilter {
                        store_id: Some(shop.store.id),
                        ..Default::default()
                    })
                    .await
                    .unwrap()
                    .iter()
                    .filter(|r| {
                        matches!(
                            r.status,
                            ReservationStatus::Pending
                                | ReservationStatus::PendingApproval
                                | ReservationStatus::Approved
                        ) && r.rejection_reason.is_none()
                    })
                    .count() as i32;
                assert_eq!(holding, unreleased, "{sequence:?} after {step:?}");
            }
        }
    }

    #[tokio::test]
    async fn cancellation_returns_the_hold_once() {
        let h = harness().await;
        let seller = approved_seller(&h, "tindera").await;
        let shop = listing(&h, &seller, 2).await;
        let tank = shop.offerings[0].id;
        let buyer = customer(&h, "juan").await;

        let first = h.market.reserve(&buyer, tank, "Juan").await.unwrap();
        h.market.reserve(&buyer, tank, "Juan").await.unwrap();
        assert!(matches!(
            h.market.reserve(&buyer, tank, "Juan").await,
            Err(MarketError::ResourceExhausted(_))
        ));
        assert_eq!(stock_of(&h, tank).await, 0);

        let cancelled = h.market.cancel_reservation(&buyer, first.id).await.unwrap();
        assert_eq!(cancelled.status, ReservationStatus::Cancelled);
        assert_eq!(stock_of(&h, tank).await, 1);

        assert!(h.market.cancel_reservation(&buyer, first.id).await.is_err());
        assert_eq!(stock_of(&h, tank).await, 1);

        let stranger = customer(&h, "stranger").await;
        assert!(matches!(
            h.market.receipt(&stranger, first.id).await,
            Err(MarketError::NotFound)
        ));
        assert_eq!(h.market.my_orders(&buyer).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn invalid_proof_changes_nothing() {
        let h = harness().await;
        let seller = approved_seller(&h, "tindera").await;
        let shop = listing(&h, &seller, 2).await;
        let buyer = customer(&h, "juan").await;
        let placed = h
            .market
            .reserve(&buyer, shop.offerings[0].id, "Juan")
            .await
            .unwrap();

        let err = h
            .market
            .upload_pickup_proof(&seller, placed.id, Some(Upload::new("proof.pdf", vec![1u8])))
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::Validation(_)));
        assert!(matches!(
            h.market
                .upload_pickup_proof(&seller, placed.id, None)
                .await,
            Err(MarketError::Validation(_))
        ));

        let unchanged = h.market.receipt(&buyer, placed.id).await.unwrap();
        assert_eq!(unchanged.status, ReservationStatus::Pending);
        assert!(!h.media.path().join("pickup_proofs").exists());
    }

    #[tokio::test]
    async fn suspension_closes_the_seller_portal_and_stores() {
        let h = harness().await;
        let seller = approved_seller(&h, "tindera").await;
        let shop = listing(&h, &seller, 5).await;
        let buyer = customer(&h, "juan").await;
        assert_eq!(h.market.browse_stores(&buyer).await.unwrap().len(), 1);

        let suspended = h
            .market
            .toggle_seller_suspension(&h.admin, seller.id)
            .await
            .unwrap();
        assert_eq!(suspended.seller_status, Some(SellerStatus::Suspended));
        assert!(h.market.browse_stores(&buyer).await.unwrap().is_empty());
        assert!(matches!(
            h.market.reserve(&buyer, shop.offerings[0].id, "Juan").await,
            Err(MarketError::NotFound)
        ));

        let err = h.market.seller_stores(&suspended).await.unwrap_err();
        assert!(err.is_forbidden());

        let reinstated = h
            .market
            .toggle_seller_suspension(&h.admin, seller.id)
            .await
            .unwrap();
        assert_eq!(reinstated.seller_status, Some(SellerStatus::Approved));
        let stores = h.market.seller_stores(&reinstated).await.unwrap();
        assert!(!stores[0].active);

        let reopened = h.market.toggle_store(&h.admin, shop.store.id).await.unwrap();
        assert!(reopened.active);
    }

    #[tokio::test]
    async fn sellers_manage_only_their_own_stores() {
        let h = harness().await;
        let owner = approved_seller(&h, "owner").await;
        let rival = approved_seller(&h, "rival").await;
        let shop = listing(&h, &owner, 4).await;
        let tank = shop.offerings[0].id;

        let update = OfferingUpdate {
            price: BigDecimal::from(999),
            active: false,
        };
        assert!(matches!(
            h.market.update_offering(&rival, tank, update.clone()).await,
            Err(MarketError::NotFound)
        ));
        assert!(matches!(
            h.market.delete_store(&rival, shop.store.id).await,
            Err(MarketError::NotFound)
        ));

        let updated = h.market.update_offering(&owner, tank, update).await.unwrap();
        assert!(!updated.active);
        assert_eq!(updated.stock, 4);
        let detail = h
            .market
            .store_detail(&customer(&h, "juan").await, shop.store.id)
            .await
            .unwrap();
        assert!(detail.offerings.is_empty());

        h.market.delete_store(&owner, shop.store.id).await.unwrap();
        assert!(h.market.seller_stores(&owner).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dashboard_counts_the_queues() {
        let h = harness().await;
        let seller = approved_seller(&h, "tindera").await;
        let shop = listing(&h, &seller, 3).await;
        let buyer = customer(&h, "juan").await;
        let applicant = customer(&h, "pedro").await;
        h.market
            .apply_as_seller(&applicant, application_form("pedro"), documents())
            .await
            .unwrap();
        let placed = h
            .market
            .reserve(&buyer, shop.offerings[0].id, "Juan")
            .await
            .unwrap();
        h.market
            .upload_pickup_proof(&seller, placed.id, Some(image("proof.png")))
            .await
            .unwrap();

        let counts = h.market.dashboard(&h.admin).await.unwrap();
        assert_eq!(counts.pending_applications, 1);
        assert_eq!(counts.approved_sellers, 1);
        assert_eq!(counts.stores, 1);
        assert_eq!(counts.customers, 2);
        assert_eq!(counts.pending_reviews, 1);

        let queue = h
            .market
            .reservations_for_review(&h.admin, Some(ReservationStatus::PendingApproval))
            .await
            .unwrap();
        assert_eq!(queue.len(), 1);
        assert!(h.market.dashboard(&buyer).await.unwrap_err().is_forbidden());
    }
}
