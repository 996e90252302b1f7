//! Seller applications: `pending → approved | rejected`.
//!
//! Approval promotes the applicant to an approved seller in the same atomic
//! unit as the status change. A rejected applicant may apply again, which
//! replaces the rejected application.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::auth::{self, Action};
use crate::error::{Guard, MarketError};
use crate::limits;
use crate::notification::{self, Notice};
use crate::{Actor, ApplicationStatus, SellerApplication};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationEvent {
    Approve,
    Reject,
}

impl fmt::Display for ApplicationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
        })
    }
}

impl ApplicationStatus {
    pub fn on(self, event: ApplicationEvent) -> Result<ApplicationStatus, Guard> {
        match (self, event) {
            (Self::Pending, ApplicationEvent::Approve) => Ok(Self::Approved),
            (Self::Pending, ApplicationEvent::Reject) => Ok(Self::Rejected),
            (from, event) => Err(Guard::Application { from, event }),
        }
    }
}

/// Text fields of an application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ApplicationForm {
    pub business_name: String,
    pub business_address: String,
    #[serde(default)]
    pub tin_number: Option<String>,
    pub phone: String,
    pub email: String,
}

/// Blob references for the uploaded documents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplicationDocuments {
    pub business_permit: Option<String>,
    pub dti_certificate: Option<String>,
    pub mayors_permit: Option<String>,
    pub valid_id: Option<String>,
}

/// Refuses actors who may not apply right now.
pub fn ensure_can_apply(
    actor: &Actor,
    existing: Option<&SellerApplication>,
) -> Result<(), MarketError> {
    auth::ensure(actor, Action::ApplyAsSeller)?;
    match existing.map(|app| app.status) {
        Some(ApplicationStatus::Pending) => Err(Guard::Ineligible(
            "Your application is still pending review.",
        )
        .into()),
        Some(ApplicationStatus::Approved) => {
            Err(Guard::Ineligible("Your application was already approved.").into())
        }
        Some(ApplicationStatus::Rejected) | None => Ok(()),
    }
}

pub fn validate_form(form: &ApplicationForm) -> Result<(), MarketError> {
    if form.business_name.trim().is_empty() {
        return Err(MarketError::validation("Business name is required."));
    }
    limits::ensure_fits("Business name", form.business_name.trim(), limits::BUSINESS_NAME)?;
    if form.business_address.trim().is_empty() {
        return Err(MarketError::validation("Business address is required."));
    }
    let phone = form.phone.trim();
    if !(phone.starts_with("+63") || phone.starts_with("09"))
        || phone.chars().count() > limits::PHONE
    {
        return Err(MarketError::validation(
            "Please enter a valid Philippine phone number",
        ));
    }
    let email = form.email.trim();
    match email.split_once('@') {
        Some((user, domain)) if !user.is_empty() && domain.contains('.') => {}
        _ => return Err(MarketError::validation("Please enter a valid email address.")),
    }
    limits::ensure_fits("Email", email, limits::EMAIL)?;
    if let Some(tin) = &form.tin_number {
        limits::ensure_fits("TIN number", tin.trim(), limits::TIN_NUMBER)?;
    }
    Ok(())
}

/// Build a fresh pending application from a validated form.
pub fn submit(
    actor: &Actor,
    existing: Option<&SellerApplication>,
    form: &ApplicationForm,
    documents: ApplicationDocuments,
    now: DateTime<Utc>,
) -> Result<SellerApplication, MarketError> {
    ensure_can_apply(actor, existing)?;
    validate_form(form)?;

    let business_permit = documents
        .business_permit
        .ok_or_else(|| MarketError::validation("Business permit is required."))?;
    let valid_id = documents
        .valid_id
        .ok_or_else(|| MarketError::validation("A valid government ID is required."))?;

    Ok(SellerApplication {
        id: Uuid::new_v4(),
        actor_id: actor.id,
        business_name: form.business_name.trim().to_string(),
        business_address: form.business_address.trim().to_string(),
        business_permit,
        dti_certificate: documents.dti_certificate,
        mayors_permit: documents.mayors_permit,
        valid_id,
        tin_number: form
            .tin_number
            .as_deref()
            .map(str::trim)
            .filter(|tin| !tin.is_empty())
            .map(str::to_string),
        phone: form.phone.trim().to_string(),
        email: form.email.trim().to_string(),
        status: ApplicationStatus::Pending,
        rejection_reason: None,
        reviewed_by: None,
        reviewed_at: None,
        created_at: now,
        updated_at: now,
    })
}

/// A validated review decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplicationChange {
    pub application_id: Uuid,
    pub actor_id: Uuid,
    pub event: ApplicationEvent,
    pub expected: ApplicationStatus,
    pub next: ApplicationStatus,
    pub reviewer: Uuid,
    pub reviewed_at: DateTime<Utc>,
    pub rejection_reason: Option<String>,
    /// Promote the applicant to an approved seller.
    pub promote: bool,
    pub notices: Vec<Notice>,
}

impl ApplicationChange {
    pub fn apply_to(&self, application: &mut SellerApplication) {
        application.status = self.next;
        application.reviewed_by = Some(self.reviewer);
        application.reviewed_at = Some(self.reviewed_at);
        application.updated_at = self.reviewed_at;
        if let Some(reason) = &self.rejection_reason {
            application.rejection_reason = Some(reason.clone());
        }
    }
}

/// What an approval or rejection did, as one composite result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplicationOutcome {
    pub application: SellerApplication,
    pub actor_promoted: bool,
    pub notifications_queued: usize,
}

pub fn approve(
    admin: &Actor,
    application: &SellerApplication,
    now: DateTime<Utc>,
) -> Result<ApplicationChange, MarketError> {
    auth::ensure(admin, Action::ReviewApplication)?;
    let next = application.status.on(ApplicationEvent::Approve)?;

    Ok(ApplicationChange {
        application_id: application.id,
        actor_id: application.actor_id,
        event: ApplicationEvent::Approve,
        expected: application.status,
        next,
        reviewer: admin.id,
        reviewed_at: now,
        rejection_reason: None,
        promote: true,
        notices: vec![Notice::to(
            application.actor_id,
            notification::application_approved(&application.business_name),
        )],
    })
}

pub fn reject(
    admin: &Actor,
    application: &SellerApplication,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<ApplicationChange, MarketError> {
    auth::ensure(admin, Action::ReviewApplication)?;
    let next = application.status.on(ApplicationEvent::Reject)?;
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(MarketError::validation("Please provide a rejection reason."));
    }

    Ok(ApplicationChange {
        application_id: application.id,
        actor_id: application.actor_id,
        event: ApplicationEvent::Reject,
        expected: application.status,
        next,
        reviewer: admin.id,
        reviewed_at: now,
        rejection_reason: Some(reason.to_string()),
        promote: false,
        notices: vec![Notice::to(
            application.actor_id,
            notification::application_rejected(&application.business_name, reason),
        )],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Role, SellerStatus};

    fn form() -> ApplicationForm {
        ApplicationForm {
            business_name: "Juan's LPG".to_string(),
            business_address: "12 Rizal St, Quezon City".to_string(),
            tin_number: Some(" ".to_string()),
            phone: "09171234567".to_string(),
            email: "juan@example.com".to_string(),
        }
    }

    fn documents() -> ApplicationDocuments {
        ApplicationDocuments {
            business_permit: Some("seller_documents/permits/p.pdf".to_string()),
            valid_id: Some("seller_documents/ids/i.png".to_string()),
            ..Default::default()
        }
    }

    fn pending_application(actor: &Actor) -> SellerApplication {
        submit(actor, None, &form(), documents(), Utc::now()).unwrap()
    }

    #[test]
    fn submission_starts_pending() {
        let actor = Actor::customer("juan");
        let application = pending_application(&actor);

        assert_eq!(application.status, ApplicationStatus::Pending);
        assert_eq!(application.actor_id, actor.id);
        assert_eq!(application.tin_number, None);
    }

    #[test]
    fn phone_must_be_philippine() {
        let mut form = form();
        form.phone = "5551234".to_string();
        let err = validate_form(&form).unwrap_err();
        assert_eq!(err.to_string(), "Please enter a valid Philippine phone number");

        form.phone = "+639171234567".to_string();
        assert!(validate_form(&form).is_ok());
    }

    #[test]
    fn fields_must_fit_their_columns() {
        let mut long_name = form();
        long_name.business_name = "B".repeat(limits::BUSINESS_NAME + 1);
        let mut long_tin = form();
        long_tin.tin_number = Some("1".repeat(limits::TIN_NUMBER + 1));
        let mut long_email = form();
        long_email.email = format!("{}@example.com", "j".repeat(limits::EMAIL));
        let mut long_phone = form();
        long_phone.phone = format!("09{}", "1".repeat(limits::PHONE));

        for form in [long_name, long_tin, long_email, long_phone] {
            assert!(matches!(validate_form(&form), Err(MarketError::Validation(_))));
        }
    }

    #[test]
    fn required_documents_are_enforced() {
        let actor = Actor::customer("juan");
        let docs = ApplicationDocuments {
            valid_id: None,
            ..documents()
        };
        assert!(matches!(
            submit(&actor, None, &form(), docs, Utc::now()),
            Err(MarketError::Validation(_))
        ));
    }

    #[test]
    fn pending_application_blocks_resubmission_but_rejected_does_not() {
        let actor = Actor::customer("juan");
        let mut existing = pending_application(&actor);

        assert!(matches!(
            ensure_can_apply(&actor, Some(&existing)),
            Err(MarketError::GuardViolation(Guard::Ineligible(_)))
        ));

        existing.status = ApplicationStatus::Rejected;
        assert!(ensure_can_apply(&actor, Some(&existing)).is_ok());
    }

    #[test]
    fn sellers_cannot_apply_again() {
        let seller = Actor {
            role: Role::Seller,
            seller_status: Some(SellerStatus::Approved),
            ..Actor::customer("seller")
        };
        assert!(ensure_can_apply(&seller, None).unwrap_err().is_forbidden());
    }

    #[test]
    fn approval_promotes_and_notifies_applicant() {
        let actor = Actor::customer("juan");
        let admin = Actor::admin("admin");
        let mut application = pending_application(&actor);

        let change = approve(&admin, &application, Utc::now()).unwrap();
        assert!(change.promote);
        assert_eq!(change.next, ApplicationStatus::Approved);
        assert_eq!(change.notices.len(), 1);
        assert_eq!(change.notices[0].recipient_id, actor.id);

        change.apply_to(&mut application);
        assert_eq!(application.reviewed_by, Some(admin.id));

        // a second approval has nothing to act on
        assert!(matches!(
            approve(&admin, &application, Utc::now()),
            Err(MarketError::GuardViolation(Guard::Application { .. }))
        ));
    }

    #[test]
    fn rejection_carries_reason() {
        let actor = Actor::customer("juan");
        let admin = Actor::admin("admin");
        let application = pending_application(&actor);

        assert!(reject(&admin, &application, "", Utc::now()).is_err());
        let change = reject(&admin, &application, "expired permit", Utc::now()).unwrap();
        assert!(!change.promote);
        assert!(change.notices[0].message.contains("Reason: expired permit"));
    }
}
