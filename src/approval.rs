//! Approval-gated mutations.
//!
//! Category changes and manager registrations are stored as requests in the
//! "not approved" state and only take effect once an admin decides them. A
//! decision is a compare-and-swap on the request status inside the same
//! transaction that applies the mutation: the first decider wins, later
//! deciders see the settled status and change nothing.
use std::fmt;

use chrono::Utc;
use tracing::{debug, info};

use crate::catalog::{
    CategoryDraft, CategoryPatch, create_category_in, delete_category_in, load_live_category,
    update_category_in,
};
use crate::effects::{Collaborators, Effects};
use crate::error::{Result, StoreError};
use crate::images::ImageRef;
use crate::notify::Mail;
use crate::store::{Store, Tx, TxResult, abort, key, tables};
use crate::types::{CategoryId, RequestId, TimeStamp, UserId};
use crate::users::{AccountDetails, Profile, Role, create_user_in, load_live_user, username_taken};

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum ApprovalStatus {
    #[n(0)]
    NotApproved,
    #[n(1)]
    Approved,
    #[n(2)]
    Rejected,
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ApprovalStatus::NotApproved => "not approved",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    fn status(self) -> ApprovalStatus {
        match self {
            Decision::Approve => ApprovalStatus::Approved,
            Decision::Reject => ApprovalStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecideOutcome {
    /// This call settled the request.
    Applied(ApprovalStatus),
    /// The request was already settled; nothing was done.
    Unchanged(ApprovalStatus),
}

impl DecideOutcome {
    pub fn status(&self) -> ApprovalStatus {
        match self {
            DecideOutcome::Applied(status) | DecideOutcome::Unchanged(status) => *status,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum CategoryRequestKind {
    #[n(0)]
    Create,
    #[n(1)]
    Update,
    #[n(2)]
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct CategoryRequest {
    #[n(0)]
    pub id: RequestId,
    #[n(1)]
    pub requested_by: UserId,
    #[n(2)]
    pub requested_on: TimeStamp<Utc>,
    #[n(3)]
    pub kind: CategoryRequestKind,
    #[n(4)]
    pub name: Option<String>,
    #[n(5)]
    pub description: Option<String>,
    #[n(6)]
    pub image: Option<ImageRef>,
    #[n(7)]
    pub category_id: Option<CategoryId>,
    #[n(8)]
    pub remark: String,
    #[n(9)]
    pub status: ApprovalStatus,
    #[n(10)]
    pub decided_on: Option<TimeStamp<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct ManagerRequest {
    #[n(0)]
    pub id: RequestId,
    #[n(1)]
    pub requested_on: TimeStamp<Utc>,
    #[n(2)]
    pub account: AccountDetails,
    #[n(3)]
    pub status: ApprovalStatus,
    #[n(4)]
    pub decided_on: Option<TimeStamp<Utc>>,
}

/// A proposed category mutation as submitted by a manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryProposal {
    pub kind: CategoryRequestKind,
    pub name: Option<String>,
    pub description: Option<String>,
    pub image: Option<ImageRef>,
    pub category_id: Option<CategoryId>,
    pub remark: String,
}

impl CategoryProposal {
    pub fn create(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind: CategoryRequestKind::Create,
            name: Some(name.into()),
            description: Some(description.into()),
            image: None,
            category_id: None,
            remark: String::new(),
        }
    }

    pub fn update(category_id: CategoryId, patch: CategoryPatch) -> Self {
        Self {
            kind: CategoryRequestKind::Update,
            name: patch.name,
            description: patch.description,
            image: patch.image,
            category_id: Some(category_id),
            remark: String::new(),
        }
    }

    pub fn delete(category_id: CategoryId) -> Self {
        Self {
            kind: CategoryRequestKind::Delete,
            name: None,
            description: None,
            image: None,
            category_id: Some(category_id),
            remark: String::new(),
        }
    }

    pub fn with_image(mut self, image: ImageRef) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_remark(mut self, remark: impl Into<String>) -> Self {
        self.remark = remark.into();
        self
    }

    fn validate(&self) -> Result<()> {
        match (self.kind, self.category_id) {
            (CategoryRequestKind::Create, Some(_)) => Err(StoreError::InvalidInput(
                "a create request cannot target an existing category".into(),
            )),
            (CategoryRequestKind::Create, None)
                if self.name.as_deref().is_none_or(|n| n.trim().is_empty()) =>
            {
                Err(StoreError::InvalidInput(
                    "a create request needs a category name".into(),
                ))
            }
            (CategoryRequestKind::Update | CategoryRequestKind::Delete, None) => Err(
                StoreError::InvalidInput("update and delete requests need a target category".into()),
            ),
            _ => Ok(()),
        }
    }
}

/// Which request a decision is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestRef {
    Category(RequestId),
    Manager(RequestId),
}

/// Undecided requests per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingCounts {
    pub category: usize,
    pub manager: usize,
}

/// A request whose approval runs a deferred mutation.
pub(crate) trait PendingRequest: Sized + minicbor::Encode<()> + for<'b> minicbor::Decode<'b, ()> {
    const TABLE: &'static [u8];
    const ENTITY: &'static str;

    fn status(&self) -> ApprovalStatus;

    fn mark(&mut self, status: ApprovalStatus, at: TimeStamp<Utc>);

    /// The deferred mutation, run on approval only.
    fn apply(&self, tx: &Tx<'_>, fx: &mut Effects) -> TxResult<()>;

    /// Runs once the status has been settled, whatever the outcome.
    fn settled(&self, _tx: &Tx<'_>, _fx: &mut Effects) -> TxResult<()> {
        Ok(())
    }
}

fn request_key<R: PendingRequest>(id: RequestId) -> Vec<u8> {
    key(R::TABLE, &[id.as_bytes()])
}

pub(crate) fn decide_in<R: PendingRequest>(
    tx: &Tx<'_>,
    id: RequestId,
    decision: Decision,
    fx: &mut Effects,
) -> TxResult<DecideOutcome> {
    let key = request_key::<R>(id);
    let Some(mut request) = tx.get::<R>(&key)? else {
        return abort(StoreError::not_found(R::ENTITY, id));
    };
    if request.status() != ApprovalStatus::NotApproved {
        return Ok(DecideOutcome::Unchanged(request.status()));
    }

    // a failed mutation aborts the whole unit, leaving the request undecided
    if decision == Decision::Approve {
        request.apply(tx, fx)?;
    }
    let status = decision.status();
    request.mark(status, TimeStamp::new());
    request.settled(tx, fx)?;
    tx.put(&key, &request)?;
    Ok(DecideOutcome::Applied(status))
}

impl PendingRequest for CategoryRequest {
    const TABLE: &'static [u8] = tables::CATEGORY_REQUEST;
    const ENTITY: &'static str = "category request";

    fn status(&self) -> ApprovalStatus {
        self.status
    }

    fn mark(&mut self, status: ApprovalStatus, at: TimeStamp<Utc>) {
        self.status = status;
        self.decided_on = Some(at);
    }

    fn apply(&self, tx: &Tx<'_>, fx: &mut Effects) -> TxResult<()> {
        match (self.kind, self.category_id) {
            (CategoryRequestKind::Create, _) => {
                let draft = CategoryDraft {
                    name: self.name.clone().unwrap_or_default(),
                    description: self.description.clone().unwrap_or_default(),
                    image: self.image.clone(),
                };
                create_category_in(tx, &draft)?;
            }
            (CategoryRequestKind::Update, Some(category_id)) => {
                let patch = CategoryPatch {
                    name: self.name.clone(),
                    description: self.description.clone(),
                    image: self.image.clone(),
                };
                update_category_in(tx, category_id, &patch, fx)?;
            }
            (CategoryRequestKind::Delete, Some(category_id)) => {
                delete_category_in(tx, category_id, fx)?;
            }
            (_, None) => {
                return abort(StoreError::InvalidInput(format!(
                    "category request {} has no target category",
                    self.id
                )));
            }
        }
        Ok(())
    }

    fn settled(&self, _tx: &Tx<'_>, fx: &mut Effects) -> TxResult<()> {
        // a staged image nobody will reference
        if self.status == ApprovalStatus::Rejected {
            fx.release(self.image.clone());
        }
        Ok(())
    }
}

fn manager_name_key(username: &str) -> Vec<u8> {
    key(tables::MANAGER_REQUEST_NAME, &[username.as_bytes()])
}

impl PendingRequest for ManagerRequest {
    const TABLE: &'static [u8] = tables::MANAGER_REQUEST;
    const ENTITY: &'static str = "manager request";

    fn status(&self) -> ApprovalStatus {
        self.status
    }

    fn mark(&mut self, status: ApprovalStatus, at: TimeStamp<Utc>) {
        self.status = status;
        self.decided_on = Some(at);
    }

    fn apply(&self, tx: &Tx<'_>, _fx: &mut Effects) -> TxResult<()> {
        // credential was hashed at submission
        create_user_in(tx, &self.account, Role::Manager)?;
        Ok(())
    }

    fn settled(&self, tx: &Tx<'_>, fx: &mut Effects) -> TxResult<()> {
        tx.remove(&manager_name_key(&self.account.username))?;
        fx.send(Mail::new(
            &self.account.email,
            "Status update for managerial request",
            format!(
                "Dear {}, your request has been {}",
                self.account.name, self.status
            ),
        ));
        Ok(())
    }
}

#[derive(Clone)]
pub struct Approvals {
    store: Store,
    collab: Collaborators,
}

impl Approvals {
    pub fn new(store: Store, collab: Collaborators) -> Self {
        Self { store, collab }
    }

    pub fn submit_category_request(
        &self,
        requested_by: UserId,
        proposal: CategoryProposal,
    ) -> Result<CategoryRequest> {
        proposal.validate()?;

        let request = self.store.transact(|tx| {
            load_live_user(tx, requested_by)?;
            if let Some(category_id) = proposal.category_id {
                load_live_category(tx, category_id)?;
            }

            let request = CategoryRequest {
                id: RequestId::new(),
                requested_by,
                requested_on: TimeStamp::new(),
                kind: proposal.kind,
                name: proposal.name.clone(),
                description: proposal.description.clone(),
                image: proposal.image.clone(),
                category_id: proposal.category_id,
                remark: proposal.remark.clone(),
                status: ApprovalStatus::NotApproved,
                decided_on: None,
            };
            tx.put(&request_key::<CategoryRequest>(request.id), &request)?;
            Ok(request)
        })?;

        info!(
            request_id = %request.id,
            requested_by = %requested_by,
            kind = ?request.kind,
            "category request submitted"
        );
        Ok(request)
    }

    /// Stores a manager registration for review. The password is hashed here, once.
    pub fn submit_manager_request(&self, profile: Profile) -> Result<ManagerRequest> {
        let account = profile.seal()?;

        let request = self.store.transact(|tx| {
            let name_key = manager_name_key(&account.username);
            if username_taken(tx, &account.username)? || tx.contains(&name_key)? {
                return abort(StoreError::DuplicateName(account.username.clone()));
            }

            let request = ManagerRequest {
                id: RequestId::new(),
                requested_on: TimeStamp::new(),
                account: account.clone(),
                status: ApprovalStatus::NotApproved,
                decided_on: None,
            };
            tx.put(&request_key::<ManagerRequest>(request.id), &request)?;
            tx.put(&name_key, &request.id)?;
            Ok(request)
        })?;

        info!(
            request_id = %request.id,
            username = %request.account.username,
            "manager request submitted"
        );
        Ok(request)
    }

    /// Settles a request. Deciding an already settled request is a no-op.
    pub fn decide(&self, request: RequestRef, decision: Decision) -> Result<DecideOutcome> {
        let outcome = match request {
            RequestRef::Category(id) => self.collab.commit(&self.store, |tx, fx| {
                decide_in::<CategoryRequest>(tx, id, decision, fx)
            })?,
            RequestRef::Manager(id) => self.collab.commit(&self.store, |tx, fx| {
                decide_in::<ManagerRequest>(tx, id, decision, fx)
            })?,
        };

        match outcome {
            DecideOutcome::Applied(status) => {
                info!(request = ?request, status = %status, "request decided")
            }
            DecideOutcome::Unchanged(status) => {
                debug!(request = ?request, status = %status, "request already decided")
            }
        }
        Ok(outcome)
    }

    pub fn get_category_request(&self, id: RequestId) -> Result<CategoryRequest> {
        self.get::<CategoryRequest>(id)
    }

    pub fn get_manager_request(&self, id: RequestId) -> Result<ManagerRequest> {
        self.get::<ManagerRequest>(id)
    }

    pub fn pending_category_requests(&self) -> Result<Vec<CategoryRequest>> {
        self.pending::<CategoryRequest>()
    }

    pub fn pending_manager_requests(&self) -> Result<Vec<ManagerRequest>> {
        self.pending::<ManagerRequest>()
    }

    pub fn pending_counts(&self) -> Result<PendingCounts> {
        Ok(PendingCounts {
            category: self.pending_category_requests()?.len(),
            manager: self.pending_manager_requests()?.len(),
        })
    }

    fn get<R: PendingRequest>(&self, id: RequestId) -> Result<R> {
        self.store
            .get(&request_key::<R>(id))?
            .ok_or_else(|| StoreError::not_found(R::ENTITY, id))
    }

    fn pending<R: PendingRequest>(&self) -> Result<Vec<R>> {
        Ok(self
            .store
            .scan::<R>(R::TABLE)?
            .into_iter()
            .filter(|r| r.status() == ApprovalStatus::NotApproved)
            .collect())
    }
}
