//! Persistence port for the CRM.
//!
//! Reads are typed queries. Every write goes through [`CrmStore::apply`], which
//! commits one [`ChangeSet`] atomically: a lifecycle operation's entity
//! mutation, its audit entries and any secondary entity either all persist or
//! none do.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Campaign, Company, Contact, ContactFilter, ContactSearchResult, EmailTemplate, HistoryEntry,
    Lead, LeadFilter, LeadStatus, LookupValue, Opportunity, OpportunityFilter, OpportunityStage,
    PageRequest, Setting, Task, TaskFilter, TaskStatus, TemplateFilter,
};

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by store adapters.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An update or delete targeted a row that does not exist.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    /// A compare-and-set update found a different prior state.
    #[error("{entity} {id} was modified concurrently")]
    Conflict { entity: &'static str, id: Uuid },

    /// A unique constraint rejected the write.
    #[error("duplicate value violates {0}")]
    Duplicate(String),

    /// A reference or check constraint rejected the write.
    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    /// Adapter-level failure outside the database driver.
    #[error("persistence error: {0}")]
    Persistence(String),
}

/// One write inside a [`ChangeSet`].
///
/// Lifecycle updates carry the state the caller read; adapters apply them as
/// compare-and-set on that column and fail with [`StoreError::Conflict`] when
/// it no longer matches.
#[derive(Debug, Clone)]
pub enum Change {
    InsertCompany(Company),
    UpdateCompany(Company),
    DeleteCompany(Uuid),
    InsertContact(Contact),
    UpdateContact(Contact),
    InsertCampaign(Campaign),
    UpdateCampaign(Campaign),
    InsertLead(Lead),
    UpdateLead {
        lead: Lead,
        expected_status: LeadStatus,
    },
    InsertTask(Task),
    UpdateTask {
        task: Task,
        expected_status: TaskStatus,
    },
    DeleteTask(Uuid),
    InsertOpportunity(Opportunity),
    UpdateOpportunity {
        opportunity: Opportunity,
        expected_stage: OpportunityStage,
    },
    DeleteOpportunity(Uuid),
    AppendHistory(HistoryEntry),
    UpdateHistory(HistoryEntry),
    DeleteHistory(Uuid),
    InsertTemplate(EmailTemplate),
    UpdateTemplate(EmailTemplate),
    InsertSetting(Setting),
    UpdateSetting(Setting),
    DeleteSetting(Uuid),
    InsertLookup(LookupValue),
    UpdateLookup(LookupValue),
    DeleteLookup(Uuid),
}

/// Ordered writes committed as one unit.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    changes: Vec<Change>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for a change set holding a single write.
    pub fn single(change: Change) -> Self {
        Self {
            changes: vec![change],
        }
    }

    pub fn push(&mut self, change: Change) -> &mut Self {
        self.changes.push(change);
        self
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter()
    }
}

impl IntoIterator for ChangeSet {
    type Item = Change;
    type IntoIter = std::vec::IntoIter<Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.into_iter()
    }
}

/// Count and value of opportunities in one stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageTotal {
    pub stage: OpportunityStage,
    pub count: i64,
    pub total_value: BigDecimal,
}

/// CRM persistence contract.
#[async_trait]
pub trait CrmStore: Send + Sync {
    /// Commits all changes atomically, in order.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::Conflict`] when a guarded update finds a
    /// different prior state, [`StoreError::Duplicate`] or
    /// [`StoreError::Constraint`] when the store rejects a row, and
    /// [`StoreError::NotFound`] when an update or delete has no target. Nothing
    /// is persisted on failure.
    async fn apply(&self, changes: ChangeSet) -> StoreResult<()>;

    async fn company(&self, id: Uuid) -> StoreResult<Option<Company>>;
    /// Exact, case-sensitive name match.
    async fn company_by_name(&self, name: &str) -> StoreResult<Option<Company>>;
    /// Companies whose name contains `search` (case-insensitive), ordered by name.
    async fn companies(
        &self,
        search: Option<&str>,
        page: PageRequest,
    ) -> StoreResult<(Vec<Company>, i64)>;

    async fn contact(&self, id: Uuid) -> StoreResult<Option<Contact>>;
    /// Exact email match.
    async fn contact_by_email(&self, email: &str) -> StoreResult<Option<Contact>>;
    /// Filtered contacts ordered by last name, then first name.
    async fn contacts(
        &self,
        filter: &ContactFilter,
        page: PageRequest,
    ) -> StoreResult<(Vec<Contact>, i64)>;
    /// Active contacts whose name, email or company name contains `query`.
    async fn search_contacts(
        &self,
        query: &str,
        limit: i64,
    ) -> StoreResult<Vec<ContactSearchResult>>;

    async fn campaign(&self, id: Uuid) -> StoreResult<Option<Campaign>>;
    /// Campaigns, newest first.
    async fn campaigns(
        &self,
        is_active: Option<bool>,
        page: PageRequest,
    ) -> StoreResult<(Vec<Campaign>, i64)>;

    async fn lead(&self, id: Uuid) -> StoreResult<Option<Lead>>;
    /// Leads, newest first.
    async fn leads(&self, filter: &LeadFilter, page: PageRequest)
        -> StoreResult<(Vec<Lead>, i64)>;

    async fn task(&self, id: Uuid) -> StoreResult<Option<Task>>;
    /// Tasks by due date ascending (no due date last), then priority descending.
    async fn tasks(&self, filter: &TaskFilter, page: PageRequest)
        -> StoreResult<(Vec<Task>, i64)>;
    /// Follow-up tasks chained to `parent_id`.
    async fn follow_ups(&self, parent_id: Uuid) -> StoreResult<Vec<Task>>;

    async fn opportunity(&self, id: Uuid) -> StoreResult<Option<Opportunity>>;
    async fn opportunity_by_lead(&self, lead_id: Uuid) -> StoreResult<Option<Opportunity>>;
    /// Opportunities, newest first.
    async fn opportunities(
        &self,
        filter: &OpportunityFilter,
        page: PageRequest,
    ) -> StoreResult<(Vec<Opportunity>, i64)>;
    /// Count and summed expected value per stage that has opportunities.
    async fn stage_totals(&self) -> StoreResult<Vec<StageTotal>>;
    /// Mean expected value across open stages, `None` when there is nothing to average.
    async fn average_open_value(&self) -> StoreResult<Option<BigDecimal>>;

    async fn history_entry(&self, id: Uuid) -> StoreResult<Option<HistoryEntry>>;
    /// Timeline of a contact, most recent first.
    async fn history(
        &self,
        contact_id: Uuid,
        page: PageRequest,
    ) -> StoreResult<(Vec<HistoryEntry>, i64)>;

    async fn email_template(&self, id: Uuid) -> StoreResult<Option<EmailTemplate>>;
    /// Templates ordered by name.
    async fn email_templates(
        &self,
        filter: &TemplateFilter,
        page: PageRequest,
    ) -> StoreResult<(Vec<EmailTemplate>, i64)>;

    async fn setting(&self, key: &str) -> StoreResult<Option<Setting>>;
    /// Settings ordered by category, then key.
    async fn settings(&self, category: Option<&str>) -> StoreResult<Vec<Setting>>;

    async fn lookup(&self, id: Uuid) -> StoreResult<Option<LookupValue>>;
    async fn lookup_by_value(&self, category: &str, value: &str)
        -> StoreResult<Option<LookupValue>>;
    /// Lookups of a category ordered by sort order, then label.
    async fn lookups(
        &self,
        category: &str,
        include_inactive: bool,
    ) -> StoreResult<Vec<LookupValue>>;
    /// Distinct lookup categories, sorted.
    async fn lookup_categories(&self) -> StoreResult<Vec<String>>;
}
