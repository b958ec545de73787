//! In-memory store for tests and local experiments.
//!
//! Tables are insertion-ordered vectors. A change set is applied to a copy of
//! the state which replaces the live state only when every change succeeded,
//! so failed change sets leave no trace. Reference and uniqueness rules mirror
//! the Postgres schema.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard};
use uuid::Uuid;

use crate::models::{
    Campaign, Company, Contact, ContactFilter, ContactSearchResult, EmailTemplate, HistoryEntry,
    Lead, LeadFilter, LookupValue, Opportunity, OpportunityFilter, OpportunityStage, PageRequest,
    Setting, Task, TaskFilter, TemplateFilter,
};
use crate::store::{Change, ChangeSet, CrmStore, StageTotal, StoreError, StoreResult};
use crate::tasks::listing_order;

/// Thread-safe in-memory CRM store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

#[derive(Debug, Clone, Default)]
struct State {
    companies: Vec<Company>,
    contacts: Vec<Contact>,
    campaigns: Vec<Campaign>,
    leads: Vec<Lead>,
    tasks: Vec<Task>,
    /// parent task id -> follow-up task ids
    follow_up_index: HashMap<Uuid, Vec<Uuid>>,
    opportunities: Vec<Opportunity>,
    history: Vec<HistoryEntry>,
    templates: Vec<EmailTemplate>,
    settings: Vec<Setting>,
    lookups: Vec<LookupValue>,
}

trait Row: Clone {
    const TABLE: &'static str;
    fn id(&self) -> Uuid;
}

macro_rules! row {
    ($($ty:ty => $table:literal),* $(,)?) => {
        $(impl Row for $ty {
            const TABLE: &'static str = $table;
            fn id(&self) -> Uuid {
                self.id
            }
        })*
    };
}

row!(
    Company => "company",
    Contact => "contact",
    Campaign => "campaign",
    Lead => "lead",
    Task => "task",
    Opportunity => "opportunity",
    HistoryEntry => "history entry",
    EmailTemplate => "email template",
    Setting => "setting",
    LookupValue => "lookup value",
);

fn find<T: Row>(rows: &[T], id: Uuid) -> Option<&T> {
    rows.iter().find(|row| row.id() == id)
}

fn insert<T: Row>(rows: &mut Vec<T>, row: T) -> StoreResult<()> {
    if find(rows, row.id()).is_some() {
        return Err(StoreError::Duplicate(format!("{} primary key", T::TABLE)));
    }
    rows.push(row);
    Ok(())
}

fn replace<T: Row>(rows: &mut [T], row: T) -> StoreResult<()> {
    let id = row.id();
    let slot = rows
        .iter_mut()
        .find(|existing| existing.id() == id)
        .ok_or(StoreError::NotFound {
            entity: T::TABLE,
            id,
        })?;
    *slot = row;
    Ok(())
}

fn remove<T: Row>(rows: &mut Vec<T>, id: Uuid) -> StoreResult<T> {
    let position = rows
        .iter()
        .position(|row| row.id() == id)
        .ok_or(StoreError::NotFound {
            entity: T::TABLE,
            id,
        })?;
    Ok(rows.remove(position))
}

fn require<T: Row>(rows: &[T], id: Option<Uuid>, column: &str) -> StoreResult<()> {
    match id {
        Some(id) if find(rows, id).is_none() => Err(StoreError::Constraint(format!(
            "{} references missing {} {}",
            column,
            T::TABLE,
            id
        ))),
        _ => Ok(()),
    }
}

fn paginate<T: Clone>(rows: Vec<&T>, page: PageRequest) -> (Vec<T>, i64) {
    let total = rows.len() as i64;
    let items = rows
        .into_iter()
        .skip(page.offset() as usize)
        .take(page.page_size as usize)
        .cloned()
        .collect();
    (items, total)
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

impl State {
    fn apply(&mut self, change: Change) -> StoreResult<()> {
        match change {
            Change::InsertCompany(company) => insert(&mut self.companies, company),
            Change::UpdateCompany(company) => replace(&mut self.companies, company),
            Change::DeleteCompany(id) => {
                remove(&mut self.companies, id)?;
                for contact in self.contacts.iter_mut().filter(|c| c.company_id == Some(id)) {
                    contact.company_id = None;
                }
                for opp in self
                    .opportunities
                    .iter_mut()
                    .filter(|o| o.company_id == Some(id))
                {
                    opp.company_id = None;
                }
                Ok(())
            }
            Change::InsertContact(contact) => {
                require(&self.companies, contact.company_id, "contacts.company_id")?;
                insert(&mut self.contacts, contact)
            }
            Change::UpdateContact(contact) => {
                require(&self.companies, contact.company_id, "contacts.company_id")?;
                replace(&mut self.contacts, contact)
            }
            Change::InsertCampaign(campaign) => insert(&mut self.campaigns, campaign),
            Change::UpdateCampaign(campaign) => replace(&mut self.campaigns, campaign),
            Change::InsertLead(lead) => {
                self.check_lead(&lead)?;
                insert(&mut self.leads, lead)
            }
            Change::UpdateLead {
                lead,
                expected_status,
            } => {
                self.check_lead(&lead)?;
                let current = find(&self.leads, lead.id).ok_or(StoreError::NotFound {
                    entity: "lead",
                    id: lead.id,
                })?;
                if current.status != expected_status {
                    return Err(StoreError::Conflict {
                        entity: "lead",
                        id: lead.id,
                    });
                }
                replace(&mut self.leads, lead)
            }
            Change::InsertTask(task) => {
                self.check_task(&task)?;
                if let Some(parent) = task.parent_task_id {
                    self.follow_up_index.entry(parent).or_default().push(task.id);
                }
                insert(&mut self.tasks, task)
            }
            Change::UpdateTask {
                task,
                expected_status,
            } => {
                self.check_task(&task)?;
                let current = find(&self.tasks, task.id).ok_or(StoreError::NotFound {
                    entity: "task",
                    id: task.id,
                })?;
                if current.status != expected_status {
                    return Err(StoreError::Conflict {
                        entity: "task",
                        id: task.id,
                    });
                }
                if current.parent_task_id != task.parent_task_id {
                    let old_parent = current.parent_task_id;
                    self.unindex_follow_up(old_parent, task.id);
                    if let Some(parent) = task.parent_task_id {
                        self.follow_up_index.entry(parent).or_default().push(task.id);
                    }
                }
                replace(&mut self.tasks, task)
            }
            Change::DeleteTask(id) => {
                let task = remove(&mut self.tasks, id)?;
                self.unindex_follow_up(task.parent_task_id, id);
                if let Some(children) = self.follow_up_index.remove(&id) {
                    for child in self
                        .tasks
                        .iter_mut()
                        .filter(|t| children.contains(&t.id))
                    {
                        child.parent_task_id = None;
                    }
                }
                Ok(())
            }
            Change::InsertOpportunity(opportunity) => {
                self.check_opportunity(&opportunity)?;
                insert(&mut self.opportunities, opportunity)
            }
            Change::UpdateOpportunity {
                opportunity,
                expected_stage,
            } => {
                self.check_opportunity(&opportunity)?;
                let current =
                    find(&self.opportunities, opportunity.id).ok_or(StoreError::NotFound {
                        entity: "opportunity",
                        id: opportunity.id,
                    })?;
                if current.stage != expected_stage {
                    return Err(StoreError::Conflict {
                        entity: "opportunity",
                        id: opportunity.id,
                    });
                }
                replace(&mut self.opportunities, opportunity)
            }
            Change::DeleteOpportunity(id) => {
                remove(&mut self.opportunities, id)?;
                for task in self
                    .tasks
                    .iter_mut()
                    .filter(|t| t.opportunity_id == Some(id))
                {
                    task.opportunity_id = None;
                }
                Ok(())
            }
            Change::AppendHistory(history) => {
                require(&self.contacts, Some(history.contact_id), "contact_history.contact_id")?;
                insert(&mut self.history, history)
            }
            Change::UpdateHistory(history) => replace(&mut self.history, history),
            Change::DeleteHistory(id) => remove(&mut self.history, id).map(|_| ()),
            Change::InsertTemplate(template) => {
                self.check_template_name(&template)?;
                insert(&mut self.templates, template)
            }
            Change::UpdateTemplate(template) => {
                self.check_template_name(&template)?;
                replace(&mut self.templates, template)
            }
            Change::InsertSetting(setting) => {
                self.check_setting_key(&setting)?;
                insert(&mut self.settings, setting)
            }
            Change::UpdateSetting(setting) => {
                self.check_setting_key(&setting)?;
                replace(&mut self.settings, setting)
            }
            Change::DeleteSetting(id) => remove(&mut self.settings, id).map(|_| ()),
            Change::InsertLookup(lookup) => {
                self.check_lookup_value(&lookup)?;
                insert(&mut self.lookups, lookup)
            }
            Change::UpdateLookup(lookup) => {
                self.check_lookup_value(&lookup)?;
                replace(&mut self.lookups, lookup)
            }
            Change::DeleteLookup(id) => remove(&mut self.lookups, id).map(|_| ()),
        }
    }

    fn unindex_follow_up(&mut self, parent: Option<Uuid>, child: Uuid) {
        if let Some(parent) = parent {
            if let Some(ids) = self.follow_up_index.get_mut(&parent) {
                ids.retain(|id| *id != child);
                if ids.is_empty() {
                    self.follow_up_index.remove(&parent);
                }
            }
        }
    }

    fn check_lead(&self, lead: &Lead) -> StoreResult<()> {
        require(&self.contacts, Some(lead.contact_id), "leads.contact_id")?;
        require(&self.campaigns, lead.campaign_id, "leads.campaign_id")
    }

    fn check_task(&self, task: &Task) -> StoreResult<()> {
        require(&self.contacts, task.contact_id, "tasks.contact_id")?;
        require(&self.opportunities, task.opportunity_id, "tasks.opportunity_id")?;
        require(&self.tasks, task.parent_task_id, "tasks.parent_task_id")
    }

    fn check_opportunity(&self, opp: &Opportunity) -> StoreResult<()> {
        require(&self.companies, opp.company_id, "opportunities.company_id")?;
        require(&self.contacts, opp.contact_id, "opportunities.contact_id")?;
        require(&self.leads, opp.lead_id, "opportunities.lead_id")?;
        if let Some(lead_id) = opp.lead_id {
            let taken = self
                .opportunities
                .iter()
                .any(|other| other.id != opp.id && other.lead_id == Some(lead_id));
            if taken {
                return Err(StoreError::Duplicate("opportunities_lead_id_key".to_string()));
            }
        }
        Ok(())
    }

    fn check_template_name(&self, template: &EmailTemplate) -> StoreResult<()> {
        let taken = self
            .templates
            .iter()
            .any(|other| other.id != template.id && other.name == template.name);
        if taken {
            return Err(StoreError::Duplicate("email_templates_name_key".to_string()));
        }
        Ok(())
    }

    fn check_setting_key(&self, setting: &Setting) -> StoreResult<()> {
        let taken = self
            .settings
            .iter()
            .any(|other| other.id != setting.id && other.key == setting.key);
        if taken {
            return Err(StoreError::Duplicate("uq_settings_key".to_string()));
        }
        Ok(())
    }

    fn check_lookup_value(&self, lookup: &LookupValue) -> StoreResult<()> {
        let taken = self.lookups.iter().any(|other| {
            other.id != lookup.id
                && other.category == lookup.category
                && other.value == lookup.value
        });
        if taken {
            return Err(StoreError::Duplicate("uq_lookup_category_value".to_string()));
        }
        Ok(())
    }
}

/// Rows newest first; later inserts win ties on `created_at`.
fn newest_first<'a, T>(
    mut rows: Vec<&'a T>,
    created_at: impl Fn(&T) -> chrono::DateTime<chrono::Utc>,
) -> Vec<&'a T> {
    rows.reverse();
    rows.sort_by_key(|row| Reverse(created_at(*row)));
    rows
}

impl MemoryStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|err| StoreError::Persistence(err.to_string()))
    }
}

#[async_trait]
impl CrmStore for MemoryStore {
    async fn apply(&self, changes: ChangeSet) -> StoreResult<()> {
        let mut state = self
            .state
            .write()
            .map_err(|err| StoreError::Persistence(err.to_string()))?;
        let mut next = state.clone();
        for change in changes {
            next.apply(change)?;
        }
        *state = next;
        Ok(())
    }

    async fn company(&self, id: Uuid) -> StoreResult<Option<Company>> {
        Ok(find(&self.read()?.companies, id).cloned())
    }

    async fn company_by_name(&self, name: &str) -> StoreResult<Option<Company>> {
        let state = self.read()?;
        Ok(state.companies.iter().find(|c| c.name == name).cloned())
    }

    async fn companies(
        &self,
        search: Option<&str>,
        page: PageRequest,
    ) -> StoreResult<(Vec<Company>, i64)> {
        let state = self.read()?;
        let mut rows: Vec<&Company> = state
            .companies
            .iter()
            .filter(|c| search.map_or(true, |s| contains_ci(&c.name, s)))
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(paginate(rows, page))
    }

    async fn contact(&self, id: Uuid) -> StoreResult<Option<Contact>> {
        Ok(find(&self.read()?.contacts, id).cloned())
    }

    async fn contact_by_email(&self, email: &str) -> StoreResult<Option<Contact>> {
        let state = self.read()?;
        Ok(state
            .contacts
            .iter()
            .find(|c| c.email.as_deref() == Some(email))
            .cloned())
    }

    async fn contacts(
        &self,
        filter: &ContactFilter,
        page: PageRequest,
    ) -> StoreResult<(Vec<Contact>, i64)> {
        let state = self.read()?;
        let mut rows: Vec<&Contact> = state
            .contacts
            .iter()
            .filter(|c| {
                filter.search.as_deref().map_or(true, |s| {
                    contains_ci(&c.first_name, s)
                        || contains_ci(&c.last_name, s)
                        || c.email.as_deref().map_or(false, |e| contains_ci(e, s))
                })
            })
            .filter(|c| filter.company_id.map_or(true, |id| c.company_id == Some(id)))
            .filter(|c| filter.is_active.map_or(true, |active| c.is_active == active))
            .collect();
        rows.sort_by(|a, b| (&a.last_name, &a.first_name).cmp(&(&b.last_name, &b.first_name)));
        Ok(paginate(rows, page))
    }

    async fn search_contacts(
        &self,
        query: &str,
        limit: i64,
    ) -> StoreResult<Vec<ContactSearchResult>> {
        let state = self.read()?;
        let mut hits: Vec<(&Contact, Option<&Company>)> = state
            .contacts
            .iter()
            .filter(|c| c.is_active)
            .map(|c| {
                let company = c.company_id.and_then(|id| find(&state.companies, id));
                (c, company)
            })
            .filter(|(c, company)| {
                contains_ci(&c.first_name, query)
                    || contains_ci(&c.last_name, query)
                    || c.email.as_deref().map_or(false, |e| contains_ci(e, query))
                    || company.map_or(false, |co| contains_ci(&co.name, query))
            })
            .collect();
        hits.sort_by(|(a, _), (b, _)| {
            (&a.last_name, &a.first_name).cmp(&(&b.last_name, &b.first_name))
        });
        Ok(hits
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|(c, company)| ContactSearchResult {
                id: c.id,
                full_name: c.full_name(),
                email: c.email.clone(),
                company_name: company.map(|co| co.name.clone()),
            })
            .collect())
    }

    async fn campaign(&self, id: Uuid) -> StoreResult<Option<Campaign>> {
        Ok(find(&self.read()?.campaigns, id).cloned())
    }

    async fn campaigns(
        &self,
        is_active: Option<bool>,
        page: PageRequest,
    ) -> StoreResult<(Vec<Campaign>, i64)> {
        let state = self.read()?;
        let rows = newest_first(
            state
                .campaigns
                .iter()
                .filter(|c| is_active.map_or(true, |active| c.is_active == active))
                .collect(),
            |c| c.created_at,
        );
        Ok(paginate(rows, page))
    }

    async fn lead(&self, id: Uuid) -> StoreResult<Option<Lead>> {
        Ok(find(&self.read()?.leads, id).cloned())
    }

    async fn leads(
        &self,
        filter: &LeadFilter,
        page: PageRequest,
    ) -> StoreResult<(Vec<Lead>, i64)> {
        let state = self.read()?;
        let rows = newest_first(
            state
                .leads
                .iter()
                .filter(|l| filter.status.map_or(true, |s| l.status == s))
                .filter(|l| filter.campaign_id.map_or(true, |id| l.campaign_id == Some(id)))
                .collect(),
            |l| l.created_at,
        );
        Ok(paginate(rows, page))
    }

    async fn task(&self, id: Uuid) -> StoreResult<Option<Task>> {
        Ok(find(&self.read()?.tasks, id).cloned())
    }

    async fn tasks(
        &self,
        filter: &TaskFilter,
        page: PageRequest,
    ) -> StoreResult<(Vec<Task>, i64)> {
        let state = self.read()?;
        let mut rows: Vec<&Task> = state
            .tasks
            .iter()
            .filter(|t| filter.status.map_or(true, |s| t.status == s))
            .filter(|t| filter.priority.map_or(true, |p| t.priority == p))
            .filter(|t| {
                filter
                    .assigned_to
                    .as_deref()
                    .map_or(true, |a| t.assigned_to.as_deref() == Some(a))
            })
            .filter(|t| filter.contact_id.map_or(true, |id| t.contact_id == Some(id)))
            .filter(|t| filter.overdue_at.map_or(true, |now| t.is_overdue(now)))
            .collect();
        rows.sort_by(|a, b| listing_order(a, b));
        Ok(paginate(rows, page))
    }

    async fn follow_ups(&self, parent_id: Uuid) -> StoreResult<Vec<Task>> {
        let state = self.read()?;
        let ids = state
            .follow_up_index
            .get(&parent_id)
            .cloned()
            .unwrap_or_default();
        Ok(ids
            .iter()
            .filter_map(|id| find(&state.tasks, *id).cloned())
            .collect())
    }

    async fn opportunity(&self, id: Uuid) -> StoreResult<Option<Opportunity>> {
        Ok(find(&self.read()?.opportunities, id).cloned())
    }

    async fn opportunity_by_lead(&self, lead_id: Uuid) -> StoreResult<Option<Opportunity>> {
        let state = self.read()?;
        Ok(state
            .opportunities
            .iter()
            .find(|o| o.lead_id == Some(lead_id))
            .cloned())
    }

    async fn opportunities(
        &self,
        filter: &OpportunityFilter,
        page: PageRequest,
    ) -> StoreResult<(Vec<Opportunity>, i64)> {
        let state = self.read()?;
        let rows = newest_first(
            state
                .opportunities
                .iter()
                .filter(|o| filter.stage.map_or(true, |s| o.stage == s))
                .filter(|o| filter.company_id.map_or(true, |id| o.company_id == Some(id)))
                .filter(|o| filter.contact_id.map_or(true, |id| o.contact_id == Some(id)))
                .collect(),
            |o| o.created_at,
        );
        Ok(paginate(rows, page))
    }

    async fn stage_totals(&self) -> StoreResult<Vec<StageTotal>> {
        let state = self.read()?;
        Ok(OpportunityStage::ALL
            .iter()
            .filter_map(|stage| {
                let in_stage: Vec<&Opportunity> = state
                    .opportunities
                    .iter()
                    .filter(|o| o.stage == *stage)
                    .collect();
                if in_stage.is_empty() {
                    return None;
                }
                let total_value = in_stage
                    .iter()
                    .filter_map(|o| o.expected_value.as_ref())
                    .fold(BigDecimal::from(0), |acc, v| acc + v);
                Some(StageTotal {
                    stage: *stage,
                    count: in_stage.len() as i64,
                    total_value,
                })
            })
            .collect())
    }

    async fn average_open_value(&self) -> StoreResult<Option<BigDecimal>> {
        let state = self.read()?;
        let values: Vec<&BigDecimal> = state
            .opportunities
            .iter()
            .filter(|o| !o.stage.is_closed())
            .filter_map(|o| o.expected_value.as_ref())
            .collect();
        if values.is_empty() {
            return Ok(None);
        }
        let sum = values
            .iter()
            .fold(BigDecimal::from(0), |acc, v| acc + *v);
        Ok(Some(sum / BigDecimal::from(values.len() as i64)))
    }

    async fn history_entry(&self, id: Uuid) -> StoreResult<Option<HistoryEntry>> {
        Ok(find(&self.read()?.history, id).cloned())
    }

    async fn history(
        &self,
        contact_id: Uuid,
        page: PageRequest,
    ) -> StoreResult<(Vec<HistoryEntry>, i64)> {
        let state = self.read()?;
        let rows = newest_first(
            state
                .history
                .iter()
                .filter(|h| h.contact_id == contact_id)
                .collect(),
            |h| h.created_at,
        );
        Ok(paginate(rows, page))
    }

    async fn email_template(&self, id: Uuid) -> StoreResult<Option<EmailTemplate>> {
        Ok(find(&self.read()?.templates, id).cloned())
    }

    async fn email_templates(
        &self,
        filter: &TemplateFilter,
        page: PageRequest,
    ) -> StoreResult<(Vec<EmailTemplate>, i64)> {
        let state = self.read()?;
        let mut rows: Vec<&EmailTemplate> = state
            .templates
            .iter()
            .filter(|t| filter.is_active.map_or(true, |active| t.is_active == active))
            .filter(|t| {
                filter
                    .category
                    .as_deref()
                    .map_or(true, |c| t.category.as_deref() == Some(c))
            })
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(paginate(rows, page))
    }

    async fn setting(&self, key: &str) -> StoreResult<Option<Setting>> {
        let state = self.read()?;
        Ok(state.settings.iter().find(|s| s.key == key).cloned())
    }

    async fn settings(&self, category: Option<&str>) -> StoreResult<Vec<Setting>> {
        let state = self.read()?;
        let mut rows: Vec<Setting> = state
            .settings
            .iter()
            .filter(|s| category.map_or(true, |c| s.category == c))
            .cloned()
            .collect();
        rows.sort_by(|a, b| (&a.category, &a.key).cmp(&(&b.category, &b.key)));
        Ok(rows)
    }

    async fn lookup(&self, id: Uuid) -> StoreResult<Option<LookupValue>> {
        Ok(find(&self.read()?.lookups, id).cloned())
    }

    async fn lookup_by_value(
        &self,
        category: &str,
        value: &str,
    ) -> StoreResult<Option<LookupValue>> {
        let state = self.read()?;
        Ok(state
            .lookups
            .iter()
            .find(|l| l.category == category && l.value == value)
            .cloned())
    }

    async fn lookups(
        &self,
        category: &str,
        include_inactive: bool,
    ) -> StoreResult<Vec<LookupValue>> {
        let state = self.read()?;
        let mut rows: Vec<LookupValue> = state
            .lookups
            .iter()
            .filter(|l| l.category == category && (include_inactive || l.is_active))
            .cloned()
            .collect();
        rows.sort_by(|a, b| (a.sort_order, &a.label).cmp(&(b.sort_order, &b.label)));
        Ok(rows)
    }

    async fn lookup_categories(&self) -> StoreResult<Vec<String>> {
        let state = self.read()?;
        let mut categories: Vec<String> =
            state.lookups.iter().map(|l| l.category.clone()).collect();
        categories.sort();
        categories.dedup();
        Ok(categories)
    }
}
