//! Postgres adapter for [`CrmStore`].
//!
//! Each [`ChangeSet`] runs in one transaction. Guarded lifecycle updates add
//! the expected prior state to the `WHERE` clause; zero affected rows then
//! means either a missing row or a concurrent change.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use sqlx::error::ErrorKind;
use sqlx::postgres::PgArguments;
use sqlx::{PgConnection, PgPool, Postgres};
use uuid::Uuid;

use crate::models::{
    Campaign, Company, Contact, ContactFilter, ContactSearchResult, EmailTemplate, HistoryEntry,
    Lead, LeadFilter, LookupValue, Opportunity, OpportunityFilter, OpportunityStage, PageRequest,
    Setting, Task, TaskFilter, TemplateFilter,
};
use crate::store::{Change, ChangeSet, CrmStore, StageTotal, StoreError, StoreResult};

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

/// Translates driver errors into store errors, keeping constraint names.
fn classify(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        match db.kind() {
            ErrorKind::UniqueViolation => {
                return StoreError::Duplicate(db.constraint().unwrap_or("unique").to_string())
            }
            ErrorKind::ForeignKeyViolation
            | ErrorKind::CheckViolation
            | ErrorKind::NotNullViolation => {
                return StoreError::Constraint(db.message().to_string())
            }
            _ => {}
        }
    }
    StoreError::Database(err)
}

fn like_pattern(search: &str) -> String {
    format!("%{}%", search.trim())
}

// ---- column lists and binders; binders follow the column order ----

const COMPANY_COLUMNS: &str = "id, name, street, zip_code, city, country, website, phone, email, \
     employee_count, potential_category, industry, notes, created_at, updated_at";

fn bind_company<'q>(q: PgQuery<'q>, c: Company) -> PgQuery<'q> {
    q.bind(c.id)
        .bind(c.name)
        .bind(c.street)
        .bind(c.zip_code)
        .bind(c.city)
        .bind(c.country)
        .bind(c.website)
        .bind(c.phone)
        .bind(c.email)
        .bind(c.employee_count)
        .bind(c.potential_category)
        .bind(c.industry)
        .bind(c.notes)
        .bind(c.created_at)
        .bind(c.updated_at)
}

const CONTACT_COLUMNS: &str = "id, first_name, last_name, email, phone, mobile, position, \
     department, salutation, title, notes, is_primary, is_active, company_id, created_at, updated_at";

fn bind_contact<'q>(q: PgQuery<'q>, c: Contact) -> PgQuery<'q> {
    q.bind(c.id)
        .bind(c.first_name)
        .bind(c.last_name)
        .bind(c.email)
        .bind(c.phone)
        .bind(c.mobile)
        .bind(c.position)
        .bind(c.department)
        .bind(c.salutation)
        .bind(c.title)
        .bind(c.notes)
        .bind(c.is_primary)
        .bind(c.is_active)
        .bind(c.company_id)
        .bind(c.created_at)
        .bind(c.updated_at)
}

const CAMPAIGN_COLUMNS: &str = "id, name, description, campaign_type, source, start_date, \
     end_date, is_active, landing_page_url, lead_magnet, created_at, updated_at";

fn bind_campaign<'q>(q: PgQuery<'q>, c: Campaign) -> PgQuery<'q> {
    q.bind(c.id)
        .bind(c.name)
        .bind(c.description)
        .bind(c.campaign_type)
        .bind(c.source)
        .bind(c.start_date)
        .bind(c.end_date)
        .bind(c.is_active)
        .bind(c.landing_page_url)
        .bind(c.lead_magnet)
        .bind(c.created_at)
        .bind(c.updated_at)
}

const LEAD_COLUMNS: &str = "id, status, source, utm_source, utm_medium, utm_campaign, notes, \
     contact_id, campaign_id, created_at, updated_at";

fn bind_lead<'q>(q: PgQuery<'q>, l: Lead) -> PgQuery<'q> {
    q.bind(l.id)
        .bind(l.status)
        .bind(l.source)
        .bind(l.utm_source)
        .bind(l.utm_medium)
        .bind(l.utm_campaign)
        .bind(l.notes)
        .bind(l.contact_id)
        .bind(l.campaign_id)
        .bind(l.created_at)
        .bind(l.updated_at)
}

const TASK_COLUMNS: &str = "id, title, description, status, priority, due_date, completed_at, \
     contact_id, opportunity_id, assigned_to, created_by, parent_task_id, created_at, updated_at";

fn bind_task<'q>(q: PgQuery<'q>, t: Task) -> PgQuery<'q> {
    q.bind(t.id)
        .bind(t.title)
        .bind(t.description)
        .bind(t.status)
        .bind(t.priority)
        .bind(t.due_date)
        .bind(t.completed_at)
        .bind(t.contact_id)
        .bind(t.opportunity_id)
        .bind(t.assigned_to)
        .bind(t.created_by)
        .bind(t.parent_task_id)
        .bind(t.created_at)
        .bind(t.updated_at)
}

const OPPORTUNITY_COLUMNS: &str = "id, name, stage, expected_value, probability, \
     expected_close_date, actual_close_date, close_reason, notes, company_id, contact_id, lead_id, \
     created_at, updated_at";

fn bind_opportunity<'q>(q: PgQuery<'q>, o: Opportunity) -> PgQuery<'q> {
    q.bind(o.id)
        .bind(o.name)
        .bind(o.stage)
        .bind(o.expected_value)
        .bind(o.probability)
        .bind(o.expected_close_date)
        .bind(o.actual_close_date)
        .bind(o.close_reason)
        .bind(o.notes)
        .bind(o.company_id)
        .bind(o.contact_id)
        .bind(o.lead_id)
        .bind(o.created_at)
        .bind(o.updated_at)
}

const HISTORY_COLUMNS: &str =
    "id, contact_id, entry_type, title, content, extra_data, created_by, created_at, updated_at";

fn bind_history<'q>(q: PgQuery<'q>, h: HistoryEntry) -> PgQuery<'q> {
    q.bind(h.id)
        .bind(h.contact_id)
        .bind(h.entry_type)
        .bind(h.title)
        .bind(h.content)
        .bind(h.extra_data)
        .bind(h.created_by)
        .bind(h.created_at)
        .bind(h.updated_at)
}

const TEMPLATE_COLUMNS: &str =
    "id, name, subject, body, description, variables, is_active, category, created_at, updated_at";

fn bind_template<'q>(q: PgQuery<'q>, t: EmailTemplate) -> PgQuery<'q> {
    q.bind(t.id)
        .bind(t.name)
        .bind(t.subject)
        .bind(t.body)
        .bind(t.description)
        .bind(t.variables)
        .bind(t.is_active)
        .bind(t.category)
        .bind(t.created_at)
        .bind(t.updated_at)
}

const SETTING_COLUMNS: &str = "id, key, category, value, value_type, created_at, updated_at";

fn bind_setting<'q>(q: PgQuery<'q>, s: Setting) -> PgQuery<'q> {
    q.bind(s.id)
        .bind(s.key)
        .bind(s.category)
        .bind(s.value)
        .bind(s.value_type)
        .bind(s.created_at)
        .bind(s.updated_at)
}

const LOOKUP_COLUMNS: &str =
    "id, category, value, label, sort_order, is_active, created_at, updated_at";

fn bind_lookup<'q>(q: PgQuery<'q>, l: LookupValue) -> PgQuery<'q> {
    q.bind(l.id)
        .bind(l.category)
        .bind(l.value)
        .bind(l.label)
        .bind(l.sort_order)
        .bind(l.is_active)
        .bind(l.created_at)
        .bind(l.updated_at)
}

/// `INSERT INTO table (columns) VALUES ($1, ..., $n)`.
fn insert_sql(table: &str, columns: &str) -> String {
    let placeholders: Vec<String> = (1..=columns.split(',').count())
        .map(|i| format!("${}", i))
        .collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns,
        placeholders.join(", ")
    )
}

/// `UPDATE table SET col2 = $2, ... WHERE id = $1`, optionally guarded by
/// `guard = $n+1`.
fn update_sql(table: &str, columns: &str, guard: Option<&str>) -> String {
    let names: Vec<&str> = columns.split(',').map(str::trim).collect();
    let assignments: Vec<String> = names
        .iter()
        .enumerate()
        .skip(1)
        .map(|(i, name)| format!("{} = ${}", name, i + 1))
        .collect();
    let mut sql = format!(
        "UPDATE {} SET {} WHERE id = $1",
        table,
        assignments.join(", ")
    );
    if let Some(column) = guard {
        sql.push_str(&format!(" AND {} = ${}", column, names.len() + 1));
    }
    sql
}

/// Row of the autocomplete query.
#[derive(sqlx::FromRow)]
struct SearchRow {
    #[sqlx(flatten)]
    contact: Contact,
    company_name: Option<String>,
}

/// Postgres-backed CRM store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn execute(conn: &mut PgConnection, query: PgQuery<'_>) -> StoreResult<u64> {
        query
            .execute(conn)
            .await
            .map(|done| done.rows_affected())
            .map_err(classify)
    }

    async fn write(
        conn: &mut PgConnection,
        query: PgQuery<'_>,
        entity: &'static str,
        id: Uuid,
    ) -> StoreResult<()> {
        match Self::execute(conn, query).await? {
            0 => Err(StoreError::NotFound { entity, id }),
            _ => Ok(()),
        }
    }

    /// Compare-and-set write: a missing row is NotFound, a row in another
    /// state is Conflict.
    async fn write_guarded(
        conn: &mut PgConnection,
        query: PgQuery<'_>,
        table: &'static str,
        entity: &'static str,
        id: Uuid,
    ) -> StoreResult<()> {
        if Self::execute(&mut *conn, query).await? > 0 {
            return Ok(());
        }
        let exists: bool = sqlx::query_scalar(&format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE id = $1)",
            table
        ))
        .bind(id)
        .fetch_one(conn)
        .await?;
        if exists {
            Err(StoreError::Conflict { entity, id })
        } else {
            Err(StoreError::NotFound { entity, id })
        }
    }

    async fn delete(
        conn: &mut PgConnection,
        table: &'static str,
        entity: &'static str,
        id: Uuid,
    ) -> StoreResult<()> {
        let statement = format!("DELETE FROM {} WHERE id = $1", table);
        Self::write(conn, sqlx::query(&statement).bind(id), entity, id).await
    }

    async fn apply_change(conn: &mut PgConnection, change: Change) -> StoreResult<()> {
        macro_rules! insert {
            ($table:literal, $columns:expr, $bind:ident, $row:expr) => {{
                let statement = insert_sql($table, $columns);
                Self::execute(conn, $bind(sqlx::query(&statement), $row))
                    .await
                    .map(|_| ())
            }};
        }
        macro_rules! update {
            ($table:literal, $columns:expr, $bind:ident, $row:ident, $entity:literal) => {{
                let id = $row.id;
                let statement = update_sql($table, $columns, None);
                Self::write(conn, $bind(sqlx::query(&statement), $row), $entity, id).await
            }};
        }

        match change {
            Change::InsertCompany(c) => insert!("companies", COMPANY_COLUMNS, bind_company, c),
            Change::UpdateCompany(c) => {
                update!("companies", COMPANY_COLUMNS, bind_company, c, "company")
            }
            Change::DeleteCompany(id) => Self::delete(conn, "companies", "company", id).await,
            Change::InsertContact(c) => insert!("contacts", CONTACT_COLUMNS, bind_contact, c),
            Change::UpdateContact(c) => {
                update!("contacts", CONTACT_COLUMNS, bind_contact, c, "contact")
            }
            Change::InsertCampaign(c) => insert!("campaigns", CAMPAIGN_COLUMNS, bind_campaign, c),
            Change::UpdateCampaign(c) => {
                update!("campaigns", CAMPAIGN_COLUMNS, bind_campaign, c, "campaign")
            }
            Change::InsertLead(l) => insert!("leads", LEAD_COLUMNS, bind_lead, l),
            Change::UpdateLead {
                lead,
                expected_status,
            } => {
                let id = lead.id;
                let statement = update_sql("leads", LEAD_COLUMNS, Some("status"));
                let q = bind_lead(sqlx::query(&statement), lead).bind(expected_status);
                Self::write_guarded(conn, q, "leads", "lead", id).await
            }
            Change::InsertTask(t) => insert!("tasks", TASK_COLUMNS, bind_task, t),
            Change::UpdateTask {
                task,
                expected_status,
            } => {
                let id = task.id;
                let statement = update_sql("tasks", TASK_COLUMNS, Some("status"));
                let q = bind_task(sqlx::query(&statement), task).bind(expected_status);
                Self::write_guarded(conn, q, "tasks", "task", id).await
            }
            Change::DeleteTask(id) => Self::delete(conn, "tasks", "task", id).await,
            Change::InsertOpportunity(o) => {
                insert!("opportunities", OPPORTUNITY_COLUMNS, bind_opportunity, o)
            }
            Change::UpdateOpportunity {
                opportunity,
                expected_stage,
            } => {
                let id = opportunity.id;
                let statement = update_sql("opportunities", OPPORTUNITY_COLUMNS, Some("stage"));
                let q =
                    bind_opportunity(sqlx::query(&statement), opportunity).bind(expected_stage);
                Self::write_guarded(conn, q, "opportunities", "opportunity", id).await
            }
            Change::DeleteOpportunity(id) => {
                Self::delete(conn, "opportunities", "opportunity", id).await
            }
            Change::AppendHistory(h) => {
                insert!("contact_history", HISTORY_COLUMNS, bind_history, h)
            }
            Change::UpdateHistory(h) => {
                update!("contact_history", HISTORY_COLUMNS, bind_history, h, "history entry")
            }
            Change::DeleteHistory(id) => {
                Self::delete(conn, "contact_history", "history entry", id).await
            }
            Change::InsertTemplate(t) => {
                insert!("email_templates", TEMPLATE_COLUMNS, bind_template, t)
            }
            Change::UpdateTemplate(t) => {
                update!("email_templates", TEMPLATE_COLUMNS, bind_template, t, "email template")
            }
            Change::InsertSetting(s) => insert!("settings", SETTING_COLUMNS, bind_setting, s),
            Change::UpdateSetting(s) => {
                update!("settings", SETTING_COLUMNS, bind_setting, s, "setting")
            }
            Change::DeleteSetting(id) => Self::delete(conn, "settings", "setting", id).await,
            Change::InsertLookup(l) => insert!("lookup_values", LOOKUP_COLUMNS, bind_lookup, l),
            Change::UpdateLookup(l) => {
                update!("lookup_values", LOOKUP_COLUMNS, bind_lookup, l, "lookup value")
            }
            Change::DeleteLookup(id) => {
                Self::delete(conn, "lookup_values", "lookup value", id).await
            }
        }
    }
}

const TASK_FILTER: &str = "($1::task_status IS NULL OR status = $1) \
     AND ($2::task_priority IS NULL OR priority = $2) \
     AND ($3::text IS NULL OR assigned_to = $3) \
     AND ($4::uuid IS NULL OR contact_id = $4) \
     AND ($5::timestamptz IS NULL OR (due_date < $5 AND status IN ('open', 'in_progress')))";

const CONTACT_FILTER: &str = "($1::text IS NULL OR first_name ILIKE $1 OR last_name ILIKE $1 \
     OR email ILIKE $1) \
     AND ($2::uuid IS NULL OR company_id = $2) \
     AND ($3::bool IS NULL OR is_active = $3)";

const OPPORTUNITY_FILTER: &str = "($1::opportunity_stage IS NULL OR stage = $1) \
     AND ($2::uuid IS NULL OR company_id = $2) \
     AND ($3::uuid IS NULL OR contact_id = $3)";

const LEAD_FILTER: &str =
    "($1::lead_status IS NULL OR status = $1) AND ($2::uuid IS NULL OR campaign_id = $2)";

const TEMPLATE_FILTER: &str =
    "($1::bool IS NULL OR is_active = $1) AND ($2::text IS NULL OR category = $2)";

#[async_trait]
impl CrmStore for PgStore {
    async fn apply(&self, changes: ChangeSet) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for change in changes {
            // Dropping the transaction on error rolls it back.
            Self::apply_change(&mut tx, change).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn company(&self, id: Uuid) -> StoreResult<Option<Company>> {
        Ok(
            sqlx::query_as::<_, Company>("SELECT * FROM companies WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn company_by_name(&self, name: &str) -> StoreResult<Option<Company>> {
        Ok(sqlx::query_as::<_, Company>(
            "SELECT * FROM companies WHERE name = $1 ORDER BY created_at LIMIT 1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn companies(
        &self,
        search: Option<&str>,
        page: PageRequest,
    ) -> StoreResult<(Vec<Company>, i64)> {
        let pattern = search.map(like_pattern);
        let items = sqlx::query_as::<_, Company>(
            "SELECT * FROM companies WHERE ($1::text IS NULL OR name ILIKE $1) \
             ORDER BY name LIMIT $2 OFFSET $3",
        )
        .bind(&pattern)
        .bind(page.page_size)
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM companies WHERE ($1::text IS NULL OR name ILIKE $1)",
        )
        .bind(&pattern)
        .fetch_one(&self.pool)
        .await?;
        Ok((items, total))
    }

    async fn contact(&self, id: Uuid) -> StoreResult<Option<Contact>> {
        Ok(
            sqlx::query_as::<_, Contact>("SELECT * FROM contacts WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn contact_by_email(&self, email: &str) -> StoreResult<Option<Contact>> {
        Ok(sqlx::query_as::<_, Contact>(
            "SELECT * FROM contacts WHERE email = $1 ORDER BY created_at LIMIT 1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn contacts(
        &self,
        filter: &ContactFilter,
        page: PageRequest,
    ) -> StoreResult<(Vec<Contact>, i64)> {
        let pattern = filter.search.as_deref().map(like_pattern);
        let items = sqlx::query_as::<_, Contact>(&format!(
            "SELECT * FROM contacts WHERE {} ORDER BY last_name, first_name LIMIT $4 OFFSET $5",
            CONTACT_FILTER
        ))
        .bind(&pattern)
        .bind(filter.company_id)
        .bind(filter.is_active)
        .bind(page.page_size)
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;
        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM contacts WHERE {}",
            CONTACT_FILTER
        ))
        .bind(&pattern)
        .bind(filter.company_id)
        .bind(filter.is_active)
        .fetch_one(&self.pool)
        .await?;
        Ok((items, total))
    }

    async fn search_contacts(
        &self,
        query: &str,
        limit: i64,
    ) -> StoreResult<Vec<ContactSearchResult>> {
        let rows = sqlx::query_as::<_, SearchRow>(
            "SELECT c.*, co.name AS company_name \
             FROM contacts c LEFT JOIN companies co ON co.id = c.company_id \
             WHERE c.is_active \
               AND (c.first_name ILIKE $1 OR c.last_name ILIKE $1 \
                    OR c.email ILIKE $1 OR co.name ILIKE $1) \
             ORDER BY c.last_name, c.first_name \
             LIMIT $2",
        )
        .bind(like_pattern(query))
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| ContactSearchResult {
                id: row.contact.id,
                full_name: row.contact.full_name(),
                email: row.contact.email,
                company_name: row.company_name,
            })
            .collect())
    }

    async fn campaign(&self, id: Uuid) -> StoreResult<Option<Campaign>> {
        Ok(
            sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn campaigns(
        &self,
        is_active: Option<bool>,
        page: PageRequest,
    ) -> StoreResult<(Vec<Campaign>, i64)> {
        let items = sqlx::query_as::<_, Campaign>(
            "SELECT * FROM campaigns WHERE ($1::bool IS NULL OR is_active = $1) \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3",
        )
        .bind(is_active)
        .bind(page.page_size)
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM campaigns WHERE ($1::bool IS NULL OR is_active = $1)",
        )
        .bind(is_active)
        .fetch_one(&self.pool)
        .await?;
        Ok((items, total))
    }

    async fn lead(&self, id: Uuid) -> StoreResult<Option<Lead>> {
        Ok(sqlx::query_as::<_, Lead>("SELECT * FROM leads WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn leads(
        &self,
        filter: &LeadFilter,
        page: PageRequest,
    ) -> StoreResult<(Vec<Lead>, i64)> {
        let items = sqlx::query_as::<_, Lead>(&format!(
            "SELECT * FROM leads WHERE {} ORDER BY created_at DESC LIMIT $3 OFFSET $4",
            LEAD_FILTER
        ))
        .bind(filter.status)
        .bind(filter.campaign_id)
        .bind(page.page_size)
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;
        let total: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM leads WHERE {}", LEAD_FILTER))
                .bind(filter.status)
                .bind(filter.campaign_id)
                .fetch_one(&self.pool)
                .await?;
        Ok((items, total))
    }

    async fn task(&self, id: Uuid) -> StoreResult<Option<Task>> {
        Ok(sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn tasks(
        &self,
        filter: &TaskFilter,
        page: PageRequest,
    ) -> StoreResult<(Vec<Task>, i64)> {
        let items = sqlx::query_as::<_, Task>(&format!(
            "SELECT * FROM tasks WHERE {} \
             ORDER BY due_date ASC NULLS LAST, priority DESC, created_at ASC \
             LIMIT $6 OFFSET $7",
            TASK_FILTER
        ))
        .bind(filter.status)
        .bind(filter.priority)
        .bind(&filter.assigned_to)
        .bind(filter.contact_id)
        .bind(filter.overdue_at)
        .bind(page.page_size)
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;
        let total: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM tasks WHERE {}", TASK_FILTER))
                .bind(filter.status)
                .bind(filter.priority)
                .bind(&filter.assigned_to)
                .bind(filter.contact_id)
                .bind(filter.overdue_at)
                .fetch_one(&self.pool)
                .await?;
        Ok((items, total))
    }

    async fn follow_ups(&self, parent_id: Uuid) -> StoreResult<Vec<Task>> {
        Ok(sqlx::query_as::<_, Task>(
            "SELECT * FROM tasks WHERE parent_task_id = $1 ORDER BY created_at",
        )
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn opportunity(&self, id: Uuid) -> StoreResult<Option<Opportunity>> {
        Ok(
            sqlx::query_as::<_, Opportunity>("SELECT * FROM opportunities WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn opportunity_by_lead(&self, lead_id: Uuid) -> StoreResult<Option<Opportunity>> {
        Ok(
            sqlx::query_as::<_, Opportunity>("SELECT * FROM opportunities WHERE lead_id = $1")
                .bind(lead_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn opportunities(
        &self,
        filter: &OpportunityFilter,
        page: PageRequest,
    ) -> StoreResult<(Vec<Opportunity>, i64)> {
        let items = sqlx::query_as::<_, Opportunity>(&format!(
            "SELECT * FROM opportunities WHERE {} ORDER BY created_at DESC LIMIT $4 OFFSET $5",
            OPPORTUNITY_FILTER
        ))
        .bind(filter.stage)
        .bind(filter.company_id)
        .bind(filter.contact_id)
        .bind(page.page_size)
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;
        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM opportunities WHERE {}",
            OPPORTUNITY_FILTER
        ))
        .bind(filter.stage)
        .bind(filter.company_id)
        .bind(filter.contact_id)
        .fetch_one(&self.pool)
        .await?;
        Ok((items, total))
    }

    async fn stage_totals(&self) -> StoreResult<Vec<StageTotal>> {
        let rows: Vec<(OpportunityStage, i64, BigDecimal)> = sqlx::query_as(
            "SELECT stage, COUNT(*), COALESCE(SUM(expected_value), 0) \
             FROM opportunities GROUP BY stage ORDER BY stage",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(stage, count, total_value)| StageTotal {
                stage,
                count,
                total_value,
            })
            .collect())
    }

    async fn average_open_value(&self) -> StoreResult<Option<BigDecimal>> {
        Ok(sqlx::query_scalar(
            "SELECT AVG(expected_value) FROM opportunities \
             WHERE stage NOT IN ('closed_won', 'closed_lost')",
        )
        .fetch_one(&self.pool)
        .await?)
    }

    async fn history_entry(&self, id: Uuid) -> StoreResult<Option<HistoryEntry>> {
        Ok(
            sqlx::query_as::<_, HistoryEntry>("SELECT * FROM contact_history WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn history(
        &self,
        contact_id: Uuid,
        page: PageRequest,
    ) -> StoreResult<(Vec<HistoryEntry>, i64)> {
        let items = sqlx::query_as::<_, HistoryEntry>(
            "SELECT * FROM contact_history WHERE contact_id = $1 \
             ORDER BY created_at DESC, seq DESC LIMIT $2 OFFSET $3",
        )
        .bind(contact_id)
        .bind(page.page_size)
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM contact_history WHERE contact_id = $1")
                .bind(contact_id)
                .fetch_one(&self.pool)
                .await?;
        Ok((items, total))
    }

    async fn email_template(&self, id: Uuid) -> StoreResult<Option<EmailTemplate>> {
        Ok(
            sqlx::query_as::<_, EmailTemplate>("SELECT * FROM email_templates WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn email_templates(
        &self,
        filter: &TemplateFilter,
        page: PageRequest,
    ) -> StoreResult<(Vec<EmailTemplate>, i64)> {
        let items = sqlx::query_as::<_, EmailTemplate>(&format!(
            "SELECT * FROM email_templates WHERE {} ORDER BY name LIMIT $3 OFFSET $4",
            TEMPLATE_FILTER
        ))
        .bind(filter.is_active)
        .bind(&filter.category)
        .bind(page.page_size)
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;
        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM email_templates WHERE {}",
            TEMPLATE_FILTER
        ))
        .bind(filter.is_active)
        .bind(&filter.category)
        .fetch_one(&self.pool)
        .await?;
        Ok((items, total))
    }

    async fn setting(&self, key: &str) -> StoreResult<Option<Setting>> {
        Ok(
            sqlx::query_as::<_, Setting>("SELECT * FROM settings WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn settings(&self, category: Option<&str>) -> StoreResult<Vec<Setting>> {
        Ok(sqlx::query_as::<_, Setting>(
            "SELECT * FROM settings WHERE ($1::text IS NULL OR category = $1) \
             ORDER BY category, key",
        )
        .bind(category)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn lookup(&self, id: Uuid) -> StoreResult<Option<LookupValue>> {
        Ok(
            sqlx::query_as::<_, LookupValue>("SELECT * FROM lookup_values WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn lookup_by_value(
        &self,
        category: &str,
        value: &str,
    ) -> StoreResult<Option<LookupValue>> {
        Ok(sqlx::query_as::<_, LookupValue>(
            "SELECT * FROM lookup_values WHERE category = $1 AND value = $2",
        )
        .bind(category)
        .bind(value)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn lookups(
        &self,
        category: &str,
        include_inactive: bool,
    ) -> StoreResult<Vec<LookupValue>> {
        Ok(sqlx::query_as::<_, LookupValue>(
            "SELECT * FROM lookup_values WHERE category = $1 AND ($2 OR is_active) \
             ORDER BY sort_order, label",
        )
        .bind(category)
        .bind(include_inactive)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn lookup_categories(&self) -> StoreResult<Vec<String>> {
        Ok(
            sqlx::query_scalar("SELECT DISTINCT category FROM lookup_values ORDER BY category")
                .fetch_all(&self.pool)
                .await?,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_statement_numbers_every_column() {
        assert_eq!(
            insert_sql("settings", SETTING_COLUMNS),
            "INSERT INTO settings (id, key, category, value, value_type, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)"
        );
    }

    #[test]
    fn guarded_update_appends_the_expected_state() {
        let statement = update_sql("leads", LEAD_COLUMNS, Some("status"));
        assert!(statement.starts_with("UPDATE leads SET status = $2, source = $3"));
        assert!(statement.ends_with("WHERE id = $1 AND status = $12"));
    }
}
