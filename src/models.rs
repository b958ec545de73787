use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

// ============ Enumerations ============

/// Qualification funnel status of a lead.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "lead_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    #[default]
    Cold,
    Warm,
    Hot,
    ToBeDone,
    Disqualified,
    /// Terminal: the lead has been turned into an opportunity.
    Converted,
}

impl LeadStatus {
    /// The status a lead must hold before it can be converted.
    pub const QUALIFYING: LeadStatus = LeadStatus::Hot;

    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::Cold => "cold",
            LeadStatus::Warm => "warm",
            LeadStatus::Hot => "hot",
            LeadStatus::ToBeDone => "to_be_done",
            LeadStatus::Disqualified => "disqualified",
            LeadStatus::Converted => "converted",
        }
    }
}

/// Workflow status of a task.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "task_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Open,
    InProgress,
    Deferred,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Open => "open",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Deferred => "deferred",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Statuses in which a task past its due date counts as overdue.
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Open | TaskStatus::InProgress)
    }
}

/// Task priority. Variant order is significant: it drives the
/// "higher priority first" tie-break of task listings.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    sqlx::Type,
)]
#[sqlx(type_name = "task_priority", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
            TaskPriority::Urgent => "urgent",
        }
    }
}

/// Sales pipeline stage of an opportunity.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "opportunity_stage", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OpportunityStage {
    #[default]
    Qualification,
    Discovery,
    Proposal,
    Negotiation,
    ClosedWon,
    ClosedLost,
}

impl OpportunityStage {
    pub const ALL: [OpportunityStage; 6] = [
        OpportunityStage::Qualification,
        OpportunityStage::Discovery,
        OpportunityStage::Proposal,
        OpportunityStage::Negotiation,
        OpportunityStage::ClosedWon,
        OpportunityStage::ClosedLost,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OpportunityStage::Qualification => "qualification",
            OpportunityStage::Discovery => "discovery",
            OpportunityStage::Proposal => "proposal",
            OpportunityStage::Negotiation => "negotiation",
            OpportunityStage::ClosedWon => "closed_won",
            OpportunityStage::ClosedLost => "closed_lost",
        }
    }

    /// Win probability (percent) assumed for the stage unless overridden.
    pub fn default_probability(&self) -> i32 {
        match self {
            OpportunityStage::Qualification => 10,
            OpportunityStage::Discovery => 25,
            OpportunityStage::Proposal => 50,
            OpportunityStage::Negotiation => 75,
            OpportunityStage::ClosedWon => 100,
            OpportunityStage::ClosedLost => 0,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            OpportunityStage::ClosedWon | OpportunityStage::ClosedLost
        )
    }
}

/// Kind of event recorded in a contact's timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "history_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum HistoryType {
    Note,
    Call,
    Email,
    Meeting,
    StatusChange,
    TaskCreated,
    DataChange,
    LeadCreated,
}

impl HistoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryType::Note => "note",
            HistoryType::Call => "call",
            HistoryType::Email => "email",
            HistoryType::Meeting => "meeting",
            HistoryType::StatusChange => "status_change",
            HistoryType::TaskCreated => "task_created",
            HistoryType::DataChange => "data_change",
            HistoryType::LeadCreated => "lead_created",
        }
    }
}

macro_rules! display_as_str {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

display_as_str!(LeadStatus, TaskStatus, TaskPriority, OpportunityStage, HistoryType);

// ============ Database Models ============

/// A customer organisation.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Company {
    /// Unique identifier for the company.
    pub id: Uuid,
    /// Legal or trading name. Used for get-or-create lookups (exact match).
    pub name: String,
    /// Street address.
    pub street: Option<String>,
    /// Postal code.
    pub zip_code: Option<String>,
    /// City.
    pub city: Option<String>,
    /// Country name.
    pub country: String,
    /// Website URL.
    pub website: Option<String>,
    /// Main phone number.
    pub phone: Option<String>,
    /// Main email address.
    pub email: Option<String>,
    /// Number of employees.
    pub employee_count: Option<i32>,
    /// Potential category (A, B, C or D).
    pub potential_category: Option<String>,
    /// Industry lookup value.
    pub industry: Option<String>,
    /// Free-text notes.
    pub notes: Option<String>,
    /// Timestamp of creation.
    pub created_at: DateTime<Utc>,
    /// Timestamp of last update.
    pub updated_at: DateTime<Utc>,
}

impl Company {
    pub const DEFAULT_COUNTRY: &'static str = "Österreich";

    /// Builds a company with only a name, as created by lead intake.
    pub fn named(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            street: None,
            zip_code: None,
            city: None,
            country: Self::DEFAULT_COUNTRY.to_string(),
            website: None,
            phone: None,
            email: None,
            employee_count: None,
            potential_category: None,
            industry: None,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A person the organisation is in touch with.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Contact {
    /// Unique identifier for the contact.
    pub id: Uuid,
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// Email address. Used for get-or-create lookups (exact match).
    pub email: Option<String>,
    /// Landline number.
    pub phone: Option<String>,
    /// Mobile number.
    pub mobile: Option<String>,
    /// Job position.
    pub position: Option<String>,
    /// Department.
    pub department: Option<String>,
    /// Salutation (e.g. "Herr", "Frau").
    pub salutation: Option<String>,
    /// Academic title (e.g. "Dr.", "Mag.").
    pub title: Option<String>,
    /// Free-text notes.
    pub notes: Option<String>,
    /// Whether this is the primary contact of its company.
    pub is_primary: bool,
    /// Soft-delete flag. Contacts are never physically removed.
    pub is_active: bool,
    /// Company the contact works for.
    pub company_id: Option<Uuid>,
    /// Timestamp of creation.
    pub created_at: DateTime<Utc>,
    /// Timestamp of last update.
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    /// Builds an active contact with the given name.
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            email: None,
            phone: None,
            mobile: None,
            position: None,
            department: None,
            salutation: None,
            title: None,
            notes: None,
            is_primary: false,
            is_active: true,
            company_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Full name including the academic title, if any.
    pub fn full_name(&self) -> String {
        match self.title.as_deref().filter(|t| !t.is_empty()) {
            Some(title) => format!("{} {} {}", title, self.first_name, self.last_name),
            None => format!("{} {}", self.first_name, self.last_name),
        }
    }
}

/// A marketing campaign leads can be attributed to.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Campaign {
    /// Unique identifier for the campaign.
    pub id: Uuid,
    /// Campaign name.
    pub name: String,
    /// Description shown on landing pages.
    pub description: Option<String>,
    /// Channel type (social_media, email, landing_page, ...).
    #[serde(rename = "type")]
    pub campaign_type: String,
    /// Traffic source (facebook, google, linkedin, ...).
    pub source: Option<String>,
    /// First day of the campaign.
    pub start_date: Option<NaiveDate>,
    /// Last day of the campaign.
    pub end_date: Option<NaiveDate>,
    /// Whether the campaign accepts submissions.
    pub is_active: bool,
    /// Landing page address.
    pub landing_page_url: Option<String>,
    /// Name of the resource offered in exchange for contact details.
    pub lead_magnet: Option<String>,
    /// Timestamp of creation.
    pub created_at: DateTime<Utc>,
    /// Timestamp of last update.
    pub updated_at: DateTime<Utc>,
}

/// A contact expressing interest, tracked through the qualification funnel.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Lead {
    /// Unique identifier for the lead.
    pub id: Uuid,
    /// Funnel status.
    pub status: LeadStatus,
    /// Where the lead came from (e.g. "landing_page", "import").
    pub source: Option<String>,
    /// UTM source attribution.
    pub utm_source: Option<String>,
    /// UTM medium attribution.
    pub utm_medium: Option<String>,
    /// UTM campaign attribution.
    pub utm_campaign: Option<String>,
    /// Free-text notes.
    pub notes: Option<String>,
    /// Owning contact.
    pub contact_id: Uuid,
    /// Attributed campaign.
    pub campaign_id: Option<Uuid>,
    /// Timestamp of creation.
    pub created_at: DateTime<Utc>,
    /// Timestamp of last update.
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    /// Builds a cold lead for the contact.
    pub fn new(contact_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            status: LeadStatus::default(),
            source: None,
            utm_source: None,
            utm_medium: None,
            utm_campaign: None,
            notes: None,
            contact_id,
            campaign_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A unit of work, optionally chained to the task it follows up.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for the task.
    pub id: Uuid,
    /// Short summary.
    pub title: String,
    /// Details. Completion notes are appended here.
    pub description: Option<String>,
    /// Workflow status.
    pub status: TaskStatus,
    /// Priority.
    pub priority: TaskPriority,
    /// Deadline.
    pub due_date: Option<DateTime<Utc>>,
    /// Set once, when the task is completed.
    pub completed_at: Option<DateTime<Utc>>,
    /// Related contact.
    pub contact_id: Option<Uuid>,
    /// Related opportunity.
    pub opportunity_id: Option<Uuid>,
    /// Assignee identifier.
    pub assigned_to: Option<String>,
    /// Creator identifier.
    pub created_by: Option<String>,
    /// The completed task this one follows up.
    pub parent_task_id: Option<Uuid>,
    /// Timestamp of creation.
    pub created_at: DateTime<Utc>,
    /// Timestamp of last update.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Builds an open, medium-priority task.
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: None,
            status: TaskStatus::Open,
            priority: TaskPriority::Medium,
            due_date: None,
            completed_at: None,
            contact_id: None,
            opportunity_id: None,
            assigned_to: None,
            created_by: None,
            parent_task_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Overdue means a due date strictly before `now` while the task is
    /// still open or in progress. Not persisted.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        match self.due_date {
            Some(due) => self.status.is_active() && due < now,
            None => false,
        }
    }
}

/// A potential deal moving through the sales pipeline.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Opportunity {
    /// Unique identifier for the opportunity.
    pub id: Uuid,
    /// Deal name.
    pub name: String,
    /// Pipeline stage.
    pub stage: OpportunityStage,
    /// Expected deal value.
    pub expected_value: Option<BigDecimal>,
    /// Win probability in percent (0-100).
    pub probability: i32,
    /// Planned close date.
    pub expected_close_date: Option<NaiveDate>,
    /// Date the deal was closed. Only set by closing.
    pub actual_close_date: Option<NaiveDate>,
    /// Why the deal was won or lost.
    pub close_reason: Option<String>,
    /// Free-text notes.
    pub notes: Option<String>,
    /// Customer company.
    pub company_id: Option<Uuid>,
    /// Customer contact.
    pub contact_id: Option<Uuid>,
    /// Originating lead. Unique across opportunities.
    pub lead_id: Option<Uuid>,
    /// Timestamp of creation.
    pub created_at: DateTime<Utc>,
    /// Timestamp of last update.
    pub updated_at: DateTime<Utc>,
}

impl Opportunity {
    /// Builds an opportunity in the qualification stage with its default probability.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        let stage = OpportunityStage::Qualification;
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            stage,
            expected_value: None,
            probability: stage.default_probability(),
            expected_close_date: None,
            actual_close_date: None,
            close_reason: None,
            notes: None,
            company_id: None,
            contact_id: None,
            lead_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// `expected_value × probability / 100`, zero when no value is known.
    pub fn weighted_value(&self) -> BigDecimal {
        match &self.expected_value {
            Some(value) => value * BigDecimal::from(self.probability) / BigDecimal::from(100),
            None => BigDecimal::from(0),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.stage.is_closed()
    }

    pub fn is_won(&self) -> bool {
        self.stage == OpportunityStage::ClosedWon
    }
}

/// Immutable timeline entry describing an event against a contact.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Unique identifier for the entry.
    pub id: Uuid,
    /// Contact the event belongs to.
    pub contact_id: Uuid,
    /// Event kind.
    #[serde(rename = "type")]
    pub entry_type: HistoryType,
    /// Headline.
    pub title: String,
    /// Body text.
    pub content: Option<String>,
    /// Structured payload (e.g. call duration and outcome).
    pub extra_data: Option<serde_json::Value>,
    /// Actor that caused the event.
    pub created_by: Option<String>,
    /// Timestamp of creation.
    pub created_at: DateTime<Utc>,
    /// Timestamp of last edit.
    pub updated_at: DateTime<Utc>,
}

/// Reusable email with `{{contact.*}}` / `{{company.*}}` placeholders.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct EmailTemplate {
    /// Unique identifier for the template.
    pub id: Uuid,
    /// Unique template name.
    pub name: String,
    /// Subject line with placeholders.
    pub subject: String,
    /// Body with placeholders.
    pub body: String,
    /// Internal description.
    pub description: Option<String>,
    /// JSON list of placeholder names the template uses.
    pub variables: Option<serde_json::Value>,
    /// Whether the template is offered for sending.
    pub is_active: bool,
    /// Category (confirmation, reminder, ...).
    pub category: Option<String>,
    /// Timestamp of creation.
    pub created_at: DateTime<Utc>,
    /// Timestamp of last update.
    pub updated_at: DateTime<Utc>,
}

/// Key-value application setting.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Setting {
    pub id: Uuid,
    /// Unique key.
    pub key: String,
    pub category: String,
    pub value: Option<String>,
    /// One of string, number, boolean, json.
    pub value_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Configurable dropdown option.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct LookupValue {
    pub id: Uuid,
    pub category: String,
    /// Machine value, unique within its category.
    pub value: String,
    pub label: String,
    pub sort_order: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============ Pagination ============

/// Page selection taken from query parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub page_size: i64,
}

impl PageRequest {
    pub const MAX_PAGE_SIZE: i64 = 100;

    /// Builds a request, clamping page to >= 1 and page_size to 1..=100.
    pub fn new(page: Option<i64>, page_size: Option<i64>, default_size: i64) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            page_size: page_size
                .unwrap_or(default_size)
                .clamp(1, Self::MAX_PAGE_SIZE),
        }
    }

    /// Rows to skip; saturates instead of overflowing on huge page numbers.
    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.page_size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None, 20)
    }
}

/// Pagination query parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl PageParams {
    pub fn to_request(&self, default_size: i64) -> PageRequest {
        PageRequest::new(self.page, self.page_size, default_size)
    }
}

/// One page of a listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64, request: PageRequest) -> Self {
        Self {
            items,
            total,
            page: request.page,
            page_size: request.page_size,
            total_pages: (total + request.page_size - 1) / request.page_size,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            page_size: self.page_size,
            total_pages: self.total_pages,
        }
    }
}

// ============ Listing Filters ============

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeadFilter {
    pub status: Option<LeadStatus>,
    pub campaign_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub assigned_to: Option<String>,
    pub contact_id: Option<Uuid>,
    /// Only tasks overdue at this instant.
    #[serde(skip)]
    pub overdue_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpportunityFilter {
    pub stage: Option<OpportunityStage>,
    pub company_id: Option<Uuid>,
    pub contact_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContactFilter {
    pub search: Option<String>,
    pub company_id: Option<Uuid>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplateFilter {
    pub is_active: Option<bool>,
    pub category: Option<String>,
}

// ============ API Request Models ============

/// Direct lead entry.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateLead {
    pub contact_id: Uuid,
    pub campaign_id: Option<Uuid>,
    #[serde(default)]
    pub status: LeadStatus,
    pub source: Option<String>,
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub notes: Option<String>,
}

/// Landing-page form submission.
#[derive(Debug, Clone, Deserialize)]
pub struct LeadForm {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub company_name: Option<String>,
    pub campaign_id: Option<Uuid>,
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
}

/// Partial lead update. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateLead {
    pub status: Option<LeadStatus>,
    pub source: Option<String>,
    pub notes: Option<String>,
    pub campaign_id: Option<Uuid>,
}

/// Summary of a bulk lead import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadImportResult {
    pub total_rows: usize,
    pub imported: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTask {
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default, deserialize_with = "utc_or_naive::deserialize")]
    pub due_date: Option<DateTime<Utc>>,
    pub contact_id: Option<Uuid>,
    pub opportunity_id: Option<Uuid>,
    pub assigned_to: Option<String>,
    pub parent_task_id: Option<Uuid>,
}

impl CreateTask {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            priority: TaskPriority::Medium,
            due_date: None,
            contact_id: None,
            opportunity_id: None,
            assigned_to: None,
            parent_task_id: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateTask {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    #[serde(default, deserialize_with = "utc_or_naive::deserialize")]
    pub due_date: Option<DateTime<Utc>>,
    pub assigned_to: Option<String>,
    pub contact_id: Option<Uuid>,
    pub opportunity_id: Option<Uuid>,
}

/// Completion of a task, optionally spawning a follow-up.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompleteTask {
    pub notes: Option<String>,
    #[serde(default)]
    pub create_follow_up: bool,
    pub follow_up_title: Option<String>,
    #[serde(default, deserialize_with = "utc_or_naive::deserialize")]
    pub follow_up_due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub follow_up_priority: TaskPriority,
}

/// A completed task and the follow-up it spawned, if any.
#[derive(Debug, Clone, Serialize)]
pub struct TaskCompletion {
    pub task: Task,
    pub follow_up_task: Option<Task>,
}

/// Task as presented by listings, with the derived overdue flag.
#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    #[serde(flatten)]
    pub task: Task,
    pub is_overdue: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOpportunity {
    pub name: String,
    #[serde(default)]
    pub stage: OpportunityStage,
    pub expected_value: Option<BigDecimal>,
    pub probability: Option<i32>,
    pub expected_close_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub company_id: Option<Uuid>,
    pub contact_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateOpportunity {
    pub name: Option<String>,
    pub stage: Option<OpportunityStage>,
    pub expected_value: Option<BigDecimal>,
    /// Explicit probability; wins over the stage default when a stage change
    /// is part of the same update.
    pub probability: Option<i32>,
    pub expected_close_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub company_id: Option<Uuid>,
    pub contact_id: Option<Uuid>,
}

/// Lead-to-opportunity conversion input.
#[derive(Debug, Clone, Deserialize)]
pub struct ConvertLead {
    pub name: String,
    pub expected_value: Option<BigDecimal>,
    pub expected_close_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CloseOpportunity {
    pub won: bool,
    pub close_reason: Option<String>,
    pub actual_value: Option<BigDecimal>,
}

/// Aggregates for one pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageStats {
    pub stage: OpportunityStage,
    pub count: i64,
    pub total_value: BigDecimal,
    /// `total_value` weighted by the stage-default probability.
    pub weighted_value: BigDecimal,
}

/// Whole-pipeline report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStats {
    pub total_opportunities: i64,
    pub total_value: BigDecimal,
    pub weighted_value: BigDecimal,
    pub stages: Vec<StageStats>,
    /// Won / (won + lost) × 100, zero without closed deals.
    pub win_rate: f64,
    /// Mean expected value of open deals, zero without open deals.
    pub average_deal_size: BigDecimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateCompany {
    pub name: String,
    pub street: Option<String>,
    pub zip_code: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub website: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub employee_count: Option<i32>,
    pub potential_category: Option<String>,
    pub industry: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateCompany {
    pub name: Option<String>,
    pub street: Option<String>,
    pub zip_code: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub website: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub employee_count: Option<i32>,
    pub potential_category: Option<String>,
    pub industry: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateContact {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub mobile: Option<String>,
    pub position: Option<String>,
    pub department: Option<String>,
    pub salutation: Option<String>,
    pub title: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub is_primary: bool,
    pub company_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateContact {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub mobile: Option<String>,
    pub position: Option<String>,
    pub department: Option<String>,
    pub salutation: Option<String>,
    pub title: Option<String>,
    pub notes: Option<String>,
    pub is_primary: Option<bool>,
    pub is_active: Option<bool>,
    pub company_id: Option<Uuid>,
}

/// Autocomplete hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContactSearchResult {
    pub id: Uuid,
    pub full_name: String,
    pub email: Option<String>,
    pub company_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateCampaign {
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub campaign_type: String,
    pub source: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub landing_page_url: Option<String>,
    pub lead_magnet: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateCampaign {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub campaign_type: Option<String>,
    pub source: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub is_active: Option<bool>,
    pub landing_page_url: Option<String>,
    pub lead_magnet: Option<String>,
}

/// Campaign details exposed to public landing pages.
#[derive(Debug, Clone, Serialize)]
pub struct PublicCampaign {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub lead_magnet: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewNote {
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewCall {
    pub content: String,
    pub duration_minutes: Option<i32>,
    /// reached, voicemail, no_answer
    pub outcome: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateHistoryEntry {
    pub title: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateEmailTemplate {
    pub name: String,
    pub subject: String,
    pub body: String,
    pub description: Option<String>,
    pub variables: Option<Vec<String>>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateEmailTemplate {
    pub name: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub description: Option<String>,
    pub variables: Option<Vec<String>>,
    pub is_active: Option<bool>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailPreviewRequest {
    pub template_id: Uuid,
    pub contact_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendEmailRequest {
    pub template_id: Uuid,
    pub contact_id: Uuid,
    pub subject_override: Option<String>,
}

/// Rendered email ready for delivery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailPreview {
    pub subject: String,
    pub body: String,
    pub to_email: String,
    pub to_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSetting {
    pub key: String,
    pub category: String,
    pub value: Option<String>,
    #[serde(default = "default_value_type")]
    pub value_type: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateSetting {
    pub category: Option<String>,
    pub value: Option<String>,
    pub value_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateLookupValue {
    pub category: String,
    pub value: String,
    pub label: String,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateLookupValue {
    pub value: Option<String>,
    pub label: Option<String>,
    pub sort_order: Option<i32>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReorderLookups {
    pub ordered_ids: Vec<Uuid>,
}

/// Deserializes an optional timestamp, reading values without an explicit
/// offset (`2024-03-01T12:00:00`) as UTC.
pub mod utc_or_naive {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{de::Error, Deserialize, Deserializer};

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(aware) = DateTime::parse_from_rfc3339(raw) {
            return Some(aware.with_timezone(&Utc));
        }
        ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .map(|naive| naive.and_utc())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(raw) => parse(&raw)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid timestamp: {}", raw))),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_value_type() -> String {
    "string".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::str::FromStr;

    #[test]
    fn stage_probability_table() {
        let expected = [10, 25, 50, 75, 100, 0];
        for (stage, probability) in OpportunityStage::ALL.iter().zip(expected) {
            assert_eq!(stage.default_probability(), probability, "{stage}");
        }
    }

    #[test]
    fn weighted_value_uses_record_probability() {
        let mut opp = Opportunity::new("Deal");
        opp.expected_value = Some(BigDecimal::from_str("2000").unwrap());
        opp.probability = 30;
        assert_eq!(opp.weighted_value(), BigDecimal::from(600));

        opp.expected_value = None;
        assert_eq!(opp.weighted_value(), BigDecimal::from(0));
    }

    #[test]
    fn overdue_requires_active_status_and_past_due_date() {
        let now = Utc::now();
        let mut task = Task::new("Call back");
        assert!(!task.is_overdue(now));

        task.due_date = Some(now - Duration::days(2));
        assert!(task.is_overdue(now));

        task.status = TaskStatus::InProgress;
        assert!(task.is_overdue(now));

        task.status = TaskStatus::Deferred;
        assert!(!task.is_overdue(now));

        task.status = TaskStatus::Completed;
        assert!(!task.is_overdue(now));

        task.status = TaskStatus::Open;
        task.due_date = Some(now);
        assert!(!task.is_overdue(now), "due exactly now is not strictly past");
    }

    #[test]
    fn priority_orders_low_to_urgent() {
        assert!(TaskPriority::Low < TaskPriority::Medium);
        assert!(TaskPriority::High < TaskPriority::Urgent);
    }

    #[test]
    fn full_name_includes_title() {
        let mut contact = Contact::new("Anna", "Huber");
        assert_eq!(contact.full_name(), "Anna Huber");
        contact.title = Some("Dr.".to_string());
        assert_eq!(contact.full_name(), "Dr. Anna Huber");
    }

    #[test]
    fn page_request_clamps_and_computes_pages() {
        let request = PageRequest::new(Some(0), Some(500), 20);
        assert_eq!(request.page, 1);
        assert_eq!(request.page_size, 100);

        let request = PageRequest::new(Some(3), Some(20), 20);
        assert_eq!(request.offset(), 40);

        let page: Page<u8> = Page::new(vec![], 41, request);
        assert_eq!(page.total_pages, 3);
        let empty: Page<u8> = Page::new(vec![], 0, request);
        assert_eq!(empty.total_pages, 0);

        let far = PageRequest::new(Some(i64::MAX), Some(100), 20);
        assert_eq!(far.offset(), i64::MAX);
    }

    #[test]
    fn due_dates_without_offset_are_utc() {
        let aware = utc_or_naive::parse("2024-03-01T12:00:00+02:00").unwrap();
        assert_eq!(aware.to_rfc3339(), "2024-03-01T10:00:00+00:00");

        let naive = utc_or_naive::parse("2024-03-01T12:00:00").unwrap();
        assert_eq!(naive.to_rfc3339(), "2024-03-01T12:00:00+00:00");

        let task: CreateTask =
            serde_json::from_value(serde_json::json!({"title": "x", "due_date": "2024-03-01 08:30:00"}))
                .unwrap();
        assert_eq!(task.due_date, utc_or_naive::parse("2024-03-01T08:30:00Z"));

        let task: CreateTask = serde_json::from_value(serde_json::json!({"title": "x"})).unwrap();
        assert!(task.due_date.is_none());
    }

    #[test]
    fn enums_serialize_as_machine_values() {
        assert_eq!(
            serde_json::to_value(LeadStatus::ToBeDone).unwrap(),
            serde_json::json!("to_be_done")
        );
        assert_eq!(
            serde_json::from_value::<OpportunityStage>(serde_json::json!("closed_won")).unwrap(),
            OpportunityStage::ClosedWon
        );
    }
}
