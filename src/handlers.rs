use crate::audit::AuditTrail;
use crate::config::Config;
use crate::db::Database;
use crate::directory::Directory;
use crate::email::{EmailService, Mailer};
use crate::errors::{AppError, ResultExt};
use crate::leads::LeadManager;
use crate::lifecycle::CrmError;
use crate::models::*;
use crate::opportunities::OpportunityManager;
use crate::settings::SettingsService;
use crate::store::CrmStore;
use crate::tasks::TaskManager;
use axum::{
    async_trait,
    extract::{FromRequestParts, Multipart, Path, Query, State},
    http::{request::Parts, StatusCode},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use uuid::Uuid;

/// Header carrying the acting user's identifier.
pub const ACTOR_HEADER: &str = "x-actor";

/// Default page size of listings.
const PAGE_SIZE: i64 = 20;
/// Default page size of contact timelines.
const HISTORY_PAGE_SIZE: i64 = 50;

const PUBLIC_LEAD_THANKS: &str =
    "Vielen Dank für Ihre Anfrage! Wir werden uns in Kürze bei Ihnen melden.";
const PUBLIC_LEAD_FAILED: &str = "Fehler bei der Verarbeitung. Bitte versuchen Sie es erneut.";

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Persistence port all services write through.
    pub store: Arc<dyn CrmStore>,
    /// Postgres pool, absent when running on the in-memory store.
    pub db: Option<Database>,
    /// Application configuration.
    pub config: Config,
    /// Transport for outgoing template emails.
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn CrmStore>,
        db: Option<Database>,
        config: Config,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            store,
            db,
            config,
            mailer,
        }
    }

    fn leads(&self) -> LeadManager<dyn CrmStore> {
        LeadManager::new(self.store.clone())
    }

    fn tasks(&self) -> TaskManager<dyn CrmStore> {
        TaskManager::new(self.store.clone())
    }

    fn opportunities(&self) -> OpportunityManager<dyn CrmStore> {
        OpportunityManager::new(self.store.clone())
    }

    fn directory(&self) -> Directory<dyn CrmStore> {
        Directory::new(self.store.clone())
    }

    fn audit(&self) -> AuditTrail<dyn CrmStore> {
        AuditTrail::new(self.store.clone())
    }

    fn email(&self) -> EmailService<dyn CrmStore> {
        EmailService::new(self.store.clone(), self.mailer.clone())
    }

    fn settings(&self) -> SettingsService<dyn CrmStore> {
        SettingsService::new(self.store.clone())
    }
}

/// Identifier of whoever issued the request: the `x-actor` header, or the
/// configured default actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor(pub String);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Actor {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let actor = parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| state.config.default_actor.clone());
        Ok(Actor(actor))
    }
}

// ============ Query Parameters ============

#[derive(Debug, Default, Deserialize)]
pub struct TaskQuery {
    /// Only tasks that are overdue right now.
    pub overdue: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CompanyQuery {
    pub search: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CampaignQuery {
    pub is_active: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SettingsQuery {
    pub category: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LookupQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteLookupQuery {
    #[serde(default)]
    pub hard_delete: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ImportQuery {
    pub campaign_id: Option<Uuid>,
}

// ============ Health ============

/// Health check endpoint.
///
/// # Returns
///
/// * `(StatusCode, Json<serde_json::Value>)` - HTTP 200 OK with health status JSON.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "rust-crm-api",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// GET /health/db
///
/// Probes the database. Always answers 200; the body says whether the
/// database responded.
pub async fn health_db(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let Some(db) = &state.db else {
        return Json(json!({ "status": "healthy", "database": "in-memory" }));
    };
    match db.ping().await.context("Database health check failed") {
        Ok(()) => Json(json!({ "status": "healthy", "database": "connected" })),
        Err(e) => {
            tracing::warn!("❌ {}", e);
            Json(json!({
                "status": "unhealthy",
                "database": "disconnected",
                "error": e.to_string()
            }))
        }
    }
}

// ============ Leads ============

/// GET /api/v1/leads
pub async fn list_leads(
    State(state): State<Arc<AppState>>,
    Query(page): Query<PageParams>,
    Query(filter): Query<LeadFilter>,
) -> Result<Json<Page<Lead>>, AppError> {
    tracing::info!("GET /leads - filter: {:?}", filter);
    let leads = state.leads().list(&filter, page.to_request(PAGE_SIZE)).await?;
    Ok(Json(leads))
}

/// GET /api/v1/leads/:id
pub async fn get_lead(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Lead>, AppError> {
    tracing::info!("GET /leads/{}", id);
    Ok(Json(state.leads().get(id).await?))
}

/// POST /api/v1/leads
///
/// Creates a lead for an existing contact.
///
/// # Returns
///
/// * `Result<(StatusCode, Json<Lead>), AppError>` - 201 with the new lead.
pub async fn create_lead(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Json(input): Json<CreateLead>,
) -> Result<(StatusCode, Json<Lead>), AppError> {
    tracing::info!("POST /leads - contact: {}", input.contact_id);
    let lead = state.leads().create(input, &actor).await?;
    Ok((StatusCode::CREATED, Json(lead)))
}

/// PUT /api/v1/leads/:id
pub async fn update_lead(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateLead>,
) -> Result<Json<Lead>, AppError> {
    tracing::info!("PUT /leads/{}", id);
    Ok(Json(state.leads().update(id, input, &actor).await?))
}

/// POST /api/v1/leads/:id/convert
///
/// Converts a hot lead into an opportunity.
///
/// # Arguments
///
/// * `id` - The lead to convert.
/// * `input` - Name and optional value of the new opportunity.
///
/// # Returns
///
/// * `Result<(StatusCode, Json<Opportunity>), AppError>` - 201 with the opportunity,
///   404 for an unknown lead, 409 when the lead is not qualified or already converted.
pub async fn convert_lead(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
    Json(input): Json<ConvertLead>,
) -> Result<(StatusCode, Json<Opportunity>), AppError> {
    tracing::info!("POST /leads/{}/convert", id);
    let opportunity = state
        .leads()
        .convert_to_opportunity(id, input, &actor)
        .await
        .with_context(|| format!("Converting lead {}", id))?;
    Ok((StatusCode::CREATED, Json(opportunity)))
}

/// POST /api/v1/leads/import
///
/// Bulk import from a CSV or Excel upload (multipart field `file`). The
/// campaign may be given as query parameter or as multipart field
/// `campaign_id`.
///
/// # Returns
///
/// * `Result<Json<LeadImportResult>, AppError>` - Row counts and the first row errors.
pub async fn import_leads(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Query(query): Query<ImportQuery>,
    mut multipart: Multipart,
) -> Result<Json<LeadImportResult>, AppError> {
    let mut upload: Option<(String, Vec<u8>)> = None;
    let mut campaign_id = query.campaign_id;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Upload failed: {}", e)))?;
                upload = Some((filename, bytes.to_vec()));
            }
            Some("campaign_id") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                if !text.trim().is_empty() {
                    let id = Uuid::parse_str(text.trim()).map_err(|_| {
                        AppError::BadRequest("campaign_id must be a UUID".to_string())
                    })?;
                    campaign_id = Some(id);
                }
            }
            _ => {}
        }
    }

    let (filename, bytes) = upload
        .filter(|(filename, _)| !filename.is_empty())
        .ok_or_else(|| AppError::BadRequest("No file uploaded".to_string()))?;
    tracing::info!(
        "POST /leads/import - file: {} ({} bytes), campaign: {:?}",
        filename,
        bytes.len(),
        campaign_id
    );

    let result = state
        .leads()
        .import_file(&filename, &bytes, campaign_id, &actor)
        .await
        .with_context(|| format!("Importing {}", filename))?;
    Ok(Json(result))
}

// ============ Tasks ============

/// GET /api/v1/tasks
///
/// Lists tasks by due date (no due date last), then priority. `overdue=true`
/// narrows to open or in-progress tasks past their due date.
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(page): Query<PageParams>,
    Query(mut filter): Query<TaskFilter>,
    Query(query): Query<TaskQuery>,
) -> Result<Json<Page<TaskView>>, AppError> {
    tracing::info!("GET /tasks - filter: {:?}, overdue: {:?}", filter, query.overdue);
    let now = Utc::now();
    if query.overdue == Some(true) {
        filter.overdue_at = Some(now);
    }
    let tasks = state
        .tasks()
        .list(&filter, page.to_request(PAGE_SIZE), now)
        .await?;
    Ok(Json(tasks))
}

/// GET /api/v1/tasks/my
pub async fn list_my_tasks(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Query(page): Query<PageParams>,
) -> Result<Json<Page<TaskView>>, AppError> {
    tracing::info!("GET /tasks/my - actor: {}", actor);
    let filter = TaskFilter {
        assigned_to: Some(actor),
        ..TaskFilter::default()
    };
    let tasks = state
        .tasks()
        .list(&filter, page.to_request(PAGE_SIZE), Utc::now())
        .await?;
    Ok(Json(tasks))
}

/// GET /api/v1/tasks/:id
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TaskView>, AppError> {
    tracing::info!("GET /tasks/{}", id);
    let task = state.tasks().get(id).await?;
    Ok(Json(TaskView {
        is_overdue: task.is_overdue(Utc::now()),
        task,
    }))
}

/// GET /api/v1/tasks/:id/follow-ups
pub async fn list_follow_ups(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Task>>, AppError> {
    tracing::info!("GET /tasks/{}/follow-ups", id);
    state.tasks().get(id).await?;
    Ok(Json(state.tasks().follow_ups(id).await?))
}

/// POST /api/v1/tasks
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Json(input): Json<CreateTask>,
) -> Result<(StatusCode, Json<Task>), AppError> {
    tracing::info!("POST /tasks - title: {}", input.title);
    let task = state.tasks().create(input, &actor).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

/// PUT /api/v1/tasks/:id
pub async fn update_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateTask>,
) -> Result<Json<Task>, AppError> {
    tracing::info!("PUT /tasks/{}", id);
    Ok(Json(state.tasks().update(id, input).await?))
}

/// POST /api/v1/tasks/:id/complete
///
/// Completes the task and optionally spawns a follow-up.
///
/// # Returns
///
/// * `Result<Json<TaskCompletion>, AppError>` - `{task, follow_up_task}`; 409 when
///   the task was already completed.
pub async fn complete_task(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
    Json(input): Json<CompleteTask>,
) -> Result<Json<TaskCompletion>, AppError> {
    tracing::info!("POST /tasks/{}/complete - follow up: {}", id, input.create_follow_up);
    let completion = state
        .tasks()
        .complete(id, input, &actor)
        .await
        .with_context(|| format!("Completing task {}", id))?;
    Ok(Json(completion))
}

/// DELETE /api/v1/tasks/:id
pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    tracing::info!("DELETE /tasks/{}", id);
    state.tasks().delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============ Opportunities ============

/// GET /api/v1/opportunities
pub async fn list_opportunities(
    State(state): State<Arc<AppState>>,
    Query(page): Query<PageParams>,
    Query(filter): Query<OpportunityFilter>,
) -> Result<Json<Page<Opportunity>>, AppError> {
    tracing::info!("GET /opportunities - filter: {:?}", filter);
    let opportunities = state
        .opportunities()
        .list(&filter, page.to_request(PAGE_SIZE))
        .await?;
    Ok(Json(opportunities))
}

/// GET /api/v1/opportunities/stats
pub async fn pipeline_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<PipelineStats>, AppError> {
    tracing::info!("GET /opportunities/stats");
    Ok(Json(state.opportunities().pipeline_stats().await?))
}

/// GET /api/v1/opportunities/:id
pub async fn get_opportunity(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Opportunity>, AppError> {
    tracing::info!("GET /opportunities/{}", id);
    Ok(Json(state.opportunities().get(id).await?))
}

/// POST /api/v1/opportunities
pub async fn create_opportunity(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Json(input): Json<CreateOpportunity>,
) -> Result<(StatusCode, Json<Opportunity>), AppError> {
    tracing::info!("POST /opportunities - name: {}", input.name);
    let opportunity = state.opportunities().create(input, &actor).await?;
    Ok((StatusCode::CREATED, Json(opportunity)))
}

/// PUT /api/v1/opportunities/:id
pub async fn update_opportunity(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateOpportunity>,
) -> Result<Json<Opportunity>, AppError> {
    tracing::info!("PUT /opportunities/{}", id);
    Ok(Json(state.opportunities().update(id, input, &actor).await?))
}

/// POST /api/v1/opportunities/:id/close
///
/// Closes the deal as won or lost.
///
/// # Returns
///
/// * `Result<Json<Opportunity>, AppError>` - The closed opportunity; 409 when it
///   was closed already.
pub async fn close_opportunity(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
    Json(input): Json<CloseOpportunity>,
) -> Result<Json<Opportunity>, AppError> {
    tracing::info!("POST /opportunities/{}/close - won: {}", id, input.won);
    let opportunity = state
        .opportunities()
        .close(id, input, &actor)
        .await
        .with_context(|| format!("Closing opportunity {}", id))?;
    Ok(Json(opportunity))
}

/// DELETE /api/v1/opportunities/:id
pub async fn delete_opportunity(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    tracing::info!("DELETE /opportunities/{}", id);
    state.opportunities().delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============ Contacts & History ============

/// GET /api/v1/contacts
pub async fn list_contacts(
    State(state): State<Arc<AppState>>,
    Query(page): Query<PageParams>,
    Query(filter): Query<ContactFilter>,
) -> Result<Json<Page<Contact>>, AppError> {
    tracing::info!("GET /contacts - filter: {:?}", filter);
    let contacts = state
        .directory()
        .contacts(&filter, page.to_request(PAGE_SIZE))
        .await?;
    Ok(Json(contacts))
}

/// GET /api/v1/contacts/search?q=
///
/// Autocomplete over active contacts. Queries shorter than two characters
/// return an empty list.
pub async fn search_contacts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<ContactSearchResult>>, AppError> {
    tracing::debug!("GET /contacts/search - q: {}", query.q);
    Ok(Json(state.directory().search_contacts(&query.q).await?))
}

/// GET /api/v1/contacts/:id
pub async fn get_contact(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Contact>, AppError> {
    tracing::info!("GET /contacts/{}", id);
    Ok(Json(state.directory().contact(id).await?))
}

/// POST /api/v1/contacts
pub async fn create_contact(
    State(state): State<Arc<AppState>>,
    Json(input): Json<CreateContact>,
) -> Result<(StatusCode, Json<Contact>), AppError> {
    tracing::info!("POST /contacts");
    let contact = state.directory().create_contact(input).await?;
    Ok((StatusCode::CREATED, Json(contact)))
}

/// PUT /api/v1/contacts/:id
pub async fn update_contact(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateContact>,
) -> Result<Json<Contact>, AppError> {
    tracing::info!("PUT /contacts/{}", id);
    Ok(Json(state.directory().update_contact(id, input, &actor).await?))
}

/// DELETE /api/v1/contacts/:id
///
/// Soft delete: the contact is deactivated, never removed.
pub async fn delete_contact(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    tracing::info!("DELETE /contacts/{}", id);
    state.directory().deactivate_contact(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/contacts/:id/history
pub async fn contact_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(page): Query<PageParams>,
) -> Result<Json<Page<HistoryEntry>>, AppError> {
    tracing::info!("GET /contacts/{}/history", id);
    state.directory().contact(id).await?;
    let timeline = state
        .audit()
        .timeline(id, page.to_request(HISTORY_PAGE_SIZE))
        .await?;
    Ok(Json(timeline))
}

/// POST /api/v1/contacts/:id/notes
pub async fn add_note(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
    Json(note): Json<NewNote>,
) -> Result<(StatusCode, Json<HistoryEntry>), AppError> {
    tracing::info!("POST /contacts/{}/notes", id);
    state.directory().contact(id).await?;
    let entry = state.audit().add_note(id, note, &actor).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// POST /api/v1/contacts/:id/calls
pub async fn add_call(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
    Json(call): Json<NewCall>,
) -> Result<(StatusCode, Json<HistoryEntry>), AppError> {
    tracing::info!("POST /contacts/{}/calls", id);
    state.directory().contact(id).await?;
    let entry = state.audit().add_call(id, call, &actor).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// PUT /api/v1/contacts/history/:id
pub async fn update_history_entry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(update): Json<UpdateHistoryEntry>,
) -> Result<Json<HistoryEntry>, AppError> {
    tracing::info!("PUT /contacts/history/{}", id);
    Ok(Json(state.audit().edit_entry(id, update).await?))
}

/// DELETE /api/v1/contacts/history/:id
pub async fn delete_history_entry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    tracing::info!("DELETE /contacts/history/{}", id);
    state.audit().delete_entry(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============ Companies ============

/// GET /api/v1/companies
pub async fn list_companies(
    State(state): State<Arc<AppState>>,
    Query(page): Query<PageParams>,
    Query(query): Query<CompanyQuery>,
) -> Result<Json<Page<Company>>, AppError> {
    tracing::info!("GET /companies - search: {:?}", query.search);
    let search = query.search.as_deref().filter(|s| !s.trim().is_empty());
    let companies = state
        .directory()
        .companies(search, page.to_request(PAGE_SIZE))
        .await?;
    Ok(Json(companies))
}

/// GET /api/v1/companies/:id
pub async fn get_company(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Company>, AppError> {
    tracing::info!("GET /companies/{}", id);
    Ok(Json(state.directory().company(id).await?))
}

/// POST /api/v1/companies
pub async fn create_company(
    State(state): State<Arc<AppState>>,
    Json(input): Json<CreateCompany>,
) -> Result<(StatusCode, Json<Company>), AppError> {
    tracing::info!("POST /companies - name: {}", input.name);
    let company = state.directory().create_company(input).await?;
    Ok((StatusCode::CREATED, Json(company)))
}

/// PUT /api/v1/companies/:id
pub async fn update_company(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateCompany>,
) -> Result<Json<Company>, AppError> {
    tracing::info!("PUT /companies/{}", id);
    Ok(Json(state.directory().update_company(id, input).await?))
}

/// DELETE /api/v1/companies/:id
pub async fn delete_company(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    tracing::info!("DELETE /companies/{}", id);
    state.directory().delete_company(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============ Campaigns ============

/// GET /api/v1/campaigns
pub async fn list_campaigns(
    State(state): State<Arc<AppState>>,
    Query(page): Query<PageParams>,
    Query(query): Query<CampaignQuery>,
) -> Result<Json<Page<Campaign>>, AppError> {
    tracing::info!("GET /campaigns - active: {:?}", query.is_active);
    let campaigns = state
        .directory()
        .campaigns(query.is_active, page.to_request(PAGE_SIZE))
        .await?;
    Ok(Json(campaigns))
}

/// GET /api/v1/campaigns/:id
pub async fn get_campaign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>, AppError> {
    tracing::info!("GET /campaigns/{}", id);
    Ok(Json(state.directory().campaign(id).await?))
}

/// POST /api/v1/campaigns
pub async fn create_campaign(
    State(state): State<Arc<AppState>>,
    Json(input): Json<CreateCampaign>,
) -> Result<(StatusCode, Json<Campaign>), AppError> {
    tracing::info!("POST /campaigns - name: {}", input.name);
    let campaign = state.directory().create_campaign(input).await?;
    Ok((StatusCode::CREATED, Json(campaign)))
}

/// PUT /api/v1/campaigns/:id
pub async fn update_campaign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateCampaign>,
) -> Result<Json<Campaign>, AppError> {
    tracing::info!("PUT /campaigns/{}", id);
    Ok(Json(state.directory().update_campaign(id, input).await?))
}

// ============ Email Templates ============

/// GET /api/v1/email-templates
pub async fn list_templates(
    State(state): State<Arc<AppState>>,
    Query(page): Query<PageParams>,
    Query(filter): Query<TemplateFilter>,
) -> Result<Json<Page<EmailTemplate>>, AppError> {
    tracing::info!("GET /email-templates - filter: {:?}", filter);
    let templates = state
        .email()
        .templates(&filter, page.to_request(PAGE_SIZE))
        .await?;
    Ok(Json(templates))
}

/// GET /api/v1/email-templates/:id
pub async fn get_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<EmailTemplate>, AppError> {
    tracing::info!("GET /email-templates/{}", id);
    Ok(Json(state.email().template(id).await?))
}

/// POST /api/v1/email-templates
pub async fn create_template(
    State(state): State<Arc<AppState>>,
    Json(input): Json<CreateEmailTemplate>,
) -> Result<(StatusCode, Json<EmailTemplate>), AppError> {
    tracing::info!("POST /email-templates - name: {}", input.name);
    let template = state.email().create_template(input).await?;
    Ok((StatusCode::CREATED, Json(template)))
}

/// PUT /api/v1/email-templates/:id
pub async fn update_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateEmailTemplate>,
) -> Result<Json<EmailTemplate>, AppError> {
    tracing::info!("PUT /email-templates/{}", id);
    Ok(Json(state.email().update_template(id, input).await?))
}

/// POST /api/v1/email-templates/preview
pub async fn preview_email(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EmailPreviewRequest>,
) -> Result<Json<EmailPreview>, AppError> {
    tracing::info!(
        "POST /email-templates/preview - template: {}, contact: {}",
        request.template_id,
        request.contact_id
    );
    let preview = state
        .email()
        .preview(request.template_id, request.contact_id)
        .await?;
    Ok(Json(preview))
}

/// POST /api/v1/email-templates/send
///
/// Renders the template for the contact, hands it to the mail transport and
/// records the email on the contact's timeline.
pub async fn send_email(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Json(request): Json<SendEmailRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    tracing::info!(
        "POST /email-templates/send - template: {}, contact: {}",
        request.template_id,
        request.contact_id
    );
    let sent = state.email().send(request, &actor).await?;
    Ok(Json(json!({
        "status": "sent",
        "to_email": sent.to_email,
        "subject": sent.subject
    })))
}

// ============ Settings & Lookups ============

/// GET /api/v1/settings
pub async fn list_settings(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SettingsQuery>,
) -> Result<Json<Vec<Setting>>, AppError> {
    tracing::info!("GET /settings - category: {:?}", query.category);
    Ok(Json(state.settings().settings(query.category.as_deref()).await?))
}

/// GET /api/v1/settings/:key
pub async fn get_setting(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<Setting>, AppError> {
    tracing::info!("GET /settings/{}", key);
    Ok(Json(state.settings().setting(&key).await?))
}

/// POST /api/v1/settings
pub async fn create_setting(
    State(state): State<Arc<AppState>>,
    Json(input): Json<CreateSetting>,
) -> Result<(StatusCode, Json<Setting>), AppError> {
    tracing::info!("POST /settings - key: {}", input.key);
    let setting = state.settings().create_setting(input).await?;
    Ok((StatusCode::CREATED, Json(setting)))
}

/// PUT /api/v1/settings/:key
pub async fn update_setting(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(input): Json<UpdateSetting>,
) -> Result<Json<Setting>, AppError> {
    tracing::info!("PUT /settings/{}", key);
    Ok(Json(state.settings().update_setting(&key, input).await?))
}

/// DELETE /api/v1/settings/:key
pub async fn delete_setting(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<StatusCode, AppError> {
    tracing::info!("DELETE /settings/{}", key);
    state.settings().delete_setting(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/settings/lookups/categories
pub async fn lookup_categories(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<String>>, AppError> {
    tracing::info!("GET /settings/lookups/categories");
    Ok(Json(state.settings().lookup_categories().await?))
}

/// GET /api/v1/settings/lookups/:category
pub async fn list_lookups(
    State(state): State<Arc<AppState>>,
    Path(category): Path<String>,
    Query(query): Query<LookupQuery>,
) -> Result<Json<Vec<LookupValue>>, AppError> {
    tracing::info!("GET /settings/lookups/{}", category);
    let lookups = state
        .settings()
        .lookups(&category, query.include_inactive)
        .await?;
    Ok(Json(lookups))
}

/// POST /api/v1/settings/lookups
pub async fn create_lookup(
    State(state): State<Arc<AppState>>,
    Json(input): Json<CreateLookupValue>,
) -> Result<(StatusCode, Json<LookupValue>), AppError> {
    tracing::info!("POST /settings/lookups - {}/{}", input.category, input.value);
    let lookup = state.settings().create_lookup(input).await?;
    Ok((StatusCode::CREATED, Json(lookup)))
}

/// PUT /api/v1/settings/lookups/id/:id
pub async fn update_lookup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateLookupValue>,
) -> Result<Json<LookupValue>, AppError> {
    tracing::info!("PUT /settings/lookups/id/{}", id);
    Ok(Json(state.settings().update_lookup(id, input).await?))
}

/// DELETE /api/v1/settings/lookups/id/:id?hard_delete=
pub async fn delete_lookup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<DeleteLookupQuery>,
) -> Result<StatusCode, AppError> {
    tracing::info!("DELETE /settings/lookups/id/{} - hard: {}", id, query.hard_delete);
    state.settings().delete_lookup(id, query.hard_delete).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/settings/lookups/:category/reorder
pub async fn reorder_lookups(
    State(state): State<Arc<AppState>>,
    Path(category): Path<String>,
    Json(input): Json<ReorderLookups>,
) -> Result<Json<Vec<LookupValue>>, AppError> {
    tracing::info!(
        "POST /settings/lookups/{}/reorder - {} ids",
        category,
        input.ordered_ids.len()
    );
    let lookups = state
        .settings()
        .reorder_lookups(&category, &input.ordered_ids)
        .await?;
    Ok(Json(lookups))
}

// ============ Public (landing pages) ============

/// POST /api/v1/public/leads
///
/// Landing-page form submission. Creates or reuses company and contact and
/// records a cold lead. Failures answer a generic message; only input
/// validation is reported back.
pub async fn submit_lead_form(
    State(state): State<Arc<AppState>>,
    Json(form): Json<LeadForm>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    tracing::info!("POST /public/leads - campaign: {:?}", form.campaign_id);
    match state.leads().create_from_form(form).await {
        Ok(lead) => {
            tracing::info!("Landing page lead {} recorded", lead.id);
            Ok((
                StatusCode::CREATED,
                Json(json!({ "status": "success", "message": PUBLIC_LEAD_THANKS })),
            ))
        }
        Err(CrmError::Validation(msg)) => Err(AppError::BadRequest(msg)),
        Err(e) => {
            tracing::error!("❌ Landing page submission failed: {}", e);
            Err(AppError::BadRequest(PUBLIC_LEAD_FAILED.to_string()))
        }
    }
}

/// GET /api/v1/public/campaigns/:id
pub async fn public_campaign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<PublicCampaign>, AppError> {
    tracing::info!("GET /public/campaigns/{}", id);
    Ok(Json(state.directory().public_campaign(id).await?))
}
