//! Lifecycle behaviour of leads, tasks and opportunities against the
//! in-memory store, including the audit entries each operation leaves behind.

use bigdecimal::BigDecimal;
use chrono::{Duration, Utc};
use rstest::{fixture, rstest};
use std::sync::Arc;
use uuid::Uuid;

use rust_crm_api::audit::AuditTrail;
use rust_crm_api::directory::Directory;
use rust_crm_api::leads::LeadManager;
use rust_crm_api::lifecycle::CrmError;
use rust_crm_api::memory_store::MemoryStore;
use rust_crm_api::models::*;
use rust_crm_api::opportunities::OpportunityManager;
use rust_crm_api::store::CrmStore;
use rust_crm_api::tasks::TaskManager;

const ACTOR: &str = "anna.huber";

/// Store seeded with one contact working at a company.
struct Crm {
    store: Arc<MemoryStore>,
    contact: Contact,
}

impl Crm {
    fn leads(&self) -> LeadManager<MemoryStore> {
        LeadManager::new(self.store.clone())
    }

    fn tasks(&self) -> TaskManager<MemoryStore> {
        TaskManager::new(self.store.clone())
    }

    fn opportunities(&self) -> OpportunityManager<MemoryStore> {
        OpportunityManager::new(self.store.clone())
    }

    fn directory(&self) -> Directory<MemoryStore> {
        Directory::new(self.store.clone())
    }

    fn audit(&self) -> AuditTrail<MemoryStore> {
        AuditTrail::new(self.store.clone())
    }

    async fn timeline(&self) -> Vec<HistoryEntry> {
        self.audit()
            .timeline(self.contact.id, PageRequest::new(None, Some(100), 50))
            .await
            .expect("timeline")
            .items
    }

    async fn lead(&self, status: LeadStatus) -> Lead {
        self.leads()
            .create(
                CreateLead {
                    contact_id: self.contact.id,
                    campaign_id: None,
                    status,
                    source: Some("messe".to_string()),
                    utm_source: None,
                    utm_medium: None,
                    utm_campaign: None,
                    notes: None,
                },
                ACTOR,
            )
            .await
            .expect("lead creation should succeed")
    }

    async fn opportunity(&self, stage: OpportunityStage, value: i64) -> Opportunity {
        self.opportunities()
            .create(
                CreateOpportunity {
                    name: format!("Deal {}", value),
                    stage,
                    expected_value: Some(BigDecimal::from(value)),
                    probability: None,
                    expected_close_date: None,
                    notes: None,
                    company_id: self.contact.company_id,
                    contact_id: Some(self.contact.id),
                },
                ACTOR,
            )
            .await
            .expect("opportunity creation should succeed")
    }
}

#[fixture]
async fn crm() -> Crm {
    let store = Arc::new(MemoryStore::new());
    let directory = Directory::new(store.clone());
    let company = directory
        .create_company(CreateCompany {
            name: "Huber Bau GmbH".to_string(),
            street: None,
            zip_code: None,
            city: Some("Graz".to_string()),
            country: None,
            website: None,
            phone: None,
            email: None,
            employee_count: Some(12),
            potential_category: Some("B".to_string()),
            industry: None,
            notes: None,
        })
        .await
        .expect("company");
    let contact = directory
        .create_contact(CreateContact {
            first_name: "Anna".to_string(),
            last_name: "Huber".to_string(),
            email: Some("anna@huber-bau.at".to_string()),
            phone: None,
            mobile: None,
            position: Some("Geschäftsführerin".to_string()),
            department: None,
            salutation: Some("Frau".to_string()),
            title: None,
            notes: None,
            is_primary: true,
            company_id: Some(company.id),
        })
        .await
        .expect("contact");
    Crm { store, contact }
}

fn convert_input() -> ConvertLead {
    ConvertLead {
        name: "Dachsanierung".to_string(),
        expected_value: Some(BigDecimal::from(12_000)),
        expected_close_date: None,
        notes: None,
    }
}

// ============ Leads ============

#[rstest]
#[tokio::test]
async fn new_leads_start_cold_and_are_logged(#[future] crm: Crm) {
    let crm = crm.await;
    let lead = crm.lead(LeadStatus::default()).await;

    assert_eq!(lead.status, LeadStatus::Cold);
    let timeline = crm.timeline().await;
    assert_eq!(timeline.len(), 1);
    assert_eq!(timeline[0].entry_type, HistoryType::LeadCreated);
    assert_eq!(timeline[0].title, "Lead erstellt");
    assert_eq!(
        timeline[0].content.as_deref(),
        Some("Neuer Lead aus Quelle: messe")
    );
    assert_eq!(timeline[0].created_by.as_deref(), Some(ACTOR));
}

#[rstest]
#[tokio::test]
async fn creating_a_lead_for_an_unknown_contact_fails(#[future] crm: Crm) {
    let crm = crm.await;
    let result = crm
        .leads()
        .create(
            CreateLead {
                contact_id: Uuid::new_v4(),
                campaign_id: None,
                status: LeadStatus::Cold,
                source: None,
                utm_source: None,
                utm_medium: None,
                utm_campaign: None,
                notes: None,
            },
            ACTOR,
        )
        .await;
    assert!(matches!(result, Err(CrmError::NotFound { entity: "contact", .. })));
}

#[rstest]
#[tokio::test]
async fn status_change_is_audited_once(#[future] crm: Crm) {
    let crm = crm.await;
    let lead = crm.lead(LeadStatus::Cold).await;
    let to_warm = || UpdateLead {
        status: Some(LeadStatus::Warm),
        ..UpdateLead::default()
    };

    let updated = crm.leads().update(lead.id, to_warm(), ACTOR).await.unwrap();
    assert_eq!(updated.status, LeadStatus::Warm);
    // Same status again is a no-op for the audit trail.
    crm.leads().update(lead.id, to_warm(), ACTOR).await.unwrap();

    let changes: Vec<_> = crm
        .timeline()
        .await
        .into_iter()
        .filter(|h| h.entry_type == HistoryType::StatusChange)
        .collect();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].title, "Lead-Status geändert");
    assert_eq!(
        changes[0].content.as_deref(),
        Some("Status von 'cold' zu 'warm' geändert")
    );
}

#[rstest]
#[tokio::test]
async fn lead_funnel_allows_moving_back(#[future] crm: Crm) {
    let crm = crm.await;
    let lead = crm.lead(LeadStatus::Hot).await;
    for status in [LeadStatus::Disqualified, LeadStatus::Cold, LeadStatus::Hot] {
        let lead = crm
            .leads()
            .update(
                lead.id,
                UpdateLead {
                    status: Some(status),
                    ..UpdateLead::default()
                },
                ACTOR,
            )
            .await
            .unwrap();
        assert_eq!(lead.status, status);
    }
}

#[rstest]
#[tokio::test]
async fn converted_cannot_be_set_by_update(#[future] crm: Crm) {
    let crm = crm.await;
    let lead = crm.lead(LeadStatus::Hot).await;
    let result = crm
        .leads()
        .update(
            lead.id,
            UpdateLead {
                status: Some(LeadStatus::Converted),
                ..UpdateLead::default()
            },
            ACTOR,
        )
        .await;
    assert!(matches!(result, Err(CrmError::InvalidTransition { .. })));
}

#[rstest]
#[tokio::test]
async fn only_hot_leads_convert(#[future] crm: Crm) {
    let crm = crm.await;
    let lead = crm.lead(LeadStatus::Warm).await;

    let result = crm
        .leads()
        .convert_to_opportunity(lead.id, convert_input(), ACTOR)
        .await;
    assert!(matches!(
        result,
        Err(CrmError::NotQualified {
            status: LeadStatus::Warm,
            required: LeadStatus::Hot,
            ..
        })
    ));
    assert!(crm.store.opportunity_by_lead(lead.id).await.unwrap().is_none());
}

#[rstest]
#[tokio::test]
async fn conversion_creates_one_opportunity(#[future] crm: Crm) {
    let crm = crm.await;
    let lead = crm.lead(LeadStatus::Hot).await;

    let opportunity = crm
        .leads()
        .convert_to_opportunity(lead.id, convert_input(), ACTOR)
        .await
        .expect("hot lead should convert");
    assert_eq!(opportunity.stage, OpportunityStage::Qualification);
    assert_eq!(opportunity.probability, 10);
    assert_eq!(opportunity.lead_id, Some(lead.id));
    assert_eq!(opportunity.contact_id, Some(crm.contact.id));
    assert_eq!(opportunity.company_id, crm.contact.company_id);

    let lead = crm.leads().get(lead.id).await.unwrap();
    assert_eq!(lead.status, LeadStatus::Converted);

    let second = crm
        .leads()
        .convert_to_opportunity(lead.id, convert_input(), ACTOR)
        .await;
    assert!(matches!(second, Err(CrmError::AlreadyConverted(id)) if id == lead.id));

    let timeline = crm.timeline().await;
    assert_eq!(timeline[0].title, "Lead zu Opportunity konvertiert");
    assert_eq!(
        timeline[0].content.as_deref(),
        Some("Lead wurde zu Opportunity 'Dachsanierung' konvertiert")
    );
}

#[rstest]
#[tokio::test]
async fn converting_a_missing_lead_is_not_found(#[future] crm: Crm) {
    let crm = crm.await;
    let result = crm
        .leads()
        .convert_to_opportunity(Uuid::new_v4(), convert_input(), ACTOR)
        .await;
    assert!(matches!(result, Err(CrmError::NotFound { entity: "lead", .. })));
}

#[rstest]
#[tokio::test]
async fn concurrent_conversions_yield_one_opportunity(#[future] crm: Crm) {
    let crm = crm.await;
    let lead = crm.lead(LeadStatus::Hot).await;

    let (leads_a, leads_b) = (crm.leads(), crm.leads());
    let (a, b) = tokio::join!(
        leads_a.convert_to_opportunity(lead.id, convert_input(), ACTOR),
        leads_b.convert_to_opportunity(lead.id, convert_input(), ACTOR),
    );
    assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
    let (all, total) = crm
        .store
        .opportunities(&OpportunityFilter::default(), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(all[0].lead_id, Some(lead.id));
}

#[rstest]
#[tokio::test]
async fn landing_page_form_reuses_contact_and_company(#[future] crm: Crm) {
    let crm = crm.await;
    let form = |email: &str| LeadForm {
        first_name: "Anna".to_string(),
        last_name: "Huber".to_string(),
        email: email.to_string(),
        phone: Some("+43 316 123".to_string()),
        company_name: Some("Huber Bau GmbH".to_string()),
        campaign_id: None,
        utm_source: Some("google".to_string()),
        utm_medium: None,
        utm_campaign: None,
    };

    let lead = crm.leads().create_from_form(form("anna@huber-bau.at")).await.unwrap();
    assert_eq!(lead.contact_id, crm.contact.id);
    assert_eq!(lead.source.as_deref(), Some("landing_page"));
    assert_eq!(lead.status, LeadStatus::Cold);

    let other = crm.leads().create_from_form(form("office@huber-bau.at")).await.unwrap();
    let contact = crm.directory().contact(other.contact_id).await.unwrap();
    assert_ne!(contact.id, crm.contact.id);
    assert_eq!(contact.company_id, crm.contact.company_id);

    let invalid = crm.leads().create_from_form(form("not-an-email")).await;
    assert!(matches!(invalid, Err(CrmError::Validation(_))));
}

#[rstest]
#[tokio::test]
async fn landing_page_form_creates_new_company_for_known_contact(#[future] crm: Crm) {
    let crm = crm.await;
    let lead = crm
        .leads()
        .create_from_form(LeadForm {
            first_name: "Anna".to_string(),
            last_name: "Huber".to_string(),
            email: "anna@huber-bau.at".to_string(),
            phone: None,
            company_name: Some("Huber Holz KG".to_string()),
            campaign_id: None,
            utm_source: None,
            utm_medium: None,
            utm_campaign: None,
        })
        .await
        .unwrap();
    assert_eq!(lead.contact_id, crm.contact.id);

    let company = crm.store.company_by_name("Huber Holz KG").await.unwrap();
    assert!(company.is_some());
    // The known contact keeps its original company link.
    let contact = crm.directory().contact(crm.contact.id).await.unwrap();
    assert_eq!(contact.company_id, crm.contact.company_id);
}

// ============ Tasks ============

fn follow_up(title: &str) -> CompleteTask {
    CompleteTask {
        notes: Some("Angebot besprochen".to_string()),
        create_follow_up: true,
        follow_up_title: Some(title.to_string()),
        follow_up_due_date: Some(Utc::now() + Duration::days(7)),
        follow_up_priority: TaskPriority::High,
    }
}

#[rstest]
#[tokio::test]
async fn completing_with_follow_up_chains_a_new_task(#[future] crm: Crm) {
    let crm = crm.await;
    let task = crm
        .tasks()
        .create(
            CreateTask {
                contact_id: Some(crm.contact.id),
                assigned_to: Some("markus".to_string()),
                ..CreateTask::titled("Rückruf")
            },
            ACTOR,
        )
        .await
        .unwrap();

    let completion = crm
        .tasks()
        .complete(task.id, follow_up("Angebot nachfassen"), ACTOR)
        .await
        .unwrap();
    assert_eq!(completion.task.status, TaskStatus::Completed);
    assert!(completion.task.completed_at.is_some());
    assert_eq!(
        completion.task.description.as_deref(),
        Some("Abschlussnotiz: Angebot besprochen")
    );

    let next = completion.follow_up_task.expect("follow-up task");
    assert_eq!(next.parent_task_id, Some(task.id));
    assert_eq!(next.status, TaskStatus::Open);
    assert_eq!(next.contact_id, Some(crm.contact.id));
    assert_eq!(next.assigned_to.as_deref(), Some("markus"));
    assert_eq!(next.priority, TaskPriority::High);

    let chained = crm.tasks().follow_ups(task.id).await.unwrap();
    assert_eq!(chained.len(), 1);
    assert_eq!(chained[0].id, next.id);

    let titles: Vec<String> = crm.timeline().await.into_iter().map(|h| h.title).collect();
    assert_eq!(titles, ["Aufgabe erledigt", "Aufgabe erstellt"]);
}

#[rstest]
#[tokio::test]
async fn follow_up_needs_a_title(#[future] crm: Crm) {
    let crm = crm.await;
    let task = crm.tasks().create(CreateTask::titled("Mail"), ACTOR).await.unwrap();
    let completion = crm
        .tasks()
        .complete(task.id, follow_up("   "), ACTOR)
        .await
        .unwrap();
    assert!(completion.follow_up_task.is_none());
}

#[rstest]
#[tokio::test]
async fn completing_twice_fails(#[future] crm: Crm) {
    let crm = crm.await;
    let task = crm.tasks().create(CreateTask::titled("Mail"), ACTOR).await.unwrap();
    crm.tasks()
        .complete(task.id, CompleteTask::default(), ACTOR)
        .await
        .unwrap();

    let again = crm
        .tasks()
        .complete(task.id, CompleteTask::default(), ACTOR)
        .await;
    assert!(matches!(again, Err(CrmError::AlreadyCompleted(_))));
}

#[rstest]
#[tokio::test]
async fn update_cannot_complete_a_task(#[future] crm: Crm) {
    let crm = crm.await;
    let task = crm.tasks().create(CreateTask::titled("Mail"), ACTOR).await.unwrap();
    let result = crm
        .tasks()
        .update(
            task.id,
            UpdateTask {
                status: Some(TaskStatus::Completed),
                ..UpdateTask::default()
            },
        )
        .await;
    assert!(matches!(result, Err(CrmError::InvalidTransition { .. })));

    let moved = crm
        .tasks()
        .update(
            task.id,
            UpdateTask {
                status: Some(TaskStatus::InProgress),
                ..UpdateTask::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(moved.status, TaskStatus::InProgress);
}

#[rstest]
#[tokio::test]
async fn past_due_dates_are_rejected_on_create(#[future] crm: Crm) {
    let crm = crm.await;
    let result = crm
        .tasks()
        .create(
            CreateTask {
                due_date: Some(Utc::now() - Duration::days(1)),
                ..CreateTask::titled("zu spät")
            },
            ACTOR,
        )
        .await;
    assert!(matches!(result, Err(CrmError::Validation(_))));
}

#[rstest]
#[tokio::test]
async fn overdue_listing_uses_the_overdue_predicate(#[future] crm: Crm) {
    let crm = crm.await;
    let tasks = crm.tasks();
    let due_soon = tasks
        .create(
            CreateTask {
                due_date: Some(Utc::now() + Duration::hours(1)),
                ..CreateTask::titled("bald")
            },
            ACTOR,
        )
        .await
        .unwrap();
    let done = tasks
        .create(
            CreateTask {
                due_date: Some(Utc::now() + Duration::hours(1)),
                ..CreateTask::titled("erledigt")
            },
            ACTOR,
        )
        .await
        .unwrap();
    tasks
        .complete(done.id, CompleteTask::default(), ACTOR)
        .await
        .unwrap();
    tasks.create(CreateTask::titled("ohne Termin"), ACTOR).await.unwrap();

    // Three days later only the open dated task is overdue.
    let later = Utc::now() + Duration::days(3);
    let overdue = tasks.list_overdue(later, PageRequest::default()).await.unwrap();
    assert_eq!(overdue.total, 1);
    assert_eq!(overdue.items[0].task.id, due_soon.id);
    assert!(overdue.items[0].is_overdue);

    let all = tasks
        .list(&TaskFilter::default(), PageRequest::default(), later)
        .await
        .unwrap();
    assert_eq!(all.total, 3);
    // Dated tasks first, undated last.
    assert_eq!(all.items[2].task.title, "ohne Termin");
    assert!(!all.items[2].is_overdue);
}

// ============ Opportunities ============

#[rstest]
#[tokio::test]
async fn stage_change_resets_probability(#[future] crm: Crm) {
    let crm = crm.await;
    let opportunity = crm.opportunity(OpportunityStage::Qualification, 1000).await;

    let moved = crm
        .opportunities()
        .update(
            opportunity.id,
            UpdateOpportunity {
                stage: Some(OpportunityStage::Negotiation),
                ..UpdateOpportunity::default()
            },
            ACTOR,
        )
        .await
        .unwrap();
    assert_eq!(moved.probability, 75);

    let explicit = crm
        .opportunities()
        .update(
            opportunity.id,
            UpdateOpportunity {
                stage: Some(OpportunityStage::Proposal),
                probability: Some(40),
                ..UpdateOpportunity::default()
            },
            ACTOR,
        )
        .await
        .unwrap();
    assert_eq!(explicit.probability, 40);

    let timeline = crm.timeline().await;
    assert_eq!(timeline[0].title, "Opportunity-Stage geändert");
    assert_eq!(
        timeline[0].content.as_deref(),
        Some("Stage von 'negotiation' zu 'proposal' geändert")
    );
}

#[rstest]
#[tokio::test]
async fn close_sets_outcome_and_is_final(#[future] crm: Crm) {
    let crm = crm.await;
    let opportunity = crm.opportunity(OpportunityStage::Qualification, 1000).await;

    let closed = crm
        .opportunities()
        .close(
            opportunity.id,
            CloseOpportunity {
                won: true,
                close_reason: Some("Bester Preis".to_string()),
                actual_value: None,
            },
            ACTOR,
        )
        .await
        .unwrap();
    assert_eq!(closed.stage, OpportunityStage::ClosedWon);
    assert_eq!(closed.probability, 100);
    assert_eq!(closed.actual_close_date, Some(Utc::now().date_naive()));

    let again = crm
        .opportunities()
        .close(opportunity.id, CloseOpportunity::default(), ACTOR)
        .await;
    assert!(matches!(again, Err(CrmError::AlreadyClosed(_))));

    let reopen = crm
        .opportunities()
        .update(
            opportunity.id,
            UpdateOpportunity {
                stage: Some(OpportunityStage::Proposal),
                ..UpdateOpportunity::default()
            },
            ACTOR,
        )
        .await;
    assert!(matches!(reopen, Err(CrmError::AlreadyClosed(_))));

    let timeline = crm.timeline().await;
    assert_eq!(timeline[0].title, "Opportunity gewonnen");
    assert_eq!(
        timeline[0].content.as_deref(),
        Some("Opportunity 'Deal 1000' wurde gewonnen. Grund: Bester Preis")
    );
}

#[rstest]
#[tokio::test]
async fn update_cannot_close(#[future] crm: Crm) {
    let crm = crm.await;
    let opportunity = crm.opportunity(OpportunityStage::Proposal, 1000).await;
    let result = crm
        .opportunities()
        .update(
            opportunity.id,
            UpdateOpportunity {
                stage: Some(OpportunityStage::ClosedLost),
                ..UpdateOpportunity::default()
            },
            ACTOR,
        )
        .await;
    assert!(matches!(result, Err(CrmError::InvalidTransition { .. })));
}

#[rstest]
#[tokio::test]
async fn concurrent_closes_let_one_win(#[future] crm: Crm) {
    let crm = crm.await;
    let opportunity = crm.opportunity(OpportunityStage::Proposal, 1000).await;
    let won = CloseOpportunity {
        won: true,
        ..CloseOpportunity::default()
    };

    let (opps_a, opps_b) = (crm.opportunities(), crm.opportunities());
    let (a, b) = tokio::join!(
        opps_a.close(opportunity.id, won.clone(), ACTOR),
        opps_b.close(opportunity.id, CloseOpportunity::default(), ACTOR),
    );
    assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
    let loser = if a.is_err() { a } else { b };
    assert!(matches!(loser, Err(CrmError::AlreadyClosed(_))));
}

#[rstest]
#[tokio::test]
async fn pipeline_stats_weight_by_stage(#[future] crm: Crm) {
    let crm = crm.await;
    crm.opportunity(OpportunityStage::Qualification, 1000).await;
    crm.opportunity(OpportunityStage::Proposal, 2000).await;
    let won = crm.opportunity(OpportunityStage::Discovery, 500).await;
    crm.opportunities()
        .close(
            won.id,
            CloseOpportunity {
                won: true,
                ..CloseOpportunity::default()
            },
            ACTOR,
        )
        .await
        .unwrap();

    let stats = crm.opportunities().pipeline_stats().await.unwrap();
    assert_eq!(stats.total_opportunities, 3);
    assert_eq!(stats.total_value, BigDecimal::from(3500));
    let weighted = |stage| {
        stats
            .stages
            .iter()
            .find(|s| s.stage == stage)
            .map(|s| s.weighted_value.clone())
    };
    assert_eq!(weighted(OpportunityStage::Qualification), Some(BigDecimal::from(100)));
    assert_eq!(weighted(OpportunityStage::Proposal), Some(BigDecimal::from(1000)));
    assert_eq!(weighted(OpportunityStage::ClosedWon), Some(BigDecimal::from(500)));
    assert_eq!(stats.win_rate, 100.0);
    assert_eq!(stats.average_deal_size, BigDecimal::from(1500));
}

// ============ Audit trail ============

#[rstest]
#[tokio::test]
async fn timeline_is_newest_first(#[future] crm: Crm) {
    let crm = crm.await;
    let audit = crm.audit();
    for content in ["erste", "zweite", "dritte"] {
        audit
            .add_note(
                crm.contact.id,
                NewNote {
                    content: content.to_string(),
                },
                ACTOR,
            )
            .await
            .unwrap();
    }

    let contents: Vec<String> = crm
        .timeline()
        .await
        .into_iter()
        .filter_map(|h| h.content)
        .collect();
    assert_eq!(contents, ["dritte", "zweite", "erste"]);
}

#[rstest]
#[tokio::test]
async fn calls_keep_duration_and_outcome(#[future] crm: Crm) {
    let crm = crm.await;
    let entry = crm
        .audit()
        .add_call(
            crm.contact.id,
            NewCall {
                content: "Termin vereinbart".to_string(),
                duration_minutes: Some(12),
                outcome: Some("reached".to_string()),
            },
            ACTOR,
        )
        .await
        .unwrap();
    assert_eq!(entry.entry_type, HistoryType::Call);
    assert_eq!(entry.title, "Anruf dokumentiert");
    let extra = entry.extra_data.expect("call details");
    assert_eq!(extra["duration_minutes"], 12);
    assert_eq!(extra["outcome"], "reached");
}

#[rstest]
#[tokio::test]
async fn entries_can_be_edited_and_deleted(#[future] crm: Crm) {
    let crm = crm.await;
    let audit = crm.audit();
    let entry = audit
        .add_note(
            crm.contact.id,
            NewNote {
                content: "Tippfeler".to_string(),
            },
            ACTOR,
        )
        .await
        .unwrap();

    let edited = audit
        .edit_entry(
            entry.id,
            UpdateHistoryEntry {
                title: None,
                content: Some("Tippfehler".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(edited.content.as_deref(), Some("Tippfehler"));
    assert_eq!(edited.title, "Notiz hinzugefügt");

    audit.delete_entry(entry.id).await.unwrap();
    assert!(crm.timeline().await.is_empty());
    assert!(matches!(
        audit.delete_entry(entry.id).await,
        Err(CrmError::NotFound { .. })
    ));
}

#[rstest]
#[tokio::test]
async fn notes_for_unknown_contacts_are_rejected(#[future] crm: Crm) {
    let crm = crm.await;
    let result = crm
        .audit()
        .add_note(
            Uuid::new_v4(),
            NewNote {
                content: "x".to_string(),
            },
            ACTOR,
        )
        .await;
    assert!(matches!(result, Err(CrmError::NotFound { .. })));
}

// ============ Directory ============

#[rstest]
#[tokio::test]
async fn contact_data_changes_are_audited(#[future] crm: Crm) {
    let crm = crm.await;
    crm.directory()
        .update_contact(
            crm.contact.id,
            UpdateContact {
                position: Some("Prokuristin".to_string()),
                ..UpdateContact::default()
            },
            ACTOR,
        )
        .await
        .unwrap();
    assert!(crm.timeline().await.is_empty());

    crm.directory()
        .update_contact(
            crm.contact.id,
            UpdateContact {
                phone: Some("+43 316 555".to_string()),
                ..UpdateContact::default()
            },
            ACTOR,
        )
        .await
        .unwrap();
    let timeline = crm.timeline().await;
    assert_eq!(timeline.len(), 1);
    assert_eq!(timeline[0].entry_type, HistoryType::DataChange);
    assert_eq!(timeline[0].content.as_deref(), Some("Geänderte Felder: phone"));
}

#[rstest]
#[tokio::test]
async fn deleting_a_contact_only_deactivates_it(#[future] crm: Crm) {
    let crm = crm.await;
    crm.directory().deactivate_contact(crm.contact.id).await.unwrap();

    let contact = crm.directory().contact(crm.contact.id).await.unwrap();
    assert!(!contact.is_active);
    assert!(crm.directory().search_contacts("Huber").await.unwrap().is_empty());
}

#[rstest]
#[tokio::test]
async fn autocomplete_matches_company_names(#[future] crm: Crm) {
    let crm = crm.await;
    let hits = crm.directory().search_contacts("bau").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].full_name, "Anna Huber");
    assert_eq!(hits[0].company_name.as_deref(), Some("Huber Bau GmbH"));

    assert!(crm.directory().search_contacts("h").await.unwrap().is_empty());
}
