//! Lead lifecycle: direct entry, landing-page intake, status updates,
//! conversion into an opportunity and bulk import.

use chrono::Utc;
use regex::Regex;
use std::sync::{Arc, OnceLock};
use uuid::Uuid;

use crate::audit;
use crate::import::{self, field_value, Field, TabularData};
use crate::lifecycle::{check_lead_transition, CrmError, CrmResult};
use crate::models::{
    Company, Contact, ConvertLead, CreateLead, HistoryType, Lead, LeadFilter, LeadForm,
    LeadImportResult, LeadStatus, Opportunity, OpportunityStage, Page, PageRequest, UpdateLead,
};
use crate::store::{Change, ChangeSet, CrmStore, StoreError};

/// Import errors kept in the result; later ones are only counted.
pub const MAX_IMPORT_ERRORS: usize = 10;

pub const SOURCE_LANDING_PAGE: &str = "landing_page";
pub const SOURCE_IMPORT: &str = "import";

/// Simplified RFC 5322 address check: local@domain.tld
pub fn is_valid_email(email: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$",
            )
            .ok()
        })
        .as_ref()
        .map_or(false, |re| re.is_match(email))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Contact details that may resolve to an existing contact.
struct ContactDetails<'a> {
    first_name: &'a str,
    last_name: &'a str,
    email: Option<&'a str>,
    phone: Option<&'a str>,
    company_name: Option<&'a str>,
}

/// Owns lead state changes.
pub struct LeadManager<S: ?Sized> {
    store: Arc<S>,
}

impl<S: CrmStore + ?Sized> LeadManager<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn get(&self, id: Uuid) -> CrmResult<Lead> {
        self.store
            .lead(id)
            .await?
            .ok_or_else(|| CrmError::not_found("lead", id))
    }

    /// Leads, newest first.
    pub async fn list(&self, filter: &LeadFilter, page: PageRequest) -> CrmResult<Page<Lead>> {
        let (items, total) = self.store.leads(filter, page).await?;
        Ok(Page::new(items, total, page))
    }

    /// Creates a lead for an existing contact. Several leads per contact are
    /// allowed.
    pub async fn create(&self, input: CreateLead, actor: &str) -> CrmResult<Lead> {
        check_lead_transition(LeadStatus::default(), input.status)?;
        if self.store.contact(input.contact_id).await?.is_none() {
            return Err(CrmError::not_found("contact", input.contact_id));
        }

        let mut lead = Lead::new(input.contact_id);
        lead.status = input.status;
        lead.campaign_id = input.campaign_id;
        lead.source = input.source;
        lead.utm_source = input.utm_source;
        lead.utm_medium = input.utm_medium;
        lead.utm_campaign = input.utm_campaign;
        lead.notes = input.notes;

        let mut changes = ChangeSet::new();
        changes.push(Change::InsertLead(lead.clone())).push(Change::AppendHistory(
            audit::entry(
                lead.contact_id,
                HistoryType::LeadCreated,
                "Lead erstellt",
                Some(format!(
                    "Neuer Lead aus Quelle: {}",
                    non_empty(lead.source.as_deref()).unwrap_or("Unbekannt")
                )),
                Some(actor),
            ),
        ));
        self.store.apply(changes).await?;

        tracing::debug!("Lead {} created for contact {}", lead.id, lead.contact_id);
        Ok(lead)
    }

    /// Landing-page intake. Company, contact and lead are resolved or created
    /// in one change set, so a failure leaves nothing behind.
    pub async fn create_from_form(&self, form: LeadForm) -> CrmResult<Lead> {
        let first_name = form.first_name.trim();
        let last_name = form.last_name.trim();
        if first_name.is_empty() || last_name.is_empty() {
            return Err(CrmError::validation("Vorname und Nachname sind erforderlich"));
        }
        let email = form.email.trim();
        if !is_valid_email(email) {
            return Err(CrmError::validation("Ungültige E-Mail-Adresse"));
        }

        let mut changes = ChangeSet::new();
        let contact_id = self
            .resolve_contact(
                ContactDetails {
                    first_name,
                    last_name,
                    email: Some(email),
                    phone: non_empty(form.phone.as_deref()),
                    company_name: non_empty(form.company_name.as_deref()),
                },
                &mut changes,
            )
            .await?;

        let mut lead = Lead::new(contact_id);
        lead.campaign_id = form.campaign_id;
        lead.source = Some(SOURCE_LANDING_PAGE.to_string());
        lead.utm_source = form.utm_source;
        lead.utm_medium = form.utm_medium;
        lead.utm_campaign = form.utm_campaign;

        changes
            .push(Change::InsertLead(lead.clone()))
            .push(Change::AppendHistory(audit::entry(
                contact_id,
                HistoryType::LeadCreated,
                "Lead über Landing Page erstellt",
                Some("Neuer Lead über Formular erfasst".to_string()),
                None,
            )));
        self.store.apply(changes).await?;

        tracing::info!("Landing page lead {} captured", lead.id);
        Ok(lead)
    }

    /// Writes the supplied fields. A real status change is checked against
    /// the lead policy and logged; setting the same status again is silent.
    pub async fn update(&self, id: Uuid, input: UpdateLead, actor: &str) -> CrmResult<Lead> {
        let current = self.get(id).await?;
        let mut lead = current.clone();

        if let Some(status) = input.status {
            check_lead_transition(current.status, status)?;
            lead.status = status;
        }
        if let Some(source) = input.source {
            lead.source = Some(source);
        }
        if let Some(notes) = input.notes {
            lead.notes = Some(notes);
        }
        if let Some(campaign_id) = input.campaign_id {
            lead.campaign_id = Some(campaign_id);
        }
        lead.updated_at = Utc::now();

        let mut changes = ChangeSet::new();
        changes.push(Change::UpdateLead {
            lead: lead.clone(),
            expected_status: current.status,
        });
        if lead.status != current.status {
            changes.push(Change::AppendHistory(audit::entry(
                lead.contact_id,
                HistoryType::StatusChange,
                "Lead-Status geändert",
                Some(format!(
                    "Status von '{}' zu '{}' geändert",
                    current.status, lead.status
                )),
                Some(actor),
            )));
        }
        self.store.apply(changes).await?;
        Ok(lead)
    }

    /// Turns a qualified lead into an opportunity at the qualification stage.
    /// The lead becomes `converted`; lead, opportunity and the audit note
    /// commit together.
    pub async fn convert_to_opportunity(
        &self,
        id: Uuid,
        input: ConvertLead,
        actor: &str,
    ) -> CrmResult<Opportunity> {
        let mut lead = self.get(id).await?;
        if lead.status == LeadStatus::Converted
            || self.store.opportunity_by_lead(id).await?.is_some()
        {
            return Err(CrmError::AlreadyConverted(id));
        }
        if lead.status != LeadStatus::QUALIFYING {
            return Err(CrmError::NotQualified {
                id,
                status: lead.status,
                required: LeadStatus::QUALIFYING,
            });
        }
        let name = input.name.trim();
        if name.is_empty() {
            return Err(CrmError::validation("opportunity name must not be empty"));
        }

        let company_id = self
            .store
            .contact(lead.contact_id)
            .await?
            .and_then(|c| c.company_id);

        let stage = OpportunityStage::Qualification;
        let mut opportunity = Opportunity::new(name);
        opportunity.stage = stage;
        opportunity.probability = stage.default_probability();
        opportunity.expected_value = input.expected_value;
        opportunity.expected_close_date = input.expected_close_date;
        opportunity.notes = input.notes;
        opportunity.company_id = company_id;
        opportunity.contact_id = Some(lead.contact_id);
        opportunity.lead_id = Some(lead.id);

        let expected_status = lead.status;
        lead.status = LeadStatus::Converted;
        lead.updated_at = Utc::now();

        let mut changes = ChangeSet::new();
        changes
            .push(Change::InsertOpportunity(opportunity.clone()))
            .push(Change::UpdateLead {
                lead: lead.clone(),
                expected_status,
            })
            .push(Change::AppendHistory(audit::entry(
                lead.contact_id,
                HistoryType::Note,
                "Lead zu Opportunity konvertiert",
                Some(format!(
                    "Lead wurde zu Opportunity '{}' konvertiert",
                    opportunity.name
                )),
                Some(actor),
            )));

        match self.store.apply(changes).await {
            Ok(()) => {}
            // A concurrent conversion won the race.
            Err(StoreError::Conflict { .. }) | Err(StoreError::Duplicate(_)) => {
                return Err(CrmError::AlreadyConverted(id))
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            "Lead {} converted to opportunity {} by {}",
            id,
            opportunity.id,
            actor
        );
        Ok(opportunity)
    }

    /// Reads an uploaded file and imports its rows. Format problems end the
    /// import before any row is touched.
    pub async fn import_file(
        &self,
        filename: &str,
        bytes: &[u8],
        campaign_id: Option<Uuid>,
        actor: &str,
    ) -> CrmResult<LeadImportResult> {
        match import::read_table(filename, bytes) {
            Ok(table) => self.import_rows(&table, campaign_id, actor).await,
            Err(e) => {
                tracing::warn!("Import of '{}' rejected: {}", filename, e);
                Ok(LeadImportResult {
                    total_rows: 0,
                    imported: 0,
                    failed: 0,
                    errors: vec![e.to_string()],
                })
            }
        }
    }

    /// Imports every row as a cold lead with source `import`. Each row
    /// commits on its own, so a failing row never undoes earlier ones.
    pub async fn import_rows(
        &self,
        table: &TabularData,
        campaign_id: Option<Uuid>,
        actor: &str,
    ) -> CrmResult<LeadImportResult> {
        let total_rows = table.total_rows();
        if let Err(e) = table.require(&[Field::FirstName, Field::LastName]) {
            return Ok(LeadImportResult {
                total_rows,
                imported: 0,
                failed: total_rows,
                errors: vec![e.to_string()],
            });
        }

        let mut imported = 0;
        let mut errors = Vec::new();
        for (index, row) in table.rows.iter().enumerate() {
            // Spreadsheet row numbers: 1-based plus the header line.
            let line = index + 2;
            let first_name = field_value(row, Field::FirstName);
            let last_name = field_value(row, Field::LastName);
            let (first_name, last_name) = match (first_name, last_name) {
                (Some(first), Some(last)) => (first, last),
                _ => {
                    errors.push(format!("Zeile {}: Vorname oder Nachname fehlt", line));
                    continue;
                }
            };

            let details = ContactDetails {
                first_name,
                last_name,
                email: field_value(row, Field::Email),
                phone: field_value(row, Field::Phone),
                company_name: field_value(row, Field::Company),
            };
            match self.import_row(details, campaign_id, actor).await {
                Ok(()) => imported += 1,
                Err(e) => errors.push(format!("Zeile {}: {}", line, e)),
            }
        }

        let failed = total_rows - imported;
        if errors.len() > MAX_IMPORT_ERRORS {
            errors.truncate(MAX_IMPORT_ERRORS);
        }
        tracing::info!(
            "Lead import finished: {} rows, {} imported, {} failed",
            total_rows,
            imported,
            failed
        );
        Ok(LeadImportResult {
            total_rows,
            imported,
            failed,
            errors,
        })
    }

    async fn import_row(
        &self,
        details: ContactDetails<'_>,
        campaign_id: Option<Uuid>,
        actor: &str,
    ) -> CrmResult<()> {
        let mut changes = ChangeSet::new();
        let contact_id = self.resolve_contact(details, &mut changes).await?;

        let mut lead = Lead::new(contact_id);
        lead.campaign_id = campaign_id;
        lead.source = Some(SOURCE_IMPORT.to_string());

        changes
            .push(Change::InsertLead(lead))
            .push(Change::AppendHistory(audit::entry(
                contact_id,
                HistoryType::LeadCreated,
                "Lead importiert",
                Some(format!("Neuer Lead aus Quelle: {}", SOURCE_IMPORT)),
                Some(actor),
            )));
        self.store.apply(changes).await?;
        Ok(())
    }

    /// Resolves the company by exact name first, then finds the contact by
    /// exact email or queues its creation into `changes`. A known contact
    /// keeps its company link. Without an email a new contact is always created.
    async fn resolve_contact(
        &self,
        details: ContactDetails<'_>,
        changes: &mut ChangeSet,
    ) -> CrmResult<Uuid> {
        let company_id = match details.company_name {
            Some(name) => Some(self.resolve_company(name, changes).await?),
            None => None,
        };

        if let Some(email) = details.email {
            if let Some(existing) = self.store.contact_by_email(email).await? {
                return Ok(existing.id);
            }
        }

        let mut contact = Contact::new(details.first_name, details.last_name);
        contact.email = details.email.map(str::to_string);
        contact.phone = details.phone.map(str::to_string);
        contact.company_id = company_id;
        let id = contact.id;
        changes.push(Change::InsertContact(contact));
        Ok(id)
    }

    async fn resolve_company(&self, name: &str, changes: &mut ChangeSet) -> CrmResult<Uuid> {
        if let Some(existing) = self.store.company_by_name(name).await? {
            return Ok(existing.id);
        }
        let company = Company::named(name);
        let id = company.id;
        changes.push(Change::InsertCompany(company));
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_check_accepts_plain_addresses() {
        assert!(is_valid_email("anna.huber@example.at"));
        assert!(is_valid_email("a+b@mail.example.com"));
        assert!(!is_valid_email("anna"));
        assert!(!is_valid_email("anna@localhost"));
        assert!(!is_valid_email("anna @example.at"));
    }

    #[test]
    fn blank_values_count_as_missing() {
        assert_eq!(non_empty(Some("  ")), None);
        assert_eq!(non_empty(Some(" ACME ")), Some("ACME"));
        assert_eq!(non_empty(None), None);
    }
}
