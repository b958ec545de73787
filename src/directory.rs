//! Companies, contacts and campaigns: the records leads, tasks and
//! opportunities hang off.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::audit;
use crate::leads::is_valid_email;
use crate::lifecycle::{CrmError, CrmResult};
use crate::models::{
    Campaign, Company, Contact, ContactFilter, ContactSearchResult, CreateCampaign,
    CreateCompany, CreateContact, HistoryType, Page, PageRequest, PublicCampaign, UpdateCampaign,
    UpdateCompany, UpdateContact,
};
use crate::store::{Change, ChangeSet, CrmStore};

/// Autocomplete needs at least this many characters.
pub const MIN_SEARCH_LEN: usize = 2;
/// Autocomplete result cap.
pub const SEARCH_LIMIT: i64 = 10;

const POTENTIAL_CATEGORIES: [&str; 4] = ["A", "B", "C", "D"];

fn require_name(value: &str, what: &str) -> CrmResult<()> {
    if value.trim().is_empty() {
        Err(CrmError::validation(format!("{} must not be empty", what)))
    } else {
        Ok(())
    }
}

fn check_email(email: Option<&str>) -> CrmResult<()> {
    match email {
        Some(e) if !e.is_empty() && !is_valid_email(e) => {
            Err(CrmError::validation(format!("invalid email address: {}", e)))
        }
        _ => Ok(()),
    }
}

fn check_potential(category: Option<&str>) -> CrmResult<()> {
    match category {
        Some(c) if !POTENTIAL_CATEGORIES.contains(&c) => Err(CrmError::validation(format!(
            "potential category must be one of A, B, C, D, got '{}'",
            c
        ))),
        _ => Ok(()),
    }
}

/// Names of the contact fields whose change is logged to the timeline.
pub fn changed_contact_fields(before: &Contact, after: &Contact) -> Vec<&'static str> {
    let mut fields = Vec::new();
    if before.email != after.email {
        fields.push("email");
    }
    if before.phone != after.phone {
        fields.push("phone");
    }
    if before.mobile != after.mobile {
        fields.push("mobile");
    }
    if before.company_id != after.company_id {
        fields.push("company_id");
    }
    fields
}

/// Company, contact and campaign records.
pub struct Directory<S: ?Sized> {
    store: Arc<S>,
}

impl<S: CrmStore + ?Sized> Directory<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    // ---- companies ----

    pub async fn company(&self, id: Uuid) -> CrmResult<Company> {
        self.store
            .company(id)
            .await?
            .ok_or_else(|| CrmError::not_found("company", id))
    }

    pub async fn companies(
        &self,
        search: Option<&str>,
        page: PageRequest,
    ) -> CrmResult<Page<Company>> {
        let search = search.map(str::trim).filter(|s| !s.is_empty());
        let (items, total) = self.store.companies(search, page).await?;
        Ok(Page::new(items, total, page))
    }

    pub async fn create_company(&self, input: CreateCompany) -> CrmResult<Company> {
        require_name(&input.name, "company name")?;
        check_email(input.email.as_deref())?;
        check_potential(input.potential_category.as_deref())?;

        let mut company = Company::named(input.name.trim());
        company.street = input.street;
        company.zip_code = input.zip_code;
        company.city = input.city;
        if let Some(country) = input.country.filter(|c| !c.trim().is_empty()) {
            company.country = country;
        }
        company.website = input.website;
        company.phone = input.phone;
        company.email = input.email;
        company.employee_count = input.employee_count;
        company.potential_category = input.potential_category;
        company.industry = input.industry;
        company.notes = input.notes;

        self.store
            .apply(ChangeSet::single(Change::InsertCompany(company.clone())))
            .await?;
        Ok(company)
    }

    pub async fn update_company(&self, id: Uuid, input: UpdateCompany) -> CrmResult<Company> {
        let mut company = self.company(id).await?;

        if let Some(name) = input.name {
            require_name(&name, "company name")?;
            company.name = name;
        }
        check_email(input.email.as_deref())?;
        check_potential(input.potential_category.as_deref())?;

        macro_rules! overwrite {
            ($($field:ident),*) => {
                $(if let Some(value) = input.$field {
                    company.$field = Some(value);
                })*
            };
        }
        overwrite!(
            street,
            zip_code,
            city,
            website,
            phone,
            email,
            employee_count,
            potential_category,
            industry,
            notes
        );
        if let Some(country) = input.country {
            company.country = country;
        }
        company.updated_at = Utc::now();

        self.store
            .apply(ChangeSet::single(Change::UpdateCompany(company.clone())))
            .await?;
        Ok(company)
    }

    /// Removes the company. Its contacts and opportunities stay, unlinked.
    pub async fn delete_company(&self, id: Uuid) -> CrmResult<()> {
        self.company(id).await?;
        self.store
            .apply(ChangeSet::single(Change::DeleteCompany(id)))
            .await?;
        tracing::info!("Company {} deleted", id);
        Ok(())
    }

    // ---- contacts ----

    pub async fn contact(&self, id: Uuid) -> CrmResult<Contact> {
        self.store
            .contact(id)
            .await?
            .ok_or_else(|| CrmError::not_found("contact", id))
    }

    pub async fn contacts(
        &self,
        filter: &ContactFilter,
        page: PageRequest,
    ) -> CrmResult<Page<Contact>> {
        let (items, total) = self.store.contacts(filter, page).await?;
        Ok(Page::new(items, total, page))
    }

    /// Autocomplete over active contacts. Queries shorter than two characters
    /// return nothing.
    pub async fn search_contacts(&self, query: &str) -> CrmResult<Vec<ContactSearchResult>> {
        let query = query.trim();
        if query.chars().count() < MIN_SEARCH_LEN {
            return Ok(Vec::new());
        }
        Ok(self.store.search_contacts(query, SEARCH_LIMIT).await?)
    }

    pub async fn create_contact(&self, input: CreateContact) -> CrmResult<Contact> {
        require_name(&input.first_name, "first name")?;
        require_name(&input.last_name, "last name")?;
        check_email(input.email.as_deref())?;

        let mut contact = Contact::new(input.first_name.trim(), input.last_name.trim());
        contact.email = input.email;
        contact.phone = input.phone;
        contact.mobile = input.mobile;
        contact.position = input.position;
        contact.department = input.department;
        contact.salutation = input.salutation;
        contact.title = input.title;
        contact.notes = input.notes;
        contact.is_primary = input.is_primary;
        contact.company_id = input.company_id;

        self.store
            .apply(ChangeSet::single(Change::InsertContact(contact.clone())))
            .await?;
        Ok(contact)
    }

    /// Writes the supplied fields. Changes to how the contact is reached or
    /// where they work are recorded as a data_change entry.
    pub async fn update_contact(
        &self,
        id: Uuid,
        input: UpdateContact,
        actor: &str,
    ) -> CrmResult<Contact> {
        let before = self.contact(id).await?;
        let mut contact = before.clone();

        if let Some(first_name) = input.first_name {
            require_name(&first_name, "first name")?;
            contact.first_name = first_name;
        }
        if let Some(last_name) = input.last_name {
            require_name(&last_name, "last name")?;
            contact.last_name = last_name;
        }
        check_email(input.email.as_deref())?;

        macro_rules! overwrite {
            ($($field:ident),*) => {
                $(if let Some(value) = input.$field {
                    contact.$field = Some(value);
                })*
            };
        }
        overwrite!(
            email, phone, mobile, position, department, salutation, title, notes, company_id
        );
        if let Some(is_primary) = input.is_primary {
            contact.is_primary = is_primary;
        }
        if let Some(is_active) = input.is_active {
            contact.is_active = is_active;
        }
        contact.updated_at = Utc::now();

        let mut changes = ChangeSet::new();
        changes.push(Change::UpdateContact(contact.clone()));
        let changed = changed_contact_fields(&before, &contact);
        if !changed.is_empty() {
            changes.push(Change::AppendHistory(audit::entry(
                id,
                HistoryType::DataChange,
                "Kontaktdaten geändert",
                Some(format!("Geänderte Felder: {}", changed.join(", "))),
                Some(actor),
            )));
        }
        self.store.apply(changes).await?;
        Ok(contact)
    }

    /// Soft delete: the contact is deactivated, never removed.
    pub async fn deactivate_contact(&self, id: Uuid) -> CrmResult<()> {
        let mut contact = self.contact(id).await?;
        if !contact.is_active {
            return Ok(());
        }
        contact.is_active = false;
        contact.updated_at = Utc::now();
        self.store
            .apply(ChangeSet::single(Change::UpdateContact(contact)))
            .await?;
        Ok(())
    }

    // ---- campaigns ----

    pub async fn campaign(&self, id: Uuid) -> CrmResult<Campaign> {
        self.store
            .campaign(id)
            .await?
            .ok_or_else(|| CrmError::not_found("campaign", id))
    }

    /// Campaigns, newest first.
    pub async fn campaigns(
        &self,
        is_active: Option<bool>,
        page: PageRequest,
    ) -> CrmResult<Page<Campaign>> {
        let (items, total) = self.store.campaigns(is_active, page).await?;
        Ok(Page::new(items, total, page))
    }

    /// Landing-page view of a campaign. Inactive campaigns are hidden.
    pub async fn public_campaign(&self, id: Uuid) -> CrmResult<PublicCampaign> {
        match self.store.campaign(id).await? {
            Some(c) if c.is_active => Ok(PublicCampaign {
                id: c.id,
                name: c.name,
                description: c.description,
                lead_magnet: c.lead_magnet,
            }),
            _ => Err(CrmError::not_found("campaign", id)),
        }
    }

    pub async fn create_campaign(&self, input: CreateCampaign) -> CrmResult<Campaign> {
        require_name(&input.name, "campaign name")?;
        require_name(&input.campaign_type, "campaign type")?;
        if let (Some(start), Some(end)) = (input.start_date, input.end_date) {
            if end < start {
                return Err(CrmError::validation("end date precedes start date"));
            }
        }

        let now = Utc::now();
        let campaign = Campaign {
            id: Uuid::new_v4(),
            name: input.name.trim().to_string(),
            description: input.description,
            campaign_type: input.campaign_type,
            source: input.source,
            start_date: input.start_date,
            end_date: input.end_date,
            is_active: input.is_active,
            landing_page_url: input.landing_page_url,
            lead_magnet: input.lead_magnet,
            created_at: now,
            updated_at: now,
        };
        self.store
            .apply(ChangeSet::single(Change::InsertCampaign(campaign.clone())))
            .await?;
        Ok(campaign)
    }

    pub async fn update_campaign(&self, id: Uuid, input: UpdateCampaign) -> CrmResult<Campaign> {
        let mut campaign = self.campaign(id).await?;

        if let Some(name) = input.name {
            require_name(&name, "campaign name")?;
            campaign.name = name;
        }
        if let Some(campaign_type) = input.campaign_type {
            campaign.campaign_type = campaign_type;
        }
        macro_rules! overwrite {
            ($($field:ident),*) => {
                $(if let Some(value) = input.$field {
                    campaign.$field = Some(value);
                })*
            };
        }
        overwrite!(description, source, start_date, end_date, landing_page_url, lead_magnet);
        if let Some(is_active) = input.is_active {
            campaign.is_active = is_active;
        }
        if let (Some(start), Some(end)) = (campaign.start_date, campaign.end_date) {
            if end < start {
                return Err(CrmError::validation("end date precedes start date"));
            }
        }
        campaign.updated_at = Utc::now();

        self.store
            .apply(ChangeSet::single(Change::UpdateCampaign(campaign.clone())))
            .await?;
        Ok(campaign)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contact_changes_that_matter_are_detected() {
        let before = Contact::new("Anna", "Huber");
        let mut after = before.clone();
        after.position = Some("CEO".into());
        assert!(changed_contact_fields(&before, &after).is_empty());

        after.email = Some("anna@example.at".into());
        after.company_id = Some(Uuid::new_v4());
        assert_eq!(
            changed_contact_fields(&before, &after),
            vec!["email", "company_id"]
        );
    }

    #[test]
    fn potential_category_is_a_to_d() {
        assert!(check_potential(Some("B")).is_ok());
        assert!(check_potential(None).is_ok());
        assert!(check_potential(Some("E")).is_err());
    }

    #[test]
    fn email_check_skips_absent_values() {
        assert!(check_email(None).is_ok());
        assert!(check_email(Some("")).is_ok());
        assert!(check_email(Some("nope")).is_err());
    }
}
