//! Email templates with `{{contact.*}}` / `{{company.*}}` placeholders,
//! preview rendering and sending through a pluggable transport.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::AuditTrail;
use crate::lifecycle::{CrmError, CrmResult};
use crate::models::{
    Company, Contact, CreateEmailTemplate, EmailPreview, EmailTemplate, Page, PageRequest,
    SendEmailRequest, TemplateFilter, UpdateEmailTemplate,
};
use crate::store::{Change, ChangeSet, CrmStore};

/// Placeholders a template may use.
pub const PLACEHOLDERS: [&str; 11] = [
    "{{contact.first_name}}",
    "{{contact.last_name}}",
    "{{contact.full_name}}",
    "{{contact.email}}",
    "{{contact.phone}}",
    "{{contact.position}}",
    "{{contact.salutation}}",
    "{{contact.title}}",
    "{{company.name}}",
    "{{company.city}}",
    "{{company.website}}",
];

/// Fills the known placeholders. Missing values render as empty strings and
/// unknown placeholders are left as written.
pub fn render(text: &str, contact: &Contact, company: Option<&Company>) -> String {
    let opt = |v: &Option<String>| v.clone().unwrap_or_default();
    let company_field = |f: fn(&Company) -> Option<String>| company.and_then(f).unwrap_or_default();

    let values = [
        contact.first_name.clone(),
        contact.last_name.clone(),
        contact.full_name(),
        opt(&contact.email),
        opt(&contact.phone),
        opt(&contact.position),
        opt(&contact.salutation),
        opt(&contact.title),
        company_field(|c| Some(c.name.clone())),
        company_field(|c| c.city.clone()),
        company_field(|c| c.website.clone()),
    ];

    PLACEHOLDERS
        .iter()
        .zip(values.iter())
        .fold(text.to_string(), |acc, (placeholder, value)| {
            acc.replace(placeholder, value)
        })
}

/// An outgoing message.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingEmail {
    pub to_email: String,
    pub to_name: String,
    pub subject: String,
    pub body: String,
}

/// Delivery seam for rendered emails.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> CrmResult<()>;
}

/// Transport that only logs the message. No SMTP delivery takes place.
pub struct LogMailer {
    from_email: String,
    from_name: String,
}

impl LogMailer {
    pub fn new(from_email: impl Into<String>, from_name: impl Into<String>) -> Self {
        Self {
            from_email: from_email.into(),
            from_name: from_name.into(),
        }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &OutgoingEmail) -> CrmResult<()> {
        tracing::info!(
            "📧 Mail from {} <{}> to {} <{}>: {}",
            self.from_name,
            self.from_email,
            email.to_name,
            email.to_email,
            email.subject
        );
        Ok(())
    }
}

/// Template management and sending.
pub struct EmailService<S: ?Sized> {
    store: Arc<S>,
    audit: AuditTrail<S>,
    mailer: Arc<dyn Mailer>,
}

impl<S: CrmStore + ?Sized> EmailService<S> {
    pub fn new(store: Arc<S>, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            audit: AuditTrail::new(store.clone()),
            store,
            mailer,
        }
    }

    pub async fn template(&self, id: Uuid) -> CrmResult<EmailTemplate> {
        self.store
            .email_template(id)
            .await?
            .ok_or_else(|| CrmError::not_found("email template", id))
    }

    /// Templates ordered by name.
    pub async fn templates(
        &self,
        filter: &TemplateFilter,
        page: PageRequest,
    ) -> CrmResult<Page<EmailTemplate>> {
        let (items, total) = self.store.email_templates(filter, page).await?;
        Ok(Page::new(items, total, page))
    }

    pub async fn create_template(&self, input: CreateEmailTemplate) -> CrmResult<EmailTemplate> {
        let name = input.name.trim();
        if name.is_empty() || input.subject.trim().is_empty() {
            return Err(CrmError::validation("name and subject are required"));
        }

        let now = Utc::now();
        let template = EmailTemplate {
            id: Uuid::new_v4(),
            name: name.to_string(),
            subject: input.subject,
            body: input.body,
            description: input.description,
            variables: input.variables.map(|v| json!(v)),
            is_active: input.is_active,
            category: input.category,
            created_at: now,
            updated_at: now,
        };
        self.store
            .apply(ChangeSet::single(Change::InsertTemplate(template.clone())))
            .await?;
        Ok(template)
    }

    pub async fn update_template(
        &self,
        id: Uuid,
        input: UpdateEmailTemplate,
    ) -> CrmResult<EmailTemplate> {
        let mut template = self.template(id).await?;

        if let Some(name) = input.name {
            if name.trim().is_empty() {
                return Err(CrmError::validation("name must not be empty"));
            }
            template.name = name;
        }
        if let Some(subject) = input.subject {
            template.subject = subject;
        }
        if let Some(body) = input.body {
            template.body = body;
        }
        if let Some(description) = input.description {
            template.description = Some(description);
        }
        if let Some(variables) = input.variables {
            template.variables = Some(json!(variables));
        }
        if let Some(is_active) = input.is_active {
            template.is_active = is_active;
        }
        if let Some(category) = input.category {
            template.category = Some(category);
        }
        template.updated_at = Utc::now();

        self.store
            .apply(ChangeSet::single(Change::UpdateTemplate(template.clone())))
            .await?;
        Ok(template)
    }

    /// Renders the template for the contact without sending anything.
    pub async fn preview(&self, template_id: Uuid, contact_id: Uuid) -> CrmResult<EmailPreview> {
        let template = self.template(template_id).await?;
        let (contact, company) = self.recipient(contact_id).await?;

        Ok(EmailPreview {
            subject: render(&template.subject, &contact, company.as_ref()),
            body: render(&template.body, &contact, company.as_ref()),
            to_email: contact.email.clone().unwrap_or_default(),
            to_name: contact.full_name(),
        })
    }

    /// Renders, hands the message to the transport and logs it on the
    /// contact's timeline.
    pub async fn send(&self, request: SendEmailRequest, actor: &str) -> CrmResult<EmailPreview> {
        let template = self.template(request.template_id).await?;
        let (contact, company) = self.recipient(request.contact_id).await?;
        let to_email = contact
            .email
            .clone()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| CrmError::validation("Kontakt hat keine E-Mail-Adresse"))?;

        let subject = request
            .subject_override
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| render(&template.subject, &contact, company.as_ref()));
        let email = OutgoingEmail {
            to_email,
            to_name: contact.full_name(),
            subject,
            body: render(&template.body, &contact, company.as_ref()),
        };

        self.mailer.send(&email).await?;
        self.audit
            .log_email_sent(contact.id, &email.subject, &template.name, actor)
            .await?;

        Ok(EmailPreview {
            subject: email.subject,
            body: email.body,
            to_email: email.to_email,
            to_name: email.to_name,
        })
    }

    async fn recipient(&self, contact_id: Uuid) -> CrmResult<(Contact, Option<Company>)> {
        let contact = self
            .store
            .contact(contact_id)
            .await?
            .ok_or_else(|| CrmError::not_found("contact", contact_id))?;
        let company = match contact.company_id {
            Some(id) => self.store.company(id).await?,
            None => None,
        };
        Ok((contact, company))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anna() -> Contact {
        let mut contact = Contact::new("Anna", "Huber");
        contact.title = Some("Mag.".into());
        contact.salutation = Some("Frau".into());
        contact.email = Some("anna@example.at".into());
        contact
    }

    #[test]
    fn renders_contact_and_company_fields() {
        let mut company = Company::named("ACME GmbH");
        company.city = Some("Wien".into());

        let text = "Sehr geehrte {{contact.salutation}} {{contact.full_name}}, Grüße nach {{company.city}} von {{company.name}}";
        assert_eq!(
            render(text, &anna(), Some(&company)),
            "Sehr geehrte Frau Mag. Anna Huber, Grüße nach Wien von ACME GmbH"
        );
    }

    #[test]
    fn missing_values_render_empty_and_unknown_placeholders_stay() {
        let text = "[{{company.name}}][{{contact.phone}}][{{contact.birthday}}]";
        assert_eq!(render(text, &anna(), None), "[][][{{contact.birthday}}]");
    }
}
