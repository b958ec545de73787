//! Contact timeline: the audit trail every lifecycle manager writes to, plus
//! the user-facing note, call and email entries.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::lifecycle::{CrmError, CrmResult};
use crate::models::{HistoryEntry, HistoryType, NewCall, NewNote, Page, PageRequest, UpdateHistoryEntry};
use crate::store::{Change, ChangeSet, CrmStore};

/// Builds a timeline entry without persisting it. Managers push the result
/// into the change set of the operation that caused the event.
pub fn entry(
    contact_id: Uuid,
    entry_type: HistoryType,
    title: impl Into<String>,
    content: Option<String>,
    actor: Option<&str>,
) -> HistoryEntry {
    let now = Utc::now();
    HistoryEntry {
        id: Uuid::new_v4(),
        contact_id,
        entry_type,
        title: title.into(),
        content,
        extra_data: None,
        created_by: actor.map(str::to_string),
        created_at: now,
        updated_at: now,
    }
}

/// Audit trail recorder and timeline queries.
pub struct AuditTrail<S: ?Sized> {
    store: Arc<S>,
}

impl<S: CrmStore + ?Sized> AuditTrail<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Appends one entry. The contact reference is enforced by the store; a
    /// dangling id surfaces as a constraint error.
    pub async fn record(
        &self,
        contact_id: Uuid,
        entry_type: HistoryType,
        title: &str,
        content: Option<String>,
        extra_data: Option<serde_json::Value>,
        actor: Option<&str>,
    ) -> CrmResult<HistoryEntry> {
        let mut history = entry(contact_id, entry_type, title, content, actor);
        history.extra_data = extra_data;
        self.store
            .apply(ChangeSet::single(Change::AppendHistory(history.clone())))
            .await?;
        Ok(history)
    }

    /// Timeline of a contact, newest first.
    pub async fn timeline(
        &self,
        contact_id: Uuid,
        page: PageRequest,
    ) -> CrmResult<Page<HistoryEntry>> {
        let (items, total) = self.store.history(contact_id, page).await?;
        Ok(Page::new(items, total, page))
    }

    pub async fn add_note(
        &self,
        contact_id: Uuid,
        note: NewNote,
        actor: &str,
    ) -> CrmResult<HistoryEntry> {
        if note.content.trim().is_empty() {
            return Err(CrmError::validation("note content must not be empty"));
        }
        self.require_contact(contact_id).await?;
        self.record(
            contact_id,
            HistoryType::Note,
            "Notiz hinzugefügt",
            Some(note.content),
            None,
            Some(actor),
        )
        .await
    }

    pub async fn add_call(
        &self,
        contact_id: Uuid,
        call: NewCall,
        actor: &str,
    ) -> CrmResult<HistoryEntry> {
        if call.content.trim().is_empty() {
            return Err(CrmError::validation("call notes must not be empty"));
        }
        self.require_contact(contact_id).await?;
        let extra = json!({
            "duration_minutes": call.duration_minutes,
            "outcome": call.outcome,
        });
        self.record(
            contact_id,
            HistoryType::Call,
            "Anruf dokumentiert",
            Some(call.content),
            Some(extra),
            Some(actor),
        )
        .await
    }

    /// Records that a templated email went out to the contact.
    pub async fn log_email_sent(
        &self,
        contact_id: Uuid,
        subject: &str,
        template_name: &str,
        actor: &str,
    ) -> CrmResult<HistoryEntry> {
        self.record(
            contact_id,
            HistoryType::Email,
            &format!("E-Mail gesendet: {}", subject),
            Some(format!("Vorlage: {}", template_name)),
            None,
            Some(actor),
        )
        .await
    }

    /// Edits the title or content of an entry.
    pub async fn edit_entry(
        &self,
        id: Uuid,
        update: UpdateHistoryEntry,
    ) -> CrmResult<HistoryEntry> {
        let mut history = self
            .store
            .history_entry(id)
            .await?
            .ok_or_else(|| CrmError::not_found("history entry", id))?;

        if let Some(title) = update.title {
            if title.trim().is_empty() {
                return Err(CrmError::validation("title must not be empty"));
            }
            history.title = title;
        }
        if let Some(content) = update.content {
            history.content = Some(content);
        }
        history.updated_at = Utc::now();

        self.store
            .apply(ChangeSet::single(Change::UpdateHistory(history.clone())))
            .await?;
        Ok(history)
    }

    pub async fn delete_entry(&self, id: Uuid) -> CrmResult<()> {
        if self.store.history_entry(id).await?.is_none() {
            return Err(CrmError::not_found("history entry", id));
        }
        self.store
            .apply(ChangeSet::single(Change::DeleteHistory(id)))
            .await?;
        Ok(())
    }

    async fn require_contact(&self, contact_id: Uuid) -> CrmResult<()> {
        match self.store.contact(contact_id).await? {
            Some(_) => Ok(()),
            None => Err(CrmError::not_found("contact", contact_id)),
        }
    }
}
