//! Task lifecycle: creation, updates, completion with optional follow-up, and
//! the overdue view.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::sync::Arc;
use uuid::Uuid;

use crate::audit;
use crate::lifecycle::{check_task_transition, CrmError, CrmResult};
use crate::models::{
    CompleteTask, CreateTask, HistoryType, Page, PageRequest, Task, TaskCompletion, TaskFilter,
    TaskStatus, TaskView, UpdateTask,
};
use crate::store::{Change, ChangeSet, CrmStore};

/// Separator placed before completion notes appended to a description.
pub const COMPLETION_NOTE_LABEL: &str = "Abschlussnotiz: ";

/// Default listing order: due date ascending with undated tasks last, then
/// higher priority first, then oldest first.
pub fn listing_order(a: &Task, b: &Task) -> Ordering {
    let by_due = match (a.due_date, b.due_date) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_due
        .then_with(|| b.priority.cmp(&a.priority))
        .then_with(|| a.created_at.cmp(&b.created_at))
}

fn append_completion_note(description: Option<String>, notes: &str) -> String {
    match description.filter(|d| !d.is_empty()) {
        Some(existing) => format!("{}\n\n{}{}", existing, COMPLETION_NOTE_LABEL, notes),
        None => format!("{}{}", COMPLETION_NOTE_LABEL, notes),
    }
}

/// New tasks may not start out overdue.
fn ensure_not_past(due_date: Option<DateTime<Utc>>, now: DateTime<Utc>) -> CrmResult<()> {
    match due_date {
        Some(due) if due < now => Err(CrmError::validation(
            "Fälligkeitsdatum darf nicht in der Vergangenheit liegen",
        )),
        _ => Ok(()),
    }
}

/// Owns task state changes.
pub struct TaskManager<S: ?Sized> {
    store: Arc<S>,
}

impl<S: CrmStore + ?Sized> TaskManager<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn get(&self, id: Uuid) -> CrmResult<Task> {
        self.store
            .task(id)
            .await?
            .ok_or_else(|| CrmError::not_found("task", id))
    }

    /// Lists tasks in the default order with their overdue flag computed
    /// against `now`.
    pub async fn list(
        &self,
        filter: &TaskFilter,
        page: PageRequest,
        now: DateTime<Utc>,
    ) -> CrmResult<Page<TaskView>> {
        let (tasks, total) = self.store.tasks(filter, page).await?;
        Ok(Page::new(tasks, total, page).map(|task| TaskView {
            is_overdue: task.is_overdue(now),
            task,
        }))
    }

    /// Open or in-progress tasks whose due date has passed.
    pub async fn list_overdue(
        &self,
        now: DateTime<Utc>,
        page: PageRequest,
    ) -> CrmResult<Page<TaskView>> {
        let filter = TaskFilter {
            overdue_at: Some(now),
            ..TaskFilter::default()
        };
        self.list(&filter, page, now).await
    }

    /// Tasks spawned by completing `parent_id`.
    pub async fn follow_ups(&self, parent_id: Uuid) -> CrmResult<Vec<Task>> {
        Ok(self.store.follow_ups(parent_id).await?)
    }

    /// Creates an open task. Records a task_created entry when a contact is
    /// attached.
    pub async fn create(&self, input: CreateTask, actor: &str) -> CrmResult<Task> {
        let title = input.title.trim();
        if title.is_empty() {
            return Err(CrmError::validation("task title must not be empty"));
        }
        ensure_not_past(input.due_date, Utc::now())?;
        if let Some(parent_id) = input.parent_task_id {
            self.get(parent_id).await?;
        }

        let mut task = Task::new(title);
        task.description = input.description;
        task.priority = input.priority;
        task.due_date = input.due_date;
        task.contact_id = input.contact_id;
        task.opportunity_id = input.opportunity_id;
        task.assigned_to = input.assigned_to;
        task.parent_task_id = input.parent_task_id;
        task.created_by = Some(actor.to_string());

        let mut changes = ChangeSet::new();
        changes.push(Change::InsertTask(task.clone()));
        if let Some(contact_id) = task.contact_id {
            changes.push(Change::AppendHistory(audit::entry(
                contact_id,
                HistoryType::TaskCreated,
                "Aufgabe erstellt",
                Some(format!("Aufgabe: {}", task.title)),
                Some(actor),
            )));
        }
        self.store.apply(changes).await?;

        tracing::debug!("Task {} created by {}", task.id, actor);
        Ok(task)
    }

    /// Overwrites the supplied fields. Status changes go through the task
    /// transition policy; plain updates write no audit entry.
    pub async fn update(&self, id: Uuid, input: UpdateTask) -> CrmResult<Task> {
        let current = self.get(id).await?;
        let mut task = current.clone();

        if let Some(status) = input.status {
            check_task_transition(current.status, status)?;
            task.status = status;
        }
        if let Some(title) = input.title {
            if title.trim().is_empty() {
                return Err(CrmError::validation("task title must not be empty"));
            }
            task.title = title;
        }
        if let Some(description) = input.description {
            task.description = Some(description);
        }
        if let Some(priority) = input.priority {
            task.priority = priority;
        }
        if let Some(due_date) = input.due_date {
            task.due_date = Some(due_date);
        }
        if let Some(assigned_to) = input.assigned_to {
            task.assigned_to = Some(assigned_to);
        }
        if let Some(contact_id) = input.contact_id {
            task.contact_id = Some(contact_id);
        }
        if let Some(opportunity_id) = input.opportunity_id {
            task.opportunity_id = Some(opportunity_id);
        }
        task.updated_at = Utc::now();

        self.store
            .apply(ChangeSet::single(Change::UpdateTask {
                task: task.clone(),
                expected_status: current.status,
            }))
            .await?;
        Ok(task)
    }

    /// Completes a task and, when asked for with a non-empty title, chains an
    /// open follow-up to it. Both writes and the audit entry commit together.
    pub async fn complete(
        &self,
        id: Uuid,
        input: CompleteTask,
        actor: &str,
    ) -> CrmResult<TaskCompletion> {
        let current = self.get(id).await?;
        if current.status == TaskStatus::Completed {
            return Err(CrmError::AlreadyCompleted(id));
        }

        let now = Utc::now();
        if input.create_follow_up {
            ensure_not_past(input.follow_up_due_date, now)?;
        }
        let mut task = current.clone();
        task.status = TaskStatus::Completed;
        task.completed_at = Some(now);
        task.updated_at = now;
        if let Some(notes) = input.notes.as_deref().filter(|n| !n.is_empty()) {
            task.description = Some(append_completion_note(task.description.take(), notes));
        }

        let mut changes = ChangeSet::new();
        changes.push(Change::UpdateTask {
            task: task.clone(),
            expected_status: current.status,
        });

        let follow_up_title = input
            .follow_up_title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());
        let follow_up = match follow_up_title {
            Some(title) if input.create_follow_up => {
                let mut next = Task::new(title);
                next.due_date = input.follow_up_due_date;
                next.priority = input.follow_up_priority;
                next.contact_id = task.contact_id;
                next.assigned_to = task.assigned_to.clone();
                next.created_by = Some(actor.to_string());
                next.parent_task_id = Some(task.id);
                changes.push(Change::InsertTask(next.clone()));
                Some(next)
            }
            _ => None,
        };

        if let Some(contact_id) = task.contact_id {
            changes.push(Change::AppendHistory(audit::entry(
                contact_id,
                HistoryType::Note,
                "Aufgabe erledigt",
                Some(format!("Aufgabe: {}", task.title)),
                Some(actor),
            )));
        }

        self.store.apply(changes).await?;

        tracing::info!(
            "Task {} completed by {} (follow-up: {:?})",
            task.id,
            actor,
            follow_up.as_ref().map(|t| t.id)
        );
        Ok(TaskCompletion {
            task,
            follow_up_task: follow_up,
        })
    }

    pub async fn delete(&self, id: Uuid) -> CrmResult<()> {
        self.get(id).await?;
        self.store
            .apply(ChangeSet::single(Change::DeleteTask(id)))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskPriority;
    use chrono::Duration;

    fn task(due_in_days: Option<i64>, priority: TaskPriority) -> Task {
        let mut task = Task::new("t");
        task.due_date = due_in_days.map(|d| Utc::now() + Duration::days(d));
        task.priority = priority;
        task
    }

    #[test]
    fn undated_tasks_sort_last() {
        let dated = task(Some(3), TaskPriority::Low);
        let undated = task(None, TaskPriority::Urgent);
        assert_eq!(listing_order(&dated, &undated), Ordering::Less);
        assert_eq!(listing_order(&undated, &dated), Ordering::Greater);
    }

    #[test]
    fn equal_due_dates_break_ties_by_priority_descending() {
        let mut low = task(Some(1), TaskPriority::Low);
        let mut urgent = task(Some(1), TaskPriority::Urgent);
        urgent.due_date = low.due_date;
        low.created_at = urgent.created_at;
        assert_eq!(listing_order(&urgent, &low), Ordering::Less);

        let undated_low = task(None, TaskPriority::Low);
        let undated_high = task(None, TaskPriority::High);
        assert_eq!(listing_order(&undated_high, &undated_low), Ordering::Less);
    }

    #[test]
    fn past_due_dates_are_rejected_for_new_tasks() {
        let now = Utc::now();
        assert!(ensure_not_past(Some(now - Duration::minutes(1)), now).is_err());
        assert!(ensure_not_past(Some(now + Duration::days(1)), now).is_ok());
        assert!(ensure_not_past(None, now).is_ok());
    }

    #[test]
    fn completion_notes_are_appended() {
        assert_eq!(
            append_completion_note(Some("Call Anna".into()), "reached"),
            "Call Anna\n\nAbschlussnotiz: reached"
        );
        assert_eq!(
            append_completion_note(None, "reached"),
            "Abschlussnotiz: reached"
        );
    }
}
