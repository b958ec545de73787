//! Bulk lead import through `LeadManager::import_file`.

use rstest::{fixture, rstest};
use std::sync::Arc;

use rust_crm_api::leads::LeadManager;
use rust_crm_api::memory_store::MemoryStore;
use rust_crm_api::models::{
    ContactFilter, HistoryType, LeadFilter, LeadStatus, PageRequest,
};
use rust_crm_api::store::CrmStore;

const ACTOR: &str = "import-bot";

#[fixture]
fn store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}

#[rstest]
#[case::german_headers("Vorname,Nachname".to_string())]
#[case::english_headers("first_name,last_name".to_string())]
#[tokio::test]
async fn imports_rows_under_either_spelling(store: Arc<MemoryStore>, #[case] header: String) {
    let csv = format!("{}\nAnna,Huber\nMax,Mustermann\n", header);
    let result = LeadManager::new(store.clone())
        .import_file("leads.csv", csv.as_bytes(), None, ACTOR)
        .await
        .unwrap();

    assert_eq!(result.total_rows, 2);
    assert_eq!(result.imported, 2);
    assert_eq!(result.failed, 0);
    assert!(result.errors.is_empty());

    let (leads, total) = store
        .leads(&LeadFilter::default(), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(total, 2);
    assert!(leads.iter().all(|l| l.status == LeadStatus::Cold));
    assert!(leads.iter().all(|l| l.source.as_deref() == Some("import")));

    let (history, _) = store
        .history(leads[0].contact_id, PageRequest::default())
        .await
        .unwrap();
    assert_eq!(history[0].entry_type, HistoryType::LeadCreated);
    assert_eq!(history[0].title, "Lead importiert");
    assert_eq!(history[0].created_by.as_deref(), Some(ACTOR));
}

#[rstest]
#[tokio::test]
async fn unsupported_extension_imports_nothing(store: Arc<MemoryStore>) {
    let result = LeadManager::new(store)
        .import_file("leads.txt", b"Vorname,Nachname\nAnna,Huber\n", None, ACTOR)
        .await
        .unwrap();

    assert_eq!(result.imported, 0);
    assert_eq!(
        result.errors,
        vec!["Ungültiges Dateiformat. Erlaubt: CSV, XLSX, XLS".to_string()]
    );
}

#[rstest]
#[tokio::test]
async fn missing_required_column_fails_every_row(store: Arc<MemoryStore>) {
    let csv = "Name,Nachname\nAnna,Huber\nMax,Mustermann\nEva,Berger\n";
    let result = LeadManager::new(store.clone())
        .import_file("leads.csv", csv.as_bytes(), None, ACTOR)
        .await
        .unwrap();

    assert_eq!(result.total_rows, 3);
    assert_eq!(result.imported, 0);
    assert_eq!(result.failed, 3);
    assert_eq!(result.errors, vec!["Spalte 'vorname' nicht gefunden".to_string()]);

    let (_, total) = store
        .contacts(&ContactFilter::default(), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(total, 0);
}

#[rstest]
#[tokio::test]
async fn bad_rows_are_reported_with_spreadsheet_line_numbers(store: Arc<MemoryStore>) {
    let csv = "Vorname,Nachname,Firma\nAnna,Huber,Huber Bau\n,Mustermann,\nEva,Berger,Huber Bau\n";
    let result = LeadManager::new(store.clone())
        .import_file("leads.csv", csv.as_bytes(), None, ACTOR)
        .await
        .unwrap();

    assert_eq!(result.total_rows, 3);
    assert_eq!(result.imported, 2);
    assert_eq!(result.failed, 1);
    assert_eq!(
        result.errors,
        vec!["Zeile 3: Vorname oder Nachname fehlt".to_string()]
    );

    // Both imported contacts share the one company created for them.
    let (contacts, _) = store
        .contacts(&ContactFilter::default(), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(contacts.len(), 2);
    assert!(contacts[0].company_id.is_some());
    assert_eq!(contacts[0].company_id, contacts[1].company_id);
}

#[rstest]
#[tokio::test]
async fn known_emails_reuse_the_contact(store: Arc<MemoryStore>) {
    let csv = "vorname,nachname,email\nAnna,Huber,anna@huber-bau.at\nAnna,Huber,anna@huber-bau.at\n";
    let result = LeadManager::new(store.clone())
        .import_file("leads.csv", csv.as_bytes(), None, ACTOR)
        .await
        .unwrap();
    assert_eq!(result.imported, 2);

    let (contacts, total) = store
        .contacts(&ContactFilter::default(), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(total, 1);
    let (_, leads) = store
        .leads(&LeadFilter::default(), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(leads, 2);
    assert_eq!(contacts[0].email.as_deref(), Some("anna@huber-bau.at"));
}

#[rstest]
#[tokio::test]
async fn known_email_with_new_firma_still_creates_the_company(store: Arc<MemoryStore>) {
    let leads = LeadManager::new(store.clone());
    leads
        .import_file("first.csv", b"vorname,nachname,email\nAnna,Huber,anna@x.at\n", None, ACTOR)
        .await
        .unwrap();

    let csv = "vorname,nachname,email,firma\nAnna,Huber,anna@x.at,NewCo GmbH\n";
    let result = leads
        .import_file("second.csv", csv.as_bytes(), None, ACTOR)
        .await
        .unwrap();
    assert_eq!(result.imported, 1);

    let company = store.company_by_name("NewCo GmbH").await.unwrap();
    assert!(company.is_some());
    let (_, contacts) = store
        .contacts(&ContactFilter::default(), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(contacts, 1);
}
