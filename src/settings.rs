//! Key-value settings and the lookup values that feed dropdowns.

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::lifecycle::{CrmError, CrmResult};
use crate::models::{
    CreateLookupValue, CreateSetting, LookupValue, Setting, UpdateLookupValue, UpdateSetting,
};
use crate::store::{Change, ChangeSet, CrmStore};

/// Value types a setting may declare.
pub const VALUE_TYPES: [&str; 4] = ["string", "number", "boolean", "json"];

/// Default lookup catalogue: category → (value, label, sort order).
pub const DEFAULT_LOOKUPS: &[(&str, &[(&str, &str, i32)])] = &[
    (
        "lead_status",
        &[
            ("cold", "Kalt", 0),
            ("warm", "Warm", 1),
            ("hot", "Heiß", 2),
            ("to_be_done", "Zu erledigen", 3),
            ("disqualified", "Disqualifiziert", 4),
            ("converted", "Konvertiert", 5),
        ],
    ),
    (
        "potential_category",
        &[
            ("A", "A - >20 Mitarbeiter", 0),
            ("B", "B - 10-20 Mitarbeiter", 1),
            ("C", "C - <10 Mitarbeiter", 2),
            ("D", "D - Einzelpraktiker", 3),
        ],
    ),
    (
        "industry",
        &[
            ("tax_advisor", "Steuerberater", 0),
            ("lawyer", "Rechtsanwalt", 1),
            ("accountant", "Wirtschaftsprüfer", 2),
            ("notary", "Notar", 3),
            ("consultant", "Unternehmensberater", 4),
            ("other", "Sonstige", 99),
        ],
    ),
    (
        "country",
        &[
            ("AT", "Österreich", 0),
            ("DE", "Deutschland", 1),
            ("CH", "Schweiz", 2),
            ("LI", "Liechtenstein", 3),
        ],
    ),
    ("salutation", &[("herr", "Herr", 0), ("frau", "Frau", 1)]),
    (
        "title",
        &[
            ("dr", "Dr.", 0),
            ("mag", "Mag.", 1),
            ("di", "DI", 2),
            ("prof", "Prof.", 3),
            ("mba", "MBA", 4),
        ],
    ),
    (
        "task_priority",
        &[
            ("low", "Niedrig", 0),
            ("medium", "Mittel", 1),
            ("high", "Hoch", 2),
            ("urgent", "Dringend", 3),
        ],
    ),
    (
        "campaign_type",
        &[
            ("social_media", "Social Media", 0),
            ("email", "E-Mail", 1),
            ("landing_page", "Landing Page", 2),
            ("event", "Event", 3),
            ("webinar", "Webinar", 4),
        ],
    ),
    (
        "campaign_source",
        &[
            ("facebook", "Facebook", 0),
            ("google", "Google", 1),
            ("linkedin", "LinkedIn", 2),
            ("instagram", "Instagram", 3),
            ("website", "Website", 4),
            ("referral", "Empfehlung", 5),
        ],
    ),
];

/// Checks that `value` parses as `value_type`.
pub fn validate_value(value_type: &str, value: Option<&str>) -> CrmResult<()> {
    if !VALUE_TYPES.contains(&value_type) {
        return Err(CrmError::validation(format!(
            "unknown value type '{}', expected one of {}",
            value_type,
            VALUE_TYPES.join(", ")
        )));
    }
    let Some(value) = value else {
        return Ok(());
    };
    let valid = match value_type {
        "number" => value.trim().parse::<f64>().is_ok(),
        "boolean" => matches!(value.trim(), "true" | "false"),
        "json" => serde_json::from_str::<serde_json::Value>(value).is_ok(),
        _ => true,
    };
    if valid {
        Ok(())
    } else {
        Err(CrmError::validation(format!(
            "value '{}' is not a valid {}",
            value, value_type
        )))
    }
}

fn new_lookup(
    category: &str,
    value: &str,
    label: &str,
    sort_order: i32,
    is_active: bool,
) -> LookupValue {
    let now = Utc::now();
    LookupValue {
        id: Uuid::new_v4(),
        category: category.to_string(),
        value: value.to_string(),
        label: label.to_string(),
        sort_order,
        is_active,
        created_at: now,
        updated_at: now,
    }
}

/// Settings and lookup values.
pub struct SettingsService<S: ?Sized> {
    store: Arc<S>,
}

impl<S: CrmStore + ?Sized> SettingsService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn settings(&self, category: Option<&str>) -> CrmResult<Vec<Setting>> {
        Ok(self.store.settings(category).await?)
    }

    pub async fn setting(&self, key: &str) -> CrmResult<Setting> {
        self.store
            .setting(key)
            .await?
            .ok_or_else(|| CrmError::KeyNotFound {
                entity: "setting",
                key: key.to_string(),
            })
    }

    pub async fn create_setting(&self, input: CreateSetting) -> CrmResult<Setting> {
        let key = input.key.trim();
        if key.is_empty() {
            return Err(CrmError::validation("setting key must not be empty"));
        }
        validate_value(&input.value_type, input.value.as_deref())?;

        let now = Utc::now();
        let setting = Setting {
            id: Uuid::new_v4(),
            key: key.to_string(),
            category: input.category,
            value: input.value,
            value_type: input.value_type,
            created_at: now,
            updated_at: now,
        };
        self.store
            .apply(ChangeSet::single(Change::InsertSetting(setting.clone())))
            .await?;
        Ok(setting)
    }

    pub async fn update_setting(&self, key: &str, input: UpdateSetting) -> CrmResult<Setting> {
        let mut setting = self.setting(key).await?;
        if let Some(category) = input.category {
            setting.category = category;
        }
        if let Some(value_type) = input.value_type {
            setting.value_type = value_type;
        }
        if let Some(value) = input.value {
            setting.value = Some(value);
        }
        validate_value(&setting.value_type, setting.value.as_deref())?;
        setting.updated_at = Utc::now();

        self.store
            .apply(ChangeSet::single(Change::UpdateSetting(setting.clone())))
            .await?;
        Ok(setting)
    }

    /// Creates the setting or overwrites its value and type.
    pub async fn upsert_setting(&self, input: CreateSetting) -> CrmResult<Setting> {
        match self.store.setting(input.key.trim()).await? {
            Some(existing) => {
                self.update_setting(
                    &existing.key,
                    UpdateSetting {
                        category: None,
                        value: input.value,
                        value_type: Some(input.value_type),
                    },
                )
                .await
            }
            None => self.create_setting(input).await,
        }
    }

    pub async fn delete_setting(&self, key: &str) -> CrmResult<()> {
        let setting = self.setting(key).await?;
        self.store
            .apply(ChangeSet::single(Change::DeleteSetting(setting.id)))
            .await?;
        Ok(())
    }

    // ---- lookups ----

    /// Lookups of a category ordered by sort order, then label.
    pub async fn lookups(
        &self,
        category: &str,
        include_inactive: bool,
    ) -> CrmResult<Vec<LookupValue>> {
        Ok(self.store.lookups(category, include_inactive).await?)
    }

    pub async fn lookup_categories(&self) -> CrmResult<Vec<String>> {
        Ok(self.store.lookup_categories().await?)
    }

    pub async fn lookup(&self, id: Uuid) -> CrmResult<LookupValue> {
        self.store
            .lookup(id)
            .await?
            .ok_or_else(|| CrmError::not_found("lookup value", id))
    }

    pub async fn create_lookup(&self, input: CreateLookupValue) -> CrmResult<LookupValue> {
        if input.category.trim().is_empty() || input.value.trim().is_empty() {
            return Err(CrmError::validation("category and value are required"));
        }
        let lookup = new_lookup(
            input.category.trim(),
            input.value.trim(),
            &input.label,
            input.sort_order,
            input.is_active,
        );
        self.store
            .apply(ChangeSet::single(Change::InsertLookup(lookup.clone())))
            .await?;
        Ok(lookup)
    }

    pub async fn update_lookup(
        &self,
        id: Uuid,
        input: UpdateLookupValue,
    ) -> CrmResult<LookupValue> {
        let mut lookup = self.lookup(id).await?;
        if let Some(value) = input.value {
            if value.trim().is_empty() {
                return Err(CrmError::validation("value must not be empty"));
            }
            lookup.value = value;
        }
        if let Some(label) = input.label {
            lookup.label = label;
        }
        if let Some(sort_order) = input.sort_order {
            lookup.sort_order = sort_order;
        }
        if let Some(is_active) = input.is_active {
            lookup.is_active = is_active;
        }
        lookup.updated_at = Utc::now();

        self.store
            .apply(ChangeSet::single(Change::UpdateLookup(lookup.clone())))
            .await?;
        Ok(lookup)
    }

    /// Deactivates the lookup, or removes it when `hard` is set.
    pub async fn delete_lookup(&self, id: Uuid, hard: bool) -> CrmResult<()> {
        let mut lookup = self.lookup(id).await?;
        let change = if hard {
            Change::DeleteLookup(id)
        } else {
            lookup.is_active = false;
            lookup.updated_at = Utc::now();
            Change::UpdateLookup(lookup)
        };
        self.store.apply(ChangeSet::single(change)).await?;
        Ok(())
    }

    /// Sets each listed lookup's sort order to its position. Ids that are
    /// unknown or belong to another category are skipped.
    pub async fn reorder_lookups(
        &self,
        category: &str,
        ordered_ids: &[Uuid],
    ) -> CrmResult<Vec<LookupValue>> {
        let mut changes = ChangeSet::new();
        let now = Utc::now();
        for (position, id) in ordered_ids.iter().enumerate() {
            if let Some(mut lookup) = self.store.lookup(*id).await? {
                if lookup.category == category {
                    lookup.sort_order = position as i32;
                    lookup.updated_at = now;
                    changes.push(Change::UpdateLookup(lookup));
                }
            }
        }
        if !changes.is_empty() {
            self.store.apply(changes).await?;
        }
        self.lookups(category, true).await
    }

    /// Inserts every default lookup that is missing. Returns how many values
    /// were created per category.
    pub async fn seed_lookups(&self) -> CrmResult<BTreeMap<String, usize>> {
        let mut created = BTreeMap::new();
        let mut changes = ChangeSet::new();
        for (category, values) in DEFAULT_LOOKUPS {
            let mut count = 0;
            for (value, label, sort_order) in values.iter() {
                if self.store.lookup_by_value(category, value).await?.is_none() {
                    changes.push(Change::InsertLookup(new_lookup(
                        category,
                        value,
                        label,
                        *sort_order,
                        true,
                    )));
                    count += 1;
                }
            }
            created.insert(category.to_string(), count);
        }
        if !changes.is_empty() {
            self.store.apply(changes).await?;
        }
        Ok(created)
    }

    /// Number of lookup values per default category, active or not.
    pub async fn seed_statistics(&self) -> CrmResult<BTreeMap<String, usize>> {
        let mut stats = BTreeMap::new();
        for (category, _) in DEFAULT_LOOKUPS {
            let count = self.store.lookups(category, true).await?.len();
            stats.insert(category.to_string(), count);
        }
        Ok(stats)
    }
}
