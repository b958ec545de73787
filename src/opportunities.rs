//! Opportunity pipeline: stage changes with default probabilities, closing,
//! and pipeline statistics.

use bigdecimal::{BigDecimal, Zero};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::audit;
use crate::lifecycle::{check_stage_transition, CrmError, CrmResult};
use crate::models::{
    CloseOpportunity, CreateOpportunity, HistoryType, Opportunity, OpportunityFilter,
    OpportunityStage, Page, PageRequest, PipelineStats, StageStats, UpdateOpportunity,
};
use crate::store::{Change, ChangeSet, CrmStore, StageTotal, StoreError};

fn validate_probability(probability: i32) -> CrmResult<()> {
    if (0..=100).contains(&probability) {
        Ok(())
    } else {
        Err(CrmError::validation(format!(
            "probability must be between 0 and 100, got {}",
            probability
        )))
    }
}

fn validate_value(value: Option<&BigDecimal>) -> CrmResult<()> {
    match value {
        Some(v) if v < &BigDecimal::zero() => {
            Err(CrmError::validation("expected value must not be negative"))
        }
        _ => Ok(()),
    }
}

/// Stage total weighted by the stage-default probability, not the stored
/// per-record one.
pub fn stage_weighted_value(stage: OpportunityStage, total_value: &BigDecimal) -> BigDecimal {
    total_value * BigDecimal::from(stage.default_probability()) / BigDecimal::from(100)
}

/// Builds the pipeline report from per-stage totals and the mean open value.
pub fn summarize_pipeline(
    mut totals: Vec<StageTotal>,
    average_open_value: Option<BigDecimal>,
) -> PipelineStats {
    totals.sort_by_key(|t| {
        OpportunityStage::ALL
            .iter()
            .position(|s| *s == t.stage)
            .unwrap_or(usize::MAX)
    });

    let mut total_opportunities = 0;
    let mut total_value = BigDecimal::zero();
    let mut weighted_value = BigDecimal::zero();
    let mut won = 0i64;
    let mut lost = 0i64;

    let stages: Vec<StageStats> = totals
        .into_iter()
        .map(|t| {
            let weighted = stage_weighted_value(t.stage, &t.total_value);
            total_opportunities += t.count;
            total_value += &t.total_value;
            weighted_value += &weighted;
            match t.stage {
                OpportunityStage::ClosedWon => won += t.count,
                OpportunityStage::ClosedLost => lost += t.count,
                _ => {}
            }
            StageStats {
                stage: t.stage,
                count: t.count,
                total_value: t.total_value,
                weighted_value: weighted,
            }
        })
        .collect();

    let closed = won + lost;
    let win_rate = if closed > 0 {
        won as f64 / closed as f64 * 100.0
    } else {
        0.0
    };

    PipelineStats {
        total_opportunities,
        total_value,
        weighted_value,
        stages,
        win_rate,
        average_deal_size: average_open_value
            .map(|avg| avg.round(2))
            .unwrap_or_else(BigDecimal::zero),
    }
}

/// Owns opportunity state changes.
pub struct OpportunityManager<S: ?Sized> {
    store: Arc<S>,
}

impl<S: CrmStore + ?Sized> OpportunityManager<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn get(&self, id: Uuid) -> CrmResult<Opportunity> {
        self.store
            .opportunity(id)
            .await?
            .ok_or_else(|| CrmError::not_found("opportunity", id))
    }

    pub async fn list(
        &self,
        filter: &OpportunityFilter,
        page: PageRequest,
    ) -> CrmResult<Page<Opportunity>> {
        let (items, total) = self.store.opportunities(filter, page).await?;
        Ok(Page::new(items, total, page))
    }

    /// Creates an open opportunity. Probability falls back to the stage
    /// default; closed stages are only reachable by closing.
    pub async fn create(&self, input: CreateOpportunity, actor: &str) -> CrmResult<Opportunity> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(CrmError::validation("opportunity name must not be empty"));
        }
        validate_value(input.expected_value.as_ref())?;

        let mut opportunity = Opportunity::new(name);
        check_stage_transition(opportunity.id, opportunity.stage, input.stage)?;
        let probability = input
            .probability
            .unwrap_or_else(|| input.stage.default_probability());
        validate_probability(probability)?;

        opportunity.stage = input.stage;
        opportunity.probability = probability;
        opportunity.expected_value = input.expected_value;
        opportunity.expected_close_date = input.expected_close_date;
        opportunity.notes = input.notes;
        opportunity.company_id = input.company_id;
        opportunity.contact_id = input.contact_id;

        let mut changes = ChangeSet::new();
        changes.push(Change::InsertOpportunity(opportunity.clone()));
        if let Some(contact_id) = opportunity.contact_id {
            changes.push(Change::AppendHistory(audit::entry(
                contact_id,
                HistoryType::Note,
                "Opportunity erstellt",
                Some(format!("Neue Opportunity: {}", opportunity.name)),
                Some(actor),
            )));
        }
        self.store.apply(changes).await?;
        Ok(opportunity)
    }

    /// Writes the supplied fields. A stage change resets the probability to
    /// the stage default unless the same update sets one, and is logged
    /// against the contact.
    pub async fn update(
        &self,
        id: Uuid,
        input: UpdateOpportunity,
        actor: &str,
    ) -> CrmResult<Opportunity> {
        let current = self.get(id).await?;
        let mut opportunity = current.clone();

        if let Some(name) = input.name {
            if name.trim().is_empty() {
                return Err(CrmError::validation("opportunity name must not be empty"));
            }
            opportunity.name = name;
        }
        if let Some(value) = input.expected_value {
            validate_value(Some(&value))?;
            opportunity.expected_value = Some(value);
        }
        if let Some(probability) = input.probability {
            validate_probability(probability)?;
            opportunity.probability = probability;
        }
        if let Some(date) = input.expected_close_date {
            opportunity.expected_close_date = Some(date);
        }
        if let Some(notes) = input.notes {
            opportunity.notes = Some(notes);
        }
        if let Some(company_id) = input.company_id {
            opportunity.company_id = Some(company_id);
        }
        if let Some(contact_id) = input.contact_id {
            opportunity.contact_id = Some(contact_id);
        }

        let stage_changed = match input.stage {
            Some(stage) if stage != current.stage => {
                check_stage_transition(id, current.stage, stage)?;
                opportunity.stage = stage;
                if input.probability.is_none() {
                    opportunity.probability = stage.default_probability();
                }
                true
            }
            _ => false,
        };
        opportunity.updated_at = Utc::now();

        let mut changes = ChangeSet::new();
        changes.push(Change::UpdateOpportunity {
            opportunity: opportunity.clone(),
            expected_stage: current.stage,
        });
        if let Some(contact_id) = opportunity.contact_id.filter(|_| stage_changed) {
            changes.push(Change::AppendHistory(audit::entry(
                contact_id,
                HistoryType::StatusChange,
                "Opportunity-Stage geändert",
                Some(format!(
                    "Stage von '{}' zu '{}' geändert",
                    current.stage, opportunity.stage
                )),
                Some(actor),
            )));
        }

        self.store.apply(changes).await?;
        Ok(opportunity)
    }

    /// Closes an open opportunity as won or lost. Of two concurrent closes
    /// only one succeeds; the other fails with `AlreadyClosed`.
    pub async fn close(
        &self,
        id: Uuid,
        input: CloseOpportunity,
        actor: &str,
    ) -> CrmResult<Opportunity> {
        let current = self.get(id).await?;
        if current.is_closed() {
            return Err(CrmError::AlreadyClosed(id));
        }
        if let Some(value) = input.actual_value.as_ref() {
            validate_value(Some(value))?;
        }

        let stage = if input.won {
            OpportunityStage::ClosedWon
        } else {
            OpportunityStage::ClosedLost
        };
        let now = Utc::now();
        let mut opportunity = current.clone();
        opportunity.stage = stage;
        opportunity.probability = stage.default_probability();
        opportunity.actual_close_date = Some(now.date_naive());
        opportunity.close_reason = input.close_reason.clone();
        if let Some(value) = input.actual_value {
            opportunity.expected_value = Some(value);
        }
        opportunity.updated_at = now;

        let mut changes = ChangeSet::new();
        changes.push(Change::UpdateOpportunity {
            opportunity: opportunity.clone(),
            expected_stage: current.stage,
        });
        if let Some(contact_id) = opportunity.contact_id {
            let outcome = if input.won { "gewonnen" } else { "verloren" };
            changes.push(Change::AppendHistory(audit::entry(
                contact_id,
                HistoryType::StatusChange,
                format!("Opportunity {}", outcome),
                Some(format!(
                    "Opportunity '{}' wurde {}. Grund: {}",
                    opportunity.name,
                    outcome,
                    input
                        .close_reason
                        .as_deref()
                        .filter(|r| !r.is_empty())
                        .unwrap_or("Nicht angegeben")
                )),
                Some(actor),
            )));
        }

        match self.store.apply(changes).await {
            Ok(()) => {}
            Err(StoreError::Conflict { .. }) => return Err(CrmError::AlreadyClosed(id)),
            Err(e) => return Err(e.into()),
        }

        tracing::info!("Opportunity {} closed as {} by {}", id, stage, actor);
        Ok(opportunity)
    }

    pub async fn delete(&self, id: Uuid) -> CrmResult<()> {
        self.get(id).await?;
        self.store
            .apply(ChangeSet::single(Change::DeleteOpportunity(id)))
            .await?;
        Ok(())
    }

    pub async fn pipeline_stats(&self) -> CrmResult<PipelineStats> {
        let totals = self.store.stage_totals().await?;
        let average = self.store.average_open_value().await?;
        Ok(summarize_pipeline(totals, average))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn total(stage: OpportunityStage, count: i64, value: i64) -> StageTotal {
        StageTotal {
            stage,
            count,
            total_value: BigDecimal::from(value),
        }
    }

    #[test]
    fn pipeline_weights_by_stage_default() {
        let stats = summarize_pipeline(
            vec![
                total(OpportunityStage::ClosedWon, 1, 500),
                total(OpportunityStage::Qualification, 1, 1000),
                total(OpportunityStage::Proposal, 1, 2000),
            ],
            Some(BigDecimal::from(1500)),
        );

        assert_eq!(stats.total_opportunities, 3);
        assert_eq!(stats.total_value, BigDecimal::from(3500));
        let weighted: Vec<_> = stats
            .stages
            .iter()
            .map(|s| (s.stage, s.weighted_value.clone()))
            .collect();
        assert_eq!(
            weighted,
            vec![
                (OpportunityStage::Qualification, BigDecimal::from(100)),
                (OpportunityStage::Proposal, BigDecimal::from(1000)),
                (OpportunityStage::ClosedWon, BigDecimal::from(500)),
            ]
        );
        assert_eq!(stats.weighted_value, BigDecimal::from(1600));
        assert_eq!(stats.win_rate, 100.0);
        assert_eq!(stats.average_deal_size, BigDecimal::from(1500));
    }

    #[test]
    fn empty_pipeline_reports_zeroes() {
        let stats = summarize_pipeline(vec![], None);
        assert_eq!(stats.total_opportunities, 0);
        assert_eq!(stats.win_rate, 0.0);
        assert_eq!(stats.average_deal_size, BigDecimal::zero());
    }

    #[test]
    fn win_rate_counts_lost_deals() {
        let stats = summarize_pipeline(
            vec![
                total(OpportunityStage::ClosedWon, 1, 0),
                total(OpportunityStage::ClosedLost, 3, 0),
            ],
            None,
        );
        assert_eq!(stats.win_rate, 25.0);
    }

    #[test]
    fn average_deal_size_is_rounded_to_cents() {
        let stats = summarize_pipeline(vec![], Some(BigDecimal::from_str("333.3333").unwrap()));
        assert_eq!(stats.average_deal_size, BigDecimal::from_str("333.33").unwrap());
    }

    #[test]
    fn probability_bounds() {
        assert!(validate_probability(0).is_ok());
        assert!(validate_probability(100).is_ok());
        assert!(validate_probability(101).is_err());
        assert!(validate_probability(-1).is_err());
    }
}
