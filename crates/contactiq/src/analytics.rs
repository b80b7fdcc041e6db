//! Interaction analytics: the data layer behind the operations dashboard.
//!
//! Everything here is computed from persisted [`Interaction`] and
//! [`Escalation`] records; nothing is tracked incrementally.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::store::{DurableStore, Filter, Table};
use crate::types::{AssistantMode, Escalation, Interaction, Outcome, TriggerType};

const TOP_SOURCES: usize = 10;

// ============================================================================
// Summary types
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub total: usize,
    pub resolved: usize,
    pub escalated: usize,
}

impl OutcomeCounts {
    fn record(&mut self, outcome: Outcome) {
        self.total += 1;
        match outcome {
            Outcome::Resolved => self.resolved += 1,
            Outcome::Escalated => self.escalated += 1,
        }
    }

    /// Resolved share in [0, 1]; zero when nothing was recorded.
    pub fn resolution_rate(&self) -> f64 {
        ratio(self.resolved, self.total).unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentStats {
    pub intent_name: String,
    pub count: usize,
    pub resolution_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceCount {
    pub source: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub overall: OutcomeCounts,
    pub resolution_rate: f64,
    /// Keyed by mode name.
    pub by_mode: BTreeMap<String, OutcomeCounts>,
    /// Most frequent first.
    pub intents: Vec<IntentStats>,
    pub escalations_by_trigger: BTreeMap<TriggerType, usize>,
    pub mean_confidence: Option<f64>,
    pub mean_processing_time_ms: Option<f64>,
    pub p95_processing_time_ms: Option<u64>,
    pub mean_generation_time_ms: Option<f64>,
    /// Share of generated responses carrying at least one citation.
    pub citation_coverage: Option<f64>,
    /// Share of generated responses backed by zero retrieved chunks.
    pub failed_retrieval_rate: Option<f64>,
    pub top_sources: Vec<SourceCount>,
}

// ============================================================================
// Aggregation
// ============================================================================

pub fn summarize(interactions: &[Interaction], escalations: &[Escalation]) -> MetricsSummary {
    let mut summary = MetricsSummary::default();
    let mut intents: HashMap<&str, OutcomeCounts> = HashMap::new();
    let mut sources: HashMap<&str, usize> = HashMap::new();
    let mut processing_times = Vec::new();
    let mut generation_times = Vec::new();
    let mut confidences = Vec::new();
    let (mut responses, mut cited, mut no_evidence) = (0usize, 0usize, 0usize);

    for interaction in interactions {
        summary.overall.record(interaction.outcome);
        summary
            .by_mode
            .entry(interaction.assistant_mode.as_str().to_string())
            .or_default()
            .record(interaction.outcome);
        if let Some(intent) = interaction.intent_name.as_deref() {
            intents.entry(intent).or_default().record(interaction.outcome);
        }

        confidences.extend(interaction.confidence_score);
        processing_times.extend(interaction.processing_time_ms);
        generation_times.extend(interaction.response_generation_time_ms);

        if interaction.response_text.as_deref().is_some_and(|t| !t.is_empty()) {
            responses += 1;
            let citations = interaction.citations.as_deref().unwrap_or_default();
            if !citations.is_empty() {
                cited += 1;
                for citation in citations.iter().filter(|c| !c.source.is_empty()) {
                    *sources.entry(citation.source.as_str()).or_default() += 1;
                }
            }
            if interaction.retrieved_chunks_count == 0 {
                no_evidence += 1;
            }
        }
    }

    for escalation in escalations {
        *summary.escalations_by_trigger.entry(escalation.trigger_type).or_default() += 1;
    }

    summary.resolution_rate = summary.overall.resolution_rate();
    summary.intents = intents
        .into_iter()
        .map(|(name, counts)| IntentStats {
            intent_name: name.to_string(),
            count: counts.total,
            resolution_rate: counts.resolution_rate(),
        })
        .collect();
    summary
        .intents
        .sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.intent_name.cmp(&b.intent_name)));

    summary.mean_confidence = mean(confidences.iter().copied());
    summary.mean_processing_time_ms = mean(processing_times.iter().map(|&ms| ms as f64));
    summary.p95_processing_time_ms = percentile(&mut processing_times, 0.95);
    summary.mean_generation_time_ms = mean(generation_times.iter().map(|&ms| ms as f64));
    summary.citation_coverage = ratio(cited, responses);
    summary.failed_retrieval_rate = ratio(no_evidence, responses);

    let mut top: Vec<SourceCount> = sources
        .into_iter()
        .map(|(source, count)| SourceCount { source: source.to_string(), count })
        .collect();
    top.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.source.cmp(&b.source)));
    top.truncate(TOP_SOURCES);
    summary.top_sources = top;

    summary
}

fn ratio(part: usize, whole: usize) -> Option<f64> {
    (whole > 0).then(|| part as f64 / whole as f64)
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Nearest-rank percentile. Sorts `values` in place.
fn percentile(values: &mut [u64], p: f64) -> Option<u64> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable();
    let rank = (p * values.len() as f64).ceil() as usize;
    Some(values[rank.clamp(1, values.len()) - 1])
}

// ============================================================================
// Loading
// ============================================================================

/// Dashboard filter. Unset fields do not constrain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractionFilter {
    pub mode: Option<AssistantMode>,
    pub intent: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl InteractionFilter {
    /// Column predicates the store can apply directly. The time range is
    /// checked after decoding, on real timestamps.
    pub fn store_filters(&self) -> Vec<Filter> {
        let mut filters = Vec::new();
        if let Some(mode) = self.mode {
            filters.push(Filter::eq("assistant_mode", mode.as_str()));
        }
        if let Some(intent) = &self.intent {
            filters.push(Filter::eq("intent_name", intent.as_str()));
        }
        filters
    }

    pub fn in_range(&self, at: DateTime<Utc>) -> bool {
        self.since.map_or(true, |since| at >= since) && self.until.map_or(true, |until| at <= until)
    }
}

/// Select and decode matching records, then summarize them.
///
/// Escalations are limited to those whose interaction was selected. Rows
/// that fail to decode are skipped with a warning.
pub async fn load_summary(store: &dyn DurableStore, filter: &InteractionFilter) -> Result<MetricsSummary> {
    let rows = store
        .select(Table::Interactions, &filter.store_filters())
        .await
        .context("Failed to load interactions")?;
    let interactions: Vec<Interaction> = decode_rows(rows, Table::Interactions)
        .into_iter()
        .filter(|i: &Interaction| filter.in_range(i.timestamp))
        .collect();

    let selected: HashSet<&str> = interactions.iter().filter_map(|i| i.id.as_deref()).collect();
    let rows = store
        .select(Table::Escalations, &[])
        .await
        .context("Failed to load escalations")?;
    let escalations: Vec<Escalation> = decode_rows(rows, Table::Escalations)
        .into_iter()
        .filter(|e: &Escalation| selected.contains(e.interaction_id.as_str()))
        .collect();

    tracing::debug!(
        interactions = interactions.len(),
        escalations = escalations.len(),
        "Loaded analytics records"
    );
    Ok(summarize(&interactions, &escalations))
}

fn decode_rows<T: serde::de::DeserializeOwned>(rows: Vec<serde_json::Value>, table: Table) -> Vec<T> {
    rows.into_iter()
        .filter_map(|row| match serde_json::from_value(row) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(table = table.as_str(), error = %e, "Skipping undecodable row");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::sample_interaction;
    use crate::types::Citation;
    use chrono::Duration;

    fn escalated(intent: &str, mode: AssistantMode) -> Interaction {
        let mut record = sample_interaction();
        record.intent_name = Some(intent.to_string());
        record.assistant_mode = mode;
        record.outcome = Outcome::Escalated;
        record.escalation_reason = Some("Intent category: human_only".into());
        record.response_text = None;
        record.citations = None;
        record.confidence_score = None;
        record
    }

    #[test]
    fn test_summarize_counts_and_rates() {
        let mut resolved = sample_interaction();
        resolved.processing_time_ms = Some(100);
        let mut uncited = sample_interaction();
        uncited.citations = Some(Vec::new());
        uncited.retrieved_chunks_count = 0;
        uncited.processing_time_ms = Some(300);
        uncited.confidence_score = Some(0.7);
        let complaint = escalated("complaint", AssistantMode::Banker);

        let escalation = Escalation {
            id: None,
            interaction_id: "x".into(),
            trigger_type: TriggerType::HumanOnly,
            escalation_reason: "Intent category: human_only".into(),
            created_at: Utc::now(),
        };

        let summary = summarize(&[resolved, uncited, complaint], &[escalation]);
        assert_eq!(summary.overall.total, 3);
        assert_eq!(summary.overall.escalated, 1);
        assert!((summary.resolution_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(summary.by_mode["banker"].escalated, 1);
        assert_eq!(summary.by_mode["customer"].resolved, 2);
        assert_eq!(summary.intents[0].intent_name, "fee_inquiry");
        assert_eq!(summary.intents[0].count, 2);
        assert_eq!(summary.escalations_by_trigger[&TriggerType::HumanOnly], 1);
        assert!((summary.mean_confidence.unwrap() - 0.76).abs() < 1e-9);
        assert_eq!(summary.mean_processing_time_ms, Some(200.0));
        assert_eq!(summary.p95_processing_time_ms, Some(300));
        assert_eq!(summary.citation_coverage, Some(0.5));
        assert_eq!(summary.failed_retrieval_rate, Some(0.5));
        assert_eq!(summary.top_sources, vec![SourceCount { source: "Source 1".into(), count: 1 }]);
    }

    #[test]
    fn test_empty_input() {
        let summary = summarize(&[], &[]);
        assert_eq!(summary.resolution_rate, 0.0);
        assert!(summary.mean_confidence.is_none());
        assert!(summary.p95_processing_time_ms.is_none());
        assert!(summary.citation_coverage.is_none());
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let mut values: Vec<u64> = (1..=20).collect();
        assert_eq!(percentile(&mut values, 0.95), Some(19));
        assert_eq!(percentile(&mut [7], 0.95), Some(7));
    }

    #[test]
    fn test_top_sources_ordering() {
        let mut a = sample_interaction();
        a.citations = Some(vec![
            Citation { source: "Fees guide".into(), ..Citation::placeholder(1) },
            Citation { source: "Card terms".into(), ..Citation::placeholder(2) },
        ]);
        let mut b = sample_interaction();
        b.citations = Some(vec![Citation { source: "Fees guide".into(), ..Citation::placeholder(1) }]);

        let summary = summarize(&[a, b], &[]);
        assert_eq!(summary.top_sources[0].source, "Fees guide");
        assert_eq!(summary.top_sources[0].count, 2);
        assert_eq!(summary.top_sources[1].source, "Card terms");
    }

    #[tokio::test]
    async fn test_load_summary_applies_filter() {
        let store = MemoryStore::new();
        let old = Interaction {
            timestamp: Utc::now() - Duration::days(10),
            ..sample_interaction()
        };
        let banker = escalated("complaint", AssistantMode::Banker);
        for record in [sample_interaction(), old, banker] {
            store
                .insert(Table::Interactions, serde_json::to_value(record).unwrap())
                .await
                .unwrap();
        }
        let banker_id = store.rows(Table::Interactions)[2]["id"].as_str().unwrap().to_string();
        let escalation = Escalation {
            id: None,
            interaction_id: banker_id,
            trigger_type: TriggerType::HumanOnly,
            escalation_reason: "Intent category: human_only".into(),
            created_at: Utc::now(),
        };
        store
            .insert(Table::Escalations, serde_json::to_value(escalation).unwrap())
            .await
            .unwrap();

        let recent = InteractionFilter {
            since: Some(Utc::now() - Duration::days(1)),
            ..Default::default()
        };
        let summary = load_summary(&store, &recent).await.unwrap();
        assert_eq!(summary.overall.total, 2);
        assert_eq!(summary.escalations_by_trigger[&TriggerType::HumanOnly], 1);

        let customers = InteractionFilter {
            mode: Some(AssistantMode::Customer),
            ..Default::default()
        };
        let summary = load_summary(&store, &customers).await.unwrap();
        assert_eq!(summary.overall.total, 2);
        assert!(summary.escalations_by_trigger.is_empty());
    }
}
