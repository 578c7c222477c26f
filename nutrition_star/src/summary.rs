/*!
Aggregations over the fact table, as displayed by the dashboard cards and tables.
*/

use log::debug;
use std::collections::BTreeMap;
use std::fmt::Display;

use crate::config::*;

/// Stunting prevalence buckets. The bins are closed on the right:
/// (0, 5], (5, 10], (10, 20], (20, 100].
#[derive(Eq, PartialEq, Debug, Clone, Copy, PartialOrd, Ord, Hash)]
pub enum PrevalenceCategory {
    VeryLow,
    Low,
    High,
    VeryHigh,
}

impl PrevalenceCategory {
    /// None for 0% (no case reported) and for values outside of the bins.
    pub fn classify(percent: f64) -> Option<PrevalenceCategory> {
        match percent {
            p if p > 0.0 && p <= 5.0 => Some(PrevalenceCategory::VeryLow),
            p if p > 5.0 && p <= 10.0 => Some(PrevalenceCategory::Low),
            p if p > 10.0 && p <= 20.0 => Some(PrevalenceCategory::High),
            p if p > 20.0 && p <= 100.0 => Some(PrevalenceCategory::VeryHigh),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PrevalenceCategory::VeryLow => "Very low (<5%)",
            PrevalenceCategory::Low => "Low (5-10%)",
            PrevalenceCategory::High => "High (10-20%)",
            PrevalenceCategory::VeryHigh => "Very high (>20%)",
        }
    }
}

impl Display for PrevalenceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// The measures of all the villages of one facility.
#[derive(PartialEq, Debug, Clone)]
pub struct FacilitySummary {
    pub facility_name: String,
    pub total_weighed: Count,
    pub count_stunted: Count,
    pub count_underweight: Count,
    pub count_wasted: Count,
    pub target_total: Count,
    pub percent_stunted: f64,
    pub percent_underweight: f64,
    pub percent_wasted: f64,
    pub percent_weighed_of_target: f64,
}

impl FacilitySummary {
    pub fn category(&self) -> Option<PrevalenceCategory> {
        PrevalenceCategory::classify(self.percent_stunted)
    }
}

// Unlike the per-village indicators, an empty denominator gives 0.
fn ratio(numerator: Count, denominator: Count) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator * 100.0
    }
}

/// Sums the facts by facility. The result is sorted by facility name.
pub fn summarize_facilities(facts: &[FactRecord]) -> Vec<FacilitySummary> {
    #[derive(Default)]
    struct Acc {
        weighed: Count,
        stunted: Count,
        underweight: Count,
        wasted: Count,
        target: Count,
    }

    let mut by_facility: BTreeMap<&str, Acc> = BTreeMap::new();
    for f in facts.iter() {
        let acc = by_facility.entry(f.facility_name.as_str()).or_default();
        acc.weighed += f.total_weighed;
        acc.stunted += f.count_stunted;
        acc.underweight += f.count_underweight;
        acc.wasted += f.count_wasted;
        acc.target += f.target_total;
    }
    debug!("summarize_facilities: {} facilities", by_facility.len());

    by_facility
        .into_iter()
        .map(|(name, acc)| FacilitySummary {
            facility_name: name.to_string(),
            total_weighed: acc.weighed,
            count_stunted: acc.stunted,
            count_underweight: acc.underweight,
            count_wasted: acc.wasted,
            target_total: acc.target,
            percent_stunted: ratio(acc.stunted, acc.weighed),
            percent_underweight: ratio(acc.underweight, acc.weighed),
            percent_wasted: ratio(acc.wasted, acc.weighed),
            percent_weighed_of_target: ratio(acc.weighed, acc.target),
        })
        .collect()
}

/// Headline numbers of a snapshot.
#[derive(PartialEq, Debug, Clone)]
pub struct OverallSummary {
    pub total_weighed: Count,
    pub count_stunted: Count,
    pub count_underweight: Count,
    pub count_wasted: Count,
    pub target_total: Count,
    pub percent_stunted: f64,
    /// The mean of the facility stunting percentages, 0 without facilities.
    pub mean_facility_percent_stunted: f64,
    pub facility_count: usize,
    pub village_count: usize,
}

pub fn summarize_overall(schema: &StarSchema) -> OverallSummary {
    let total_weighed: Count = schema.facts.iter().map(|f| f.total_weighed).sum();
    let count_stunted: Count = schema.facts.iter().map(|f| f.count_stunted).sum();
    let count_underweight: Count = schema.facts.iter().map(|f| f.count_underweight).sum();
    let count_wasted: Count = schema.facts.iter().map(|f| f.count_wasted).sum();
    let facility_percents: Vec<f64> = summarize_facilities(&schema.facts)
        .iter()
        .map(|s| s.percent_stunted)
        .collect();
    let target_total: Count = schema.facts.iter().map(|f| f.target_total).sum();
    let mut facilities: Vec<&str> = schema
        .regions
        .iter()
        .map(|r| r.facility_name.as_str())
        .collect();
    facilities.sort_unstable();
    facilities.dedup();
    OverallSummary {
        total_weighed,
        count_stunted,
        count_underweight,
        count_wasted,
        target_total,
        percent_stunted: ratio(count_stunted, total_weighed),
        mean_facility_percent_stunted: mean(&facility_percents).unwrap_or(0.0),
        facility_count: facilities.len(),
        village_count: schema.regions.len(),
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// The number of villages in the highest and lowest rankings.
pub const RANKING_SIZE: usize = 10;

/// The stunting measures of one village, from the fact table or from a map.
#[derive(PartialEq, Debug, Clone)]
pub struct VillageMeasure {
    pub village_name: String,
    pub facility_name: String,
    pub total_weighed: Count,
    pub count_stunted: Count,
    pub percent_stunted: f64,
}

impl From<&FactRecord> for VillageMeasure {
    fn from(f: &FactRecord) -> VillageMeasure {
        VillageMeasure {
            village_name: f.village_name.clone(),
            facility_name: f.facility_name.clone(),
            total_weighed: f.total_weighed,
            count_stunted: f.count_stunted,
            percent_stunted: f.percent_stunted,
        }
    }
}

#[derive(PartialEq, Debug, Clone)]
pub struct CategoryCount {
    pub category: PrevalenceCategory,
    pub villages: usize,
    /// Share of the villages with data
    pub percent: f64,
}

/// Prevalence statistics over a list of villages.
///
/// A village has data when at least one stunted child is reported. The mean,
/// the lowest value, the categories and the rankings only consider the
/// villages with a prevalence above 0.
#[derive(PartialEq, Debug, Clone)]
pub struct VillageStats {
    pub village_count: usize,
    pub villages_with_data: usize,
    pub coverage_percent: f64,
    pub mean_percent_stunted: Option<f64>,
    /// First village with the highest prevalence, over all the villages
    pub highest: Option<VillageMeasure>,
    pub lowest: Option<VillageMeasure>,
    /// Sorted by category, the empty categories are left out.
    pub categories: Vec<CategoryCount>,
    pub top: Vec<VillageMeasure>,
    pub bottom: Vec<VillageMeasure>,
}

pub fn summarize_villages(villages: &[VillageMeasure]) -> VillageStats {
    let village_count = villages.len();
    let villages_with_data = villages.iter().filter(|v| v.count_stunted > 0.0).count();
    let coverage_percent = ratio(villages_with_data as f64, village_count as f64);

    let affected: Vec<&VillageMeasure> = villages
        .iter()
        .filter(|v| v.percent_stunted > 0.0)
        .collect();
    let percents: Vec<f64> = affected.iter().map(|v| v.percent_stunted).collect();

    // Ties keep the first village in input order.
    let mut highest: Option<&VillageMeasure> = None;
    for v in villages.iter() {
        if highest.map_or(true, |h| v.percent_stunted > h.percent_stunted) {
            highest = Some(v);
        }
    }
    let mut lowest: Option<&VillageMeasure> = None;
    for v in affected.iter() {
        if lowest.map_or(true, |l| v.percent_stunted < l.percent_stunted) {
            lowest = Some(v);
        }
    }

    let mut by_category: BTreeMap<PrevalenceCategory, usize> = BTreeMap::new();
    for v in affected.iter() {
        if let Some(c) = PrevalenceCategory::classify(v.percent_stunted) {
            *by_category.entry(c).or_default() += 1;
        }
    }
    let categories: Vec<CategoryCount> = by_category
        .into_iter()
        .map(|(category, n)| CategoryCount {
            category,
            villages: n,
            percent: ratio(n as f64, villages_with_data as f64),
        })
        .collect();

    // The sorts are stable: equal prevalences stay in input order.
    let mut descending = affected.clone();
    descending.sort_by(|a, b| b.percent_stunted.total_cmp(&a.percent_stunted));
    let mut ascending = affected;
    ascending.sort_by(|a, b| a.percent_stunted.total_cmp(&b.percent_stunted));

    debug!(
        "summarize_villages: {} villages, {} with data",
        village_count, villages_with_data
    );
    VillageStats {
        village_count,
        villages_with_data,
        coverage_percent,
        mean_percent_stunted: mean(&percents),
        highest: highest.cloned(),
        lowest: lowest.cloned(),
        categories,
        top: descending.into_iter().take(RANKING_SIZE).cloned().collect(),
        bottom: ascending.into_iter().take(RANKING_SIZE).cloned().collect(),
    }
}

/// The facts whose village name contains the query, ignoring case.
pub fn search_villages<'a>(facts: &'a [FactRecord], query: &str) -> Vec<&'a FactRecord> {
    let needle = query.trim().to_uppercase();
    facts
        .iter()
        .filter(|f| f.village_name.to_uppercase().contains(&needle))
        .collect()
}
