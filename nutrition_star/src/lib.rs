mod config;
use log::{debug, info, warn};

use std::collections::{HashMap, HashSet};

pub mod builder;
pub mod summary;

pub use crate::config::*;

/// Computes `numerator / denominator` as a percentage.
///
/// A denominator of exactly 0 is replaced by 1: a locality with no target or
/// nobody weighed reports 0% instead of an undefined ratio.
pub fn percent(numerator: Count, denominator: Count) -> f64 {
    let denominator = if denominator == 0.0 { 1.0 } else { denominator };
    (numerator / denominator) * 100.0
}

/// Left join of the nutrition rows with the target rows.
///
/// Every nutrition row is kept, in input order. When several target rows share
/// the same key, the first one wins.
pub fn join_targets(
    nutrition: &[NutritionRecord],
    targets: &[TargetRecord],
) -> Vec<(NutritionRecord, Option<TargetRecord>)> {
    let mut by_key: HashMap<JoinKey, &TargetRecord> = HashMap::new();
    for t in targets.iter() {
        let key = t.join_key();
        if by_key.contains_key(&key) {
            warn!("join_targets: duplicate target key {}, keeping the first row", key);
        } else {
            by_key.insert(key, t);
        }
    }

    let mut unmatched = 0;
    let joined: Vec<(NutritionRecord, Option<TargetRecord>)> = nutrition
        .iter()
        .map(|n| {
            let target = by_key.get(&n.join_key()).map(|t| (*t).clone());
            if target.is_none() {
                debug!("join_targets: no target for key {}", n.join_key());
                unmatched += 1;
            }
            (n.clone(), target)
        })
        .collect();
    if unmatched > 0 {
        info!(
            "join_targets: {} of {} nutrition rows have no target row",
            unmatched,
            joined.len()
        );
    }
    joined
}

/// Adds the derived counts and the percentages. Rows without any name are dropped.
pub fn compute_indicators(
    joined: Vec<(NutritionRecord, Option<TargetRecord>)>,
) -> Vec<IndicatorRecord> {
    joined
        .into_iter()
        .map(|(nutrition, target)| {
            let total_weighed = nutrition.total_weighed();
            let count_underweight = nutrition.count_underweight();
            let count_stunted = nutrition.count_stunted();
            let count_wasted = nutrition.count_wasted();
            let target_total = target.as_ref().map(|t| t.target_total).unwrap_or(0.0);
            IndicatorRecord {
                percent_weighed_of_target: percent(total_weighed, target_total),
                percent_underweight: percent(count_underweight, total_weighed),
                percent_stunted: percent(count_stunted, total_weighed),
                percent_wasted: percent(count_wasted, total_weighed),
                nutrition,
                target,
                total_weighed,
                count_underweight,
                count_stunted,
                count_wasted,
            }
        })
        .filter(|ir| !ir.nutrition.join_key().is_blank())
        .collect()
}

/// Builds the region dimension: one row per distinct (facility, village)
/// pair, numbered from 1 in order of first appearance.
pub fn build_regions(indicators: &[IndicatorRecord]) -> Vec<RegionDimension> {
    let mut seen: HashSet<(&str, &str)> = HashSet::new();
    let mut regions: Vec<RegionDimension> = Vec::new();
    for ir in indicators.iter() {
        let pair = (
            ir.nutrition.facility_name.as_str(),
            ir.nutrition.village_name.as_str(),
        );
        if seen.insert(pair) {
            regions.push(RegionDimension {
                region_id: (regions.len() + 1) as u32,
                facility_name: pair.0.to_string(),
                village_name: pair.1.to_string(),
            });
        }
    }
    debug!("build_regions: {} regions", regions.len());
    regions
}

/// Attaches the surrogate keys to the indicator rows.
///
/// Fails if a row has no region: the region dimension is derived from the same
/// rows, so this is an internal inconsistency.
pub fn assemble_facts(
    indicators: &[IndicatorRecord],
    regions: &[RegionDimension],
    time: &TimeDimension,
) -> Result<Vec<FactRecord>, StarError> {
    let region_ids: HashMap<(&str, &str), u32> = regions
        .iter()
        .map(|r| {
            (
                (r.facility_name.as_str(), r.village_name.as_str()),
                r.region_id,
            )
        })
        .collect();

    let mut facts: Vec<FactRecord> = Vec::with_capacity(indicators.len());
    for ir in indicators.iter() {
        let n = &ir.nutrition;
        let region_id = *region_ids
            .get(&(n.facility_name.as_str(), n.village_name.as_str()))
            .ok_or_else(|| StarError::OrphanedFact {
                facility_name: n.facility_name.clone(),
                village_name: n.village_name.clone(),
            })?;
        facts.push(FactRecord {
            region_id,
            time_id: time.time_id,
            facility_name: n.facility_name.clone(),
            village_name: n.village_name.clone(),
            target_total: ir.target_total(),
            target_male: ir.target.as_ref().map(|t| t.target_male),
            target_female: ir.target.as_ref().map(|t| t.target_female),
            total_weighed: ir.total_weighed,
            percent_weighed_of_target: ir.percent_weighed_of_target,
            count_underweight: ir.count_underweight,
            percent_underweight: ir.percent_underweight,
            count_stunted: ir.count_stunted,
            percent_stunted: ir.percent_stunted,
            count_wasted: ir.count_wasted,
            percent_wasted: ir.percent_wasted,
            severely_underweight: n.weight_for_age.severely_underweight,
            underweight: n.weight_for_age.underweight,
            severely_stunted: n.height_for_age.severely_stunted,
            stunted: n.height_for_age.stunted,
            severely_wasted: n.weight_for_height.severely_wasted,
            wasted: n.weight_for_height.wasted,
            obese: n.weight_for_height.obese,
        });
    }
    Ok(facts)
}

/// Runs the whole reshaping: join, indicators, region dimension and facts.
///
/// Arguments:
/// * `nutrition` the rows of the nutrition status report
/// * `targets` the rows of the target population report
/// * `time` the timestamp of the nutrition report
pub fn build_star_schema(
    nutrition: &[NutritionRecord],
    targets: &[TargetRecord],
    time: TimeRecord,
) -> Result<StarSchema, StarError> {
    info!(
        "Processing {:?} nutrition rows and {:?} target rows",
        nutrition.len(),
        targets.len()
    );
    let joined = join_targets(nutrition, targets);
    let indicators = compute_indicators(joined);
    let regions = build_regions(&indicators);
    let time = TimeDimension {
        time_id: SNAPSHOT_TIME_ID,
        time,
    };
    let facts = assemble_facts(&indicators, &regions, &time)?;
    info!(
        "Built {} facts over {} regions for {} {}",
        facts.len(),
        regions.len(),
        time.time.month,
        time.time.year
    );
    Ok(StarSchema {
        facts,
        regions,
        time,
    })
}
