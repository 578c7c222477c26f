use crate::etl::io_common::Sheet;
use crate::etl::*;

/// Columns of the nutrition status report: row number, facility, village,
/// then the 5 weight-for-age, 5 height-for-age and 6 weight-for-height categories.
pub const NUTRITION_COLUMNS: usize = 19;

// First column of each anthropometric index
const WEIGHT_FOR_AGE: usize = 3;
const HEIGHT_FOR_AGE: usize = 8;
const WEIGHT_FOR_HEIGHT: usize = 13;

pub fn parse_nutrition(sheet: &Sheet) -> EtlResult<Vec<NutritionRecord>> {
    let rows = sheet.data_rows(NUTRITION_COLUMNS)?;
    let mut res: Vec<NutritionRecord> = Vec::with_capacity(rows.len());
    for row in rows.iter() {
        let wfa = |i: usize| row.count(WEIGHT_FOR_AGE + i);
        let hfa = |i: usize| row.count(HEIGHT_FOR_AGE + i);
        let wfh = |i: usize| row.count(WEIGHT_FOR_HEIGHT + i);
        let record = NutritionRecord {
            facility_name: row.facility.clone(),
            village_name: row.village.clone(),
            weight_for_age: WeightForAge {
                severely_underweight: wfa(0),
                underweight: wfa(1),
                normal: wfa(2),
                overweight_risk: wfa(3),
                outlier: wfa(4),
            },
            height_for_age: HeightForAge {
                severely_stunted: hfa(0),
                stunted: hfa(1),
                normal: hfa(2),
                tall: hfa(3),
                outlier: hfa(4),
            },
            weight_for_height: WeightForHeight {
                severely_wasted: wfh(0),
                wasted: wfh(1),
                normal: wfh(2),
                overweight_risk: wfh(3),
                overweight: wfh(4),
                obese: wfh(5),
            },
        };
        debug!("parse_nutrition: line {}: {:?}", row.lineno, record);
        res.push(record);
    }
    info!(
        "Read {} nutrition rows from {:?}",
        res.len(),
        sheet.path
    );
    Ok(res)
}
