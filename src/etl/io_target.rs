use crate::etl::io_common::Sheet;
use crate::etl::*;

/// Columns of the target population report: row number, facility, village,
/// male, female, total.
pub const TARGET_COLUMNS: usize = 6;

pub fn parse_targets(sheet: &Sheet) -> EtlResult<Vec<TargetRecord>> {
    let res: Vec<TargetRecord> = sheet
        .data_rows(TARGET_COLUMNS)?
        .iter()
        .map(|row| {
            let record = TargetRecord {
                facility_name: row.facility.clone(),
                village_name: row.village.clone(),
                target_male: row.count(3),
                target_female: row.count(4),
                target_total: row.count(5),
            };
            debug!("parse_targets: line {}: {:?}", row.lineno, record);
            record
        })
        .collect();
    info!("Read {} target rows from {:?}", res.len(), sheet.path);
    Ok(res)
}
