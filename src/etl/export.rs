// CSV exports of the star schema.

use csv::Writer;

use crate::etl::*;
use nutrition_star::summary::summarize_facilities;

fn optional(x: Option<Count>) -> String {
    x.map(|v| v.to_string()).unwrap_or_default()
}

fn fact_row(f: &FactRecord) -> Vec<String> {
    vec![
        f.region_id.to_string(),
        f.time_id.to_string(),
        f.facility_name.clone(),
        f.village_name.clone(),
        f.target_total.to_string(),
        optional(f.target_male),
        optional(f.target_female),
        f.total_weighed.to_string(),
        f.percent_weighed_of_target.to_string(),
        f.count_underweight.to_string(),
        f.percent_underweight.to_string(),
        f.count_stunted.to_string(),
        f.percent_stunted.to_string(),
        f.count_wasted.to_string(),
        f.percent_wasted.to_string(),
        f.severely_underweight.to_string(),
        f.underweight.to_string(),
        f.severely_stunted.to_string(),
        f.stunted.to_string(),
        f.severely_wasted.to_string(),
        f.wasted.to_string(),
        f.obese.to_string(),
    ]
}

fn write_csv(path: &Path, header: &[&str], rows: Vec<Vec<String>>) -> EtlResult<()> {
    let p = path.display().to_string();
    let mut wtr = Writer::from_path(path).context(WritingCsvSnafu { path: p.clone() })?;
    wtr.write_record(header)
        .context(WritingCsvSnafu { path: p.clone() })?;
    let num_rows = rows.len();
    for row in rows {
        wtr.write_record(&row)
            .context(WritingCsvSnafu { path: p.clone() })?;
    }
    wtr.flush().context(WritingFileSnafu { path: p.clone() })?;
    debug!("write_csv: {}: {} rows", p, num_rows);
    Ok(())
}

/// Writes the fact table, the two dimensions and the facility summary in
/// `out_dir`. Returns the paths of the written files.
pub fn write_tables(schema: &StarSchema, out_dir: &Path) -> EtlResult<Vec<PathBuf>> {
    let mut written: Vec<PathBuf> = Vec::new();

    let facts_path = out_dir.join("facts.csv");
    write_csv(
        &facts_path,
        &FactRecord::COLUMNS,
        schema.facts.iter().map(fact_row).collect(),
    )?;
    written.push(facts_path);

    let regions_path = out_dir.join("regions.csv");
    write_csv(
        &regions_path,
        &["region_id", "facility_name", "village_name"],
        schema
            .regions
            .iter()
            .map(|r| {
                vec![
                    r.region_id.to_string(),
                    r.facility_name.clone(),
                    r.village_name.clone(),
                ]
            })
            .collect(),
    )?;
    written.push(regions_path);

    let time_path = out_dir.join("time.csv");
    let t = schema.time.time;
    write_csv(
        &time_path,
        &["time_id", "year", "month", "day", "hour", "minute"],
        vec![vec![
            schema.time.time_id.to_string(),
            t.year.to_string(),
            t.month.name().to_string(),
            t.day.to_string(),
            t.hour.to_string(),
            t.minute.to_string(),
        ]],
    )?;
    written.push(time_path);

    let summary_path = out_dir.join("facility_summary.csv");
    write_csv(
        &summary_path,
        &[
            "facility_name",
            "total_weighed",
            "count_stunted",
            "count_underweight",
            "count_wasted",
            "target_total",
            "percent_stunted",
            "percent_underweight",
            "percent_wasted",
            "percent_weighed_of_target",
            "category",
        ],
        summarize_facilities(&schema.facts)
            .iter()
            .map(|s| {
                vec![
                    s.facility_name.clone(),
                    s.total_weighed.to_string(),
                    s.count_stunted.to_string(),
                    s.count_underweight.to_string(),
                    s.count_wasted.to_string(),
                    s.target_total.to_string(),
                    round2(s.percent_stunted).to_string(),
                    round2(s.percent_underweight).to_string(),
                    round2(s.percent_wasted).to_string(),
                    round2(s.percent_weighed_of_target).to_string(),
                    s.category().map(|c| c.label()).unwrap_or_default().to_string(),
                ]
            })
            .collect(),
    )?;
    written.push(summary_path);

    Ok(written)
}
