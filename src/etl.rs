use log::{debug, info, warn};

use nutrition_star::builder::SnapshotBuilder;
use nutrition_star::*;
use snafu::{prelude::*, Snafu};

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::json;
use serde_json::Value as JSValue;
use text_diff::print_diff;

use crate::etl::config_reader::*;
use crate::etl::normalize::{ensure_xlsx, Conversion};

pub mod config_reader;
pub mod export;
pub mod geo;
pub mod io_common;
pub mod io_nutrition;
pub mod io_target;
pub mod io_time;
pub mod normalize;
pub mod staging;

pub const SUCCESS_MESSAGE: &str = "ETL completed successfully";

/// Shown next to any failure message. It does not depend on the failure.
pub const TROUBLESHOOTING: &str = "Things to check:
  - both files were provided: the nutrition status report and the target population report
  - the data starts on the 4th row of each sheet (3 header rows, the first one holding the report date)
  - the nutrition sheet has 19 columns and the target sheet has 6 columns, in the expected order";

#[derive(Debug, Snafu)]
pub enum EtlError {
    #[snafu(display("Error opening workbook {path}"))]
    OpeningWorkbook {
        source: calamine::Error,
        path: String,
    },
    #[snafu(display("Workbook {path} does not contain any worksheet"))]
    EmptyWorkbook { path: String },
    #[snafu(display(
        "Worksheet in {path} has {found} columns, at least {expected} are expected"
    ))]
    MissingColumns {
        path: String,
        expected: usize,
        found: usize,
    },
    #[snafu(display("Error reading {path}"))]
    ReadingFile {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error writing {path}"))]
    WritingFile {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error writing workbook {path}"))]
    WritingWorkbook {
        source: rust_xlsxwriter::XlsxError,
        path: String,
    },
    #[snafu(display("Error writing table {path}"))]
    WritingCsv { source: csv::Error, path: String },
    #[snafu(display("Error parsing JSON file {path}"))]
    ParsingJson {
        source: serde_json::Error,
        path: String,
    },
    #[snafu(display("Error serializing JSON"))]
    SerializingJson { source: serde_json::Error },
    #[snafu(display("Inconsistent star schema"))]
    Star { source: StarError },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

pub type EtlResult<T> = Result<T, EtlError>;

/// The result of one run. The run either produces all the tables or none.
#[derive(Debug)]
pub struct EtlOutcome {
    pub success: bool,
    pub message: String,
    pub schema: Option<StarSchema>,
    /// Problems that did not stop the run, such as a legacy file that could
    /// not be converted.
    pub warnings: Vec<String>,
}

/// The error and all its causes, on one line.
pub fn describe(e: &EtlError) -> String {
    let mut msg = e.to_string();
    let mut cur: Option<&(dyn std::error::Error + 'static)> = std::error::Error::source(e);
    while let Some(c) = cur {
        msg.push_str(": ");
        msg.push_str(&c.to_string());
        cur = c.source();
    }
    msg
}

fn record_conversion(path: &Path, conversion: &Conversion, warnings: &mut Vec<String>) {
    if let Conversion::FellBack { reason } = conversion {
        let w = format!(
            "{} could not be converted from the legacy format ({}), it was read as is",
            path.display(),
            reason
        );
        warn!("{}", w);
        warnings.push(w);
    }
}

fn process(
    nutrition_path: &Path,
    target_path: &Path,
    warnings: &mut Vec<String>,
) -> EtlResult<StarSchema> {
    let nutrition_file = ensure_xlsx(nutrition_path);
    record_conversion(nutrition_path, &nutrition_file.conversion, warnings);
    let target_file = ensure_xlsx(target_path);
    record_conversion(target_path, &target_file.conversion, warnings);

    let nutrition_sheet = io_common::open_sheet(&nutrition_file.path)?;
    let time = io_time::extract_time(&nutrition_sheet);
    info!("Report time: {:?}", time);

    let mut builder = SnapshotBuilder::new(time);
    builder.extend_nutrition(io_nutrition::parse_nutrition(&nutrition_sheet)?);

    let target_sheet = io_common::open_sheet(&target_file.path)?;
    builder.extend_targets(io_target::parse_targets(&target_sheet)?);

    builder.build().context(StarSnafu {})
}

/// Runs the whole pipeline on the two reports.
///
/// This never fails: any error is turned into an unsuccessful outcome
/// carrying the error message.
pub fn run_etl(nutrition_path: &Path, target_path: &Path) -> EtlOutcome {
    info!(
        "Running ETL on {:?} and {:?}",
        nutrition_path.display(),
        target_path.display()
    );
    let mut warnings: Vec<String> = Vec::new();
    match process(nutrition_path, target_path, &mut warnings) {
        Ok(schema) => EtlOutcome {
            success: true,
            message: SUCCESS_MESSAGE.to_string(),
            schema: Some(schema),
            warnings,
        },
        Err(e) => {
            warn!("Error occured {:?}", e);
            let mut message = format!("Error: {}", describe(&e));
            for w in warnings.iter() {
                message.push_str(&format!(" ({})", w));
            }
            EtlOutcome {
                success: false,
                message,
                schema: None,
                warnings,
            }
        }
    }
}

/// Copies the two reports into a scratch directory before running the
/// pipeline. The directory, including any converted workbook, is removed
/// once the run is over.
pub fn run_etl_staged(nutrition_path: &Path, target_path: &Path) -> EtlOutcome {
    match staging::StagedUploads::new() {
        Ok(staged) => run_etl_in(staged, nutrition_path, target_path),
        Err(e) => EtlOutcome {
            success: false,
            message: format!("Error: {}", describe(&e)),
            schema: None,
            warnings: vec![],
        },
    }
}

fn run_etl_in(
    staged: staging::StagedUploads,
    nutrition_path: &Path,
    target_path: &Path,
) -> EtlOutcome {
    let staged_paths = staged
        .stage_file(nutrition_path)
        .and_then(|n| staged.stage_file(target_path).map(|t| (n, t)));
    let outcome = match staged_paths {
        Ok((n, t)) => run_etl(&n, &t),
        Err(e) => EtlOutcome {
            success: false,
            message: format!("Error: {}", describe(&e)),
            schema: None,
            warnings: vec![],
        },
    };
    staged.release();
    outcome
}

fn village_js(v: &summary::VillageMeasure) -> JSValue {
    json!({
        "village": v.village_name,
        "facility": v.facility_name,
        "weighed": v.total_weighed,
        "stunted": v.count_stunted,
        "percentStunted": round2(v.percent_stunted),
    })
}

fn village_stats_js(stats: &summary::VillageStats) -> JSValue {
    let categories: Vec<JSValue> = stats
        .categories
        .iter()
        .map(|c| {
            json!({
                "category": c.category.label(),
                "villages": c.villages,
                "percent": round2(c.percent),
            })
        })
        .collect();
    json!({
        "villages": stats.village_count,
        "villagesWithData": stats.villages_with_data,
        "coveragePercent": round2(stats.coverage_percent),
        "meanPercentStunted": stats.mean_percent_stunted.map(round2),
        "highest": stats.highest.as_ref().map(village_js),
        "lowest": stats.lowest.as_ref().map(village_js),
        "categories": categories,
        "top": stats.top.iter().map(village_js).collect::<Vec<JSValue>>(),
        "bottom": stats.bottom.iter().map(village_js).collect::<Vec<JSValue>>(),
    })
}

/// The content of `summary.json`. The map statistics are only present when
/// village boundaries were provided.
pub fn build_summary_js(
    schema: &StarSchema,
    map_stats: Option<&summary::VillageStats>,
) -> JSValue {
    let overall = summary::summarize_overall(schema);
    let facilities: Vec<JSValue> = summary::summarize_facilities(&schema.facts)
        .iter()
        .map(|s| {
            json!({
                "facility": s.facility_name,
                "weighed": s.total_weighed,
                "stunted": s.count_stunted,
                "underweight": s.count_underweight,
                "wasted": s.count_wasted,
                "target": s.target_total,
                "percentStunted": round2(s.percent_stunted),
                "percentUnderweight": round2(s.percent_underweight),
                "percentWasted": round2(s.percent_wasted),
                "percentWeighedOfTarget": round2(s.percent_weighed_of_target),
                "category": s.category().map(|c| c.label()),
            })
        })
        .collect();
    let villages: Vec<summary::VillageMeasure> =
        schema.facts.iter().map(summary::VillageMeasure::from).collect();
    let t = schema.time.time;
    let mut js = json!({
        "time": {
            "year": t.year,
            "month": t.month.name(),
            "day": t.day,
            "hour": t.hour,
            "minute": t.minute,
        },
        "overall": {
            "weighed": overall.total_weighed,
            "stunted": overall.count_stunted,
            "underweight": overall.count_underweight,
            "wasted": overall.count_wasted,
            "target": overall.target_total,
            "percentStunted": round2(overall.percent_stunted),
            "meanFacilityPercentStunted": round2(overall.mean_facility_percent_stunted),
            "facilities": overall.facility_count,
            "villages": overall.village_count,
        },
        "facilities": facilities,
        "villages": village_stats_js(&summary::summarize_villages(&villages)),
    });
    if let Some(stats) = map_stats {
        js["map"] = village_stats_js(stats);
    }
    js
}

pub(crate) fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Writes the tables and the other outputs requested by the settings.
pub fn publish(schema: &StarSchema, settings: &RunSettings) -> EtlResult<()> {
    let out_dir = settings.output_directory.clone();
    fs::create_dir_all(&out_dir).context(WritingFileSnafu {
        path: out_dir.display().to_string(),
    })?;

    if settings.write_csv {
        let written = export::write_tables(schema, &out_dir)?;
        info!("Exported {} tables to {:?}", written.len(), out_dir.display());
    }

    let map_stats = match &settings.boundaries {
        Some(boundaries) => {
            let mut loader = geo::BoundaryLoader::new(&boundaries.village_property);
            let villages = loader.load(&boundaries.file_path)?;
            let layer = geo::map_layer(&villages, &schema.facts);
            let layer_path = out_dir.join("map_layer.geojson");
            geo::write_layer(&layer, &layer_path)?;
            info!(
                "Map layer with {} villages written to {:?}",
                layer.len(),
                layer_path.display()
            );
            Some(geo::layer_stats(&layer))
        }
        None => None,
    };

    let summary_js = build_summary_js(schema, map_stats.as_ref());
    let pretty_js_summary = serde_json::to_string_pretty(&summary_js).context(SerializingJsonSnafu {})?;
    let summary_path: PathBuf = out_dir.join("summary.json");
    fs::write(&summary_path, &pretty_js_summary).context(WritingFileSnafu {
        path: summary_path.display().to_string(),
    })?;
    debug!("publish: summary: {}", pretty_js_summary);

    // The reference summary, if provided for comparison
    if let Some(reference_p) = &settings.reference {
        check_reference(&pretty_js_summary, reference_p)?;
    }
    Ok(())
}

fn check_reference(pretty_js_summary: &str, reference_p: &Path) -> EtlResult<()> {
    let reference_path = reference_p.display().to_string();
    let contents = fs::read_to_string(reference_p).context(ReadingFileSnafu {
        path: reference_path.clone(),
    })?;
    let summary_ref: JSValue = serde_json::from_str(&contents).context(ParsingJsonSnafu {
        path: reference_path,
    })?;
    let pretty_js_summary_ref =
        serde_json::to_string_pretty(&summary_ref).context(SerializingJsonSnafu {})?;
    if pretty_js_summary_ref != pretty_js_summary {
        warn!("Found differences with the reference summary");
        print_diff(pretty_js_summary_ref.as_str(), pretty_js_summary, "\n");
        whatever!("Difference detected between calculated summary and reference summary")
    }
    info!("Summary matches the reference {:?}", reference_p.display());
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rust_xlsxwriter::Workbook;
    use tempfile::TempDir;

    pub(crate) const NUTRITION_HEADER: &str = "Data Tanggal : 2025-03-15 08:30:00";

    /// Writes a workbook with the given first cell, 2 more header rows and the rows.
    pub(crate) fn write_report(path: &Path, first_cell: Option<&str>, rows: &[Vec<&str>]) {
        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        if let Some(c) = first_cell {
            worksheet.write_string(0, 0, c).unwrap();
        }
        worksheet.write_string(2, 0, "No").unwrap();
        worksheet.write_string(2, 1, "Puskesmas").unwrap();
        worksheet.write_string(2, 2, "Desa").unwrap();
        for (r, row) in rows.iter().enumerate() {
            for (c, v) in row.iter().enumerate() {
                let (row_num, col_num) = ((r + 3) as u32, c as u16);
                match v.parse::<f64>() {
                    Ok(x) => worksheet.write_number(row_num, col_num, x).unwrap(),
                    Err(_) => worksheet.write_string(row_num, col_num, *v).unwrap(),
                };
            }
        }
        workbook.save(path).unwrap();
    }

    pub(crate) fn nutrition_row<'a>(
        no: &'a str,
        facility: &'a str,
        village: &'a str,
        counts: [&'a str; 16],
    ) -> Vec<&'a str> {
        let mut row = vec![no, facility, village];
        row.extend(counts);
        row
    }

    pub(crate) const VILLAGE_X_COUNTS: [&str; 16] = [
        "1", "2", "10", "0", "0", "2", "3", "9", "0", "0", "0", "1", "11", "0", "0", "0",
    ];

    fn write_inputs(dir: &TempDir) -> (PathBuf, PathBuf) {
        let nutrition_path = dir.path().join("gizi.xlsx");
        write_report(
            &nutrition_path,
            Some("2025-03-15 08:30:00"),
            &[
                nutrition_row("1", "Puskesmas A", "Desa X", VILLAGE_X_COUNTS),
                nutrition_row("2", "Puskesmas A", "Desa Y", VILLAGE_X_COUNTS),
                nutrition_row("", "Jumlah Total", "", VILLAGE_X_COUNTS),
            ],
        );
        let target_path = dir.path().join("sasaran.xlsx");
        write_report(
            &target_path,
            None,
            &[
                vec!["1", "PUSKESMAS A", "DESA X", "10", "10", "20"],
                vec!["2", "PUSKESMAS A", "DESA Z", "5", "5", "10"],
            ],
        );
        (nutrition_path, target_path)
    }

    #[test]
    fn end_to_end() {
        let dir = TempDir::new().unwrap();
        let (nutrition_path, target_path) = write_inputs(&dir);
        let outcome = run_etl(&nutrition_path, &target_path);
        assert!(outcome.success, "{}", outcome.message);
        assert_eq!(outcome.message, SUCCESS_MESSAGE);
        assert!(outcome.warnings.is_empty());

        let schema = outcome.schema.unwrap();
        assert_eq!(schema.time.time_id, 1);
        assert_eq!(schema.time.time.month, Month::Known(3));
        assert_eq!(schema.time.time.year, 2025);
        assert_eq!(schema.time.time.minute, 30);
        assert_eq!(schema.regions.len(), 2);

        let x = &schema.facts[0];
        assert_eq!(x.village_name, "Desa X");
        assert_eq!(x.total_weighed, 13.0);
        assert_eq!(x.count_stunted, 5.0);
        assert_eq!(x.target_total, 20.0);
        assert_eq!(round2(x.percent_weighed_of_target), 65.0);
        assert_eq!(round2(x.percent_underweight), 23.08);
        assert_eq!(round2(x.percent_stunted), 38.46);

        // No target row for this village.
        let y = &schema.facts[1];
        assert_eq!(y.region_id, 2);
        assert_eq!(y.target_total, 0.0);
    }

    #[test]
    fn staged_run_cleans_up() {
        let dir = TempDir::new().unwrap();
        let (nutrition_path, target_path) = write_inputs(&dir);
        let outcome = run_etl_staged(&nutrition_path, &target_path);
        assert!(outcome.success, "{}", outcome.message);
        assert_eq!(outcome.schema.unwrap().facts.len(), 2);

        // A legacy input is converted next to its copy, and both go away.
        let legacy = dir.path().join("broken.xls");
        fs::write(&legacy, "<table><tr><td>x</td></tr></table>").unwrap();
        for (n, t) in [(&nutrition_path, &target_path), (&legacy, &target_path)] {
            let staged = staging::StagedUploads::new().unwrap();
            let staged_dir = staged.path().to_path_buf();
            assert!(staged_dir.exists());
            run_etl_in(staged, n, t);
            assert!(!staged_dir.exists());
        }
        assert!(!dir.path().join("broken.xlsx").exists());
    }

    #[test]
    fn staging_failure_is_a_failed_outcome() {
        let dir = TempDir::new().unwrap();
        let (_, target_path) = write_inputs(&dir);
        let staged = staging::StagedUploads::new().unwrap();
        let staged_dir = staged.path().to_path_buf();
        let outcome = run_etl_in(staged, &dir.path().join("missing.xls"), &target_path);
        assert!(!outcome.success);
        assert!(outcome.message.starts_with("Error: "), "{}", outcome.message);
        assert!(!staged_dir.exists());
    }

    #[test]
    fn missing_file_is_a_failed_outcome() {
        let dir = TempDir::new().unwrap();
        let (_, target_path) = write_inputs(&dir);
        let outcome = run_etl(&dir.path().join("missing.xlsx"), &target_path);
        assert!(!outcome.success);
        assert!(outcome.schema.is_none());
        assert!(outcome.message.starts_with("Error: "), "{}", outcome.message);
    }

    #[test]
    fn fallback_is_reported() {
        let dir = TempDir::new().unwrap();
        let (_, target_path) = write_inputs(&dir);
        // gizi.xlsx already exists: the legacy file needs another stem.
        let legacy = dir.path().join("broken.xls");
        fs::write(&legacy, "<html><body><p>Nothing here</p></body></html>").unwrap();
        let outcome = run_etl(&legacy, &target_path);
        assert!(!outcome.success);
        assert!(!dir.path().join("broken.xlsx").exists());
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.message.contains("legacy format"), "{}", outcome.message);
    }

    #[test]
    fn too_few_columns() {
        let dir = TempDir::new().unwrap();
        let (nutrition_path, _) = write_inputs(&dir);
        let narrow = dir.path().join("narrow.xlsx");
        write_report(&narrow, None, &[vec!["1", "PUSKESMAS A", "DESA X", "10"]]);
        let outcome = run_etl(&nutrition_path, &narrow);
        assert!(!outcome.success);
        assert!(outcome.message.contains("at least 6"), "{}", outcome.message);
    }

    #[test]
    fn summary_js() {
        let dir = TempDir::new().unwrap();
        let (nutrition_path, target_path) = write_inputs(&dir);
        let schema = run_etl(&nutrition_path, &target_path).schema.unwrap();
        let js = build_summary_js(&schema, None);
        assert_eq!(js["time"]["month"], "MARET");
        assert_eq!(js["overall"]["villages"], 2);
        assert_eq!(js["overall"]["underweight"], 6.0);
        assert_eq!(js["overall"]["wasted"], 2.0);
        // One facility at 10 stunted out of 26 weighed
        assert_eq!(js["overall"]["meanFacilityPercentStunted"], 38.46);
        assert_eq!(js["villages"]["villagesWithData"], 2);
        assert_eq!(js["villages"]["highest"]["village"], "Desa X");
        assert_eq!(js["villages"]["top"].as_array().unwrap().len(), 2);
        assert_eq!(js["villages"]["categories"][0]["category"], "Very high (>20%)");
        assert_eq!(js["villages"]["categories"][0]["villages"], 2);
        assert!(js.get("map").is_none());
        assert_eq!(js["facilities"][0]["facility"], "Puskesmas A");
        assert_eq!(js["facilities"][0]["weighed"], 26.0);
    }

    #[test]
    fn publish_and_check_reference() {
        let dir = TempDir::new().unwrap();
        let (nutrition_path, target_path) = write_inputs(&dir);
        let schema = run_etl(&nutrition_path, &target_path).schema.unwrap();
        let out_dir = dir.path().join("out");
        let mut settings = RunSettings::new(nutrition_path, target_path);
        settings.output_directory = out_dir.clone();
        publish(&schema, &settings).unwrap();
        assert!(out_dir.join("facts.csv").exists());
        assert!(out_dir.join("summary.json").exists());

        // The summary that was just written is a valid reference.
        settings.reference = Some(out_dir.join("summary.json"));
        publish(&schema, &settings).unwrap();

        let other = dir.path().join("other.json");
        fs::write(&other, "{\"results\": []}").unwrap();
        settings.reference = Some(other);
        assert!(publish(&schema, &settings).is_err());
    }

    #[test]
    fn publish_with_boundaries() {
        let dir = TempDir::new().unwrap();
        let (nutrition_path, target_path) = write_inputs(&dir);
        let schema = run_etl(&nutrition_path, &target_path).schema.unwrap();
        let boundaries_path = dir.path().join("desa.geojson");
        let boundaries = json!({
            "type": "FeatureCollection",
            "features": [
                { "type": "Feature", "properties": { "NAMOBJ": "DESA Y" }, "geometry": null },
                { "type": "Feature", "properties": { "NAMOBJ": "Desa W" }, "geometry": null },
            ]
        });
        fs::write(&boundaries_path, boundaries.to_string()).unwrap();

        let out_dir = dir.path().join("out");
        let mut settings = RunSettings::new(nutrition_path, target_path);
        settings.output_directory = out_dir.clone();
        settings.write_csv = false;
        settings.boundaries = Some(BoundarySettings {
            file_path: boundaries_path,
            village_property: "NAMOBJ".to_string(),
        });
        publish(&schema, &settings).unwrap();
        assert!(!out_dir.join("facts.csv").exists());
        assert!(out_dir.join("map_layer.geojson").exists());

        let js: JSValue =
            serde_json::from_str(&fs::read_to_string(out_dir.join("summary.json")).unwrap()).unwrap();
        assert_eq!(js["map"]["villages"], 2);
        assert_eq!(js["map"]["villagesWithData"], 1);
        assert_eq!(js["map"]["coveragePercent"], 50.0);
        assert_eq!(js["map"]["highest"]["village"], "DESA Y");
        assert_eq!(js["map"]["lowest"]["facility"], "Puskesmas A");
    }
}
