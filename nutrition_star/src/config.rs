// ********* Input data structures ***********

use std::error::Error;
use std::fmt::Display;

/// A count read from a report cell. Cells that are not numbers are read as 0.
pub type Count = f64;

/// Weight-for-age categories (BB/U).
#[derive(PartialEq, Debug, Clone, Copy, Default)]
pub struct WeightForAge {
    pub severely_underweight: Count,
    pub underweight: Count,
    pub normal: Count,
    pub overweight_risk: Count,
    pub outlier: Count,
}

/// Height-for-age categories (TB/U).
#[derive(PartialEq, Debug, Clone, Copy, Default)]
pub struct HeightForAge {
    pub severely_stunted: Count,
    pub stunted: Count,
    pub normal: Count,
    pub tall: Count,
    pub outlier: Count,
}

/// Weight-for-height categories (BB/TB).
#[derive(PartialEq, Debug, Clone, Copy, Default)]
pub struct WeightForHeight {
    pub severely_wasted: Count,
    pub wasted: Count,
    pub normal: Count,
    pub overweight_risk: Count,
    pub overweight: Count,
    pub obese: Count,
}

/// One row of the nutrition status report, as parsed by the readers.
///
/// The names are kept exactly as they appear in the report. Normalization
/// only happens when computing the join key.
#[derive(PartialEq, Debug, Clone, Default)]
pub struct NutritionRecord {
    pub facility_name: String,
    pub village_name: String,
    pub weight_for_age: WeightForAge,
    pub height_for_age: HeightForAge,
    pub weight_for_height: WeightForHeight,
}

impl NutritionRecord {
    /// All the children weighed: the sum of the weight-for-age categories.
    pub fn total_weighed(&self) -> Count {
        let w = &self.weight_for_age;
        w.severely_underweight + w.underweight + w.normal + w.overweight_risk + w.outlier
    }

    pub fn count_underweight(&self) -> Count {
        self.weight_for_age.severely_underweight + self.weight_for_age.underweight
    }

    pub fn count_stunted(&self) -> Count {
        self.height_for_age.severely_stunted + self.height_for_age.stunted
    }

    pub fn count_wasted(&self) -> Count {
        self.weight_for_height.severely_wasted + self.weight_for_height.wasted
    }

    pub fn join_key(&self) -> JoinKey {
        JoinKey::new(&self.facility_name, &self.village_name)
    }
}

/// One row of the target population report.
#[derive(PartialEq, Debug, Clone, Default)]
pub struct TargetRecord {
    pub facility_name: String,
    pub village_name: String,
    pub target_male: Count,
    pub target_female: Count,
    pub target_total: Count,
}

impl TargetRecord {
    pub fn join_key(&self) -> JoinKey {
        JoinKey::new(&self.facility_name, &self.village_name)
    }
}

/// The key associating the two reports: `FACILITY_VILLAGE`, both parts
/// trimmed and uppercased.
#[derive(Eq, PartialEq, Debug, Clone, Hash, PartialOrd, Ord)]
pub struct JoinKey(String);

impl JoinKey {
    pub fn new(facility_name: &str, village_name: &str) -> JoinKey {
        JoinKey(format!(
            "{}_{}",
            clean_name(facility_name),
            clean_name(village_name)
        ))
    }

    /// Both names were blank.
    pub fn is_blank(&self) -> bool {
        self.0 == "_"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for JoinKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trims and uppercases a locality name.
pub fn clean_name(name: &str) -> String {
    name.trim().to_uppercase()
}

// ********* Time dimension **********

const MONTH_NAMES: [&str; 12] = [
    "JANUARI",
    "FEBRUARI",
    "MARET",
    "APRIL",
    "MEI",
    "JUNI",
    "JULI",
    "AGUSTUS",
    "SEPTEMBER",
    "OKTOBER",
    "NOVEMBER",
    "DESEMBER",
];

/// The month of a report, rendered with its Indonesian name.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum Month {
    /// 1 to 12
    Known(u32),
    Unknown,
}

impl Month {
    pub fn from_number(n: u32) -> Month {
        if (1..=12).contains(&n) {
            Month::Known(n)
        } else {
            Month::Unknown
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Month::Known(n) => MONTH_NAMES[(*n - 1) as usize],
            Month::Unknown => "UNKNOWN",
        }
    }
}

impl Display for Month {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// When the nutrition report was generated.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub struct TimeRecord {
    pub year: i32,
    pub month: Month,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
}

impl TimeRecord {
    /// Used when the report does not carry a readable timestamp.
    pub const FALLBACK: TimeRecord = TimeRecord {
        year: 2025,
        month: Month::Unknown,
        day: 1,
        hour: 0,
        minute: 0,
    };
}

/// The single row of the time dimension. A run only ever processes one
/// snapshot, so the id is always 1.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub struct TimeDimension {
    pub time_id: u32,
    pub time: TimeRecord,
}

pub const SNAPSHOT_TIME_ID: u32 = 1;

// ******** Output data structures *********

/// A nutrition row joined with its target population and the derived indicators.
#[derive(PartialEq, Debug, Clone)]
pub struct IndicatorRecord {
    pub nutrition: NutritionRecord,
    /// The matching target row, if any.
    pub target: Option<TargetRecord>,
    pub total_weighed: Count,
    pub count_underweight: Count,
    pub count_stunted: Count,
    pub count_wasted: Count,
    pub percent_weighed_of_target: f64,
    pub percent_underweight: f64,
    pub percent_stunted: f64,
    pub percent_wasted: f64,
}

impl IndicatorRecord {
    /// 0 when no target row matched.
    pub fn target_total(&self) -> Count {
        self.target.as_ref().map(|t| t.target_total).unwrap_or(0.0)
    }
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct RegionDimension {
    pub region_id: u32,
    pub facility_name: String,
    pub village_name: String,
}

/// One row of the fact table. The field order is the column order of the
/// exported table.
#[derive(PartialEq, Debug, Clone)]
pub struct FactRecord {
    pub region_id: u32,
    pub time_id: u32,
    pub facility_name: String,
    pub village_name: String,
    pub target_total: Count,
    pub target_male: Option<Count>,
    pub target_female: Option<Count>,
    pub total_weighed: Count,
    pub percent_weighed_of_target: f64,
    pub count_underweight: Count,
    pub percent_underweight: f64,
    pub count_stunted: Count,
    pub percent_stunted: f64,
    pub count_wasted: Count,
    pub percent_wasted: f64,
    pub severely_underweight: Count,
    pub underweight: Count,
    pub severely_stunted: Count,
    pub stunted: Count,
    pub severely_wasted: Count,
    pub wasted: Count,
    pub obese: Count,
}

impl FactRecord {
    pub const COLUMNS: [&'static str; 22] = [
        "region_id",
        "time_id",
        "facility_name",
        "village_name",
        "target_total",
        "target_male",
        "target_female",
        "total_weighed",
        "percent_weighed_of_target",
        "count_underweight",
        "percent_underweight",
        "count_stunted",
        "percent_stunted",
        "count_wasted",
        "percent_wasted",
        "severely_underweight",
        "underweight",
        "severely_stunted",
        "stunted",
        "severely_wasted",
        "wasted",
        "obese",
    ];
}

/// All the tables produced by one run.
#[derive(PartialEq, Debug, Clone)]
pub struct StarSchema {
    pub facts: Vec<FactRecord>,
    pub regions: Vec<RegionDimension>,
    pub time: TimeDimension,
}

/// Errors that prevent the star schema from being assembled.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum StarError {
    /// An indicator row whose locality is missing from the region dimension.
    OrphanedFact {
        facility_name: String,
        village_name: String,
    },
}

impl Error for StarError {}

impl Display for StarError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StarError::OrphanedFact {
                facility_name,
                village_name,
            } => write!(
                f,
                "no region found for facility {:?} and village {:?}",
                facility_name, village_name
            ),
        }
    }
}
