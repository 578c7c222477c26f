pub use crate::config::*;

/// A builder that collects the rows of both reports before assembling the
/// star schema.
///
/// ```
/// use nutrition_star::builder::SnapshotBuilder;
/// use nutrition_star::{NutritionRecord, TargetRecord, TimeRecord};
///
/// let mut builder = SnapshotBuilder::new(TimeRecord::FALLBACK);
/// builder.add_nutrition(NutritionRecord {
///     facility_name: "Cigugur".to_string(),
///     village_name: "Cisantana".to_string(),
///     ..Default::default()
/// });
/// builder.add_target(TargetRecord {
///     facility_name: "CIGUGUR".to_string(),
///     village_name: "CISANTANA".to_string(),
///     target_total: 12.0,
///     ..Default::default()
/// });
///
/// let schema = builder.build()?;
/// assert_eq!(schema.facts.len(), 1);
/// assert_eq!(schema.facts[0].target_total, 12.0);
/// # Ok::<(), nutrition_star::StarError>(())
/// ```
pub struct SnapshotBuilder {
    pub(crate) _time: TimeRecord,
    pub(crate) _nutrition: Vec<NutritionRecord>,
    pub(crate) _targets: Vec<TargetRecord>,
}

impl SnapshotBuilder {
    pub fn new(time: TimeRecord) -> SnapshotBuilder {
        SnapshotBuilder {
            _time: time,
            _nutrition: Vec::new(),
            _targets: Vec::new(),
        }
    }

    pub fn add_nutrition(&mut self, record: NutritionRecord) {
        self._nutrition.push(record);
    }

    pub fn add_target(&mut self, record: TargetRecord) {
        self._targets.push(record);
    }

    pub fn extend_nutrition(&mut self, records: Vec<NutritionRecord>) {
        self._nutrition.extend(records);
    }

    pub fn extend_targets(&mut self, records: Vec<TargetRecord>) {
        self._targets.extend(records);
    }

    pub fn build(&self) -> Result<StarSchema, StarError> {
        crate::build_star_schema(&self._nutrition, &self._targets, self._time)
    }
}
