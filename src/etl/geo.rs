/*!
Village boundaries and the map layer.

The boundaries are a GeoJSON `FeatureCollection`, one feature per village. The
village name is read from one of the feature properties. The map layer is the
same collection with the measures of the matching village added to the
properties of each feature.
*/

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Map as JSMap;

use crate::etl::*;
use nutrition_star::summary::{summarize_villages, PrevalenceCategory, VillageMeasure, VillageStats};

/// Facility name of the villages without data.
pub const NO_FACILITY: &str = "N/A";

#[derive(PartialEq, Debug, Clone)]
pub struct VillageFeature {
    /// The value of the village property, empty if missing.
    pub name: String,
    pub properties: JSMap<String, JSValue>,
    pub geometry: JSValue,
}

#[derive(PartialEq, Debug, Clone)]
pub struct VillageBoundaries {
    pub features: Vec<VillageFeature>,
}

impl VillageBoundaries {
    pub fn from_geojson(js: &JSValue, village_property: &str) -> EtlResult<VillageBoundaries> {
        if js["type"].as_str() != Some("FeatureCollection") {
            whatever!("Expected a GeoJSON FeatureCollection, found {:?}", js["type"])
        }
        let raw_features = match js["features"].as_array() {
            Some(l) => l,
            None => whatever!("The FeatureCollection has no features array"),
        };
        let mut features: Vec<VillageFeature> = Vec::new();
        for (idx, f) in raw_features.iter().enumerate() {
            let properties = f["properties"].as_object().cloned().unwrap_or_default();
            let name = match properties.get(village_property) {
                Some(JSValue::String(s)) => s.clone(),
                _ => {
                    debug!(
                        "from_geojson: feature {}: no {:?} property",
                        idx, village_property
                    );
                    String::new()
                }
            };
            features.push(VillageFeature {
                name,
                properties,
                geometry: f["geometry"].clone(),
            });
        }
        Ok(VillageBoundaries { features })
    }
}

/// Loads boundary files, keeping each of them in memory after the first read.
pub struct BoundaryLoader {
    village_property: String,
    cache: HashMap<PathBuf, Arc<VillageBoundaries>>,
}

impl BoundaryLoader {
    pub fn new(village_property: &str) -> BoundaryLoader {
        BoundaryLoader::with_cache(village_property, HashMap::new())
    }

    /// Starts from already loaded boundaries. The file system is not read
    /// for the paths of the cache.
    pub fn with_cache(
        village_property: &str,
        cache: HashMap<PathBuf, Arc<VillageBoundaries>>,
    ) -> BoundaryLoader {
        BoundaryLoader {
            village_property: village_property.to_string(),
            cache,
        }
    }

    pub fn load(&mut self, path: &Path) -> EtlResult<Arc<VillageBoundaries>> {
        if let Some(b) = self.cache.get(path) {
            debug!("load: {:?}: cached", path.display());
            return Ok(b.clone());
        }
        let p = path.display().to_string();
        info!("Loading village boundaries from {:?}", p);
        let contents = fs::read_to_string(path).context(ReadingFileSnafu { path: p.clone() })?;
        let js: JSValue = serde_json::from_str(&contents).context(ParsingJsonSnafu { path: p })?;
        let boundaries = Arc::new(VillageBoundaries::from_geojson(&js, &self.village_property)?);
        info!("{} village boundaries loaded", boundaries.features.len());
        self.cache.insert(path.to_path_buf(), boundaries.clone());
        Ok(boundaries)
    }
}

/// A village of the map, with its measures.
#[derive(PartialEq, Debug, Clone)]
pub struct MapRegion {
    pub feature: VillageFeature,
    pub facility_name: String,
    pub total_weighed: Count,
    pub target_total: Count,
    pub percent_weighed_of_target: f64,
    pub count_stunted: Count,
    pub percent_stunted: f64,
}

impl MapRegion {
    pub fn category(&self) -> Option<PrevalenceCategory> {
        PrevalenceCategory::classify(self.percent_stunted)
    }

    /// The measures under the name of the boundary feature.
    pub fn measure(&self) -> VillageMeasure {
        VillageMeasure {
            village_name: self.feature.name.clone(),
            facility_name: self.facility_name.clone(),
            total_weighed: self.total_weighed,
            count_stunted: self.count_stunted,
            percent_stunted: self.percent_stunted,
        }
    }
}

/// Prevalence statistics over all the villages of the map, including the
/// ones without data.
pub fn layer_stats(layer: &[MapRegion]) -> VillageStats {
    let measures: Vec<VillageMeasure> = layer.iter().map(MapRegion::measure).collect();
    summarize_villages(&measures)
}

/// Attaches to each village the first fact with the same name. The names
/// are compared trimmed and in upper case. The villages without a fact get
/// zero measures.
pub fn map_layer(villages: &VillageBoundaries, facts: &[FactRecord]) -> Vec<MapRegion> {
    let mut by_name: HashMap<String, &FactRecord> = HashMap::new();
    for f in facts.iter() {
        by_name.entry(clean_name(&f.village_name)).or_insert(f);
    }

    let mut unmatched: usize = 0;
    let res: Vec<MapRegion> = villages
        .features
        .iter()
        .map(|feature| {
            let key = clean_name(&feature.name);
            let fact = if key.is_empty() { None } else { by_name.get(&key) };
            match fact {
                Some(f) => MapRegion {
                    feature: feature.clone(),
                    facility_name: f.facility_name.clone(),
                    total_weighed: f.total_weighed,
                    target_total: f.target_total,
                    percent_weighed_of_target: f.percent_weighed_of_target,
                    count_stunted: f.count_stunted,
                    percent_stunted: f.percent_stunted,
                },
                None => {
                    unmatched += 1;
                    MapRegion {
                        feature: feature.clone(),
                        facility_name: NO_FACILITY.to_string(),
                        total_weighed: 0.0,
                        target_total: 0.0,
                        percent_weighed_of_target: 0.0,
                        count_stunted: 0.0,
                        percent_stunted: 0.0,
                    }
                }
            }
        })
        .collect();
    debug!(
        "map_layer: {} villages, {} without data",
        res.len(),
        unmatched
    );
    res
}

pub fn layer_to_geojson(layer: &[MapRegion]) -> JSValue {
    let features: Vec<JSValue> = layer
        .iter()
        .map(|r| {
            let mut properties = r.feature.properties.clone();
            properties.insert("facility_name".to_string(), json!(r.facility_name));
            properties.insert("total_weighed".to_string(), json!(r.total_weighed));
            properties.insert("target_total".to_string(), json!(r.target_total));
            properties.insert(
                "percent_weighed_of_target".to_string(),
                json!(round2(r.percent_weighed_of_target)),
            );
            properties.insert("count_stunted".to_string(), json!(r.count_stunted));
            properties.insert(
                "percent_stunted".to_string(),
                json!(round2(r.percent_stunted)),
            );
            properties.insert(
                "category".to_string(),
                json!(r.category().map(|c| c.label())),
            );
            json!({
                "type": "Feature",
                "properties": properties,
                "geometry": r.feature.geometry,
            })
        })
        .collect();
    json!({
        "type": "FeatureCollection",
        "features": features,
    })
}

pub fn write_layer(layer: &[MapRegion], path: &Path) -> EtlResult<()> {
    let js = layer_to_geojson(layer);
    let contents = serde_json::to_string(&js).context(SerializingJsonSnafu {})?;
    fs::write(path, contents).context(WritingFileSnafu {
        path: path.display().to_string(),
    })?;
    Ok(())
}
