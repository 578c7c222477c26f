use crate::etl::*;

use serde::{Deserialize, Serialize};

pub const DEFAULT_OUTPUT_DIRECTORY: &str = ".";
pub const DEFAULT_VILLAGE_PROPERTY: &str = "NAMOBJ";

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct InputFiles {
    #[serde(rename = "nutritionFile")]
    pub nutrition_file: Option<String>,
    #[serde(rename = "targetFile")]
    pub target_file: Option<String>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct OutputSettings {
    #[serde(rename = "outputDirectory")]
    pub output_directory: Option<String>,
    #[serde(rename = "writeCsv")]
    pub write_csv: Option<bool>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct BoundarySource {
    #[serde(rename = "filePath")]
    pub file_path: String,
    #[serde(rename = "villageProperty")]
    pub village_property: Option<String>,
}

/// The JSON run configuration. Every section is optional.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct EtlConfig {
    pub inputs: Option<InputFiles>,
    #[serde(rename = "outputSettings")]
    pub output_settings: Option<OutputSettings>,
    pub boundaries: Option<BoundarySource>,
}

pub fn read_config(path: &Path) -> EtlResult<EtlConfig> {
    let p = path.display().to_string();
    let contents = fs::read_to_string(path).context(ReadingFileSnafu { path: p.clone() })?;
    let config: EtlConfig =
        serde_json::from_str(&contents).context(ParsingJsonSnafu { path: p })?;
    debug!("read_config: {:?}", config);
    Ok(config)
}

/// Values given on the command line. They take precedence over the
/// configuration file.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct Overrides {
    pub nutrition: Option<String>,
    pub target: Option<String>,
    pub out: Option<String>,
    pub boundaries: Option<String>,
    pub village_property: Option<String>,
    pub reference: Option<String>,
    pub in_place: bool,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct BoundarySettings {
    pub file_path: PathBuf,
    pub village_property: String,
}

/// Everything a run needs, with all the paths resolved.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct RunSettings {
    pub nutrition_path: PathBuf,
    pub target_path: PathBuf,
    pub output_directory: PathBuf,
    pub write_csv: bool,
    pub boundaries: Option<BoundarySettings>,
    pub reference: Option<PathBuf>,
    /// Read the inputs where they are instead of copying them first.
    pub in_place: bool,
}

impl RunSettings {
    pub fn new(nutrition_path: PathBuf, target_path: PathBuf) -> RunSettings {
        RunSettings {
            nutrition_path,
            target_path,
            output_directory: PathBuf::from(DEFAULT_OUTPUT_DIRECTORY),
            write_csv: true,
            boundaries: None,
            reference: None,
            in_place: false,
        }
    }
}

// Paths of the configuration file are relative to its directory.
fn resolve(root: &Path, p: &str) -> PathBuf {
    let path = Path::new(p);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Combines the optional configuration file with the command line values.
pub fn build_settings(config_path: Option<&Path>, overrides: Overrides) -> EtlResult<RunSettings> {
    let (config, root) = match config_path {
        Some(p) => {
            let root = p.parent().map(Path::to_path_buf).unwrap_or_default();
            (Some(read_config(p)?), root)
        }
        None => (None, PathBuf::new()),
    };
    let inputs = config.as_ref().and_then(|c| c.inputs.clone());
    let output = config.as_ref().and_then(|c| c.output_settings.clone());
    let boundary_source = config.as_ref().and_then(|c| c.boundaries.clone());

    let from_config = |x: Option<String>| x.map(|s| resolve(&root, &s));

    let nutrition_path = match overrides
        .nutrition
        .map(PathBuf::from)
        .or_else(|| from_config(inputs.as_ref().and_then(|i| i.nutrition_file.clone())))
    {
        Some(p) => p,
        None => whatever!("No nutrition report provided (use --nutrition or inputs.nutritionFile)"),
    };
    let target_path = match overrides
        .target
        .map(PathBuf::from)
        .or_else(|| from_config(inputs.as_ref().and_then(|i| i.target_file.clone())))
    {
        Some(p) => p,
        None => whatever!("No target population report provided (use --target or inputs.targetFile)"),
    };

    let mut settings = RunSettings::new(nutrition_path, target_path);
    if let Some(out) = overrides.out.map(PathBuf::from).or_else(|| {
        from_config(output.as_ref().and_then(|o| o.output_directory.clone()))
    }) {
        settings.output_directory = out;
    }
    if let Some(write_csv) = output.as_ref().and_then(|o| o.write_csv) {
        settings.write_csv = write_csv;
    }

    let boundary_path = overrides
        .boundaries
        .map(PathBuf::from)
        .or_else(|| from_config(boundary_source.as_ref().map(|b| b.file_path.clone())));
    settings.boundaries = boundary_path.map(|file_path| BoundarySettings {
        file_path,
        village_property: overrides
            .village_property
            .clone()
            .or_else(|| boundary_source.as_ref().and_then(|b| b.village_property.clone()))
            .unwrap_or_else(|| DEFAULT_VILLAGE_PROPERTY.to_string()),
    });
    settings.reference = overrides.reference.map(PathBuf::from);
    settings.in_place = overrides.in_place;
    info!("Run settings: {:?}", settings);
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CONFIG: &str = r#"{
        "inputs": { "nutritionFile": "gizi.xls", "targetFile": "sasaran.xls" },
        "outputSettings": { "outputDirectory": "out", "writeCsv": false },
        "boundaries": { "filePath": "desa.geojson" }
    }"#;

    #[test]
    fn config_paths_are_relative_to_the_file() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("run.json");
        fs::write(&config_path, CONFIG).unwrap();

        let settings = build_settings(Some(&config_path), Overrides::default()).unwrap();
        assert_eq!(settings.nutrition_path, dir.path().join("gizi.xls"));
        assert_eq!(settings.target_path, dir.path().join("sasaran.xls"));
        assert_eq!(settings.output_directory, dir.path().join("out"));
        assert!(!settings.write_csv);
        assert_eq!(
            settings.boundaries,
            Some(BoundarySettings {
                file_path: dir.path().join("desa.geojson"),
                village_property: DEFAULT_VILLAGE_PROPERTY.to_string(),
            })
        );
        assert!(!settings.in_place);
    }

    #[test]
    fn command_line_wins() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("run.json");
        fs::write(&config_path, CONFIG).unwrap();

        let overrides = Overrides {
            nutrition: Some("/data/gizi_maret.xlsx".to_string()),
            out: Some("exports".to_string()),
            village_property: Some("DESA".to_string()),
            reference: Some("expected.json".to_string()),
            in_place: true,
            ..Overrides::default()
        };
        let settings = build_settings(Some(&config_path), overrides).unwrap();
        assert_eq!(settings.nutrition_path, PathBuf::from("/data/gizi_maret.xlsx"));
        assert_eq!(settings.target_path, dir.path().join("sasaran.xls"));
        assert_eq!(settings.output_directory, PathBuf::from("exports"));
        assert_eq!(settings.boundaries.unwrap().village_property, "DESA");
        assert_eq!(settings.reference, Some(PathBuf::from("expected.json")));
        assert!(settings.in_place);
    }

    #[test]
    fn defaults_without_config() {
        let overrides = Overrides {
            nutrition: Some("gizi.xlsx".to_string()),
            target: Some("sasaran.xlsx".to_string()),
            ..Overrides::default()
        };
        let settings = build_settings(None, overrides).unwrap();
        assert_eq!(
            settings,
            RunSettings::new(PathBuf::from("gizi.xlsx"), PathBuf::from("sasaran.xlsx"))
        );
    }

    #[test]
    fn missing_inputs() {
        let overrides = Overrides {
            nutrition: Some("gizi.xlsx".to_string()),
            ..Overrides::default()
        };
        let err = build_settings(None, overrides).unwrap_err();
        assert!(err.to_string().contains("target population"), "{}", err);
    }

    #[test]
    fn invalid_json() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("run.json");
        fs::write(&config_path, "{ \"inputs\": ").unwrap();
        let err = build_settings(Some(&config_path), Overrides::default()).unwrap_err();
        assert!(matches!(err, EtlError::ParsingJson { .. }));
    }
}
