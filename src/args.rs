use clap::Parser;

/// Builds a star schema of child nutrition indicators from the nutrition status
/// report and the target population report of the health facilities.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path, optional) A JSON file describing the run. The paths it contains are relative to
    /// its directory. The other options override its content.
    #[clap(short, long, value_parser)]
    pub config: Option<String>,

    /// (file path) The nutrition status report (.xls export or .xlsx workbook).
    #[clap(short, long, value_parser)]
    pub nutrition: Option<String>,

    /// (file path) The target population report (.xls export or .xlsx workbook).
    #[clap(short, long, value_parser)]
    pub target: Option<String>,

    /// (directory, default '.') Where the tables and the summary are written.
    #[clap(short, long, value_parser)]
    pub out: Option<String>,

    /// (file path, optional) A GeoJSON file with the village boundaries. If provided, a map layer
    /// with the indicators of each village is written next to the tables.
    #[clap(long, value_parser)]
    pub boundaries: Option<String>,

    /// (default NAMOBJ) The property of the boundary features holding the village name.
    #[clap(long, value_parser)]
    pub village_property: Option<String>,

    /// (file path) A reference summary in JSON format. If provided, nutrietl checks that the
    /// summary of this run matches it.
    #[clap(short, long, value_parser)]
    pub reference: Option<String>,

    /// Reads the reports where they are instead of working on copies. Converted legacy files are
    /// then kept next to the reports and reused by the next runs.
    #[clap(long, takes_value = false)]
    pub in_place: bool,

    // Other arguments
    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,
}
