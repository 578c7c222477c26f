use clap::Parser;
use log::{debug, info};
use std::path::Path;

mod args;
mod etl;

use crate::etl::config_reader::{build_settings, Overrides};

fn main() {
    let args = args::Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
    debug!("args: {:?}", args);

    let overrides = Overrides {
        nutrition: args.nutrition.clone(),
        target: args.target.clone(),
        out: args.out.clone(),
        boundaries: args.boundaries.clone(),
        village_property: args.village_property.clone(),
        reference: args.reference.clone(),
        in_place: args.in_place,
    };
    let settings = match build_settings(args.config.as_deref().map(Path::new), overrides) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", etl::describe(&e));
            eprintln!("{}", etl::TROUBLESHOOTING);
            std::process::exit(1);
        }
    };

    let outcome = if settings.in_place {
        etl::run_etl(&settings.nutrition_path, &settings.target_path)
    } else {
        etl::run_etl_staged(&settings.nutrition_path, &settings.target_path)
    };
    for w in outcome.warnings.iter() {
        eprintln!("Warning: {}", w);
    }
    println!("{}", outcome.message);

    let schema = match outcome.schema {
        Some(schema) if outcome.success => schema,
        _ => {
            eprintln!("{}", etl::TROUBLESHOOTING);
            std::process::exit(1);
        }
    };

    if let Err(e) = etl::publish(&schema, &settings) {
        eprintln!("Error: {}", etl::describe(&e));
        std::process::exit(1);
    }
    info!(
        "{} facts written to {:?}",
        schema.facts.len(),
        settings.output_directory.display()
    );
}
