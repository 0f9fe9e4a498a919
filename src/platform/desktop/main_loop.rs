use std::collections::HashMap;

use anyhow::{anyhow, Context};
use clap::{App, AppSettings, Arg, SubCommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::{floating_type_mod::FT, scene::SceneConfig, TriggerEventKind, WorldConfig};

const CARGO_PKG_AUTHORS: &str = env!("CARGO_PKG_AUTHORS");
const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");
const CARGO_PKG_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

const FRAME_DT: FT = 1. / 60.;

struct RunOptions {
    world_config: String,
    scene_config: String,
    overwrite_config: Option<String>,
    max_seconds: FT,
    statistics_enabled: bool,
    statistics_path: Option<String>,
}

pub fn start() {
    let matches = App::new("Soft-body MPM Simulation")
        .version(CARGO_PKG_VERSION)
        .author(CARGO_PKG_AUTHORS)
        .about(CARGO_PKG_DESCRIPTION)
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("v")
                .short("v")
                .multiple(true)
                .help("Sets the level of verbosity"),
        )
        .subcommand(
            SubCommand::with_name("run")
                .about("Run simulation with given config")
                .arg(
                    Arg::with_name("WORLD_CONFIG")
                        .help("World parameters (YAML)")
                        .required(true)
                        .index(1),
                )
                .arg(
                    Arg::with_name("SCENE_CONFIG")
                        .help("Materials, bodies, colliders and triggers (YAML)")
                        .required(true)
                        .index(2),
                )
                .arg(
                    Arg::with_name("MAX_SECONDS")
                        .long("max-seconds")
                        .short("s")
                        .required(false)
                        .takes_value(true)
                        .default_value("5")
                        .help("Stop simulation after the given amount of simulated seconds"),
                )
                .arg(
                    Arg::with_name("OVERWRITE_CONFIG_FILE")
                        .long("overwrite-config-file")
                        .short("c")
                        .required(false)
                        .takes_value(true)
                        .help("YAML file whose top-level keys replace entries of the world config"),
                )
                .arg(
                    Arg::with_name("STATISTICS_ENABLED")
                        .help("Track performance of individual phases")
                        .short("p")
                        .long("statistics-enabled")
                        .takes_value(false),
                )
                .arg(
                    Arg::with_name("STATISTICS_PATH")
                        .long("statistics-path")
                        .short("w")
                        .required(false)
                        .takes_value(true)
                        .help("Where to write statistics to"),
                ),
        )
        .get_matches();

    let level = match matches.occurrences_of("v") {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry().with(filter).with(fmt::layer()).init();

    if let Some(run_matches) = matches.subcommand_matches("run") {
        let result = parse_run_options(run_matches).and_then(|options| run(&options));
        if let Err(err) = result {
            error!("{:#}", err);
            std::process::exit(1);
        }
    } else {
        unreachable!()
    }
}

fn parse_run_options(run_matches: &clap::ArgMatches) -> anyhow::Result<RunOptions> {
    let required = |name: &str| -> anyhow::Result<String> {
        run_matches
            .value_of(name)
            .map(String::from)
            .ok_or_else(|| anyhow!("missing argument {}", name))
    };

    let max_seconds = required("MAX_SECONDS")?;
    Ok(RunOptions {
        world_config: required("WORLD_CONFIG")?,
        scene_config: required("SCENE_CONFIG")?,
        overwrite_config: run_matches.value_of("OVERWRITE_CONFIG_FILE").map(String::from),
        max_seconds: max_seconds
            .parse::<FT>()
            .with_context(|| format!("invalid --max-seconds `{}`", max_seconds))?,
        statistics_enabled: run_matches.is_present("STATISTICS_ENABLED"),
        statistics_path: run_matches.value_of("STATISTICS_PATH").map(String::from),
    })
}

fn load_world_config(path: &str, overwrite_path: Option<&str>) -> anyhow::Result<WorldConfig> {
    let yaml = std::fs::read_to_string(path).with_context(|| format!("failed reading world config `{}`", path))?;
    let mut value: serde_yaml::Value =
        serde_yaml::from_str(&yaml).with_context(|| format!("failed parsing world config `{}`", path))?;

    if let Some(overwrite_path) = overwrite_path {
        let overwrite_yaml = std::fs::read_to_string(overwrite_path)
            .with_context(|| format!("failed reading overwrite config `{}`", overwrite_path))?;
        let overwrite: HashMap<String, serde_yaml::Value> = serde_yaml::from_str(&overwrite_yaml)
            .with_context(|| format!("failed parsing overwrite config `{}`", overwrite_path))?;
        let mapping = value
            .as_mapping_mut()
            .ok_or_else(|| anyhow!("world config `{}` is not a mapping", path))?;
        for (k, v) in overwrite.into_iter() {
            mapping.insert(serde_yaml::Value::String(k), v);
        }
    }

    let config: WorldConfig = serde_yaml::from_value(value).context("failed to unpack WorldConfig")?;
    Ok(config)
}

fn run(options: &RunOptions) -> anyhow::Result<()> {
    let mut world_config = load_world_config(&options.world_config, options.overwrite_config.as_deref())?;
    world_config.statistics_enabled |= options.statistics_enabled;
    info!("{:?}", world_config);

    let scene_yaml = std::fs::read_to_string(&options.scene_config)
        .with_context(|| format!("failed reading scene `{}`", options.scene_config))?;
    let scene: SceneConfig = serde_yaml::from_str(&scene_yaml)
        .with_context(|| format!("failed parsing scene `{}`", options.scene_config))?;

    let mut world = scene.build(world_config).context("failed to set up the scene")?;
    info!(
        "{} particles in {} bodies",
        world.num_particles(),
        world.bodies().count()
    );

    let mut time: FT = 0.;
    let mut frame_number = 0;
    let mut total_duration = std::time::Duration::from_nanos(0);

    while time < options.max_seconds {
        let a = std::time::Instant::now();
        world
            .step(FRAME_DT)
            .with_context(|| format!("step {} at t={}s failed", frame_number, time))?;
        let b = std::time::Instant::now();

        total_duration += b - a;
        time += FRAME_DT;
        frame_number += 1;

        for event in world.last_trigger_events() {
            let kind = match event.kind {
                TriggerEventKind::Enter => "entered",
                TriggerEventKind::Exit => "left",
            };
            info!(
                "particle {} (tag {}) {} trigger {}",
                event.particle_id, event.tag, kind, event.trigger.0
            );
        }

        info!(
            "{:05}: {} particles {}msec ({}msec AVG)",
            frame_number,
            world.num_particles(),
            (b - a).as_secs_f32() * 1000.,
            (total_duration / frame_number).as_secs_f32() * 1000.
        );
    }

    if world.config().statistics_enabled {
        let s = world.statistics();
        print!("{}", s);
        if let Some(statistics_path) = &options.statistics_path {
            std::fs::write(statistics_path, s)
                .with_context(|| format!("failed writing statistics to `{}`", statistics_path))?;
        }
    }

    Ok(())
}
