use std::env;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::info;

use scene_player::{
    HeadlessRenderer, ManualTimeSource, PlayOptions, Player, PlayerConfig, SceneDescription,
    SceneGraph,
};

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let options = CliOptions::parse()?;
    let mut config = match &options.config {
        Some(path) => PlayerConfig::load_or_default(path),
        None => PlayerConfig::default(),
    };
    if let Some(fps) = options.fps {
        config.fps = fps;
    }

    let description = SceneDescription::from_path(&options.path)?;
    let clock = ManualTimeSource::new();
    let renderer = HeadlessRenderer::new();
    let stats = renderer.stats_handle();
    let mut player = Player::new(config.clone())
        .with_renderer(renderer)
        .with_time_source(clock.clone());

    let report = player
        .load(description)
        .with_context(|| format!("failed to load {}", options.path))?;
    println!(
        "Loaded scene with {} nodes, {} script(s) ({} failed), {} handler(s), {} animation(s)",
        report.nodes,
        report.scripts_compiled,
        report.scripts_failed,
        report.handlers,
        report.animations
    );

    if let Some(name) = &options.play {
        if !player.play_animation(name, PlayOptions::default()) {
            return Err(anyhow!("scene has no animation named {name}"));
        }
        println!("Playing animation {name}");
    }

    player.play();
    if let Some(name) = &options.call {
        let found = player.call_method(name, &[]);
        println!("Called {name}: {}", if found { "ok" } else { "not found" });
    }

    let step = Duration::from_millis(config.frame_interval_millis());
    for _ in 0..options.frames {
        clock.advance(step);
        player.frame();
    }
    player.stop();
    info!("ran {} frame(s) at {} fps", options.frames, config.fps);

    println!("Rendered {} frame(s)", stats.read().frames);
    if let Some(scene) = player.scene() {
        print_final_state(scene);
    }
    player.dispose();
    Ok(())
}

fn print_final_state(scene: &SceneGraph) {
    println!("Final node states:");
    for node in scene.all_nodes() {
        let label = if node.name.is_empty() {
            node.uuid.to_string()
        } else {
            node.name.clone()
        };
        println!(
            " - {} ({}) pos=({:.2}, {:.2}, {:.2}) visible={}",
            label, node.kind, node.position.x, node.position.y, node.position.z, node.visible
        );
    }
}

const USAGE: &str = "Usage: scene-player <scene.json> [--frames N] [--fps F] [--call NAME] \
                     [--play ANIMATION] [--config PATH]";

struct CliOptions {
    path: String,
    frames: u32,
    fps: Option<f32>,
    call: Option<String>,
    play: Option<String>,
    config: Option<String>,
}

impl CliOptions {
    fn parse() -> Result<Self> {
        Self::parse_from(env::args().skip(1))
    }

    fn parse_from(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut args = args.into_iter();
        let Some(path) = args.next() else {
            return Err(anyhow!(USAGE));
        };
        let mut options = Self {
            path,
            frames: 1,
            fps: None,
            call: None,
            play: None,
            config: None,
        };
        while let Some(arg) = args.next() {
            let mut value = || {
                args.next()
                    .ok_or_else(|| anyhow!("{arg} needs a value. {USAGE}"))
            };
            match arg.as_str() {
                "--frames" => {
                    options.frames = value()?
                        .parse()
                        .with_context(|| format!("invalid {arg} value"))?;
                }
                "--fps" => {
                    options.fps = Some(
                        value()?
                            .parse()
                            .with_context(|| format!("invalid {arg} value"))?,
                    );
                }
                "--call" => options.call = Some(value()?),
                "--play" => options.play = Some(value()?),
                "--config" => options.config = Some(value()?),
                other => {
                    return Err(anyhow!("Unknown argument: {other}. {USAGE}"));
                }
            }
        }
        Ok(options)
    }
}
