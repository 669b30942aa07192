use anyhow::{anyhow, Context, Result};
use clap::{Arg, ArgMatches, Command};
use std::time::{Duration, Instant};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use remotetalk_client::audio::{ExportFormat, OggSettings};
use remotetalk_client::cache::DirCacheStore;
use remotetalk_client::client::*;
use remotetalk_client::config::Config;
use remotetalk_client::ipc::TalkRequest;
use remotetalk_client::synthesis::{PlaybackSink, TalkController, TalkOutcome, TalkPhase};
use remotetalk_client::voice::resolve_voice;

// ~60Hz, the cadence of an editor update loop
const TICK_INTERVAL: Duration = Duration::from_millis(16);

fn build_cli() -> Command {
    Command::new("remotetalk-say")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Speak text through a RemoteTalk server")
        .arg(
            Arg::new("text")
                .help("Specify the text to speak on the command line")
                .index(1)
                .required(false),
        )
        .arg(
            Arg::new("file")
                .help("Specify a file to be spoken. Use '-' for stdin")
                .long("file")
                .short('f')
                .value_name("FILE"),
        )
        .arg(
            Arg::new("address")
                .help("Server address")
                .long("address")
                .value_name("ADDRESS"),
        )
        .arg(
            Arg::new("port")
                .help("Server port")
                .long("port")
                .value_name("PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("voice")
                .help("Cast index or name")
                .long("voice")
                .short('v')
                .value_name("VOICE"),
        )
        .arg(
            Arg::new("params")
                .help("Comma separated synthesis parameter values")
                .long("params")
                .value_name("VALUES"),
        )
        .arg(
            Arg::new("granularity")
                .help("Buffered samples needed before playback starts")
                .long("granularity")
                .value_name("SAMPLES")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("no-cache")
                .help("Always ask the server, even if an exported talk exists")
                .long("no-cache")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("export")
                .help("Export the finished talk into the cache directory")
                .long("export")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("format")
                .help("Export format: wav or ogg")
                .long("format")
                .value_name("FORMAT")
                .value_parser(clap::value_parser!(ExportFormat)),
        )
        .arg(
            Arg::new("quality")
                .help("Ogg Vorbis quality (0.0-1.0)")
                .long("quality")
                .value_name("QUALITY")
                .value_parser(clap::value_parser!(f32)),
        )
        .arg(
            Arg::new("export-dir")
                .help("Name of the directory exported talks are stored in")
                .long("export-dir")
                .value_name("DIR"),
        )
        .arg(
            Arg::new("list-casts")
                .help("List the casts offered by the server and exit")
                .long("list-casts")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("quiet")
                .help("Don't play audio")
                .long("quiet")
                .short('q')
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .help("Log progress and export failures")
                .long("verbose")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("timeout")
                .help("Give up after this many seconds")
                .long("timeout")
                .value_name("SECS")
                .value_parser(clap::value_parser!(u64))
                .default_value("60"),
        )
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn apply_overrides(config: &mut Config, matches: &ArgMatches) {
    if let Some(address) = matches.get_one::<String>("address") {
        config.server.address = address.clone();
    }
    if let Some(port) = matches.get_one::<u16>("port") {
        config.server.port = *port;
    }
    if let Some(granularity) = matches.get_one::<usize>("granularity") {
        config.talk.sample_granularity = *granularity;
    }
    if matches.get_flag("no-cache") {
        config.talk.use_cache = false;
    }
    if matches.get_flag("export") {
        config.talk.export_audio = true;
    }
    if let Some(format) = matches.get_one::<ExportFormat>("format") {
        config.talk.export_format = *format;
    }
    if let Some(quality) = matches.get_one::<f32>("quality") {
        config.talk.ogg_quality = OggSettings::new(*quality).quality;
    }
    if let Some(dir) = matches.get_one::<String>("export-dir") {
        config.talk.export_dir = dir.clone();
    }
    if matches.get_flag("verbose") {
        config.talk.logging = true;
    }
}

fn parse_params(values: &str) -> Result<Vec<f32>> {
    values
        .split(',')
        .map(|v| {
            v.trim()
                .parse::<f32>()
                .with_context(|| format!("Invalid parameter value: {}", v))
        })
        .collect()
}

fn tick_until<C, P, F>(
    controller: &mut TalkController<C, P>,
    deadline: Instant,
    mut done: F,
) -> bool
where
    C: remotetalk_client::cache::CacheStore,
    P: PlaybackSink,
    F: FnMut(&TalkController<C, P>) -> bool,
{
    loop {
        controller.tick();
        if done(controller) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(TICK_INTERVAL);
    }
}

fn run<P: PlaybackSink>(matches: &ArgMatches, config: &Config, sink: P) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    let timeout = Duration::from_secs(*matches.get_one::<u64>("timeout").unwrap_or(&60));
    let deadline = Instant::now() + timeout;

    let session = Session::connect(
        runtime.handle().clone(),
        &config.server.address,
        config.server.port,
    );
    let cache = DirCacheStore::new(config.talk.cache_dir());
    let mut controller = TalkController::new(session, cache, sink, config.talk.settings());

    if !tick_until(&mut controller, deadline, |c| !c.is_refreshing()) {
        return Err(anyhow!("Timed out waiting for the server status"));
    }
    if !controller.is_server_ready() {
        return Err(anyhow!(
            "Server not found at {}:{}",
            config.server.address,
            config.server.port
        ));
    }

    if matches.get_flag("list-casts") {
        println!("Casts on {}:", controller.host());
        for (index, cast) in controller.casts().iter().enumerate() {
            println!("  {}: {}", index, cast.name);
            if !cast.param_names.is_empty() {
                println!("      params: {}", cast.param_names.join(", "));
            }
        }
        return Ok(());
    }

    let text = get_input_text(matches)?;
    if text.is_empty() {
        return Err(anyhow!(
            "No text provided. Use command line argument, -f file, or pipe text to stdin."
        ));
    }

    let cast = match matches.get_one::<String>("voice") {
        Some(voice) => resolve_voice(voice, controller.casts())
            .ok_or_else(|| anyhow!("Unknown voice: {}. Use --list-casts to see the casts", voice))?,
        None => 0,
    };

    let mut request = TalkRequest {
        params: *controller.server_params(),
        text,
    };
    request.params.cast = cast;
    if let Some(values) = matches.get_one::<String>("params") {
        request = request.with_params(&parse_params(values)?);
    }

    if let TalkOutcome::CacheHit(path) = controller.talk(request)? {
        tracing::info!("Playing cached {}", path.display());
    }

    let finished = tick_until(&mut controller, deadline, |c| c.phase() == TalkPhase::Idle);
    if !finished {
        warn!("Timed out, stopping the talk");
        controller.stop();
        controller.sink_mut().stop();
        let grace = Instant::now() + Duration::from_secs(5);
        tick_until(&mut controller, grace, |c| c.phase() == TalkPhase::Idle);
    }

    for path in controller.take_exported_files() {
        println!("{}", path.display());
    }
    if let Some(e) = controller.last_export_error() {
        eprintln!("Error: Export failed: {}", e);
    }

    if finished {
        Ok(())
    } else {
        Err(anyhow!("Talk did not finish within {} seconds", timeout.as_secs()))
    }
}

fn main() -> Result<()> {
    let matches = build_cli().get_matches();
    init_tracing(matches.get_flag("verbose"));

    let mut config = Config::load().unwrap_or_else(|e| {
        warn!("Failed to load config: {:#}, using defaults", e);
        Config::default()
    });
    apply_overrides(&mut config, &matches);

    if matches.get_flag("quiet") || matches.get_flag("list-casts") {
        return run(&matches, &config, SilentSink);
    }

    match RodioSink::new() {
        Ok(sink) => run(&matches, &config, sink),
        Err(e) => {
            warn!("Audio output unavailable: {:#}", e);
            run(&matches, &config, SilentSink)
        }
    }
}
