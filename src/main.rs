use anyhow::{Context, bail};
use avsync::config::{PlayerConfig, app_name, version};
use avsync::decoder::synthetic::{SyntheticDemuxer, SyntheticFactory, SyntheticSpec};
use avsync::decoder::{DecoderFactory, Demuxer};
use avsync::display::{AudioOutput, HeadlessPresenter};
use avsync::pipeline::{ExitReason, Session, SessionHandle, SyncMaster};
use clap::{Arg, ArgAction, Command};
use log::{info, warn};
use std::io::BufRead;
use std::{panic, process, thread};

fn main() {
    tracing_subscriber::fmt::init();

    let matches = Command::new(app_name())
        .version(version())
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("file")
                .value_name("FILE")
                .help("Media file to play.")
                .required_unless_present("synthetic"),
        )
        .arg(
            Arg::new("sync")
                .long("sync")
                .value_name("MASTER")
                .help("Master clock: audio, video or external.")
                .value_parser(["audio", "video", "external"]),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("JSON file with player settings."),
        )
        .arg(
            Arg::new("no-audio")
                .long("no-audio")
                .help("Do not open an audio output.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("synthetic")
                .long("synthetic")
                .value_name("SECONDS")
                .help("Play a generated test clip instead of a file.")
                .value_parser(clap::value_parser!(f64)),
        )
        .get_matches();

    // kill the main thread as soon as a secondary thread panics
    let orig_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        orig_hook(panic_info);
        process::exit(105);
    }));

    match run(&matches) {
        Ok(ExitReason::Quit) => {}
        Ok(ExitReason::StreamError) => process::exit(1),
        Err(e) => {
            eprintln!("{}: {:#}", app_name(), e);
            process::exit(2);
        }
    }
}

fn run(matches: &clap::ArgMatches) -> anyhow::Result<ExitReason> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => PlayerConfig::load(path).with_context(|| format!("loading {}", path))?,
        None => PlayerConfig::default(),
    };
    if let Some(master) = matches.get_one::<String>("sync") {
        config.sync_master = master.parse::<SyncMaster>().map_err(anyhow::Error::msg)?;
    }
    if matches.get_flag("no-audio") {
        config.audio_enabled = false;
    }

    if let Some(&seconds) = matches.get_one::<f64>("synthetic") {
        let spec = SyntheticSpec {
            duration_secs: seconds,
            ..SyntheticSpec::default()
        };
        let factory = SyntheticFactory::new(&spec);
        return play(Box::new(SyntheticDemuxer::new(spec)), &factory, &config);
    }

    let Some(path) = matches.get_one::<String>("file") else {
        bail!("no input given");
    };
    open_file(path, &config)
}

#[cfg(feature = "ffmpeg")]
fn open_file(path: &str, config: &PlayerConfig) -> anyhow::Result<ExitReason> {
    let demuxer = avsync::decoder::ffmpeg::FfmpegDemuxer::open(path)
        .with_context(|| format!("opening {}", path))?;
    let factory = demuxer.factory();
    play(Box::new(demuxer), &factory, config)
}

#[cfg(not(feature = "ffmpeg"))]
fn open_file(path: &str, _config: &PlayerConfig) -> anyhow::Result<ExitReason> {
    bail!(
        "cannot open {}: built without the `ffmpeg` feature, try --synthetic",
        path
    )
}

fn audio_output(config: &PlayerConfig) -> Option<Box<dyn AudioOutput>> {
    if !config.audio_enabled {
        return None;
    }
    #[cfg(feature = "audio-device")]
    {
        Some(Box::new(avsync::display::audio_output::CpalAudioOutput::new()))
    }
    #[cfg(not(feature = "audio-device"))]
    {
        Some(Box::new(avsync::display::NullAudioOutput::new()))
    }
}

fn play<F: DecoderFactory>(
    demuxer: Box<dyn Demuxer>,
    factory: &F,
    config: &PlayerConfig,
) -> anyhow::Result<ExitReason> {
    let presenter = HeadlessPresenter::new(config.viewport);
    let mut session = Session::open(demuxer, factory, presenter, audio_output(config), config)
        .context("starting playback")?;
    info!(
        "{} {}: playing, master clock is {}",
        app_name(),
        version(),
        session.handle().sync_master()
    );

    // gracefully close the app when receiving SIGINT, SIGTERM, or SIGHUP
    let handle = session.handle();
    ctrlc::set_handler(move || handle.request_quit()).context("installing Ctrl-C handler")?;

    spawn_commands(session.handle(), config.short_seek_secs, config.long_seek_secs);

    let reason = session.run();
    session.shutdown().context("stopping playback")?;
    Ok(reason)
}

/// Reads seek and quit commands from stdin, one per line
fn spawn_commands(handle: SessionHandle, short: f64, long: f64) {
    let spawned = thread::Builder::new()
        .name("commands".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                let increment = match line.trim() {
                    "+" => short,
                    "-" => -short,
                    ">" => long,
                    "<" => -long,
                    "q" => {
                        handle.request_quit();
                        break;
                    }
                    "" => continue,
                    other => {
                        warn!("Commands: unknown command '{}'", other);
                        continue;
                    }
                };
                if !handle.request_seek_relative(increment) {
                    info!("Commands: seek already pending, ignored");
                }
            }
        });
    if let Err(e) = spawned {
        warn!("Commands: stdin reader unavailable: {}", e);
    }
}
