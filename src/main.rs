mod command;
mod config;
mod error;
mod pipeline;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use command::{DisplayMode, capture_command, stream_command};
use config::{
    Resolution, Settings, SettingsOverrides, default_settings_path, parse_framerate, parse_port,
    parse_resolution,
};
use pipeline::Pipeline;

#[derive(Parser, Debug)]
#[command(name = "desktop-streamer")]
#[command(about = "Capture audio and video from the desktop and stream it to the local network using avconv and vlc")]
#[command(version)]
struct Args {
    /// Do nothing, only print the commands
    #[arg(short = 'n', long, conflicts_with = "gui")]
    noop: bool,

    /// Show VLC's interface instead of running it headless
    #[arg(long)]
    gui: bool,

    /// Only capture audio (no video)
    #[arg(short = 'a', long, conflicts_with = "no_audio", help_heading = "Capture")]
    audio_only: bool,

    /// Don't capture audio (just video)
    #[arg(short = 'A', long, help_heading = "Capture")]
    no_audio: bool,

    /// Framerate for the stream [default: 25]
    #[arg(short, long, value_name = "INT", value_parser = parse_framerate, help_heading = "Capture")]
    framerate: Option<u32>,

    /// Size of the capture area [default: 1920x1080]
    #[arg(short = 'r', long, value_name = "WIDTHxHEIGHT", value_parser = parse_resolution, help_heading = "Capture")]
    res_in: Option<Resolution>,

    /// Transcode to this output resolution [default: 1280x720]
    #[arg(short = 'R', long, value_name = "WIDTHxHEIGHT", value_parser = parse_resolution, help_heading = "Capture")]
    res_out: Option<Resolution>,

    /// X11 display and screen to grab [default: :0.0]
    #[arg(long, value_name = "DISPLAY", help_heading = "Capture")]
    display: Option<String>,

    /// ALSA input device to record from [default: pulse]
    #[arg(long, value_name = "DEVICE", help_heading = "Capture")]
    audio_source: Option<String>,

    /// Serve the stream on this port [default: 1312]
    #[arg(short, long, value_name = "INT", value_parser = parse_port, help_heading = "Stream")]
    port: Option<u16>,

    /// Load settings from the settings file
    #[arg(long, help_heading = "Settings")]
    load: bool,

    /// Save the resolved settings to the settings file
    #[arg(long, help_heading = "Settings")]
    save: bool,

    /// Full path to the settings file [default: ~/.config/DesktopStreamer/settings.json]
    #[arg(long, value_name = "FILENAME", help_heading = "Settings")]
    cfg_file: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn overrides(&self) -> SettingsOverrides {
        let (audio, video) = if self.audio_only {
            (Some(true), Some(false))
        } else if self.no_audio {
            (Some(false), Some(true))
        } else {
            (None, None)
        };

        SettingsOverrides {
            audio,
            video,
            res_in: self.res_in,
            res_out: self.res_out,
            framerate: self.framerate,
            port: self.port,
            audio_source: self.audio_source.clone(),
            display: self.display.clone(),
        }
    }

    fn display_mode(&self) -> DisplayMode {
        if self.gui {
            DisplayMode::Gui
        } else {
            DisplayMode::Headless
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so --noop output stays clean.
    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let cfg_file = args.cfg_file.clone().unwrap_or_else(default_settings_path);
    let load_from = args.load.then_some(cfg_file.as_path());
    let settings = Settings::resolve(load_from, &args.overrides())?;

    if args.save {
        settings.save(&cfg_file)?;
    }

    let capture = capture_command(&settings);
    let stream = stream_command(settings.port, args.display_mode());

    if args.noop {
        println!("{}", capture.located());
        println!("{}", stream.located());
        return Ok(());
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("received shutdown signal");
        r.store(false, Ordering::SeqCst);
    })?;

    let pipeline = Pipeline::new(capture, stream);
    let running_pipeline = pipeline.start()?;
    info!(
        "streaming {} at {} on http://0.0.0.0:{} (Ctrl+C to stop)",
        settings.res_in, settings.res_out, settings.port
    );

    running_pipeline.wait(&running)?;
    info!("done");
    Ok(())
}
