//! Command lines for the capture (`avconv`) and stream (`vlc`) processes.

use std::env;
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::Settings;

pub const CAPTURE_PROGRAM: &str = "avconv";
pub const STREAM_PROGRAM: &str = "cvlc";
pub const STREAM_GUI_PROGRAM: &str = "vlc";

/// How the stream process presents itself.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DisplayMode {
    /// `cvlc` with the dummy interface.
    #[default]
    Headless,
    /// `vlc` with its regular window.
    Gui,
}

/// A program name plus its argument vector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Full path of the program, if it can be found.
    pub fn locate(&self) -> Option<PathBuf> {
        find_program(&self.program)
    }

    /// Same command line, but with the program replaced by its full path
    /// when it is installed.
    pub fn located(&self) -> Self {
        match self.locate() {
            Some(path) => Self {
                program: path.display().to_string(),
                args: self.args.clone(),
            },
            None => self.clone(),
        }
    }

    /// A [`Command`] running `program` (usually the located path) with these args.
    pub fn to_command(&self, program: &Path) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(&self.args);
        cmd
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Build the capture command: grab audio and/or the X11 screen, encode to
/// MP3 / H.264 and write MPEG-TS to stdout.
pub fn capture_command(settings: &Settings) -> CommandLine {
    let mut cmd = CommandLine::new(CAPTURE_PROGRAM);

    if settings.audio {
        cmd = cmd
            .args(["-f", "alsa", "-ac", "2", "-i"])
            .arg(settings.audio_source.as_str())
            .args(["-acodec", "libmp3lame"]);
    }

    if settings.video {
        cmd = cmd
            .args(["-f", "x11grab", "-r"])
            .arg(settings.framerate.to_string())
            .arg("-s")
            .arg(settings.res_in.to_string())
            .arg("-i")
            .arg(settings.display.as_str())
            .args(["-vcodec", "libx264", "-preset", "ultrafast", "-s"])
            .arg(settings.res_out.to_string());
    }

    cmd.args(["-threads", "0", "-f", "mpegts", "-"])
}

/// Build the stream command: read MPEG-TS from stdin and serve it over HTTP
/// on `port`.
pub fn stream_command(port: u16, mode: DisplayMode) -> CommandLine {
    let cmd = match mode {
        DisplayMode::Headless => CommandLine::new(STREAM_PROGRAM).args(["-I", "dummy"]),
        DisplayMode::Gui => CommandLine::new(STREAM_GUI_PROGRAM),
    };
    cmd.arg("-")
        .arg(format!("--sout=#std{{access=http,mux=ts,dst=:{port}}}"))
}

/// Search `PATH` for an executable called `program`.
///
/// Names containing a path separator are checked as given.
pub fn find_program(program: &str) -> Option<PathBuf> {
    let path_var = env::var_os("PATH").unwrap_or_default();
    find_program_in(program, &path_var)
}

pub fn find_program_in(program: &str, path_var: &OsStr) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }

    env::split_paths(path_var)
        .map(|dir| dir.join(program))
        .find(|path| is_executable(path))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
