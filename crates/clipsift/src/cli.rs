use std::ffi::OsString;
use std::path::PathBuf;

use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser};

#[derive(Debug, Default)]
pub struct CliSources {
    pub gap_tolerance_from_cli: bool,
    pub buffer_before_from_cli: bool,
    pub buffer_after_from_cli: bool,
    pub min_confidence_from_cli: bool,
    pub crf_from_cli: bool,
    pub box_thickness_from_cli: bool,
}

impl CliSources {
    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            gap_tolerance_from_cli: value_from_cli(matches, "gap_tolerance"),
            buffer_before_from_cli: value_from_cli(matches, "buffer_before"),
            buffer_after_from_cli: value_from_cli(matches, "buffer_after"),
            min_confidence_from_cli: value_from_cli(matches, "min_confidence"),
            crf_from_cli: value_from_cli(matches, "crf"),
            box_thickness_from_cli: value_from_cli(matches, "box_thickness"),
        }
    }
}

fn value_from_cli(matches: &ArgMatches, id: &str) -> bool {
    matches
        .value_source(id)
        .is_some_and(|source| matches!(source, ValueSource::CommandLine))
}

pub fn parse_cli() -> (CliArgs, CliSources) {
    match parse_cli_from(std::env::args_os()) {
        Ok(parsed) => parsed,
        Err(err) => err.exit(),
    }
}

pub fn parse_cli_from<I, T>(args: I) -> Result<(CliArgs, CliSources), clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = CliArgs::command().try_get_matches_from(args)?;
    let cli = CliArgs::from_arg_matches(&matches)?;
    let sources = CliSources::from_matches(&matches);
    Ok((cli, sources))
}

#[derive(Debug, Parser)]
#[command(
    name = "clipsift",
    about = "Trim a video down to the spans where objects were detected",
    disable_help_subcommand = true
)]
pub struct CliArgs {
    /// Lock decoding to a specific backend implementation
    #[arg(short = 'b', long = "backend")]
    pub backend: Option<String>,

    /// Override the configuration file path
    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    /// Print the list of available decoding backends
    #[arg(long = "list-backends")]
    pub list_backends: bool,

    /// Detection log (JSON) produced by a detection pass over the input
    #[arg(short = 'd', long = "detections", value_name = "FILE")]
    pub detections: Option<PathBuf>,

    /// Path of the trimmed output video
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Largest gap, in frames, bridged when grouping detections into ranges
    #[arg(long = "gap-tolerance", id = "gap_tolerance", default_value_t = 3)]
    pub gap_tolerance: u64,

    /// Seconds of video kept before every range
    #[arg(long = "buffer-before", id = "buffer_before", default_value_t = 0.0)]
    pub buffer_before: f64,

    /// Seconds of video kept after every range
    #[arg(long = "buffer-after", id = "buffer_after", default_value_t = 0.0)]
    pub buffer_after: f64,

    /// Ignore detections below this confidence (0.0-1.0)
    #[arg(long = "min-confidence", id = "min_confidence", default_value_t = 0.5)]
    pub min_confidence: f32,

    /// Draw detection boxes onto exported frames
    #[arg(long = "annotate")]
    pub annotate: bool,

    /// Line width of annotation boxes in pixels
    #[arg(
        long = "box-thickness",
        id = "box_thickness",
        default_value_t = 2,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub box_thickness: u32,

    /// Constant rate factor for the output encoder
    #[arg(long = "crf", id = "crf", default_value_t = 23)]
    pub crf: u32,

    /// Input video path
    #[arg(value_name = "INPUT")]
    pub input: Option<PathBuf>,
}
