use std::path::PathBuf;

use clap::Parser;

/// Merge danmaku XML recordings of the same live broadcast into one file.
///
/// Inputs are merged in the order given: the first file anchors the timeline
/// and wins whenever two files carry the same record.
#[derive(Parser, Debug)]
#[command(name = "dmerge", author, version, about, long_about = None)]
pub struct Args {
    /// Danmaku XML files to merge
    #[arg(required = true, value_name = "PATH")]
    pub inputs: Vec<PathBuf>,

    /// Output file (default: first input with a `.merged.xml` extension)
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Configuration file (TOML)
    #[arg(short, long, value_name = "PATH", env = "DMERGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Duplicate window in seconds
    #[arg(short, long, value_name = "SECONDS")]
    pub tolerance: Option<f64>,

    /// Time zone for start times derived from file names (`local` or `+08:00`)
    #[arg(long, value_name = "ZONE")]
    pub timezone: Option<String>,

    /// Checksum → user id table
    #[arg(long, value_name = "PATH")]
    pub id_table: Option<PathBuf>,

    /// Do not read, update or write the checksum → user id table
    #[arg(long, conflicts_with = "id_table")]
    pub no_id_table: bool,

    /// Hide the progress bar
    #[arg(long)]
    pub no_progress: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_command_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_inputs_keep_order() {
        let args = Args::try_parse_from(["dmerge", "b.xml", "a.xml", "-o", "out.xml"]).unwrap();
        assert_eq!(
            args.inputs,
            vec![PathBuf::from("b.xml"), PathBuf::from("a.xml")]
        );
        assert_eq!(args.output, Some(PathBuf::from("out.xml")));
    }

    #[test]
    fn test_requires_an_input() {
        assert!(Args::try_parse_from(["dmerge"]).is_err());
    }
}
