use std::{path::PathBuf, time::Duration};

use clap::{Parser, Subcommand};

// ///////////// //
// CLI interface //
// ///////////// //

/// printwatch - Submits print jobs, follows them to completion and watches printers for state changes.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Lists the available printers as JSON.
    Printers,

    /// Prints a file (or stdin when the file is '-') and reports the resulting job as JSON.
    Print {
        /// Name of the target printer.
        printer: String,

        /// File to print, or '-' to read raw bytes from stdin.
        file: PathBuf,

        /// Job name, defaults to the file name.
        #[arg(long)]
        name: Option<String>,

        /// Return as soon as the job is registered.
        #[arg(long)]
        no_wait: bool,

        /// Overrides the media type derived from the file extension.
        #[arg(long)]
        media_type: Option<String>,

        /// Extra job property, may be repeated (e.g. -o copies=2).
        #[arg(short = 'o', long = "option", value_parser = parse_key_value)]
        options: Vec<(String, String)>,
    },

    /// Prints one JSON line per printer event until interrupted.
    Watch {
        /// Time between two polls (e.g. '5s'), at least one second.
        #[arg(long, value_parser = humantime::parse_duration)]
        interval: Option<Duration>,
    },
}

fn parse_key_value(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{value}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn print_options_are_collected() {
        let cli = Cli::try_parse_from(["printwatch", "print", "Office", "report.pdf", "--no-wait", "-o", "copies=2", "-o", "media=A4"]).unwrap();
        let Commands::Print { printer, file, no_wait, options, .. } = cli.command else {
            panic!("expected the print command");
        };
        assert_eq!(printer, "Office");
        assert_eq!(file, PathBuf::from("report.pdf"));
        assert!(no_wait);
        assert_eq!(options, vec![("copies".to_string(), "2".to_string()), ("media".to_string(), "A4".to_string())]);
    }

    #[test]
    fn malformed_options_are_rejected() {
        assert!(Cli::try_parse_from(["printwatch", "print", "Office", "a.txt", "-o", "copies"]).is_err());
    }

    #[test]
    fn watch_interval_is_a_duration() {
        let cli = Cli::try_parse_from(["printwatch", "watch", "--interval", "5s"]).unwrap();
        assert!(matches!(cli.command, Commands::Watch { interval: Some(d) } if d == Duration::from_secs(5)));
    }
}
