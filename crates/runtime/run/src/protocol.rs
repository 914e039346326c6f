//! Line protocol between the host and an artifact process.
//!
//! The host writes [`Command`]s to the artifact's stdin, one per line. The
//! artifact writes [`Event`]s to stdout; lines that are not events are
//! model output.
//!
//! ```text
//! host -> artifact            artifact -> host
//! verbose true                @property replicationNumber 0 1
//! stop-time 100               replication 1 finished
//! replications 2              @report out/report.txt
//! single-step false           @fault queue overflow
//! run | step | stop           @done
//! ```

use std::fmt;
use std::path::PathBuf;

/// Host-to-artifact command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Enable or disable verbose model output.
    Verbose(bool),
    /// Simulation time at which to stop.
    StopTime(f64),
    /// Number of replications to run.
    Replications(u32),
    /// Pause after every event until [`Command::Step`].
    SingleStep(bool),
    /// Start running with the settings sent so far.
    Run,
    /// Advance one event in single-step mode.
    Step,
    /// Halt as soon as possible.
    Stop,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Verbose(on) => write!(f, "verbose {on}"),
            Self::StopTime(t) => write!(f, "stop-time {t}"),
            Self::Replications(n) => write!(f, "replications {n}"),
            Self::SingleStep(on) => write!(f, "single-step {on}"),
            Self::Run => f.write_str("run"),
            Self::Step => f.write_str("step"),
            Self::Stop => f.write_str("stop"),
        }
    }
}

/// Artifact-to-host event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A watched property changed.
    Property {
        /// Property name.
        name: String,
        /// Previous value.
        old: String,
        /// New value.
        new: String,
    },
    /// The run wrote a report file.
    Report(PathBuf),
    /// The model raised an error; the run failed.
    Fault(String),
    /// The run completed.
    Done,
    /// Anything else: model output for the output sink.
    Output(String),
}

impl Event {
    /// Parse one stdout line.
    ///
    /// Returns an error for a recognised directive with bad arguments.
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim_end_matches(['\r', '\n']);
        let Some(directive) = line.strip_prefix('@') else {
            return Ok(Self::Output(line.to_string()));
        };
        let (keyword, rest) = directive.split_once(' ').unwrap_or((directive, ""));

        match keyword {
            "property" => {
                let mut parts = rest.split_whitespace();
                match (parts.next(), parts.next(), parts.next(), parts.next()) {
                    (Some(name), Some(old), Some(new), None) => Ok(Self::Property {
                        name: name.to_string(),
                        old: old.to_string(),
                        new: new.to_string(),
                    }),
                    _ => Err(format!("malformed property event: {line}")),
                }
            }
            "report" => {
                let path = rest.trim();
                if path.is_empty() {
                    return Err("report event without a path".into());
                }
                Ok(Self::Report(PathBuf::from(path)))
            }
            "fault" => Ok(Self::Fault(rest.trim().to_string())),
            "done" if rest.trim().is_empty() => Ok(Self::Done),
            _ => Ok(Self::Output(line.to_string())),
        }
    }
}
