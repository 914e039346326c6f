//! Artifacts executed as child processes.
//!
//! A [`ProcessArtifact`] runs the per-run snapshot of a compiled model in a
//! fresh process and drives it over the line protocol in
//! [`crate::protocol`]. Every run is a new process, so global state the
//! model declares always starts from its initial value.

use std::env;
use std::ffi::OsString;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command as Process, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use simforge_loader::LoadedArtifact;

use crate::capability::{
    Configurable, Fanout, PropertyCache, PropertyObserver, Reportable, Runnable, SimArtifact,
};
use crate::error::{ExecutionFault, RunError};
use crate::protocol::{Command, Event};
use crate::signals::{RunSignals, Signal};
use crate::sink::OutputSink;

/// Environment variable carrying the Run context's search path.
pub const CLASSPATH_ENV: &str = "SIMFORGE_CLASSPATH";

#[cfg(target_os = "macos")]
const LIBRARY_PATH_ENV: &str = "DYLD_LIBRARY_PATH";
#[cfg(windows)]
const LIBRARY_PATH_ENV: &str = "PATH";
#[cfg(not(any(target_os = "macos", windows)))]
const LIBRARY_PATH_ENV: &str = "LD_LIBRARY_PATH";

/// Keep at most this much stderr for fault reports.
const STDERR_TAIL: usize = 4096;

/// Turns a resolved artifact into something runnable.
pub trait ArtifactLoader: Send + Sync {
    /// Instantiate `loaded`, which can see `search_path`.
    fn instantiate(
        &self,
        loaded: &LoadedArtifact,
        search_path: &[PathBuf],
    ) -> Result<Box<dyn SimArtifact>, RunError>;
}

/// [`ArtifactLoader`] producing [`ProcessArtifact`]s.
#[derive(Debug, Clone, Default)]
pub struct ProcessLoader {
    working_dir: Option<PathBuf>,
}

impl ProcessLoader {
    /// Loader running artifacts in the current directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run artifacts in `dir`. Relative report paths resolve against it.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

impl ArtifactLoader for ProcessLoader {
    fn instantiate(
        &self,
        loaded: &LoadedArtifact,
        search_path: &[PathBuf],
    ) -> Result<Box<dyn SimArtifact>, RunError> {
        if !loaded.executable.is_file() {
            return Err(RunError::Load {
                path: loaded.executable.clone(),
                reason: "snapshot is missing".into(),
            });
        }
        let mut artifact = ProcessArtifact::new(&loaded.executable, search_path.to_vec());
        if let Some(dir) = &self.working_dir {
            artifact.working_dir = Some(dir.clone());
        }
        Ok(Box::new(artifact))
    }
}

/// A compiled model run as a child process.
pub struct ProcessArtifact {
    executable: PathBuf,
    search_path: Vec<PathBuf>,
    working_dir: Option<PathBuf>,
    verbose: bool,
    stop_time: Option<f64>,
    replications: u32,
    single_step: bool,
    sink: OutputSink,
    fanout: Fanout,
    signals: Arc<RunSignals>,
    report: Option<PathBuf>,
    ran: bool,
}

impl ProcessArtifact {
    /// Artifact for `executable`, seeing libraries on `search_path`.
    pub fn new(executable: impl Into<PathBuf>, search_path: Vec<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            search_path,
            working_dir: None,
            verbose: false,
            stop_time: None,
            replications: 1,
            single_step: false,
            sink: OutputSink::null(),
            fanout: Fanout {
                cache: None,
                observers: Vec::new(),
            },
            signals: Arc::new(RunSignals::new()),
            report: None,
            ran: false,
        }
    }

    fn spawn(&self) -> Result<Child, ExecutionFault> {
        let mut process = Process::new(&self.executable);
        process
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            process.current_dir(dir);
        }
        if let Ok(joined) = env::join_paths(&self.search_path) {
            process.env(CLASSPATH_ENV, &joined);
            process.env(LIBRARY_PATH_ENV, prepend_env(LIBRARY_PATH_ENV, &self.search_path));
        }

        // A snapshot copied moments ago can still be "busy" if another
        // thread forked while its write handle was open.
        let mut attempts = 0;
        loop {
            match process.spawn() {
                Ok(child) => return Ok(child),
                Err(e) if is_text_busy(&e) && attempts < 5 => {
                    attempts += 1;
                    thread::sleep(Duration::from_millis(20 * attempts));
                }
                Err(source) => {
                    return Err(ExecutionFault::Io {
                        context: format!("failed to start {}", self.executable.display()),
                        source,
                    });
                }
            }
        }
    }

    fn resolve_report(&self, path: PathBuf) -> PathBuf {
        if path.is_absolute() {
            return path;
        }
        match &self.working_dir {
            Some(dir) => dir.join(path),
            None => env::current_dir().map_or(path.clone(), |cwd| cwd.join(&path)),
        }
    }
}

impl Runnable for ProcessArtifact {
    fn run(&mut self) -> Result<(), ExecutionFault> {
        if self.ran {
            return Err(ExecutionFault::Protocol("artifact already executed".into()));
        }
        self.ran = true;

        let mut child = self.spawn()?;
        tracing::debug!(executable = %self.executable.display(), pid = child.id(), "artifact started");

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ExecutionFault::Protocol("artifact stdio not captured".into()));
        };
        let stdin = Arc::new(Mutex::new(stdin));

        let mut setup = vec![
            Command::Verbose(self.verbose),
            Command::Replications(self.replications),
            Command::SingleStep(self.single_step || self.signals.is_single_step()),
        ];
        if let Some(t) = self.stop_time {
            setup.push(Command::StopTime(t));
        }
        setup.push(if self.signals.is_stop_requested() {
            Command::Stop
        } else {
            Command::Run
        });
        for command in &setup {
            // A model that exits early closes its stdin; the outcome is
            // decided by what it printed, not by this write.
            if send(&stdin, command).is_err() {
                break;
            }
        }

        let forwarder = {
            let stdin = Arc::clone(&stdin);
            let signals = Arc::clone(&self.signals);
            thread::Builder::new()
                .name("simforge-signals".into())
                .spawn(move || forward_signals(&signals, &stdin))
        };
        let stderr_reader = thread::Builder::new()
            .name("simforge-stderr".into())
            .spawn(move || read_tail(stderr));

        let mut done = false;
        let mut fault = None;
        let mut violation = None;
        let mut io_error = None;
        let mut stdout = BufReader::new(stdout);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match stdout.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    io_error = Some(e);
                    break;
                }
            }
            // Models may print arbitrary bytes; only events need to be UTF-8.
            let line = String::from_utf8_lossy(&buf);
            let line = line.trim_end_matches(['\n', '\r']);
            match Event::parse(line) {
                Ok(Event::Property { name, old, new }) => self.fanout.notify(&name, &old, &new),
                Ok(Event::Report(path)) => self.report = Some(self.resolve_report(path)),
                Ok(Event::Fault(msg)) => {
                    fault.get_or_insert(msg);
                }
                Ok(Event::Done) => done = true,
                Ok(Event::Output(text)) => self.sink.write_line(&text),
                Err(msg) => {
                    violation.get_or_insert(msg);
                }
            }
        }

        let status = child.wait();
        self.signals.finish();
        drop(stdin);
        if let Ok(handle) = forwarder {
            let _ = handle.join();
        }
        let stderr = match stderr_reader {
            Ok(handle) => handle.join().unwrap_or_default(),
            Err(_) => String::new(),
        };

        let status = status.map_err(|source| ExecutionFault::Io {
            context: "failed to wait for artifact".into(),
            source,
        })?;
        tracing::debug!(status = %status, done, "artifact exited");

        if let Some(msg) = fault {
            return Err(ExecutionFault::Raised(msg));
        }
        if let Some(source) = io_error {
            return Err(ExecutionFault::Io {
                context: "failed to read artifact output".into(),
                source,
            });
        }
        if let Some(msg) = violation {
            return Err(ExecutionFault::Protocol(msg));
        }
        if !done || !status.success() {
            return Err(ExecutionFault::Exited {
                status: status.to_string(),
                stderr,
            });
        }
        Ok(())
    }
}

impl Configurable for ProcessArtifact {
    fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    fn set_stop_time(&mut self, stop_time: f64) {
        self.stop_time = Some(stop_time);
    }

    fn set_replications(&mut self, replications: u32) {
        self.replications = replications;
    }

    fn set_output_sink(&mut self, sink: OutputSink) {
        self.sink = sink;
    }

    fn set_single_step(&mut self, single_step: bool) {
        self.single_step = single_step;
    }

    fn set_property_cache(&mut self, cache: PropertyCache) {
        self.fanout.cache = Some(cache);
    }

    fn add_observer(&mut self, observer: Arc<dyn PropertyObserver>) {
        self.fanout.observers.push(observer);
    }

    fn bind_signals(&mut self, signals: Arc<RunSignals>) {
        self.signals = signals;
    }
}

impl Reportable for ProcessArtifact {
    fn report_path(&self) -> Option<PathBuf> {
        self.report.clone()
    }
}

fn send(stdin: &Mutex<ChildStdin>, command: &Command) -> std::io::Result<()> {
    let mut stdin = stdin.lock().unwrap_or_else(PoisonError::into_inner);
    writeln!(stdin, "{command}")?;
    stdin.flush()
}

fn forward_signals(signals: &RunSignals, stdin: &Mutex<ChildStdin>) {
    while let Some(signal) = signals.next() {
        let command = match signal {
            Signal::Stop => Command::Stop,
            Signal::Step => Command::Step,
            Signal::SingleStep(on) => Command::SingleStep(on),
        };
        if let Err(e) = send(stdin, &command) {
            tracing::debug!(error = %e, %command, "artifact no longer accepts commands");
            return;
        }
    }
}

/// Drain `stderr`, keeping only its last [`STDERR_TAIL`] bytes.
fn read_tail(mut stderr: impl Read) -> String {
    let mut tail = Vec::with_capacity(2 * STDERR_TAIL);
    let mut chunk = [0u8; 1024];
    loop {
        match stderr.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                tail.extend_from_slice(&chunk[..n]);
                if tail.len() > 2 * STDERR_TAIL {
                    tail.drain(..tail.len() - STDERR_TAIL);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(_) => break,
        }
    }
    let start = tail.len().saturating_sub(STDERR_TAIL);
    String::from_utf8_lossy(&tail[start..]).into_owned()
}

fn prepend_env(var: &str, paths: &[PathBuf]) -> OsString {
    let mut all: Vec<PathBuf> = paths.to_vec();
    if let Some(existing) = env::var_os(var) {
        all.extend(env::split_paths(&existing));
    }
    env::join_paths(all).unwrap_or_default()
}

#[cfg(target_os = "linux")]
fn is_text_busy(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(26)
}

#[cfg(not(target_os = "linux"))]
fn is_text_busy(_e: &std::io::Error) -> bool {
    false
}

/// Name of `artifact` relative to `classes_dir`, as the Stage layer
/// resolves it. `None` if it lives outside the classes directory.
pub(crate) fn artifact_name(classes_dir: &Path, artifact: &Path) -> Option<PathBuf> {
    artifact.strip_prefix(classes_dir).ok().map(Path::to_path_buf)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("model.sh");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    struct Recorder(Mutex<Vec<(String, String, String)>>);

    impl PropertyObserver for Recorder {
        fn property_changed(&self, name: &str, old: &str, new: &str) {
            self.0.lock().unwrap().push((name.into(), old.into(), new.into()));
        }
    }

    #[test]
    fn events_reach_observers_and_cache() {
        let dir = tempfile::tempdir().unwrap();
        let exe = script(
            dir.path(),
            "while read cmd; do [ \"$cmd\" = run ] && break; done\n\
             echo '@property replicationNumber 0 1'\n\
             echo 'hello from the model'\n\
             echo '@report out.txt'\n\
             echo '@done'",
        );
        let mut artifact = ProcessArtifact::new(&exe, vec![]);
        artifact.working_dir = Some(dir.path().to_path_buf());
        let cache = PropertyCache::new();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        artifact.set_property_cache(cache.clone());
        artifact.add_observer(recorder.clone());

        artifact.run().unwrap();
        assert_eq!(cache.get("replicationNumber").as_deref(), Some("1"));
        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![("replicationNumber".to_string(), "0".to_string(), "1".to_string())]
        );
        assert_eq!(artifact.report_path(), Some(dir.path().join("out.txt")));
        assert!(matches!(artifact.run(), Err(ExecutionFault::Protocol(_))));
    }

    #[test]
    fn settings_are_sent_before_run() {
        let dir = tempfile::tempdir().unwrap();
        let exe = script(
            dir.path(),
            "while read cmd; do\n\
               case \"$cmd\" in\n\
                 'replications 3') reps=3 ;;\n\
                 'stop-time 50') stop=50 ;;\n\
                 run) break ;;\n\
               esac\n\
             done\n\
             [ \"$reps\" = 3 ] && [ \"$stop\" = 50 ] && echo '@done'",
        );
        let mut artifact = ProcessArtifact::new(&exe, vec![]);
        artifact.set_replications(3);
        artifact.set_stop_time(50.0);
        artifact.run().unwrap();
    }

    #[test]
    fn fault_and_early_exit_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let exe = script(dir.path(), "echo '@fault queue overflow'; exit 1");
        let err = ProcessArtifact::new(&exe, vec![]).run().unwrap_err();
        assert!(matches!(err, ExecutionFault::Raised(ref m) if m == "queue overflow"));

        let exe = script(dir.path(), "echo 'boom' >&2; exit 3");
        let err = ProcessArtifact::new(&exe, vec![]).run().unwrap_err();
        let ExecutionFault::Exited { stderr, .. } = err else {
            panic!("expected early exit, got {err:?}");
        };
        assert_eq!(stderr.trim(), "boom");
    }

    #[test]
    fn stop_signal_is_forwarded() {
        let dir = tempfile::tempdir().unwrap();
        let exe = script(
            dir.path(),
            "while read cmd; do [ \"$cmd\" = run ] && break; done\n\
             echo started\n\
             while read cmd; do [ \"$cmd\" = stop ] && break; done\n\
             echo '@done'",
        );
        let signals = Arc::new(RunSignals::new());
        let mut artifact = ProcessArtifact::new(&exe, vec![]);
        artifact.bind_signals(Arc::clone(&signals));

        let stopper = {
            let signals = Arc::clone(&signals);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                signals.request_stop();
            })
        };
        artifact.run().unwrap();
        stopper.join().unwrap();
    }

    #[test]
    fn classpath_is_exported() {
        let dir = tempfile::tempdir().unwrap();
        let exe = script(
            dir.path(),
            "while read cmd; do [ \"$cmd\" = run ] && break; done\n\
             [ \"$SIMFORGE_CLASSPATH\" = /a:/b ] && echo '@done'",
        );
        ProcessArtifact::new(&exe, vec!["/a".into(), "/b".into()])
            .run()
            .unwrap();
    }

    #[test]
    fn non_utf8_output_is_forwarded_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let exe = script(
            dir.path(),
            "while read cmd; do [ \"$cmd\" = run ] && break; done\n\
             printf 'caf\\351 au lait\\n'\n\
             i=0; while [ $i -lt 2000 ]; do echo 'padding line for the pipe buffer'; i=$((i+1)); done\n\
             echo '@property served 0 7'\n\
             echo '@done'",
        );
        let out = Arc::new(Mutex::new(Vec::new()));
        let mut artifact = ProcessArtifact::new(&exe, vec![]);
        artifact.set_output_sink(OutputSink::new(Capture(Arc::clone(&out))));
        let cache = PropertyCache::new();
        artifact.set_property_cache(cache.clone());

        artifact.run().unwrap();
        assert_eq!(cache.get("served").as_deref(), Some("7"));
        let text = String::from_utf8(out.lock().unwrap().clone()).unwrap();
        assert!(text.starts_with("caf\u{fffd} au lait\n"), "{}", &text[..40]);
    }

    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn stderr_tail_is_bounded() {
        let mut noise = vec![b'x'; 10 * STDERR_TAIL];
        noise.extend_from_slice(b"last words");
        let tail = read_tail(std::io::Cursor::new(noise));
        assert_eq!(tail.len(), STDERR_TAIL);
        assert!(tail.ends_with("last words"));

        assert_eq!(read_tail(std::io::Cursor::new(b"short".to_vec())), "short");
    }

    #[test]
    fn artifact_names_are_relative_to_classes() {
        assert_eq!(
            artifact_name(Path::new("/p/classes"), Path::new("/p/classes/demo/Model_1")),
            Some(PathBuf::from("demo/Model_1"))
        );
        assert_eq!(artifact_name(Path::new("/p/classes"), Path::new("/tmp/Model_1")), None);
    }
}
