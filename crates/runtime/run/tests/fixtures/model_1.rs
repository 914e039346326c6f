//! Smallest model that speaks the artifact protocol.
//!
//! Keeps a run counter in a static, the way generated models keep their
//! simulation clock, so tests can tell whether two runs shared state.

pub mod demo {
    use std::io::{self, Write};
    use std::sync::atomic::{AtomicU32, Ordering};

    static RUN_COUNTER: AtomicU32 = AtomicU32::new(0);

    #[allow(non_camel_case_types)]
    pub struct Model_1 {
        pub verbose: bool,
        pub replications: u32,
        pub stop_time: f64,
    }

    impl Model_1 {
        pub fn run(&self, out: &mut impl Write) -> io::Result<()> {
            let runs = RUN_COUNTER.fetch_add(1, Ordering::SeqCst) + 1;
            writeln!(out, "@property runCounter {} {}", runs - 1, runs)?;

            let mut clock = 0.0;
            for rep in 1..=self.replications {
                writeln!(out, "@property replicationNumber {} {}", rep - 1, rep)?;
                clock += self.stop_time;
                if self.verbose {
                    writeln!(out, "replication {rep} ended at t={clock}")?;
                }
            }

            let report = format!("model_1-report-{}.txt", std::process::id());
            std::fs::write(&report, format!("runs={runs}\nclock={clock}\n"))?;
            writeln!(out, "@report {report}")?;
            writeln!(out, "@done")?;
            out.flush()
        }
    }
}

fn main() {
    use std::io::BufRead;

    let mut model = demo::Model_1 {
        verbose: false,
        replications: 1,
        stop_time: 10.0,
    };

    for line in std::io::stdin().lock().lines() {
        let Ok(line) = line else { return };
        let (command, arg) = line.split_once(' ').unwrap_or((line.as_str(), ""));
        match command {
            "verbose" => model.verbose = arg == "true",
            "replications" => model.replications = arg.parse().unwrap_or(1),
            "stop-time" => model.stop_time = arg.parse().unwrap_or(10.0),
            "run" => break,
            "stop" => {
                println!("@done");
                return;
            }
            _ => {}
        }
    }

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if let Err(e) = model.run(&mut out) {
        println!("@fault {e}");
    }
}
