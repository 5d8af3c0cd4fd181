use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use hostlink_session::{Application, Session, SessionError};
use serde::Serialize;
use tracing::debug;

use crate::cmd::PingArgs;
use crate::exit::{session_error, CliResult, SUCCESS};
use crate::output::{millis, print_json, print_raw, table, OutputFormat};

#[derive(Default)]
struct Outcome {
    samples: Vec<Duration>,
    error: Option<SessionError>,
}

struct Pinger {
    count: u32,
    outcome: Rc<RefCell<Outcome>>,
}

impl Application for Pinger {
    fn initialize(&mut self, session: &Session) -> hostlink_session::Result<()> {
        session.start()?;

        let count = self.count;
        let outcome = Rc::clone(&self.outcome);
        let pinger = session.clone();
        session.spawn(async move {
            for seq in 0..count {
                match pinger.ping().await {
                    Ok(rtt) => {
                        debug!(seq, rtt_ms = millis(rtt), "pong");
                        outcome.borrow_mut().samples.push(rtt);
                    }
                    Err(err) => {
                        outcome.borrow_mut().error = Some(err);
                        break;
                    }
                }
            }
            pinger.stop();
        })
    }
}

#[derive(Serialize)]
struct PingOutput {
    pipe: String,
    protocol_version: Option<u32>,
    plugin_version: Option<String>,
    rtt_ms: Vec<f64>,
    min_ms: f64,
    avg_ms: f64,
    max_ms: f64,
}

impl PingOutput {
    fn new(pipe: String, session: &Session, samples: &[Duration]) -> Self {
        let rtt_ms: Vec<f64> = samples.iter().copied().map(millis).collect();
        let min_ms = rtt_ms.iter().copied().fold(f64::INFINITY, f64::min);
        let max_ms = rtt_ms.iter().copied().fold(0.0, f64::max);
        let total: Duration = samples.iter().sum();
        let avg_ms = match u32::try_from(samples.len()) {
            Ok(n) if n > 0 => millis(total / n),
            _ => 0.0,
        };
        let announcement = session.announcement();
        Self {
            pipe,
            protocol_version: announcement.map(|a| a.protocol_version),
            plugin_version: announcement.map(|a| a.plugin_version.to_string()),
            min_ms: if rtt_ms.is_empty() { 0.0 } else { min_ms },
            avg_ms,
            max_ms,
            rtt_ms,
        }
    }
}

pub fn run(args: PingArgs, format: OutputFormat) -> CliResult<i32> {
    let config = args.target.session_config()?;
    let session =
        Session::connect(config).map_err(|err| session_error("connect failed", err))?;

    let outcome = Rc::new(RefCell::new(Outcome::default()));
    let pinger = Pinger {
        count: args.count,
        outcome: Rc::clone(&outcome),
    };
    session
        .run(pinger)
        .map_err(|err| session_error("session failed", err))?;

    let Outcome { samples, error } = outcome.take();
    if let Some(err) = error {
        return Err(session_error("ping failed", err));
    }

    let output = PingOutput::new(args.target.pipe, &session, &samples);
    print_ping(&output, format);
    Ok(SUCCESS)
}

fn print_ping(output: &PingOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(output),
        OutputFormat::Table => {
            let mut t = table(vec!["SEQ", "RTT (ms)"]);
            for (seq, rtt) in output.rtt_ms.iter().enumerate() {
                t.add_row(vec![seq.to_string(), format!("{rtt:.2}")]);
            }
            println!("{t}");
            println!(
                "min/avg/max = {:.2}/{:.2}/{:.2} ms",
                output.min_ms, output.avg_ms, output.max_ms
            );
        }
        OutputFormat::Pretty => {
            for (seq, rtt) in output.rtt_ms.iter().enumerate() {
                println!("pong from {}: seq={seq} time={rtt:.2} ms", output.pipe);
            }
        }
        OutputFormat::Raw => {
            let lines: String = output
                .rtt_ms
                .iter()
                .map(|rtt| format!("{rtt:.2}\n"))
                .collect();
            print_raw(lines.as_bytes());
        }
    }
}
