use std::cell::Cell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hostlink_session::{Application, ReturnType, Session, SessionError, Signature, Value};
use serde::Serialize;
use tracing::{debug, info};

use crate::cmd::RunArgs;
use crate::exit::{session_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_json, table, OutputFormat};

const CTRLC_POLL: Duration = Duration::from_millis(100);

#[derive(Default)]
struct Counters {
    ticks: Cell<u64>,
    calls: Cell<u64>,
}

struct Monitor {
    echo: Option<String>,
    print: Option<String>,
    tick_limit: Option<u64>,
    counters: Rc<Counters>,
    running: Arc<AtomicBool>,
}

impl Application for Monitor {
    fn initialize(&mut self, session: &Session) -> hostlink_session::Result<()> {
        if let Some(name) = &self.echo {
            let counters = Rc::clone(&self.counters);
            session.register_callback(name, Signature::new(ReturnType::Int).value(), move |args| {
                counters.calls.set(counters.calls.get() + 1);
                args.int(0).map(Value::Int)
            })?;
        }
        if let Some(text) = &self.print {
            session.print(text)?;
        }
        session.start()?;

        let running = Arc::clone(&self.running);
        let watcher = session.clone();
        session.spawn(async move {
            let mut interval = tokio::time::interval(CTRLC_POLL);
            while running.load(Ordering::SeqCst) {
                interval.tick().await;
            }
            info!("interrupted; stopping session");
            watcher.stop();
        })
    }

    fn on_tick(&mut self, session: &Session) {
        let ticks = self.counters.ticks.get() + 1;
        self.counters.ticks.set(ticks);
        debug!(ticks, "server tick");
        if self.tick_limit.is_some_and(|limit| ticks >= limit) {
            session.stop();
        }
    }
}

#[derive(Serialize)]
struct RunSummary {
    pipe: String,
    protocol_version: Option<u32>,
    plugin_version: Option<String>,
    ticks: u64,
    calls: u64,
    ended: &'static str,
}

pub fn run(args: RunArgs, format: OutputFormat) -> CliResult<i32> {
    let config = args.target.session_config()?;
    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(Arc::clone(&running))?;

    let session =
        Session::connect(config).map_err(|err| session_error("connect failed", err))?;
    let counters = Rc::new(Counters::default());
    let monitor = Monitor {
        echo: args.echo,
        print: args.print,
        tick_limit: args.ticks,
        counters: Rc::clone(&counters),
        running,
    };

    let ended = match session.run(monitor) {
        Ok(()) => "stopped",
        Err(SessionError::Disconnected(reason)) => {
            info!(reason, "host closed the session");
            "disconnected"
        }
        Err(err) => return Err(session_error("session failed", err)),
    };

    let announcement = session.announcement();
    let summary = RunSummary {
        pipe: args.target.pipe,
        protocol_version: announcement.map(|a| a.protocol_version),
        plugin_version: announcement.map(|a| a.plugin_version.to_string()),
        ticks: counters.ticks.get(),
        calls: counters.calls.get(),
        ended,
    };
    print_summary(&summary, format);
    Ok(SUCCESS)
}

fn print_summary(summary: &RunSummary, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(summary),
        OutputFormat::Table => {
            let mut t = table(vec!["PIPE", "PLUGIN", "TICKS", "CALLS", "ENDED"]);
            t.add_row(vec![
                summary.pipe.clone(),
                summary.plugin_version.clone().unwrap_or_default(),
                summary.ticks.to_string(),
                summary.calls.to_string(),
                summary.ended.to_string(),
            ]);
            println!("{t}");
        }
        OutputFormat::Pretty => println!(
            "pipe={} plugin={} ticks={} calls={} ended={}",
            summary.pipe,
            summary.plugin_version.as_deref().unwrap_or("-"),
            summary.ticks,
            summary.calls,
            summary.ended
        ),
        OutputFormat::Raw => println!("{}", summary.ticks),
    }
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
