use rdtrace::cli::Options;
use rdtrace::error::Result;
use rdtrace::interpreter::Session;
use rdtrace::logging::LogLevel::*;
use rdtrace::logging::{log, set_threshold};
use rdtrace::session::{Controller, LoopExit};
use rdtrace::transport::{QueueTransport, Transport};
use rdtrace::{hygiene, interrupt, pidutil, sink};
use std::time::Duration;
use structopt::StructOpt;

const EVAL_TIMEOUT: Duration = Duration::from_secs(15);
const FORK_TIMEOUT: Duration = Duration::from_secs(30);

fn main() {
    let opts = Options::from_args();
    set_threshold(if opts.verbose > 0 { LogDebug } else { LogInfo });
    if let Err(e) = interrupt::install() {
        log!(LogWarn, "failed to install SIGINT handler: {}", e);
    }

    let code = run(opts).unwrap_or_else(|e| {
        log!(LogError, "{}", e);
        -1
    });
    std::process::exit(code);
}

fn run(opts: Options) -> Result<i32> {
    pidutil::validate(opts.pid)?;

    hygiene::scan_stale_queues();
    hygiene::advise_msgmnb();

    let transport = match QueueTransport::open(opts.pid) {
        Ok(t) => t,
        Err(e) => {
            log!(LogError, "{}", e);
            return Ok(-1);
        }
    };

    let sink_writer = match &opts.output {
        Some(path) => sink::file(path, opts.append)?,
        None => sink::stdout(),
    };
    let controller_pid = std::process::id() as i64;
    let session = Session::new(
        controller_pid,
        opts.pid as i64,
        sink_writer,
        opts.show_time,
        opts.show_duration(),
        opts.prefix.clone(),
    );
    let mut controller = Controller::new(transport, session, opts.timeout_duration());

    if let Err(e) = controller.attach() {
        log!(LogError, "{}", e);
        return Ok(-1);
    }

    if let Err(e) = configure(&mut controller, &opts) {
        log!(LogError, "{}", e);
        let _ = controller.detach();
        return Ok(-1);
    }

    match controller.run()? {
        LoopExit::TargetGone => Ok(0),
        LoopExit::Interrupted => match controller.detach() {
            Ok(()) => Ok(0),
            Err(e) => {
                log!(LogError, "{}", e);
                Ok(1)
            }
        },
    }
}

fn configure<T: Transport>(controller: &mut Controller<T>, opts: &Options) -> Result<()> {
    if opts.devmode {
        controller.devmode()?;
    }
    if opts.firehose {
        controller.firehose()?;
    }
    if opts.gc {
        controller.gc()?;
    }
    if let Some(ms) = opts.slow {
        if opts.cpu_time {
            controller.watchcpu(ms)?;
        } else {
            controller.watch(ms)?;
        }
    }
    for selector in &opts.add {
        controller.add(selector, opts.slow.is_some())?;
    }
    if let Some(expr) = &opts.eval {
        let result = controller.eval(expr, EVAL_TIMEOUT)?;
        log!(LogInfo, "evaled: {}", result);
    }
    if opts.fork {
        let pid = controller.fork(FORK_TIMEOUT)?;
        log!(LogInfo, "forked pid {}", pid);
    }
    Ok(())
}
