//! Node-side runner: resolves the target process out of `/proc` and execs
//! the requested tracer with its output on stdout.

pub mod tracer;

use std::{process::Command, thread};

use anyhow::{Context, Result, ensure};
use nix::{
    sys::signal::{Signal, kill},
    unistd::Pid,
};
use podtrace_core::ProcessSelector;
use procfs_scan::HostProcFs;
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};

use crate::cli::runner::RunnerOpts;

pub fn runner_run(options: &RunnerOpts) -> Result<i32> {
    let selector = ProcessSelector::parse(&options.process_selector)
        .context("parsing --process-selector")?;
    let scope = tracer::TargetScope::from_flags(&options.pod_uid, &options.container_id)?;

    let procfs = HostProcFs::new();
    let command = tracer::prepare(
        &procfs,
        options.tracer,
        &scope,
        &selector,
        &options.program,
        &options.program_args,
    )?;
    execute(&command)
}

/// Runs the tracer with inherited stdio, forwarding SIGINT/SIGTERM so it can
/// flush its state; a second SIGINT kills it outright. Returns the tracer's
/// exit code.
fn execute(command: &tracer::TracerCommand) -> Result<i32> {
    println!(
        "if your program has maps to print, send a SIGINT using Ctrl-C, if you want to interrupt the execution send SIGINT two times"
    );
    log::debug!("starting tracer {} {:?}", command.program, command.args);

    let mut child = Command::new(&command.program)
        .args(&command.args)
        .spawn()
        .with_context(|| format!("starting {}", command.program))?;
    let child_pid = Pid::from_raw(child.id() as i32);

    let mut signals = Signals::new([SIGINT, SIGTERM]).context("installing signal handlers")?;
    let signals_handle = signals.handle();
    let forwarder = thread::spawn(move || {
        let mut interrupted = false;
        for signal in signals.forever() {
            let Ok(signal) = Signal::try_from(signal) else {
                continue;
            };
            if signal == Signal::SIGINT && interrupted {
                let _ = kill(child_pid, Signal::SIGKILL);
                continue;
            }
            if signal == Signal::SIGINT {
                interrupted = true;
                println!(
                    "\nfirst SIGINT received, now if your program had maps and did not free them it should print them out"
                );
            }
            let _ = kill(child_pid, signal);
        }
    });

    let status = child.wait().context("waiting for the tracer to exit")?;
    signals_handle.close();
    let _ = forwarder.join();

    if let Some(post) = &command.post_process {
        log::info!("running post processor {} {:?}", post.program, post.args);
        let post_status = Command::new(&post.program)
            .args(&post.args)
            .status()
            .with_context(|| format!("running post processor {}", post.program))?;
        ensure!(
            post_status.success(),
            "post processor {} failed with {post_status}",
            post.program
        );
    }

    Ok(status.code().unwrap_or(1))
}
