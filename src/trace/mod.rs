//! Operator-side command implementations: resolve the target, submit the
//! trace job, and inspect or tear down what was submitted.

use anyhow::{Context, Result, ensure};
use kube::{Client, Config};
use podtrace_core::ProcessSelector;
use uuid::Uuid;

pub mod job;
pub mod logs;
pub mod target;
mod term_print;

use crate::{
    cli::trace::{Commands, Delete, Get, Run, TraceCliOpts},
    trace::{
        job::{NAME_PREFIX, ProgramSource, TraceJob, TraceJobClient, TraceJobFilter},
        term_print::TermPrintable,
    },
};

pub async fn trace_cli_run(options: &TraceCliOpts) -> Result<()> {
    log::trace!("podtrace CLI options: {:?}", options);

    let config = Config::infer()
        .await
        .context("inferring the Kubernetes configuration")?;
    let namespace = options
        .namespace
        .clone()
        .unwrap_or_else(|| config.default_namespace.clone());
    let client = Client::try_from(config).context("building the Kubernetes client")?;

    match &options.command {
        Commands::Run(opts) => run(client, &namespace, opts).await,
        Commands::Get(opts) => get(client, &namespace, opts).await,
        Commands::Logs(opts) => logs::stream(client, &namespace, &opts.trace, opts.follow).await,
        Commands::Delete(opts) => delete(client, &namespace, opts).await,
    }
}

async fn run(client: Client, namespace: &str, opts: &Run) -> Result<()> {
    let process_selector =
        ProcessSelector::parse(&opts.process_selector).context("parsing --process-selector")?;
    if opts.tracer.requires_pid_selector() {
        ensure!(
            process_selector.pid().is_some_and(|pid| !pid.is_empty()),
            "tracer {} requires a pid term in --process-selector",
            opts.tracer
        );
    }

    let program = program_source(opts)?;
    ensure!(!program.text().trim().is_empty(), "the program is empty");

    let target_namespace = opts.target_namespace.as_deref().unwrap_or(namespace);
    let target = target::resolve_target(
        client.clone(),
        &opts.resource,
        opts.target_container(),
        target_namespace,
    )
    .await?;

    let id = Uuid::new_v4().to_string();
    let trace_job = TraceJob {
        name: format!("{NAME_PREFIX}{id}"),
        id: id.clone(),
        namespace: namespace.to_string(),
        service_account: opts.service_account.clone(),
        tracer: opts.tracer,
        target,
        process_selector,
        program,
        program_args: opts.program_args.clone(),
        image: opts.image.clone(),
        deadline: opts.deadline,
        deadline_grace_period: opts.deadline_grace_period,
    };

    TraceJobClient::namespaced(client, namespace)
        .create(&trace_job)
        .await
        .context("creating the trace job")?;

    format!("trace {id} created").term_print()?;
    Ok(())
}

fn program_source(opts: &Run) -> Result<ProgramSource> {
    match (&opts.eval, &opts.filename, &opts.program) {
        (Some(program), None, None) => Ok(ProgramSource::ConfigMap(program.clone())),
        (None, Some(path), None) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading program file {}", path.display()))?;
            Ok(ProgramSource::ConfigMap(text))
        }
        (None, None, Some(reference)) => Ok(ProgramSource::InImage(reference.clone())),
        _ => unreachable!("one program source is enforced by clap"),
    }
}

async fn get(client: Client, namespace: &str, opts: &Get) -> Result<()> {
    let jobs = if opts.all_namespaces {
        TraceJobClient::all(client)
    } else {
        TraceJobClient::namespaced(client, namespace)
    };
    let filter = match &opts.trace_id {
        Some(id) => TraceJobFilter::by_id(id),
        None => TraceJobFilter::default(),
    };
    jobs.list(&filter)
        .await
        .context("listing trace jobs")?
        .term_print()?;
    Ok(())
}

async fn delete(client: Client, namespace: &str, opts: &Delete) -> Result<()> {
    let jobs = TraceJobClient::namespaced(client, namespace);
    let deleted = if opts.all {
        jobs.delete(&TraceJobFilter::default())
            .await
            .context("deleting trace jobs")?
    } else {
        // The reference is tried as a trace id first, then as a job name.
        let trace = opts.trace.as_deref().unwrap_or_default();
        let by_id = jobs
            .delete(&TraceJobFilter::by_id(trace))
            .await
            .context("deleting trace jobs")?;
        if by_id.is_empty() {
            jobs.delete(&TraceJobFilter::by_name(trace))
                .await
                .context("deleting trace jobs")?
        } else {
            by_id
        }
    };

    if deleted.is_empty() {
        "no trace found to be deleted".to_string().term_print()?;
    } else {
        for name in deleted {
            format!("trace job {name} deleted").term_print()?;
        }
    }
    Ok(())
}
