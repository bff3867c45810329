use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use wb_core::{logging, PromptGateway, Workbench, WorkbenchConfig, WorkbenchError};
use wb_kernel::{Decision, DecisionGateway, FixedGateway};
use wb_session::{SessionError, SessionInfo};

fn cli() -> Command {
    Command::new("workbench")
        .version(wb_core::VERSION)
        .about("Undoable, recordable mutation workbench")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("run")
                .about("Run a script, one unit per statement line")
                .arg(
                    Arg::new("script")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Script file"),
                )
                .arg(
                    Arg::new("save")
                        .long("save")
                        .value_parser(value_parser!(PathBuf))
                        .help("Save the resulting session to this file"),
                )
                .arg(
                    Arg::new("on-error")
                        .long("on-error")
                        .default_value("prompt")
                        .value_parser(["prompt", "retry", "abort", "rollback"])
                        .help("How failed units are handled"),
                ),
        )
        .subcommand(
            Command::new("inspect")
                .about("Show a session's header and requirements without restoring it")
                .arg(
                    Arg::new("session")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Session file"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
        .subcommand(
            Command::new("restore")
                .about("Restore a session and list its objects")
                .arg(
                    Arg::new("session")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Session file"),
                ),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    let config = match matches.get_one::<PathBuf>("config") {
        Some(path) => WorkbenchConfig::load(path)?,
        None => WorkbenchConfig::default(),
    };
    logging::init(&config.log_filter, matches.get_flag("log-json"));

    match matches.subcommand() {
        Some(("run", args)) => run(config, args).await,
        Some(("inspect", args)) => inspect(&config, args),
        Some(("restore", args)) => restore(config, args).await,
        Some((other, _)) => bail!("unknown command {other}"),
        None => bail!("no command given"),
    }
}

fn path_arg<'a>(args: &'a ArgMatches, name: &str) -> Result<&'a PathBuf> {
    args.get_one::<PathBuf>(name)
        .with_context(|| format!("missing argument <{name}>"))
}

async fn run(config: WorkbenchConfig, args: &ArgMatches) -> Result<()> {
    let script = path_arg(args, "script")?;
    let text = std::fs::read_to_string(script).with_context(|| format!("reading {}", script.display()))?;
    let gateway: Arc<dyn DecisionGateway> = match args.get_one::<String>("on-error").map(String::as_str) {
        Some("retry") => Arc::new(FixedGateway(Decision::Retry)),
        Some("abort") => Arc::new(FixedGateway(Decision::Abort)),
        Some("rollback") => Arc::new(FixedGateway(Decision::AbortAndRollback)),
        _ => Arc::new(PromptGateway),
    };

    let workbench = Workbench::new(config, gateway)?;
    let handles = workbench.run_script(&text).await?;
    let mut incomplete = 0usize;
    for handle in &handles {
        let outcome = handle.wait().await?;
        if !outcome.is_done() {
            incomplete += 1;
        }
        let phase = outcome.phase.as_str();
        match &outcome.error {
            Some(error) if !outcome.is_done() => println!("unit {:>4}  {phase:<8} {error}", handle.sequence()),
            _ => println!("unit {:>4}  {phase:<8} attempts={}", handle.sequence(), outcome.attempts),
        }
    }

    if let Some(path) = args.get_one::<PathBuf>("save") {
        let summary = workbench.save_session(path).await?;
        println!(
            "saved {} object(s), {} bytes to {} (state {})",
            summary.objects,
            summary.bytes,
            path.display(),
            summary.fingerprint.short()
        );
    }
    workbench.shutdown(true).await?;

    if incomplete > 0 {
        bail!("{incomplete} of {} unit(s) did not complete", handles.len());
    }
    Ok(())
}

fn inspect(config: &WorkbenchConfig, args: &ArgMatches) -> Result<()> {
    let path = path_arg(args, "session")?;
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let info = config.serializer().inspect(file)?;

    if args.get_flag("json") {
        let unmet: Vec<String> = info.unmet.iter().map(ToString::to_string).collect();
        let report = serde_json::json!({ "session": info, "unmet": unmet });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_info(&info);
    }
    Ok(())
}

fn print_info(info: &SessionInfo) {
    println!("format version: {}", info.format_version);
    if let Some(producer) = &info.producer {
        println!("producer:       {producer}");
    }
    if let Some(saved_at) = &info.saved_at {
        println!("saved at:       {}", saved_at.to_rfc3339());
    }
    println!("objects:        {}", info.object_count);
    if let Some(tiers) = &info.tiers {
        println!(
            "restore tiers:  {} leaf, {} dependent, {} other",
            tiers.leaf, tiers.dependent, tiers.other
        );
    }
    for requirement in &info.requirements {
        println!("requires:       {requirement}");
    }
    for unmet in &info.unmet {
        println!("UNMET:          {unmet}");
    }
}

async fn restore(config: WorkbenchConfig, args: &ArgMatches) -> Result<()> {
    let path = path_arg(args, "session")?;
    let workbench = Workbench::new(config, Arc::new(FixedGateway(Decision::Abort)))?;
    let summary = match workbench.restore_session(path).await {
        Ok(summary) => summary,
        Err(WorkbenchError::Session(SessionError::Unmet(unmet))) => {
            for requirement in &unmet {
                eprintln!("unmet requirement: {requirement}");
            }
            bail!("{} cannot be restored ({} unmet requirement(s))", path.display(), unmet.len());
        }
        Err(e) => return Err(e.into()),
    };

    println!(
        "restored {} object(s): {} leaf, {} dependent, {} other",
        summary.objects, summary.tiers.leaf, summary.tiers.dependent, summary.tiers.other
    );
    for object in workbench.snapshot().iter() {
        println!("  {:<24} {}", object.name(), object.type_tag());
    }
    let script = workbench.script_text();
    if !script.is_empty() {
        println!("script:\n{script}");
    }
    workbench.shutdown(false).await?;
    Ok(())
}
