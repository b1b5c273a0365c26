// ABOUTME: CLI inspection commands (stat, read, ls, exec) fanned out across targets
//
// All targets run concurrently through one Inspector, so repeated targets and
// aliases of the same endpoint share a pooled session. Results print in target
// order; a failing target never aborts the others.

use anyhow::Result;
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::json;
use std::future::Future;

use super::{ExecArgs, OutputFormat, PathArgs, ReadArgs};
use rinspect::inspect::{InspectError, Inspector};
use rinspect::ssh::ops::{ExecOutput, RemoteEntry, RemoteRead, RemoteStat};

/// Result for one target
pub struct Outcome<T> {
    pub target: String,
    pub result: Result<T, InspectError>,
}

/// Run `op` for every target concurrently, preserving target order
pub async fn fan_out<T, F, Fut>(targets: &[String], op: F) -> Vec<Outcome<T>>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<T, InspectError>>,
{
    let op = &op;
    join_all(targets.iter().map(|target| async move {
        Outcome {
            target: target.clone(),
            result: op(target.clone()).await,
        }
    }))
    .await
}

/// Execute the stat command; returns the number of failed targets
pub async fn stat(inspector: &Inspector, args: PathArgs, format: OutputFormat) -> Result<usize> {
    let path = args.path.as_str();
    let outcomes = fan_out(&args.hosts, |target| async move { inspector.stat(&target, path).await }).await;

    emit(&outcomes, format, |target, stat| {
        println!("{}", format_stat_line(target, stat));
    })
}

/// Execute the read command; returns the number of failed targets
pub async fn read(inspector: &Inspector, args: ReadArgs, format: OutputFormat) -> Result<usize> {
    let path = args.path.as_str();
    let max_bytes = args.max_bytes;
    let outcomes = fan_out(&args.hosts, |target| async move {
        match max_bytes {
            Some(limit) => inspector.read_bounded(&target, path, limit).await,
            None => inspector.read(&target, path).await,
        }
    })
    .await;

    let views: Vec<Outcome<ReadView>> = outcomes
        .into_iter()
        .map(|o| Outcome {
            target: o.target,
            result: o.result.map(|r| ReadView::from(&r)),
        })
        .collect();

    emit(&views, format, |target, read| {
        println!("==> {target}:{} <==", read.path);
        print!("{}", read.content);
        if !read.content.ends_with('\n') && !read.content.is_empty() {
            println!();
        }
        if read.truncated {
            println!("[truncated after {} bytes]", read.bytes);
        }
    })
}

/// Execute the ls command; returns the number of failed targets
pub async fn ls(inspector: &Inspector, args: PathArgs, format: OutputFormat) -> Result<usize> {
    let path = args.path.as_str();
    let outcomes = fan_out(&args.hosts, |target| async move { inspector.list(&target, path).await }).await;

    emit(&outcomes, format, |target, entries| {
        println!("==> {target}:{path} <==");
        for entry in entries {
            println!("{}", format_entry_line(entry));
        }
    })
}

/// Execute the exec command; returns the number of failed targets.
///
/// A non-zero remote exit status counts as a failure.
pub async fn exec(inspector: &Inspector, args: ExecArgs, format: OutputFormat) -> Result<usize> {
    let Some((program, rest)) = args.command.split_first() else {
        anyhow::bail!("No command given");
    };
    let outcomes = fan_out(&args.hosts, |target| async move {
        inspector.execute(&target, program, rest).await
    })
    .await;

    let failed_exits = outcomes
        .iter()
        .filter(|o| matches!(&o.result, Ok(output) if !output.success()))
        .count();

    let failed = emit(&outcomes, format, |target, output: &ExecOutput| {
        println!("==> {target} (exit {}) <==", output.exit_code);
        print!("{}", output.stdout);
        if !output.stderr.is_empty() {
            eprint!("{}", output.stderr);
        }
    })?;
    Ok(failed + failed_exits)
}

/// JSON-friendly view of a read result
#[derive(Debug, Serialize)]
pub struct ReadView {
    pub path: String,
    pub content: String,
    pub bytes: usize,
    pub truncated: bool,
}

impl From<&RemoteRead> for ReadView {
    fn from(read: &RemoteRead) -> Self {
        Self {
            path: read.path.clone(),
            content: read.text().into_owned(),
            bytes: read.bytes.len(),
            truncated: read.truncated,
        }
    }
}

/// Print outcomes and count failures
fn emit<T: Serialize>(
    outcomes: &[Outcome<T>],
    format: OutputFormat,
    render_text: impl Fn(&str, &T),
) -> Result<usize> {
    let failures = outcomes.iter().filter(|o| o.result.is_err()).count();

    match format {
        OutputFormat::Json => {
            let items: Vec<serde_json::Value> = outcomes.iter().map(outcome_json).collect();
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
        OutputFormat::Text => {
            for outcome in outcomes {
                match &outcome.result {
                    Ok(value) => render_text(&outcome.target, value),
                    Err(err) => eprintln!("{}: {} error: {err}", outcome.target, err.kind()),
                }
            }
        }
    }

    Ok(failures)
}

fn outcome_json<T: Serialize>(outcome: &Outcome<T>) -> serde_json::Value {
    match &outcome.result {
        Ok(value) => json!({
            "target": outcome.target,
            "ok": true,
            "result": value,
        }),
        Err(err) => json!({
            "target": outcome.target,
            "ok": false,
            "kind": err.kind(),
            "error": err.to_string(),
        }),
    }
}

fn format_stat_line(target: &str, stat: &RemoteStat) -> String {
    let owner = match (stat.uid, stat.gid) {
        (Some(uid), Some(gid)) => format!("{uid}:{gid}"),
        _ => "-".to_string(),
    };
    let modified = stat
        .modified
        .map_or_else(|| "-".to_string(), |m| m.format("%Y-%m-%d %H:%M:%S").to_string());

    format!(
        "{target}: {} {} {owner} {} {modified} {}",
        stat.kind.marker(),
        stat.permissions_octal().unwrap_or_else(|| "----".to_string()),
        stat.size.map_or_else(|| "-".to_string(), |s| s.to_string()),
        stat.path
    )
}

fn format_entry_line(entry: &RemoteEntry) -> String {
    let size = entry.size.map_or_else(|| "-".to_string(), |s| s.to_string());
    format!("{} {size:>12} {}", entry.kind.marker(), entry.name)
}
