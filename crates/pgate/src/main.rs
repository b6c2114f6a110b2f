#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pausegate_core::state::RunSnapshot;
use pausegate_core::traits::{ExecutionEngine, IdentityProvider, PauseMarker};
use pausegate_core::types::{BoundValue, Interruption, Outcome, Permission, Principal, RawEntry};
use pausegate_engine::gate::{Collaborators, PauseGate};
use pausegate_engine::registry::RunRecord;
use pausegate_engine::routes::{self, CrumbIssuer, HttpRequest, Method, Response, Route};
use pausegate_engine::state::store::load_snapshot;
use pausegate_engine::state::{journal, Journal, JournalConsole, JournalPause, RunPaths, RunWriter};

#[derive(Parser)]
#[command(
    name = "pgate",
    version,
    about = "Approval gates for paused runs. Unix-friendly."
)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Args)]
struct Voter {
    /// Principal to act as.
    #[arg(long)]
    user: String,

    /// Group the principal belongs to (repeatable).
    #[arg(long = "group")]
    groups: Vec<String>,
}

impl Voter {
    fn principal(&self) -> Principal {
        Principal::new(&self.user).with_groups(self.groups.iter().cloned())
    }
}

#[derive(Subcommand)]
enum Cmd {
    /// Validate gate request files: schema, submitter expression, lint.
    Check {
        /// One or more gate request .json files.
        #[arg(required = true)]
        files: Vec<String>,

        /// Output structured JSON reports.
        #[arg(long)]
        json: bool,

        /// Fail on warnings (not just errors).
        #[arg(long)]
        strict: bool,
    },

    /// Pause a run on a new input gate.
    Open {
        /// Path to the run file (<name>.run.json); created if missing.
        run: PathBuf,

        /// Gate request .json file.
        #[arg(long)]
        request: String,

        /// Run id for a new run file (default: the run file's name).
        #[arg(long)]
        id: Option<String>,

        /// Console URL of a new run, relative to the server root.
        #[arg(long)]
        url: Option<String>,

        /// Output JSON.
        #[arg(long)]
        json: bool,
    },

    /// List the pending inputs of a run.
    Pending {
        run: PathBuf,

        /// Output JSON.
        #[arg(long)]
        json: bool,
    },

    /// Approve a pending input.
    Proceed {
        run: PathBuf,

        /// Gate id.
        gate: String,

        #[command(flatten)]
        voter: Voter,

        /// Parameter value as NAME=VALUE.
        #[arg(long = "param", value_name = "NAME=VALUE")]
        params: Vec<String>,

        /// File parameter as NAME=PATH.
        #[arg(long = "file", value_name = "NAME=PATH")]
        files: Vec<String>,

        /// Plain proceed without a form (parameterless gates only).
        #[arg(long, conflicts_with_all = ["params", "files"])]
        empty: bool,
    },

    /// Reject a pending input.
    Abort {
        run: PathBuf,

        /// Gate id.
        gate: String,

        #[command(flatten)]
        voter: Voter,

        /// The principal holds CANCEL permission on the run.
        #[arg(long)]
        cancel_permission: bool,
    },

    /// Abort a pending input on behalf of the system.
    Stop {
        run: PathBuf,

        /// Gate id.
        gate: String,

        #[arg(long, default_value = "stopped from the command line")]
        reason: String,
    },

    /// Show pending inputs, settled history, and approvers of a run.
    Status {
        run: PathBuf,

        /// Output JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show or verify the hash-chained run journal.
    Journal {
        run: PathBuf,

        /// Verify the hash chain.
        #[arg(long)]
        verify: bool,
    },
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.cmd {
        Cmd::Check {
            files,
            json,
            strict,
        } => cmd_check(&files, json, strict),

        Cmd::Open {
            run,
            request,
            id,
            url,
            json,
        } => cmd_open(&run, &request, id.as_deref(), url.as_deref(), json),

        Cmd::Pending { run, json } => cmd_pending(&run, json),

        Cmd::Proceed {
            run,
            gate,
            voter,
            params,
            files,
            empty,
        } => cmd_proceed(&run, &gate, &voter, &params, &files, empty),

        Cmd::Abort {
            run,
            gate,
            voter,
            cancel_permission,
        } => cmd_abort(&run, &gate, &voter, cancel_permission),

        Cmd::Stop { run, gate, reason } => cmd_stop(&run, &gate, &reason),

        Cmd::Status { run, json } => cmd_status(&run, json),

        Cmd::Journal { run, verify } => cmd_journal(&run, verify),
    }
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .init();
}

// ── Host collaborators ──────────────────────────────────────────

/// The acting principal, fixed for the process.
struct StaticIdentity {
    principal: Option<Principal>,
    cancel: bool,
}

impl StaticIdentity {
    fn acting(principal: Principal, cancel: bool) -> Self {
        Self {
            principal: Some(principal),
            cancel,
        }
    }

    fn nobody() -> Self {
        Self {
            principal: None,
            cancel: false,
        }
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_principal(&self) -> Option<Principal> {
        self.principal.clone()
    }

    fn has_permission(&self, principal: &Principal, _record_id: &str, permission: Permission) -> bool {
        permission == Permission::Cancel
            && self.cancel
            && self
                .principal
                .as_ref()
                .is_some_and(|me| me.name == principal.name)
    }
}

/// Records the engine callback so the command can report it as JSON.
#[derive(Default)]
struct CliEngine {
    dispatched: Mutex<Option<Value>>,
}

impl CliEngine {
    fn record(&self, event: Value) {
        *self.dispatched.lock().unwrap_or_else(PoisonError::into_inner) = Some(event);
    }

    fn take(&self) -> Option<Value> {
        self.dispatched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl ExecutionEngine for CliEngine {
    fn resume(&self, gate_id: &str, value: Option<BoundValue>) {
        self.record(json!({
            "gate": gate_id,
            "status": "accepted",
            "value": serde_json::to_value(&value).unwrap_or_default(),
        }));
    }

    fn fail(&self, gate_id: &str, interruption: Interruption) {
        self.record(json!({
            "gate": gate_id,
            "status": "rejected",
            "rejected_by": interruption.rejection.by.clone(),
            "cause": interruption.cause.clone(),
            "message": interruption.to_string(),
        }));
    }
}

/// Per-process crumb; the CLI is its own only client.
struct SessionCrumb(String);

impl SessionCrumb {
    fn new() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        Self(format!("{:x}-{nanos:x}", std::process::id()))
    }
}

impl CrumbIssuer for SessionCrumb {
    fn validate(&self, crumb: Option<&str>) -> bool {
        crumb == Some(self.0.as_str())
    }
}

/// A locked, restored run with its journal and collaborators.
struct Session {
    run: Arc<RunRecord>,
    journal: Arc<Journal>,
    engine: Arc<CliEngine>,
    identity: Arc<dyn IdentityProvider>,
    crumb: SessionCrumb,
}

impl Session {
    /// Lock and load `path`. With `fresh`, a missing run file starts a new
    /// run with that id and URL; otherwise it must exist.
    fn open(
        path: &Path,
        identity: Arc<dyn IdentityProvider>,
        fresh: Option<(&str, &str)>,
    ) -> Result<Self> {
        let writer = Arc::new(RunWriter::acquire(path)?);
        let snapshot = match fresh {
            Some((id, url)) => writer.load_or_new(id, url)?,
            None => writer.load()?,
        };
        let journal = Journal::new(&writer.paths().journal);
        let engine = Arc::new(CliEngine::default());
        let artifacts = writer.paths().artifacts.clone();
        let run = RunRecord::restore(snapshot, artifacts, writer, |pending| {
            collaborators(&journal, &engine, &identity, &pending.request.id)
        })?;
        Ok(Self {
            run,
            journal,
            engine,
            identity,
            crumb: SessionCrumb::new(),
        })
    }

    fn collaborators(&self, gate_id: &str) -> Collaborators {
        collaborators(&self.journal, &self.engine, &self.identity, gate_id)
    }

    /// Send one route through the HTTP surface and print the result.
    fn dispatch(&self, gate_id: &str, route: Route) -> Result<()> {
        let gate = self.run.gate(gate_id);
        let request = HttpRequest {
            method: Method::Post,
            crumb: Some(self.crumb.0.as_str()),
        };
        match routes::dispatch(
            &self.run,
            gate_id,
            route,
            request,
            self.identity.as_ref(),
            &self.crumb,
        ) {
            Response::Ok | Response::Redirect(_) => {}
            Response::Failure { message } => bail!("{message}"),
            Response::NotFound => bail!("no pending input '{gate_id}' in run {}", self.run.id()),
            other => bail!("request refused with status {}", other.status()),
        }

        if let Some(gate) = gate.filter(|g| !g.is_settled()) {
            self.run.save()?;
            return print_json(&json!({
                "gate": gate.id(),
                "status": "pending",
                "votes": gate.votes(),
            }));
        }
        self.report(gate_id)
    }

    fn report(&self, gate_id: &str) -> Result<()> {
        let event = self
            .engine
            .take()
            .ok_or_else(|| anyhow!("input '{gate_id}' settled without an engine callback"))?;
        print_json(&event)
    }
}

fn collaborators(
    journal: &Arc<Journal>,
    engine: &Arc<CliEngine>,
    identity: &Arc<dyn IdentityProvider>,
    gate_id: &str,
) -> Collaborators {
    Collaborators {
        engine: engine.clone(),
        identity: identity.clone(),
        console: Arc::new(JournalConsole::new(journal.clone()).echo_to_stderr()),
        node: Some(Arc::new(JournalPause::new(journal.clone(), gate_id)) as Arc<dyn PauseMarker>),
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// `deploy.run.json` → `deploy`.
fn run_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.strip_suffix(".run.json") {
        Some(stem) => stem.to_string(),
        None => path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or(name),
    }
}

fn split_pair<'a>(arg: &'a str, flag: &str) -> Result<(&'a str, &'a str)> {
    arg.split_once('=')
        .filter(|(name, _)| !name.is_empty())
        .with_context(|| format!("{flag} expects NAME=VALUE, got '{arg}'"))
}

fn parse_entries(params: &[String], files: &[String]) -> Result<Vec<RawEntry>> {
    let mut entries = Vec::with_capacity(params.len() + files.len());
    for param in params {
        let (name, raw) = split_pair(param, "--param")?;
        entries.push(RawEntry::value(name, Value::String(raw.to_string())));
    }
    for file in files {
        let (name, path) = split_pair(file, "--file")?;
        let content =
            std::fs::read(path).with_context(|| format!("cannot read upload {path}"))?;
        entries.push(RawEntry::upload(name, content));
    }
    Ok(entries)
}

// ── Commands ────────────────────────────────────────────────────

fn cmd_check(files: &[String], json_out: bool, strict: bool) -> Result<()> {
    let mut reports = Vec::new();
    for file in files {
        let content = std::fs::read_to_string(file)
            .map_err(|e| anyhow!("cannot read {file}: {e}"))?;
        let data: Value = serde_json::from_str(&content)
            .map_err(|e| anyhow!("{file}: invalid JSON: {e}"))?;
        let mut report = pausegate_core::schema::check(&data, file, strict);
        pausegate_engine::formula::check_submitter(&data, &mut report, strict);
        reports.push(report);
    }

    if json_out {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            if report.pass {
                eprintln!("  ok  {}", report.file);
            } else {
                eprintln!("  FAIL {}", report.file);
            }
            for e in &report.errors {
                eprintln!("  error {}: {} {}", e.code, e.message, e.path.as_deref().unwrap_or(""));
            }
            for w in &report.warnings {
                eprintln!("  warn  {}: {} {}", w.code, w.message, w.path.as_deref().unwrap_or(""));
            }
        }
    }

    let failed: Vec<&str> = reports
        .iter()
        .filter(|r| !r.pass)
        .map(|r| r.file.as_str())
        .collect();
    if !failed.is_empty() {
        bail!("check failed for {}", failed.join(", "));
    }
    Ok(())
}

fn cmd_open(
    run_path: &Path,
    request_file: &str,
    id: Option<&str>,
    url: Option<&str>,
    json_out: bool,
) -> Result<()> {
    let request = pausegate_core::schema::load_request(request_file)?;
    let stem = run_stem(run_path);
    let run_id = id.map(str::to_string).unwrap_or_else(|| stem.clone());
    let url = url
        .map(str::to_string)
        .unwrap_or_else(|| format!("job/{stem}/"));

    let session = Session::open(
        run_path,
        Arc::new(StaticIdentity::nobody()),
        Some((run_id.as_str(), url.as_str())),
    )?;
    let collaborators = session.collaborators(&request.id);
    let gate = PauseGate::new(request, &session.run, collaborators)
        .with_context(|| format!("cannot create input from {request_file}"))?;
    gate.start()?;
    session
        .run
        .save()
        .with_context(|| format!("cannot save run {}", run_path.display()))?;

    if json_out {
        print_json(&json!({
            "run": session.run.id(),
            "gate": gate.id(),
            "status": "pending",
            "parameterless": gate.request().is_parameterless(),
            "votes": gate.votes(),
        }))?;
    } else {
        eprintln!("  paused {} on input {}", session.run.id(), gate.id());
    }
    Ok(())
}

fn cmd_pending(run_path: &Path, json_out: bool) -> Result<()> {
    let snapshot = load_snapshot(run_path)?;

    if json_out {
        let pending: Vec<Value> = snapshot
            .pending
            .iter()
            .map(|p| {
                json!({
                    "id": p.request.id,
                    "message": p.request.message,
                    "submitter": p.request.submitter(),
                    "parameters": p.request.parameters.iter().map(|d| d.name()).collect::<Vec<_>>(),
                    "votes": p.ledger,
                    "paused_at": p.paused_at.to_rfc3339(),
                })
            })
            .collect();
        return print_json(&Value::Array(pending));
    }

    if snapshot.pending.is_empty() {
        eprintln!("  no pending inputs in {}", snapshot.id);
    }
    for p in &snapshot.pending {
        eprintln!(
            "  {}  {}  submitter: {}",
            p.request.id,
            p.request.message,
            p.request.submitter().unwrap_or("anyone")
        );
        if let Some(ledger) = &p.ledger {
            let votes: Vec<String> = ledger
                .iter()
                .map(|(name, v)| format!("{name}={}", if *v { "yes" } else { "no" }))
                .collect();
            eprintln!("    votes: {}", votes.join(" "));
        }
    }
    Ok(())
}

fn cmd_proceed(
    run_path: &Path,
    gate_id: &str,
    voter: &Voter,
    params: &[String],
    files: &[String],
    empty: bool,
) -> Result<()> {
    let route = if empty {
        Route::ProceedEmpty
    } else {
        Route::Proceed(parse_entries(params, files)?)
    };
    let identity = Arc::new(StaticIdentity::acting(voter.principal(), false));
    Session::open(run_path, identity, None)?.dispatch(gate_id, route)
}

fn cmd_abort(run_path: &Path, gate_id: &str, voter: &Voter, cancel_permission: bool) -> Result<()> {
    let identity = Arc::new(StaticIdentity::acting(voter.principal(), cancel_permission));
    Session::open(run_path, identity, None)?.dispatch(gate_id, Route::Abort)
}

fn cmd_stop(run_path: &Path, gate_id: &str, reason: &str) -> Result<()> {
    let session = Session::open(run_path, Arc::new(StaticIdentity::nobody()), None)?;
    let gate = session
        .run
        .gate(gate_id)
        .with_context(|| format!("no pending input '{gate_id}' in run {}", session.run.id()))?;
    let worker = gate
        .stop(reason)
        .ok_or_else(|| anyhow!("cannot start abort worker for '{gate_id}'"))?;
    worker
        .join()
        .map_err(|_| anyhow!("abort worker for '{gate_id}' panicked"))?;
    session.report(gate_id)
}

fn cmd_status(run_path: &Path, json_out: bool) -> Result<()> {
    let snapshot: RunSnapshot = load_snapshot(run_path)?;

    if json_out {
        return print_json(&serde_json::to_value(&snapshot)?);
    }

    eprintln!("  run:       {} (/{})", snapshot.id, snapshot.url);
    eprintln!("  pending:   {}", snapshot.pending.len());
    eprintln!("  approvers: {}", snapshot.approvers.join(", "));
    for settled in &snapshot.history {
        let result = match &settled.outcome {
            Outcome::Accepted { .. } => "accepted".to_string(),
            Outcome::Rejected { interruption } => interruption.to_string(),
        };
        let waited = settled.settled_at - settled.paused_at;
        eprintln!(
            "  {}  {}  after {}s",
            settled.id,
            result,
            waited.num_seconds()
        );
    }
    Ok(())
}

fn cmd_journal(run_path: &Path, verify: bool) -> Result<()> {
    let paths = RunPaths::for_run(run_path);

    if verify {
        let entries = journal::verify_chain(&paths.journal)?;
        print_json(&json!({
            "journal": paths.journal.display().to_string(),
            "entries": entries,
            "valid": true,
        }))?;
        eprintln!("  ok  {entries} entries, hash chain intact");
        return Ok(());
    }

    for entry in journal::read_entries(&paths.journal)? {
        let ts = entry.get("ts").and_then(Value::as_str).unwrap_or("");
        let line = match entry.get("event").and_then(Value::as_str) {
            Some("notice") => entry
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            Some("pause_begin") => format!("-- pause begins on {}", node_of(&entry)),
            Some("pause_end") => format!("-- pause ends on {}", node_of(&entry)),
            other => format!("-- {}", other.unwrap_or("unknown event")),
        };
        println!("{ts}  {line}");
    }
    Ok(())
}

fn node_of(entry: &Value) -> &str {
    entry.get("node").and_then(Value::as_str).unwrap_or("?")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_stem_strips_the_run_suffix() {
        assert_eq!(run_stem(Path::new("/tmp/deploy-42.run.json")), "deploy-42");
        assert_eq!(run_stem(Path::new("deploy.json")), "deploy");
    }

    #[test]
    fn params_are_passed_as_text_and_files_as_content() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("b.tgz");
        std::fs::write(&bundle, b"tarball").unwrap();
        let entries = parse_entries(
            &["force=true".into(), "tag=v1.2".into(), "expr=a=b".into()],
            &[format!("bundle={}", bundle.display())],
        )
        .unwrap();
        assert_eq!(entries[0].get("value"), Some(&json!("true")));
        assert_eq!(entries[1].get("value"), Some(&json!("v1.2")));
        assert_eq!(entries[2].get("value"), Some(&json!("a=b")));
        assert_eq!(entries[3].upload.as_deref(), Some(&b"tarball"[..]));
        assert!(entries[3].fields.is_empty());
    }

    #[test]
    fn unreadable_upload_fails_before_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let missing = format!("bundle={}", dir.path().join("nope").display());
        let err = parse_entries(&[], &[missing]).unwrap_err();
        assert!(err.to_string().contains("cannot read upload"));
    }

    #[test]
    fn malformed_pair_is_rejected() {
        assert!(parse_entries(&["novalue".into()], &[]).is_err());
        assert!(parse_entries(&["=x".into()], &[]).is_err());
    }

    #[test]
    fn cancel_grant_covers_only_the_acting_principal() {
        let identity = StaticIdentity::acting(Principal::new("admin"), true);
        assert!(identity.has_permission(&Principal::new("admin"), "run", Permission::Cancel));
        assert!(!identity.has_permission(&Principal::new("eve"), "run", Permission::Cancel));
        assert!(!StaticIdentity::nobody().has_permission(
            &Principal::new("admin"),
            "run",
            Permission::Cancel
        ));
    }
}
