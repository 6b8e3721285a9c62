//! Spell execution.
//!
//! One call to [`SpellRunner::execute_spell`] walks a fixed sequence of
//! phases:
//!
//! ```text
//! Idle → ManifestLoaded → RuntimeResolved → ProviderResolved → Spawned
//!      → ResultParsed | TimedOut | NonZeroExit | OutputInvalid | ProcessError
//!      → Terminal
//! ```
//!
//! Each call owns its subprocess and buffers, so executions run concurrently
//! without shared locks. The subprocess never outlives the call: it is killed
//! and reaped on an early result, on timeout, and (via `kill_on_drop`) if the
//! call itself is dropped.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument, Span};

use crate::provider::{ProviderConfig, ProviderManager};
use crate::runtime::RuntimeManager;
use crate::spell::manifest::{load_manifest, SpellManifest};
use crate::spell::protocol::{error_code, SpellRequest, SpellResult};
use crate::Result;

/// Default upper bound on one execution.
pub const DEFAULT_SPELL_TIMEOUT: Duration = Duration::from_secs(30);

/// How long to wait for stderr to drain once the process has exited.
const STDERR_DRAIN: Duration = Duration::from_secs(1);

const READ_CHUNK: usize = 8192;

/// Phase of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPhase {
    /// Nothing done yet.
    Idle,
    /// `plugin.json` parsed and validated.
    ManifestLoaded,
    /// Runtime executable found.
    RuntimeResolved,
    /// Provider chosen, or none needed.
    ProviderResolved,
    /// Subprocess running.
    Spawned,
    /// A result object was read from stdout.
    ResultParsed,
    /// The deadline passed first.
    TimedOut,
    /// The process failed without a result.
    NonZeroExit,
    /// The process exited cleanly but printed no result.
    OutputInvalid,
    /// Spawn, wait, or pre-spawn resolution failed.
    ProcessError,
    /// Result handed back to the caller.
    Terminal,
}

/// Phase tracker and single-settlement guard for one execution.
#[derive(Debug)]
struct Execution {
    phase: ExecutionPhase,
    settled: bool,
}

impl Execution {
    fn new() -> Self {
        Self {
            phase: ExecutionPhase::Idle,
            settled: false,
        }
    }

    fn enter(&mut self, next: ExecutionPhase) {
        debug!(from = ?self.phase, to = ?next, "spell phase");
        self.phase = next;
    }

    /// Record the outcome. Only the first settlement counts.
    fn settle(&mut self, outcome: ExecutionPhase, result: SpellResult) -> Option<SpellResult> {
        if self.settled {
            warn!(phase = ?outcome, "spell already settled, dropping result");
            return None;
        }
        self.settled = true;
        self.enter(outcome);
        self.enter(ExecutionPhase::Terminal);
        Some(result)
    }
}

/// Runs spells as subprocesses.
#[derive(Debug, Clone)]
pub struct SpellRunner {
    runtimes: Arc<RuntimeManager>,
    providers: Arc<ProviderManager>,
    timeout: Duration,
}

impl SpellRunner {
    /// Runner with the default timeout.
    pub fn new(runtimes: Arc<RuntimeManager>, providers: Arc<ProviderManager>) -> Self {
        Self {
            runtimes,
            providers,
            timeout: DEFAULT_SPELL_TIMEOUT,
        }
    }

    /// Override the execution timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Log the permissions a spell asks for and return its checked entry
    /// script path.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::ManifestInvalid`](crate::AppError::ManifestInvalid)
    /// if the entry escapes `spell_dir`.
    pub fn validate_permissions(
        spell_dir: &Path,
        manifest: &SpellManifest,
    ) -> Result<PathBuf> {
        info!(
            spell_id = manifest.id.as_str(),
            permissions = ?manifest.permissions,
            "spell permissions requested"
        );
        manifest.entry_path(spell_dir)
    }

    /// Execute the spell in `spell_dir` on `input`.
    ///
    /// Never fails: every problem is reported as an error [`SpellResult`].
    /// `total_time` (milliseconds) is stamped on every result, `spell_id` on
    /// successful ones.
    pub async fn execute_spell(&self, spell_dir: &Path, input: &str) -> SpellResult {
        let started = Instant::now();
        let span = info_span!(
            "spell",
            dir = %spell_dir.display(),
            spell_id = tracing::field::Empty
        );

        let (mut result, spell_id) = self.execute(spell_dir, input).instrument(span).await;

        let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        result.stamp("total_time", elapsed);
        if result.is_success() {
            if let Some(id) = spell_id {
                result.stamp("spell_id", id);
            }
        }
        result
    }

    async fn execute(&self, spell_dir: &Path, input: &str) -> (SpellResult, Option<String>) {
        let mut execution = Execution::new();

        let manifest = match load_manifest(spell_dir).await {
            Ok(manifest) => manifest,
            Err(err) => return (execution_error(&mut execution, &err), None),
        };
        Span::current().record("spell_id", manifest.id.as_str());
        execution.enter(ExecutionPhase::ManifestLoaded);
        let spell_id = Some(manifest.id.clone());

        let script = match Self::validate_permissions(spell_dir, &manifest) {
            Ok(script) => script,
            Err(err) => return (execution_error(&mut execution, &err), spell_id),
        };

        let runtime = match self.runtimes.resolve_runtime(&manifest.runtime).await {
            Ok(runtime) => runtime,
            Err(err) => return (execution_error(&mut execution, &err), spell_id),
        };
        execution.enter(ExecutionPhase::RuntimeResolved);

        let provider = if manifest.providers_supported.is_empty() {
            None
        } else {
            match self.providers.get_provider_config(
                &manifest.providers_supported,
                manifest.default_provider.as_deref(),
            ) {
                Ok(provider) => Some(provider),
                Err(err) => return (execution_error(&mut execution, &err), spell_id),
            }
        };
        execution.enter(ExecutionPhase::ProviderResolved);

        let request = build_request(input, &manifest, provider);
        let line = match serde_json::to_string(&request) {
            Ok(line) => line,
            Err(err) => {
                let err = crate::AppError::Spell(format!("failed to encode request: {err}"));
                return (execution_error(&mut execution, &err), spell_id);
            }
        };

        let result = self
            .run_process(&mut execution, &runtime, &script, spell_dir, line)
            .await;
        (result, spell_id)
    }

    #[allow(clippy::too_many_lines)] // Read loop, exit handling, and outcome mapping share one deadline.
    async fn run_process(
        &self,
        execution: &mut Execution,
        runtime: &Path,
        script: &Path,
        cwd: &Path,
        request_line: String,
    ) -> SpellResult {
        let spawned = Command::new(runtime)
            .arg(script)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(err) => {
                warn!(runtime = %runtime.display(), %err, "failed to start spell process");
                return settle(
                    execution,
                    ExecutionPhase::ProcessError,
                    SpellResult::error(
                        error_code::PROCESS_ERROR,
                        format!("failed to start spell process: {err}"),
                        None,
                    ),
                );
            }
        };
        execution.enter(ExecutionPhase::Spawned);
        debug!(pid = child.id(), "spell process spawned");

        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                let mut bytes = request_line.into_bytes();
                bytes.push(b'\n');
                if let Err(err) = stdin.write_all(&bytes).await {
                    debug!(%err, "spell stdin closed before request was written");
                    return;
                }
                if let Err(err) = stdin.shutdown().await {
                    debug!(%err, "spell stdin shutdown failed");
                }
            });
        }

        let stderr_task = child.stderr.take().map(|stderr| tokio::spawn(collect(stderr)));
        let Some(mut stdout) = child.stdout.take() else {
            reap(&mut child).await;
            return settle(
                execution,
                ExecutionPhase::ProcessError,
                SpellResult::error(error_code::PROCESS_ERROR, "spell stdout unavailable", None),
            );
        };

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        let mut scanner = ResultScanner::default();
        let mut chunk = vec![0u8; READ_CHUNK];

        // Phase 1: read stdout until a result line, EOF, or the deadline.
        let early = loop {
            tokio::select! {
                () = &mut deadline => {
                    return self.timed_out(execution, &mut child, stderr_task).await;
                }
                read = stdout.read(&mut chunk) => match read {
                    Ok(0) => break None,
                    Ok(n) => {
                        if let Some(result) = scanner.push(&chunk[..n]) {
                            break Some(result);
                        }
                    }
                    Err(err) => {
                        debug!(%err, "spell stdout read failed");
                        break None;
                    }
                },
            }
        };

        if let Some(result) = early {
            debug!("spell result received before exit, terminating process");
            reap(&mut child).await;
            abort(stderr_task);
            return settle(execution, ExecutionPhase::ResultParsed, result);
        }

        // Phase 2: stdout closed, wait for the exit status.
        let status = tokio::select! {
            () = &mut deadline => {
                return self.timed_out(execution, &mut child, stderr_task).await;
            }
            status = child.wait() => status,
        };

        match status {
            Ok(status) if status.success() => {
                abort(stderr_task);
                match scanner.parse_full() {
                    Some(result) => settle(execution, ExecutionPhase::ResultParsed, result),
                    None => settle(
                        execution,
                        ExecutionPhase::OutputInvalid,
                        SpellResult::error(
                            error_code::PARSE_ERROR,
                            "failed to parse spell output as JSON",
                            Some(scanner.output()),
                        ),
                    ),
                }
            }
            Ok(status) => {
                let stderr = drain(stderr_task).await;
                let message = status.code().map_or_else(
                    || "spell process terminated by signal".to_owned(),
                    |code| format!("spell process exited with code {code}"),
                );
                warn!(code = ?status.code(), "spell process failed");
                settle(
                    execution,
                    ExecutionPhase::NonZeroExit,
                    SpellResult::error(error_code::NON_ZERO_EXIT, message, Some(stderr)),
                )
            }
            Err(err) => {
                abort(stderr_task);
                settle(
                    execution,
                    ExecutionPhase::ProcessError,
                    SpellResult::error(
                        error_code::PROCESS_ERROR,
                        format!("failed to wait for spell process: {err}"),
                        None,
                    ),
                )
            }
        }
    }

    async fn timed_out(
        &self,
        execution: &mut Execution,
        child: &mut Child,
        stderr_task: Option<JoinHandle<String>>,
    ) -> SpellResult {
        warn!(timeout = ?self.timeout, "spell timed out, killing process");
        reap(child).await;
        abort(stderr_task);
        settle(
            execution,
            ExecutionPhase::TimedOut,
            SpellResult::error(
                error_code::TIMEOUT,
                format!("spell execution timed out after {:?}", self.timeout),
                None,
            ),
        )
    }
}

fn settle(execution: &mut Execution, outcome: ExecutionPhase, result: SpellResult) -> SpellResult {
    execution.settle(outcome, result).unwrap_or_else(|| {
        SpellResult::error(
            error_code::PROCESS_ERROR,
            "spell execution settled twice",
            None,
        )
    })
}

fn execution_error(execution: &mut Execution, err: &crate::AppError) -> SpellResult {
    warn!(phase = ?execution.phase, %err, "spell execution failed before spawn");
    settle(
        execution,
        ExecutionPhase::ProcessError,
        SpellResult::error(error_code::EXECUTION_ERROR, err.to_string(), None),
    )
}

fn build_request(
    input: &str,
    manifest: &SpellManifest,
    provider: Option<ProviderConfig>,
) -> SpellRequest {
    let mut config = Map::new();
    let mut request = SpellRequest::new(input);

    if let Some(provider) = provider {
        config.insert("provider".into(), Value::String(provider.provider));
        if let Some(endpoint) = provider.endpoint {
            config.insert("endpoint".into(), Value::String(endpoint));
        }
        config.extend(provider.config);
        request.model = Some(provider.model);
        request.api_key = provider.api_key;
    }
    if let Some(template) = &manifest.prompt_template {
        config.insert("prompt_template".into(), Value::String(template.clone()));
    }
    if let Some(max_tokens) = manifest.max_tokens {
        config.insert("max_tokens".into(), Value::from(max_tokens));
    }

    if !config.is_empty() {
        request.config = Some(config);
    }
    request
}

/// Kill the process if it is still running and wait for it.
async fn reap(child: &mut Child) {
    if let Err(err) = child.start_kill() {
        debug!(%err, "spell process already exited");
    }
    if let Err(err) = child.wait().await {
        warn!(%err, "failed to reap spell process");
    }
}

async fn collect<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut bytes = Vec::new();
    if let Err(err) = reader.read_to_end(&mut bytes).await {
        debug!(%err, "spell stderr read failed");
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

async fn drain(task: Option<JoinHandle<String>>) -> String {
    let Some(task) = task else {
        return String::new();
    };
    match tokio::time::timeout(STDERR_DRAIN, task).await {
        Ok(Ok(stderr)) => stderr,
        Ok(Err(err)) => {
            debug!(%err, "spell stderr task failed");
            String::new()
        }
        Err(_elapsed) => String::new(),
    }
}

fn abort(task: Option<JoinHandle<String>>) {
    if let Some(task) = task {
        task.abort();
    }
}

/// Incremental scanner over a spell's stdout.
///
/// Complete lines are checked as they arrive; the first one that starts with
/// `{` or `[` and decodes to a well-formed [`SpellResult`] wins.
#[derive(Debug, Default)]
struct ResultScanner {
    buffer: Vec<u8>,
    scanned: usize,
}

impl ResultScanner {
    fn push(&mut self, bytes: &[u8]) -> Option<SpellResult> {
        self.buffer.extend_from_slice(bytes);
        while let Some(pos) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            let start = self.scanned;
            let end = start + pos;
            self.scanned = end + 1;
            if let Some(result) = parse_result_line(&self.buffer[start..end]) {
                return Some(result);
            }
        }
        None
    }

    /// Parse the whole output as one result, falling back to an
    /// unterminated last line.
    fn parse_full(&self) -> Option<SpellResult> {
        let text = String::from_utf8_lossy(&self.buffer);
        serde_json::from_str::<SpellResult>(text.trim())
            .ok()
            .filter(SpellResult::is_well_formed)
            .or_else(|| parse_result_line(&self.buffer[self.scanned..]))
    }

    fn output(&self) -> String {
        String::from_utf8_lossy(&self.buffer).into_owned()
    }
}

fn parse_result_line(line: &[u8]) -> Option<SpellResult> {
    let text = std::str::from_utf8(line).ok()?.trim();
    if !(text.starts_with('{') || text.starts_with('[')) {
        return None;
    }
    serde_json::from_str::<SpellResult>(text)
        .ok()
        .filter(SpellResult::is_well_formed)
}
