//! Job execution.
//!
//! Every job runs as `shell -c command` in its own process group with a
//! cleared environment. Output is streamed line by line into a JSON-lines
//! I/O log. Resource and local job stdout is parsed back into records once
//! the process exits successfully.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use certlane_model::{
    parse_records, IoLogRecord, IoStream, JobDefinition, JobResult, Outcome, Plugin,
};
use tracing::{debug, info, warn};

use crate::config::RunnerConfig;
use crate::delegate::{LineSink, OperatorDelegate};
use crate::error::{RunnerError, RunnerResult};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

type SharedLog = Arc<Mutex<BufWriter<File>>>;

/// How the process ended.
enum Exit {
    Status(ExitStatus),
    Cancelled,
}

struct Execution {
    exit: Exit,
    stdout: String,
    duration: f64,
    io_log: PathBuf,
}

/// Executes jobs. Shared between the control loop and the worker thread.
pub struct JobRunner {
    config: RunnerConfig,
    cancel: Arc<AtomicBool>,
    delegate: Option<Arc<dyn OperatorDelegate>>,
    sink: Option<Arc<dyn LineSink>>,
}

impl JobRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            cancel: Arc::new(AtomicBool::new(false)),
            delegate: None,
            sink: None,
        }
    }

    pub fn with_delegate(mut self, delegate: Arc<dyn OperatorDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn LineSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Use an externally owned cancellation flag (e.g. the signal handler's).
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Flag that, once set, terminates the running job.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Run a job to a terminal result. Never fails: problems starting or
    /// watching the process become a `crash` outcome.
    pub fn run_job(&self, job: &JobDefinition) -> JobResult {
        info!(job = %job.name(), plugin = %job.plugin(), "running job");

        let result = match job.plugin() {
            Plugin::Manual => self.run_manual(job),
            Plugin::UserInteract => match &self.delegate {
                None => skipped_without_operator(),
                Some(delegate) if !delegate.interact(job) => {
                    JobResult::new(Outcome::Skip).with_comments("skipped by operator")
                }
                Some(_) => self.run_command(job),
            },
            Plugin::UserVerify => match &self.delegate {
                None => skipped_without_operator(),
                Some(delegate) => {
                    let mut result = self.run_command(job);
                    if result.outcome != Outcome::Crash {
                        let verdict = delegate.verify(job, &result);
                        result.outcome = verdict.outcome;
                        if verdict.comments.is_some() {
                            result.comments = verdict.comments;
                        }
                    }
                    result
                }
            },
            _ => self.run_command(job),
        };

        info!(job = %job.name(), outcome = %result.outcome, "job finished");
        result
    }

    fn run_manual(&self, job: &JobDefinition) -> JobResult {
        match &self.delegate {
            None => skipped_without_operator(),
            Some(delegate) => {
                let verdict = delegate.perform(job);
                JobResult {
                    outcome: verdict.outcome,
                    comments: verdict.comments,
                    ..Default::default()
                }
            }
        }
    }

    fn run_command(&self, job: &JobDefinition) -> JobResult {
        let Some(command) = job.command() else {
            return match job.plugin() {
                // Interactive jobs may legitimately have nothing to execute
                Plugin::UserVerify | Plugin::UserInteract => JobResult::new(Outcome::Pass),
                _ => JobResult::new(Outcome::Fail).with_comments("job has no command"),
            };
        };

        if self.is_cancelled() {
            return JobResult::new(Outcome::Crash).with_comments("cancelled");
        }

        match self.execute(job, command) {
            Ok(execution) => interpret(job, execution),
            Err(e) => {
                warn!(job = %job.name(), error = %e, "job could not be executed");
                JobResult::new(Outcome::Crash).with_comments(e.to_string())
            }
        }
    }

    fn environment(&self, job: &JobDefinition) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        let permitted = self
            .config
            .standard_environ
            .iter()
            .chain(job.environ().iter());
        for name in permitted {
            if let Ok(value) = std::env::var(name) {
                env.insert(name.clone(), value);
            }
        }
        for (name, value) in &self.config.extra_env {
            env.insert(name.clone(), value.clone());
        }

        if !self.config.path_prepend.is_empty() {
            let mut parts: Vec<String> = self
                .config
                .path_prepend
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            if let Some(existing) = env.get("PATH") {
                parts.push(existing.clone());
            }
            env.insert("PATH".to_string(), parts.join(":"));
        }
        if let Some(share) = &self.config.share_dir {
            env.insert("CERTLANE_SHARE".to_string(), share.display().to_string());
        }
        env
    }

    fn execute(&self, job: &JobDefinition, command: &str) -> RunnerResult<Execution> {
        fs::create_dir_all(&self.config.io_log_dir)?;
        let io_log = self.config.io_log_dir.join(io_log_name(job));
        let log_file = File::create(&io_log).map_err(|source| RunnerError::IoLog {
            path: io_log.clone(),
            source,
        })?;
        let log: SharedLog = Arc::new(Mutex::new(BufWriter::new(log_file)));

        let mut cmd = Command::new(&self.config.shell);
        cmd.arg("-c")
            .arg(command)
            .env_clear()
            .envs(self.environment(job))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|source| RunnerError::SpawnFailed {
            shell: self.config.shell.clone(),
            source,
        })?;
        let pgid = child.id();
        debug!(job = %job.name(), pid = pgid, "spawned");

        let stdout_handle = child.stdout.take().map(|out| {
            self.stream(job.name(), IoStream::Stdout, out, start, Arc::clone(&log))
        });
        let stderr_handle = child.stderr.take().map(|err| {
            self.stream(job.name(), IoStream::Stderr, err, start, Arc::clone(&log))
        });

        let mut exit = loop {
            if self.is_cancelled() {
                self.terminate_group(&mut child)?;
                break Exit::Cancelled;
            }
            match child.try_wait()? {
                Some(status) => break Exit::Status(status),
                None => thread::sleep(POLL_INTERVAL),
            }
        };

        if matches!(exit, Exit::Status(_)) && self.drain(pgid, &[&stdout_handle, &stderr_handle]) {
            exit = Exit::Cancelled;
        }

        let stdout = stdout_handle
            .and_then(|h| h.join().ok())
            .unwrap_or_default();
        if let Some(h) = stderr_handle {
            let _ = h.join();
        }
        if let Ok(mut writer) = log.lock() {
            writer.flush()?;
        }

        Ok(Execution {
            exit,
            stdout,
            duration: start.elapsed().as_secs_f64(),
            io_log,
        })
    }

    /// Copy one stream into the I/O log and sink; returns the full text.
    fn stream<R: Read + Send + 'static>(
        &self,
        job: &str,
        stream: IoStream,
        reader: R,
        start: Instant,
        log: SharedLog,
    ) -> JoinHandle<String> {
        let sink = self.sink.clone();
        let job = job.to_string();
        thread::spawn(move || {
            let mut captured = String::new();
            let mut reader = BufReader::new(reader);
            let mut raw = Vec::new();
            let mut log_failed = false;
            loop {
                raw.clear();
                match reader.read_until(b'\n', &mut raw) {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(job = %job, stream = ?stream, error = %e, "cannot read job output");
                        break;
                    }
                }
                let line = decode_line(&raw);
                if let Some(sink) = &sink {
                    sink.line(&job, stream, &line);
                }
                let record = IoLogRecord {
                    delay: start.elapsed().as_secs_f64(),
                    stream,
                    data: line.clone(),
                };
                let written = match log.lock() {
                    Ok(mut writer) => append_record(&mut *writer, &record),
                    Err(_) => Err(RunnerError::Io(io::Error::other("I/O log lock poisoned"))),
                };
                if let Err(e) = written {
                    if !log_failed {
                        warn!(job = %job, stream = ?stream, error = %e, "cannot write I/O log");
                        log_failed = true;
                    }
                }
                if stream == IoStream::Stdout {
                    captured.push_str(&line);
                    captured.push('\n');
                }
            }
            captured
        })
    }

    /// SIGTERM the whole process group, then SIGKILL after the grace period.
    fn terminate_group(&self, child: &mut Child) -> RunnerResult<()> {
        let pgid = child.id();
        signal_group(pgid, false);

        let started = Instant::now();
        while started.elapsed() < self.config.termination_grace {
            if child.try_wait()?.is_some() {
                // Leader gone; stragglers in the group still get SIGKILL
                signal_group(pgid, true);
                return Ok(());
            }
            thread::sleep(POLL_INTERVAL);
        }
        warn!(pid = pgid, "job ignored SIGTERM, killing process group");
        signal_group(pgid, true);
        #[cfg(not(unix))]
        {
            let _ = child.kill();
        }
        child.wait()?;
        Ok(())
    }

    /// Wait for the output readers after the leader exited. Background
    /// processes may keep the pipes open; cancellation terminates what is
    /// left of the group. Returns true when cancelled.
    fn drain(&self, pgid: u32, readers: &[&Option<JoinHandle<String>>]) -> bool {
        let drained = || {
            readers
                .iter()
                .all(|h| h.as_ref().map_or(true, |h| h.is_finished()))
        };
        while !drained() {
            if self.is_cancelled() {
                signal_group(pgid, false);
                let started = Instant::now();
                while !drained() && started.elapsed() < self.config.termination_grace {
                    thread::sleep(POLL_INTERVAL);
                }
                if !drained() {
                    warn!(pid = pgid, "background processes ignored SIGTERM, killing process group");
                    signal_group(pgid, true);
                }
                return true;
            }
            thread::sleep(POLL_INTERVAL);
        }
        false
    }
}

#[cfg(unix)]
fn signal_group(pgid: u32, force: bool) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
    // ESRCH once the whole group is gone
    let _ = killpg(Pid::from_raw(pgid as i32), signal);
}

#[cfg(not(unix))]
fn signal_group(_pgid: u32, _force: bool) {}

/// One output line without its terminator. Invalid UTF-8 is replaced
/// rather than ending the stream.
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

fn append_record<W: Write>(writer: &mut W, record: &IoLogRecord) -> RunnerResult<()> {
    let json = serde_json::to_string(record).map_err(io::Error::from)?;
    writeln!(writer, "{}", json)?;
    Ok(())
}

fn skipped_without_operator() -> JobResult {
    JobResult::new(Outcome::Skip).with_comments("no operator available for interactive job")
}

fn interpret(job: &JobDefinition, execution: Execution) -> JobResult {
    let mut result = JobResult {
        execution_duration: Some(execution.duration),
        io_log: Some(execution.io_log),
        ..Default::default()
    };

    let status = match execution.exit {
        Exit::Cancelled => {
            result.outcome = Outcome::Crash;
            result.comments = Some("cancelled".to_string());
            return result;
        }
        Exit::Status(status) => status,
    };

    result.return_code = status.code();
    result.outcome = match status.code() {
        Some(0) => Outcome::Pass,
        Some(_) => Outcome::Fail,
        None => {
            result.comments = Some(signal_comment(&status));
            Outcome::Crash
        }
    };
    if result.outcome != Outcome::Pass {
        return result;
    }

    let source = format!("{} output", job.name());
    match job.plugin() {
        Plugin::Resource => match parse_records(&execution.stdout, &source) {
            Ok(records) => {
                result.resources = records.into_iter().map(|r| r.data).collect();
            }
            Err(e) => {
                result.outcome = Outcome::Fail;
                result.comments = Some(format!("cannot parse resource output: {}", e));
            }
        },
        Plugin::Local => match parse_records(&execution.stdout, &source) {
            Ok(records) => result.generated = records,
            Err(e) => {
                result.outcome = Outcome::Fail;
                result.comments = Some(format!("cannot parse generated jobs: {}", e));
            }
        },
        _ => {}
    }
    result
}

#[cfg(unix)]
fn signal_comment(status: &ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;
    match status.signal() {
        Some(sig) => format!("killed by signal {}", sig),
        None => "terminated abnormally".to_string(),
    }
}

#[cfg(not(unix))]
fn signal_comment(_status: &ExitStatus) -> String {
    "terminated abnormally".to_string()
}

/// I/O log file name. The checksum prefix keeps names that slug alike apart.
pub fn io_log_name(job: &JobDefinition) -> String {
    let checksum = job.checksum();
    let prefix = checksum.get(..8).unwrap_or(checksum);
    format!("{}-{}.record.jsonl", prefix, slug(job.name()))
}

/// File-name safe form of a job name.
pub fn slug(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect()
}

/// Read an I/O log back.
pub fn read_io_log(path: &Path) -> RunnerResult<Vec<IoLogRecord>> {
    let file = File::open(path)?;
    let mut records = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line)
            .map_err(|e| RunnerError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner(dir: &Path) -> JobRunner {
        let mut config = RunnerConfig::new(dir.join("io-logs"));
        config.termination_grace = Duration::from_secs(1);
        JobRunner::new(config)
    }

    fn shell_job(name: &str, command: &str) -> JobDefinition {
        JobDefinition::builder(name).command(command).build().unwrap()
    }

    #[test]
    fn test_pass_writes_io_log() {
        let dir = tempfile::tempdir().unwrap();
        let result = runner(dir.path()).run_job(&shell_job("echo/hello", "echo hello; echo oops >&2"));
        assert_eq!(result.outcome, Outcome::Pass);
        assert_eq!(result.return_code, Some(0));
        assert!(result.execution_duration.is_some());

        let log = result.io_log.unwrap();
        let file_name = log.file_name().unwrap().to_str().unwrap();
        assert!(file_name.ends_with("-echo_hello.record.jsonl"), "{}", file_name);
        let records = read_io_log(&log).unwrap();
        assert!(records
            .iter()
            .any(|r| r.stream == IoStream::Stdout && r.data == "hello"));
        assert!(records
            .iter()
            .any(|r| r.stream == IoStream::Stderr && r.data == "oops"));
    }

    #[test]
    fn test_nonzero_exit_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = runner(dir.path()).run_job(&shell_job("exit3", "exit 3"));
        assert_eq!(result.outcome, Outcome::Fail);
        assert_eq!(result.return_code, Some(3));
    }

    #[test]
    fn test_killed_by_signal_crashes() {
        let dir = tempfile::tempdir().unwrap();
        let result = runner(dir.path()).run_job(&shell_job("suicide", "kill -9 $$"));
        assert_eq!(result.outcome, Outcome::Crash);
        assert!(result.comments.unwrap().contains("signal 9"));
    }

    #[test]
    fn test_resource_output_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let job = JobDefinition::builder("cpu")
            .plugin(Plugin::Resource)
            .command("printf 'count: 4\\nvendor: x\\n\\ncount: 8\\n'")
            .build()
            .unwrap();
        let result = runner(dir.path()).run_job(&job);
        assert_eq!(result.outcome, Outcome::Pass);
        assert_eq!(result.resources.len(), 2);
        assert_eq!(result.resources[0].get("vendor").map(String::as_str), Some("x"));
        assert_eq!(result.resources[1].get("count").map(String::as_str), Some("8"));
    }

    #[test]
    fn test_unparsable_resource_output_fails() {
        let dir = tempfile::tempdir().unwrap();
        let job = JobDefinition::builder("broken")
            .plugin(Plugin::Resource)
            .command("echo 'no colon here'")
            .build()
            .unwrap();
        let result = runner(dir.path()).run_job(&job);
        assert_eq!(result.outcome, Outcome::Fail);
        assert!(result.comments.unwrap().contains("resource output"));
        assert!(result.resources.is_empty());
    }

    #[test]
    fn test_local_output_becomes_generated_records() {
        let dir = tempfile::tempdir().unwrap();
        let job = JobDefinition::builder("gen")
            .plugin(Plugin::Local)
            .command("printf 'name: gen/a\\ncommand: true\\n\\nname: gen/b\\n'")
            .build()
            .unwrap();
        let result = runner(dir.path()).run_job(&job);
        assert_eq!(result.outcome, Outcome::Pass);
        let names: Vec<_> = result
            .generated
            .iter()
            .filter_map(|r| r.get("name"))
            .collect();
        assert_eq!(names, vec!["gen/a", "gen/b"]);
    }

    #[test]
    fn test_missing_command_fails() {
        let dir = tempfile::tempdir().unwrap();
        let job = JobDefinition::builder("empty").build().unwrap();
        let result = runner(dir.path()).run_job(&job);
        assert_eq!(result.outcome, Outcome::Fail);
    }

    #[test]
    fn test_spawn_failure_is_a_crash_result() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RunnerConfig::new(dir.path().join("io-logs"));
        config.shell = PathBuf::from("/nonexistent/certlane-shell");
        let result = JobRunner::new(config).run_job(&shell_job("x", "true"));
        assert_eq!(result.outcome, Outcome::Crash);
        assert!(result.comments.unwrap().contains("cannot start"));
    }

    #[test]
    fn test_environment_is_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RunnerConfig::new(dir.path().join("io-logs"));
        config.extra_env.insert("CERTLANE_MODE".into(), "lab".into());
        config.share_dir = Some(PathBuf::from("/usr/share/certlane"));
        let job = shell_job(
            "env",
            "test \"$CERTLANE_MODE\" = lab && test \"$CERTLANE_SHARE\" = /usr/share/certlane",
        );
        let result = JobRunner::new(config).run_job(&job);
        assert_eq!(result.outcome, Outcome::Pass);
    }

    #[test]
    fn test_cancellation_terminates_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(dir.path());
        let flag = runner.cancel_flag();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            flag.store(true, Ordering::SeqCst);
        });

        let started = Instant::now();
        let result = runner.run_job(&shell_job("sleepy", "sleep 30 & sleep 30; wait"));
        canceller.join().unwrap();

        assert_eq!(result.outcome, Outcome::Crash);
        assert_eq!(result.comments.as_deref(), Some("cancelled"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_cancel_while_background_child_holds_output() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(dir.path());
        let flag = runner.cancel_flag();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(500));
            flag.store(true, Ordering::SeqCst);
        });

        let started = Instant::now();
        let result = runner.run_job(&shell_job("background", "sleep 6 & echo started"));
        canceller.join().unwrap();

        assert_eq!(result.outcome, Outcome::Crash);
        assert_eq!(result.comments.as_deref(), Some("cancelled"));
        assert!(started.elapsed() < Duration::from_secs(3), "{:?}", started.elapsed());
        let records = read_io_log(&result.io_log.unwrap()).unwrap();
        assert!(records.iter().any(|r| r.data == "started"));
    }

    #[test]
    fn test_background_child_output_is_waited_for() {
        let dir = tempfile::tempdir().unwrap();
        let result = runner(dir.path()).run_job(&shell_job("late", "(sleep 0.3; echo late) & echo early"));
        assert_eq!(result.outcome, Outcome::Pass);
        let records = read_io_log(&result.io_log.unwrap()).unwrap();
        let data: Vec<_> = records.iter().map(|r| r.data.as_str()).collect();
        assert_eq!(data, vec!["early", "late"]);
    }

    #[test]
    fn test_invalid_utf8_output_is_not_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let job = JobDefinition::builder("latin1")
            .plugin(Plugin::Resource)
            .command("printf 'a: 1\\nlabel: caf\\351\\n\\nb: 2\\n'")
            .build()
            .unwrap();
        let result = runner(dir.path()).run_job(&job);
        assert_eq!(result.outcome, Outcome::Pass, "{:?}", result.comments);
        assert_eq!(result.resources.len(), 2);
        assert_eq!(
            result.resources[0].get("label").map(String::as_str),
            Some("caf\u{FFFD}")
        );
        assert_eq!(result.resources[1].get("b").map(String::as_str), Some("2"));

        let records = read_io_log(&result.io_log.unwrap()).unwrap();
        assert_eq!(records.len(), 4);
    }

    #[test]
    fn test_decode_line() {
        assert_eq!(decode_line(b"plain\n"), "plain");
        assert_eq!(decode_line(b"crlf\r\n"), "crlf");
        assert_eq!(decode_line(b"no newline"), "no newline");
        assert_eq!(decode_line(b"\xff\n"), "\u{FFFD}");
    }

    #[test]
    fn test_similar_names_get_separate_logs() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(dir.path());
        let slash = runner.run_job(&shell_job("a/b", "echo slash"));
        let underscore = runner.run_job(&shell_job("a_b", "echo underscore"));

        let slash_log = slash.io_log.unwrap();
        let underscore_log = underscore.io_log.unwrap();
        assert_ne!(slash_log, underscore_log);
        assert_eq!(read_io_log(&slash_log).unwrap()[0].data, "slash");
        assert_eq!(read_io_log(&underscore_log).unwrap()[0].data, "underscore");
    }

    struct BrokenLog;

    impl Write for BrokenLog {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_log_write_errors_are_reported() {
        let record = IoLogRecord {
            delay: 0.0,
            stream: IoStream::Stdout,
            data: "x".to_string(),
        };
        let err = append_record(&mut BrokenLog, &record).unwrap_err();
        assert!(err.to_string().contains("disk full"));

        let mut ok = Vec::new();
        append_record(&mut ok, &record).unwrap();
        assert!(ok.ends_with(b"}\n"));
    }

    struct Collect(Mutex<Vec<String>>);

    impl LineSink for Collect {
        fn line(&self, _job: &str, _stream: IoStream, line: &str) {
            self.0.lock().unwrap().push(line.to_string());
        }
    }

    #[test]
    fn test_lines_forwarded_to_sink() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(Collect(Mutex::new(Vec::new())));
        let runner = runner(dir.path()).with_sink(sink.clone());
        runner.run_job(&shell_job("two", "echo one; echo two"));
        assert_eq!(*sink.0.lock().unwrap(), vec!["one".to_string(), "two".to_string()]);
    }

    struct AlwaysPass;

    impl OperatorDelegate for AlwaysPass {
        fn perform(&self, _job: &JobDefinition) -> crate::OperatorVerdict {
            crate::OperatorVerdict::new(Outcome::Pass)
        }

        fn interact(&self, _job: &JobDefinition) -> bool {
            true
        }

        fn verify(&self, _job: &JobDefinition, _result: &JobResult) -> crate::OperatorVerdict {
            crate::OperatorVerdict {
                outcome: Outcome::Fail,
                comments: Some("screen stayed black".into()),
            }
        }
    }

    #[test]
    fn test_interactive_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let manual = JobDefinition::builder("manual")
            .plugin(Plugin::Manual)
            .build()
            .unwrap();
        let verify = JobDefinition::builder("verify")
            .plugin(Plugin::UserVerify)
            .command("true")
            .build()
            .unwrap();

        let bare = runner(dir.path());
        assert_eq!(bare.run_job(&manual).outcome, Outcome::Skip);
        assert_eq!(bare.run_job(&verify).outcome, Outcome::Skip);

        let attended = runner(dir.path()).with_delegate(Arc::new(AlwaysPass));
        assert_eq!(attended.run_job(&manual).outcome, Outcome::Pass);
        let verified = attended.run_job(&verify);
        assert_eq!(verified.outcome, Outcome::Fail);
        assert_eq!(verified.comments.as_deref(), Some("screen stayed black"));
        assert_eq!(verified.return_code, Some(0));
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("usb/detect v2"), "usb_detect_v2");
        assert_eq!(slug("cpu-info.1"), "cpu-info.1");
    }
}
