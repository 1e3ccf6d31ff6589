//! Running generated programs as confined child processes.
//!
//! The program is written into its request workspace and run by the
//! configured interpreter. On unix the child gets:
//! - a cleared environment (`PATH`, `HOME`, `TMPDIR` and `LANG` only)
//! - its own session, so the whole process tree can be killed at once
//! - rlimits on CPU time, file size, open files and address space
//!
//! On Linux it also gets a user namespace and, per policy, a mount namespace
//! rooted at the workspace (see `jail`) and a network namespace with no
//! interfaces. Any isolation that cannot be set up fails the run. Other
//! platforms refuse to run when isolation is requested.
//!
//! Termination is a hard `SIGKILL` to the process group on timeout,
//! cancellation, or when the run is dropped. There is no graceful-shutdown
//! window.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[cfg(target_os = "linux")]
use super::jail::{self, Isolation};
use super::types::{ExecutionResult, ExecutionWindow, GeneratedProgram};
use super::workspace::Workspace;
use crate::errors::SandboxError;

/// How long to wait for the output pipes to close after the child is gone.
const READER_GRACE: Duration = Duration::from_secs(2);

pub const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Host paths a confined interpreter usually needs. Missing ones are skipped.
const SYSTEM_PATHS: &[&str] = &[
    "/usr",
    "/bin",
    "/sbin",
    "/lib",
    "/lib32",
    "/lib64",
    "/etc/alternatives",
    "/etc/ld.so.cache",
    "/etc/localtime",
];

/// The system paths that exist on this host.
pub fn default_read_only_paths() -> Vec<PathBuf> {
    SYSTEM_PATHS
        .iter()
        .map(PathBuf::from)
        .filter(|path| path.exists())
        .collect()
}

/// Kernel resource limits applied to the child. `None` leaves a limit as inherited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    pub cpu_secs: Option<u64>,
    pub max_file_bytes: Option<u64>,
    pub max_open_files: Option<u64>,
    pub max_memory_bytes: Option<u64>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_secs: Some(120),
            max_file_bytes: Some(256 * 1024 * 1024),
            max_open_files: Some(256),
            max_memory_bytes: Some(4 * 1024 * 1024 * 1024),
        }
    }
}

impl ResourceLimits {
    pub fn unlimited() -> Self {
        Self {
            cpu_secs: None,
            max_file_bytes: None,
            max_open_files: None,
            max_memory_bytes: None,
        }
    }
}

/// Everything the sandbox needs to know to run one program.
#[derive(Debug, Clone)]
pub struct SandboxPolicy {
    pub interpreter: String,
    pub args: Vec<String>,
    /// File name the program is written to inside the workspace.
    pub program_file: String,
    pub timeout: Duration,
    pub isolate_network: bool,
    /// Make the workspace the program's root directory.
    pub confine_filesystem: bool,
    /// Host paths visible read-only inside a confined workspace, at the same location.
    pub read_only_paths: Vec<PathBuf>,
    /// `PATH` handed to the child.
    pub path: String,
    /// Bytes of stdout and of stderr kept; the rest is read and dropped.
    pub max_output_bytes: usize,
    pub limits: ResourceLimits,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            args: Vec::new(),
            program_file: "generated.py".to_string(),
            timeout: Duration::from_secs(120),
            isolate_network: true,
            confine_filesystem: true,
            read_only_paths: default_read_only_paths(),
            path: DEFAULT_PATH.to_string(),
            max_output_bytes: 1024 * 1024,
            limits: ResourceLimits::default(),
        }
    }
}

/// How the wait for the child ended.
enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// The child's process group. Killed on `kill` or when dropped, so a run
/// abandoned mid-flight takes its descendants with it.
struct ProcessGroup(Option<u32>);

impl ProcessGroup {
    fn kill(&mut self) {
        kill_process_group(self.0.take());
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

pub struct ExecutionSandbox {
    policy: SandboxPolicy,
}

impl ExecutionSandbox {
    pub fn new(policy: SandboxPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SandboxPolicy {
        &self.policy
    }

    /// Write `program` into `workspace` and run it to completion.
    ///
    /// Returns `Ok` only for exit status 0. A non-zero exit carries the
    /// captured stderr. On timeout or cancellation the process group is
    /// killed before this returns.
    pub async fn execute(
        &self,
        program: &GeneratedProgram,
        workspace: &Workspace,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, SandboxError> {
        let policy = &self.policy;
        let program_path = workspace.path().join(&policy.program_file);
        tokio::fs::write(&program_path, program.source.as_bytes())
            .await
            .map_err(|source| SandboxError::WriteProgram {
                path: program_path.clone(),
                source,
            })?;

        let isolation = Isolation::prepare(workspace.path(), policy)
            .map_err(SandboxError::Confinement)?
            .map(Arc::new);
        let mut cmd = self.command(workspace.path(), isolation.clone());

        let started_at = SystemTime::now();
        let started = Instant::now();
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                tidy(isolation.as_deref());
                return Err(SandboxError::Spawn {
                    interpreter: policy.interpreter.clone(),
                    source,
                });
            }
        };
        let mut group = ProcessGroup(child.id());
        tracing::debug!(
            pid = child.id(),
            interpreter = %policy.interpreter,
            confined = isolation.is_some(),
            "spawned generated program"
        );

        let stdout = child
            .stdout
            .take()
            .map(|out| tokio::spawn(read_bounded(out, policy.max_output_bytes)));
        let stderr = child
            .stderr
            .take()
            .map(|err| tokio::spawn(read_bounded(err, policy.max_output_bytes)));

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Outcome::Cancelled,
            result = tokio::time::timeout(policy.timeout, child.wait()) => match result {
                Ok(status) => Outcome::Exited(status),
                Err(_) => Outcome::TimedOut,
            },
        };

        // Descendants may outlive the interpreter; the group goes in every case.
        group.kill();
        if !matches!(outcome, Outcome::Exited(_)) {
            let _ = child.kill().await;
        }

        let stdout = collect(stdout).await;
        let stderr = collect(stderr).await;
        let finished_at = SystemTime::now();
        let duration_ms = started.elapsed().as_millis() as u64;

        tidy(isolation.as_deref());

        let status = match outcome {
            Outcome::Cancelled => {
                tracing::info!(duration_ms, "generated program cancelled");
                return Err(SandboxError::Cancelled);
            }
            Outcome::TimedOut => {
                tracing::warn!(duration_ms, "generated program timed out, killed");
                return Err(SandboxError::Timeout {
                    after: policy.timeout,
                });
            }
            Outcome::Exited(status) => status.map_err(SandboxError::Wait)?,
        };

        let exit_code = exit_code(status);
        tracing::info!(exit_code, duration_ms, "generated program finished");
        if exit_code != 0 {
            return Err(SandboxError::NonZeroExit { exit_code, stderr });
        }

        Ok(ExecutionResult {
            exit_code,
            stdout,
            stderr,
            duration_ms,
            window: ExecutionWindow {
                started_at,
                finished_at,
            },
            program_path,
        })
    }

    fn command(&self, workspace: &Path, isolation: Option<Arc<Isolation>>) -> Command {
        let policy = &self.policy;
        // Inside a confined run the workspace is `/`.
        let home = if isolation.is_some() && policy.confine_filesystem {
            Path::new("/")
        } else {
            workspace
        };

        let mut cmd = Command::new(&policy.interpreter);
        cmd.args(&policy.args)
            .arg(&policy.program_file)
            .current_dir(workspace)
            .env_clear()
            .env("PATH", &policy.path)
            .env("HOME", home)
            .env("TMPDIR", home)
            .env("LANG", "C.UTF-8")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            let limits = policy.limits;
            // SAFETY: `confine` only makes async-signal-safe libc calls and
            // does not allocate.
            unsafe {
                cmd.pre_exec(move || confine(limits, isolation.as_deref()));
            }
        }
        #[cfg(not(unix))]
        drop(isolation);

        cmd
    }
}

/// Namespaces are Linux-only; elsewhere any isolation request is refused.
#[cfg(not(target_os = "linux"))]
#[derive(Debug)]
struct Isolation;

#[cfg(not(target_os = "linux"))]
impl Isolation {
    fn prepare(_workspace: &Path, policy: &SandboxPolicy) -> std::io::Result<Option<Self>> {
        if policy.isolate_network || policy.confine_filesystem {
            Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "network and filesystem isolation need Linux namespaces",
            ))
        } else {
            Ok(None)
        }
    }

    #[cfg(unix)]
    fn enter(&self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Remove the mountpoints a confined run left in its workspace.
#[cfg(target_os = "linux")]
fn tidy(isolation: Option<&Isolation>) {
    if let Some(isolation) = isolation {
        jail::tidy(isolation.skeleton());
    }
}

#[cfg(not(target_os = "linux"))]
fn tidy(_isolation: Option<&Isolation>) {}

/// Set soft and hard limit to `value`, capped at the inherited hard limit.
/// The resource constant's type differs between libc flavours, hence a macro.
#[cfg(unix)]
macro_rules! lower_limit {
    ($resource:expr, $value:expr) => {{
        let mut current = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        check(unsafe { libc::getrlimit($resource, &mut current) })?;
        let value = ($value as libc::rlim_t).min(current.rlim_max);
        let wanted = libc::rlimit {
            rlim_cur: value,
            rlim_max: value,
        };
        check(unsafe { libc::setrlimit($resource, &wanted) })?;
    }};
}

/// Runs in the forked child before exec.
#[cfg(unix)]
fn confine(limits: ResourceLimits, isolation: Option<&Isolation>) -> std::io::Result<()> {
    check(unsafe { libc::setsid() })?;

    if let Some(secs) = limits.cpu_secs {
        lower_limit!(libc::RLIMIT_CPU, secs);
    }
    if let Some(bytes) = limits.max_file_bytes {
        lower_limit!(libc::RLIMIT_FSIZE, bytes);
    }
    if let Some(files) = limits.max_open_files {
        lower_limit!(libc::RLIMIT_NOFILE, files);
    }
    if let Some(bytes) = limits.max_memory_bytes {
        lower_limit!(libc::RLIMIT_AS, bytes);
    }

    if let Some(isolation) = isolation {
        isolation.enter()?;
    }
    Ok(())
}

#[cfg(unix)]
pub(super) fn check(ret: libc::c_int) -> std::io::Result<()> {
    if ret == -1 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    if let Some(pid) = pid.and_then(|p| libc::pid_t::try_from(p).ok()) {
        // The child called setsid, so its pid is also its process group id.
        unsafe {
            libc::kill(-pid, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

/// Read `reader` to EOF keeping at most `limit` bytes.
async fn read_bounded<R: AsyncRead + Unpin>(mut reader: R, limit: usize) -> Vec<u8> {
    let mut kept = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = limit.saturating_sub(kept.len());
                kept.extend_from_slice(&buf[..n.min(room)]);
            }
        }
    }
    kept
}

async fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> String {
    let Some(handle) = reader else {
        return String::new();
    };
    let abort = handle.abort_handle();
    match tokio::time::timeout(READER_GRACE, handle).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(Err(_)) => String::new(),
        Err(_) => {
            abort.abort();
            String::new()
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::pipeline::types::CorrelationId;

    fn sh_policy(timeout: Duration) -> SandboxPolicy {
        SandboxPolicy {
            interpreter: "sh".to_string(),
            program_file: "program.sh".to_string(),
            timeout,
            isolate_network: false,
            confine_filesystem: false,
            ..SandboxPolicy::default()
        }
    }

    fn setup(source: &str) -> (tempfile::TempDir, Workspace, GeneratedProgram) {
        let root = tempfile::tempdir().unwrap();
        let id = CorrelationId::new();
        let ws = Workspace::create(root.path(), id).unwrap();
        let program = GeneratedProgram {
            source: source.to_string(),
            correlation_id: id,
        };
        (root, ws, program)
    }

    #[tokio::test]
    async fn test_captures_stdout_and_writes_program() {
        let (_root, ws, program) = setup("echo hello\ntouch out.pptx\n");
        let sandbox = ExecutionSandbox::new(sh_policy(Duration::from_secs(10)));

        let result = sandbox
            .execute(&program, &ws, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout.trim(), "hello");
        assert_eq!(result.program_path, ws.path().join("program.sh"));
        assert_eq!(
            std::fs::read_to_string(&result.program_path).unwrap(),
            program.source
        );
        assert!(ws.path().join("out.pptx").exists());
        assert!(result.window.finished_at >= result.window.started_at);
    }

    #[tokio::test]
    async fn test_nonzero_exit_carries_stderr() {
        let (_root, ws, program) = setup("echo 'boom happened' >&2\nexit 3\n");
        let sandbox = ExecutionSandbox::new(sh_policy(Duration::from_secs(10)));

        let err = sandbox
            .execute(&program, &ws, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            SandboxError::NonZeroExit { exit_code, stderr } => {
                assert_eq!(exit_code, 3);
                assert!(stderr.contains("boom happened"));
            }
            other => panic!("expected NonZeroExit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_program() {
        let (_root, ws, program) = setup("sleep 30\n");
        let sandbox = ExecutionSandbox::new(sh_policy(Duration::from_millis(200)));

        let started = Instant::now();
        let err = sandbox
            .execute(&program, &ws, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, SandboxError::Timeout { .. }), "got {:?}", err);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_timeout_kills_background_descendants() {
        let (_root, ws, program) = setup("(sleep 1; touch escaped) &\nsleep 30\n");
        let sandbox = ExecutionSandbox::new(sh_policy(Duration::from_millis(200)));

        let err = sandbox
            .execute(&program, &ws, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Timeout { .. }));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!ws.path().join("escaped").exists());
    }

    #[tokio::test]
    async fn test_dropped_run_kills_background_descendants() {
        let (_root, ws, program) = setup("(sleep 1; touch escaped) &\nsleep 30\n");
        let escaped = ws.path().join("escaped");
        let sandbox = ExecutionSandbox::new(sh_policy(Duration::from_secs(60)));

        let run = tokio::spawn(async move {
            sandbox
                .execute(&program, &ws, &CancellationToken::new())
                .await
        });
        tokio::time::sleep(Duration::from_millis(300)).await;
        run.abort();
        assert!(run.await.unwrap_err().is_cancelled());

        tokio::time::sleep(Duration::from_millis(1800)).await;
        assert!(!escaped.exists());
    }

    #[tokio::test]
    async fn test_cancellation_kills_program() {
        let (_root, ws, program) = setup("sleep 30\n");
        let sandbox = ExecutionSandbox::new(sh_policy(Duration::from_secs(60)));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = sandbox.execute(&program, &ws, &cancel).await.unwrap_err();
        assert!(matches!(err, SandboxError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_environment_is_scrubbed() {
        let (_root, ws, program) = setup(
            "echo \"home=$HOME\"\necho \"tmp=$TMPDIR\"\necho \"cargo=${CARGO_MANIFEST_DIR:-unset}\"\n",
        );
        let sandbox = ExecutionSandbox::new(sh_policy(Duration::from_secs(10)));

        let result = sandbox
            .execute(&program, &ws, &CancellationToken::new())
            .await
            .unwrap();

        let ws_path = ws.path().display().to_string();
        assert!(result.stdout.contains(&format!("home={}", ws_path)));
        assert!(result.stdout.contains(&format!("tmp={}", ws_path)));
        assert!(result.stdout.contains("cargo=unset"));
    }

    #[tokio::test]
    async fn test_runs_inside_workspace() {
        let (_root, ws, program) = setup("pwd\n");
        let sandbox = ExecutionSandbox::new(sh_policy(Duration::from_secs(10)));

        let result = sandbox
            .execute(&program, &ws, &CancellationToken::new())
            .await
            .unwrap();

        let reported = std::path::PathBuf::from(result.stdout.trim());
        assert_eq!(
            reported.canonicalize().unwrap(),
            ws.path().canonicalize().unwrap()
        );
    }

    #[tokio::test]
    async fn test_output_capture_is_bounded() {
        let (_root, ws, program) = setup("i=0\nwhile [ $i -lt 200 ]; do echo 0123456789; i=$((i+1)); done\n");
        let policy = SandboxPolicy {
            max_output_bytes: 16,
            ..sh_policy(Duration::from_secs(10))
        };
        let sandbox = ExecutionSandbox::new(policy);

        let result = sandbox
            .execute(&program, &ws, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.stdout.len(), 16);
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_spawn_error() {
        let (_root, ws, program) = setup("echo hi\n");
        let policy = SandboxPolicy {
            interpreter: "slidesmith-no-such-interpreter".to_string(),
            ..sh_policy(Duration::from_secs(10))
        };
        let sandbox = ExecutionSandbox::new(policy);

        let err = sandbox
            .execute(&program, &ws, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_file_size_limit_applies() {
        let (_root, ws, program) = setup("head -c 4096 /dev/zero > big.bin\n");
        let policy = SandboxPolicy {
            limits: ResourceLimits {
                max_file_bytes: Some(1024),
                ..ResourceLimits::unlimited()
            },
            ..sh_policy(Duration::from_secs(10))
        };
        let sandbox = ExecutionSandbox::new(policy);

        let err = sandbox
            .execute(&program, &ws, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::NonZeroExit { .. }), "got {:?}", err);
    }

    #[test]
    fn test_default_read_only_paths_exist() {
        for path in default_read_only_paths() {
            assert!(path.is_absolute());
            assert!(path.exists());
        }
    }

    #[cfg(not(target_os = "linux"))]
    #[tokio::test]
    async fn test_isolation_is_refused_without_namespaces() {
        let (_root, ws, program) = setup("touch ran\n");
        let policy = SandboxPolicy {
            confine_filesystem: true,
            ..sh_policy(Duration::from_secs(10))
        };
        let sandbox = ExecutionSandbox::new(policy);

        let err = sandbox
            .execute(&program, &ws, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Confinement(_)), "got {:?}", err);
        assert!(!ws.path().join("ran").exists());
    }

    #[cfg(target_os = "linux")]
    mod confined {
        use super::*;

        fn confined_policy() -> SandboxPolicy {
            SandboxPolicy {
                confine_filesystem: true,
                ..sh_policy(Duration::from_secs(10))
            }
        }

        async fn run(source: &str) -> (tempfile::TempDir, Workspace, ExecutionResult) {
            let (root, ws, program) = setup(source);
            let result = ExecutionSandbox::new(confined_policy())
                .execute(&program, &ws, &CancellationToken::new())
                .await
                .unwrap();
            (root, ws, result)
        }

        #[tokio::test]
        async fn test_workspace_is_the_root() {
            let (_root, ws, result) = run("pwd\necho \"home=$HOME tmp=$TMPDIR\"\n").await;

            let mut lines = result.stdout.lines();
            assert_eq!(lines.next(), Some("/"));
            assert_eq!(lines.next(), Some("home=/ tmp=/"));
            assert_eq!(result.program_path, ws.path().join("program.sh"));
        }

        #[tokio::test]
        async fn test_secret_outside_is_not_visible_by_any_path() {
            let outside = tempfile::tempdir().unwrap();
            let secret = outside.path().join("secret.txt");
            std::fs::write(&secret, "hunter2").unwrap();

            let source = format!(
                "cat ../../secret.txt 2>/dev/null\ncat {} 2>/dev/null\nls / > listing.txt\n",
                secret.display()
            );
            let (_root, ws, result) = run(&source).await;

            assert!(!result.stdout.contains("hunter2"));
            let listing = std::fs::read_to_string(ws.path().join("listing.txt")).unwrap();
            assert!(listing.lines().any(|l| l == "program.sh"));
            assert!(!listing.lines().any(|l| l == "root" || l == "home"));
        }

        #[tokio::test]
        async fn test_writes_never_leave_the_workspace() {
            let outside = tempfile::tempdir().unwrap();
            let target = outside.path().join("outside.txt");
            let source = format!(
                "echo up > ../../outside.txt\n\
                 echo abs > {} 2>/dev/null\n\
                 echo sys > /usr/outside.txt 2>/dev/null\n\
                 true\n",
                target.display()
            );
            let (root, ws, _result) = run(&source).await;

            assert!(!target.exists());
            assert!(!root.path().join("outside.txt").exists());
            assert!(!Path::new("/usr/outside.txt").exists());
            assert_eq!(
                std::fs::read_to_string(ws.path().join("outside.txt")).unwrap(),
                "up\n"
            );
        }

        #[tokio::test]
        async fn test_mountpoints_are_removed_afterwards() {
            let (_root, ws, _result) = run("echo deck > deck.pptx\n").await;

            let mut names: Vec<_> = std::fs::read_dir(ws.path())
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
                .collect();
            names.sort();
            assert_eq!(names, vec!["deck.pptx".to_string(), "program.sh".to_string()]);
        }

        #[tokio::test]
        async fn test_unmountable_path_refuses_to_run() {
            let (_root, ws, program) = setup("touch ran\n");
            let mut policy = confined_policy();
            policy
                .read_only_paths
                .push(PathBuf::from("/slidesmith-no-such-dir"));

            let err = ExecutionSandbox::new(policy)
                .execute(&program, &ws, &CancellationToken::new())
                .await
                .unwrap_err();
            assert!(matches!(err, SandboxError::Spawn { .. }), "got {:?}", err);
            assert!(!ws.path().join("ran").exists());
            assert!(!ws.path().join("slidesmith-no-such-dir").exists());
        }

        #[tokio::test]
        async fn test_network_namespace_has_no_route() {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            let port = listener.local_addr().unwrap().port();
            let (_root, ws, program) = setup(&format!(
                "if (exec 3<>/dev/tcp/127.0.0.1/{port}) 2>/dev/null; then echo connected; else echo isolated; fi\n"
            ));
            let policy = SandboxPolicy {
                interpreter: "bash".to_string(),
                isolate_network: true,
                ..confined_policy()
            };

            let result = ExecutionSandbox::new(policy)
                .execute(&program, &ws, &CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(result.stdout.trim(), "isolated");
        }
    }
}
