use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::ScraperConfig;
use crate::error::{AppError, Result};

/// What the external scraper left behind once it exited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// How long a killed child gets to flush what it already wrote to stderr.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Joins tags into the single argument handed to the scraper.
pub fn join_tags(tags: &[String]) -> String {
    tags.join(",")
}

/// Starts the external scraper for one request.
#[derive(Clone, Debug)]
pub struct ScraperProcess {
    config: ScraperConfig,
}

impl ScraperProcess {
    pub fn new(config: ScraperConfig) -> Self {
        Self { config }
    }

    /// Full argument list: leading args, then the tags flag and the joined tags.
    pub fn args_for(&self, tags: &[String]) -> Vec<String> {
        let mut args = self.config.leading_args.clone();
        args.push(self.config.tags_flag.clone());
        args.push(join_tags(tags));
        args
    }

    /// Runs the scraper to completion and collects both output streams.
    ///
    /// Without a configured timeout this waits for as long as the child runs.
    pub async fn run(&self, tags: &[String]) -> Result<ProcessOutput> {
        let args = self.args_for(tags);
        let start = Instant::now();

        info!(
            program = %self.config.program,
            args = ?args,
            working_dir = %self.config.working_dir.display(),
            "Starting scraper process"
        );

        let mut child = Command::new(&self.config.program)
            .args(&args)
            .current_dir(&self.config.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AppError::Unhandled(format!("Failed to start {}: {}", self.config.program, e))
            })?;

        // Both pipes are drained while the child runs so neither can fill up and stall it.
        let stdout_task = spawn_reader(child.stdout.take());
        let stderr_task = spawn_reader(child.stderr.take());

        let status = match self.config.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    warn!(
                        program = %self.config.program,
                        timeout_ms = limit.as_millis() as u64,
                        "Scraper process timed out"
                    );
                    if let Err(e) = child.kill().await {
                        warn!(program = %self.config.program, error = %e, "Failed to kill scraper process");
                    }
                    stdout_task.abort();

                    // Whatever reached stderr before the kill, unless a grandchild keeps the pipe open.
                    let stderr = match tokio::time::timeout(DRAIN_GRACE, collect(stderr_task)).await {
                        Ok(Ok(stderr)) => stderr,
                        _ => String::new(),
                    };
                    return Err(AppError::ProcessTimeout { after: limit, stderr });
                }
            },
            None => child.wait().await?,
        };

        let output_stdout = collect(stdout_task).await?;
        let output_stderr = collect(stderr_task).await?;

        let result = ProcessOutput {
            exit_code: status.code(),
            stdout: output_stdout,
            stderr: output_stderr,
        };

        info!(
            program = %self.config.program,
            exit_code = ?result.exit_code,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Scraper process exited"
        );

        Ok(result)
    }
}

fn spawn_reader<R>(stream: Option<R>) -> JoinHandle<std::io::Result<Vec<u8>>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut stream) = stream {
            stream.read_to_end(&mut buf).await?;
        }
        Ok(buf)
    })
}

async fn collect(task: JoinHandle<std::io::Result<Vec<u8>>>) -> Result<String> {
    let bytes = task
        .await
        .map_err(|e| AppError::Unhandled(format!("Output reader failed: {}", e)))??;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    fn shell_config(script: &str) -> ScraperConfig {
        ScraperConfig {
            program: "sh".to_string(),
            leading_args: vec!["-c".to_string(), script.to_string(), "scraper".to_string()],
            ..ScraperConfig::default()
        }
    }

    fn shell(script: &str) -> ScraperProcess {
        ScraperProcess::new(shell_config(script))
    }

    #[test]
    fn tags_are_comma_joined_without_normalization() {
        assert_eq!(join_tags(&tags(&["lead-gen", "b2b"])), "lead-gen,b2b");
        assert_eq!(join_tags(&tags(&[" AI ", "AI"])), " AI ,AI");
        assert_eq!(join_tags(&tags(&["Sales"])), "Sales");
    }

    #[test]
    fn default_args_mirror_reference_invocation() {
        let process = ScraperProcess::new(ScraperConfig::default());
        assert_eq!(
            process.args_for(&tags(&["lead-gen", "b2b"])),
            vec!["B2Bscraper.py", "--tags", "lead-gen,b2b"]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_stdout_and_passes_joined_tags() {
        let process = shell(r#"printf '%s %s' "$1" "$2""#);
        let output = process.run(&tags(&["lead-gen", "b2b"])).await.unwrap();

        assert!(output.success());
        assert_eq!(output.stdout, "--tags lead-gen,b2b");
        assert_eq!(output.stderr, "");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_stderr_and_exit_code_on_failure() {
        let process = shell("echo partial; echo 'no such tag' >&2; exit 3");
        let output = process.run(&tags(&["x"])).await.unwrap();

        assert!(!output.success());
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout, "partial\n");
        assert_eq!(output.stderr, "no such tag\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_in_configured_working_directory() {
        let process = ScraperProcess::new(ScraperConfig {
            working_dir: PathBuf::from("/"),
            ..shell_config("pwd")
        });
        let output = process.run(&tags(&["x"])).await.unwrap();
        assert_eq!(output.stdout.trim(), "/");
    }

    #[tokio::test]
    async fn missing_program_is_unhandled_error() {
        let process = ScraperProcess::new(ScraperConfig {
            program: "definitely-not-a-real-scraper-binary".to_string(),
            ..ScraperConfig::default()
        });
        let err = process.run(&tags(&["x"])).await.unwrap_err();
        assert!(matches!(err, AppError::Unhandled(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_kills_long_running_process() {
        let process = ScraperProcess::new(ScraperConfig {
            timeout: Some(Duration::from_millis(100)),
            ..shell_config("exec sleep 5")
        });
        let start = Instant::now();
        let err = process.run(&tags(&["1"])).await.unwrap_err();

        assert!(matches!(err, AppError::ProcessTimeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_keeps_stderr_written_before_kill() {
        let process = ScraperProcess::new(ScraperConfig {
            timeout: Some(Duration::from_millis(300)),
            ..shell_config("echo 'fetching page 1' >&2; exec sleep 5")
        });

        match process.run(&tags(&["Sales"])).await.unwrap_err() {
            AppError::ProcessTimeout { after, stderr } => {
                assert_eq!(after, Duration::from_millis(300));
                assert_eq!(stderr, "fetching page 1\n");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn large_output_on_both_streams_does_not_stall() {
        let process = shell("head -c 200000 /dev/zero | tr '\\0' a; head -c 200000 /dev/zero | tr '\\0' b >&2");
        let output = process.run(&tags(&["x"])).await.unwrap();

        assert!(output.success());
        assert_eq!(output.stdout.len(), 200000);
        assert_eq!(output.stderr.len(), 200000);
    }
}
