use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{AgentClient, AgentQuery, PhaseResult, SubAgent};
use crate::config::Config;
use crate::errors::AgentError;
use crate::stream::{ContentBlock, StreamEvent, describe_tool_use, truncate_thinking};

/// Agent client that drives the Claude CLI in stream-json mode.
///
/// The prompt is written to stdin; progress events are mirrored into the
/// tracing sink and the full prompt/output of each call is kept under the
/// log directory for inspection.
pub struct ClaudeClient {
    claude_cmd: String,
    skip_permissions: bool,
    log_dir: PathBuf,
    timeout: Duration,
}

impl ClaudeClient {
    pub fn new(config: &Config) -> Self {
        Self {
            claude_cmd: config.claude_cmd.clone(),
            skip_permissions: config.skip_permissions,
            log_dir: config.log_dir.clone(),
            timeout: config.agent_timeout,
        }
    }

    /// Command-line flags for a query (excluding the program name).
    pub fn flags(&self, query: &AgentQuery) -> Vec<String> {
        let mut flags = Vec::new();
        if self.skip_permissions {
            flags.push("--dangerously-skip-permissions".to_string());
        }
        flags.push("--print".to_string());
        flags.push("--output-format".to_string());
        flags.push("stream-json".to_string());
        flags.push("--verbose".to_string());
        flags.push("--model".to_string());
        flags.push(query.model.clone());
        if !query.allowed_tools.is_empty() {
            flags.push("--allowedTools".to_string());
            flags.push(query.allowed_tools.join(","));
        }
        if let Some(ref session) = query.resume {
            flags.push("--resume".to_string());
            flags.push(session.clone());
        }
        if !query.agents.is_empty() {
            flags.push("--agents".to_string());
            flags.push(agents_json(&query.agents));
        }
        flags
    }

    async fn run(&self, query: &AgentQuery) -> Result<PhaseResult, AgentError> {
        let label = query.label();
        let prompt_file = self.log_dir.join(format!("{}-prompt.md", label));
        let output_file = self.log_dir.join(format!("{}-output.log", label));

        if let Err(e) = std::fs::create_dir_all(&self.log_dir)
            .and_then(|_| std::fs::write(&prompt_file, &query.prompt))
        {
            warn!(error = %e, path = %prompt_file.display(), "failed to write prompt log");
        }

        let flags = self.flags(query);
        info!(call = %label, cmd = %self.claude_cmd, model = %query.model, "invoking agent");

        let start = Instant::now();
        let mut child = Command::new(&self.claude_cmd)
            .args(&flags)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .current_dir(&query.cwd)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| AgentError::Spawn {
                command: self.claude_cmd.clone(),
                source,
            })?;

        debug!(call = %label, pid = child.id().unwrap_or(0), "agent process spawned");

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(query.prompt.as_bytes())
                .await
                .map_err(|e| AgentError::Stream(format!("failed to write prompt: {}", e)))?;
            stdin
                .shutdown()
                .await
                .map_err(|e| AgentError::Stream(format!("failed to close stdin: {}", e)))?;
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Stream("agent stdout not captured".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| AgentError::Stream("agent stderr not captured".to_string()))?;
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let mut collector = StreamCollector::default();
        let mut reader = BufReader::new(stdout).lines();
        let read_stream = async {
            while let Some(line) = reader
                .next_line()
                .await
                .map_err(|e| AgentError::Stream(e.to_string()))?
            {
                collector.consume_line(&label, &line);
            }
            Ok::<(), AgentError>(())
        };

        match tokio::time::timeout(self.timeout, read_stream).await {
            Ok(result) => result?,
            Err(_) => {
                let _ = child.kill().await;
                return Err(AgentError::Timeout {
                    secs: self.timeout.as_secs(),
                });
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| AgentError::Stream(format!("failed to wait for agent: {}", e)))?;
        let stderr_text = stderr_task.await.unwrap_or_default();
        let elapsed = start.elapsed();

        let result = collector.finish(elapsed);
        if let Err(e) = std::fs::write(&output_file, &result.phase.output) {
            warn!(error = %e, path = %output_file.display(), "failed to write output log");
        }

        if !status.success() {
            return Err(AgentError::NonZeroExit {
                exit_code: status.code().unwrap_or(-1),
                stderr: stderr_text.trim().to_string(),
            });
        }
        if let Some(message) = result.error {
            return Err(AgentError::Reported(message));
        }

        info!(
            call = %label,
            cost = result.phase.cost,
            turns = result.phase.turns,
            duration_ms = result.phase.duration_ms,
            "agent call finished"
        );
        Ok(result.phase)
    }
}

#[async_trait]
impl AgentClient for ClaudeClient {
    async fn query(&self, query: AgentQuery) -> Result<PhaseResult, AgentError> {
        self.run(&query).await
    }
}

/// Serialize sub-agent personas into the `--agents` JSON shape.
fn agents_json(agents: &[SubAgent]) -> String {
    let map: serde_json::Map<String, serde_json::Value> = agents
        .iter()
        .map(|agent| {
            (
                agent.name.clone(),
                serde_json::json!({
                    "description": agent.description,
                    "prompt": agent.prompt,
                    "tools": agent.tools,
                }),
            )
        })
        .collect();
    serde_json::Value::Object(map).to_string()
}

/// Accumulates a stream-json transcript into a `PhaseResult`.
#[derive(Debug, Default)]
struct StreamCollector {
    text: String,
    final_result: Option<String>,
    session_id: Option<String>,
    cost: f64,
    duration_ms: Option<u64>,
    turns: u32,
    error: Option<String>,
}

struct Collected {
    phase: PhaseResult,
    error: Option<String>,
}

impl StreamCollector {
    fn consume_line(&mut self, label: &str, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        let event = match serde_json::from_str::<StreamEvent>(line) {
            Ok(event) => event,
            Err(_) => {
                // Valid JSON of an unknown event type carries nothing we need
                if serde_json::from_str::<serde_json::Value>(line).is_err() {
                    self.text.push_str(line);
                    self.text.push('\n');
                }
                return;
            }
        };

        match event {
            StreamEvent::System { session_id, .. } => {
                if session_id.is_some() {
                    self.session_id = session_id;
                }
            }
            StreamEvent::Assistant {
                message,
                session_id,
            } => {
                if session_id.is_some() {
                    self.session_id = session_id;
                }
                for block in message.content {
                    match block {
                        ContentBlock::ToolUse { name, input } => {
                            debug!(
                                call = %label,
                                tool = %name,
                                "{}",
                                describe_tool_use(&name, &input)
                            );
                        }
                        ContentBlock::Text { text } => {
                            let snippet = truncate_thinking(&text, 80);
                            if !snippet.is_empty() {
                                debug!(call = %label, "{}", snippet);
                            }
                            self.text.push_str(&text);
                            self.text.push('\n');
                        }
                        ContentBlock::Other => {}
                    }
                }
            }
            StreamEvent::Result {
                subtype,
                result,
                is_error,
                session_id,
                total_cost_usd,
                duration_ms,
                num_turns,
            } => {
                if session_id.is_some() {
                    self.session_id = session_id;
                }
                self.cost += total_cost_usd.unwrap_or(0.0);
                self.duration_ms = duration_ms.or(self.duration_ms);
                self.turns = num_turns.unwrap_or(self.turns);
                if is_error {
                    self.error = Some(
                        result
                            .clone()
                            .filter(|r| !r.trim().is_empty())
                            .unwrap_or_else(|| format!("result subtype '{}'", subtype)),
                    );
                }
                self.final_result = result;
            }
            StreamEvent::User {} => {}
        }
    }

    fn finish(self, elapsed: Duration) -> Collected {
        Collected {
            phase: PhaseResult {
                session_id: self.session_id,
                cost: self.cost,
                duration_ms: self
                    .duration_ms
                    .unwrap_or_else(|| elapsed.as_millis() as u64),
                turns: self.turns,
                output: self.final_result.unwrap_or(self.text),
            },
            error: self.error,
        }
    }
}
