mod batch;
mod merge;
mod orchestrator;
mod processor;
mod types;
mod view;
mod wire;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use batch::Batcher;
use orchestrator::{Orchestrator, ViewEvents};
use view::{AgentInfo, MergedDelta, MergedSnapshot};

const USAGE: &str = "\
Usage: hivemap --agent <instance-id>:<type>:<port> [--agent ...] [--log <filter>]

Connects to each agent probe on its loopback port, merges their live file
activity, and writes the view stream as JSON lines on stdout. Logs go to
stderr; --log (or RUST_LOG) sets the filter.";

// ── Front-end wiring ──────────────────────────────────────────────────────────

/// Forwards orchestrator callbacks onto the front-end channel: deltas go
/// through the batcher, snapshots and roster updates bypass it.
struct UiBridge {
    batcher: Arc<Batcher>,
}

impl ViewEvents for UiBridge {
    fn on_merged_snapshot(&self, snapshot: MergedSnapshot) {
        self.batcher.post_snapshot(snapshot);
    }

    fn on_merged_delta(&self, delta: MergedDelta) {
        self.batcher.push_delta(delta);
    }

    fn on_agent_update(&self, agents: Vec<AgentInfo>) {
        self.batcher.post_agents(agents);
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = parse_cli_args()?;

    let filter = match &cli.log {
        Some(spec) => EnvFilter::new(spec),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    // stdout is the IPC channel; all diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let (ui_tx, mut ui_rx) = mpsc::unbounded_channel();
    let batcher = Arc::new(Batcher::new(ui_tx));
    let orchestrator = Orchestrator::new(Arc::new(UiBridge {
        batcher: Arc::clone(&batcher),
    }));

    for agent in &cli.agents {
        orchestrator.add_agent(&agent.instance_id, agent.port, &agent.agent_type);
    }
    info!(agents = cli.agents.len(), "orchestrator up");

    // Prime the front end with the (empty) baseline view.
    batcher.post_snapshot(orchestrator.merged_snapshot());

    loop {
        tokio::select! {
            msg = ui_rx.recv() => match msg {
                Some(msg) => println!("{}", serde_json::to_string(&msg)?),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    orchestrator.dispose();
    batcher.dispose();
    Ok(())
}

// ── CLI ───────────────────────────────────────────────────────────────────────

struct Cli {
    agents: Vec<AgentArg>,
    log: Option<String>,
}

struct AgentArg {
    instance_id: String,
    agent_type: String,
    port: u16,
}

fn parse_cli_args() -> Result<Cli> {
    let args: Vec<String> = std::env::args().collect();
    let mut agents = Vec::new();
    let mut log = None;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-a" | "--agent" if i + 1 < args.len() => {
                agents.push(parse_agent_spec(&args[i + 1])?);
                i += 2;
            }
            "--log" if i + 1 < args.len() => {
                log = Some(args[i + 1].clone());
                i += 2;
            }
            "-h" | "--help" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            other => bail!("unrecognized argument `{other}`\n{USAGE}"),
        }
    }
    if agents.is_empty() {
        bail!("no agents given\n{USAGE}");
    }
    Ok(Cli { agents, log })
}

/// `<instance-id>:<type>:<port>`; the id may itself contain colons.
fn parse_agent_spec(spec: &str) -> Result<AgentArg> {
    let mut parts = spec.rsplitn(3, ':');
    let port = parts.next().unwrap_or_default();
    let agent_type = parts.next().unwrap_or_default();
    let instance_id = parts.next().unwrap_or_default();
    if instance_id.is_empty() || agent_type.is_empty() {
        bail!("bad agent spec `{spec}`, expected <instance-id>:<type>:<port>");
    }
    let port: u16 = port
        .parse()
        .with_context(|| format!("bad port in agent spec `{spec}`"))?;
    Ok(AgentArg {
        instance_id: instance_id.to_string(),
        agent_type: agent_type.to_string(),
        port,
    })
}

#[cfg(test)]
mod tests {
    use super::parse_agent_spec;

    #[test]
    fn parses_agent_spec() {
        let arg = parse_agent_spec("sess-01:claude:4823").unwrap();
        assert_eq!(arg.instance_id, "sess-01");
        assert_eq!(arg.agent_type, "claude");
        assert_eq!(arg.port, 4823);
    }

    #[test]
    fn id_may_contain_colons() {
        let arg = parse_agent_spec("host:7f3a:codex:9000").unwrap();
        assert_eq!(arg.instance_id, "host:7f3a");
        assert_eq!(arg.agent_type, "codex");
        assert_eq!(arg.port, 9000);
    }

    #[test]
    fn rejects_malformed_specs() {
        assert!(parse_agent_spec("only-an-id").is_err());
        assert!(parse_agent_spec("id:type:not-a-port").is_err());
        assert!(parse_agent_spec(":claude:80").is_err());
    }
}
