//! rally-ctl: command-line interface for the Rally daemon.

mod cmd;

use anyhow::{Context, Result};

use cmd::{game, status, transfers};

const DEFAULT_PORT: u16 = 9101;

fn print_usage() {
    println!("Usage: rally-ctl [--port <port>] <command>");
    println!();
    println!("Commands:");
    println!("  status                 Show daemon status");
    println!("  peers                  List active peers");
    println!("  latency                Show probe round-trip statistics");
    println!("  transfers              List live and recent transfers");
    println!("  send <file>            Broadcast a file to every peer");
    println!("  cancel <id>            Cancel a live transfer");
    println!("  game                   Show the scoreboard and match clock");
    println!("  join <name>            Join the game under a display name");
    println!("  score <n>              Set this peer's score");
    println!("  award <n>              Add points to this peer's score");
    println!("  match start <seconds>  Start a shared match clock");
    println!("  match reset            Clear the scoreboard and match clock");
    println!("  shutdown               Stop the daemon");
    println!();
    println!("Options:");
    println!("  --port <port>   API port (default: {})", DEFAULT_PORT);
}

fn parse_number<T: std::str::FromStr>(raw: &str, what: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse()
        .with_context(|| format!("{} must be a number, got {:?}", what, raw))
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    // Parse --port option
    let mut port = DEFAULT_PORT;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--port" {
            i += 1;
            port = parse_number(args.get(i).context("--port requires a value")?, "--port")?;
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["status"] | [] => status::cmd_status(port).await,
        ["peers"] => status::cmd_peers(port).await,
        ["latency"] => status::cmd_latency(port).await,
        ["shutdown"] => status::cmd_shutdown(port).await,
        ["transfers"] => transfers::cmd_transfers(port).await,
        ["send", path] => transfers::cmd_send(port, path).await,
        ["cancel", id] => transfers::cmd_cancel(port, id).await,
        ["game"] => game::cmd_game(port).await,
        ["join", name @ ..] if !name.is_empty() => game::cmd_join(port, &name.join(" ")).await,
        ["score", n] => game::cmd_score(port, parse_number(n, "score")?).await,
        ["award", n] => game::cmd_award(port, parse_number(n, "points")?).await,
        ["match", "start", secs] => {
            game::cmd_match_start(port, parse_number(secs, "duration")?).await
        }
        ["match", "reset"] => game::cmd_match_reset(port).await,
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
