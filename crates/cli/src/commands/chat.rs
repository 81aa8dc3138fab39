//! `stridechat chat`: Interactive session against the dry-run endpoint.

use std::io::Write;
use std::path::Path;
use std::time::Duration;
use stridechat_core::{Error, SessionId};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use super::{CmdResult, dry_run_orchestrator, load_config};

pub async fn run(config_path: Option<&Path>, session: Option<&str>) -> CmdResult {
    let config = load_config(config_path)?;
    let orchestrator = dry_run_orchestrator(&config).await?;
    let session_id = session.map(SessionId::from).unwrap_or_default();
    let resumed = orchestrator.history(&session_id).await.len();

    println!();
    println!("  StrideChat Interactive Mode (dry run)");
    println!();
    println!("  Session:   {session_id}");
    println!("  Model:     {}", config.model);
    println!("  Sanitizer: {:?}", config.sanitizer.policy);
    if resumed > 0 {
        println!("  Resumed:   {resumed} messages");
    }
    println!();
    println!("  Commands: /stats, /clear, /reset-circuit, exit");
    println!();

    let mut sweep = tokio::time::interval(sweep_period(orchestrator.idle_ttl()));
    sweep.tick().await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut prompted = false;
    loop {
        if !prompted {
            print!("  You > ");
            std::io::stdout().flush()?;
            prompted = true;
        }

        let next = tokio::select! {
            line = lines.next_line() => line?,
            _ = sweep.tick() => {
                let evicted = orchestrator.evict_expired();
                debug!(evicted, "Idle session sweep");
                continue;
            }
        };
        prompted = false;
        let Some(line) = next else {
            break;
        };
        let input = line.trim();
        match input {
            "" => continue,
            "exit" | "quit" => break,
            "/stats" => {
                let metrics = orchestrator.metrics().await;
                println!("{}", serde_json::to_string_pretty(&metrics)?);
                if let Some(usage) = orchestrator.session_usage(&session_id).await {
                    println!("  Session at {:.0}% capacity, ~{} tokens", usage.capacity_pct, usage.token_count);
                }
                continue;
            }
            "/clear" => {
                orchestrator.clear_session(&session_id).await?;
                println!("  Session cleared.");
                continue;
            }
            "/reset-circuit" => {
                orchestrator.reset_circuit();
                println!("  Circuit reset.");
                continue;
            }
            _ => {}
        }

        match orchestrator.respond(&session_id, input, None).await {
            Ok(reply) => {
                println!();
                for line in reply.text.lines() {
                    println!("  Assistant > {line}");
                }
                println!(
                    "  [{} | {} {:.2}{}{}]",
                    reply.decision.strategy,
                    reply.classification.intent,
                    reply.classification.confidence,
                    if reply.redactions > 0 { format!(" | {} redacted", reply.redactions) } else { String::new() },
                    if reply.fallback_used { " | fallback" } else { "" },
                );
                println!();
            }
            Err(Error::Sanitization(e)) => {
                println!("  [Blocked] {e}. Please rephrase without dates or exact figures.");
                println!();
            }
            Err(e) => {
                eprintln!("  [Error] {e}");
                println!();
            }
        }
    }

    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}

/// Sweep twice per TTL, at most once a second.
fn sweep_period(ttl: Duration) -> Duration {
    (ttl / 2).max(Duration::from_secs(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_period_is_half_ttl_with_floor() {
        assert_eq!(sweep_period(Duration::from_secs(1800)), Duration::from_secs(900));
        assert_eq!(sweep_period(Duration::ZERO), Duration::from_secs(1));
    }
}
