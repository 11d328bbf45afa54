//! Tail command: follow the feed and print activity transitions.

use anyhow::Result;
use chrono::Local;
use vigil_core::config::{Config, FeedSettings};
use vigil_core::core::watcher::{self, WatcherConfig};
use vigil_types::ActivitySnapshot;

pub async fn run(config: &Config, settings: FeedSettings, json: bool) -> Result<()> {
    let handle = watcher::spawn(WatcherConfig::new(settings, config));
    let mut snapshots = handle.snapshots();
    let mut previous = snapshots.borrow().clone();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                eprintln!("Shutting down.");
                break;
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    // The watcher gave up after exhausting reconnect attempts.
                    break;
                }
                let current = snapshots.borrow().clone();
                if json {
                    println!("{}", serde_json::to_string(&current)?);
                } else {
                    for line in transition_lines(&previous, &current) {
                        println!("{} {line}", Local::now().format("%H:%M:%S%.3f"));
                    }
                }
                previous = current;
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}

/// Human-readable diff between two consecutive snapshots.
fn transition_lines(previous: &ActivitySnapshot, current: &ActivitySnapshot) -> Vec<String> {
    let mut lines = Vec::new();

    if previous.connection != current.connection {
        lines.push(format!(
            "connection: {} -> {}",
            previous.connection, current.connection
        ));
    }

    for agent_id in current.processing.difference(&previous.processing) {
        lines.push(format!("agent {agent_id} glowing"));
    }
    for agent_id in current.ending_agents.difference(&previous.ending_agents) {
        lines.push(format!("agent {agent_id} fading"));
    }
    for agent_id in previous.ending_agents.difference(&current.ending_agents) {
        if !current.processing.contains(agent_id) {
            lines.push(format!("agent {agent_id} cleared"));
        }
    }

    for (agent_id, skill) in &current.recent_skill_use {
        if previous.recent_skill_use.get(agent_id) != Some(skill) {
            lines.push(format!(
                "agent {agent_id} used skill {} ({})",
                skill.skill_name, skill.skill_type
            ));
        }
    }
    for (agent_id, kb) in &current.recent_kb_use {
        if previous.recent_kb_use.get(agent_id) != Some(kb) {
            lines.push(format!(
                "agent {agent_id} hit kb: {} docs, {} chunks",
                kb.doc_count, kb.chunk_count
            ));
        }
    }

    for channel in current.active_channels.difference(&previous.active_channels) {
        lines.push(format!("channel {channel} active"));
    }
    for channel in previous.active_channels.difference(&current.active_channels) {
        lines.push(format!("channel {channel} quiet"));
    }

    lines
}
