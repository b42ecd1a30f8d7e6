//! Headless activity watcher
//!
//! Tails a collaborative project's activity feed, presence, and editing
//! claims to the terminal.

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use collab_client::{time_ago, ActivityEvent, ClientConfig, PresenceManager, ProjectId};

#[derive(Parser)]
#[command(name = "collab-watch")]
#[command(about = "Tail a collaborative project's activity feed")]
#[command(version)]
struct Cli {
    /// Backend origin, e.g. https://app.example.com
    #[arg(short, long, default_value = "http://localhost:8000")]
    base_url: String,

    /// Project to watch
    #[arg(short, long)]
    project: i64,

    /// Poll cadence in seconds
    #[arg(long, default_value_t = 15)]
    interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "collab_watch=info,collab_client=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let project_id = ProjectId(cli.project);

    let config = ClientConfig::new(&cli.base_url)
        .with_polling_interval(Duration::from_secs(cli.interval));
    let manager = PresenceManager::new(config)?;

    let mut subscription = manager.subscribe().await;
    manager.start_polling(project_id).await;

    let mut printer = EventPrinter::default();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
            event = subscription.rx.recv() => {
                let Some(event) = event else { break };
                if !printer.print(&event) {
                    break;
                }
            }
        }
    }

    manager.reset_all().await;
    Ok(())
}

/// Prints bus events, remembering the newest activity seen so feed
/// refreshes only show what is actually new
#[derive(Default)]
struct EventPrinter {
    newest_activity: Option<i64>,
}

impl EventPrinter {
    /// Returns false once the stream is over (terminal polling failure)
    fn print(&mut self, event: &ActivityEvent) -> bool {
        match event {
            ActivityEvent::ActivitiesUpdated { activities, .. } => {
                let fresh: Vec<_> = activities
                    .iter()
                    .take_while(|a| Some(a.id) != self.newest_activity)
                    .collect();
                for activity in fresh.iter().rev() {
                    println!(
                        "[{}] {} {}: {}",
                        time_ago(activity.created_at),
                        activity.activity_type.icon(),
                        activity.username,
                        activity.description
                    );
                }
                if let Some(newest) = activities.first() {
                    self.newest_activity = Some(newest.id);
                }
            }
            ActivityEvent::ActivityLogged { activity, .. } => {
                println!(
                    "[{}] {} {}: {}",
                    time_ago(activity.created_at),
                    activity.activity_type.icon(),
                    activity.username,
                    activity.description
                );
            }
            ActivityEvent::OnlineUsersUpdated { users, .. } => {
                let online: Vec<_> = users
                    .iter()
                    .filter(|u| u.is_online)
                    .map(|u| u.username.as_str())
                    .collect();
                if !online.is_empty() {
                    println!("online: {}", online.join(", "));
                }
            }
            ActivityEvent::CurrentlyEditingUpdated { editing, .. } => {
                for claim in editing {
                    println!("{} is editing \"{}\"", claim.username, claim.section_title);
                }
            }
            ActivityEvent::PollingStarted { project_id } => {
                println!("watching project {}", project_id);
            }
            ActivityEvent::PollingStopped { project_id } => {
                println!("stopped watching project {}", project_id);
            }
            ActivityEvent::PollingFailed {
                error, retry_count, ..
            } => {
                eprintln!("polling failed after {} attempts: {}", retry_count, error);
                return false;
            }
        }
        true
    }
}
