//! In-memory concurrent round, printed from a subscriber's point of view.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{Duration, Utc};
use sprintpoker_core::{Card, ParticipantId, ProjectId, Sprint, WorkItem};
use sprintpoker_estimation::{EstimationService, SessionCoordinator};
use sprintpoker_realtime::{FanoutHub, Notification};
use sprintpoker_storage::{MemoryStorage, Storage};
use tracing::info;

use crate::config::Config;

/// Play one round with `participants` concurrent voters, then race reveal
/// and finalize from every participant.
pub async fn run(config: &Config, participants: usize, title: &str) -> Result<()> {
    if participants == 0 {
        return Err(anyhow!("at least one participant is required"));
    }

    let domain = config.estimation.domain()?;
    let storage = Arc::new(MemoryStorage::new());
    let hub = Arc::new(FanoutHub::new(config.realtime.channel_capacity));
    let coordinator = Arc::new(SessionCoordinator::new(storage.clone(), hub).with_domain(domain.clone()));

    let today = Utc::now().date_naive();
    let sprint = Sprint::new(ProjectId::new(), "Simulation", today, today + Duration::days(9))?;
    storage.save_sprint(&sprint).await?;
    let item = WorkItem::new(sprint.id, title, 0);
    storage.save_work_item(&item).await?;

    let session = coordinator
        .start_session(item.id, ParticipantId::new("facilitator"))
        .await?;
    let session_id = session.id;
    info!(%session_id, participants, "simulation started");

    let (mut subscription, _) = coordinator.reconnect(session_id).await?;
    let watcher = tokio::spawn(async move {
        let mut seen = 0usize;
        while let Some(notification) = subscription.recv().await {
            match notification {
                Notification::Event(event) => {
                    seen += 1;
                    println!("  #{:<3} {}", event.sequence, event.kind.name());
                }
                Notification::Resync { missed } => {
                    println!("  ...  {} events missed, refetch needed", missed);
                }
            }
        }
        seen
    });

    let values = domain.values().to_vec();
    let mut voters = Vec::with_capacity(participants);
    for i in 0..participants {
        let c = coordinator.clone();
        let card = Card::Points(values[(i * 3 + 1) % values.len()]);
        voters.push(tokio::spawn(async move {
            c.submit_vote(session_id, ParticipantId::new(format!("player-{}", i + 1)), card).await
        }));
    }
    for voter in voters {
        voter.await??;
    }

    let mut reveals = Vec::with_capacity(participants);
    for _ in 0..participants {
        let c = coordinator.clone();
        reveals.push(tokio::spawn(async move { c.reveal_session(session_id).await }));
    }
    for reveal in reveals {
        reveal.await??;
    }

    let mut finalizers = Vec::with_capacity(participants);
    for _ in 0..participants {
        let c = coordinator.clone();
        finalizers.push(tokio::spawn(async move { c.finalize_session(session_id).await }));
    }
    let mut winner = None;
    let mut benign = 0usize;
    for finalizer in finalizers {
        match finalizer.await? {
            Ok(done) => winner = Some(done),
            Err(e) if e.is_benign() => benign += 1,
            Err(e) => return Err(e.into()),
        }
    }
    let done = winner.ok_or_else(|| anyhow!("no finalize attempt succeeded"))?;

    let events = watcher.await?;
    println!();
    println!("Item: {}", done.work_item.title);
    println!("  Estimate: {} points", done.work_item.points());
    println!(
        "  Votes: {} (min {}, max {}, avg {:.1})",
        done.stats.count, done.stats.min, done.stats.max, done.stats.mean
    );
    println!("  Finalize: 1 applied, {} already finalized", benign);
    println!("  Events delivered: {}", events);

    Ok(())
}
