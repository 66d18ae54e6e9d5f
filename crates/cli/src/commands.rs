//! Command handlers over a configured storage backend.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde::Serialize;
use sprintpoker_core::{EstimationSession, ParticipantId, Sprint, SprintId, WorkItem};
use sprintpoker_estimation::{EstimationService, SessionCoordinator, SessionView};
use sprintpoker_progress::{BurndownTracker, ProgressTracker};
use sprintpoker_realtime::FanoutHub;
use sprintpoker_storage::Storage;
use tracing::warn;

use crate::config::Config;
use crate::{Commands, ItemCommand, SessionCommand, SprintCommand};

struct Context<S: Storage + 'static> {
    storage: Arc<S>,
    tracker: BurndownTracker<S>,
    coordinator: SessionCoordinator<S>,
    json: bool,
}

impl<S: Storage + 'static> Context<S> {
    fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce(&T)) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            text(value);
        }
        Ok(())
    }

    async fn sprint(&self, id: SprintId) -> Result<Sprint> {
        self.storage
            .load_sprint(id)
            .await?
            .ok_or_else(|| anyhow!("Sprint {} not found", id))
    }

    /// Refresh today's snapshot after a planning change; never fatal.
    async fn touch(&self, sprint_id: SprintId) {
        let today = chrono::Utc::now().date_naive();
        if let Err(e) = self.tracker.record_snapshot(sprint_id, today).await {
            warn!(%sprint_id, error = %e, "snapshot refresh failed");
        }
    }
}

/// Run one command.
pub async fn run<S: Storage + 'static>(storage: Arc<S>, config: &Config, command: Commands, json: bool) -> Result<()> {
    let hub = Arc::new(FanoutHub::new(config.realtime.channel_capacity));
    let ctx = Context {
        tracker: BurndownTracker::new(storage.clone()),
        coordinator: SessionCoordinator::new(storage.clone(), hub).with_domain(config.estimation.domain()?),
        storage,
        json,
    };

    match command {
        Commands::Sprint(cmd) => sprint(&ctx, cmd).await,
        Commands::Item(cmd) => item(&ctx, cmd).await,
        Commands::Session(cmd) => session(&ctx, cmd).await,
        Commands::Simulate { .. } => Err(anyhow!("simulate runs without storage")),
    }
}

async fn sprint<S: Storage + 'static>(ctx: &Context<S>, cmd: SprintCommand) -> Result<()> {
    match cmd {
        SprintCommand::Create { project, name, start, end, goal, active } => {
            let mut sprint = Sprint::new(project, name, start, end)?;
            if let Some(goal) = goal {
                sprint = sprint.with_goal(goal);
            }
            sprint.is_active = active;
            ctx.storage.save_sprint(&sprint).await?;
            ctx.emit(&sprint, |s| println!("Created sprint: {} - {}", s.id, s.name))
        }
        SprintCommand::List { project } => {
            let sprints = ctx.storage.list_sprints(project).await?;
            ctx.emit(&sprints, |sprints| {
                println!("Sprints ({})", sprints.len());
                for s in sprints {
                    println!(
                        "  {} | {} .. {} | {}{}",
                        s.id,
                        s.start_date,
                        s.end_date,
                        s.name,
                        if s.is_active { " (active)" } else { "" }
                    );
                }
            })
        }
        SprintCommand::Show { id } => {
            let sprint = ctx.sprint(id).await?;
            let items = ctx.storage.list_work_items(id).await?;
            let totals = ctx.tracker.sprint_totals(id).await?;
            ctx.emit(&sprint, |s| {
                println!("Sprint: {}", s.id);
                println!("  Name: {}", s.name);
                println!("  Dates: {} .. {} ({} days)", s.start_date, s.end_date, s.day_count());
                if let Some(goal) = &s.goal {
                    println!("  Goal: {}", goal);
                }
                println!("  Active: {}", s.is_active);
                println!("  Items: {}", items.len());
                println!("  Points: {} total, {} completed", totals.total, totals.completed);
            })
        }
        SprintCommand::Stats { id, today } => {
            let today = today.unwrap_or_else(|| chrono::Utc::now().date_naive());
            let stats = ctx.tracker.sprint_stats(id, today).await?;
            ctx.emit(&stats, |s| {
                println!("Sprint stats as of {}", today);
                println!("  Points: {} total, {} completed, {} remaining", s.total_points, s.completed_points, s.remaining_points);
                println!("  Completion: {}%", s.completion_percent);
                println!("  Days remaining: {}", s.days_remaining);
                println!("  Velocity: {:.1} points/day", s.velocity);
                if let Some(needed) = s.points_per_day_needed {
                    println!("  Needed: {:.1} points/day", needed);
                }
                println!("  Status: {}", if s.on_track { "on track" } else { "behind schedule" });
            })
        }
        SprintCommand::Burndown { id } => {
            let burndown = ctx.coordinator.sprint_burndown(id).await?;
            ctx.emit(&burndown, |b| {
                println!("Burndown ({} points)", b.total_points);
                println!("  {:<10}  {:>7}  {:>7}", "date", "ideal", "actual");
                for (date, ideal, actual) in b.rows() {
                    let actual = actual.map(|a| a.to_string()).unwrap_or_else(|| "-".into());
                    println!("  {}  {:>7.1}  {:>7}", date, ideal, actual);
                }
            })
        }
        SprintCommand::Rebuild { id, through } => {
            let through = through.unwrap_or_else(|| chrono::Utc::now().date_naive());
            let snapshots = ctx.tracker.rebuild_snapshots(id, through).await?;
            ctx.emit(&snapshots, |rows| {
                println!("Rebuilt {} snapshots", rows.len());
                for s in rows {
                    println!("  {} | remaining {} | completed {}", s.date, s.remaining_points, s.completed_points);
                }
            })
        }
    }
}

async fn item<S: Storage + 'static>(ctx: &Context<S>, cmd: ItemCommand) -> Result<()> {
    match cmd {
        ItemCommand::Add { sprint, title, description, points } => {
            ctx.sprint(sprint).await?;
            let position = ctx.storage.list_work_items(sprint).await?.len() as i64;
            let mut item = WorkItem::new(sprint, title, position).with_description(description);
            item.story_points = points;
            ctx.storage.save_work_item(&item).await?;
            ctx.touch(sprint).await;
            ctx.emit(&item, |i| println!("Added item: {} - {}", i.id, i.title))
        }
        ItemCommand::List { sprint } => {
            let items = ctx.storage.list_work_items(sprint).await?;
            ctx.emit(&items, |items| {
                println!("Items ({})", items.len());
                for i in items {
                    let points = i.story_points.map(|p| p.to_string()).unwrap_or_else(|| "-".into());
                    println!("  {} | {:<9} | {:>3} | {}", i.id, i.status, points, i.title);
                }
            })
        }
    }
}

async fn session<S: Storage + 'static>(ctx: &Context<S>, cmd: SessionCommand) -> Result<()> {
    let c = &ctx.coordinator;
    match cmd {
        SessionCommand::Start { item, by } => {
            let session = c.start_session(item, ParticipantId::new(by)).await?;
            ctx.emit(&session, |s| println!("Started session: {}", s.id))
        }
        SessionCommand::Vote { session, by, card } => {
            let vote = c.submit_vote(session, ParticipantId::new(by), card).await?;
            ctx.emit(&vote, |v| println!("{} voted {}", v.participant_id, v.card))
        }
        SessionCommand::Reveal { session } => {
            c.reveal_session(session).await?;
            let view = c.session_view(session).await?;
            ctx.emit(&view, print_view)
        }
        SessionCommand::Finalize { session } => match c.finalize_session(session).await {
            Ok(done) => ctx.emit(&done, |d| {
                println!(
                    "Finalized: {} = {} points (mean {:.1})",
                    d.work_item.title,
                    d.work_item.points(),
                    d.stats.mean
                )
            }),
            Err(e) if e.is_benign() => {
                let view = c.session_view(session).await?;
                ctx.emit(&view, print_view)
            }
            Err(e) => Err(e.into()),
        },
        SessionCommand::Reset { session } => {
            let session = c.reset_session(session).await?;
            ctx.emit(&session, |s: &EstimationSession| println!("Session {} reopened", s.id))
        }
        SessionCommand::Show { session } => {
            let view = c.session_view(session).await?;
            ctx.emit(&view, print_view)
        }
    }
}

fn print_view(view: &SessionView) {
    println!("Session: {}", view.session.id);
    println!("  Item: {} ({})", view.work_item.title, view.work_item.status);
    println!("  State: {}", view.session.state);
    println!("  Started by: {}", view.session.started_by);
    if let Some(estimate) = view.session.estimate {
        println!("  Estimate: {}", estimate);
    }
    println!("  Votes ({})", view.votes.len());
    for vote in &view.votes {
        match &view.stats {
            Some(_) => println!("    {} | {}", vote.participant_id, vote.card),
            None => println!("    {} | hidden", vote.participant_id),
        }
    }
    if let Some(stats) = &view.stats {
        println!("  Min {} / Max {} / Avg {:.1} ({} unsure)", stats.min, stats.max, stats.mean, stats.unsure);
    }
}
