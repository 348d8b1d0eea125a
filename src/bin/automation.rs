//! automation CLI: run the engine and manage rules.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use chrono::Utc;
use clap::{Parser, Subcommand};
use review_automation::action::{HttpMailer, Mailer, TracingMailer};
use review_automation::config::secrets::ExposeSecret;
use review_automation::config::{Config, EngineConfig};
use review_automation::db::{Db, PgmqQueue};
use review_automation::engine::{Collaborators, Engine, ReviewLifecycle};
use review_automation::model::{
    ActionConfig, Automation, AutomationId, Conditions, NewAutomation, ReviewId, TenantId,
    TriggerType,
};
use review_automation::repo::DeliveryLedger;
use review_automation::telemetry::{TelemetryConfig, init_telemetry};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "automation", about = "Review automation rule engine")]
struct Cli {
    /// Engine tuning file (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    engine_config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane, trigger scanner and retry sweep
    Serve,
    /// Event operations
    Event {
        #[command(subcommand)]
        action: EventAction,
    },
    /// Automation rule operations
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },
    /// Delivery ledger operations
    Deliveries {
        #[command(subcommand)]
        action: DeliveriesAction,
    },
    /// Run one no-reply scan cycle and exit
    Scan,
}

#[derive(Subcommand)]
enum EventAction {
    /// Publish a lifecycle event for a stored review
    Publish {
        /// Review ID
        review_id: Uuid,
        /// created | updated | replied | sentiment_enriched
        #[arg(long, default_value = "created")]
        lifecycle: String,
        /// Explicit version marker (derived from the review when omitted)
        #[arg(long)]
        version: Option<String>,
    },
}

#[derive(Subcommand)]
enum RulesAction {
    /// List a tenant's automations
    List {
        #[arg(long)]
        tenant: Uuid,
    },
    /// Show an automation and its recent deliveries
    Show {
        id: Uuid,
        #[arg(long, default_value_t = 10)]
        deliveries: i64,
    },
    /// Create an automation
    Create {
        #[arg(long)]
        tenant: Uuid,
        #[arg(long)]
        name: String,
        /// new_review | rating_below | rating_above | sentiment_negative | keyword_match | no_reply_24h
        #[arg(long)]
        trigger: String,
        /// Rating threshold (1-5) for rating triggers
        #[arg(long)]
        threshold: Option<i32>,
        /// Keyword for keyword_match; repeatable
        #[arg(long = "keyword")]
        keywords: Vec<String>,
        /// email_alert | slack_notification | teams_notification | webhook | tag_review | assign_review
        #[arg(long)]
        action_type: String,
        /// Action config as JSON, e.g. '{"tag":"urgent"}'
        #[arg(long)]
        action_config: String,
        /// Create disabled
        #[arg(long)]
        inactive: bool,
    },
    /// Enable an automation
    Enable { id: Uuid },
    /// Disable an automation
    Disable { id: Uuid },
    /// Delete an automation and its delivery history
    Delete { id: Uuid },
}

#[derive(Subcommand)]
enum DeliveriesAction {
    /// Failed deliveries with no later success
    Failures {
        #[arg(long, default_value_t = 24)]
        hours: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let engine_config = EngineConfig::load(cli.engine_config.as_deref())?;

    match cli.command {
        Command::Serve => cmd_serve(engine_config).await,
        Command::Event {
            action:
                EventAction::Publish {
                    review_id,
                    lifecycle,
                    version,
                },
        } => {
            let (config, db) = open_db().await?;
            cmd_event_publish(&config, db, &engine_config, review_id, lifecycle, version).await
        }
        Command::Rules { action } => {
            let (_, db) = open_db().await?;
            cmd_rules(&db, action).await
        }
        Command::Deliveries {
            action: DeliveriesAction::Failures { hours },
        } => {
            let (_, db) = open_db().await?;
            cmd_failures(&db, hours).await
        }
        Command::Scan => {
            let (config, db) = open_db().await?;
            cmd_scan(&config, db, &engine_config).await
        }
    }
}

async fn open_db() -> anyhow::Result<(Config, Db)> {
    let config = Config::from_env()?;
    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.migrate().await?;
    Ok((config, db))
}

fn build_engine(config: &Config, db: Db, engine_config: &EngineConfig) -> anyhow::Result<Engine> {
    let db = Arc::new(db);
    let mailer: Arc<dyn Mailer> = match &config.mail_api_url {
        Some(url) => {
            let http = reqwest::Client::builder()
                .timeout(engine_config.action_timeout())
                .build()?;
            Arc::new(HttpMailer::new(
                http,
                url.clone(),
                config.mail_api_key.clone(),
                config.mail_from.clone(),
            ))
        }
        None => Arc::new(TracingMailer),
    };
    let queue = Arc::new(PgmqQueue::new(
        Arc::clone(&db),
        engine_config.queue_name.clone(),
        engine_config.visibility_timeout_secs,
    ));

    let parts = Collaborators {
        rules: db.clone(),
        ledger: db.clone(),
        reviews: db,
        queue,
        mailer,
    };
    Ok(Engine::new(parts, engine_config)?)
}

async fn cmd_serve(engine_config: EngineConfig) -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "review-automation".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.migrate().await?;
    db.create_queue(&engine_config.queue_name).await?;

    let engine = build_engine(&config, db, &engine_config)?;
    let shutdown = engine.shutdown_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        shutdown.trigger();
    });

    engine.run().await?;
    Ok(())
}

async fn cmd_event_publish(
    config: &Config,
    db: Db,
    engine_config: &EngineConfig,
    review_id: Uuid,
    lifecycle: String,
    version: Option<String>,
) -> anyhow::Result<()> {
    let lifecycle: ReviewLifecycle = lifecycle.parse()?;
    let review_id = ReviewId(review_id);
    let (tenant_id, snapshot) = db.review_snapshot(review_id).await?;
    db.create_queue(&engine_config.queue_name).await?;

    let engine = build_engine(config, db, engine_config)?;
    let event = match version {
        Some(version) => {
            engine
                .ingest
                .publish_versioned(tenant_id, review_id, lifecycle, version, snapshot)
                .await?
        }
        None => {
            engine
                .ingest
                .publish_event(tenant_id, review_id, lifecycle, snapshot)
                .await?
        }
    };

    println!(
        "Published: {} ({} v{})",
        event.id(),
        event.kind(),
        event.version()
    );
    Ok(())
}

async fn cmd_scan(config: &Config, db: Db, engine_config: &EngineConfig) -> anyhow::Result<()> {
    db.create_queue(&engine_config.queue_name).await?;
    let engine = build_engine(config, db, engine_config)?;
    let report = engine.scanner.scan_once(Utc::now()).await?;
    println!(
        "Scanned {} tenant(s): {} event(s) emitted, {} tenant(s) failed",
        report.tenants, report.emitted, report.failed_tenants
    );
    Ok(())
}

async fn cmd_rules(db: &Db, action: RulesAction) -> anyhow::Result<()> {
    match action {
        RulesAction::List { tenant } => {
            let automations = db.list_automations(TenantId(tenant)).await?;
            if automations.is_empty() {
                println!("No automations found.");
                return Ok(());
            }

            println!(
                "{:<8}  {:<24}  {:<18}  {:<18}  {:<6}  {:>5}  LAST FIRED",
                "ID", "NAME", "TRIGGER", "ACTION", "ACTIVE", "COUNT"
            );
            println!("{}", "-".repeat(110));
            for a in &automations {
                println!(
                    "{:<8}  {:<24}  {:<18}  {:<18}  {:<6}  {:>5}  {}",
                    &a.id.to_string()[..8],
                    truncate(&a.name, 24),
                    a.trigger.as_str(),
                    a.action_type().as_str(),
                    if a.active { "yes" } else { "no" },
                    a.trigger_count,
                    a.last_triggered_at
                        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_else(|| "-".to_string()),
                );
            }
            println!("\n{} automation(s)", automations.len());
        }
        RulesAction::Show { id, deliveries } => {
            let automation = db.get_automation(AutomationId(id)).await?;
            print_automation(&automation)?;

            let records = db.deliveries_for(automation.id, deliveries).await?;
            if !records.is_empty() {
                println!("---");
                for r in &records {
                    println!(
                        "{}  {:<8}  review {}  {}",
                        r.attempted_at.format("%Y-%m-%d %H:%M:%S"),
                        r.outcome.as_str(),
                        r.event.review_id(),
                        r.error.as_deref().unwrap_or("")
                    );
                }
            }
        }
        RulesAction::Create {
            tenant,
            name,
            trigger,
            threshold,
            keywords,
            action_type,
            action_config,
            inactive,
        } => {
            let trigger: TriggerType = trigger.parse()?;
            let config: serde_json::Value =
                serde_json::from_str(&action_config).context("action config is not JSON")?;
            let action = ActionConfig::from_parts(&action_type, &config)?;
            let conditions = Conditions {
                threshold,
                keywords,
            };

            let mut new = NewAutomation::new(TenantId(tenant), name, trigger, action)
                .conditions(conditions);
            if inactive {
                new = new.inactive();
            }
            let automation = db.create_automation(new).await?;
            println!("Created: {}", automation.id);
        }
        RulesAction::Enable { id } => {
            db.set_automation_active(AutomationId(id), true).await?;
            println!("Enabled: {id}");
        }
        RulesAction::Disable { id } => {
            db.set_automation_active(AutomationId(id), false).await?;
            println!("Disabled: {id}");
        }
        RulesAction::Delete { id } => {
            db.delete_automation(AutomationId(id)).await?;
            println!("Deleted: {id}");
        }
    }
    Ok(())
}

async fn cmd_failures(db: &Db, hours: i64) -> anyhow::Result<()> {
    let since = Utc::now() - chrono::Duration::hours(hours);
    let failures = db.failures_since(since).await?;
    if failures.is_empty() {
        println!("No unresolved failures in the last {hours}h.");
        return Ok(());
    }

    println!(
        "{:<19}  {:<8}  {:<12}  {:<16}  {:<5}  ERROR",
        "ATTEMPTED", "RULE", "FINGERPRINT", "EVENT", "RETRY"
    );
    println!("{}", "-".repeat(107));
    for r in &failures {
        println!(
            "{:<19}  {:<8}  {:<12}  {:<16}  {:<5}  {}",
            r.attempted_at.format("%Y-%m-%d %H:%M:%S"),
            &r.automation_id.to_string()[..8],
            r.fingerprint.to_string(),
            r.event.kind().as_str(),
            if r.retryable { "yes" } else { "no" },
            r.error.as_deref().unwrap_or("-")
        );
    }
    println!("\n{} failure(s)", failures.len());
    Ok(())
}

fn print_automation(a: &Automation) -> anyhow::Result<()> {
    let (action_type, mut action_config) = a.action.to_parts();
    // Never echo webhook secrets.
    if let Some(secret) = action_config.get_mut("secret") {
        *secret = serde_json::Value::String("********".to_string());
    }

    println!("ID:          {}", a.id);
    println!("Tenant:      {}", a.tenant_id);
    println!("Name:        {}", a.name);
    println!("Active:      {}", a.active);
    println!("Trigger:     {}", a.trigger);
    println!(
        "Conditions:  {}",
        serde_json::to_string(&a.conditions)?
    );
    println!("Action:      {action_type}");
    println!(
        "Config:      {}",
        serde_json::to_string_pretty(&action_config)?
    );
    println!("Fired:       {} time(s)", a.trigger_count);
    if let Some(at) = a.last_triggered_at {
        println!("Last Fired:  {at}");
    }
    println!("Created:     {}", a.created_at);
    println!("Updated:     {}", a.updated_at);
    Ok(())
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
