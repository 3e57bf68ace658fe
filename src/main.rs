use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use outreach::config::{
    GroupsConfig, MailApiCredentials, RegistrySettings, ThrottleConfig, groups_config_path,
};
use outreach::inbound::{InboundPipeline, spawn_inbound_listener};
use outreach::outbound::{OutboundScheduler, spawn_queue_sender};
use outreach::registry::{HttpRegistry, Registry};
use outreach::transport::{GmailConnector, MailboxConnector};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // Missing credentials are fatal here and nowhere else.
    let mail_credentials = MailApiCredentials::from_env()?;
    let registry_settings = RegistrySettings::from_env()?;
    let throttle = ThrottleConfig::from_env();

    let config_path = groups_config_path();
    let config = GroupsConfig::load(&config_path)?;

    eprintln!("📬 outreach v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "   Groups: {} ({} mailboxes), config {}",
        config.groups.len(),
        config.unique_mailboxes().len(),
        config_path.display()
    );
    eprintln!("   Inbound poll: every {}s", config.poll_interval_seconds);
    eprintln!(
        "   Throttle: {}-{}s between sends, {}/hour, {}/day per sender",
        throttle.min_interval.as_secs(),
        throttle.max_interval.as_secs(),
        throttle.max_per_hour,
        throttle.max_per_day
    );

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;
    let registry: Arc<dyn Registry> = Arc::new(HttpRegistry::new(http.clone(), registry_settings));
    let connector: Arc<dyn MailboxConnector> =
        Arc::new(GmailConnector::new(http, mail_credentials));

    let scheduler = OutboundScheduler::new(
        Arc::clone(&registry),
        Arc::clone(&connector),
        config.groups.clone(),
        throttle,
        config.clamped_batch_size(),
    );
    let (scheduler_handle, scheduler_shutdown) = spawn_queue_sender(scheduler);

    let pipeline = InboundPipeline::new(registry, connector, config);
    let (listener_handle, listener_shutdown) = spawn_inbound_listener(pipeline);

    tokio::signal::ctrl_c().await?;
    eprintln!("Shutting down");
    scheduler_shutdown.store(true, Ordering::Relaxed);
    listener_shutdown.store(true, Ordering::Relaxed);
    scheduler_handle.abort();
    listener_handle.abort();

    Ok(())
}
