//! pubq commands.

use crate::config::Config;
use crate::paths::Paths;
use anyhow::{bail, Result};
use publish_queue_core::{
    Connectivity, ConnectivityFlag, PublishCompletion, PublishFlags, PublishQueue, QueueMetrics,
    SystemEvent,
};
use publish_queue_store::SqliteRecordStore;
use publish_queue_transport::CloudPublisher;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use url::Url;

/// Event name used by the counter and burst commands.
pub const COUNTER_EVENT: &str = "testEvent";

const TICK_INTERVAL: Duration = Duration::from_millis(10);
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Options for `pubq run`.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Counter publish period; 0 only drains the existing queue.
    pub period_ms: u64,
    pub with_ack: bool,
    pub probe_secs: u64,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    database: String,
    #[serde(flatten)]
    metrics: QueueMetrics,
}

/// Build and set up a queue over the on-disk store.
///
/// Must be called from within a tokio runtime.
pub fn open_queue(config: &Config, paths: &Paths, link: ConnectivityFlag) -> Result<PublishQueue> {
    paths.ensure_dirs()?;
    let store = SqliteRecordStore::open(paths.database_file())?;
    let publisher = CloudPublisher::spawn_current(config.cloud.clone())?;

    let queue = PublishQueue::new()
        .with_store(Arc::new(store))
        .with_publisher(Arc::new(publisher))
        .with_connectivity(Arc::new(link))
        .with_config(config.queue.clone())
        .with_publish_complete_handler(|c: &PublishCompletion| {
            if c.succeeded {
                info!(name = %c.name, data = %c.payload, "Publish complete");
            } else {
                warn!(name = %c.name, data = %c.payload, "Publish failed");
            }
        });

    if queue.setup()?.is_degraded() {
        warn!("Record store is degraded; queued events may not persist");
    }
    Ok(queue)
}

/// Drive the queue until Ctrl-C, optionally publishing a counter event.
pub async fn run(config: Config, paths: Paths, opts: RunOptions) -> Result<()> {
    let endpoint = Url::parse(&config.cloud.endpoint)?;
    let link = ConnectivityFlag::new(false);

    let queue = match open_queue(&config, &paths, link.clone())?.install() {
        Ok(queue) => queue,
        Err(_) => bail!("a publish queue is already installed"),
    };

    let probe = tokio::spawn(probe_endpoint(
        endpoint,
        link,
        Duration::from_secs(opts.probe_secs.max(1)),
    ));

    info!(
        base_dir = %paths.base_dir().display(),
        num_events = queue.num_events(),
        period_ms = opts.period_ms,
        with_ack = opts.with_ack,
        "pubq running"
    );

    let mut tick = interval(TICK_INTERVAL);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let period = Duration::from_millis(opts.period_ms.max(1));
    let mut publish = interval_at(Instant::now() + period, period);
    let flags = if opts.with_ack {
        PublishFlags::WITH_ACK
    } else {
        PublishFlags::NONE
    };
    let mut counter: u64 = 0;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = tick.tick() => queue.tick(),
            _ = publish.tick(), if opts.period_ms > 0 => {
                info!(counter, "Publishing counter");
                if let Err(e) = queue.enqueue(COUNTER_EVENT, &counter.to_string(), flags) {
                    error!(counter, error = %e, "Failed to queue counter");
                }
                counter += 1;
            }
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!(error = %e, "Failed to listen for Ctrl-C");
                }
                queue.on_system_event(SystemEvent::CloudDisconnecting);
                break;
            }
        }
    }

    probe.abort();
    let metrics = queue.metrics();
    info!(
        num_events = metrics.num_events,
        published = metrics.published,
        publish_failures = metrics.publish_failures,
        "pubq stopped"
    );
    Ok(())
}

/// Queue one event without publishing it.
pub fn enqueue(config: &Config, paths: &Paths, name: &str, data: &str, flags: PublishFlags) -> Result<()> {
    let queue = open_queue(config, paths, ConnectivityFlag::new(false))?;
    queue.enqueue(name, data, flags)?;
    println!("queued {} ({} pending)", name, queue.num_events());
    Ok(())
}

/// Queue `count` padded counter events back to back.
pub fn burst(config: &Config, paths: &Paths, count: u32, size: usize) -> Result<()> {
    let queue = open_queue(config, paths, ConnectivityFlag::new(false))?;
    for i in 0..count {
        let data = padded_counter(i, size);
        queue.enqueue(COUNTER_EVENT, &data, PublishFlags::WITH_ACK)?;
    }
    println!("queued {} events ({} pending)", count, queue.num_events());
    Ok(())
}

pub fn status(config: &Config, paths: &Paths) -> Result<()> {
    let queue = open_queue(config, paths, ConnectivityFlag::new(false))?;
    let report = StatusReport {
        database: paths.database_file().display().to_string(),
        metrics: queue.metrics(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub fn clear(config: &Config, paths: &Paths) -> Result<()> {
    let queue = open_queue(config, paths, ConnectivityFlag::new(false))?;
    queue.clear_queues()?;
    println!("queue cleared");
    Ok(())
}

/// Five-digit counter padded with a repeating A-Z fill up to `size` bytes.
fn padded_counter(counter: u32, size: usize) -> String {
    let mut data = format!("{:05}", counter);
    let mut fill = (b'A'..=b'Z').cycle();
    while data.len() < size {
        if let Some(c) = fill.next() {
            data.push(char::from(c));
        }
    }
    data
}

/// Mark the link online while the endpoint accepts TCP connections.
async fn probe_endpoint(endpoint: Url, link: ConnectivityFlag, period: Duration) {
    let Some(host) = endpoint.host_str().map(str::to_string) else {
        warn!(endpoint = %endpoint, "Endpoint has no host; staying offline");
        return;
    };
    let port = endpoint.port_or_known_default().unwrap_or(80);

    let mut ticker = interval(period);
    loop {
        ticker.tick().await;
        let online = matches!(
            tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect((host.as_str(), port))).await,
            Ok(Ok(_))
        );
        if online != link.is_online() {
            info!(host = %host, port, online, "Cloud link changed");
        } else {
            debug!(host = %host, port, online, "Cloud link probed");
        }
        link.set_online(online);
    }
}
