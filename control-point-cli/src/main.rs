use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use av_control::{
    CallbackResult, ControlPoint, ControlPointConfig, ControllerConfig, DeviceEntry, DeviceEvent, PlaybackItem,
};
use av_discovery::{DiscoveryConfig, DEFAULT_SEARCH_INTERVAL};
use av_eventing::EventingConfig;
use clap::Parser;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tracing::{error, info, warn};

/// Environment variable overriding `--callback-port`
const CALLBACK_PORT_ENV: &str = "AVCONTROL_CALLBACK_PORT";
/// Environment variable overriding `--search-interval`
const SEARCH_INTERVAL_ENV: &str = "AVCONTROL_SEARCH_INTERVAL";

/// Number of ports tried after the first callback port
const CALLBACK_PORT_SPAN: u16 = 100;

/// UPnP AV control point
///
/// Watches media servers and renderers on the local network and optionally
/// plays one object from a server on a renderer.
#[derive(Parser, Debug)]
#[command(name = "control-point")]
#[command(about = "Watch UPnP media devices and play an object on a renderer")]
pub struct Args {
    /// UDN of the renderer to play on
    #[arg(long, requires_all = ["server", "object"])]
    pub renderer: Option<String>,

    /// UDN of the media server holding the object
    #[arg(long, requires_all = ["renderer", "object"])]
    pub server: Option<String>,

    /// ContentDirectory object ID to play
    #[arg(long, requires_all = ["renderer", "server"])]
    pub object: Option<String>,

    /// First port tried for the event callback endpoint
    #[arg(long, default_value = "51234")]
    pub callback_port: u16,

    /// Seconds between M-SEARCH rounds
    #[arg(long, default_value_t = DEFAULT_SEARCH_INTERVAL.as_secs())]
    pub search_interval: u64,

    /// Seconds between device table prints, 0 disables the table
    #[arg(long, default_value = "30")]
    pub table_interval: u64,

    /// Seconds to wait for the playback devices to be discovered
    #[arg(long, default_value = "15")]
    pub discovery_wait: u64,

    /// Seconds to wait for a renderer to confirm a transport change
    #[arg(long, default_value = "10")]
    pub transition_timeout: u64,
}

impl Args {
    /// Apply environment overrides looked up through `var`
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(port) = var(CALLBACK_PORT_ENV) {
            self.callback_port = port
                .parse()
                .with_context(|| format!("Invalid {CALLBACK_PORT_ENV} environment variable"))?;
        }
        if let Some(seconds) = var(SEARCH_INTERVAL_ENV) {
            self.search_interval = seconds
                .parse()
                .with_context(|| format!("Invalid {SEARCH_INTERVAL_ENV} environment variable"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.callback_port == 0 {
            return Err(anyhow!("Callback port must not be 0"));
        }
        if self.callback_port.checked_add(CALLBACK_PORT_SPAN).is_none() {
            return Err(anyhow!(
                "Callback port {} leaves no room for {} fallback ports",
                self.callback_port,
                CALLBACK_PORT_SPAN
            ));
        }
        if self.search_interval == 0 {
            return Err(anyhow!("Search interval must be positive"));
        }
        if self.transition_timeout == 0 {
            return Err(anyhow!("Transition timeout must be positive"));
        }
        Ok(())
    }

    pub fn control_point_config(&self) -> ControlPointConfig {
        ControlPointConfig::new()
            .with_discovery(
                DiscoveryConfig::new().with_search_interval(Duration::from_secs(self.search_interval)),
            )
            .with_eventing(
                EventingConfig::new()
                    .with_callback_ports(self.callback_port, self.callback_port + CALLBACK_PORT_SPAN),
            )
            .with_controller(
                ControllerConfig::new().with_transition_timeout(Duration::from_secs(self.transition_timeout)),
            )
    }

    /// Renderer, server and object when playback was requested
    pub fn playback_request(&self) -> Option<(&str, &str, &str)> {
        match (&self.renderer, &self.server, &self.object) {
            (Some(renderer), Some(server), Some(object)) => Some((renderer, server, object)),
            _ => None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    av_control::init_logging_from_env().context("Failed to initialize logging")?;

    let mut args = Args::parse();
    args.apply_env(|name| std::env::var(name).ok())?;
    args.validate()?;

    let control_point = Arc::new(
        ControlPoint::with_network(args.control_point_config()).context("Invalid control point configuration")?,
    );

    let _device_events = control_point.on_device_event(print_device_event).await;
    control_point.start().await.context("Failed to start control point")?;
    println!("Control point running, press Ctrl-C to stop");

    if let Some((renderer, server, object)) = args.playback_request() {
        let control_point = control_point.clone();
        let discovery_wait = Duration::from_secs(args.discovery_wait);
        let (renderer, server, object) = (renderer.to_string(), server.to_string(), object.to_string());
        tokio::spawn(async move {
            if let Err(error) = play_object(&control_point, &renderer, &server, &object, discovery_wait).await {
                error!("Playback failed: {error:#}");
            }
        });
    }

    let mut table = interval(Duration::from_secs(args.table_interval.max(1)));
    table.set_missed_tick_behavior(MissedTickBehavior::Delay);
    table.tick().await;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                break;
            }
            _ = table.tick(), if args.table_interval > 0 => {
                print_device_table(&control_point);
            }
        }
    }

    println!("Shutting down");
    control_point.stop().await.context("Failed to stop control point")?;
    Ok(())
}

fn print_device_event(event: DeviceEvent) -> impl Future<Output = CallbackResult> {
    match &event {
        DeviceEvent::Added(entry) => println!("+ {} {} ({})", entry.kind, entry.friendly_name, entry.udn),
        DeviceEvent::Removed(entry) => println!("- {} {} ({})", entry.kind, entry.friendly_name, entry.udn),
    }
    async { Ok(()) }
}

fn print_device_table(control_point: &ControlPoint) {
    let servers = control_point.media_servers();
    let renderers = control_point.media_renderers();

    println!();
    println!("{:<14} {:<30} {:<38} {}", "KIND", "NAME", "UDN", "LAST SEEN");
    for entry in servers.iter().chain(renderers.iter()) {
        println!("{}", table_row(entry));
    }
    println!("{} server(s), {} renderer(s)", servers.len(), renderers.len());
}

fn table_row(entry: &DeviceEntry) -> String {
    format!(
        "{:<14} {:<30} {:<38} {}s ago",
        entry.kind.to_string(),
        truncate(&entry.friendly_name, 30),
        entry.udn,
        entry.last_seen.elapsed().as_secs()
    )
}

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        return value.to_string();
    }
    let mut truncated: String = value.chars().take(width.saturating_sub(1)).collect();
    truncated.push('~');
    truncated
}

async fn play_object(
    control_point: &ControlPoint,
    renderer_udn: &str,
    server_udn: &str,
    object_id: &str,
    discovery_wait: Duration,
) -> Result<()> {
    info!(renderer = %renderer_udn, server = %server_udn, "Waiting for playback devices");
    let (controller, server) = timeout(discovery_wait, async {
        loop {
            let controller = control_point.get_controller_for_renderer(renderer_udn);
            let server = control_point.get_media_server_by_udn(server_udn);
            if let (Ok(controller), Ok(server)) = (controller, server) {
                return (controller, server);
            }
            sleep(Duration::from_millis(250)).await;
        }
    })
    .await
    .map_err(|_| anyhow!("Renderer {renderer_udn} or server {server_udn} not discovered in time"))?;

    let item = match server.browse_metadata(object_id).await {
        Ok(didl) => match didl.first() {
            Some(object) => PlaybackItem::from_object(server_udn, object),
            None => return Err(anyhow!("Object {object_id} not found on {}", server.friendly_name())),
        },
        Err(error) => {
            warn!(%error, "Metadata unavailable, queueing object by id");
            PlaybackItem::new(server_udn, object_id, object_id)
        }
    };

    let _notifications = control_point
        .subscribe_notifications(renderer_udn, |info| async move {
            println!(
                "* {} {}",
                info.transport,
                info.title.as_deref().unwrap_or("-")
            );
            Ok(())
        })
        .await?;

    println!("Playing \"{}\"", item.title);
    controller.replace([item]);
    controller.play().await?;

    // keep printing playback info while the controller plays
    while controller.is_playing() {
        sleep(Duration::from_secs(1)).await;
    }
    println!("Playback finished");
    Ok(())
}
