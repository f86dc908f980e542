// Copyright Catenary Transit Initiatives
// Runs the cluster engine headless over a JSON dataset and prints what the map would show

use anyhow::Context;
use clap::Parser;
use geocluster::headless::{HeadlessSurface, ViewportCommand};
use geocluster::{
    ClusterManager, ClusterOptions, ClusterRecord, ClusterState, Contact, Group, WideGroupNotice,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Slack added to each wait so the deferred task's own timer has fired.
const SETTLE: Duration = Duration::from_millis(50);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON file with `groups` and `contacts`
    #[arg(short, long)]
    input: PathBuf,
    /// RON file with cluster options
    #[arg(short, long)]
    options: Option<PathBuf>,
    /// Zoom levels to report, in order
    #[arg(short, long, value_delimiter = ',', default_values_t = vec![10.0, 13.0, 16.0])]
    zoom: Vec<f64>,
    /// Click the aggregate marker of this group after the zoom sweep
    #[arg(long)]
    click: Option<String>,
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,
}

#[derive(Deserialize)]
struct PreviewInput {
    #[serde(default)]
    groups: Vec<Group>,
    #[serde(default)]
    contacts: Vec<Contact>,
}

#[derive(Serialize)]
struct ZoomReport {
    zoom: f64,
    state: ClusterState,
}

#[derive(Serialize)]
struct ClickReport {
    group_id: String,
    notices: Vec<WideGroupNotice>,
    viewport_commands: Vec<ViewportCommand>,
}

#[derive(Serialize)]
struct PreviewReport<'a> {
    clusters: &'a [ClusterRecord],
    zooms: Vec<ZoomReport>,
    click: Option<ClickReport>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_writer(std::io::stderr)
        .init();

    let raw = std::fs::read_to_string(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;
    let input: PreviewInput = serde_json::from_str(&raw).context("parsing preview input")?;

    let options = match &args.options {
        Some(path) => ClusterOptions::from_ron_file(path)?,
        None => ClusterOptions::default(),
    }
    .with_env_overrides();

    let first_zoom = args.zoom.first().copied().unwrap_or(10.0);
    let surface = Arc::new(HeadlessSurface::new(first_zoom));
    let fit_delay = options.wide_group_fit_delay();
    let auto_center_delay = options.auto_center_delay();

    let mut manager =
        ClusterManager::new(surface.clone(), input.groups, input.contacts, options)?;

    let notices = Arc::new(Mutex::new(Vec::new()));
    let notice_sink = Arc::clone(&notices);
    manager.set_wide_group_notice_handler(move |notice| {
        if let Ok(mut notices) = notice_sink.lock() {
            notices.push(notice.clone());
        }
    });

    manager.initialize().await?;

    let mut zooms = Vec::with_capacity(args.zoom.len());
    for zoom in &args.zoom {
        surface.user_zoom(*zoom);
        manager.process_pending_events();
        zooms.push(ZoomReport {
            zoom: *zoom,
            state: manager.get_state(),
        });
    }

    let click = match &args.click {
        Some(group_id) => {
            let marker = manager
                .markers()
                .aggregate_marker(group_id)
                .with_context(|| format!("no cluster for group {}", group_id))?;
            // let the post-build auto-centre land first
            tokio::time::sleep(auto_center_delay + SETTLE).await;
            let before = surface.viewport_commands().len();

            surface.click(marker);
            manager.process_pending_events();
            tokio::time::sleep(fit_delay + SETTLE).await;

            let notices = notices.lock().map(|n| n.clone()).unwrap_or_default();
            Some(ClickReport {
                group_id: group_id.clone(),
                notices,
                viewport_commands: surface.viewport_commands().split_off(before),
            })
        }
        None => None,
    };

    let report = PreviewReport {
        clusters: manager.clusters(),
        zooms,
        click,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
