use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use vast_tracker::beacon::BeaconDispatcher;
use vast_tracker::fetch::{HttpVastFetcher, UrlHandler, UrlHandlerOptions};
use vast_tracker::loader::{
    AdLoader, AdSource, CompanionOptions, LoaderOptions, LogNavigator, SelectAll, XmlInput,
};
use vast_tracker::sink::ConsoleSink;
use vast_tracker::tracker::LifecycleEvent;

/// VAST ad tracking and beacon delivery
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a VAST source and print the tracked ads
    Load {
        /// VAST URL or local file path
        #[arg(short, long)]
        input: String,

        /// Maximum companion variation width
        #[arg(long, default_value_t = 300)]
        max_width: u32,

        /// Maximum companion variation height
        #[arg(long, default_value_t = 250)]
        max_height: u32,
    },

    /// Load a VAST source and replay a synthetic playback through the tracker
    Simulate {
        /// VAST URL or local file path
        #[arg(short, long)]
        input: String,

        /// Playback duration in seconds
        #[arg(long, default_value_t = 30.0)]
        duration: f64,

        /// Progress step in seconds
        #[arg(long, default_value_t = 1.0)]
        step: f64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Load {
            input,
            max_width,
            max_height,
        } => {
            let loader = build_loader(*max_width, *max_height);
            let ads = loader.load(&source_for(input)?).await?;

            println!("loaded {} tracked ad(s)", ads.len());
            for (index, ad) in ads.iter().enumerate() {
                println!(
                    "  ad {}: id={} creative={} companion={}",
                    index,
                    ad.linear.ad_id().unwrap_or("-"),
                    ad.linear.creative_id().unwrap_or("-"),
                    ad.companion.is_some(),
                );
            }
        }
        Commands::Simulate {
            input,
            duration,
            step,
        } => {
            let loader = build_loader(300, 250);
            let mut ads = loader.load(&source_for(input)?).await?;

            for ad in &mut ads {
                ad.linear.record_lifecycle_event(LifecycleEvent::CreativeView);
                let mut position = 0.0;
                while position < *duration {
                    ad.linear.register_progress(position, Some(*duration));
                    position += *step;
                }
                ad.linear.register_progress(*duration, Some(*duration));
            }

            // Leave the spawned beacon deliveries a moment to finish
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    Ok(())
}

fn build_loader(max_width: u32, max_height: u32) -> AdLoader {
    let handler = UrlHandler::new(UrlHandlerOptions::default());
    AdLoader::new(
        Arc::new(HttpVastFetcher::new(handler)),
        Arc::new(SelectAll),
        Arc::new(BeaconDispatcher::new()),
        Arc::new(ConsoleSink),
        Arc::new(LogNavigator),
        LoaderOptions {
            companion: CompanionOptions {
                max_width,
                max_height,
            },
            ..LoaderOptions::default()
        },
    )
}

/// Local files hold inline XML; anything else is treated as a URL
fn source_for(input: &str) -> std::io::Result<AdSource> {
    if Path::new(input).exists() {
        let xml = std::fs::read_to_string(input)?;
        Ok(AdSource::from_xml(XmlInput::Raw(xml)))
    } else {
        Ok(AdSource::from_urls(vec![input.to_string()]))
    }
}
