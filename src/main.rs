//! lotscan - offline helpers around the capture pipeline
//!
//! Subcommands:
//! - `lotscan extract [TEXT]` - Pull lot code and expiry date out of label text
//! - `lotscan lookup <BARCODE>` - Fetch product metadata for a barcode
//! - `lotscan settings` - Print the effective settings

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use serde::Serialize;

use lotscan::lookup::{OpenFoodFactsLookup, ProductLookup};
use lotscan::{ExtractionResult, FieldExtractor, ScannerSettings, SettingsStore};

#[derive(Parser)]
#[command(name = "lotscan")]
#[command(about = "Barcode, lot code and expiry date capture tools")]
#[command(version)]
struct Cli {
    /// Settings file (JSON). Defaults are used for anything missing.
    #[arg(short, long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract lot code and expiry date from recognized label text
    Extract {
        /// Label text; read from stdin when omitted
        text: Option<String>,

        /// Comma-separated lot markers, overriding the settings file
        #[arg(short, long, value_delimiter = ',')]
        markers: Vec<String>,
    },

    /// Look up product metadata by barcode
    Lookup {
        barcode: String,

        /// Language for localized product fields
        #[arg(short, long)]
        language: Option<String>,
    },

    /// Print the effective settings as JSON
    Settings,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExtractOutput<'a> {
    text: &'a str,
    #[serde(flatten)]
    result: ExtractionResult,
    /// False when the expiry date does not exist on the calendar.
    expiry_date_valid: Option<bool>,
}

fn load_settings(path: Option<PathBuf>) -> Result<ScannerSettings> {
    match path {
        Some(path) => {
            let store = SettingsStore::new(path)?;
            info!("settings loaded from {}", store.path().display());
            Ok(store.settings())
        }
        None => Ok(ScannerSettings::default()),
    }
}

fn read_stdin() -> Result<String> {
    let mut text = String::new();
    std::io::stdin()
        .read_to_string(&mut text)
        .context("failed to read label text from stdin")?;
    Ok(text)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    lotscan::init_logging();
    let cli = Cli::parse();
    let settings = load_settings(cli.settings)?;

    match cli.command {
        Commands::Extract { text, markers } => {
            let text = match text {
                Some(text) => text,
                None => read_stdin()?,
            };
            let extractor = if markers.is_empty() {
                FieldExtractor::new(&settings.lot_markers)?
            } else {
                FieldExtractor::new(&markers)?
            };

            let result = extractor.extract(&text);
            let expiry_date_valid = result.expiry_date.as_ref().map(|date| date.is_calendar_valid());
            print_json(&ExtractOutput {
                text: text.trim(),
                result,
                expiry_date_valid,
            })?;
        }
        Commands::Lookup { barcode, language } => {
            let mut lookup_settings = settings.lookup;
            if let Some(language) = language {
                lookup_settings.language = language;
            }
            let lookup = OpenFoodFactsLookup::new(&lookup_settings)?;
            info!("looking up {}", lookup.product_url(barcode.trim())?);
            print_json(&lookup.lookup(&barcode).await)?;
        }
        Commands::Settings => print_json(&settings)?,
    }

    Ok(())
}
