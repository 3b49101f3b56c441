use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::env;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use nutrition_lookup::aggregator::{MultiSourceAggregator, SearchOptions};
use nutrition_lookup::cache::ResultCache;
use nutrition_lookup::config::AppConfig;
use nutrition_lookup::llm::ModelDispatcher;
use nutrition_lookup::meal_text::MealTextParser;
use nutrition_lookup::rate_limiter::RateLimiters;
use nutrition_lookup::serving_conversion::{ConversionEngine, ConversionRequest};
use nutrition_lookup::sources::{FoodSource, ModelFoodLookup, ModelTextSource, OpenFoodFactsClient};

const USAGE: &str = "Usage:
  nutrition-lookup search <query>
  nutrition-lookup code <barcode>
  nutrition-lookup image <path>
  nutrition-lookup suggest <query>
  nutrition-lookup convert <food> <serving_qty> <serving_unit> <qty> <unit>
  nutrition-lookup meal <text>";

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    // Logs go to stderr so stdout stays valid JSON
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{text}");
    Ok(())
}

fn parse_quantity(raw: &str, name: &str) -> Result<f64> {
    raw.trim()
        .parse::<f64>()
        .with_context(|| format!("{name} must be a number, got '{raw}'"))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    let config = AppConfig::from_env();
    init_logging();

    let args: Vec<String> = env::args().skip(1).collect();
    let Some((command, rest)) = args.split_first() else {
        bail!("{USAGE}");
    };

    info!(command = %command, "Starting nutrition lookup");

    let dispatcher = Arc::new(
        ModelDispatcher::with_http(config.provider.clone())
            .context("Failed to initialize model dispatcher")?,
    );
    let lookup = Arc::new(ModelFoodLookup::new(Arc::clone(&dispatcher)));

    match command.as_str() {
        "search" => {
            let query = rest.join(" ");
            let off = OpenFoodFactsClient::new(config.open_food_facts.clone())
                .context("Failed to initialize Open Food Facts client")?;

            let mut sources: Vec<Arc<dyn FoodSource>> = vec![Arc::new(off)];
            if lookup.is_available() {
                sources.push(Arc::new(ModelTextSource::new(Arc::clone(&lookup))));
            }

            let aggregator = MultiSourceAggregator::new(
                sources,
                Arc::new(ResultCache::from_config(&config.cache)),
                Arc::new(RateLimiters::new(&config.rate_limits)),
                config.aggregator.clone(),
            )
            .with_fallback_available(lookup.is_available());

            let result = aggregator.search(&query, &SearchOptions::default()).await;
            print_json(&result)
        }
        "code" => {
            let Some(code) = rest.first() else {
                bail!("{USAGE}");
            };
            let off = OpenFoodFactsClient::new(config.open_food_facts.clone())
                .context("Failed to initialize Open Food Facts client")?;
            let aggregator = MultiSourceAggregator::new(
                vec![Arc::new(off)],
                Arc::new(ResultCache::from_config(&config.cache)),
                Arc::new(RateLimiters::new(&config.rate_limits)),
                config.aggregator.clone(),
            );

            match aggregator.get_by_code(code).await {
                Some(candidate) => print_json(&candidate),
                None if lookup.is_available() => {
                    let estimate = lookup
                        .lookup_by_code(code)
                        .await
                        .context("Model barcode lookup failed")?;
                    print_json(&estimate)
                }
                None => print_json(&Option::<()>::None),
            }
        }
        "image" => {
            let Some(path) = rest.first() else {
                bail!("{USAGE}");
            };
            let candidates = lookup
                .lookup_by_image_file(Path::new(path))
                .await
                .context("Image lookup failed")?;
            print_json(&candidates)
        }
        "suggest" => {
            let suggestions = lookup.suggest(&rest.join(" "), 5).await;
            print_json(&suggestions)
        }
        "convert" => {
            let [food, serving_qty, serving_unit, qty, unit] = rest else {
                bail!("{USAGE}");
            };
            let request = ConversionRequest::new(
                food,
                parse_quantity(serving_qty, "serving_qty")?,
                serving_unit,
                parse_quantity(qty, "qty")?,
                unit,
            );
            let engine = ConversionEngine::new(Some(Arc::clone(&dispatcher)));
            let result = engine
                .convert_to_servings(&request)
                .await
                .context("Conversion failed")?;
            print_json(&result)
        }
        "meal" => {
            let parser = MealTextParser::new(Arc::clone(&dispatcher));
            let items = parser
                .parse(&rest.join(" "), &[])
                .await
                .context("Meal text parsing failed")?;
            print_json(&items)
        }
        other => bail!("Unknown command '{other}'\n{USAGE}"),
    }
}
