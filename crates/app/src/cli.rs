use std::collections::HashSet;

use anyhow::{Context, Result, anyhow};
use scan_core::{Decoder, PreprocessConfig, Preprocessor};

use crate::scanner;
use crate::scanner::history;
use crate::scanner::lookup::{LookupOutcome, ProductClient, ProductRecord};

const USAGE: &str = "Usage: scanlens <command>\n\nCommands:\n  scan      Run the live scanning pipeline (see `scanlens scan --help`)\n  decode    Decode barcodes from a still image: scanlens decode <image-path>\n  lookup    Look up product data for a payload: scanlens lookup <code>\n  history   Print a persisted scan history: scanlens history <path>";

pub fn handle_commands(args: &[String]) -> Result<bool> {
    match args.get(1).map(|s| s.as_str()) {
        Some("scan") => {
            scanner::run_from_args(args)?;
            Ok(true)
        }
        Some("decode") => {
            decode_image(args)?;
            Ok(true)
        }
        Some("lookup") => {
            lookup_code(args)?;
            Ok(true)
        }
        Some("history") => {
            print_history(args)?;
            Ok(true)
        }
        Some("help") | Some("--help") | Some("-h") => {
            print_usage();
            Ok(true)
        }
        _ => Ok(false),
    }
}

pub fn print_usage() {
    println!("{USAGE}");
}

/// One-shot decode of a still image through the same variant sweep the live
/// pipeline uses.
fn decode_image(args: &[String]) -> Result<()> {
    let path = args
        .get(2)
        .ok_or_else(|| anyhow!("Usage: scanlens decode <image-path>"))?;
    let image = image::open(path).with_context(|| format!("failed to open image {path}"))?;
    let luma = image.to_luma8();
    let (width, height) = luma.dimensions();

    let preprocessor = Preprocessor::new(PreprocessConfig::default())?;
    let decoder = Decoder::new();
    let mut seen = HashSet::new();

    for variant in preprocessor.variants(luma.as_raw(), width as usize, height as usize) {
        for detection in decoder.decode_luma(variant.data, width, height) {
            if seen.insert((detection.symbology, detection.text.clone())) {
                println!(
                    "{}  {}  (variant: {})",
                    detection.symbology, detection.text, variant.name
                );
            }
        }
    }

    if seen.is_empty() {
        println!("no barcodes detected in {path}");
    }
    Ok(())
}

fn lookup_code(args: &[String]) -> Result<()> {
    let code = args
        .get(2)
        .ok_or_else(|| anyhow!("Usage: scanlens lookup <code>"))?;
    let client = ProductClient::from_env()?;
    match client.lookup(code) {
        LookupOutcome::Found(record) => print_product(&record),
        LookupOutcome::NotFound => println!("no product data for {code}"),
    }
    Ok(())
}

fn print_history(args: &[String]) -> Result<()> {
    let path = args
        .get(2)
        .ok_or_else(|| anyhow!("Usage: scanlens history <path>"))?;
    let entries = history::load(std::path::Path::new(path))?;
    if entries.is_empty() {
        println!("no scans recorded in {path}");
        return Ok(());
    }
    for (index, entry) in entries.iter().enumerate() {
        let product = entry
            .product
            .as_ref()
            .and_then(|record| record.name.as_deref())
            .unwrap_or("-");
        println!(
            "{:>4}. [{}] {} {}  {}",
            index + 1,
            entry.time.format("%Y-%m-%d %H:%M:%S"),
            entry.symbology,
            entry.code,
            product
        );
    }
    Ok(())
}

fn print_product(record: &ProductRecord) {
    println!("code:        {}", record.code);
    println!("source:      {}", record.source);
    if let Some(name) = &record.name {
        println!("product:     {name}");
    }
    if let Some(brand) = &record.brand {
        println!("brand:       {brand}");
    }
    if let Some(category) = &record.category {
        println!("category:    {category}");
    }
    if let Some(origin) = &record.origin {
        println!("origin:      {origin}");
    }
    if let Some(description) = &record.description {
        println!("description: {description}");
    }
    if let Some(nutrition) = &record.nutrition {
        if let Some(energy) = nutrition.energy_kcal {
            println!("energy:      {energy} kcal/100g");
        }
        if let Some(fat) = nutrition.fat_g {
            println!("fat:         {fat} g/100g");
        }
        if let Some(carbs) = nutrition.carbs_g {
            println!("carbs:       {carbs} g/100g");
        }
        if let Some(protein) = nutrition.protein_g {
            println!("protein:     {protein} g/100g");
        }
    }
    if let Some(ingredients) = &record.ingredients {
        let mut preview: String = ingredients.chars().take(200).collect();
        if preview.len() < ingredients.len() {
            preview.push_str("...");
        }
        println!("ingredients: {preview}");
    }
}
