// src/bin/compare_names.rs
//
// Prints every signal the matcher computes for a pair of facility names, to
// help tune the MATCH_* thresholds and the FACILITY_STOPWORDS vocabulary.
//
//   compare_names "Devon Gables" "Devon Gables Rehabilitation Center"
//   compare_names            (interactive)

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use proforma_lib::matching::matcher::exceeds_edit_budget;
use proforma_lib::matching::similarity::{
    jaro_winkler_score, phonetic_key, ratio, score_normalized, token_set_ratio, token_sort_ratio,
};
use proforma_lib::matching::CandidateMatcher;
use proforma_lib::utils::config::LinkageConfig;
use proforma_lib::utils::env::load_env;
use std::io::{self, BufRead, Write};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct CompareArgs {
    /// Deal name
    name_a: Option<String>,

    /// Candidate name
    name_b: Option<String>,
}

fn report(matcher: &CandidateMatcher, config: &LinkageConfig, a: &str, b: &str) {
    let normalizer = matcher.scorer().normalizer();
    let norm_a = normalizer.normalize(a);
    let norm_b = normalizer.normalize(b);
    let score = score_normalized(&norm_a, &norm_b);
    let rejected = exceeds_edit_budget(
        score.levenshtein_distance,
        a.chars().count(),
        b.chars().count(),
    );

    println!();
    println!("Normalized:        {:?} | {:?}", norm_a, norm_b);
    println!("Token sort ratio:  {}", token_sort_ratio(&norm_a, &norm_b));
    println!("Token set ratio:   {}", token_set_ratio(&norm_a, &norm_b));
    println!("Indel ratio:       {}", ratio(&norm_a, &norm_b));
    println!("Jaro-Winkler:      {}", jaro_winkler_score(&norm_a, &norm_b));
    println!("Levenshtein:       {}", score.levenshtein_distance);
    println!(
        "Phonetic keys:     {:?} | {:?} (equal: {})",
        phonetic_key(&norm_a),
        phonetic_key(&norm_b),
        score.phonetic_equal
    );
    println!("Composite score:   {:.1}", score.composite_score);
    println!("Early rejection:   {}", if rejected { "yes" } else { "no" });

    let t = &config.thresholds;
    for (label, threshold) in [
        ("file name", t.file_name),
        ("in-file", t.in_file),
        ("in-file (beds far)", t.in_file_beds_far),
        ("fallback", t.fallback),
    ] {
        let passes = !rejected && score.composite_score >= threshold;
        println!(
            "  {:<20} {:>5.1}  {}",
            label,
            threshold,
            if passes { "PASS" } else { "fail" }
        );
    }
}

fn main() -> Result<()> {
    load_env();
    env_logger::init();
    let args = CompareArgs::parse();

    let config = LinkageConfig::from_env().context("Invalid linkage configuration")?;
    let matcher = config.build_matcher()?;

    if let (Some(a), Some(b)) = (&args.name_a, &args.name_b) {
        report(&matcher, &config, a, b);
        return Ok(());
    }

    info!("Interactive mode: enter two names, or q to quit");
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut lines = stdin.lock().lines();
    loop {
        print!("\nDeal name (q to quit): ");
        stdout.flush()?;
        let Some(a) = lines.next().transpose()? else {
            break;
        };
        let a = a.trim().to_string();
        if a.eq_ignore_ascii_case("q") {
            break;
        }
        if a.is_empty() {
            println!("Please enter a name.");
            continue;
        }

        print!("Candidate name: ");
        stdout.flush()?;
        let Some(b) = lines.next().transpose()? else {
            break;
        };
        report(&matcher, &config, &a, b.trim());
    }
    Ok(())
}
