//! unFold CLI
//!
//! Offline tooling for redirect rule files: lint a file against the
//! compiler and safety policy, or simulate a full request decision
//! (compile, decide, guard) without a browser attached.

use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand};
use serde_json::json;

use uf_core::psl::Psl;
use uf_core::types::{Mode, Posture, RedirectDecision, RequestInfo, ResourceType};
use uf_compiler::{parse_line, SafetyPolicy};
use uf_engine::{Engine, EngineConfig, RuleTexts};

#[derive(Parser)]
#[command(name = "uf-cli")]
#[command(about = "unFold redirect rule compiler and tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lint a rule file: report accepted and rejected lines
    Lint {
        /// Rule file to check
        input: String,

        /// Emit a JSON report instead of plain text
        #[arg(long)]
        json: bool,
    },

    /// Simulate a request decision against a rule file
    Decide {
        /// Rule file to compile
        #[arg(short, long)]
        rules: String,

        /// Posture to decide under (desktop or mobile)
        #[arg(short, long, default_value = "desktop")]
        posture: String,

        /// Request URL
        #[arg(short, long)]
        url: String,

        /// Tab id for guard bookkeeping
        #[arg(short, long, default_value_t = 1)]
        tab: i32,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Lint { input, json } => cmd_lint(&input, json),
        Commands::Decide {
            rules,
            posture,
            url,
            tab,
        } => cmd_decide(&rules, &posture, &url, tab),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn cmd_lint(input: &str, as_json: bool) -> Result<(), String> {
    let text =
        fs::read_to_string(input).map_err(|e| format!("Failed to read '{}': {}", input, e))?;

    let policy = SafetyPolicy::default();
    let mut accepted = 0usize;
    let mut skipped = 0usize;
    let mut rejected = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        match parse_line(line, line_no, &policy) {
            Ok(Some(_)) => accepted += 1,
            Ok(None) => skipped += 1,
            Err(err) => rejected.push((line_no, line.to_string(), err.to_string())),
        }
    }

    if as_json {
        let report = json!({
            "file": input,
            "accepted": accepted,
            "skipped": skipped,
            "rejected": rejected
                .iter()
                .map(|(line_no, line, reason)| json!({
                    "line": line_no,
                    "text": line,
                    "reason": reason,
                }))
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?);
    } else {
        println!("Linted '{}'", input);
        println!("  Accepted:  {}", accepted);
        println!("  Comments:  {}", skipped);
        println!("  Rejected:  {}", rejected.len());
        for (line_no, line, reason) in &rejected {
            println!("    line {}: {} ({})", line_no, line.trim(), reason);
        }
    }

    if rejected.is_empty() {
        Ok(())
    } else {
        Err(format!("{} line(s) rejected", rejected.len()))
    }
}

fn cmd_decide(rules_path: &str, posture: &str, url: &str, tab: i32) -> Result<(), String> {
    let posture = match posture {
        "desktop" => Posture::Desktop,
        "mobile" => Posture::Mobile,
        other => return Err(format!("Unknown posture '{}': expected desktop or mobile", other)),
    };

    let text = fs::read_to_string(rules_path)
        .map_err(|e| format!("Failed to read '{}': {}", rules_path, e))?;

    let host = Engine::host_of(url).ok_or_else(|| format!("Not an http(s) URL: '{}'", url))?;

    let mut engine = Engine::new(
        EngineConfig {
            mode: Mode::Always,
            ..Default::default()
        },
        Psl::default(),
    );
    engine.recompile_rules(
        posture,
        &RuleTexts {
            custom: text,
            remote: String::new(),
        },
    );

    let req = RequestInfo {
        tab_id: tab,
        url: url.to_string(),
        host,
        resource_type: ResourceType::MainFrame,
    };
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    match engine.decide_as(&req, posture, now_ms) {
        RedirectDecision::RedirectTo(target) => {
            println!("Redirect: {} -> {}", url, target);
        }
        RedirectDecision::None => {
            println!("No redirect for {}", url);
        }
    }

    Ok(())
}
