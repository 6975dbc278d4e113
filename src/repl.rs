use crate::classifier::ImageClassifier;
use crate::error::{Operation, Result};
use crate::orchestrator::SelectionOrchestrator;
use crate::parse::parse_days;
use crate::record::{ClassificationCandidate, Taxon};
use crate::util::{print_state, taxon_line};
use log::warn;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, PartialEq)]
enum ReplCommand<'a> {
    Search(&'a str),
    Pick(usize),
    Days(u32),
    Classify(&'a str),
    Use(usize),
    Stats,
    Status,
    Help,
    Quit,
    Invalid(String),
}

fn parse_command(line: &str) -> ReplCommand<'_> {
    let line = line.trim();
    let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    let index = |rest: &str| match rest.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("expected a result number, got {rest:?}")),
    };

    match word {
        "search" | "s" => ReplCommand::Search(rest),
        "pick" | "p" => index(rest).map_or_else(ReplCommand::Invalid, ReplCommand::Pick),
        "days" | "d" => parse_days(rest).map_or_else(ReplCommand::Invalid, ReplCommand::Days),
        "classify" | "c" if !rest.is_empty() => ReplCommand::Classify(rest),
        "use" | "u" => index(rest).map_or_else(ReplCommand::Invalid, ReplCommand::Use),
        "stats" => ReplCommand::Stats,
        "status" => ReplCommand::Status,
        "help" | "?" | "" => ReplCommand::Help,
        "quit" | "exit" | "q" => ReplCommand::Quit,
        other => ReplCommand::Invalid(format!("unknown command {other:?}")),
    }
}

fn print_help() {
    println!("Commands:");
    println!("  search <text>     find species");
    println!("  pick <n>          show sightings of search result n");
    println!("  days <n>          sightings in the past 7, 14, 30, 60 or 90 days");
    println!("  classify <path>   identify the subject of a photo");
    println!("  use <n>           show sightings of prediction n");
    println!("  stats             show the current selection");
    println!("  status            show the classifier model status");
    println!("  quit");
}

pub async fn run(orchestrator: &SelectionOrchestrator, classifier: &ImageClassifier) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut taxa: Vec<Taxon> = Vec::new();
    let mut predictions: Vec<ClassificationCandidate> = Vec::new();

    print_help();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };

        match parse_command(&line) {
            ReplCommand::Search(text) => match orchestrator.search(text).await {
                Ok(found) => {
                    if found.is_empty() {
                        println!("No species found matching \"{}\"", text);
                    }
                    for (i, taxon) in found.iter().enumerate() {
                        println!("{}", taxon_line(i + 1, taxon));
                    }
                    taxa = found;
                }
                Err(e) => {
                    warn!("Error searching taxa: {}", e);
                    println!("{}", e.user_message(Operation::SearchTaxa));
                }
            },
            ReplCommand::Pick(n) => match taxa.get(n - 1) {
                Some(taxon) => {
                    orchestrator.select_taxon(taxon.clone()).await;
                    print_state(&orchestrator.snapshot());
                }
                None => println!("No search result #{}", n),
            },
            ReplCommand::Days(days) => {
                orchestrator.change_window(days).await;
                print_state(&orchestrator.snapshot());
            }
            ReplCommand::Classify(path) => {
                let bytes = match tokio::fs::read(path).await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        println!("Could not read {}: {}", path, e);
                        continue;
                    }
                };
                match classifier.classify(&bytes).await {
                    Ok(found) => {
                        for (i, candidate) in found.iter().take(5).enumerate() {
                            println!(
                                "{:>2}. {} ({:.1}%)",
                                i + 1,
                                candidate.display_name,
                                candidate.confidence * 100.0
                            );
                        }
                        predictions = found;
                    }
                    Err(e) => {
                        warn!("Classification error: {}", e);
                        println!("{}", e.user_message(Operation::Classify));
                    }
                }
            }
            ReplCommand::Use(n) => match predictions.get(n - 1) {
                Some(candidate) => {
                    orchestrator
                        .select_from_classification(&candidate.display_name)
                        .await;
                    print_state(&orchestrator.snapshot());
                }
                None => println!("No prediction #{}", n),
            },
            ReplCommand::Stats => print_state(&orchestrator.snapshot()),
            ReplCommand::Status => {
                println!("Model {}: {:?}", classifier.model_id(), classifier.status())
            }
            ReplCommand::Help => print_help(),
            ReplCommand::Quit => break,
            ReplCommand::Invalid(message) => println!("{}", message),
        }
    }

    Ok(())
}
