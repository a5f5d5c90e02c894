// Terminal output for the lae commands
// All of it goes to stderr; stdout carries only the result document

use std::time::Duration;

use lae_service::{Operator, WorkerReport};

const RESET: &str = "\x1b[0m";

fn painted(style: &str, text: &str) -> String {
    format!("\x1b[{}m{}{}", style, text, RESET)
}

/// Right-aligned verb followed by its subject, e.g. "     Parsing input.json"
pub fn action(verb: &str, subject: &str) {
    eprintln!("{} {}", painted("1;36", &format!("{:>12}", verb)), subject);
}

/// Section banner
pub fn banner(message: &str) {
    eprintln!("{}", painted("1", &format!("==> {}", message)));
}

pub fn passed(message: &str) {
    eprintln!("{} {}", painted("32", "  \u{2713}"), message);
}

pub fn failed(message: &str) {
    eprintln!("{} {}", painted("1;31", "  \u{2717}"), message);
}

pub fn warn(message: &str) {
    eprintln!("{} {}", painted("33", "  !"), message);
}

pub fn note(message: &str) {
    eprintln!("{} {}", painted("36", "  i"), message);
}

/// Fatal error line, printed before a non-zero exit
pub fn error(message: &str) {
    eprintln!("{} {}", painted("1;31", "error:"), message);
}

pub fn step_started(step: usize, operator: Operator, tasks: usize) {
    action(
        &format!("Step {}", step),
        &format!("{} {} ({} row tasks)", operator.symbol(), operator, tasks),
    );
}

pub fn step_completed(rows: usize, cols: usize, elapsed: Duration) {
    eprintln!(
        "{:>12} {}",
        "",
        painted(
            "32",
            &format!("{}x{} in {:.2}ms", rows, cols, elapsed.as_secs_f64() * 1000.0)
        )
    );
}

/// One row of the per-worker report
pub fn worker(report: &WorkerReport) {
    eprintln!("{}", painted("2", &worker_line(report)));
}

fn worker_line(report: &WorkerReport) -> String {
    let state = if report.busy { "busy" } else { "idle" };
    format!(
        "  #{:<3} {:<4} worked {:>10.3?}  rested {:>10.3?}  fatigue {:>14.1}  x{:.2}",
        report.id, state, report.time_used, report.time_idle, report.fatigue, report.fatigue_factor
    )
}
