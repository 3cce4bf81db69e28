use console::Style;

use crate::pipeline::PrepareError;
use crate::state::PrepareSummary;

pub fn print_error(msg: &str) {
    let style = Style::new().red().bold();
    eprintln!("{} {}", style.apply_to("✗"), msg);
}

pub fn print_success(msg: &str) {
    let style = Style::new().green().bold();
    println!("{} {}", style.apply_to("✓"), msg);
}

pub fn print_prepare_error(err: &PrepareError) {
    let stage = Style::new().dim();
    print_error(&format!("{} {}", stage.apply_to(format!("[{}]", err.stage())), err));
}

pub fn print_summary(summary: &PrepareSummary) {
    let style = Style::new().green().bold();
    println!(
        "{} {} mutants in {}/{} files, {} checker{} ready in {:.1}s",
        style.apply_to("✓"),
        summary.mutants,
        summary.instrumented_files,
        summary.files,
        summary.checkers,
        if summary.checkers == 1 { "" } else { "s" },
        summary.duration_ms as f64 / 1000.0,
    );

    let dim = Style::new().dim();
    if summary.sandbox_kept {
        println!("  {} sandbox kept at {}", dim.apply_to("·"), summary.sandbox);
    }
    if summary.mutants_by_mutator.is_empty() {
        return;
    }
    println!();
    let op_style = Style::new().magenta();
    for (mutator, count) in &summary.mutants_by_mutator {
        println!("  {:>5} {}", count, op_style.apply_to(mutator));
    }
}

pub fn print_status(summary: &PrepareSummary) {
    println!(
        "Last run ({}): {} mutants, {} files instrumented, {} checkers",
        summary.session, summary.mutants, summary.instrumented_files, summary.checkers,
    );
    if summary.sandbox_kept {
        println!("Sandbox: {}", summary.sandbox);
    }
}
