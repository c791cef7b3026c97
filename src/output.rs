use console::Style;

use crate::mutants::MutationStatus;
use crate::state::{FileReport, MutationEntry, RunReport};

pub fn print_error(msg: &str) {
    let style = Style::new().red().bold();
    eprintln!("{} {}", style.apply_to("✗"), msg);
}

pub fn print_success(msg: &str) {
    let style = Style::new().green().bold();
    println!("{} {}", style.apply_to("✓"), msg);
}

fn format_score(score: Option<f64>) -> String {
    match score {
        Some(score) => format!("{score:.1}%"),
        None => "n/a".to_string(),
    }
}

fn status_style(status: MutationStatus) -> Style {
    match status {
        MutationStatus::Killed | MutationStatus::TypeError => Style::new().green(),
        MutationStatus::Survived => Style::new().yellow().bold(),
        MutationStatus::TimedOut => Style::new().cyan(),
        MutationStatus::Error => Style::new().red(),
        MutationStatus::Incomplete | MutationStatus::Waiting => Style::new().dim(),
    }
}

pub fn print_run_report(report: &RunReport) {
    let seconds = report.total_time_ms as f64 / 1000.0;

    if report.total == 0 {
        print_success("No covered mutation points found.");
    } else if report.survived == 0 && report.incomplete == 0 {
        let style = Style::new().green().bold();
        println!(
            "{} {} mutants, none survived ({} score) in {:.1}s",
            style.apply_to("✓"),
            report.total,
            format_score(report.score),
            seconds,
        );
    } else {
        let style = Style::new().yellow().bold();
        println!(
            "{} {} survived / {} mutants ({} score) in {:.1}s",
            style.apply_to("!"),
            report.survived,
            report.total,
            format_score(report.score),
            seconds,
        );
    }

    let dim = Style::new().dim();
    let buckets = [
        (report.killed, "killed"),
        (report.type_error, "rejected by the type checker"),
        (report.timed_out, "timed out"),
        (report.error, "errored"),
        (report.incomplete, "not evaluated"),
    ];
    for (count, label) in buckets {
        if count > 0 {
            println!("  {} {} {}", dim.apply_to("·"), count, label);
        }
    }
    if report.global_timeout_hit {
        let warn = Style::new().yellow();
        println!("  {} global timeout reached; results are partial", warn.apply_to("!"));
    }
    for failure in &report.coverage_errors {
        let warn = Style::new().yellow();
        println!(
            "  {} coverage run failed for {}; its tests were not used",
            warn.apply_to("!"),
            failure.test_file,
        );
    }

    let survivors: Vec<_> = report.survivors().collect();
    if survivors.is_empty() {
        return;
    }
    println!();
    for m in survivors {
        print_mutation_line(m);
    }
}

fn print_mutation_line(m: &MutationEntry) {
    let ref_style = Style::new().cyan().bold();
    let loc_style = Style::new().dim();
    let op_style = Style::new().magenta();

    println!(
        "  {} {}:{}:{} {} {} → {}",
        ref_style.apply_to(format!("@{}", m.ref_id)),
        m.file,
        m.line,
        m.column,
        loc_style.apply_to(format!("[{}]", m.operator)),
        op_style.apply_to(&m.original),
        op_style.apply_to(&m.replacement),
    );
}

pub fn print_mutation_detail(m: &MutationEntry) {
    let ref_style = Style::new().cyan().bold();
    let dim = Style::new().dim();

    println!(
        "{} {}:{}:{} [{}] {}",
        ref_style.apply_to(format!("@{}", m.ref_id)),
        m.file,
        m.line,
        m.column,
        m.operator,
        status_style(m.status).apply_to(m.status),
    );
    if !m.test_files.is_empty() {
        println!("  {} {}", dim.apply_to("tests:"), m.test_files.join(", "));
    }
    println!();

    for line in m.diff.lines() {
        if line.starts_with('-') {
            println!("  {}", Style::new().red().apply_to(line));
        } else if line.starts_with('+') {
            println!("  {}", Style::new().green().apply_to(line));
        }
    }
}

pub fn print_file_reports(files: &[FileReport]) {
    let file_style = Style::new().bold();
    let dim = Style::new().dim();
    for file in files {
        println!("{} ({} mutants)", file_style.apply_to(&file.file), file.total);
        if !file.test_files.is_empty() {
            let tests: Vec<&str> = file.test_files.iter().map(String::as_str).collect();
            println!("  {} {}", dim.apply_to("tests:"), tests.join(", "));
        }
        for (status, refs) in &file.by_status {
            let refs: Vec<String> = refs.iter().map(|r| format!("@{r}")).collect();
            println!("  {:<11} {}", status, refs.join(" "));
        }
    }
}

pub fn print_status(report: &RunReport) {
    println!(
        "Last run {}: {} mutants, {} killed, {} survived, {} type errors, {} timed out ({} score)",
        report.run_id,
        report.total,
        report.killed,
        report.survived,
        report.type_error,
        report.timed_out,
        format_score(report.score),
    );
    if report.global_timeout_hit {
        println!("Run was cut short by the global timeout; {} mutants not evaluated.", report.incomplete);
    }

    let survivors: Vec<_> = report.survivors().collect();
    if !survivors.is_empty() {
        println!();
        for m in &survivors {
            let ref_style = Style::new().cyan().bold();
            println!(
                "  {} {}:{} {} → {}",
                ref_style.apply_to(format!("@{}", m.ref_id)),
                m.file,
                m.line,
                m.original,
                m.replacement,
            );
        }
        println!();
        println!("Use `mutarun show @{}` for details on a specific mutant.", survivors[0].ref_id);
    }
}
