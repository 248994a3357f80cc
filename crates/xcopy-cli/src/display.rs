//! Terminal rendering of task reports

use console::{style, StyledObject};
use std::time::Duration;
use xcopy_engine::{NodeView, StateName, TaskReport, TaskStatus};
use xcopy_types::{EntityKind, TaskStats};

/// Print the final report of a task
pub fn display_report(report: &TaskReport, elapsed: Duration) {
    println!();
    println!(
        "{} {} {}",
        style("Task").bold().underlined(),
        style(report.id).dim(),
        status_style(report.status)
    );
    if let Some(view) = &report.view {
        println!();
        for line in render_tree(view) {
            println!("  {}", line);
        }
    }
    display_stats(&report.stats, elapsed);
}

/// Print task counters
pub fn display_stats(stats: &TaskStats, elapsed: Duration) {
    println!();
    println!("{}", style("Statistics:").bold().underlined());
    println!(
        "  Directories: {} done, {}",
        style(stats.dirs_finished).green(),
        count_style(stats.dirs_failed, "failed")
    );
    println!(
        "  Files: {} done, {}",
        style(stats.files_finished).green(),
        count_style(stats.files_failed, "failed")
    );
    println!("  Dropped entries: {}", count_style(stats.entries_dropped, ""));
    println!("  Conflicts met: {}", style(stats.conflicts).yellow());
    println!("  Duration: {}", style(format_duration(elapsed)).blue());
}

/// Lines of a tree view, one per node, with box-drawing indentation
pub fn render_tree(view: &NodeView) -> Vec<String> {
    let mut lines = vec![node_label(view, true)];
    render_children(view, "", &mut lines);
    lines
}

fn render_children(view: &NodeView, prefix: &str, lines: &mut Vec<String>) {
    let count = view.children.len();
    for (i, child) in view.children.iter().enumerate() {
        let last = i + 1 == count;
        let (branch, indent) = if last { ("└── ", "    ") } else { ("├── ", "│   ") };
        lines.push(format!("{}{}{}", prefix, branch, node_label(child, false)));
        render_children(child, &format!("{}{}", prefix, indent), lines);
    }
}

fn node_label(view: &NodeView, root: bool) -> String {
    let mut name = if root {
        "[root]".to_string()
    } else if view.kind == EntityKind::Directory {
        format!("{}/", view.name)
    } else {
        view.name.clone()
    };
    if let Some(dst) = &view.dst_name {
        name = format!("{} -> {}", name, dst);
    }

    let mut label = format!("{} {}", name, state_style(view.state));
    if view.pending_dirs + view.pending_files > 0 {
        label.push_str(&format!(
            " ({} dirs, {} files pending)",
            view.pending_dirs, view.pending_files
        ));
    }
    if let Some(error) = &view.error {
        let code = error.xcode.as_deref().unwrap_or(&error.code);
        label.push_str(&format!(" {} {}", style(code).red(), style(&error.message).dim()));
    }
    if let Some(policy) = view.policy {
        label.push_str(&format!(" policy {}", policy));
    }
    label
}

fn state_style(state: StateName) -> StyledObject<StateName> {
    match state {
        StateName::Finish => style(state).green(),
        StateName::Failed => style(state).red().bold(),
        StateName::Conflict => style(state).yellow().bold(),
        _ => style(state).cyan(),
    }
}

fn status_style(status: TaskStatus) -> StyledObject<TaskStatus> {
    match status {
        TaskStatus::Finished => style(status).green().bold(),
        TaskStatus::Failed | TaskStatus::Aborted => style(status).red().bold(),
        TaskStatus::Idle => style(status).yellow().bold(),
        TaskStatus::Running => style(status).cyan(),
    }
}

fn count_style(count: u64, suffix: &str) -> String {
    let text = if suffix.is_empty() {
        count.to_string()
    } else {
        format!("{} {}", count, suffix)
    };
    if count > 0 {
        style(text).red().to_string()
    } else {
        style(text).green().to_string()
    }
}

/// Format duration in human-readable format
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{:.2}s", duration.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

/// Display a warning message with proper formatting
pub fn display_warning(message: &str) {
    eprintln!("{} {}", style("⚠").yellow().bold(), style(message).yellow());
}

/// Display a success message with proper formatting
pub fn display_success(message: &str) {
    println!("{} {}", style("✓").green().bold(), style(message).green());
}
